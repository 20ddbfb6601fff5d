//! A minimal channel identity: a name (e.g. `conda-forge`) or a base URL,
//! plus the `defaults` sentinel that the index builder and `MatchSpec`
//! treat specially.
//!
//! Grounded on `rattler_conda_types::channel::Channel`/`NamedChannelOrUrl`,
//! reduced to just identity and canonical naming: channel *configuration*
//! (aliases, mirrors, multi-platform base URLs) is not part of this
//! component.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// The sentinel name conda treats as "no channel specified" in `MatchSpec`
/// and dist-string parsing.
pub const DEFAULTS: &str = "defaults";

/// A channel, identified either by a short name or by an explicit base URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Channel {
    Name(String),
    Url(Url),
}

impl Channel {
    /// The `defaults` channel.
    pub fn defaults() -> Channel {
        Channel::Name(DEFAULTS.to_string())
    }

    pub fn is_defaults(&self) -> bool {
        matches!(self, Channel::Name(name) if name == DEFAULTS)
    }

    /// The string used as the `channel::` prefix in dist strings and
    /// `MatchSpec` round-trips: the `defaults` channel is never emitted.
    pub fn canonical_name(&self) -> Option<String> {
        match self {
            Channel::Name(name) if name == DEFAULTS => None,
            Channel::Name(name) => Some(name.clone()),
            Channel::Url(url) => Some(url.to_string()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Name(name) => write!(f, "{name}"),
            Channel::Url(url) => write!(f, "{url}"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(url) = Url::parse(s) {
            if matches!(url.scheme(), "http" | "https" | "file") {
                return Ok(Channel::Url(url));
            }
        }
        Ok(Channel::Name(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_has_no_canonical_name() {
        assert_eq!(Channel::defaults().canonical_name(), None);
    }

    #[test]
    fn named_channel_round_trips() {
        let c: Channel = "conda-forge".parse().unwrap();
        assert_eq!(c.to_string(), "conda-forge");
        assert_eq!(c.canonical_name().as_deref(), Some("conda-forge"));
    }

    #[test]
    fn url_channel_parses_as_url() {
        let c: Channel = "https://conda.anaconda.org/conda-forge".parse().unwrap();
        assert!(matches!(c, Channel::Url(_)));
    }
}
