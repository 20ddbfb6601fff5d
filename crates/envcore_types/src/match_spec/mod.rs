//! A bag of field predicates over a [`PackageRecord`].
//!
//! Grounded on the field shape of `rattler::match_spec::MatchSpec`
//! (name/version/build/channel/namespace), extended with the additional
//! fields the spec's PackageRecord model requires (`build_number`,
//! `subdir`, `features`, `track_features`, `md5`, `url`); the quoted-token
//! string grammar is grounded on
//! `rattler_conda_types::package::has_prefix`'s nom parser idiom.

mod parse;

use crate::channel::Channel;
use crate::package_record::PackageRecord;
use crate::version_spec::{BuildNumberSpec, VersionSpec};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use parse::ParseMatchSpecError;

/// A `name`/`build` field matcher: either an exact string or, if the source
/// contains `*`, a compiled anchored glob.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    Exact(String),
    Glob { source: String, regex: Arc<Regex> },
}

impl StringMatcher {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            StringMatcher::Exact(s) => s == value,
            StringMatcher::Glob { regex, .. } => regex.is_match(value),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            StringMatcher::Exact(s) => s,
            StringMatcher::Glob { source, .. } => source,
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.source() == other.source()
    }
}

impl Eq for StringMatcher {}

impl fmt::Display for StringMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source())
    }
}

impl FromStr for StringMatcher {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('*') {
            let mut pattern = String::from("^");
            for part in s.split('*') {
                pattern.push_str(&regex::escape(part));
                pattern.push_str(".*");
            }
            pattern.truncate(pattern.len() - 2);
            pattern.push('$');
            Ok(StringMatcher::Glob {
                source: s.to_string(),
                regex: Arc::new(Regex::new(&pattern).expect("glob pattern always compiles")),
            })
        } else {
            Ok(StringMatcher::Exact(s.to_string()))
        }
    }
}

impl Serialize for StringMatcher {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self.source())
    }
}

/// A bag of field predicates over a [`PackageRecord`]. A field that is
/// `None` is a don't-care; matching requires every present field to match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSpec {
    pub channel: Option<Channel>,
    pub namespace: Option<String>,
    pub name: Option<StringMatcher>,
    pub version: Option<VersionSpec>,
    pub build: Option<StringMatcher>,
    pub build_number: Option<BuildNumberSpec>,
    pub subdir: Option<String>,
    pub features: Option<BTreeSet<String>>,
    pub track_features: Option<BTreeSet<String>>,
    pub md5: Option<String>,
    pub url: Option<String>,
}

impl MatchSpec {
    /// True if `record` satisfies every field this spec constrains.
    pub fn matches(&self, record: &PackageRecord) -> bool {
        if let Some(name) = &self.name {
            if !name.matches(&record.name) {
                return false;
            }
        }
        if let Some(version) = &self.version {
            if !version.matches(&record.version) {
                return false;
            }
        }
        if let Some(build) = &self.build {
            if !build.matches(&record.build) {
                return false;
            }
        }
        if let Some(build_number) = &self.build_number {
            if !build_number.matches(record.build_number) {
                return false;
            }
        }
        if let Some(channel) = &self.channel {
            if !channel_matches(record.channel.as_deref(), channel) {
                return false;
            }
        }
        if let Some(subdir) = &self.subdir {
            if &record.subdir != subdir {
                return false;
            }
        }
        if let Some(features) = &self.features {
            if features != &record.features {
                return false;
            }
        }
        if let Some(track_features) = &self.track_features {
            if track_features != &record.track_features {
                return false;
            }
        }
        if let Some(md5) = &self.md5 {
            if record.md5.as_deref() != Some(md5.as_str()) {
                return false;
            }
        }
        if let Some(url) = &self.url {
            if record.url.as_deref() != Some(url.as_str()) {
                return false;
            }
        }
        true
    }
}

/// The `defaults` channel is represented as both `None` and the literal
/// string `"defaults"` across records depending on provenance, so treat
/// them as equivalent when matching.
fn channel_matches(record_channel: Option<&str>, spec_channel: &Channel) -> bool {
    if spec_channel.is_defaults() {
        matches!(record_channel, None | Some("defaults"))
    } else {
        record_channel == spec_channel.canonical_name().as_deref()
    }
}

static KEY_ORDER: &[&str] = &[
    "version",
    "build",
    "build_number",
    "subdir",
    "features",
    "track_features",
    "md5",
    "url",
];

fn join_features(features: &BTreeSet<String>) -> String {
    features.iter().cloned().collect::<Vec<_>>().join(",")
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(channel) = &self.channel {
            if let Some(name) = channel.canonical_name() {
                write!(f, "{name}::")?;
            }
        }
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}/")?;
        }
        match &self.name {
            Some(name) => write!(f, "{name}")?,
            None => write!(f, "*")?,
        }

        let mut fields: Vec<(&str, String)> = Vec::new();
        if let Some(v) = &self.version {
            fields.push(("version", v.to_string()));
        }
        if let Some(v) = &self.build {
            fields.push(("build", v.to_string()));
        }
        if let Some(v) = &self.build_number {
            fields.push(("build_number", v.to_string()));
        }
        if let Some(v) = &self.subdir {
            fields.push(("subdir", v.clone()));
        }
        if let Some(v) = &self.features {
            fields.push(("features", join_features(v)));
        }
        if let Some(v) = &self.track_features {
            fields.push(("track_features", join_features(v)));
        }
        if let Some(v) = &self.md5 {
            fields.push(("md5", v.clone()));
        }
        if let Some(v) = &self.url {
            fields.push(("url", v.clone()));
        }
        fields.sort_by_key(|(k, _)| KEY_ORDER.iter().position(|o| o == k).unwrap_or(usize::MAX));

        if !fields.is_empty() {
            let joined = fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            write!(f, "[{joined}]")?;
        }
        Ok(())
    }
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_match_spec(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::no_arch_type::NoArchType;

    fn record() -> PackageRecord {
        PackageRecord {
            name: "numpy".into(),
            version: "1.26.0".parse().unwrap(),
            build: "py311h0".into(),
            build_number: 0,
            channel: Some("conda-forge".into()),
            subdir: "linux-64".into(),
            file_name: "numpy-1.26.0-py311h0.tar.bz2".into(),
            url: None,
            md5: None,
            sha256: None,
            depends: vec![],
            constrains: vec![],
            timestamp: None,
            size: None,
            license: None,
            license_family: None,
            noarch: NoArchType::none(),
            features: BTreeSet::new(),
            track_features: BTreeSet::new(),
            preferred_env: None,
        }
    }

    #[test]
    fn name_only_matches() {
        let spec = MatchSpec::from_str("numpy").unwrap();
        assert!(spec.matches(&record()));
    }

    #[test]
    fn glob_name_matches() {
        let spec = MatchSpec::from_str("num*").unwrap();
        assert!(spec.matches(&record()));
        let spec = MatchSpec::from_str("scipy*").unwrap();
        assert!(!spec.matches(&record()));
    }

    #[test]
    fn version_field_constrains() {
        let spec = MatchSpec::from_str("numpy[version=\">=1.20\"]").unwrap();
        assert!(spec.matches(&record()));
        let spec = MatchSpec::from_str("numpy[version=\"<1.0\"]").unwrap();
        assert!(!spec.matches(&record()));
    }

    #[test]
    fn display_round_trips() {
        let spec = MatchSpec::from_str("numpy[version=\">=1.20\",build=py311h0]").unwrap();
        let rendered = spec.to_string();
        let reparsed = MatchSpec::from_str(&rendered).unwrap();
        assert_eq!(spec, reparsed);
    }

    #[test]
    fn channel_prefix_round_trips() {
        let spec = MatchSpec::from_str("conda-forge::numpy").unwrap();
        assert_eq!(spec.to_string(), "conda-forge::numpy");
    }
}
