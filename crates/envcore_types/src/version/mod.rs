//! A comparable, parseable version type.
//!
//! A [`Version`] is an optional integer epoch, a dot-separated sequence of
//! components, and an optional local segment introduced by `+`. Each
//! component is itself a sequence of alternating numeral and alphabetic
//! tokens, compared lexicographically token by token.

mod parse;

use std::cmp::Ordering;
use std::fmt;

pub use parse::{ParseVersionError, ParseVersionErrorKind};

/// A single token within one dot-separated component of a version.
///
/// Ranking follows `Dev < Ident < Zero < Numeral < Post`, matching the
/// convention that pre-release markers sort below a release and `post`
/// markers sort above it; a component that is shorter than another is
/// padded with implicit [`Token::Zero`] entries during comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Token {
    /// The special `dev` marker: sorts below everything else.
    Dev,
    /// An arbitrary lowercase identifier, e.g. `rc`, `a`, `alpha`.
    Ident(String),
    /// The implicit empty alphabetic token, used both for an actually-empty
    /// segment and as the padding value for missing trailing tokens.
    Zero,
    /// A numeral, compared by value.
    Numeral(u64),
    /// The special `post` marker: sorts above everything else.
    Post,
    /// A literal `*`, used by version strings that are themselves wildcard
    /// patterns. Compares equal to any other token.
    Wildcard,
}

impl Token {
    fn rank(&self) -> u8 {
        match self {
            Token::Dev => 0,
            Token::Ident(_) => 1,
            Token::Zero => 2,
            Token::Numeral(_) => 3,
            Token::Post => 4,
            Token::Wildcard => 5,
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        if matches!(self, Token::Wildcard) || matches!(other, Token::Wildcard) {
            return Ordering::Equal;
        }
        match (self, other) {
            (Token::Ident(a), Token::Ident(b)) => a.cmp(b),
            (Token::Numeral(a), Token::Numeral(b)) => a.cmp(b),
            // A missing trailing token is padded as `Zero`, which must behave
            // as numeric zero against a real numeral (`"1.0" == "1.0.0"`),
            // not merely as a lower-ranked token (`"1.0.0" > "1.0"`).
            (Token::Numeral(a), Token::Zero) => a.cmp(&0),
            (Token::Zero, Token::Numeral(b)) => 0.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Dev => write!(f, "dev"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Zero => Ok(()),
            Token::Numeral(n) => write!(f, "{n}"),
            Token::Post => write!(f, "post"),
            Token::Wildcard => write!(f, "*"),
        }
    }
}

/// One dot-separated piece of a version, tokenized into alternating
/// numeral/alphabetic runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Component(pub Vec<Token>);

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Component {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).unwrap_or(&Token::Zero);
            let b = other.0.get(i).unwrap_or(&Token::Zero);
            match a.cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.0 {
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

/// A parsed, comparable version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    epoch: u64,
    release: Vec<Component>,
    local: Vec<Component>,
}

impl Version {
    /// The epoch of this version, `0` if none was specified.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The dot-separated release components, before any `+local` segment.
    pub fn release(&self) -> &[Component] {
        &self.release
    }

    /// The dot-separated local-version components, after `+`.
    pub fn local(&self) -> &[Component] {
        &self.local
    }

    /// Returns the first two release components as `(major, minor)` if both
    /// are plain numerals. Used by noarch-python path resolution.
    pub fn as_major_minor(&self) -> Option<(u64, u64)> {
        let major = match self.release.first()?.0.as_slice() {
            [Token::Numeral(n)] => *n,
            _ => return None,
        };
        let minor = match self.release.get(1)?.0.as_slice() {
            [Token::Numeral(n)] => *n,
            _ => return None,
        };
        Some((major, minor))
    }

    /// Returns a new version truncated to one fewer release component, used
    /// by the `~=` compatible-release operator.
    pub fn truncate_last_component(&self) -> Version {
        let mut release = self.release.clone();
        release.pop();
        Version {
            epoch: self.epoch,
            release,
            local: Vec::new(),
        }
    }

    /// Returns true if `self`'s release components start with `prefix`'s,
    /// component by component (used by `~=` and the `=`/startswith leaves).
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        if prefix.release.len() > self.release.len() {
            return false;
        }
        self.release[..prefix.release.len()] == prefix.release[..]
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).cloned().unwrap_or_default();
            let b = other.release.get(i).cloned().unwrap_or_default();
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        let len = self.local.len().max(other.local.len());
        for i in 0..len {
            let a = self.local.get(i).cloned().unwrap_or_default();
            let b = other.local.get(i).cloned().unwrap_or_default();
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release = self
            .release
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{release}")?;
        if !self.local.is_empty() {
            let local = self
                .local
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_version(s)
    }
}

impl serde::Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
