//! A predicate over a package's integer build number, e.g. `">3"` or `"=0"`.
//!
//! Grounded on the same `OPERATOR_MAP` the release-version matcher uses in
//! `conda/models/version.py`, restricted to the subset that makes sense for
//! a bare integer: equality, inequality, and the four ordering operators.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum BuildNumberOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Error)]
pub enum ParseBuildNumberSpecError {
    #[error("invalid build number spec '{0}': missing a numeral after the operator")]
    MissingOperand(String),
    #[error("invalid build number spec '{0}': '{1}' is not an integer")]
    NotAnInteger(String, String),
}

/// A predicate over a package's build number.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BuildNumberSpec {
    source: String,
    op: BuildNumberOp,
    value: u64,
}

impl BuildNumberSpec {
    /// Returns true if `build_number` satisfies this spec.
    pub fn matches(&self, build_number: u64) -> bool {
        match self.op {
            BuildNumberOp::Eq => build_number == self.value,
            BuildNumberOp::Ne => build_number != self.value,
            BuildNumberOp::Lt => build_number < self.value,
            BuildNumberOp::Le => build_number <= self.value,
            BuildNumberOp::Gt => build_number > self.value,
            BuildNumberOp::Ge => build_number >= self.value,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for BuildNumberSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl FromStr for BuildNumberSpec {
    type Err = ParseBuildNumberSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (op, rest) = if let Some(rest) = trimmed.strip_prefix("==") {
            (BuildNumberOp::Eq, rest)
        } else if let Some(rest) = trimmed.strip_prefix("!=") {
            (BuildNumberOp::Ne, rest)
        } else if let Some(rest) = trimmed.strip_prefix(">=") {
            (BuildNumberOp::Ge, rest)
        } else if let Some(rest) = trimmed.strip_prefix("<=") {
            (BuildNumberOp::Le, rest)
        } else if let Some(rest) = trimmed.strip_prefix('>') {
            (BuildNumberOp::Gt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('<') {
            (BuildNumberOp::Lt, rest)
        } else if let Some(rest) = trimmed.strip_prefix('=') {
            (BuildNumberOp::Eq, rest)
        } else {
            (BuildNumberOp::Eq, trimmed)
        };

        let rest = rest.trim();
        if rest.is_empty() {
            return Err(ParseBuildNumberSpecError::MissingOperand(
                trimmed.to_string(),
            ));
        }
        let value = rest.parse::<u64>().map_err(|_| {
            ParseBuildNumberSpecError::NotAnInteger(trimmed.to_string(), rest.to_string())
        })?;

        Ok(BuildNumberSpec {
            source: trimmed.to_string(),
            op,
            value,
        })
    }
}

impl serde::Serialize for BuildNumberSpec {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.source)
    }
}

impl<'de> serde::Deserialize<'de> for BuildNumberSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BuildNumberSpec::from_str(&s).map_err(serde::de::Error::custom)
    }
}
