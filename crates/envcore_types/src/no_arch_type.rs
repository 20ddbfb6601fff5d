//! The `noarch` field of a [`crate::PackageRecord`]: `none`, `generic`, or
//! `python`.
//!
//! Grounded directly on `rattler_conda_types::no_arch_type::NoArchType`,
//! which already handles both the legacy boolean repodata encoding and the
//! newer string encoding; kept as-is since the spec's three-way `noarch`
//! type is exactly what it models.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
enum RawNoArchType {
    /// The legacy boolean `true` encoding.
    GenericV1,
    /// The newer `"generic"` string encoding.
    GenericV2,
    Python,
}

/// Whether a package is architecture-independent, and if so, of what kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct NoArchType(Option<RawNoArchType>);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NoArchKind {
    Generic,
    Python,
}

impl NoArchType {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn generic() -> Self {
        Self(Some(RawNoArchType::GenericV2))
    }

    pub fn python() -> Self {
        Self(Some(RawNoArchType::Python))
    }

    pub fn kind(&self) -> Option<NoArchKind> {
        match self.0 {
            None => None,
            Some(RawNoArchType::GenericV1 | RawNoArchType::GenericV2) => Some(NoArchKind::Generic),
            Some(RawNoArchType::Python) => Some(NoArchKind::Python),
        }
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_python(&self) -> bool {
        self.kind() == Some(NoArchKind::Python)
    }

    pub fn is_generic(&self) -> bool {
        self.kind() == Some(NoArchKind::Generic)
    }
}

impl<'de> Deserialize<'de> for NoArchType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Kind(RawKind),
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum RawKind {
            Python,
            Generic,
        }

        let value = Option::<Raw>::deserialize(deserializer)?;
        Ok(NoArchType(value.and_then(|value| match value {
            Raw::Bool(true) => Some(RawNoArchType::GenericV1),
            Raw::Bool(false) => None,
            Raw::Kind(RawKind::Python) => Some(RawNoArchType::Python),
            Raw::Kind(RawKind::Generic) => Some(RawNoArchType::GenericV2),
        })))
    }
}

impl Serialize for NoArchType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            None => false.serialize(serializer),
            Some(RawNoArchType::GenericV1) => true.serialize(serializer),
            Some(RawNoArchType::GenericV2) => "generic".serialize(serializer),
            Some(RawNoArchType::Python) => "python".serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_bool_true_is_generic() {
        let noarch: NoArchType = serde_json::from_str("true").unwrap();
        assert!(noarch.is_generic());
    }

    #[test]
    fn legacy_bool_false_is_none() {
        let noarch: NoArchType = serde_json::from_str("false").unwrap();
        assert!(noarch.is_none());
    }

    #[test]
    fn string_python() {
        let noarch: NoArchType = serde_json::from_str("\"python\"").unwrap();
        assert!(noarch.is_python());
    }
}
