//! The canonical identity of an available package, as known to the index,
//! the cache, and an installed prefix.
//!
//! Grounded on `rattler_conda_types::repo_data::PackageRecord`, generalized
//! with the legacy field aliases (`schannel`/`filename`/`build_string`) the
//! source record hierarchy wires up dynamically, made explicit here as a
//! custom `Deserialize` per the "field spec" design note.

use crate::no_arch_type::NoArchType;
use crate::version::Version;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// `253402300799` is `9999-12-31T23:59:59Z` as Unix seconds: any timestamp
/// input at or below it is assumed to be seconds and is scaled to
/// milliseconds, matching the source's duck-typed timestamp normalization.
const MAX_TIMESTAMP_SECONDS: i64 = 253_402_300_799;

/// Normalizes a raw timestamp value (seconds or milliseconds) to
/// milliseconds since the epoch.
pub fn normalize_timestamp(raw: i64) -> i64 {
    if raw <= MAX_TIMESTAMP_SECONDS {
        raw * 1000
    } else {
        raw
    }
}

/// The canonical identity of a package as known to an index, cache, or
/// installed prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: Version,
    pub build: String,
    pub build_number: u64,

    pub channel: Option<String>,
    pub subdir: String,
    pub file_name: String,

    pub url: Option<String>,
    pub md5: Option<String>,
    pub sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    pub timestamp: Option<i64>,
    pub size: Option<u64>,
    pub license: Option<String>,
    pub license_family: Option<String>,

    #[serde(default)]
    pub noarch: NoArchType,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub features: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub track_features: BTreeSet<String>,

    pub preferred_env: Option<String>,
}

impl PackageRecord {
    /// The tuple two records must agree on to be considered the same
    /// logical package.
    pub fn equality_key(&self) -> (Option<&str>, &str, &str, &Version, &str) {
        (
            self.channel.as_deref(),
            self.subdir.as_str(),
            self.name.as_str(),
            &self.version,
            self.build.as_str(),
        )
    }

    /// Parses a whitespace-or-comma separated feature set, as used for both
    /// `features` and `track_features`.
    pub fn parse_feature_set(raw: &str) -> BTreeSet<String> {
        raw.split([',', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl std::hash::Hash for PackageRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.channel.hash(state);
        self.subdir.hash(state);
        self.name.hash(state);
        self.version.hash(state);
        self.build.hash(state);
    }
}

impl Eq for PackageRecord {}

/// Mirrors the on-disk / repodata JSON shape, including legacy aliases, and
/// converts into the canonical [`PackageRecord`] via [`TryFrom`].
#[derive(Debug, Deserialize)]
struct RawPackageRecord {
    name: String,
    version: String,
    #[serde(alias = "build_string")]
    build: String,
    #[serde(default)]
    build_number: u64,

    #[serde(alias = "schannel")]
    channel: Option<String>,
    #[serde(default)]
    subdir: String,
    #[serde(alias = "filename")]
    #[serde(default)]
    file_name: String,

    url: Option<String>,
    md5: Option<String>,
    sha256: Option<String>,

    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    constrains: Vec<String>,

    #[serde(default, deserialize_with = "deserialize_timestamp")]
    timestamp: Option<i64>,
    size: Option<u64>,
    license: Option<String>,
    license_family: Option<String>,

    #[serde(default)]
    noarch: NoArchType,

    #[serde(default)]
    features: Option<String>,
    #[serde(default)]
    track_features: Option<String>,

    preferred_env: Option<String>,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw.map(normalize_timestamp))
}

impl<'de> Deserialize<'de> for PackageRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawPackageRecord::deserialize(deserializer)?;
        let version = raw.version.parse().map_err(serde::de::Error::custom)?;
        Ok(PackageRecord {
            name: raw.name,
            version,
            build: raw.build,
            build_number: raw.build_number,
            channel: raw.channel,
            subdir: raw.subdir,
            file_name: raw.file_name,
            url: raw.url,
            md5: raw.md5,
            sha256: raw.sha256,
            depends: raw.depends,
            constrains: raw.constrains,
            timestamp: raw.timestamp,
            size: raw.size,
            license: raw.license,
            license_family: raw.license_family,
            noarch: raw.noarch,
            features: raw.features.map(|s| PackageRecord::parse_feature_set(&s)).unwrap_or_default(),
            track_features: raw.track_features.map(|s| PackageRecord::parse_feature_set(&s)).unwrap_or_default(),
            preferred_env: raw.preferred_env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_timestamp_is_scaled_to_millis() {
        assert_eq!(normalize_timestamp(1_507_565_728), 1_507_565_728_000);
    }

    #[test]
    fn millis_timestamp_is_unchanged() {
        assert_eq!(normalize_timestamp(1_507_565_728_999), 1_507_565_728_999);
    }

    #[test]
    fn schannel_aliases_to_channel() {
        let json = r#"{
            "name": "numpy",
            "version": "1.26.0",
            "build": "py311h0",
            "build_number": 0,
            "schannel": "conda-forge",
            "subdir": "linux-64"
        }"#;
        let record: PackageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.channel.as_deref(), Some("conda-forge"));
    }

    #[test]
    fn filename_aliases_to_file_name() {
        let json = r#"{
            "name": "numpy",
            "version": "1.26.0",
            "build_string": "py311h0",
            "build_number": 0,
            "subdir": "linux-64",
            "filename": "numpy-1.26.0-py311h0.tar.bz2"
        }"#;
        let record: PackageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.build, "py311h0");
        assert_eq!(record.file_name, "numpy-1.26.0-py311h0.tar.bz2");
    }

    #[test]
    fn feature_set_splits_on_comma_and_space() {
        let set = PackageRecord::parse_feature_set("mkl, blas nomkl");
        assert_eq!(set.len(), 3);
        assert!(set.contains("mkl"));
        assert!(set.contains("blas"));
        assert!(set.contains("nomkl"));
    }

    #[test]
    fn equality_key_ignores_build_number() {
        let a = PackageRecord {
            name: "foo".into(),
            version: "1.0".parse().unwrap(),
            build: "0".into(),
            build_number: 0,
            channel: Some("defaults".into()),
            subdir: "linux-64".into(),
            file_name: "foo-1.0-0.tar.bz2".into(),
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
        };
        let mut b = a.clone();
        b.build_number = 7;
        assert_eq!(a.equality_key(), b.equality_key());
    }
}
