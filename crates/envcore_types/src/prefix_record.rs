//! The on-disk shape of a `conda-meta/<name>-<version>-<build>.json` record:
//! a [`PackageRecord`] plus the bookkeeping the link engine attaches once a
//! package is actually installed.
//!
//! Grounded on `rattler_conda_types::prefix_record::PrefixRecord`/`Link`/
//! `LinkType`, flattened around this crate's own [`PackageRecord`] instead
//! of a `RepoDataRecord` wrapper.

use crate::package_record::PackageRecord;
use crate::paths::{PathsEntry, PathsJson};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a linked file came from and by what mechanism.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub source: PathBuf,
    #[serde(rename = "type")]
    pub link_type: Option<LinkType>,
}

/// The empty/default link value attached to a [`PackageRecord`] once
/// installed, before the actual source and mechanism are known.
pub fn empty_link() -> Link {
    Link {
        source: PathBuf::new(),
        link_type: None,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum LinkType {
    HardLink = 1,
    SoftLink = 2,
    Copy = 3,
    Directory = 4,
}

/// Information about how files were actually linked when installing the
/// package (as opposed to [`PathsJson`], which describes how they *should*
/// be installed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPaths {
    pub paths_version: u64,
    #[serde(default)]
    pub paths: Vec<PathsEntry>,
}

impl Default for PrefixPaths {
    fn default() -> Self {
        PrefixPaths {
            paths_version: 1,
            paths: Vec::new(),
        }
    }
}

impl From<Vec<PathsEntry>> for PrefixPaths {
    fn from(paths: Vec<PathsEntry>) -> Self {
        PrefixPaths {
            paths,
            ..Default::default()
        }
    }
}

/// The record stored at `conda-meta/<name>-<version>-<build>.json` once a
/// package has been linked into a prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixRecord {
    #[serde(flatten)]
    pub package_record: PackageRecord,

    #[serde(default)]
    pub files: Vec<PathBuf>,

    #[serde(default)]
    pub paths_data: PrefixPaths,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,
}

impl PrefixRecord {
    pub fn from_repodata_record(
        package_record: PackageRecord,
        url: Option<String>,
        paths: Vec<PathsEntry>,
        link: Option<Link>,
        requested_spec: Option<String>,
    ) -> Self {
        PrefixRecord {
            files: paths.iter().map(|e| e.relative_path.clone()).collect(),
            paths_data: paths.into(),
            package_record,
            link,
            url,
            requested_spec,
        }
    }

    /// `<name>-<version>-<build>.json`, the file stem every `conda-meta`
    /// record must be keyed by.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            self.package_record.name, self.package_record.version, self.package_record.build
        )
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        PrefixRecord::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Atomically writes this record: a temp file in the same directory,
    /// then a rename, so a reader never observes a partial write.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let dir = path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "record path has no parent")
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let writer = BufWriter::new(&mut tmp);
            serde_json::to_writer_pretty(writer, self)?;
        }
        tmp.persist(path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(())
    }

    /// Reads every `conda-meta/*.json` record in `prefix`. An absent
    /// `conda-meta` directory is treated as an empty prefix.
    pub fn collect_from_prefix(prefix: &Path) -> std::io::Result<Vec<PrefixRecord>> {
        let conda_meta = prefix.join("conda-meta");
        if !conda_meta.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&conda_meta)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().ends_with(".json")
            {
                records.push(PrefixRecord::from_path(entry.path())?);
            }
        }
        Ok(records)
    }
}

impl FromStr for PrefixRecord {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl PathsJson {
    /// Converts an install-manifest entry into the installed-record
    /// equivalent once linking has actually happened.
    pub fn into_prefix_paths(self) -> PrefixPaths {
        PrefixPaths {
            paths_version: self.paths_version as u64,
            paths: self.paths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::no_arch_type::NoArchType;
    use std::collections::BTreeSet;

    fn sample_record() -> PackageRecord {
        PackageRecord {
            name: "zlib".into(),
            version: "1.2.8".parse().unwrap(),
            build: "vc10_0".into(),
            build_number: 0,
            channel: Some("defaults".into()),
            subdir: "win-64".into(),
            file_name: "zlib-1.2.8-vc10_0.tar.bz2".into(),
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
    fn file_name_is_name_version_build() {
        let record = PrefixRecord::from_repodata_record(sample_record(), None, vec![], None, None);
        assert_eq!(record.file_name(), "zlib-1.2.8-vc10_0.json");
    }

    #[test]
    fn round_trips_through_json() {
        let record = PrefixRecord::from_repodata_record(sample_record(), None, vec![], None, None);
        let json = serde_json::to_string(&record).unwrap();
        let parsed: PrefixRecord = json.parse().unwrap();
        assert_eq!(parsed.package_record.name, "zlib");
    }

    #[test]
    fn collect_from_missing_prefix_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = PrefixRecord::collect_from_prefix(dir.path()).unwrap();
        assert!(records.is_empty());
    }
}
