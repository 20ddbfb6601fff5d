//! A read-through cache of the `PrefixRecord`s installed in a prefix's
//! `conda-meta/` directory, plus the advisory lock that serializes mutation
//! of a single prefix across processes.
//!
//! Grounded on `rattler_conda_types::prefix_data::PrefixData` for the
//! lazy-parse-on-first-access idiom (`OnceLock` per discovered file); the
//! `name -> file` keying here works off the plain `<name>-<version>-<build>`
//! file stem instead of an `ArchiveIdentifier` type, since this crate's
//! `PackageRecord::name` is already a bare `String`.

use envcore_types::{MatchSpec, PrefixRecord};
use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PrefixDataError {
    #[error("io error reading prefix record: {0}")]
    Io(#[source] Arc<std::io::Error>),
    #[error("conda-meta is locked by another writer")]
    PrefixInUse,
}

impl From<std::io::Error> for PrefixDataError {
    fn from(err: std::io::Error) -> Self {
        PrefixDataError::Io(Arc::new(err))
    }
}

/// File path discovered during the initial directory scan, parsed lazily.
struct LazyRecordEntry {
    path: PathBuf,
    record: OnceLock<Result<PrefixRecord, PrefixDataError>>,
}

/// Splits a `conda-meta` file stem `<name>-<version>-<build>` and returns
/// the package name. Conda package names may themselves contain `-`, so
/// this takes everything before the second-to-last `-`-separated field.
fn name_from_file_stem(stem: &str) -> Option<String> {
    let mut parts: Vec<&str> = stem.rsplitn(3, '-').collect();
    if parts.len() < 3 {
        return None;
    }
    parts.reverse();
    Some(parts[0].to_string())
}

/// A lazily populated view of one prefix's `conda-meta` directory.
pub struct PrefixData {
    prefix_path: PathBuf,
    records: HashMap<String, LazyRecordEntry>,
}

impl PrefixData {
    pub fn prefix_path(&self) -> &Path {
        &self.prefix_path
    }

    /// Discovers every `conda-meta/*.json` file but does not parse any of
    /// them yet. A missing `conda-meta` directory is treated as empty.
    pub fn new(prefix_path: impl Into<PathBuf>) -> Result<Self, PrefixDataError> {
        let prefix_path = prefix_path.into();
        let meta_dir = prefix_path.join("conda-meta");
        let mut records = HashMap::new();

        if !meta_dir.exists() {
            return Ok(Self {
                prefix_path,
                records,
            });
        }

        for entry in fs::read_dir(&meta_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem == ".lock" {
                continue;
            }
            if let Some(name) = name_from_file_stem(stem) {
                records.insert(
                    name,
                    LazyRecordEntry {
                        path,
                        record: OnceLock::new(),
                    },
                );
            }
        }

        Ok(Self {
            prefix_path,
            records,
        })
    }

    /// Parses (on first access) and returns the record for `name`.
    pub fn get(&self, name: &str) -> Option<Result<&PrefixRecord, &PrefixDataError>> {
        let entry = self.records.get(name)?;
        let result = entry
            .record
            .get_or_init(|| PrefixRecord::from_path(&entry.path).map_err(PrefixDataError::from));
        Some(result.as_ref())
    }

    /// Iterates every record, parsing any not yet accessed.
    pub fn iter_records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.keys().filter_map(|name| match self.get(name) {
            Some(Ok(record)) => Some(record),
            _ => None,
        })
    }

    /// Records whose package matches `spec`.
    pub fn query<'a>(&'a self, spec: &'a MatchSpec) -> impl Iterator<Item = &'a PrefixRecord> {
        self.iter_records()
            .filter(move |record| spec.matches(&record.package_record))
    }

    /// Atomically writes `record` into `conda-meta` and updates the
    /// in-memory index to reflect it.
    pub fn insert(&mut self, record: PrefixRecord) -> Result<(), PrefixDataError> {
        let meta_dir = self.prefix_path.join("conda-meta");
        fs::create_dir_all(&meta_dir)?;
        let path = meta_dir.join(record.file_name());
        record.write_to_path(&path)?;
        let name = record.package_record.name.clone();
        self.records.insert(
            name,
            LazyRecordEntry {
                path,
                record: OnceLock::from(Ok(record)),
            },
        );
        Ok(())
    }

    /// Removes the `conda-meta` record for `name`, if present.
    pub fn remove(&mut self, name: &str) -> Result<(), PrefixDataError> {
        if let Some(entry) = self.records.remove(name) {
            match fs::remove_file(&entry.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// An advisory, process-exclusive lock over a prefix's `conda-meta`
/// directory, held for the duration of an `insert`/`remove`/link-phase
/// call and released (via `Drop`) on every exit path, including error.
pub struct PrefixLock {
    file: File,
}

impl PrefixLock {
    /// Acquires the lock, returning [`PrefixDataError::PrefixInUse`] if
    /// another writer currently holds it.
    pub fn acquire(prefix_path: &Path) -> Result<Self, PrefixDataError> {
        let meta_dir = prefix_path.join("conda-meta");
        fs::create_dir_all(&meta_dir)?;
        let lock_path = meta_dir.join(".lock");
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| PrefixDataError::PrefixInUse)?;
        Ok(PrefixLock { file })
    }
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envcore_types::{NoArchType, PackageRecord};
    use std::collections::BTreeSet;

    fn sample_record(name: &str) -> PrefixRecord {
        let package_record = PackageRecord {
            name: name.to_string(),
            version: "1.0.0".parse().unwrap(),
            build: "0".into(),
            build_number: 0,
            channel: Some("defaults".into()),
            subdir: "linux-64".into(),
            file_name: format!("{name}-1.0.0-0.tar.bz2"),
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
        PrefixRecord::from_repodata_record(package_record, None, vec![], None, None)
    }

    #[test]
    fn missing_conda_meta_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let prefix_data = PrefixData::new(dir.path()).unwrap();
        assert_eq!(prefix_data.iter_records().count(), 0);
    }

    #[test]
    fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefix_data = PrefixData::new(dir.path()).unwrap();
        prefix_data.insert(sample_record("numpy")).unwrap();
        let fetched = prefix_data.get("numpy").unwrap().unwrap();
        assert_eq!(fetched.package_record.name, "numpy");
    }

    #[test]
    fn hyphenated_name_parses_from_file_stem() {
        assert_eq!(
            name_from_file_stem("scikit-learn-1.2.2-py311_1"),
            Some("scikit-learn".to_string())
        );
    }

    #[test]
    fn remove_deletes_record_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefix_data = PrefixData::new(dir.path()).unwrap();
        prefix_data.insert(sample_record("numpy")).unwrap();
        prefix_data.remove("numpy").unwrap();
        assert!(prefix_data.get("numpy").is_none());
        assert!(!dir.path().join("conda-meta/numpy-1.0.0-0.json").exists());
    }

    #[test]
    fn second_lock_acquisition_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _first = PrefixLock::acquire(dir.path()).unwrap();
        let second = PrefixLock::acquire(dir.path());
        assert!(matches!(second, Err(PrefixDataError::PrefixInUse)));
    }
}
