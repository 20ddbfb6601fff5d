//! Removing an installed package's files from a prefix.
//!
//! Grounded on `rattler::install::unlink`, made synchronous throughout
//! (this core has no async runtime) and with a plain `std::fs` trash
//! implementation in place of the teacher's `tokio`-based one.

use envcore_types::PrefixRecord;
use std::collections::HashSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum UnlinkError {
    #[error("failed to delete empty directory: {0}")]
    FailedToDeleteDirectory(String, #[source] std::io::Error),

    #[error("failed to delete file: {0}")]
    FailedToDeleteFile(String, #[source] std::io::Error),

    #[error("failed to read directory: {0}")]
    FailedToReadDirectory(String, #[source] std::io::Error),

    #[error("failed to test existence: {0}")]
    FailedToTestExistence(String, #[source] std::io::Error),

    #[error("failed to create directory: {0}")]
    FailedToCreateDirectory(String, #[source] std::io::Error),

    #[error("failed to move file: {0} to {1}")]
    FailedToMoveFile(String, String, #[source] std::io::Error),
}

/// Removes `directory_path` if it's empty, then walks up removing newly
/// empty parents, stopping at `target_prefix`. A noarch-python package
/// gets one extra allowance: a directory containing nothing but a
/// `__pycache__` subdirectory is also considered empty, since compiling
/// `.pyc` files after install leaves one behind that the original package
/// manifest never listed.
pub(crate) fn recursively_remove_empty_directories(
    directory_path: &Path,
    target_prefix: &Path,
    is_python_noarch: bool,
    keep_directories: &HashSet<PathBuf>,
) -> Result<PathBuf, UnlinkError> {
    if directory_path == target_prefix
        || keep_directories.contains(directory_path)
        || !directory_path.exists()
    {
        return Ok(directory_path.to_path_buf());
    }

    assert!(directory_path.starts_with(target_prefix));

    let mut read_dir = directory_path.read_dir().map_err(|e| {
        UnlinkError::FailedToReadDirectory(directory_path.to_string_lossy().to_string(), e)
    })?;

    match read_dir.next().transpose() {
        Ok(None) => {
            std::fs::remove_dir(directory_path).map_err(|e| {
                UnlinkError::FailedToDeleteDirectory(
                    directory_path.to_string_lossy().to_string(),
                    e,
                )
            })?;

            match directory_path.parent() {
                Some(parent) => recursively_remove_empty_directories(
                    parent,
                    target_prefix,
                    is_python_noarch,
                    keep_directories,
                ),
                None => Ok(directory_path.into()),
            }
        }

        Ok(Some(entry))
            if is_python_noarch
                && entry.file_name() == "__pycache__"
                && read_dir.next().is_none() =>
        {
            std::fs::remove_dir_all(directory_path).map_err(|e| {
                UnlinkError::FailedToDeleteDirectory(
                    directory_path.to_string_lossy().to_string(),
                    e,
                )
            })?;

            match directory_path.parent() {
                Some(parent) => recursively_remove_empty_directories(
                    parent,
                    target_prefix,
                    is_python_noarch,
                    keep_directories,
                ),
                None => Ok(directory_path.into()),
            }
        }
        _ => Ok(directory_path.into()),
    }
}

/// Deletes every file currently sitting in `<target_prefix>/.trash`,
/// leaving behind any that are still locked (e.g. because a process that
/// had the original file open is still running on Windows), and removes
/// the `.trash` directory itself once it's empty.
pub fn empty_trash(target_prefix: &Path) -> Result<(), UnlinkError> {
    let trash_dir = target_prefix.join(".trash");
    match std::fs::read_dir(&trash_dir) {
        Ok(read_dir) => {
            let mut files_left_in_trash = false;
            for entry in read_dir {
                let entry = entry.map_err(|e| {
                    UnlinkError::FailedToReadDirectory(trash_dir.to_string_lossy().to_string(), e)
                })?;
                std::fs::remove_file(entry.path()).or_else(|e| match e.kind() {
                    ErrorKind::NotFound => Ok(()),
                    ErrorKind::PermissionDenied => {
                        files_left_in_trash = true;
                        Ok(())
                    }
                    _ => Err(UnlinkError::FailedToDeleteFile(
                        entry.path().to_string_lossy().to_string(),
                        e,
                    )),
                })?;
            }
            if !files_left_in_trash {
                std::fs::remove_dir(&trash_dir).map_err(|e| {
                    UnlinkError::FailedToDeleteDirectory(trash_dir.to_string_lossy().to_string(), e)
                })?;
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(UnlinkError::FailedToReadDirectory(
                trash_dir.to_string_lossy().to_string(),
                e,
            ))
        }
    }

    Ok(())
}

fn move_to_trash(target_prefix: &Path, path: &Path) -> Result<(), UnlinkError> {
    let mut trash_dest = target_prefix.join(".trash");
    match trash_dest.try_exists() {
        Ok(true) => {}
        Ok(false) => std::fs::create_dir(&trash_dest).map_err(|e| {
            UnlinkError::FailedToCreateDirectory(trash_dest.to_string_lossy().to_string(), e)
        })?,
        Err(e) => {
            return Err(UnlinkError::FailedToTestExistence(
                trash_dest.to_string_lossy().to_string(),
                e,
            ))
        }
    }

    let mut new_filename = OsString::new();
    if let Some(file_name) = path.file_name() {
        new_filename.push(file_name);
        new_filename.push(".");
    }
    new_filename.push(format!("{}.trash", uuid::Uuid::new_v4().simple()));
    trash_dest.push(new_filename);

    std::fs::rename(path, &trash_dest).map_err(|e| {
        UnlinkError::FailedToMoveFile(
            path.to_string_lossy().to_string(),
            trash_dest.to_string_lossy().to_string(),
            e,
        )
    })
}

/// Removes every file an installed package owns and its `conda-meta`
/// record. Files that can't be deleted because another process has them
/// open are moved to `.trash` instead, so a later `empty_trash` call (or a
/// future unlink of the same path) can retry.
pub fn unlink_package(target_prefix: &Path, prefix_record: &PrefixRecord) -> Result<(), UnlinkError> {
    for paths in &prefix_record.paths_data.paths {
        let p = target_prefix.join(&paths.relative_path);
        match std::fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) => match e.kind() {
                ErrorKind::NotFound => {}
                ErrorKind::PermissionDenied => move_to_trash(target_prefix, &p)?,
                _ => {
                    return Err(UnlinkError::FailedToDeleteFile(
                        paths.relative_path.to_string_lossy().to_string(),
                        e,
                    ))
                }
            },
        }
    }

    let conda_meta_path = target_prefix.join("conda-meta").join(prefix_record.file_name());

    std::fs::remove_file(&conda_meta_path).map_err(|e| {
        UnlinkError::FailedToDeleteFile(conda_meta_path.to_string_lossy().to_string(), e)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use envcore_types::paths::{PathType, PathsEntry};
    use envcore_types::{NoArchType, PackageRecord};
    use std::collections::BTreeSet;
    use std::fs::{self, File};
    use std::io::Write;

    fn sample_prefix_record(relative_path: &str) -> PrefixRecord {
        let package_record = PackageRecord {
            name: "pytweening".into(),
            version: "1.0.4".parse().unwrap(),
            build: "pyhd8ed1ab_0".into(),
            build_number: 0,
            channel: Some("defaults".into()),
            subdir: "noarch".into(),
            file_name: "pytweening-1.0.4-pyhd8ed1ab_0.tar.bz2".into(),
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
        let entry = PathsEntry {
            relative_path: PathBuf::from(relative_path),
            path_type: PathType::HardLink,
            file_mode: Default::default(),
            prefix_placeholder: None,
            no_link: false,
            sha256: None,
            size_in_bytes: None,
        };
        PrefixRecord::from_repodata_record(package_record, None, vec![entry], None, None)
    }

    #[test]
    fn unlink_removes_files_and_conda_meta() {
        let prefix = tempfile::tempdir().unwrap();
        let record = sample_prefix_record("lib/foo.py");
        fs::create_dir_all(prefix.path().join("lib")).unwrap();
        fs::write(prefix.path().join("lib/foo.py"), b"print(1)").unwrap();
        fs::create_dir_all(prefix.path().join("conda-meta")).unwrap();
        let meta_path = prefix.path().join("conda-meta").join(record.file_name());
        record.write_to_path(&meta_path).unwrap();

        unlink_package(prefix.path(), &record).unwrap();

        assert!(!prefix.path().join("lib/foo.py").exists());
        assert!(!meta_path.exists());
    }

    #[test]
    fn unlink_ignores_already_missing_file() {
        let prefix = tempfile::tempdir().unwrap();
        let record = sample_prefix_record("lib/missing.py");
        fs::create_dir_all(prefix.path().join("conda-meta")).unwrap();
        let meta_path = prefix.path().join("conda-meta").join(record.file_name());
        record.write_to_path(&meta_path).unwrap();

        unlink_package(prefix.path(), &record).unwrap();
        assert!(!meta_path.exists());
    }

    #[test]
    fn empty_directories_are_removed_up_to_prefix() {
        let prefix = tempfile::tempdir().unwrap();
        let nested = prefix.path().join("lib/python3.10/site-packages/foo");
        fs::create_dir_all(&nested).unwrap();

        let result =
            recursively_remove_empty_directories(&nested, prefix.path(), false, &HashSet::new())
                .unwrap();

        assert_eq!(result, prefix.path());
        assert!(!prefix.path().join("lib").exists());
    }

    #[test]
    fn noarch_pycache_only_directory_is_removed() {
        let prefix = tempfile::tempdir().unwrap();
        let package_dir = prefix.path().join("lib/python3.10/site-packages/pytweening");
        let pycache = package_dir.join("__pycache__");
        fs::create_dir_all(&pycache).unwrap();
        let mut file = File::create(pycache.join("__init__.cpython-310.pyc")).unwrap();
        file.write_all(b"bytes").unwrap();

        recursively_remove_empty_directories(&package_dir, prefix.path(), true, &HashSet::new())
            .unwrap();

        assert!(!package_dir.exists());
    }

    #[test]
    fn empty_trash_removes_files_and_directory() {
        let prefix = tempfile::tempdir().unwrap();
        let trash = prefix.path().join(".trash");
        fs::create_dir_all(&trash).unwrap();
        fs::write(trash.join("a.trash"), b"x").unwrap();
        fs::write(trash.join("b.trash"), b"y").unwrap();

        empty_trash(prefix.path()).unwrap();
        assert!(!trash.exists());
    }
}
