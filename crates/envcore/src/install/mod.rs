//! Installing and removing a single package in a prefix.
//!
//! [`install_package`] is the main entry point: given a package directory
//! (an already-extracted archive) and a target prefix, it links every file
//! named in `info/paths.json`, routes noarch-python files to the
//! interpreter's actual `site-packages`/`Scripts` directories, materializes
//! any declared entry points, and returns the [`PrefixRecord`] the caller
//! should hand to [`crate::prefix_data::PrefixData::insert`]. [`unlink`]
//! holds the inverse.
//!
//! Grounded on `rattler::install::mod` (`link_package`), trimmed of its
//! async task scheduling — there's no runtime here, so files are linked in
//! parallel with `rayon` instead of `tokio::spawn_blocking` futures.
//! Running pre-link/post-link scripts (`scripts`) and building/compiling a
//! batch of packages in dependency order is left to the caller: this module
//! only knows how to place and remove the files of one package at a time,
//! not how to plan a transaction (solving and ordering dependencies is
//! explicitly out of scope).

pub mod entry_point;
pub mod link;
pub mod noarch;
pub mod scripts;
pub mod unlink;

pub use entry_point::{create_windows_launcher, EntryPointError};
pub use link::{link_file, LinkFileError, LinkMethod, LinkedFile};
pub use noarch::{EntryPoint, NoarchError, PythonInfo, PythonInfoError};
pub use scripts::{run_link_scripts, LinkScriptError, LinkScriptType, PrePostLinkResult};
pub use unlink::{empty_trash, unlink_package, UnlinkError};

use envcore_types::paths::{FileMode, PathType, PathsEntry, PathsJson};
use envcore_types::prefix_record::Link;
use envcore_types::{LinkType, PackageRecord, PrefixRecord};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("failed to read 'paths.json'")]
    FailedToReadPathsJson(#[source] std::io::Error),

    #[error("failed to create target directory")]
    FailedToCreateTargetDirectory(#[source] std::io::Error),

    #[error("target prefix is not UTF-8")]
    TargetPrefixIsNotUtf8,

    #[error("cannot install a noarch python package without python_info")]
    MissingPythonInfo,

    #[error("failed to link '{0}'")]
    FailedToLink(PathBuf, #[source] LinkFileError),

    #[error("failed to create entry points")]
    FailedToCreateEntryPoint(#[source] NoarchError),

    #[error("failed to create a windows launcher")]
    FailedToCreateWindowsLauncher(#[source] EntryPointError),
}

/// Tunables for [`install_package`]. Missing values fall back to probing the
/// filesystem, matching the teacher's auto-detection for symlink/hardlink
/// support.
#[derive(Default, Clone)]
pub struct InstallOptions {
    pub allow_symbolic_links: Option<bool>,
    pub allow_hard_links: Option<bool>,
    /// Required if and only if the package being installed is `noarch:
    /// python`.
    pub python_info: Option<PythonInfo>,
    /// Whether `target_prefix` is a Windows environment; controls entry
    /// point and link-script path conventions.
    pub windows: bool,
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Links a package from `package_dir` into `target_prefix`, returning the
/// record that should be written to `conda-meta`.
///
/// `url` and `requested_spec` are recorded on the resulting [`PrefixRecord`]
/// as-is (they normally come from the repodata record and the user's
/// original spec, respectively, both outside this module's concern).
pub fn install_package(
    package_dir: &Path,
    target_prefix: &Path,
    package_record: PackageRecord,
    url: Option<String>,
    requested_spec: Option<String>,
    options: &InstallOptions,
) -> Result<PrefixRecord, InstallError> {
    std::fs::create_dir_all(target_prefix)
        .map_err(InstallError::FailedToCreateTargetDirectory)?;

    let target_prefix_str = target_prefix
        .to_str()
        .ok_or(InstallError::TargetPrefixIsNotUtf8)?;

    let paths_json = PathsJson::from_package_directory_with_deprecated_fallback(package_dir)
        .map_err(InstallError::FailedToReadPathsJson)?;

    let is_noarch_python = package_record.noarch.is_python();
    if is_noarch_python && options.python_info.is_none() {
        return Err(InstallError::MissingPythonInfo);
    }

    let allow_symbolic_links = options
        .allow_symbolic_links
        .unwrap_or_else(|| can_create_symlinks(target_prefix));
    let allow_hard_links = options
        .allow_hard_links
        .unwrap_or_else(|| paths_have_same_filesystem(target_prefix, package_dir));

    let routed_entries: Vec<PathsEntry> = paths_json
        .paths
        .into_iter()
        .map(|mut entry| {
            if is_noarch_python {
                if let Some(python_info) = options.python_info.as_ref() {
                    entry.relative_path =
                        python_info.target_path(&entry.relative_path).into_owned();
                }
            }
            entry
        })
        .collect();

    for entry in &routed_entries {
        if let Some(parent) = target_prefix.join(&entry.relative_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(InstallError::FailedToCreateTargetDirectory)?;
        }
    }

    let linked: Vec<LinkedFile> = routed_entries
        .par_iter()
        .map(|entry| {
            link_file(
                entry,
                package_dir,
                target_prefix,
                target_prefix_str,
                allow_symbolic_links && !entry.no_link,
                allow_hard_links && !entry.no_link,
            )
            .map_err(|e| InstallError::FailedToLink(entry.relative_path.clone(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut prefix_paths: Vec<PathsEntry> = routed_entries
        .iter()
        .zip(linked.iter())
        .map(|(entry, linked)| PathsEntry {
            relative_path: linked.relative_path.clone(),
            path_type: entry.path_type,
            file_mode: match linked.method {
                LinkMethod::Patched(mode) => mode,
                _ => entry.file_mode,
            },
            prefix_placeholder: None,
            no_link: entry.no_link,
            sha256: Some(encode_hex(&linked.sha256)),
            size_in_bytes: Some(linked.file_size),
        })
        .collect();

    if is_noarch_python {
        let python_info = options
            .python_info
            .as_ref()
            .expect("checked for MissingPythonInfo above");

        let bin_dir = target_prefix.join(&python_info.bin_dir);
        std::fs::create_dir_all(&bin_dir)
            .map_err(InstallError::FailedToCreateTargetDirectory)?;

        let entry_points = noarch::read_entry_points(package_dir)
            .map_err(InstallError::FailedToCreateEntryPoint)?;

        for entry_point in &entry_points {
            let script_path = noarch::write_entry_point(
                entry_point,
                &bin_dir,
                python_info,
                target_prefix_str,
            )
            .map_err(InstallError::FailedToCreateEntryPoint)?;
            prefix_paths.push(generated_paths_entry(target_prefix, &script_path));

            if options.windows {
                let launcher_path =
                    entry_point::create_windows_launcher(package_dir, &bin_dir, &entry_point.command)
                        .map_err(InstallError::FailedToCreateWindowsLauncher)?;
                prefix_paths.push(generated_paths_entry(target_prefix, &launcher_path));
            }
        }

        let python_path = target_prefix.join(&python_info.path);
        let linked_files: Vec<PathBuf> =
            prefix_paths.iter().map(|e| e.relative_path.clone()).collect();
        match noarch::compile_missing_pyc(
            &python_path,
            target_prefix,
            &linked_files,
            python_info.short_version.0,
        ) {
            Ok(compiled) => {
                for path in compiled {
                    prefix_paths.push(PathsEntry {
                        relative_path: path,
                        path_type: PathType::HardLink,
                        file_mode: FileMode::Binary,
                        prefix_placeholder: None,
                        no_link: false,
                        sha256: None,
                        size_in_bytes: None,
                    });
                }
            }
            Err(e) => tracing::warn!("failed to byte-compile {}: {e}", package_record.name),
        }
    }

    let link_type = if allow_hard_links {
        LinkType::HardLink
    } else if allow_symbolic_links {
        LinkType::SoftLink
    } else {
        LinkType::Copy
    };
    let link = Some(Link {
        source: package_dir.to_path_buf(),
        link_type: Some(link_type),
    });

    Ok(PrefixRecord::from_repodata_record(
        package_record,
        url,
        prefix_paths,
        link,
        requested_spec,
    ))
}

fn generated_paths_entry(target_prefix: &Path, path: &Path) -> PathsEntry {
    let relative_path = path
        .strip_prefix(target_prefix)
        .unwrap_or(path)
        .to_path_buf();
    PathsEntry {
        relative_path,
        path_type: PathType::HardLink,
        file_mode: FileMode::Text,
        prefix_placeholder: None,
        no_link: false,
        sha256: None,
        size_in_bytes: None,
    }
}

#[cfg(unix)]
fn can_create_symlinks(target_dir: &Path) -> bool {
    let probe = target_dir.join(format!("symtest_{}", uuid::Uuid::new_v4()));
    match std::os::unix::fs::symlink("./", &probe) {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            tracing::debug!("symlinks unsupported in {}: {e}", target_dir.display());
            false
        }
    }
}

#[cfg(windows)]
fn can_create_symlinks(target_dir: &Path) -> bool {
    let probe = target_dir.join(format!("symtest_{}", uuid::Uuid::new_v4()));
    match std::os::windows::fs::symlink_file("./", &probe) {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(e) => {
            tracing::debug!("symlinks unsupported in {}: {e}", target_dir.display());
            false
        }
    }
}

#[cfg(unix)]
fn paths_have_same_filesystem(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn paths_have_same_filesystem(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a.components().next() == b.components().next(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envcore_types::paths::{FileMode, PathType};
    use envcore_types::NoArchType;
    use std::collections::BTreeSet;
    use std::fs;

    fn sample_package_record(name: &str, noarch: NoArchType) -> PackageRecord {
        PackageRecord {
            name: name.into(),
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
            noarch,
            features: BTreeSet::new(),
            track_features: BTreeSet::new(),
            preferred_env: None,
        }
    }

    fn write_paths_json(package_dir: &Path, paths: &[(&str, PathType)]) {
        fs::create_dir_all(package_dir.join("info")).unwrap();
        let entries: Vec<_> = paths
            .iter()
            .map(|(relative_path, path_type)| PathsEntry {
                relative_path: PathBuf::from(relative_path),
                path_type: *path_type,
                file_mode: FileMode::Binary,
                prefix_placeholder: None,
                no_link: false,
                sha256: None,
                size_in_bytes: None,
            })
            .collect();
        let paths_json = PathsJson {
            paths_version: 1,
            paths: entries,
        };
        fs::write(
            package_dir.join("info/paths.json"),
            serde_json::to_string(&paths_json).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn installs_plain_package_and_produces_prefix_record() {
        let package_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_paths_json(package_dir.path(), &[("bin/tool", PathType::HardLink)]);
        fs::create_dir_all(package_dir.path().join("bin")).unwrap();
        fs::write(package_dir.path().join("bin/tool"), b"#!/bin/sh\necho hi\n").unwrap();

        let record = sample_package_record("mytool", NoArchType::none());
        let options = InstallOptions {
            allow_symbolic_links: Some(false),
            allow_hard_links: Some(false),
            ..Default::default()
        };
        let prefix_record = install_package(
            package_dir.path(),
            prefix.path(),
            record,
            Some("https://example.com/mytool-1.0.0-0.tar.bz2".into()),
            None,
            &options,
        )
        .unwrap();

        assert!(prefix.path().join("bin/tool").exists());
        assert_eq!(prefix_record.paths_data.paths.len(), 1);
        assert!(prefix_record.paths_data.paths[0].sha256.is_some());
    }

    #[test]
    fn noarch_python_without_python_info_is_rejected() {
        let package_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_paths_json(package_dir.path(), &[]);

        let record = sample_package_record("mypkg", NoArchType::python());
        let result = install_package(
            package_dir.path(),
            prefix.path(),
            record,
            None,
            None,
            &InstallOptions::default(),
        );
        assert!(matches!(result, Err(InstallError::MissingPythonInfo)));
    }

    #[test]
    fn noarch_python_entry_point_is_routed_and_executable() {
        let package_dir = tempfile::tempdir().unwrap();
        let prefix = tempfile::tempdir().unwrap();
        write_paths_json(package_dir.path(), &[]);
        fs::create_dir_all(package_dir.path().join("info")).unwrap();
        fs::write(
            package_dir.path().join("info/noarch.json"),
            r#"{"entry_points": ["mytool = mypkg.cli:main"]}"#,
        )
        .unwrap();

        let python_info = PythonInfo::from_version("3.11.4", false).unwrap();
        let record = sample_package_record("mypkg", NoArchType::python());
        let options = InstallOptions {
            allow_symbolic_links: Some(false),
            allow_hard_links: Some(false),
            python_info: Some(python_info),
            windows: false,
        };
        let prefix_record =
            install_package(package_dir.path(), prefix.path(), record, None, None, &options)
                .unwrap();

        let entry_script = prefix.path().join("bin/mytool");
        assert!(entry_script.exists());
        let relative_paths: Vec<_> = prefix_record
            .paths_data
            .paths
            .iter()
            .map(|p| p.relative_path.clone())
            .collect();
        assert!(relative_paths.contains(&PathBuf::from("bin/mytool")));
    }
}
