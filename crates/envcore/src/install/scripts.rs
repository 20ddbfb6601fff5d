//! Running a package's pre-unlink and post-link scripts.
//!
//! Grounded on `rattler::install::link_script`, with two differences: this
//! runs scripts directly via `std::process::Command` instead of through
//! `rattler_shell::run_in_environment` (shell activation is explicitly out
//! of scope here), and it restores the `ROOT_PREFIX` environment variable
//! that the original Python implementation's `run_script` sets alongside
//! `PREFIX` but that the teacher's port drops.

use envcore_types::PackageRecord;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum LinkScriptError {
    #[error("{0}")]
    Io(String, #[source] std::io::Error),
}

pub enum LinkScriptType {
    /// Runs before the package is unlinked.
    PreUnlink,
    /// Runs after the package is linked.
    PostLink,
}

impl LinkScriptType {
    /// The path (relative to the prefix) the script is looked for at, per
    /// the platform's script-directory convention.
    pub fn get_path(&self, package_record: &PackageRecord, windows: bool) -> String {
        let name = &package_record.name;
        if windows {
            match self {
                LinkScriptType::PreUnlink => format!("Scripts/.{name}-pre-unlink.bat"),
                LinkScriptType::PostLink => format!("Scripts/.{name}-post-link.bat"),
            }
        } else {
            match self {
                LinkScriptType::PreUnlink => format!("bin/.{name}-pre-unlink.sh"),
                LinkScriptType::PostLink => format!("bin/.{name}-post-link.sh"),
            }
        }
    }
}

impl fmt::Display for LinkScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkScriptType::PreUnlink => write!(f, "pre-unlink"),
            LinkScriptType::PostLink => write!(f, "post-link"),
        }
    }
}

/// Records the outcome of running pre/post link scripts for a batch of
/// packages.
#[derive(Debug, Clone, Default)]
pub struct PrePostLinkResult {
    pub messages: HashMap<String, String>,
    pub failed_packages: Vec<String>,
}

/// Runs `link_script_type` for every package in `prefix_records` that has
/// one, in the given order (the caller is responsible for topologically
/// sorting `prefix_records` by dependency if that matters).
pub fn run_link_scripts<'a>(
    link_script_type: LinkScriptType,
    prefix_records: impl Iterator<Item = &'a PackageRecord>,
    target_prefix: &Path,
    root_prefix: &Path,
    windows: bool,
) -> Result<PrePostLinkResult, LinkScriptError> {
    let mut result = PrePostLinkResult::default();

    for package_record in prefix_records {
        let link_file = target_prefix.join(link_script_type.get_path(package_record, windows));
        if !link_file.exists() {
            continue;
        }

        let mut env: HashMap<String, String> = HashMap::new();
        env.insert("PREFIX".into(), target_prefix.to_string_lossy().into_owned());
        env.insert("ROOT_PREFIX".into(), root_prefix.to_string_lossy().into_owned());
        env.insert("PKG_NAME".into(), package_record.name.clone());
        env.insert("PKG_VERSION".into(), package_record.version.to_string());
        env.insert("PKG_BUILDNUM".into(), package_record.build_number.to_string());

        tracing::info!(
            "running {link_script_type} script for {}",
            package_record.name
        );

        let mut command = if windows {
            let mut c = Command::new("cmd.exe");
            c.arg("/d").arg("/c").arg(&link_file);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg(&link_file);
            c
        };
        command.current_dir(target_prefix).envs(&env);

        match command.output() {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                result.failed_packages.push(package_record.name.clone());
                tracing::warn!("{link_script_type} script for {} failed: {:?}", package_record.name, output.status);
                tracing::warn!("  stdout: {}", String::from_utf8_lossy(&output.stdout));
                tracing::warn!("  stderr: {}", String::from_utf8_lossy(&output.stderr));
            }
            Err(e) => {
                result.failed_packages.push(package_record.name.clone());
                tracing::error!("failed to run {link_script_type} script for {}: {e}", package_record.name);
            }
        }

        let message_file = target_prefix.join(".messages.txt");
        if message_file.exists() {
            let message = std::fs::read_to_string(&message_file)
                .map_err(|e| LinkScriptError::Io(format!("reading {}", message_file.display()), e))?;
            result.messages.insert(package_record.name.clone(), message);
            std::fs::remove_file(&message_file)
                .map_err(|e| LinkScriptError::Io(format!("removing {}", message_file.display()), e))?;
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use envcore_types::NoArchType;
    use std::collections::BTreeSet;

    fn sample_record(name: &str) -> PackageRecord {
        PackageRecord {
            name: name.into(),
            version: "1.0.0".parse().unwrap(),
            build: "0".into(),
            build_number: 0,
            channel: None,
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
        }
    }

    #[test]
    fn unix_path_uses_bin_dotted_name() {
        let record = sample_record("numpy");
        assert_eq!(
            LinkScriptType::PostLink.get_path(&record, false),
            "bin/.numpy-post-link.sh"
        );
    }

    #[test]
    fn windows_path_uses_scripts_dotted_name() {
        let record = sample_record("numpy");
        assert_eq!(
            LinkScriptType::PreUnlink.get_path(&record, true),
            "Scripts/.numpy-pre-unlink.bat"
        );
    }

    #[cfg(unix)]
    #[test]
    fn missing_script_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record("numpy");
        let result = run_link_scripts(
            LinkScriptType::PostLink,
            std::iter::once(&record),
            dir.path(),
            dir.path(),
            false,
        )
        .unwrap();
        assert!(result.failed_packages.is_empty());
        assert!(result.messages.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn script_runs_with_prefix_env_vars_and_writes_message() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        let record = sample_record("numpy");
        let script_path = dir.path().join("bin/.numpy-post-link.sh");
        fs::write(
            &script_path,
            format!(
                "#!/bin/sh\necho \"prefix=$PREFIX root=$ROOT_PREFIX pkg=$PKG_NAME\" > {}/.messages.txt\n",
                dir.path().display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755)).unwrap();

        let result = run_link_scripts(
            LinkScriptType::PostLink,
            std::iter::once(&record),
            dir.path(),
            dir.path(),
            false,
        )
        .unwrap();

        assert!(result.failed_packages.is_empty());
        let message = result.messages.get("numpy").unwrap();
        assert!(message.contains("pkg=numpy"));
        assert!(message.contains(&dir.path().display().to_string()));
    }
}
