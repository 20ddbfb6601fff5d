//! Noarch-python package placement: routing `site-packages`/`python-scripts`
//! files to the installed Python's actual directories, compiling missing
//! `.pyc` files, and materializing declared entry points.
//!
//! Grounded primarily on `original_source/conda/noarch.py`
//! (`NoArchPython.link`, `compile_missing_pyc`, `create_entry_points`), with
//! the path-routing and shebang-length logic cross-checked against
//! `rattler::install::python::PythonInfo`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct PythonInfo {
    pub short_version: (u64, u64),
    pub path: PathBuf,
    pub site_packages_path: PathBuf,
    pub bin_dir: PathBuf,
    pub windows: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PythonInfoError {
    #[error("invalid python version '{0}'")]
    InvalidVersion(String),
}

impl PythonInfo {
    /// Parses `major.minor` out of a python package's version string.
    pub fn from_version(version: &str, windows: bool) -> Result<Self, PythonInfoError> {
        let mut parts = version.split('.');
        let major = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PythonInfoError::InvalidVersion(version.to_string()))?;
        let minor = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PythonInfoError::InvalidVersion(version.to_string()))?;

        let path = if windows {
            PathBuf::from("python.exe")
        } else {
            PathBuf::from(format!("bin/python{major}.{minor}"))
        };
        let site_packages_path = if windows {
            PathBuf::from("Lib/site-packages")
        } else {
            PathBuf::from(format!("lib/python{major}.{minor}/site-packages"))
        };
        let bin_dir = if windows {
            PathBuf::from("Scripts")
        } else {
            PathBuf::from("bin")
        };

        Ok(PythonInfo {
            short_version: (major, minor),
            path,
            site_packages_path,
            bin_dir,
            windows,
        })
    }

    /// Constructs the shebang line a generated entry-point script should
    /// use to invoke this Python, given the prefix it's installed in.
    pub fn shebang(&self, target_prefix: &str) -> String {
        let target_path = Path::new(target_prefix).join(&self.path);
        let target_path = target_path.as_os_str().to_string_lossy().replace('\\', "/");
        format!("#!{target_path}")
    }

    /// Reroutes a file's package-relative path (e.g. `site-packages/foo.py`
    /// or `python-scripts/foo`) to where it actually lives once installed.
    /// A path under neither prefix is returned unchanged.
    pub fn target_path<'a>(&self, relative_path: &'a Path) -> std::borrow::Cow<'a, Path> {
        if let Ok(rest) = relative_path.strip_prefix("site-packages") {
            self.site_packages_path.join(rest).into()
        } else if let Ok(rest) = relative_path.strip_prefix("python-scripts") {
            self.bin_dir.join(rest).into()
        } else {
            relative_path.into()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NoarchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("info/noarch.json entry point '{0}' is malformed, expected '<cmd> = <module>:<func>'")]
    MalformedEntryPoint(String),
}

/// One `<cmd> = <module>:<func>` line from `info/noarch.json`'s
/// `entry_points` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub command: String,
    pub module: String,
    pub func: String,
}

impl EntryPoint {
    pub fn parse(raw: &str) -> Result<Self, NoarchError> {
        let (command, rest) = raw
            .split_once('=')
            .ok_or_else(|| NoarchError::MalformedEntryPoint(raw.to_string()))?;
        let (module, func) = rest
            .split_once(':')
            .ok_or_else(|| NoarchError::MalformedEntryPoint(raw.to_string()))?;
        Ok(EntryPoint {
            command: command.trim().to_string(),
            module: module.trim().to_string(),
            func: func.trim().to_string(),
        })
    }
}

/// The `if __name__ == '__main__'` stub every generated entry-point script
/// shares, parameterized by the module and function it dispatches to.
fn entry_point_script(entry: &EntryPoint) -> String {
    format!(
        "if __name__ == '__main__':\n    import sys\n    import {module}\n\n    sys.exit({module}.{func}())\n",
        module = entry.module,
        func = entry.func,
    )
}

/// Writes the generated launcher for one entry point into `bin_dir`. On
/// Windows this is a `<cmd>-script.py` plus a copy of the package-supplied
/// `cli-<bits>.exe` (no trampoline is embedded in this tool itself —
/// see `entry_point.rs`); elsewhere it's a single executable shebang
/// script.
pub fn write_entry_point(
    entry: &EntryPoint,
    bin_dir: &Path,
    python_info: &PythonInfo,
    target_prefix: &str,
) -> Result<PathBuf, NoarchError> {
    let path = bin_dir.join(&entry.command);
    let script = entry_point_script(entry);

    if python_info.windows {
        let script_path = path.with_extension("py");
        let mut full_script_path = path.clone().into_os_string();
        full_script_path.push("-script.py");
        fs::write(&full_script_path, script)?;
        let _ = script_path;
        Ok(PathBuf::from(full_script_path))
    } else {
        let shebang = python_info.shebang(target_prefix);
        let contents = crate::install::link::normalize_long_shebang(
            format!("{shebang}\n{script}").as_bytes(),
        );
        fs::write(&path, contents)?;
        set_executable(&path)?;
        Ok(path)
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Compiles every `.py` file among `linked_files` that doesn't already
/// have a matching `.pyc` alongside it, by shelling out to the prefix's
/// Python with `-m py_compile`. Files under a bin/scripts directory are
/// skipped — they're launchers, not importable modules.
pub fn compile_missing_pyc(
    python_path: &Path,
    cwd: &Path,
    linked_files: &[PathBuf],
    python_major: u64,
) -> std::io::Result<Vec<PathBuf>> {
    let mut compiled = Vec::new();
    let existing: std::collections::HashSet<&Path> =
        linked_files.iter().map(PathBuf::as_path).collect();

    for file in linked_files {
        if is_bin_like(file) {
            continue;
        }
        if file.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }

        let pyc_path = expected_pyc_path(file, python_major);
        if existing.contains(pyc_path.as_path()) {
            continue;
        }

        let status = Command::new(python_path)
            .arg("-Wi")
            .arg("-m")
            .arg("py_compile")
            .arg(file)
            .current_dir(cwd)
            .status()?;
        if status.success() {
            compiled.push(file.clone());
        } else {
            tracing::warn!("failed to compile {} to .pyc", file.display());
        }
    }

    Ok(compiled)
}

fn is_bin_like(path: &Path) -> bool {
    let lowered = path.to_string_lossy().to_ascii_lowercase();
    lowered.starts_with("bin/")
        || lowered.starts_with("library/bin")
        || lowered.starts_with("library\\bin")
        || lowered.starts_with("scripts")
}

fn expected_pyc_path(py_file: &Path, python_major: u64) -> PathBuf {
    let file_name = py_file.file_name().map(|n| format!("{}c", n.to_string_lossy())).unwrap_or_default();
    let parent = py_file.parent().unwrap_or_else(|| Path::new(""));
    if python_major >= 3 {
        parent.join("__pycache__").join(file_name)
    } else {
        parent.join(file_name)
    }
}

/// Parses `info/noarch.json`'s `entry_points` array.
pub fn read_entry_points(package_dir: &Path) -> Result<Vec<EntryPoint>, NoarchError> {
    let path = package_dir.join("info/noarch.json");
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(&path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let entries = value
        .get("entry_points")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    entries
        .iter()
        .map(|v| v.as_str().ok_or_else(|| NoarchError::MalformedEntryPoint(v.to_string())))
        .map(|raw| raw.and_then(EntryPoint::parse))
        .collect()
}

impl From<serde_json::Error> for NoarchError {
    fn from(err: serde_json::Error) -> Self {
        NoarchError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }
}

/// For diagnostics/testing: a dry-run summary of how `files` (relative
/// paths from `info/files`) would be split between site-packages and bin.
pub fn classify_noarch_files(files: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut site_package_files = Vec::new();
    let mut bin_files = Vec::new();
    for f in files {
        let as_str = f.to_string_lossy();
        if let Some(idx) = as_str.find("site-packages") {
            site_package_files.push(PathBuf::from(&as_str[idx..]));
        } else if as_str.starts_with("bin/") {
            bin_files.push(PathBuf::from(as_str.trim_start_matches("bin/")));
        }
    }
    (site_package_files, bin_files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_minor_version() {
        let info = PythonInfo::from_version("3.11.4", false).unwrap();
        assert_eq!(info.short_version, (3, 11));
        assert_eq!(info.site_packages_path, PathBuf::from("lib/python3.11/site-packages"));
        assert_eq!(info.bin_dir, PathBuf::from("bin"));
    }

    #[test]
    fn windows_paths_use_scripts_and_lib() {
        let info = PythonInfo::from_version("3.11.4", true).unwrap();
        assert_eq!(info.bin_dir, PathBuf::from("Scripts"));
        assert_eq!(info.site_packages_path, PathBuf::from("Lib/site-packages"));
    }

    #[test]
    fn site_packages_route_is_rewritten() {
        let info = PythonInfo::from_version("3.11.4", false).unwrap();
        let target = info.target_path(Path::new("site-packages/foo/bar.py"));
        assert_eq!(target.as_ref(), Path::new("lib/python3.11/site-packages/foo/bar.py"));
    }

    #[test]
    fn python_scripts_route_to_bin_dir() {
        let info = PythonInfo::from_version("3.11.4", false).unwrap();
        let target = info.target_path(Path::new("python-scripts/mytool"));
        assert_eq!(target.as_ref(), Path::new("bin/mytool"));
    }

    #[test]
    fn parses_entry_point_line() {
        let entry = EntryPoint::parse("mytool = mypkg.cli:main").unwrap();
        assert_eq!(entry.command, "mytool");
        assert_eq!(entry.module, "mypkg.cli");
        assert_eq!(entry.func, "main");
    }

    #[test]
    fn rejects_malformed_entry_point() {
        assert!(EntryPoint::parse("no-equals-sign-here").is_err());
    }

    #[test]
    fn py3_expects_pycache_pyc() {
        let path = expected_pyc_path(Path::new("lib/python3.11/site-packages/foo.py"), 3);
        assert_eq!(
            path,
            PathBuf::from("lib/python3.11/site-packages/__pycache__/foo.pyc")
        );
    }

    #[test]
    fn bin_files_are_excluded_from_compilation() {
        assert!(is_bin_like(Path::new("bin/foo.py")));
        assert!(!is_bin_like(Path::new("lib/python3.11/site-packages/foo.py")));
    }

    #[test]
    fn unix_entry_point_script_is_executable_with_shebang() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        let python_info = PythonInfo::from_version("3.11.4", false).unwrap();
        let entry = EntryPoint::parse("mytool = mypkg.cli:main").unwrap();
        let path = write_entry_point(&entry, &dir.path().join("bin"), &python_info, "/opt/env").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("#!/opt/env/bin/python3.11\n"));
        assert!(contents.contains("import mypkg.cli"));
    }
}
