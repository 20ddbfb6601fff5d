//! Materializing the Windows half of a noarch entry point: `<cmd>.exe`,
//! hardlinked (falling back to a copy) from the launcher the package
//! archive itself ships alongside `info/`.
//!
//! The teacher (`rattler::install::entry_point`) embeds a prebuilt
//! trampoline via `include_bytes!`, which isn't available here — that
//! resource file was never part of this workspace, and fabricating a
//! binary asset to stand in for it isn't an option. Grounded instead on
//! `original_source/conda/noarch.py`'s `create_entry_points`, which takes
//! the launcher from the package being installed
//! (`cli-32.exe`/`cli-64.exe` in the archive root) rather than embedding
//! one in the tool's own binary.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EntryPointError {
    #[error("package does not provide a {0} launcher for this architecture")]
    MissingLauncher(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `cli-32.exe` or `cli-64.exe`, matching the pointer width of the running
/// process (which is what a package's own `info/` expects to be asked
/// for, since this is resolved at install time, not at package-build
/// time).
fn launcher_file_name() -> &'static str {
    if cfg!(target_pointer_width = "64") {
        "cli-64.exe"
    } else {
        "cli-32.exe"
    }
}

/// Hardlinks (falling back to a copy) the package-supplied console
/// launcher to `<command>.exe` in `bin_dir`. Call this once per entry
/// point alongside [`crate::install::noarch::write_entry_point`], which
/// writes the accompanying `<command>-script.py`.
pub fn create_windows_launcher(
    package_dir: &Path,
    bin_dir: &Path,
    command: &str,
) -> Result<PathBuf, EntryPointError> {
    let launcher_name = launcher_file_name();
    let source = package_dir.join(launcher_name);
    if !source.exists() {
        return Err(EntryPointError::MissingLauncher(launcher_name.to_string()));
    }

    let destination = bin_dir.join(format!("{command}.exe"));
    match std::fs::hard_link(&source, &destination) {
        Ok(()) => {}
        Err(_) => {
            std::fs::copy(&source, &destination)?;
        }
    }
    Ok(destination)
}
