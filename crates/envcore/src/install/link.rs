//! Links a single file from an extracted package directory into a prefix.
//! See [`link_file`].
//!
//! Grounded on `rattler::install::link`, trimmed of the Apple-codesign and
//! noarch-python-routing logic (both out of scope here: code-signing isn't
//! named by the spec, and noarch routing is the caller's job, done before
//! `link_file` is ever called).

use envcore_types::paths::{FileMode, PathType, PathsEntry};
use memmap2::Mmap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LinkMethod {
    Hardlink,
    Softlink,
    Copy,
    Patched(FileMode),
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkMethod::Hardlink => write!(f, "hardlink"),
            LinkMethod::Softlink => write!(f, "softlink"),
            LinkMethod::Copy => write!(f, "copy"),
            LinkMethod::Patched(FileMode::Binary) => write!(f, "binary patched"),
            LinkMethod::Patched(FileMode::Text) => write!(f, "text patched"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkFileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to create parent directory")]
    FailedToCreateParentDirectory(#[source] std::io::Error),

    #[error("could not open source file for reading")]
    FailedToOpenSourceFile(#[source] std::io::Error),

    #[error("failed to read the source file")]
    FailedToReadSourceFile(#[source] std::io::Error),

    #[error("could not read symlink target")]
    FailedToReadSymlink(#[source] std::io::Error),

    #[error("failed to {0} file to destination")]
    FailedToLink(LinkMethod, #[source] std::io::Error),

    #[error("could not read source file metadata")]
    FailedToReadSourceFileMetadata(#[source] std::io::Error),

    #[error("could not open destination file for writing")]
    FailedToOpenDestinationFile(#[source] std::io::Error),

    #[error("could not update destination file permissions")]
    FailedToUpdateDestinationFilePermissions(#[source] std::io::Error),

    /// The new prefix is longer than the c-string slot the old placeholder
    /// occupied, so a NUL-padded in-place rewrite would truncate the path.
    #[error(
        "prefix '{target_prefix}' does not fit in the {available} bytes available for the \
         placeholder in this binary file; install to a shorter path"
    )]
    PaddingError {
        target_prefix: String,
        available: usize,
    },
}

/// The successful result of calling [`link_file`].
pub struct LinkedFile {
    pub clobbered: bool,
    pub sha256: [u8; 32],
    pub file_size: u64,
    pub relative_path: PathBuf,
    pub method: LinkMethod,
}

/// Installs a single file from `package_dir` into `target_dir`, replacing
/// any `prefix_placeholder` in the file with `target_prefix`.
///
/// `path_json_entry.relative_path` names the file in both `package_dir` and
/// `target_dir` — noarch site-packages/bin rerouting, if any, must already
/// be reflected in `target_dir` or baked into a rewritten entry before this
/// is called.
pub fn link_file(
    path_json_entry: &PathsEntry,
    package_dir: &Path,
    target_dir: &Path,
    target_prefix: &str,
    allow_symbolic_links: bool,
    allow_hard_links: bool,
) -> Result<LinkedFile, LinkFileError> {
    let source_path = package_dir.join(&path_json_entry.relative_path);
    let destination_path = target_dir.join(&path_json_entry.relative_path);

    if let Some(parent) = destination_path.parent() {
        std::fs::create_dir_all(parent).map_err(LinkFileError::FailedToCreateParentDirectory)?;
    }

    let clobbered = destination_path.is_file();

    let mut sha256 = None;
    let mut file_size = path_json_entry.size_in_bytes;

    let link_method = if let Some(placeholder) = path_json_entry.prefix_placeholder.as_ref() {
        let source = map_or_read_source_file(&source_path)?;

        // Forward slashes avoid mangling an escaped backslash sequence when
        // the replacement lands inside a quoted Windows path literal.
        let target_prefix_owned;
        let target_prefix = if cfg!(windows) {
            target_prefix_owned = target_prefix.replace('\\', "/");
            target_prefix_owned.as_str()
        } else {
            target_prefix
        };

        let mut buffer = Vec::with_capacity(source.as_ref().len());
        if cfg!(windows) && path_json_entry.file_mode == FileMode::Binary {
            // The cstring placeholder replace depends on POSIX rpath/interpreter
            // layouts that don't exist on Windows; only the pyzzer-launcher
            // shebang below applies there.
            buffer.extend_from_slice(source.as_ref());
        } else {
            copy_and_replace_placeholders(
                source.as_ref(),
                &mut buffer,
                placeholder,
                target_prefix,
                path_json_entry.file_mode,
            )?;
        }

        let buffer = match path_json_entry.file_mode {
            FileMode::Text => normalize_long_shebang(&buffer),
            FileMode::Binary => rewrite_pyzzer_shebang(&buffer, placeholder, target_prefix),
        };

        std::fs::write(&destination_path, &buffer)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?;

        sha256 = Some(Sha256::digest(&buffer).into());
        file_size = Some(buffer.len() as u64);

        let metadata = std::fs::symlink_metadata(&source_path)
            .map_err(LinkFileError::FailedToReadSourceFileMetadata)?;
        std::fs::set_permissions(&destination_path, metadata.permissions())
            .map_err(LinkFileError::FailedToUpdateDestinationFilePermissions)?;

        LinkMethod::Patched(path_json_entry.file_mode)
    } else if path_json_entry.path_type == PathType::HardLink && allow_hard_links {
        hardlink_to_destination(&source_path, &destination_path)?;
        LinkMethod::Hardlink
    } else if path_json_entry.path_type == PathType::SoftLink && allow_symbolic_links {
        symlink_to_destination(&source_path, &destination_path)?;
        LinkMethod::Softlink
    } else {
        copy_to_destination(&source_path, &destination_path)?;
        LinkMethod::Copy
    };

    let sha256 = if let Some(sha256) = sha256 {
        sha256
    } else if let Some(sha256_hex) = path_json_entry.sha256.as_ref() {
        parse_sha256_hex(sha256_hex).unwrap_or([0u8; 32])
    } else {
        compute_file_sha256(&destination_path)?
    };

    let file_size = if let Some(file_size) = file_size {
        file_size
    } else if let Some(size_in_bytes) = path_json_entry.size_in_bytes {
        size_in_bytes
    } else {
        let metadata = std::fs::symlink_metadata(&destination_path)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?;
        metadata.len()
    };

    Ok(LinkedFile {
        clobbered,
        sha256,
        file_size,
        relative_path: path_json_entry.relative_path.clone(),
        method: link_method,
    })
}

/// A shebang line longer than 127 bytes overflows the kernel's `#!` buffer
/// on most Unix systems, so the original implementation rewrites anything
/// over that length to `#!/usr/bin/env <basename> <options>` after a
/// prefix replacement has (potentially) lengthened it.
pub(crate) fn normalize_long_shebang(data: &[u8]) -> Vec<u8> {
    if !data.starts_with(b"#!") {
        return data.to_vec();
    }
    let line_end = data.iter().position(|&b| b == b'\n').unwrap_or(data.len());
    let whole_shebang = &data[..line_end];
    if whole_shebang.len() <= 127 {
        return data.to_vec();
    }

    let rest = &whole_shebang[2..];
    let (executable, options) = match rest.iter().position(|&b| b == b' ') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, &rest[rest.len()..]),
    };
    let executable_name = executable
        .rsplit(|&b| b == b'/')
        .next()
        .unwrap_or(executable);

    let mut new_shebang = Vec::with_capacity(whole_shebang.len());
    new_shebang.extend_from_slice(b"#!/usr/bin/env ");
    new_shebang.extend_from_slice(executable_name);
    new_shebang.extend_from_slice(options);

    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&new_shebang);
    out.extend_from_slice(&data[line_end..]);
    out
}

/// A "pyzzer" entry-point executable (as produced by `distlib`) is a
/// launcher binary, followed by a `#!`-prefixed shebang, followed by a zip
/// archive of the actual entry-point code; the archive's end-of-central-
/// directory record lets us find where the launcher ends and the archive
/// begins, so only the shebang segment between them is rewritten, leaving
/// the launcher and the archive untouched.
fn rewrite_pyzzer_shebang(data: &[u8], placeholder: &str, target_prefix: &str) -> Vec<u8> {
    let Some(eocd_pos) = rfind(data, b"PK\x05\x06") else {
        return data.to_vec();
    };
    if eocd_pos + 20 > data.len() {
        return data.to_vec();
    }
    let cdr_size = u32::from_le_bytes(data[eocd_pos + 12..eocd_pos + 16].try_into().unwrap());
    let cdr_offset = u32::from_le_bytes(data[eocd_pos + 16..eocd_pos + 20].try_into().unwrap());
    let arc_pos = eocd_pos as i64 - cdr_size as i64 - cdr_offset as i64;
    if arc_pos <= 0 || arc_pos as usize > data.len() {
        return data.to_vec();
    }
    let arc_pos = arc_pos as usize;

    let Some(shebang_pos) = rfind(&data[..arc_pos], b"#!") else {
        return data.to_vec();
    };
    if shebang_pos == 0 {
        return data.to_vec();
    }

    let launcher = &data[..shebang_pos];
    let shebang = &data[shebang_pos..arc_pos];
    let archive = &data[arc_pos..];

    let rewritten_shebang = replace_all(shebang, placeholder.as_bytes(), target_prefix.as_bytes());

    let mut out = Vec::with_capacity(launcher.len() + rewritten_shebang.len() + archive.len());
    out.extend_from_slice(launcher);
    out.extend_from_slice(&rewritten_shebang);
    out.extend_from_slice(archive);
    out
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn replace_all(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(idx) = memchr::memmem::find(rest, from) {
        out.extend_from_slice(&rest[..idx]);
        out.extend_from_slice(to);
        rest = &rest[idx + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}

fn parse_sha256_hex(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

fn compute_file_sha256(path: &Path) -> Result<[u8; 32], LinkFileError> {
    let mut file = std::fs::File::open(path).map_err(LinkFileError::FailedToOpenDestinationFile)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(LinkFileError::FailedToOpenDestinationFile)?;
    Ok(hasher.finalize().into())
}

enum MmapOrBytes {
    Mmap(Mmap),
    Bytes(Vec<u8>),
}

impl AsRef<[u8]> for MmapOrBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            MmapOrBytes::Mmap(mmap) => mmap.as_ref(),
            MmapOrBytes::Bytes(bytes) => bytes.as_slice(),
        }
    }
}

/// Memory maps the source file, falling back to a full read if mapping
/// fails (observed to happen on some overlay filesystems).
fn map_or_read_source_file(source_path: &Path) -> Result<MmapOrBytes, LinkFileError> {
    let mut file =
        std::fs::File::open(source_path).map_err(LinkFileError::FailedToOpenSourceFile)?;

    let mmap = unsafe { Mmap::map(&file) };

    Ok(match mmap {
        Ok(memory) => MmapOrBytes::Mmap(memory),
        Err(err) => {
            tracing::warn!(
                "failed to memory map {}: {err}. Reading the file to memory instead.",
                source_path.display()
            );
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)
                .map_err(LinkFileError::FailedToReadSourceFile)?;
            MmapOrBytes::Bytes(bytes)
        }
    })
}

fn hardlink_to_destination(
    source_path: &Path,
    destination_path: &Path,
) -> Result<(), LinkFileError> {
    loop {
        match std::fs::hard_link(source_path, destination_path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                std::fs::remove_file(destination_path)?;
            }
            Err(e) => return Err(LinkFileError::FailedToLink(LinkMethod::Hardlink, e)),
        }
    }
}

fn symlink_to_destination(
    source_path: &Path,
    destination_path: &Path,
) -> Result<(), LinkFileError> {
    let linked_path = source_path
        .read_link()
        .map_err(LinkFileError::FailedToReadSymlink)?;

    loop {
        match symlink(&linked_path, destination_path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                std::fs::remove_file(destination_path)?;
            }
            Err(e) => return Err(LinkFileError::FailedToLink(LinkMethod::Softlink, e)),
        }
    }
}

fn copy_to_destination(source_path: &Path, destination_path: &Path) -> Result<(), LinkFileError> {
    loop {
        match std::fs::copy(source_path, destination_path) {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                std::fs::remove_file(destination_path)?;
            }
            Ok(_) => return Ok(()),
            Err(e) => return Err(LinkFileError::FailedToLink(LinkMethod::Copy, e)),
        }
    }
}

/// Copies `source_bytes` to `destination`, replacing `prefix_placeholder`
/// with `target_prefix`, dispatching on `file_mode` to either the textual
/// or the NUL-padded binary replacement strategy.
pub fn copy_and_replace_placeholders(
    source_bytes: &[u8],
    destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
    file_mode: FileMode,
) -> Result<(), LinkFileError> {
    match file_mode {
        FileMode::Text => {
            copy_and_replace_textual_placeholder(
                source_bytes,
                destination,
                prefix_placeholder,
                target_prefix,
            )?;
        }
        FileMode::Binary => {
            copy_and_replace_cstring_placeholder(
                source_bytes,
                destination,
                prefix_placeholder,
                target_prefix,
            )?;
        }
    }
    Ok(())
}

/// Find-and-replace over the full string; safe for text files where the
/// length of the result does not need to match the input.
pub fn copy_and_replace_textual_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let old_prefix = prefix_placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    loop {
        if let Some(index) = memchr::memmem::find(source_bytes, old_prefix) {
            destination.write_all(&source_bytes[..index])?;
            destination.write_all(new_prefix)?;
            source_bytes = &source_bytes[index + old_prefix.len()..];
        } else {
            destination.write_all(source_bytes)?;
            return Ok(());
        }
    }
}

/// Replaces each binary c-string containing `prefix_placeholder` with one
/// where the placeholder is replaced by `target_prefix`, NUL-padded so the
/// total length of the file is unchanged.
///
/// Unlike a textual replace, a binary c-string's length is load-bearing —
/// code elsewhere may have recorded pointers or fixed-width table entries
/// keyed to it. If `target_prefix` does not fit in the bytes available
/// (old placeholder length plus whatever suffix followed it, up to the NUL
/// terminator), this returns [`LinkFileError::PaddingError`] instead of
/// silently truncating the path, which the original implementation did.
pub fn copy_and_replace_cstring_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), LinkFileError> {
    let old_prefix = prefix_placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    loop {
        if let Some(index) = memchr::memmem::find(source_bytes, old_prefix) {
            let mut end = index + old_prefix.len();
            while end < source_bytes.len() && source_bytes[end] != b'\0' {
                end += 1;
            }

            let len = end - index;
            let suffix = &source_bytes[index + old_prefix.len()..end];

            if new_prefix.len() + suffix.len() > len {
                return Err(LinkFileError::PaddingError {
                    target_prefix: target_prefix.to_string(),
                    available: len,
                });
            }

            let padding = vec![b'\0'; len - new_prefix.len() - suffix.len()];

            destination.write_all(&source_bytes[..index])?;
            destination.write_all(new_prefix)?;
            destination.write_all(suffix)?;
            destination.write_all(&padding)?;

            source_bytes = &source_bytes[end..];
        } else {
            destination.write_all(source_bytes)?;
            return Ok(());
        }
    }
}

fn symlink(source_path: &Path, destination_path: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    return std::os::windows::fs::symlink_file(source_path, destination_path);
    #[cfg(unix)]
    return std::os::unix::fs::symlink(source_path, destination_path);
}
