//! `info/paths.json` (V1) and its V0 fallback reconstruction from
//! `info/files` + `info/has_prefix`.
//!
//! Grounded on `rattler_conda_types::package::paths::PathsJson` for the V1
//! shape and `from_deprecated` reconstruction, and on
//! `rattler_conda_types::package::has_prefix::HasPrefixEntry`'s nom parser
//! for the `info/has_prefix` line grammar.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till1},
    character::complete::multispace1,
    combinator::{all_consuming, map, value},
    sequence::{preceded, terminated, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The canonical placeholder prefix embedded in prerecorded files, per the
/// design note resolving the source's two conflicting `PREFIX_PLACEHOLDER`
/// definitions in favor of the imported constant.
pub const PREFIX_PLACEHOLDER: &str = "/opt/anaconda1anaconda2anaconda3";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileMode {
    Binary,
    Text,
}

impl Default for FileMode {
    fn default() -> Self {
        FileMode::Binary
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    HardLink,
    SoftLink,
    Directory,
}

fn no_link_default() -> bool {
    false
}

fn is_no_link_default(value: &bool) -> bool {
    *value == no_link_default()
}

/// One file (or directory) a package installs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathsEntry {
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,
    pub path_type: PathType,
    #[serde(default, skip_serializing_if = "FileMode::is_binary")]
    pub file_mode: FileMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,
    #[serde(default = "no_link_default", skip_serializing_if = "is_no_link_default")]
    pub no_link: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

impl FileMode {
    pub fn is_binary(&self) -> bool {
        matches!(self, FileMode::Binary)
    }
}

/// `info/paths.json`: the manifest of every file a package installs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsJson {
    pub paths_version: usize,
    pub paths: Vec<PathsEntry>,
}

impl FromStr for PathsJson {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl PathsJson {
    pub fn from_package_directory(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path.join("info/paths.json"))?;
        PathsJson::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Reads `info/paths.json` if present, else reconstructs a V0 manifest
    /// from `info/files` and `info/has_prefix`.
    pub fn from_package_directory_with_deprecated_fallback(path: &Path) -> std::io::Result<Self> {
        match Self::from_package_directory(path) {
            Ok(paths) => Ok(paths),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::from_deprecated_package_directory(path)
            }
            Err(e) => Err(e),
        }
    }

    /// Reconstructs a V0 manifest from an extracted package directory's
    /// `info/files` and `info/has_prefix`, classifying each path's
    /// [`PathType`] by inspecting the filesystem.
    pub fn from_deprecated_package_directory(path: &Path) -> std::io::Result<Self> {
        let files_raw = std::fs::read_to_string(path.join("info/files"))?;
        let has_prefix = match std::fs::read_to_string(path.join("info/has_prefix")) {
            Ok(raw) => parse_has_prefix(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let has_prefix: HashMap<PathBuf, HasPrefixEntry> = has_prefix
            .into_iter()
            .map(|entry| (entry.relative_path.clone(), entry))
            .collect();

        let paths = files_raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| {
                let relative_path = PathBuf::from(line.trim());
                let full_path = path.join(&relative_path);
                let metadata = full_path.symlink_metadata()?;
                let path_type = if metadata.is_symlink() {
                    PathType::SoftLink
                } else if metadata.is_dir() {
                    PathType::Directory
                } else {
                    PathType::HardLink
                };
                let prefix = has_prefix.get(&relative_path);
                Ok(PathsEntry {
                    path_type,
                    file_mode: prefix.map(|e| e.file_mode).unwrap_or(FileMode::Text),
                    prefix_placeholder: prefix.map(|e| e.prefix.clone()),
                    no_link: false,
                    sha256: None,
                    size_in_bytes: None,
                    relative_path,
                })
            })
            .collect::<std::io::Result<_>>()?;

        Ok(PathsJson {
            paths_version: 0,
            paths,
        })
    }
}

/// One line of `info/has_prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasPrefixEntry {
    pub prefix: String,
    pub file_mode: FileMode,
    pub relative_path: PathBuf,
}

fn parse_has_prefix(raw: &str) -> std::io::Result<Vec<HasPrefixEntry>> {
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(has_prefix_entry)
        .collect()
}

fn has_prefix_entry(line: &str) -> std::io::Result<HasPrefixEntry> {
    alt((prefix_file_mode_path, only_path))(line)
        .map(|(_, entry)| entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

fn prefix_file_mode_path(buf: &str) -> IResult<&str, HasPrefixEntry> {
    all_consuming(map(
        tuple((
            possibly_quoted_string,
            multispace1,
            file_mode,
            multispace1,
            possibly_quoted_string,
        )),
        |(prefix, _, file_mode, _, path)| HasPrefixEntry {
            prefix,
            file_mode,
            relative_path: PathBuf::from(path),
        },
    ))(buf)
}

fn only_path(buf: &str) -> IResult<&str, HasPrefixEntry> {
    all_consuming(map(possibly_quoted_string, |path| HasPrefixEntry {
        prefix: PREFIX_PLACEHOLDER.to_string(),
        file_mode: FileMode::Text,
        relative_path: PathBuf::from(path),
    }))(buf)
}

fn file_mode(buf: &str) -> IResult<&str, FileMode> {
    alt((
        value(FileMode::Text, tag_no_case("text")),
        value(FileMode::Binary, tag_no_case("binary")),
    ))(buf)
}

fn possibly_quoted_string(buf: &str) -> IResult<&str, String> {
    alt((quoted_string, map(take_till1(|c: char| c.is_whitespace()), String::from)))(buf)
}

fn quoted_string(buf: &str) -> IResult<&str, String> {
    let qs = preceded(tag("\""), in_quotes);
    terminated(qs, tag("\""))(buf)
}

fn in_quotes(buf: &str) -> IResult<&str, String> {
    let mut ret = String::new();
    let mut skip_delimiter = false;
    for (i, ch) in buf.char_indices() {
        if ch == '\\' && !skip_delimiter {
            skip_delimiter = true;
        } else if ch == '"' && !skip_delimiter {
            return Ok((&buf[i..], ret));
        } else {
            ret.push(ch);
            skip_delimiter = false;
        }
    }
    Err(nom::Err::Incomplete(nom::Needed::Unknown))
}

/// `info/files`: one relative path per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Files {
    pub files: HashSet<PathBuf>,
}

impl FromStr for Files {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Files {
            files: s
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| PathBuf::from(l.trim()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_prefix_plain_path_uses_canonical_placeholder() {
        let entries = parse_has_prefix("lib/pkgconfig/zlib.pc").unwrap();
        assert_eq!(
            entries[0],
            HasPrefixEntry {
                prefix: PREFIX_PLACEHOLDER.to_string(),
                file_mode: FileMode::Text,
                relative_path: PathBuf::from("lib/pkgconfig/zlib.pc"),
            }
        );
    }

    #[test]
    fn has_prefix_with_mode_and_path() {
        let entries =
            parse_has_prefix("/opt/anaconda1anaconda2anaconda3 binary bin/foo").unwrap();
        assert_eq!(entries[0].file_mode, FileMode::Binary);
        assert_eq!(entries[0].relative_path, PathBuf::from("bin/foo"));
    }

    #[test]
    fn has_prefix_with_quoted_path() {
        let entries = parse_has_prefix(
            "\"/opt/anaconda1 anaconda2anaconda3\" binary \"lib/pkg config/zlib.pc\"",
        )
        .unwrap();
        assert_eq!(entries[0].prefix, "/opt/anaconda1 anaconda2anaconda3");
        assert_eq!(
            entries[0].relative_path,
            PathBuf::from("lib/pkg config/zlib.pc")
        );
    }

    #[test]
    fn paths_json_round_trips_through_json() {
        let json = r#"{"paths_version": 1, "paths": [
            {"_path": "bin/foo", "path_type": "hardlink"}
        ]}"#;
        let parsed = PathsJson::from_str(json).unwrap();
        assert_eq!(parsed.paths.len(), 1);
        assert_eq!(parsed.paths[0].path_type, PathType::HardLink);
    }
}
