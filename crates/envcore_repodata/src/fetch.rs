//! `fetch_repodata` and `collect_repodatas`: conditional-GET retrieval of a
//! channel's repodata with a persistent on-disk cache.
//!
//! Grounded on `conda.core.index.fetch_repodata`/`_collect_repodatas*`.

use crate::cache::{self, cache_path};
use crate::error::RepodataError;
use rayon::{ThreadPoolBuildError, ThreadPoolBuilder};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Knobs the fetcher needs; analogous to the subset of `Config` the core
/// consumes (see [`envcore::config::Config`] upstream).
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub repodata_timeout_secs: u64,
    pub remote_connect_timeout_secs: u64,
    pub remote_read_timeout_secs: u64,
    pub ssl_verify: bool,
    pub concurrent: bool,
    pub channel_alias: Option<String>,
    pub offline: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            repodata_timeout_secs: 600,
            remote_connect_timeout_secs: 9,
            remote_read_timeout_secs: 60,
            ssl_verify: true,
            concurrent: true,
            channel_alias: None,
            offline: false,
        }
    }
}

/// A URL is kept (fetched/considered) unless we're offline and it is not a
/// local `file://` override.
pub fn offline_keep(url: &Url, offline: bool) -> bool {
    !offline || url.scheme() == "file"
}

fn join_filename(url: &Url, filename: &str) -> Result<Url, url::ParseError> {
    let mut joined = url.clone();
    {
        let mut segments = joined
            .path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
        segments.pop_if_empty();
        segments.push(filename);
    }
    Ok(joined)
}

fn decode_body(filename: &str, bytes: &[u8]) -> Result<String, std::io::Error> {
    if filename.ends_with(".bz2") {
        let mut decoder = bzip2::read::BzDecoder::new(bytes);
        let mut out = String::new();
        decoder.read_to_string(&mut out)?;
        Ok(out)
    } else {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

/// Fetches (or returns the cached copy of) the repodata at `url`.
///
/// Returns `Ok(None)` when the subdir legitimately doesn't exist (404/403 on
/// a `noarch/` path), or when `url` is dropped by [`offline_keep`].
pub fn fetch_repodata(
    client: &reqwest::blocking::Client,
    url: &Url,
    cache_dir: &Path,
    use_cache: bool,
    options: &FetchOptions,
) -> Result<Option<Value>, RepodataError> {
    if !offline_keep(url, options.offline) {
        return Ok(Some(cache::empty_cache()));
    }

    let path = cache_path(cache_dir, url.as_str());

    if let Some(age) = cache::cache_age_secs(&path) {
        if age < options.repodata_timeout_secs {
            tracing::debug!(url = %url, "repodata cache is fresh, skipping fetch");
            return Ok(Some(cache::read_cache(&path)));
        }
    }

    let mut cached = cache::read_cache(&path);

    if use_cache {
        return Ok(Some(cached));
    }

    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(etag) = cache::etag(&cached) {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(etag) {
            headers.insert(reqwest::header::IF_NONE_MATCH, value);
        }
    }
    if let Some(last_modified) = cache::last_modified(&cached) {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(last_modified) {
            headers.insert(reqwest::header::IF_MODIFIED_SINCE, value);
        }
    }

    let is_bz2_origin = url.host_str() == Some("repo.continuum.io")
        || url.host_str() == Some("repo.anaconda.com")
        || url.scheme() == "file";
    let filename = if is_bz2_origin {
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            reqwest::header::HeaderValue::from_static("identity"),
        );
        "repodata.json.bz2"
    } else {
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            reqwest::header::HeaderValue::from_static("gzip, deflate, compress, identity"),
        );
        "repodata.json"
    };

    let request_url = join_filename(url, filename).map_err(|e| RepodataError::InvalidIndex {
        url: url.to_string(),
        cause: e.to_string(),
    })?;

    let response = client
        .get(request_url.clone())
        .headers(headers)
        .timeout(Duration::from_secs(options.remote_read_timeout_secs))
        .send()
        .map_err(|source| RepodataError::Transport {
            url: request_url.to_string(),
            source,
        })?;

    let status = response.status();

    if status.as_u16() == 304 {
        cache::touch(&path).map_err(|source| RepodataError::Cache {
            path: path.clone(),
            source,
        })?;
        return Ok(Some(cached));
    }

    if status.is_success() {
        let etag_header = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified_header = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .map_err(|source| RepodataError::Transport {
                url: request_url.to_string(),
                source,
            })?;
        let json_str = decode_body(filename, &bytes).map_err(|e| RepodataError::InvalidIndex {
            url: url.to_string(),
            cause: e.to_string(),
        })?;
        let mut decoded: Value =
            serde_json::from_str(&json_str).map_err(|e| RepodataError::InvalidIndex {
                url: url.to_string(),
                cause: e.to_string(),
            })?;

        if let Value::Object(map) = &mut decoded {
            map.insert("_url".to_string(), Value::String(url.to_string()));
            if let Some(etag) = etag_header {
                map.insert("_etag".to_string(), Value::String(etag));
            }
            if let Some(last_modified) = last_modified_header {
                map.insert("_mod".to_string(), Value::String(last_modified));
            }
        }

        cache::write_cache_atomic(&path, &decoded).map_err(|source| RepodataError::Cache {
            path: path.clone(),
            source,
        })?;
        return Ok(Some(decoded));
    }

    let is_noarch = url.path().ends_with("/noarch/") || url.path().ends_with("/noarch");
    if (status.as_u16() == 404 || status.as_u16() == 403) && is_noarch {
        return Ok(None);
    }

    if status.as_u16() == 401 {
        if let Some(alias) = &options.channel_alias {
            if url.as_str().contains(alias.as_str()) {
                tracing::warn!(
                    url = %url,
                    "received 401 from channel alias host; you may need to re-authenticate"
                );
            }
        }
    }

    let _ = &mut cached;
    Err(RepodataError::Http {
        url: request_url.to_string(),
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("unknown").to_string(),
    })
}

/// Fetches many URLs, preserving input order in the result.
///
/// When `options.concurrent` is set, dispatches to a bounded worker pool
/// (default width 10); if the pool cannot be created because of an OS
/// thread-count limit, falls back to serial fetch transparently.
pub fn collect_repodatas(
    client: &reqwest::blocking::Client,
    urls: &[Url],
    cache_dir: &Path,
    use_cache: bool,
    options: &FetchOptions,
) -> Vec<(Url, Result<Option<Value>, RepodataError>)> {
    if !options.concurrent {
        return collect_serial(client, urls, cache_dir, use_cache, options);
    }

    match ThreadPoolBuilder::new().num_threads(10).build() {
        Ok(pool) => pool.install(|| {
            use rayon::prelude::*;
            urls.par_iter()
                .map(|url| {
                    let result = fetch_repodata(client, url, cache_dir, use_cache, options);
                    (url.clone(), result)
                })
                .collect()
        }),
        Err(e) => {
            log_pool_creation_failure(&e);
            collect_serial(client, urls, cache_dir, use_cache, options)
        }
    }
}

fn log_pool_creation_failure(e: &ThreadPoolBuildError) {
    tracing::warn!(error = %e, "could not create worker pool, falling back to serial fetch");
}

fn collect_serial(
    client: &reqwest::blocking::Client,
    urls: &[Url],
    cache_dir: &Path,
    use_cache: bool,
    options: &FetchOptions,
) -> Vec<(Url, Result<Option<Value>, RepodataError>)> {
    urls.iter()
        .map(|url| {
            let result = fetch_repodata(client, url, cache_dir, use_cache, options);
            (url.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_keep_drops_remote_urls_when_offline() {
        let remote: Url = "https://conda.anaconda.org/conda-forge".parse().unwrap();
        let local: Url = "file:///tmp/channel".parse().unwrap();
        assert!(!offline_keep(&remote, true));
        assert!(offline_keep(&local, true));
        assert!(offline_keep(&remote, false));
    }

    #[test]
    fn cache_hit_within_timeout_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let url: Url = "https://conda.anaconda.org/conda-forge/linux-64".parse().unwrap();
        let path = cache_path(dir.path(), url.as_str());
        cache::write_cache_atomic(&path, &cache::empty_cache()).unwrap();

        let client = reqwest::blocking::Client::new();
        let options = FetchOptions {
            repodata_timeout_secs: 600,
            ..FetchOptions::default()
        };
        let result = fetch_repodata(&client, &url, dir.path(), false, &options).unwrap();
        assert_eq!(result, Some(cache::empty_cache()));
    }
}
