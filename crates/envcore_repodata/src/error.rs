//! Error kinds raised by the fetcher, cache, and index builder.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepodataError {
    #[error("HTTP error fetching {url}: {status} {reason}")]
    Http {
        url: String,
        status: u16,
        reason: String,
    },
    #[error("invalid repodata index at {url}: {cause}")]
    InvalidIndex { url: String, cause: String },
    #[error("failed to read or write cache file {path}: {source}")]
    Cache {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}
