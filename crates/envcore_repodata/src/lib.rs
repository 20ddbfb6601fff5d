//! Repodata fetching, on-disk caching, and channel index construction.
//!
//! This crate is the synchronous counterpart to `rattler_repodata_gateway`:
//! it owns the cache file format, the conditional-GET fetch protocol, and
//! the Dist-keyed merge that turns one or more channel repodatas (plus an
//! optional prefix overlay) into a single package index.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod index;

pub use error::RepodataError;
pub use fetch::{collect_repodatas, fetch_repodata, offline_keep, FetchOptions};
pub use index::{
    add_pip_dependency, build_index, supplement_index_with_prefix, ChannelRepodata, IndexedRecord,
    MAX_CHANNEL_PRIORITY,
};
