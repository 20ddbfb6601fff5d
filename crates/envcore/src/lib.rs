//! Prefix state, configuration, and the file-level install/unlink engine.
//!
//! This crate owns everything that happens once a package's files need to
//! land in (or leave) a concrete prefix directory: reading and writing
//! `conda-meta`, linking/copying files with placeholder-prefix rewriting,
//! noarch-python routing and entry points, and running a package's
//! pre-unlink/post-link scripts. Resolving *which* packages to install is
//! out of scope — see [`envcore_repodata`] for fetching and indexing the
//! channel metadata this crate's callers plan against.

pub mod config;
pub mod install;
pub mod prefix_data;

pub use config::Config;
pub use install::{install_package, InstallError, InstallOptions};
pub use prefix_data::{PrefixData, PrefixDataError, PrefixLock};
