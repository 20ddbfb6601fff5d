//! Version, match-spec, and package record types shared by the repodata
//! and install engine crates.

pub mod channel;
pub mod match_spec;
pub mod no_arch_type;
pub mod package_record;
pub mod paths;
pub mod prefix_record;
pub mod version;
pub mod version_spec;

pub use channel::Channel;
pub use match_spec::MatchSpec;
pub use no_arch_type::{NoArchKind, NoArchType};
pub use package_record::PackageRecord;
pub use paths::{FileMode, PathType, PathsEntry, PathsJson};
pub use prefix_record::{Link, LinkType, PrefixRecord};
pub use version::Version;
pub use version_spec::{BuildNumberSpec, VersionSpec};
