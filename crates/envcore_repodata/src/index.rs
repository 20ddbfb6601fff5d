//! Builds a merged package index from one or more channel repodatas, with an
//! optional prefix overlay.
//!
//! Grounded on `conda.core.index.fetch_index`/`make_index`/
//! `supplement_index_with_prefix`/`add_pip_dependency`.

use envcore_types::channel::DEFAULTS;
use envcore_types::{Channel, Link, NoArchKind, PackageRecord, PrefixRecord};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// The priority assigned to an installed package whose channel is still
/// recognized but whose record has disappeared from that channel's current
/// repodata: it is kept visible, but never preferred over anything actually
/// offered by a known channel.
///
/// Grounded on `conda.core.index.MAX_CHANNEL_PRIORITY`.
pub const MAX_CHANNEL_PRIORITY: u32 = u32::MAX;

/// A Dist key: `<channel>::<filename>`, or bare `<filename>` for the
/// `defaults` channel — matches the original's `Dist.__str__`.
fn dist_key(channel: &Option<String>, file_name: &str) -> String {
    match channel {
        Some(name) if name != "defaults" => format!("{name}::{file_name}"),
        _ => file_name.to_string(),
    }
}

/// The key used to look a record's channel up in a channel-priority map: the
/// `defaults` sentinel for records with no explicit channel, the channel
/// name/URL otherwise.
fn priority_key(channel: &Option<String>) -> &str {
    channel.as_deref().unwrap_or(DEFAULTS)
}

/// One channel's decoded repodata, paired with the channel it came from.
pub struct ChannelRepodata {
    pub channel: Channel,
    pub subdir: String,
    pub repodata: Value,
}

/// A [`PackageRecord`] as it sits in a merged index: the channel priority it
/// was resolved with, and the link info an installed copy overlays on top.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub record: PackageRecord,
    pub priority: u32,
    pub link: Option<Link>,
}

fn records_from_repodata(channel: &Channel, subdir: &str, repodata: &Value) -> Vec<PackageRecord> {
    let Some(packages) = repodata.get("packages").and_then(Value::as_object) else {
        return Vec::new();
    };
    let channel_name = channel.canonical_name();
    packages
        .iter()
        .filter_map(|(file_name, record_json)| {
            let mut record: PackageRecord = serde_json::from_value(record_json.clone()).ok()?;
            record.file_name = file_name.clone();
            record.subdir = subdir.to_string();
            if record.channel.is_none() {
                record.channel = channel_name.clone();
            }
            Some(record)
        })
        .collect()
}

/// Merges repodatas from multiple channels in priority order. The first
/// channel listed wins on key collision, matching first-writer-wins
/// semantics in the original's `fetch_index`.
///
/// Each channel is assigned an increasing priority starting at `0` in input
/// order; a channel repeated later in `channels` keeps the priority of its
/// first occurrence. The priority is carried on every [`IndexedRecord`], and
/// the channel-name-to-priority map is returned alongside the index so that
/// [`supplement_index_with_prefix`] can reuse it without re-deriving channel
/// order.
pub fn build_index(channels: &[ChannelRepodata]) -> (BTreeMap<String, IndexedRecord>, HashMap<String, u32>) {
    let mut index = BTreeMap::new();
    let mut priorities: HashMap<String, u32> = HashMap::new();
    for entry in channels {
        let key = entry.channel.canonical_name().unwrap_or_else(|| DEFAULTS.to_string());
        let next = priorities.len() as u32;
        let priority = *priorities.entry(key).or_insert(next);

        let records = records_from_repodata(&entry.channel, &entry.subdir, &entry.repodata);
        for record in records {
            let dist = dist_key(&record.channel, &record.file_name);
            index.entry(dist).or_insert(IndexedRecord {
                record,
                priority,
                link: None,
            });
        }
    }
    (index, priorities)
}

/// Adds a synthetic `pip` dependency to a noarch-python package's depends
/// list when it isn't already present, so that prefixes with packages
/// installed via pip are still resolvable.
///
/// Grounded on `conda.core.index.add_pip_dependency`.
pub fn add_pip_dependency(record: &mut PackageRecord) {
    if record.name == "python" || record.name == "pip" {
        return;
    }
    if record.noarch.kind() != Some(NoArchKind::Python) {
        return;
    }
    let already_depends_on_pip = record
        .depends
        .iter()
        .any(|dep| dep.split_whitespace().next() == Some("pip"));
    if !already_depends_on_pip {
        record.depends.push("pip".to_string());
    }
}

/// Overlays locally installed packages from a prefix's conda-meta directory
/// on top of a channel-derived index.
///
/// For an installed record whose key is already present in `index` (the
/// common case: the package is still offered by its channel), the existing
/// record is kept as-is — it reflects the fresher repodata — but its `link`
/// is replaced with the installed copy's, so later stages can see how it was
/// actually linked into the prefix. For a key absent from `index` (the
/// package vanished from its channel, or was never part of one), the
/// installed record is inserted: with priority [`MAX_CHANNEL_PRIORITY`] if
/// its channel is still a recognized one (so it's never preferred over
/// anything the channel currently offers), or the next free priority after
/// every channel's otherwise.
///
/// Grounded on `conda.core.index.supplement_index_with_prefix`.
pub fn supplement_index_with_prefix(
    index: &mut BTreeMap<String, IndexedRecord>,
    prefix_records: &[PrefixRecord],
    channel_priorities: &HashMap<String, u32>,
) {
    let next_priority = channel_priorities.values().copied().max().map_or(0, |p| p + 1);

    for prefix_record in prefix_records {
        let mut record = prefix_record.package_record.clone();
        add_pip_dependency(&mut record);
        let key = dist_key(&record.channel, &record.file_name);
        let known_channel = channel_priorities.contains_key(priority_key(&record.channel));

        match index.get_mut(&key) {
            Some(existing) => {
                existing.link = prefix_record.link.clone();
            }
            None => {
                let priority = if known_channel { MAX_CHANNEL_PRIORITY } else { next_priority };
                index.insert(
                    key,
                    IndexedRecord {
                        record,
                        priority,
                        link: prefix_record.link.clone(),
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envcore_types::{prefix_record::empty_link, NoArchType};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn repodata_with(file_name: &str, name: &str) -> Value {
        json!({
            "packages": {
                file_name: {
                    "name": name,
                    "version": "1.0.0",
                    "build": "0",
                    "build_number": 0,
                }
            }
        })
    }

    fn bare_record(name: &str, file_name: &str, channel: Option<&str>) -> PackageRecord {
        PackageRecord {
            name: name.into(),
            version: "1.0.0".parse().unwrap(),
            build: "0".into(),
            build_number: 0,
            channel: channel.map(str::to_string),
            subdir: "linux-64".into(),
            file_name: file_name.into(),
            url: None,
            md5: None,
            sha256: None,
            depends: vec![],
            constrains: vec![],
            timestamp: None,
            size: None,
            license: None,
            license_family: None,
            noarch: NoArchType::none(),
            features: BTreeSet::new(),
            track_features: BTreeSet::new(),
            preferred_env: None,
        }
    }

    fn prefix_record_for(record: PackageRecord, link: Option<Link>) -> PrefixRecord {
        PrefixRecord {
            package_record: record,
            files: vec![],
            paths_data: Default::default(),
            link,
            url: None,
            requested_spec: None,
        }
    }

    #[test]
    fn dist_key_uses_bare_filename_for_defaults() {
        assert_eq!(
            dist_key(&Some("defaults".to_string()), "numpy-1.0-0.tar.bz2"),
            "numpy-1.0-0.tar.bz2"
        );
        assert_eq!(
            dist_key(&Some("conda-forge".to_string()), "numpy-1.0-0.tar.bz2"),
            "conda-forge::numpy-1.0-0.tar.bz2"
        );
    }

    #[test]
    fn first_channel_wins_on_collision() {
        let primary = ChannelRepodata {
            channel: "conda-forge".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("numpy-1.0-0.tar.bz2", "numpy-primary"),
        };
        let secondary = ChannelRepodata {
            channel: "bioconda".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("numpy-1.0-0.tar.bz2", "numpy-secondary"),
        };
        let (index, _) = build_index(&[primary, secondary]);
        let key = "conda-forge::numpy-1.0-0.tar.bz2";
        assert!(index.contains_key(key));
        assert_eq!(index[key].record.name, "numpy-primary");
    }

    #[test]
    fn channel_order_assigns_increasing_priority() {
        let a = ChannelRepodata {
            channel: "a".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: json!({
                "packages": {
                    "foo-1.0-0.tar.bz2": {"name": "foo", "version": "1.0", "build": "0", "build_number": 0},
                    "foo-2.0-0.tar.bz2": {"name": "foo", "version": "2.0", "build": "0", "build_number": 0},
                }
            }),
        };
        let b = ChannelRepodata {
            channel: "b".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("foo-2.0-0.tar.bz2", "foo"),
        };
        let (index, _) = build_index(&[a, b]);
        assert_eq!(index["a::foo-2.0-0.tar.bz2"].priority, 0);
        assert_eq!(index["b::foo-2.0-0.tar.bz2"].priority, 1);
        assert!(index.contains_key("a::foo-1.0-0.tar.bz2"));
    }

    #[test]
    fn duplicate_channel_keeps_first_priority() {
        let first = ChannelRepodata {
            channel: "conda-forge".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("foo-1.0-0.tar.bz2", "foo"),
        };
        let second = ChannelRepodata {
            channel: "bioconda".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("bar-1.0-0.tar.bz2", "bar"),
        };
        let repeat = ChannelRepodata {
            channel: "conda-forge".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("baz-1.0-0.tar.bz2", "baz"),
        };
        let (index, _) = build_index(&[first, second, repeat]);
        assert_eq!(index["conda-forge::foo-1.0-0.tar.bz2"].priority, 0);
        assert_eq!(index["bioconda::bar-1.0-0.tar.bz2"].priority, 1);
        assert_eq!(index["conda-forge::baz-1.0-0.tar.bz2"].priority, 0);
    }

    #[test]
    fn supplement_copies_link_onto_existing_record() {
        let channel = ChannelRepodata {
            channel: "conda-forge".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("numpy-1.0-0.tar.bz2", "numpy"),
        };
        let (mut index, priorities) = build_index(&[channel]);

        let installed = bare_record("numpy", "numpy-1.0-0.tar.bz2", Some("conda-forge"));
        let link = empty_link();
        let prefix_record = prefix_record_for(installed, Some(link.clone()));

        supplement_index_with_prefix(&mut index, &[prefix_record], &priorities);

        let key = "conda-forge::numpy-1.0-0.tar.bz2";
        assert_eq!(index[key].record.name, "numpy");
        assert_eq!(index[key].link, Some(link));
        assert_eq!(index[key].priority, 0);
    }

    #[test]
    fn supplement_deprioritizes_vanished_package_from_known_channel() {
        let channel = ChannelRepodata {
            channel: "conda-forge".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("numpy-1.0-0.tar.bz2", "numpy"),
        };
        let (mut index, priorities) = build_index(&[channel]);

        let installed = bare_record("scipy", "scipy-1.0-0.tar.bz2", Some("conda-forge"));
        let prefix_record = prefix_record_for(installed, None);

        supplement_index_with_prefix(&mut index, &[prefix_record], &priorities);

        let key = "conda-forge::scipy-1.0-0.tar.bz2";
        assert_eq!(index[key].priority, MAX_CHANNEL_PRIORITY);
    }

    #[test]
    fn supplement_assigns_next_free_priority_for_unknown_channel() {
        let channel = ChannelRepodata {
            channel: "conda-forge".parse().unwrap(),
            subdir: "linux-64".to_string(),
            repodata: repodata_with("numpy-1.0-0.tar.bz2", "numpy"),
        };
        let (mut index, priorities) = build_index(&[channel]);

        let installed = bare_record("localpkg", "localpkg-1.0-0.tar.bz2", Some("local-build"));
        let prefix_record = prefix_record_for(installed, None);

        supplement_index_with_prefix(&mut index, &[prefix_record], &priorities);

        let key = "local-build::localpkg-1.0-0.tar.bz2";
        assert_eq!(index[key].priority, 1);
    }

    #[test]
    fn add_pip_dependency_only_applies_to_noarch_python() {
        let mut record = bare_record("requests", "requests-2.0.0-0.tar.bz2", None);
        record.subdir = "noarch".into();
        record.noarch = NoArchType::python();
        add_pip_dependency(&mut record);
        assert!(record.depends.contains(&"pip".to_string()));

        add_pip_dependency(&mut record);
        assert_eq!(record.depends.iter().filter(|d| *d == "pip").count(), 1);
    }
}
