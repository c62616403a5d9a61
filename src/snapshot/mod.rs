// urraca is a deduplicating, content-addressed snapshot engine
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

pub mod source;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::global::defaults::MAX_FAILED_ENTRIES_PER_DIR;
use crate::manifest::ManifestId;
use crate::object::ObjectId;
pub use source::{SourceInfo, parse_source};

/// Stream type marker of serialized directories.
pub const DIRECTORY_STREAM_TYPE: &str = "kopia:directory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Directory,
    #[serde(rename = "s")]
    Symlink,
    #[serde(rename = "u")]
    Unknown,
}

/// POSIX permission bits, serialized as a `0`-prefixed octal string.
/// Parsing accepts any standard base prefix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Permissions(pub u32);

impl Permissions {
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn parse(s: &str) -> Result<Self> {
        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)?
        } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
            u32::from_str_radix(oct, 8)?
        } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
            u32::from_str_radix(bin, 2)?
        } else if s.len() > 1 && s.starts_with('0') {
            u32::from_str_radix(&s[1..], 8)?
        } else {
            s.parse()?
        };

        Ok(Self(value))
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0{:o}", self.0)
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Permissions::parse(&s).map_err(serde::de::Error::custom)
    }
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// A failed child recorded in a directory summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    #[serde(rename = "path")]
    pub entry_path: String,
    pub error: String,
}

/// Aggregate of a subtree, derived purely from child attributes so that
/// identical trees serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySummary {
    pub size: u64,
    pub files: u64,
    pub symlinks: u64,
    pub dirs: u64,
    #[serde(rename = "maxTime", skip_serializing_if = "Option::is_none")]
    pub max_mtime: Option<DateTime<Utc>>,
    #[serde(rename = "numFailed", skip_serializing_if = "is_zero_u64")]
    pub fatal_error_count: u64,
    #[serde(rename = "numIgnoredErrors", skip_serializing_if = "is_zero_u64")]
    pub ignored_error_count: u64,
    #[serde(rename = "errors", skip_serializing_if = "Vec::is_empty")]
    pub failed_entries: Vec<EntryError>,
}

impl DirectorySummary {
    /// Builds the aggregate for a directory from its (already summarized)
    /// children.
    pub fn from_entries(entries: &[DirEntry]) -> Self {
        let mut summary = DirectorySummary::default();

        for entry in entries {
            summary.observe_mtime(entry.mtime);

            match entry.entry_type {
                EntryType::File | EntryType::Unknown => {
                    summary.files += 1;
                    summary.size += entry.size;
                }
                EntryType::Symlink => {
                    summary.symlinks += 1;
                }
                EntryType::Directory => {
                    summary.dirs += 1;
                    if let Some(child) = &entry.summary {
                        summary.size += child.size;
                        summary.files += child.files;
                        summary.symlinks += child.symlinks;
                        summary.dirs += child.dirs;
                        summary.fatal_error_count += child.fatal_error_count;
                        summary.ignored_error_count += child.ignored_error_count;
                        if let Some(t) = child.max_mtime {
                            summary.observe_mtime(t);
                        }

                        for failed in &child.failed_entries {
                            summary.push_failed_entry(EntryError {
                                entry_path: format!("{}/{}", entry.name, failed.entry_path),
                                error: failed.error.clone(),
                            });
                        }
                    }
                }
            }
        }

        summary
    }

    fn observe_mtime(&mut self, mtime: DateTime<Utc>) {
        match self.max_mtime {
            Some(current) if current >= mtime => {}
            _ => self.max_mtime = Some(mtime),
        }
    }

    /// Records an error for a direct child of this directory.
    pub fn add_failure(&mut self, entry_path: &str, error: &str, ignored: bool) {
        if ignored {
            self.ignored_error_count += 1;
        } else {
            self.fatal_error_count += 1;
        }

        self.push_failed_entry(EntryError {
            entry_path: entry_path.to_string(),
            error: error.to_string(),
        });
    }

    fn push_failed_entry(&mut self, failed: EntryError) {
        if self.failed_entries.len() < MAX_FAILED_ENTRIES_PER_DIR {
            self.failed_entries.push(failed);
        }
    }
}

/// Serialized child of a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Permissions::is_empty")]
    pub mode: Permissions,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub uid: u32,
    pub gid: u32,
    #[serde(rename = "btime", default, skip_serializing_if = "Option::is_none")]
    pub birth_time: Option<DateTime<Utc>>,
    #[serde(rename = "obj")]
    pub object_id: ObjectId,
    #[serde(rename = "summ", default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<DirectorySummary>,
}

impl DirEntry {
    /// Cache-reuse test: a prior entry stands in for the current one iff
    /// the identifying metadata is unchanged.
    pub fn metadata_matches(&self, metadata: &crate::fs::Metadata) -> bool {
        self.name == metadata.name
            && self.size == metadata.size
            && self.mode.0 == metadata.mode
            && self.mtime == metadata.mtime
            && self.uid == metadata.uid
            && self.gid == metadata.gid
    }
}

/// Serialized directory: sorted entries plus their summary. Because the
/// entries are sorted and the summary is a pure function of the children,
/// equal directories serialize to byte-identical documents and share one
/// object ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirManifest {
    stream: String,
    pub entries: Vec<DirEntry>,
    pub summary: DirectorySummary,
}

impl DirManifest {
    pub fn new(mut entries: Vec<DirEntry>, summary: DirectorySummary) -> Self {
        entries.sort_by(|first, second| first.name.cmp(&second.name));
        Self {
            stream: DIRECTORY_STREAM_TYPE.to_string(),
            entries,
            summary,
        }
    }

    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let manifest: DirManifest = serde_json::from_slice(data)?;
        if manifest.stream != DIRECTORY_STREAM_TYPE {
            bail!("Not a directory manifest (stream '{}')", manifest.stream);
        }
        Ok(manifest)
    }

    pub fn find_entry(&self, name: &str) -> Option<&DirEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }
}

/// Snapshot manifest: the labeled document describing one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Assigned by the manifest store on save.
    #[serde(skip)]
    pub id: Option<ManifestId>,
    pub source: SourceInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub stats: SnapshotStats,
    #[serde(
        rename = "incomplete",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub incomplete_reason: Option<String>,
    #[serde(rename = "rootEntry", default, skip_serializing_if = "Option::is_none")]
    pub root_entry: Option<DirEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<String>,
    /// Recomputed by the retention engine; never persisted.
    #[serde(skip)]
    pub retention_reasons: Vec<String>,
}

impl Manifest {
    pub fn is_complete(&self) -> bool {
        self.incomplete_reason.is_none()
    }

    pub fn root_object_id(&self) -> Option<&ObjectId> {
        self.root_entry.as_ref().map(|e| &e.object_id)
    }

    /// Applies pin edits, keeping the pin list sorted and deduplicated.
    /// Returns true iff the set changed.
    pub fn update_pins(&mut self, add: &[String], remove: &[String]) -> bool {
        let mut pins = self.pins.clone();
        pins.extend(add.iter().cloned());
        pins.retain(|pin| !remove.contains(pin));
        pins.sort();
        pins.dedup();

        if pins == self.pins {
            return false;
        }

        self.pins = pins;
        true
    }

    /// A manifest is expired iff retention found no reason to keep it and
    /// no pin protects it.
    pub fn is_expired(&self) -> bool {
        self.retention_reasons.is_empty() && self.pins.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotStats {
    pub total_file_size: u64,
    pub excluded_total_file_size: u64,
    pub total_file_count: u32,
    pub total_symlink_count: u32,
    pub total_directory_count: u32,
    pub cached_files: u32,
    pub non_cached_files: u32,
    pub excluded_file_count: u32,
    pub excluded_dir_count: u32,
    pub error_count: u32,
    pub ignored_error_count: u32,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::content::ContentId;

    fn entry(name: &str, entry_type: EntryType, size: u64) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            entry_type,
            mode: Permissions(0o644),
            size,
            mtime: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
            uid: 1000,
            gid: 1000,
            birth_time: None,
            object_id: ObjectId::Direct(ContentId::from_content(name.as_bytes(), None)),
            summary: None,
        }
    }

    #[test]
    fn test_permissions_round_trip() -> Result<()> {
        for mode in [0o1, 0o644, 0o755, 0o7777] {
            let p = Permissions(mode);
            assert_eq!(Permissions::parse(&p.to_string())?, p);
        }
        Ok(())
    }

    #[test]
    fn test_permissions_parse_any_base() -> Result<()> {
        assert_eq!(Permissions::parse("0644")?, Permissions(0o644));
        assert_eq!(Permissions::parse("0o644")?, Permissions(0o644));
        assert_eq!(Permissions::parse("0x1a4")?, Permissions(0o644));
        assert_eq!(Permissions::parse("420")?, Permissions(0o644));
        assert_eq!(Permissions::parse("0b110100100")?, Permissions(0o644));
        Ok(())
    }

    #[test]
    fn test_zero_permissions_omitted() -> Result<()> {
        let mut e = entry("f", EntryType::File, 3);
        e.mode = Permissions(0);
        let json = serde_json::to_string(&e)?;
        assert!(!json.contains("\"mode\""));

        let e2: DirEntry = serde_json::from_str(&json)?;
        assert_eq!(e2.mode, Permissions(0));
        Ok(())
    }

    #[test]
    fn test_dir_manifest_sorts_and_serializes_identically() -> Result<()> {
        let make = |order: &[&str]| {
            let entries: Vec<DirEntry> =
                order.iter().map(|n| entry(n, EntryType::File, 1)).collect();
            let summary = DirectorySummary::from_entries(&entries);
            DirManifest::new(entries, summary)
        };

        let a = make(&["a", "b", "c"]);
        let b = make(&["c", "a", "b"]);
        assert_eq!(a.to_canonical_bytes()?, b.to_canonical_bytes()?);

        Ok(())
    }

    #[test]
    fn test_dir_manifest_round_trip_and_lookup() -> Result<()> {
        let entries = vec![
            entry("alpha", EntryType::File, 10),
            entry("beta", EntryType::Symlink, 0),
        ];
        let summary = DirectorySummary::from_entries(&entries);
        let manifest = DirManifest::new(entries, summary);

        let parsed = DirManifest::from_bytes(&manifest.to_canonical_bytes()?)?;
        assert!(parsed.find_entry("alpha").is_some());
        assert!(parsed.find_entry("gamma").is_none());
        assert_eq!(parsed.summary.files, 1);
        assert_eq!(parsed.summary.symlinks, 1);

        Ok(())
    }

    #[test]
    fn test_summary_aggregates_subtree() {
        let grandchild_entries = vec![entry("f1", EntryType::File, 5)];
        let mut child_summary = DirectorySummary::from_entries(&grandchild_entries);
        child_summary.add_failure("broken", "permission denied", false);

        let mut child = entry("subdir", EntryType::Directory, 0);
        child.entry_type = EntryType::Directory;
        child.summary = Some(child_summary);

        let entries = vec![child, entry("f2", EntryType::File, 7)];
        let summary = DirectorySummary::from_entries(&entries);

        assert_eq!(summary.files, 2);
        assert_eq!(summary.dirs, 1);
        assert_eq!(summary.size, 12);
        assert_eq!(summary.fatal_error_count, 1);
        assert_eq!(summary.failed_entries.len(), 1);
        assert_eq!(summary.failed_entries[0].entry_path, "subdir/broken");
    }

    #[test]
    fn test_update_pins() {
        let mut m = Manifest {
            id: None,
            source: SourceInfo::new("h", "u", "/p"),
            description: String::new(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            stats: SnapshotStats::default(),
            incomplete_reason: None,
            root_entry: None,
            tags: BTreeMap::new(),
            pins: Vec::new(),
            retention_reasons: Vec::new(),
        };

        assert!(m.update_pins(&["keep".to_string()], &[]));
        assert!(!m.update_pins(&["keep".to_string()], &[]));
        assert_eq!(m.pins, vec!["keep"]);

        assert!(m.update_pins(
            &["alpha".to_string(), "alpha".to_string()],
            &["keep".to_string()]
        ));
        assert_eq!(m.pins, vec!["alpha"]);
    }
}
