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

//! Snapshot manifest store: typed operations over the labeled manifest
//! database.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::errors::StoreError;
use crate::global::defaults::PARALLEL_MANIFEST_LOADS;
use crate::manifest::{EntryMetadata, Labels, ManifestDb, ManifestId, TYPE_LABEL};
use crate::ui;

use super::{Manifest, SourceInfo};

pub const TYPE_SNAPSHOT: &str = "snapshot";

pub const HOSTNAME_LABEL: &str = "hostname";
pub const USERNAME_LABEL: &str = "username";
pub const PATH_LABEL: &str = "path";

pub fn snapshot_labels(source: &SourceInfo) -> Labels {
    Labels::from([
        (TYPE_LABEL.to_string(), TYPE_SNAPSHOT.to_string()),
        (HOSTNAME_LABEL.to_string(), source.host.clone()),
        (USERNAME_LABEL.to_string(), source.user.clone()),
        (PATH_LABEL.to_string(), source.path.clone()),
    ])
}

fn source_from_labels(labels: &Labels) -> SourceInfo {
    SourceInfo::new(
        labels.get(HOSTNAME_LABEL).map(String::as_str).unwrap_or(""),
        labels.get(USERNAME_LABEL).map(String::as_str).unwrap_or(""),
        labels.get(PATH_LABEL).map(String::as_str).unwrap_or(""),
    )
}

/// Saves a snapshot manifest and stamps the assigned ID onto it.
pub fn save_snapshot(db: &ManifestDb, manifest: &mut Manifest) -> Result<ManifestId> {
    if !manifest.source.is_complete() {
        return Err(StoreError::invalid(
            "snapshot source",
            format!("'{}' is not fully specified", manifest.source),
        )
        .into());
    }

    let id = db.put_manifest(snapshot_labels(&manifest.source), manifest)?;
    manifest.id = Some(id);
    Ok(id)
}

/// Loads one snapshot manifest, verifying its type label.
pub fn load_snapshot(db: &ManifestDb, id: &ManifestId) -> Result<Manifest> {
    let (meta, mut manifest): (EntryMetadata, Manifest) = db.get_manifest(id)?;

    match meta.labels.get(TYPE_LABEL) {
        Some(t) if t == TYPE_SNAPSHOT => {}
        other => {
            return Err(StoreError::WrongType(
                id.to_string(),
                other.cloned().unwrap_or_default(),
            )
            .into());
        }
    }

    manifest.id = Some(*id);
    Ok(manifest)
}

/// Loads many snapshot manifests in parallel. Individual failures are
/// logged and elided from the result; ordering of successes is preserved.
pub fn load_snapshots(db: &ManifestDb, ids: &[ManifestId]) -> Vec<Manifest> {
    if ids.is_empty() {
        return Vec::new();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(PARALLEL_MANIFEST_LOADS.min(ids.len()))
        .build()
        .expect("Failed to build manifest loader pool");

    let loaded: Vec<Option<Manifest>> = pool.install(|| {
        ids.par_iter()
            .map(|id| match load_snapshot(db, id) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    ui::cli::warning!("Could not load snapshot {id}: {e}");
                    None
                }
            })
            .collect()
    });

    loaded.into_iter().flatten().collect()
}

/// IDs of all snapshot manifests, optionally filtered by source.
pub fn list_snapshot_manifest_ids(db: &ManifestDb, source: Option<&SourceInfo>) -> Vec<ManifestId> {
    let filter = match source {
        Some(source) => snapshot_labels(source),
        None => Labels::from([(TYPE_LABEL.to_string(), TYPE_SNAPSHOT.to_string())]),
    };

    db.find_manifests(&filter)
        .into_iter()
        .map(|meta| meta.id)
        .collect()
}

/// Loads all snapshots, optionally for one source.
pub fn list_snapshots(db: &ManifestDb, source: Option<&SourceInfo>) -> Vec<Manifest> {
    load_snapshots(db, &list_snapshot_manifest_ids(db, source))
}

/// All sources that have at least one snapshot, derived from labels alone.
pub fn list_sources(db: &ManifestDb) -> BTreeSet<SourceInfo> {
    let filter = Labels::from([(TYPE_LABEL.to_string(), TYPE_SNAPSHOT.to_string())]);

    db.find_manifests(&filter)
        .iter()
        .map(|meta| source_from_labels(&meta.labels))
        .collect()
}

/// Saves an edited manifest under a new ID (pin and tag edits are
/// append-only: the old document is replaced, never mutated in place).
pub fn update_snapshot(db: &ManifestDb, manifest: &mut Manifest) -> Result<ManifestId> {
    let old_id = manifest
        .id
        .context("Cannot update a snapshot that was never saved")?;

    let new_id = db.put_manifest(snapshot_labels(&manifest.source), manifest)?;
    if new_id != old_id {
        db.delete_manifest(&old_id)?;
    }

    manifest.id = Some(new_id);
    Ok(new_id)
}

pub fn delete_snapshot(db: &ManifestDb, id: &ManifestId) -> Result<()> {
    db.delete_manifest(id)
}

/// Groups manifests by source, ordered lexicographically by source string.
/// Within each group the input order is preserved.
pub fn group_by_source(manifests: Vec<Manifest>) -> Vec<(SourceInfo, Vec<Manifest>)> {
    let mut groups: Vec<(SourceInfo, Vec<Manifest>)> = Vec::new();

    for manifest in manifests {
        match groups.iter_mut().find(|(s, _)| *s == manifest.source) {
            Some((_, group)) => group.push(manifest),
            None => groups.push((manifest.source.clone(), vec![manifest])),
        }
    }

    groups.sort_by_key(|(source, _)| source.to_string());
    groups
}

/// Sorts manifests by start time (stable).
pub fn sort_by_time(manifests: &mut [Manifest], reverse: bool) {
    manifests.sort_by_key(|m| m.start_time);
    if reverse {
        manifests.reverse();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::content::memory::MemoryContentStore;
    use crate::snapshot::SnapshotStats;

    fn test_db() -> ManifestDb {
        ManifestDb::open(Arc::new(MemoryContentStore::new())).unwrap()
    }

    fn manifest(source: SourceInfo, minute: u32) -> Manifest {
        Manifest {
            id: None,
            source,
            description: String::new(),
            start_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2025, 6, 1, 12, minute, 30).unwrap(),
            stats: SnapshotStats::default(),
            incomplete_reason: None,
            root_entry: None,
            tags: BTreeMap::new(),
            pins: Vec::new(),
            retention_reasons: Vec::new(),
        }
    }

    #[test]
    fn test_save_assigns_id_and_requires_complete_source() -> Result<()> {
        let db = test_db();

        let mut m = manifest(SourceInfo::new("burrow", "pepe", "/data"), 0);
        let id = save_snapshot(&db, &mut m)?;
        assert_eq!(m.id, Some(id));

        let mut incomplete = manifest(SourceInfo::new("burrow", "", "/data"), 1);
        let err = save_snapshot(&db, &mut incomplete).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::Invalid { .. })
        ));

        Ok(())
    }

    #[test]
    fn test_load_verifies_type_label() -> Result<()> {
        let db = test_db();

        let id = db.put_manifest(
            Labels::from([(TYPE_LABEL.to_string(), "policy".to_string())]),
            &serde_json::json!({}),
        )?;

        let err = load_snapshot(&db, &id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::WrongType(..))
        ));

        Ok(())
    }

    #[test]
    fn test_list_by_source_and_list_sources() -> Result<()> {
        let db = test_db();
        let source_a = SourceInfo::new("burrow", "pepe", "/a");
        let source_b = SourceInfo::new("burrow", "pepe", "/b");

        save_snapshot(&db, &mut manifest(source_a.clone(), 0))?;
        save_snapshot(&db, &mut manifest(source_a.clone(), 1))?;
        save_snapshot(&db, &mut manifest(source_b.clone(), 2))?;

        assert_eq!(list_snapshot_manifest_ids(&db, Some(&source_a)).len(), 2);
        assert_eq!(list_snapshot_manifest_ids(&db, None).len(), 3);

        let sources = list_sources(&db);
        assert_eq!(sources.len(), 2);
        assert!(sources.contains(&source_a));
        assert!(sources.contains(&source_b));

        Ok(())
    }

    #[test]
    fn test_load_snapshots_elides_failures_preserving_order() -> Result<()> {
        let db = test_db();
        let source = SourceInfo::new("burrow", "pepe", "/a");

        let mut ids = Vec::new();
        for minute in 0..5 {
            let mut m = manifest(source.clone(), minute);
            ids.push(save_snapshot(&db, &mut m)?);
        }

        delete_snapshot(&db, &ids[2])?;

        let loaded = load_snapshots(&db, &ids);
        assert_eq!(loaded.len(), 4);
        let minutes: Vec<u32> = loaded
            .iter()
            .map(|m| chrono::Timelike::minute(&m.start_time))
            .collect();
        assert_eq!(minutes, vec![0, 1, 3, 4]);

        Ok(())
    }

    #[test]
    fn test_update_pins_creates_new_id() -> Result<()> {
        let db = test_db();
        let mut m = manifest(SourceInfo::new("burrow", "pepe", "/a"), 0);
        let original = save_snapshot(&db, &mut m)?;

        assert!(m.update_pins(&["keep".to_string()], &[]));
        let updated = update_snapshot(&db, &mut m)?;
        assert_ne!(original, updated);

        let reloaded = load_snapshot(&db, &updated)?;
        assert_eq!(reloaded.pins, vec!["keep"]);
        assert!(load_snapshot(&db, &original).is_err());

        Ok(())
    }

    #[test]
    fn test_group_by_source_ordering() {
        let source_b = SourceInfo::new("burrow", "pepe", "/b");
        let source_a = SourceInfo::new("burrow", "pepe", "/a");

        let groups = group_by_source(vec![
            manifest(source_b.clone(), 0),
            manifest(source_a.clone(), 2),
            manifest(source_b.clone(), 1),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, source_a);
        assert_eq!(groups[1].0, source_b);
        // Input order preserved within the group.
        let minutes: Vec<u32> = groups[1]
            .1
            .iter()
            .map(|m| chrono::Timelike::minute(&m.start_time))
            .collect();
        assert_eq!(minutes, vec![0, 1]);
    }

    #[test]
    fn test_sort_by_time() {
        let source = SourceInfo::new("h", "u", "/p");
        let mut manifests = vec![
            manifest(source.clone(), 5),
            manifest(source.clone(), 1),
            manifest(source.clone(), 3),
        ];

        sort_by_time(&mut manifests, false);
        let minutes: Vec<u32> = manifests
            .iter()
            .map(|m| chrono::Timelike::minute(&m.start_time))
            .collect();
        assert_eq!(minutes, vec![1, 3, 5]);

        sort_by_time(&mut manifests, true);
        let minutes: Vec<u32> = manifests
            .iter()
            .map(|m| chrono::Timelike::minute(&m.start_time))
            .collect();
        assert_eq!(minutes, vec![5, 3, 1]);
    }
}
