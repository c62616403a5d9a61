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

//! Garbage collection: mark every content reachable from a snapshot root,
//! then sweep the content store. Un-delete is idempotent and deletion is
//! guarded by a safety age, so an interrupted run leaves the repository
//! safe for the next one.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use thiserror::Error;

use crate::content::{ContentId, ContentInfo, IterateOptions};
use crate::global::defaults::{DEFAULT_MIN_CONTENT_AGE, GC_FLUSH_EVERY_DELETIONS};
use crate::object::ObjectId;
use crate::repo::Repository;
use crate::snapshot::{DirManifest, EntryType, Manifest, store};
use crate::ui;
use crate::utils;

/// Guard rails for the sweep phase.
#[derive(Debug, Clone)]
pub struct SafetyParameters {
    /// Unreferenced contents younger than this are left alone, so blobs
    /// written by an in-flight snapshot survive until its manifest lands.
    pub min_content_age_subject_to_gc: Duration,
}

impl Default for SafetyParameters {
    fn default() -> Self {
        Self {
            min_content_age_subject_to_gc: DEFAULT_MIN_CONTENT_AGE,
        }
    }
}

impl SafetyParameters {
    /// No safety margin. For tests.
    pub fn none() -> Self {
        Self {
            min_content_age_subject_to_gc: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcCounter {
    pub count: u64,
    pub bytes: u64,
}

impl GcCounter {
    fn add(&mut self, info: &ContentInfo) {
        self.count += 1;
        self.bytes += info.packed_length;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Contents referenced by at least one snapshot.
    pub in_use: GcCounter,
    /// Manifest-prefixed system contents.
    pub in_use_system: GcCounter,
    /// Previously deleted contents that became referenced again.
    pub recovered: GcCounter,
    /// Unreferenced contents too young to sweep.
    pub unreferenced_recent: GcCounter,
    /// Unreferenced contents old enough to sweep.
    pub unreferenced: GcCounter,
    /// Contents actually deleted this run.
    pub deleted: GcCounter,
}

/// Returned when a dry run finds garbage: the caller must re-run with
/// deletion enabled to actually reclaim the space.
#[derive(Debug, Error)]
#[error(
    "found {} unreferenced contents ({}); re-run with delete enabled",
    stats.unreferenced.count,
    utils::format_size(stats.unreferenced.bytes, 1)
)]
pub struct DryRunError {
    pub stats: GcStats,
}

/// Runs one garbage collection over the repository.
pub fn run(
    repo: &Repository,
    delete: bool,
    safety: &SafetyParameters,
    maintenance_start_time: DateTime<Utc>,
) -> Result<GcStats> {
    let used = mark_referenced_contents(repo)?;
    ui::cli::verbose_1!("Marked {} referenced contents", used.len());

    let stats = sweep(repo, &used, delete, safety, maintenance_start_time)?;

    if stats.unreferenced.count > 0 && !delete {
        return Err(DryRunError { stats }.into());
    }

    Ok(stats)
}

/// Mark phase: walks every snapshot root and collects the content IDs
/// composing every reachable object, verifying each object on the way.
fn mark_referenced_contents(repo: &Repository) -> Result<HashSet<ContentId>> {
    let ids = store::list_snapshot_manifest_ids(repo.manifests(), None);
    let manifests: Vec<Manifest> = ids
        .iter()
        .map(|id| store::load_snapshot(repo.manifests(), id))
        .collect::<Result<_>>()
        .with_context(|| "Could not load snapshot manifests for GC")?;

    let used: Mutex<HashSet<ContentId>> = Mutex::new(HashSet::new());

    manifests
        .par_iter()
        .try_for_each(|manifest| mark_manifest(repo, manifest, &used))?;

    Ok(used.into_inner())
}

fn mark_manifest(
    repo: &Repository,
    manifest: &Manifest,
    used: &Mutex<HashSet<ContentId>>,
) -> Result<()> {
    let Some(root) = manifest.root_entry.as_ref() else {
        return Ok(());
    };

    // (object, is_directory) pairs pending a visit.
    let mut stack: Vec<(ObjectId, bool)> =
        vec![(root.object_id, root.entry_type == EntryType::Directory)];

    while let Some((object_id, is_dir)) = stack.pop() {
        let contents = repo
            .objects()
            .verify_object(&object_id)
            .with_context(|| format!("Snapshot {:?} references a broken object", manifest.id))?;
        used.lock().extend(contents);

        if !is_dir {
            continue;
        }

        let manifest_bytes = repo.objects().read_object(&object_id)?;
        let dir = DirManifest::from_bytes(&manifest_bytes)
            .with_context(|| format!("Object {object_id} is not a directory manifest"))?;

        for entry in &dir.entries {
            stack.push((entry.object_id, entry.entry_type == EntryType::Directory));
        }
    }

    Ok(())
}

/// Sweep phase: iterates every content (deleted included) and classifies
/// it against the mark set.
fn sweep(
    repo: &Repository,
    used: &HashSet<ContentId>,
    delete: bool,
    safety: &SafetyParameters,
    maintenance_start_time: DateTime<Utc>,
) -> Result<GcStats> {
    let mut stats = GcStats::default();
    let min_age = TimeDelta::from_std(safety.min_content_age_subject_to_gc)
        .unwrap_or(TimeDelta::MAX);

    repo.contents().iterate_contents(
        IterateOptions {
            include_deleted: true,
        },
        &mut |info| {
            if info.content_id.has_manifest_prefix() {
                stats.in_use_system.add(&info);
                return Ok(());
            }

            if used.contains(&info.content_id) {
                if info.deleted {
                    repo.contents().undelete_content(&info.content_id)?;
                    stats.recovered.add(&info);
                }
                stats.in_use.add(&info);
                return Ok(());
            }

            if maintenance_start_time - info.timestamp < min_age {
                stats.unreferenced_recent.add(&info);
                return Ok(());
            }

            stats.unreferenced.add(&info);

            if delete && !info.deleted {
                repo.contents().delete_content(&info.content_id)?;
                stats.deleted.add(&info);

                if stats.deleted.count % GC_FLUSH_EVERY_DELETIONS == 0 {
                    repo.contents().flush()?;
                }
            }

            Ok(())
        },
    )?;

    repo.contents().flush()?;

    Ok(stats)
}
