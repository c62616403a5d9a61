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

//! Retention and garbage collection over an on-disk repository: expire
//! snapshots, dry-run the collector, then actually sweep.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tempfile::tempdir;

use urraca::content::IterateOptions;
use urraca::fs;
use urraca::fs::memory::MemDirectory;
use urraca::gc::{self, DryRunError, SafetyParameters};
use urraca::policy::{self, PolicyTree};
use urraca::repo::Repository;
use urraca::snapshot::{Manifest, SourceInfo, store};
use urraca::uploader::Uploader;

fn source() -> SourceInfo {
    SourceInfo::new("burrow", "pepe", "/data")
}

fn snapshot_content(repo: &Arc<Repository>, marker: &str) -> Result<Manifest> {
    let root = Arc::new(MemDirectory::new("data"));
    root.add_file("common.txt", b"shared across snapshots".as_slice());
    root.add_file("unique.txt", format!("unique payload {marker}").into_bytes());

    let uploader = Uploader::new(repo.clone());
    let mut manifest = uploader.upload(
        fs::Entry::Directory(root as Arc<dyn fs::Directory>),
        &PolicyTree::for_policy(policy::default_policy()),
        source(),
        &[],
    )?;
    store::save_snapshot(repo.manifests(), &mut manifest)?;
    Ok(manifest)
}

fn live_content_count(repo: &Arc<Repository>) -> Result<usize> {
    let mut count = 0;
    repo.contents()
        .iterate_contents(IterateOptions::default(), &mut |_| {
            count += 1;
            Ok(())
        })?;
    Ok(count)
}

#[test]
fn test_forget_then_collect() -> Result<()> {
    let tmp = tempdir()?;
    Repository::init_local(tmp.path())?;
    let repo = Repository::open_local(tmp.path())?;

    // Keep only the most recent snapshot.
    let mut tight = policy::Policy::default();
    tight.retention = policy::RetentionPolicy {
        keep_latest: Some(1),
        ..policy::RetentionPolicy::default()
    };
    policy::set_policy(repo.manifests(), &source(), &tight)?;

    for marker in ["one", "two", "three"] {
        snapshot_content(&repo, marker)?;
    }
    let before_forget = live_content_count(&repo)?;

    // Dry run reports without deleting.
    let expired = policy::apply_retention_policy(repo.manifests(), &source(), false)?;
    assert_eq!(expired.len(), 2);
    assert_eq!(
        store::list_snapshot_manifest_ids(repo.manifests(), Some(&source())).len(),
        3
    );

    let expired = policy::apply_retention_policy(repo.manifests(), &source(), true)?;
    assert_eq!(expired.len(), 2);
    assert_eq!(
        store::list_snapshot_manifest_ids(repo.manifests(), Some(&source())).len(),
        1
    );

    // GC dry run: the expired snapshots' unique contents are garbage now.
    let maintenance_time = Utc::now() + Duration::hours(1);
    let err = gc::run(&repo, false, &SafetyParameters::none(), maintenance_time).unwrap_err();
    let dry_run = err.downcast_ref::<DryRunError>().expect("dry-run error");
    assert!(dry_run.stats.unreferenced.count > 0);
    assert!(dry_run.stats.unreferenced.bytes > 0);

    // Nothing was deleted by the dry run.
    assert_eq!(live_content_count(&repo)?, before_forget);

    // Deleting sweep: unique contents go away, shared ones survive.
    let stats = gc::run(&repo, true, &SafetyParameters::none(), maintenance_time)?;
    assert_eq!(stats.deleted, stats.unreferenced);
    assert!(stats.deleted.count > 0);
    assert!(stats.in_use.count > 0);
    let after_sweep = live_content_count(&repo)?;
    assert!(after_sweep < before_forget);

    // A second run has nothing new to delete: the garbage is already
    // marked and nothing live is swept.
    let stats = gc::run(&repo, true, &SafetyParameters::none(), maintenance_time)?;
    assert_eq!(stats.deleted.count, 0);
    assert_eq!(stats.recovered.count, 0);
    assert_eq!(live_content_count(&repo)?, after_sweep);

    Ok(())
}

#[test]
fn test_pinned_snapshot_survives_retention() -> Result<()> {
    let tmp = tempdir()?;
    Repository::init_local(tmp.path())?;
    let repo = Repository::open_local(tmp.path())?;

    let mut tight = policy::Policy::default();
    tight.retention = policy::RetentionPolicy {
        keep_latest: Some(1),
        ..policy::RetentionPolicy::default()
    };
    policy::set_policy(repo.manifests(), &source(), &tight)?;

    let mut old = snapshot_content(&repo, "old")?;
    assert!(old.update_pins(&["precious".to_string()], &[]));
    store::update_snapshot(repo.manifests(), &mut old)?;

    snapshot_content(&repo, "new")?;

    let expired = policy::apply_retention_policy(repo.manifests(), &source(), true)?;
    assert!(expired.is_empty());
    assert_eq!(
        store::list_snapshot_manifest_ids(repo.manifests(), Some(&source())).len(),
        2
    );

    Ok(())
}
