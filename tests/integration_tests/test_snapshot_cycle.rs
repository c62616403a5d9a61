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

//! Snapshot a real directory tree into an on-disk repository, list it,
//! walk the overlay and restore it back.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use urraca::fs::{self, local};
use urraca::policy;
use urraca::repo::Repository;
use urraca::repofs;
use urraca::restorer::{RestoreOptions, restore_tree};
use urraca::snapshot::{SourceInfo, store};
use urraca::uploader::Uploader;

fn write_source_tree(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root.join("docs/deep"))?;
    std::fs::create_dir_all(root.join("media"))?;
    std::fs::write(root.join("readme.txt"), b"top level file")?;
    std::fs::write(root.join("docs/a.txt"), b"document a")?;
    std::fs::write(root.join("docs/deep/b.txt"), b"document b, nested")?;
    std::fs::write(root.join("media/raw.bin"), vec![0xa5u8; 64 * 1024])?;

    #[cfg(unix)]
    std::os::unix::fs::symlink("readme.txt", root.join("link"))?;

    Ok(())
}

fn snapshot_path(
    repo: &Arc<Repository>,
    path: &Path,
    source: &SourceInfo,
    previous: &[urraca::snapshot::Manifest],
) -> Result<urraca::snapshot::Manifest> {
    let root = local::entry_from_path(path)?;
    let tree = policy::tree_for_source(repo.manifests(), source)?;

    let uploader = Uploader::new(repo.clone());
    let mut manifest = uploader.upload(root, &tree, source.clone(), previous)?;
    store::save_snapshot(repo.manifests(), &mut manifest)?;
    Ok(manifest)
}

#[test]
fn test_snapshot_list_restore_cycle() -> Result<()> {
    let tmp = tempdir()?;
    let repo_path = tmp.path().join("repo");
    let source_path = tmp.path().join("data");
    let restore_path = tmp.path().join("restore");

    std::fs::create_dir_all(&source_path)?;
    write_source_tree(&source_path)?;

    Repository::init_local(&repo_path)?;
    let repo = Repository::open_local(&repo_path)?;

    let source = SourceInfo::new("burrow", "pepe", &source_path.to_string_lossy());

    // First snapshot hashes everything, the second is fully cached.
    let s1 = snapshot_path(&repo, &source_path, &source, &[])?;
    assert!(s1.stats.non_cached_files > 0);

    let s2 = snapshot_path(&repo, &source_path, &source, &[s1.clone()])?;
    assert_eq!(s2.stats.non_cached_files, 0);
    assert_eq!(s2.stats.cached_files, s1.stats.non_cached_files);
    assert_eq!(s1.root_object_id(), s2.root_object_id());

    // The store lists the source and both snapshots.
    let sources = store::list_sources(repo.manifests());
    assert!(sources.contains(&source));
    assert_eq!(
        store::list_snapshot_manifest_ids(repo.manifests(), Some(&source)).len(),
        2
    );

    // The overlay exposes /<user@host>/<path>/<snaptime>.
    let overlay = repofs::repository_root(repo.clone());
    let fs::Entry::Directory(user_host) = overlay
        .entries()?
        .find(|e| e.name() == "pepe@burrow")
        .expect("user@host node missing")
    else {
        panic!("expected a directory");
    };
    let fs::Entry::Directory(per_source) = user_host
        .entries()?
        .next()
        .expect("source node missing")
    else {
        panic!("expected a directory");
    };
    let snapshots: Vec<fs::Entry> = per_source.entries()?.collect();
    assert_eq!(snapshots.len(), 2);

    // Restore the snapshot (via the overlay node) and compare contents.
    let fs::Entry::Directory(snap_root) = snapshots.into_iter().next().unwrap() else {
        panic!("expected a directory");
    };
    let stats = restore_tree(&snap_root, &restore_path, &RestoreOptions::default())?;

    assert_eq!(stats.restored_files, 4);
    assert_eq!(
        std::fs::read(restore_path.join("readme.txt"))?,
        b"top level file"
    );
    assert_eq!(
        std::fs::read(restore_path.join("docs/deep/b.txt"))?,
        b"document b, nested"
    );
    assert_eq!(
        std::fs::read(restore_path.join("media/raw.bin"))?,
        vec![0xa5u8; 64 * 1024]
    );

    #[cfg(unix)]
    {
        assert_eq!(stats.restored_symlinks, 1);
        assert_eq!(
            std::fs::read_link(restore_path.join("link"))?,
            Path::new("readme.txt")
        );
    }

    Ok(())
}

#[test]
fn test_incremental_snapshot_after_change() -> Result<()> {
    let tmp = tempdir()?;
    let repo_path = tmp.path().join("repo");
    let source_path = tmp.path().join("data");

    std::fs::create_dir_all(&source_path)?;
    write_source_tree(&source_path)?;

    Repository::init_local(&repo_path)?;
    let repo = Repository::open_local(&repo_path)?;
    let source = SourceInfo::new("burrow", "pepe", &source_path.to_string_lossy());

    let s1 = snapshot_path(&repo, &source_path, &source, &[])?;

    std::fs::write(source_path.join("docs/new.txt"), b"freshly added")?;
    let s2 = snapshot_path(&repo, &source_path, &source, &[s1.clone()])?;

    assert_ne!(s1.root_object_id(), s2.root_object_id());
    assert_eq!(s2.stats.non_cached_files, 1);

    Ok(())
}

#[test]
fn test_policy_driven_ignores_end_to_end() -> Result<()> {
    let tmp = tempdir()?;
    let repo_path = tmp.path().join("repo");
    let source_path = tmp.path().join("data");

    std::fs::create_dir_all(&source_path)?;
    std::fs::write(source_path.join("keep.txt"), b"keep")?;
    std::fs::write(source_path.join("junk.tmp"), b"junk")?;
    std::fs::write(source_path.join(".kopiaignore"), b"*.log\n")?;
    std::fs::write(source_path.join("trace.log"), b"ignored by dot file")?;

    Repository::init_local(&repo_path)?;
    let repo = Repository::open_local(&repo_path)?;
    let source = SourceInfo::new("burrow", "pepe", &source_path.to_string_lossy());

    let mut defined = policy::Policy::default();
    defined.files.ignore_rules = vec!["*.tmp".to_string()];
    policy::set_policy(repo.manifests(), &source, &defined)?;

    let manifest = snapshot_path(&repo, &source_path, &source, &[])?;

    assert_eq!(manifest.stats.excluded_file_count, 2);
    let summary = manifest
        .root_entry
        .as_ref()
        .unwrap()
        .summary
        .as_ref()
        .unwrap();
    // keep.txt and the dot-ignore file itself.
    assert_eq!(summary.files, 2);

    Ok(())
}
