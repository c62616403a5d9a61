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

//! Read-only virtual filesystem over the manifest store:
//! `/<user@host>/<path>/<snaptime>` resolves to the snapshot's root
//! directory, with every node materialized on demand from the object
//! store. Overlay nodes implement the same `fs` traits the uploader
//! consumes, so snapshots can be walked, restored or even re-uploaded.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::fs::{Directory, Entry, File, Metadata, ReadSeek, Symlink};
use crate::object::ObjectId;
use crate::repo::Repository;
use crate::snapshot::{DirEntry, DirManifest, EntryType, Manifest, store};

/// Root of the overlay: one child per distinct `user@host`.
pub fn repository_root(repo: Arc<Repository>) -> Arc<dyn Directory> {
    Arc::new(AllSourcesDirectory {
        metadata: virtual_metadata("/"),
        repo,
    })
}

fn virtual_metadata(name: &str) -> Metadata {
    Metadata {
        name: name.to_string(),
        mode: 0o555,
        size: 0,
        mtime: Utc::now(),
        uid: 0,
        gid: 0,
        birth_time: None,
    }
}

fn metadata_from_entry(entry: &DirEntry) -> Metadata {
    Metadata {
        name: entry.name.clone(),
        mode: entry.mode.0,
        size: entry.size,
        mtime: entry.mtime,
        uid: entry.uid,
        gid: entry.gid,
        birth_time: entry.birth_time,
    }
}

/// Name of a snapshot node: start time plus the incomplete reason.
fn snapshot_node_name(manifest: &Manifest) -> String {
    let base = manifest.start_time.format("%Y%m%d-%H%M%S").to_string();
    match &manifest.incomplete_reason {
        Some(reason) => format!("{base} ({reason})"),
        None => base,
    }
}

struct AllSourcesDirectory {
    metadata: Metadata,
    repo: Arc<Repository>,
}

impl Directory for AllSourcesDirectory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>> {
        let mut children: BTreeMap<String, Entry> = BTreeMap::new();

        for source in store::list_sources(self.repo.manifests()) {
            let name = format!("{}@{}", source.user, source.host);
            children.entry(name.clone()).or_insert_with(|| {
                Entry::Directory(Arc::new(UserHostDirectory {
                    metadata: virtual_metadata(&name),
                    repo: self.repo.clone(),
                    host: source.host.clone(),
                    user: source.user.clone(),
                }))
            });
        }

        Ok(Box::new(children.into_values()))
    }
}

struct UserHostDirectory {
    metadata: Metadata,
    repo: Arc<Repository>,
    host: String,
    user: String,
}

impl Directory for UserHostDirectory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>> {
        let mut children: BTreeMap<String, Entry> = BTreeMap::new();

        for source in store::list_sources(self.repo.manifests()) {
            if source.host != self.host || source.user != self.user {
                continue;
            }

            let name = source.path.replace('/', "_");
            children.entry(name.clone()).or_insert_with(|| {
                Entry::Directory(Arc::new(SourceDirectory {
                    metadata: virtual_metadata(&name),
                    repo: self.repo.clone(),
                    source: source.clone(),
                }))
            });
        }

        Ok(Box::new(children.into_values()))
    }
}

struct SourceDirectory {
    metadata: Metadata,
    repo: Arc<Repository>,
    source: crate::snapshot::SourceInfo,
}

impl Directory for SourceDirectory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>> {
        let mut manifests = store::list_snapshots(self.repo.manifests(), Some(&self.source));
        store::sort_by_time(&mut manifests, false);

        let mut children: BTreeMap<String, Entry> = BTreeMap::new();

        for manifest in manifests {
            let Some(root) = manifest.root_entry.clone() else {
                continue;
            };

            let mut name = snapshot_node_name(&manifest);
            let mut suffix = 1;
            while children.contains_key(&name) {
                suffix += 1;
                name = format!("{} ({})", snapshot_node_name(&manifest), suffix);
            }

            let mut metadata = metadata_from_entry(&root);
            metadata.name = name.clone();
            metadata.mtime = manifest.start_time;

            children.insert(
                name,
                Entry::Directory(Arc::new(ObjectDirectory {
                    metadata,
                    repo: self.repo.clone(),
                    object_id: root.object_id,
                })),
            );
        }

        Ok(Box::new(children.into_values()))
    }
}

/// A serialized directory materialized on demand.
pub struct ObjectDirectory {
    metadata: Metadata,
    repo: Arc<Repository>,
    object_id: ObjectId,
}

impl ObjectDirectory {
    pub fn from_entry(repo: Arc<Repository>, entry: &DirEntry) -> Arc<Self> {
        Arc::new(Self {
            metadata: metadata_from_entry(entry),
            repo,
            object_id: entry.object_id,
        })
    }
}

impl Directory for ObjectDirectory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>> {
        let raw = self
            .repo
            .objects()
            .read_object(&self.object_id)
            .with_context(|| format!("Could not load directory object {}", self.object_id))?;
        let manifest = DirManifest::from_bytes(&raw)?;

        let repo = self.repo.clone();
        Ok(Box::new(manifest.entries.into_iter().map(move |entry| {
            object_entry(repo.clone(), entry)
        })))
    }
}

fn object_entry(repo: Arc<Repository>, entry: DirEntry) -> Entry {
    match entry.entry_type {
        EntryType::Directory => Entry::Directory(ObjectDirectory::from_entry(repo, &entry)),
        EntryType::Symlink => Entry::Symlink(Arc::new(ObjectSymlink {
            metadata: metadata_from_entry(&entry),
            repo,
            object_id: entry.object_id,
        })),
        EntryType::File | EntryType::Unknown => Entry::File(Arc::new(ObjectFile {
            metadata: metadata_from_entry(&entry),
            repo,
            object_id: entry.object_id,
        })),
    }
}

pub struct ObjectFile {
    metadata: Metadata,
    repo: Arc<Repository>,
    object_id: ObjectId,
}

impl File for ObjectFile {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn open(&self) -> Result<Box<dyn ReadSeek>> {
        Ok(Box::new(self.repo.objects().open_reader(&self.object_id)?))
    }
}

pub struct ObjectSymlink {
    metadata: Metadata,
    repo: Arc<Repository>,
    object_id: ObjectId,
}

impl Symlink for ObjectSymlink {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn readlink(&self) -> Result<String> {
        let raw = self.repo.objects().read_object(&self.object_id)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs;
    use crate::fs::memory::MemDirectory;
    use crate::policy::{self, PolicyTree};
    use crate::snapshot::SourceInfo;
    use crate::uploader::Uploader;
    use std::io::Read;

    fn snapshot(repo: &Arc<Repository>, root: &Arc<MemDirectory>, path: &str) -> Manifest {
        let uploader = Uploader::new(repo.clone());
        let mut manifest = uploader
            .upload(
                fs::Entry::Directory(root.clone() as Arc<dyn fs::Directory>),
                &PolicyTree::for_policy(policy::default_policy()),
                SourceInfo::new("burrow", "pepe", path),
                &[],
            )
            .unwrap();
        store::save_snapshot(repo.manifests(), &mut manifest).unwrap();
        manifest
    }

    fn child(dir: &Arc<dyn Directory>, name: &str) -> Entry {
        dir.entries()
            .unwrap()
            .find(|e| e.name() == name)
            .unwrap_or_else(|| panic!("no child named '{name}'"))
    }

    #[test]
    fn test_overlay_hierarchy() -> Result<()> {
        let repo = Repository::new_in_memory();

        let root = Arc::new(MemDirectory::new("data"));
        root.add_file("hello.txt", b"hello overlay".as_slice());
        let sub = root.add_dir("sub");
        sub.add_file("nested.txt", b"nested".as_slice());
        root.add_symlink("link", "hello.txt");

        let manifest = snapshot(&repo, &root, "/home/pepe/data");

        let overlay = repository_root(repo.clone());

        let names: Vec<String> = overlay
            .entries()?
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["pepe@burrow"]);

        let Entry::Directory(user_host) = child(&overlay, "pepe@burrow") else {
            panic!("expected a directory");
        };
        let names: Vec<String> = user_host
            .entries()?
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["_home_pepe_data"]);

        let Entry::Directory(source_dir) = child(&user_host, "_home_pepe_data") else {
            panic!("expected a directory");
        };
        let snap_name = manifest.start_time.format("%Y%m%d-%H%M%S").to_string();
        let Entry::Directory(snap_root) = child(&source_dir, &snap_name) else {
            panic!("expected the snapshot directory");
        };

        // Files resolve through the object store.
        let Entry::File(file) = child(&snap_root, "hello.txt") else {
            panic!("expected a file");
        };
        let mut contents = Vec::new();
        file.open()?.read_to_end(&mut contents)?;
        assert_eq!(contents, b"hello overlay");

        // Nested directories materialize on demand.
        let Entry::Directory(sub) = child(&snap_root, "sub") else {
            panic!("expected a directory");
        };
        let Entry::File(nested) = child(&sub, "nested.txt") else {
            panic!("expected a file");
        };
        assert_eq!(nested.metadata().size, 6);

        // Symlinks expose their target.
        let Entry::Symlink(link) = child(&snap_root, "link") else {
            panic!("expected a symlink");
        };
        assert_eq!(link.readlink()?, "hello.txt");

        Ok(())
    }

    #[test]
    fn test_incomplete_snapshots_carry_reason_suffix() -> Result<()> {
        let repo = Repository::new_in_memory();

        let root = Arc::new(MemDirectory::new("data"));
        root.add_file("f", b"x".as_slice());

        let uploader = Uploader::new(repo.clone());
        uploader.cancel();
        let mut manifest = uploader.upload(
            fs::Entry::Directory(root.clone() as Arc<dyn fs::Directory>),
            &PolicyTree::for_policy(policy::default_policy()),
            SourceInfo::new("burrow", "pepe", "/data"),
            &[],
        )?;
        store::save_snapshot(repo.manifests(), &mut manifest)?;

        let overlay = repository_root(repo.clone());
        let Entry::Directory(user_host) = child(&overlay, "pepe@burrow") else {
            panic!();
        };
        let Entry::Directory(source_dir) = child(&user_host, "_data") else {
            panic!();
        };

        let names: Vec<String> = source_dir
            .entries()?
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(" (cancelled)"), "got '{}'", names[0]);

        Ok(())
    }
}
