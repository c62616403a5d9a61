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

//! In-memory filesystem entries. Used by tests to build deterministic
//! trees, and by `StreamingDirectory` to feed lazily produced children
//! into the uploader without ever materializing the full listing.

use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

use super::{Directory, Entry, File, Metadata, ReadSeek, Symlink};

fn default_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

fn base_metadata(name: &str, mode: u32, size: u64) -> Metadata {
    Metadata {
        name: name.to_string(),
        mode,
        size,
        mtime: default_time(),
        uid: 1000,
        gid: 1000,
        birth_time: None,
    }
}

pub struct MemFile {
    metadata: Metadata,
    content: Vec<u8>,
}

impl MemFile {
    pub fn new(name: &str, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        Self {
            metadata: base_metadata(name, 0o644, content.len() as u64),
            content,
        }
    }

    pub fn with_mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.metadata.mtime = mtime;
        self
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.metadata.mode = mode;
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.metadata.uid = uid;
        self.metadata.gid = gid;
        self
    }

    pub fn with_birth_time(mut self, birth_time: DateTime<Utc>) -> Self {
        self.metadata.birth_time = Some(birth_time);
        self
    }
}

impl File for MemFile {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn open(&self) -> Result<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(self.content.clone())))
    }
}

pub struct MemSymlink {
    metadata: Metadata,
    target: String,
}

impl MemSymlink {
    pub fn new(name: &str, target: &str) -> Self {
        Self {
            metadata: base_metadata(name, 0o777, target.len() as u64),
            target: target.to_string(),
        }
    }
}

impl Symlink for MemSymlink {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn readlink(&self) -> Result<String> {
        Ok(self.target.clone())
    }
}

/// A directory whose children live in memory. Mutable so tests can grow a
/// tree between uploads; children are kept sorted by name.
pub struct MemDirectory {
    metadata: Metadata,
    children: RwLock<Vec<Entry>>,
}

impl MemDirectory {
    pub fn new(name: &str) -> Self {
        Self {
            metadata: base_metadata(name, 0o755, 0),
            children: RwLock::new(Vec::new()),
        }
    }

    pub fn with_mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.metadata.mtime = mtime;
        self
    }

    pub fn add(&self, entry: Entry) {
        let mut children = self.children.write();
        children.push(entry);
        children.sort_by(|first, second| first.name().cmp(second.name()));
    }

    pub fn add_file(&self, name: &str, content: impl Into<Vec<u8>>) {
        self.add(Entry::File(Arc::new(MemFile::new(name, content))));
    }

    pub fn add_symlink(&self, name: &str, target: &str) {
        self.add(Entry::Symlink(Arc::new(MemSymlink::new(name, target))));
    }

    /// Adds an empty subdirectory and returns it for further population.
    pub fn add_dir(&self, name: &str) -> Arc<MemDirectory> {
        let dir = Arc::new(MemDirectory::new(name));
        self.add(Entry::Directory(dir.clone()));
        dir
    }

    pub fn remove(&self, name: &str) {
        self.children.write().retain(|e| e.name() != name);
    }
}

impl Directory for MemDirectory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>> {
        let children = self.children.read().clone();
        Ok(Box::new(children.into_iter()))
    }
}

type EntryIterFactory =
    Box<dyn Fn() -> Box<dyn Iterator<Item = Entry> + Send> + Send + Sync>;

/// A directory whose children come from a lazily invoked iterator factory.
/// The uploader streams these entries through its directory builder one at
/// a time, so memory use stays linear in the directory depth, not in the
/// number of children.
pub struct StreamingDirectory {
    metadata: Metadata,
    factory: EntryIterFactory,
}

impl StreamingDirectory {
    pub fn new(name: &str, factory: EntryIterFactory) -> Self {
        Self {
            metadata: base_metadata(name, 0o755, 0),
            factory,
        }
    }
}

impl Directory for StreamingDirectory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>> {
        Ok((self.factory)())
    }
}
