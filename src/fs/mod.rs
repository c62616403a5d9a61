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

pub mod local;
pub mod memory;

use std::io::{Read, Seek};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Metadata common to every filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    /// Permission bits (lower 12 bits of the POSIX mode).
    pub mode: u32,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub uid: u32,
    pub gid: u32,
    /// Creation time, when the underlying filesystem exposes one.
    pub birth_time: Option<DateTime<Utc>>,
}

/// A regular file that can be opened for reading. `open` returns an
/// independent reader each time, so concurrent section reads of the same
/// file do not interfere.
pub trait File: Send + Sync {
    fn metadata(&self) -> &Metadata;
    fn open(&self) -> Result<Box<dyn ReadSeek>>;
}

/// A directory that can enumerate its children. Children are produced in
/// lexicographical order by name. The iterator may be lazy: implementations
/// backed by virtual sources are never materialized in full.
pub trait Directory: Send + Sync {
    fn metadata(&self) -> &Metadata;
    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>>;
}

pub trait Symlink: Send + Sync {
    fn metadata(&self) -> &Metadata;
    fn readlink(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEntryKind {
    /// The entry exists but is of a type the engine does not snapshot
    /// (sockets, device nodes, ...).
    UnknownType,
    /// The entry could not be read (stat/readdir failure).
    Other,
}

/// A child that could not be enumerated. Reporting failures as entries lets
/// directory iteration continue past them, which is what makes partial
/// snapshots possible.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub name: String,
    pub kind: ErrorEntryKind,
    pub message: String,
}

#[derive(Clone)]
pub enum Entry {
    File(Arc<dyn File>),
    Directory(Arc<dyn Directory>),
    Symlink(Arc<dyn Symlink>),
    Error(ErrorEntry),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File(f) => &f.metadata().name,
            Entry::Directory(d) => &d.metadata().name,
            Entry::Symlink(s) => &s.metadata().name,
            Entry::Error(e) => &e.name,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Entry::File(f) => Some(f.metadata()),
            Entry::Directory(d) => Some(d.metadata()),
            Entry::Symlink(s) => Some(s.metadata()),
            Entry::Error(_) => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Entry::Directory(_))
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entry::File(e) => write!(f, "File({})", e.metadata().name),
            Entry::Directory(e) => write!(f, "Directory({})", e.metadata().name),
            Entry::Symlink(e) => write!(f, "Symlink({})", e.metadata().name),
            Entry::Error(e) => write!(f, "Error({}, {:?})", e.name, e.kind),
        }
    }
}
