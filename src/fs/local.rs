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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::{Directory, Entry, ErrorEntry, ErrorEntryKind, File, Metadata, ReadSeek, Symlink};

/// Builds an `Entry` for a local path without following symlinks.
pub fn entry_from_path(path: &Path) -> Result<Entry> {
    let meta = std::fs::symlink_metadata(path)
        .with_context(|| format!("Cannot stat {}", path.display()))?;
    let metadata = metadata_from(path, &meta);

    let file_type = meta.file_type();
    if file_type.is_file() {
        Ok(Entry::File(Arc::new(LocalFile {
            path: path.to_path_buf(),
            metadata,
        })))
    } else if file_type.is_dir() {
        Ok(Entry::Directory(Arc::new(LocalDirectory {
            path: path.to_path_buf(),
            metadata,
        })))
    } else if file_type.is_symlink() {
        Ok(Entry::Symlink(Arc::new(LocalSymlink {
            path: path.to_path_buf(),
            metadata,
        })))
    } else {
        Ok(Entry::Error(ErrorEntry {
            name: metadata.name,
            kind: ErrorEntryKind::UnknownType,
            message: format!("unsupported file type at {}", path.display()),
        }))
    }
}

fn metadata_from(path: &Path, meta: &std::fs::Metadata) -> Metadata {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mtime: DateTime<Utc> = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let birth_time = meta.created().ok().map(DateTime::<Utc>::from);

    #[cfg(unix)]
    let (mode, uid, gid) = {
        use std::os::unix::fs::MetadataExt;
        (meta.mode() & 0o7777, meta.uid(), meta.gid())
    };

    #[cfg(not(unix))]
    let (mode, uid, gid) = (0o644, 0, 0);

    Metadata {
        name,
        mode,
        size: if meta.is_file() { meta.len() } else { 0 },
        mtime,
        uid,
        gid,
        birth_time,
    }
}

struct LocalFile {
    path: PathBuf,
    metadata: Metadata,
}

impl File for LocalFile {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn open(&self) -> Result<Box<dyn ReadSeek>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Cannot open {}", self.path.display()))?;
        Ok(Box::new(file))
    }
}

struct LocalDirectory {
    path: PathBuf,
    metadata: Metadata,
}

impl Directory for LocalDirectory {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn entries(&self) -> Result<Box<dyn Iterator<Item = Entry> + Send>> {
        let read_dir = std::fs::read_dir(&self.path)
            .with_context(|| format!("Cannot read {}", self.path.display()))?;

        let mut children: Vec<PathBuf> = Vec::new();
        for child in read_dir {
            match child {
                Ok(dirent) => children.push(dirent.path()),
                Err(e) => {
                    // A failed dirent has no name we can report; surface it
                    // under a placeholder so the failure is still counted.
                    return Ok(Box::new(std::iter::once(Entry::Error(ErrorEntry {
                        name: String::from("."),
                        kind: ErrorEntryKind::Other,
                        message: e.to_string(),
                    }))));
                }
            }
        }
        children.sort_by(|first, second| first.file_name().cmp(&second.file_name()));

        Ok(Box::new(children.into_iter().map(|path| {
            match entry_from_path(&path) {
                Ok(entry) => entry,
                Err(e) => Entry::Error(ErrorEntry {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    kind: ErrorEntryKind::Other,
                    message: e.to_string(),
                }),
            }
        })))
    }
}

struct LocalSymlink {
    path: PathBuf,
    metadata: Metadata,
}

impl Symlink for LocalSymlink {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn readlink(&self) -> Result<String> {
        let target = std::fs::read_link(&self.path)
            .with_context(|| format!("Cannot read link {}", self.path.display()))?;
        Ok(target.to_string_lossy().into_owned())
    }
}
