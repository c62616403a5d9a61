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

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};

use super::{
    Compression, ContentId, ContentInfo, ContentManager, IterateOptions, decode_payload,
    encode_payload,
};

const CONTENTS_DIR: &str = "contents";
const DELETED_SUFFIX: &str = ".deleted";

const CONTENTS_DIR_FANOUT: usize = 2;

/// Content store backed by a local directory. Contents are stored one file
/// per blob under `contents/<first two hash hex chars>/<content id>`;
/// deletion marks a blob by renaming it with a `.deleted` suffix so that
/// un-deletion is a rename back and both operations are idempotent.
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    /// Creates the directory structure for a new store.
    pub fn create(root: &Path) -> Result<Self> {
        let contents_path = root.join(CONTENTS_DIR);
        if contents_path.exists() {
            bail!(
                "A content store already exists at {}",
                contents_path.display()
            );
        }

        let num_folders: usize = 1 << (4 * CONTENTS_DIR_FANOUT);
        for n in 0..num_folders {
            std::fs::create_dir_all(contents_path.join(format!("{n:0>CONTENTS_DIR_FANOUT$x}")))?;
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Opens an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.join(CONTENTS_DIR).is_dir() {
            bail!("No content store found at {}", root.display());
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn content_path(&self, id: &ContentId) -> PathBuf {
        let fanout = id.hash().to_short_hex(CONTENTS_DIR_FANOUT / 2);
        self.root
            .join(CONTENTS_DIR)
            .join(fanout)
            .join(id.to_string())
    }

    /// Resolves the live or deleted file for a content, whichever exists.
    fn locate(&self, id: &ContentId) -> Option<(PathBuf, bool)> {
        let live = self.content_path(id);
        if live.is_file() {
            return Some((live, false));
        }

        let deleted = deleted_path(&live);
        if deleted.is_file() {
            return Some((deleted, true));
        }

        None
    }

    fn save_with_rename(&self, path: &Path, data: &[u8]) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn info_for(&self, path: &Path, id: &ContentId, deleted: bool) -> Result<ContentInfo> {
        let meta = std::fs::metadata(path)?;
        let timestamp: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let mut header = [0u8; 1];
        {
            use std::io::Read;
            let mut file = std::fs::File::open(path)?;
            file.read_exact(&mut header)?;
        }

        Ok(ContentInfo {
            content_id: *id,
            packed_length: meta.len(),
            timestamp,
            deleted,
            compression_header_id: match header[0] {
                0 => None,
                h => Some(h as u32),
            },
        })
    }
}

fn deleted_path(live: &Path) -> PathBuf {
    let mut name = live.file_name().unwrap_or_default().to_os_string();
    name.push(DELETED_SUFFIX);
    live.with_file_name(name)
}

impl ContentManager for LocalDirStore {
    fn write_content(
        &self,
        data: &[u8],
        prefix: Option<char>,
        compression: Option<Compression>,
    ) -> Result<ContentId> {
        let id = ContentId::from_content(data, prefix);

        match self.locate(&id) {
            Some((_, false)) => return Ok(id),
            Some((path, true)) => {
                // Revive with a fresh timestamp.
                std::fs::remove_file(&path)?;
            }
            None => {}
        }

        let path = self.content_path(&id);
        let encoded = encode_payload(data, compression)?;
        self.save_with_rename(&path, &encoded)
            .with_context(|| format!("Could not save content {id}"))?;

        Ok(id)
    }

    fn read_content(&self, id: &ContentId) -> Result<Vec<u8>> {
        match self.locate(id) {
            Some((path, _)) => {
                let encoded = std::fs::read(&path)
                    .with_context(|| format!("Could not read content {id}"))?;
                Ok(decode_payload(&encoded)?.0)
            }
            None => bail!("Content {id} not found"),
        }
    }

    fn contains(&self, id: &ContentId) -> bool {
        matches!(self.locate(id), Some((_, false)))
    }

    fn content_info(&self, id: &ContentId) -> Result<ContentInfo> {
        match self.locate(id) {
            Some((path, deleted)) => self.info_for(&path, id, deleted),
            None => bail!("Content {id} not found"),
        }
    }

    fn iterate_contents(
        &self,
        options: IterateOptions,
        cb: &mut dyn FnMut(ContentInfo) -> Result<()>,
    ) -> Result<()> {
        let contents_path = self.root.join(CONTENTS_DIR);

        let mut fanout_dirs: Vec<PathBuf> = std::fs::read_dir(&contents_path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        fanout_dirs.sort();

        for dir in fanout_dirs {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();

            for path in files {
                let file_name = path.file_name().unwrap_or_default().to_string_lossy();

                let (id_str, deleted) = match file_name.strip_suffix(DELETED_SUFFIX) {
                    Some(stripped) => (stripped.to_string(), true),
                    None => (file_name.into_owned(), false),
                };

                if deleted && !options.include_deleted {
                    continue;
                }

                // Temporary files from interrupted writes are not contents.
                let Ok(id) = ContentId::parse(&id_str) else {
                    continue;
                };

                cb(self.info_for(&path, &id, deleted)?)?;
            }
        }

        Ok(())
    }

    fn delete_content(&self, id: &ContentId) -> Result<()> {
        match self.locate(id) {
            Some((path, false)) => {
                std::fs::rename(&path, deleted_path(&path))?;
                Ok(())
            }
            Some((_, true)) => Ok(()),
            None => bail!("Content {id} not found"),
        }
    }

    fn undelete_content(&self, id: &ContentId) -> Result<()> {
        let live = self.content_path(id);
        match self.locate(id) {
            Some((path, true)) => {
                std::fs::rename(&path, &live)?;
                Ok(())
            }
            Some((_, false)) => Ok(()),
            None => bail!("Content {id} not found"),
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
