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

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::Utc;
use parking_lot::Mutex;

use super::{
    Compression, ContentId, ContentInfo, ContentManager, IterateOptions, decode_payload,
    encode_payload,
};

struct StoredContent {
    encoded: Vec<u8>,
    timestamp: chrono::DateTime<Utc>,
    deleted: bool,
    compression_header_id: Option<u32>,
}

/// In-memory content store used by tests and by ephemeral repositories.
#[derive(Default)]
pub struct MemoryContentStore {
    entries: Mutex<BTreeMap<ContentId, StoredContent>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ContentManager for MemoryContentStore {
    fn write_content(
        &self,
        data: &[u8],
        prefix: Option<char>,
        compression: Option<Compression>,
    ) -> Result<ContentId> {
        let id = ContentId::from_content(data, prefix);
        let mut entries = self.entries.lock();

        if let Some(existing) = entries.get_mut(&id) {
            if existing.deleted {
                existing.deleted = false;
                existing.timestamp = Utc::now();
            }
            return Ok(id);
        }

        let encoded = encode_payload(data, compression)?;
        entries.insert(
            id,
            StoredContent {
                encoded,
                timestamp: Utc::now(),
                deleted: false,
                compression_header_id: compression.map(|c| c.header_id()),
            },
        );

        Ok(id)
    }

    fn read_content(&self, id: &ContentId) -> Result<Vec<u8>> {
        let entries = self.entries.lock();
        match entries.get(id) {
            Some(stored) => Ok(decode_payload(&stored.encoded)?.0),
            None => bail!("Content {id} not found"),
        }
    }

    fn contains(&self, id: &ContentId) -> bool {
        self.entries
            .lock()
            .get(id)
            .is_some_and(|stored| !stored.deleted)
    }

    fn content_info(&self, id: &ContentId) -> Result<ContentInfo> {
        let entries = self.entries.lock();
        match entries.get(id) {
            Some(stored) => Ok(ContentInfo {
                content_id: *id,
                packed_length: stored.encoded.len() as u64,
                timestamp: stored.timestamp,
                deleted: stored.deleted,
                compression_header_id: stored.compression_header_id,
            }),
            None => bail!("Content {id} not found"),
        }
    }

    fn iterate_contents(
        &self,
        options: IterateOptions,
        cb: &mut dyn FnMut(ContentInfo) -> Result<()>,
    ) -> Result<()> {
        let infos: Vec<ContentInfo> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, stored)| options.include_deleted || !stored.deleted)
                .map(|(id, stored)| ContentInfo {
                    content_id: *id,
                    packed_length: stored.encoded.len() as u64,
                    timestamp: stored.timestamp,
                    deleted: stored.deleted,
                    compression_header_id: stored.compression_header_id,
                })
                .collect()
        };

        for info in infos {
            cb(info)?;
        }

        Ok(())
    }

    fn delete_content(&self, id: &ContentId) -> Result<()> {
        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            Some(stored) => {
                stored.deleted = true;
                Ok(())
            }
            None => bail!("Content {id} not found"),
        }
    }

    fn undelete_content(&self, id: &ContentId) -> Result<()> {
        let mut entries = self.entries.lock();
        match entries.get_mut(id) {
            Some(stored) => {
                stored.deleted = false;
                Ok(())
            }
            None => bail!("Content {id} not found"),
        }
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
