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

pub mod splitter;

use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::content::{Compression, ContentId, ContentManager};
use splitter::{IncrementalSplitter, SplitterConfig};

const INDIRECT_STREAM_TYPE: &str = "kopia:indirect";

/// Content-addressed identifier of an immutable byte stream. A direct
/// object is a single content; an indirect object is an index content
/// listing the sections that make up the stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Direct(ContentId),
    Indirect(ContentId),
}

impl ObjectId {
    pub fn parse(s: &str) -> Result<Self> {
        match s.strip_prefix('I') {
            Some(rest) => Ok(ObjectId::Indirect(ContentId::parse(rest)?)),
            None => Ok(ObjectId::Direct(ContentId::parse(s)?)),
        }
    }

    pub fn content_id(&self) -> &ContentId {
        match self {
            ObjectId::Direct(id) | ObjectId::Indirect(id) => id,
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, ObjectId::Indirect(_))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Direct(id) => write!(f, "{id}"),
            ObjectId::Indirect(id) => write!(f, "I{id}"),
        }
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One section of an indirect object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndirectEntry {
    #[serde(rename = "s")]
    pub start: u64,
    #[serde(rename = "l")]
    pub length: u64,
    #[serde(rename = "o")]
    pub object: ObjectId,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndirectIndex {
    stream: String,
    entries: Vec<IndirectEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// For diagnostics only.
    pub description: String,
    pub splitter: SplitterConfig,
    pub compression: Option<Compression>,
}

impl WriteOptions {
    pub fn for_metadata(compression: Option<Compression>) -> Self {
        Self {
            description: String::from("metadata"),
            splitter: SplitterConfig::default(),
            compression,
        }
    }
}

/// Object layer over the content store: absorbs byte streams, cuts them
/// into contents and resolves object IDs back into readable streams.
#[derive(Clone)]
pub struct ObjectStore {
    contents: Arc<dyn ContentManager>,
}

impl ObjectStore {
    pub fn new(contents: Arc<dyn ContentManager>) -> Self {
        Self { contents }
    }

    pub fn contents(&self) -> &Arc<dyn ContentManager> {
        &self.contents
    }

    pub fn open_writer(&self, options: WriteOptions) -> ObjectWriter {
        ObjectWriter {
            store: self.clone(),
            splitter: IncrementalSplitter::new(options.splitter),
            options,
            buffer: Vec::new(),
            chunks: Vec::new(),
        }
    }

    /// Writes a complete in-memory payload and returns its object ID.
    pub fn write_object(&self, data: &[u8], options: WriteOptions) -> Result<ObjectId> {
        let mut writer = self.open_writer(options);
        writer.write_all(data)?;
        writer.result()
    }

    /// Combines independently written section objects into one indirect
    /// object. Used for parallel uploads of large files.
    pub fn stitch_sections(&self, entries: Vec<IndirectEntry>) -> Result<ObjectId> {
        let index = IndirectIndex {
            stream: INDIRECT_STREAM_TYPE.to_string(),
            entries,
        };
        let payload = serde_json::to_vec(&index)?;
        let id = self
            .contents
            .write_content(&payload, None, Some(Compression::zstd_default()))?;
        Ok(ObjectId::Indirect(id))
    }

    fn load_index(&self, id: &ContentId) -> Result<Vec<IndirectEntry>> {
        let payload = self
            .contents
            .read_content(id)
            .with_context(|| format!("Could not load indirect index {id}"))?;
        let index: IndirectIndex = serde_json::from_slice(&payload)?;

        if index.stream != INDIRECT_STREAM_TYPE {
            bail!("Content {id} is not an indirect index");
        }

        Ok(index.entries)
    }

    pub fn open_reader(&self, id: &ObjectId) -> Result<ObjectReader> {
        let entries = match id {
            // The real length of a direct object is only known once its
            // content is loaded; until then it carries a placeholder.
            ObjectId::Direct(cid) => vec![IndirectEntry {
                start: 0,
                length: u64::MAX,
                object: ObjectId::Direct(*cid),
            }],
            ObjectId::Indirect(cid) => self.load_index(cid)?,
        };

        Ok(ObjectReader {
            store: self.clone(),
            entries,
            entry_index: 0,
            current: None,
            position: 0,
        })
    }

    /// Reads a whole object into memory.
    pub fn read_object(&self, id: &ObjectId) -> Result<Vec<u8>> {
        match id {
            ObjectId::Direct(cid) => self.contents.read_content(cid),
            ObjectId::Indirect(_) => {
                let mut reader = self.open_reader(id)?;
                let mut data = Vec::new();
                reader.read_to_end(&mut data)?;
                Ok(data)
            }
        }
    }

    /// Checks that every content composing the object is present and
    /// returns the full list of underlying content IDs, index contents
    /// included.
    pub fn verify_object(&self, id: &ObjectId) -> Result<Vec<ContentId>> {
        let mut ids = Vec::new();
        self.verify_into(id, &mut ids)?;
        Ok(ids)
    }

    fn verify_into(&self, id: &ObjectId, out: &mut Vec<ContentId>) -> Result<()> {
        match id {
            ObjectId::Direct(cid) => {
                self.contents
                    .content_info(cid)
                    .with_context(|| format!("Object {id} is missing content {cid}"))?;
                out.push(*cid);
            }
            ObjectId::Indirect(cid) => {
                out.push(*cid);
                for entry in self.load_index(cid)? {
                    self.verify_into(&entry.object, out)?;
                }
            }
        }

        Ok(())
    }
}

/// Absorbs a byte stream and produces an object ID on `result`.
pub struct ObjectWriter {
    store: ObjectStore,
    options: WriteOptions,
    splitter: IncrementalSplitter,
    buffer: Vec<u8>,
    chunks: Vec<(ContentId, u64)>,
}

impl ObjectWriter {
    fn emit_ready(&mut self, eof: bool) -> Result<()> {
        let store = self.store.clone();
        let compression = self.options.compression;
        let chunks = &mut self.chunks;

        self.splitter
            .push(&mut self.buffer, eof, &mut |chunk: &[u8]| {
                let id = store.contents().write_content(chunk, None, compression)?;
                chunks.push((id, chunk.len() as u64));
                Ok(())
            })
    }

    /// Finishes the stream and returns the object ID.
    pub fn result(mut self) -> Result<ObjectId> {
        self.emit_ready(true)?;

        match self.chunks.len() {
            0 => {
                let id = self
                    .store
                    .contents()
                    .write_content(&[], None, None)?;
                Ok(ObjectId::Direct(id))
            }
            1 => Ok(ObjectId::Direct(self.chunks[0].0)),
            _ => {
                let mut entries = Vec::with_capacity(self.chunks.len());
                let mut start = 0u64;
                for (id, length) in &self.chunks {
                    entries.push(IndirectEntry {
                        start,
                        length: *length,
                        object: ObjectId::Direct(*id),
                    });
                    start += length;
                }
                self.store.stitch_sections(entries)
            }
        }
    }
}

impl Write for ObjectWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        self.emit_ready(false)
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sequential (and seekable) reader over an object's sections. Sections are
/// loaded on demand, one at a time.
pub struct ObjectReader {
    store: ObjectStore,
    entries: Vec<IndirectEntry>,
    entry_index: usize,
    current: Option<Cursor<Vec<u8>>>,
    position: u64,
}

impl ObjectReader {
    fn total_length(&mut self) -> io::Result<u64> {
        // Direct objects get a placeholder length until loaded.
        if self.entries.len() == 1 && self.entries[0].length == u64::MAX {
            self.load_entry(0)?;
        }

        Ok(self
            .entries
            .last()
            .map(|e| e.start + e.length)
            .unwrap_or(0))
    }

    fn load_entry(&mut self, index: usize) -> io::Result<()> {
        let entry = &self.entries[index];
        let data = self
            .store
            .read_object(&entry.object)
            .map_err(|e| io::Error::other(e.to_string()))?;

        // Fix up the placeholder length of unmaterialized direct objects.
        if self.entries[index].length == u64::MAX {
            self.entries[index].length = data.len() as u64;
        }

        self.current = Some(Cursor::new(data));
        self.entry_index = index;
        Ok(())
    }
}

impl Read for ObjectReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(cursor) = &mut self.current {
                let n = cursor.read(buf)?;
                if n > 0 {
                    self.position += n as u64;
                    return Ok(n);
                }
                self.entry_index += 1;
                self.current = None;
            }

            if self.entry_index >= self.entries.len() {
                return Ok(0);
            }

            self.load_entry(self.entry_index)?;
        }
    }
}

impl Seek for ObjectReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::End(delta) => {
                let len = self.total_length()?;
                len.checked_add_signed(delta)
                    .ok_or_else(|| io::Error::other("seek before start"))?
            }
            SeekFrom::Current(delta) => self
                .position
                .checked_add_signed(delta)
                .ok_or_else(|| io::Error::other("seek before start"))?,
        };

        if self.entries.len() == 1 && self.entries[0].length == u64::MAX {
            self.load_entry(0)?;
        }

        match self
            .entries
            .iter()
            .position(|e| target < e.start + e.length)
        {
            Some(i) => {
                if self.entry_index != i || self.current.is_none() {
                    self.load_entry(i)?;
                }
                let within = target - self.entries[i].start;
                self.current
                    .as_mut()
                    .expect("entry was just loaded")
                    .set_position(within);
            }
            None => {
                // Seek at or past the end: subsequent reads return 0 bytes.
                self.entry_index = self.entries.len();
                self.current = None;
            }
        }

        self.position = target;
        Ok(target)
    }
}
