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

pub mod localdir;
pub mod memory;

use std::fmt;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::global::ID;

/// Namespace prefix for contents holding labeled manifests. The garbage
/// collector treats these as system contents and never sweeps them.
pub const MANIFEST_CONTENT_PREFIX: char = 'm';

/// Identifier of a low-level blob inside the content store. The hash part
/// is always computed over the plaintext content, because encoding at rest
/// (compression headers) would otherwise change the ID and ruin the
/// deduplication.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    prefix: Option<char>,
    hash: ID,
}

impl ContentId {
    pub fn new(hash: ID) -> Self {
        Self { prefix: None, hash }
    }

    pub fn with_prefix(prefix: char, hash: ID) -> Self {
        Self {
            prefix: Some(prefix),
            hash,
        }
    }

    pub fn from_content(data: &[u8], prefix: Option<char>) -> Self {
        Self {
            prefix,
            hash: ID::from_content(data),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (prefix, hex) = match s.chars().next() {
            Some(c) if c.is_ascii_alphabetic() && !c.is_ascii_hexdigit() => {
                (Some(c), &s[c.len_utf8()..])
            }
            Some(_) => (None, s),
            None => bail!("Empty content ID"),
        };

        Ok(Self {
            prefix,
            hash: ID::from_hex(hex).with_context(|| format!("Invalid content ID '{s}'"))?,
        })
    }

    pub fn prefix(&self) -> Option<char> {
        self.prefix
    }

    pub fn hash(&self) -> &ID {
        &self.hash
    }

    pub fn has_manifest_prefix(&self) -> bool {
        self.prefix == Some(MANIFEST_CONTENT_PREFIX)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = self.prefix {
            write!(f, "{prefix}")?;
        }
        write!(f, "{}", self.hash)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// How a content is encoded at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zstd { level: i32 },
}

impl Compression {
    pub fn zstd_default() -> Self {
        Compression::Zstd {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub fn header_id(&self) -> u32 {
        match self {
            Compression::Zstd { .. } => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentInfo {
    pub content_id: ContentId,
    /// Size as stored, after encoding.
    pub packed_length: u64,
    pub timestamp: DateTime<Utc>,
    pub deleted: bool,
    pub compression_header_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IterateOptions {
    pub include_deleted: bool,
}

/// Contract with the low-level content store. Implementations must be safe
/// to share across the uploader's worker threads.
pub trait ContentManager: Send + Sync {
    /// Stores a blob and returns its content-addressed ID. Writing bytes
    /// that already exist is a no-op returning the same ID; writing a
    /// previously deleted content revives it.
    fn write_content(
        &self,
        data: &[u8],
        prefix: Option<char>,
        compression: Option<Compression>,
    ) -> Result<ContentId>;

    fn read_content(&self, id: &ContentId) -> Result<Vec<u8>>;

    fn contains(&self, id: &ContentId) -> bool;

    fn content_info(&self, id: &ContentId) -> Result<ContentInfo>;

    /// Iterates over all contents. Deleted contents are visited only when
    /// `options.include_deleted` is set.
    fn iterate_contents(
        &self,
        options: IterateOptions,
        cb: &mut dyn FnMut(ContentInfo) -> Result<()>,
    ) -> Result<()>;

    /// Marks a content as deleted. Idempotent.
    fn delete_content(&self, id: &ContentId) -> Result<()>;

    /// Clears the deleted mark from a content. Idempotent.
    fn undelete_content(&self, id: &ContentId) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// Encodes a payload for storage: a one-byte compression header followed by
/// the (possibly compressed) payload.
pub(crate) fn encode_payload(data: &[u8], compression: Option<Compression>) -> Result<Vec<u8>> {
    match compression {
        None => {
            let mut out = Vec::with_capacity(data.len() + 1);
            out.push(0u8);
            out.extend_from_slice(data);
            Ok(out)
        }
        Some(Compression::Zstd { level }) => {
            let compressed = zstd::encode_all(data, level)?;
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(1u8);
            out.extend_from_slice(&compressed);
            Ok(out)
        }
    }
}

/// Reverses `encode_payload`. Returns the plaintext and the compression
/// header ID that was used (if any).
pub(crate) fn decode_payload(encoded: &[u8]) -> Result<(Vec<u8>, Option<u32>)> {
    match encoded.split_first() {
        None => bail!("Content is empty, missing encoding header"),
        Some((0, rest)) => Ok((rest.to_vec(), None)),
        Some((1, rest)) => Ok((zstd::decode_all(rest)?, Some(1))),
        Some((h, _)) => bail!("Unknown compression header {h}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_string_round_trip() -> Result<()> {
        let plain = ContentId::from_content(b"some bytes", None);
        assert_eq!(ContentId::parse(&plain.to_string())?, plain);

        let manifest = ContentId::from_content(b"some bytes", Some(MANIFEST_CONTENT_PREFIX));
        assert!(manifest.to_string().starts_with('m'));
        assert_eq!(ContentId::parse(&manifest.to_string())?, manifest);
        assert!(manifest.has_manifest_prefix());

        Ok(())
    }

    #[test]
    fn test_prefix_changes_id_but_not_hash() {
        let plain = ContentId::from_content(b"payload", None);
        let prefixed = ContentId::from_content(b"payload", Some('m'));
        assert_ne!(plain, prefixed);
        assert_eq!(plain.hash(), prefixed.hash());
    }

    #[test]
    fn test_encode_decode_round_trip() -> Result<()> {
        let data = b"a slightly longer payload that zstd can chew on".repeat(10);

        let (raw, header) = decode_payload(&encode_payload(&data, None)?)?;
        assert_eq!(raw, data);
        assert_eq!(header, None);

        let encoded = encode_payload(&data, Some(Compression::zstd_default()))?;
        assert!(encoded.len() < data.len());
        let (decoded, header) = decode_payload(&encoded)?;
        assert_eq!(decoded, data);
        assert_eq!(header, Some(1));

        Ok(())
    }
}
