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

//! Labeled manifest storage. Each manifest is a small JSON document
//! (labels + payload) stored as a content with the `m` namespace prefix,
//! which keeps manifests inside the content store's dedup and GC universe
//! while letting the collector recognize them as system contents.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};

use crate::content::{
    Compression, ContentId, ContentManager, IterateOptions, MANIFEST_CONTENT_PREFIX,
};
use crate::errors::StoreError;

pub type ManifestId = ContentId;

pub type Labels = BTreeMap<String, String>;

pub const TYPE_LABEL: &str = "type";

#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub id: ManifestId,
    pub labels: Labels,
}

#[derive(Debug, Serialize, serde::Deserialize)]
struct ManifestDocument {
    labels: Labels,
    payload: serde_json::Value,
}

/// Label-indexed manifest database over a content manager.
pub struct ManifestDb {
    contents: Arc<dyn ContentManager>,
    index: RwLock<BTreeMap<ManifestId, Labels>>,
}

impl ManifestDb {
    /// Opens the database, indexing the labels of every live manifest
    /// content.
    pub fn open(contents: Arc<dyn ContentManager>) -> Result<Self> {
        let mut index = BTreeMap::new();

        contents.iterate_contents(IterateOptions::default(), &mut |info| {
            if !info.content_id.has_manifest_prefix() {
                return Ok(());
            }

            let raw = contents.read_content(&info.content_id)?;
            let document: ManifestDocument = serde_json::from_slice(&raw)
                .with_context(|| format!("Malformed manifest {}", info.content_id))?;
            index.insert(info.content_id, document.labels);
            Ok(())
        })?;

        Ok(Self {
            contents,
            index: RwLock::new(index),
        })
    }

    pub fn contents(&self) -> &Arc<dyn ContentManager> {
        &self.contents
    }

    /// Stores a labeled manifest and returns its ID.
    pub fn put_manifest(&self, labels: Labels, payload: &impl Serialize) -> Result<ManifestId> {
        let document = ManifestDocument {
            labels: labels.clone(),
            payload: serde_json::to_value(payload)?,
        };
        let raw = serde_json::to_vec(&document)?;

        let id = self.contents.write_content(
            &raw,
            Some(MANIFEST_CONTENT_PREFIX),
            Some(Compression::zstd_default()),
        )?;

        self.index.write().insert(id, labels);
        Ok(id)
    }

    /// Loads a manifest payload along with its metadata.
    pub fn get_manifest<T: DeserializeOwned>(
        &self,
        id: &ManifestId,
    ) -> Result<(EntryMetadata, T)> {
        if !self.index.read().contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()).into());
        }

        let raw = self
            .contents
            .read_content(id)
            .with_context(|| format!("Could not read manifest {id}"))?;
        let document: ManifestDocument = serde_json::from_slice(&raw)?;
        let payload = serde_json::from_value(document.payload)
            .with_context(|| format!("Malformed manifest payload {id}"))?;

        Ok((
            EntryMetadata {
                id: *id,
                labels: document.labels,
            },
            payload,
        ))
    }

    /// Returns metadata of all manifests whose labels contain `filter` as a
    /// subset, ordered by ID.
    pub fn find_manifests(&self, filter: &Labels) -> Vec<EntryMetadata> {
        self.index
            .read()
            .iter()
            .filter(|(_, labels)| {
                filter
                    .iter()
                    .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
            })
            .map(|(id, labels)| EntryMetadata {
                id: *id,
                labels: labels.clone(),
            })
            .collect()
    }

    pub fn delete_manifest(&self, id: &ManifestId) -> Result<()> {
        if self.index.write().remove(id).is_none() {
            return Err(StoreError::NotFound(id.to_string()).into());
        }

        self.contents.delete_content(id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::memory::MemoryContentStore;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_put_get_round_trip() -> Result<()> {
        let db = ManifestDb::open(Arc::new(MemoryContentStore::new()))?;

        let id = db.put_manifest(labels(&[("type", "snapshot")]), &"payload")?;
        let (meta, payload): (EntryMetadata, String) = db.get_manifest(&id)?;

        assert_eq!(meta.id, id);
        assert_eq!(meta.labels.get("type").map(String::as_str), Some("snapshot"));
        assert_eq!(payload, "payload");

        Ok(())
    }

    #[test]
    fn test_find_by_label_subset() -> Result<()> {
        let db = ManifestDb::open(Arc::new(MemoryContentStore::new()))?;

        db.put_manifest(labels(&[("type", "snapshot"), ("hostname", "ahost")]), &1)?;
        db.put_manifest(labels(&[("type", "snapshot"), ("hostname", "bhost")]), &2)?;
        db.put_manifest(labels(&[("type", "policy")]), &3)?;

        assert_eq!(db.find_manifests(&labels(&[("type", "snapshot")])).len(), 2);
        assert_eq!(
            db.find_manifests(&labels(&[("type", "snapshot"), ("hostname", "bhost")]))
                .len(),
            1
        );
        assert_eq!(db.find_manifests(&Labels::new()).len(), 3);

        Ok(())
    }

    #[test]
    fn test_reopen_recovers_index() -> Result<()> {
        let contents = Arc::new(MemoryContentStore::new());

        let id = {
            let db = ManifestDb::open(contents.clone())?;
            db.put_manifest(labels(&[("type", "snapshot")]), &"x")?
        };

        let reopened = ManifestDb::open(contents)?;
        let (_, payload): (_, String) = reopened.get_manifest(&id)?;
        assert_eq!(payload, "x");

        Ok(())
    }

    #[test]
    fn test_delete_and_typed_not_found() -> Result<()> {
        let db = ManifestDb::open(Arc::new(MemoryContentStore::new()))?;
        let id = db.put_manifest(labels(&[("type", "snapshot")]), &"x")?;

        db.delete_manifest(&id)?;

        let err = db.get_manifest::<String>(&id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound(_))
        ));

        let err = db.delete_manifest(&id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound(_))
        ));

        Ok(())
    }
}
