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

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::content::localdir::LocalDirStore;
use crate::content::memory::MemoryContentStore;
use crate::content::ContentManager;
use crate::manifest::ManifestDb;
use crate::object::ObjectStore;
use crate::ui;

/// Ties a content store, the object layer above it and the labeled
/// manifest database into one handle.
pub struct Repository {
    contents: Arc<dyn ContentManager>,
    objects: ObjectStore,
    manifests: ManifestDb,
}

impl Repository {
    pub fn from_contents(contents: Arc<dyn ContentManager>) -> Result<Arc<Self>> {
        let objects = ObjectStore::new(contents.clone());
        let manifests = ManifestDb::open(contents.clone())
            .with_context(|| "Could not open the manifest database")?;

        Ok(Arc::new(Self {
            contents,
            objects,
            manifests,
        }))
    }

    /// Ephemeral repository for tests and dry runs.
    pub fn new_in_memory() -> Arc<Self> {
        Self::from_contents(Arc::new(MemoryContentStore::new()))
            .expect("An empty in-memory repository always opens")
    }

    /// Creates the on-disk structure for a new repository.
    pub fn init_local(path: &Path) -> Result<()> {
        LocalDirStore::create(path)
            .with_context(|| format!("Could not initialize repository at {}", path.display()))?;
        ui::cli::log!("Created repository at {}", path.display());
        Ok(())
    }

    pub fn open_local(path: &Path) -> Result<Arc<Self>> {
        let store = LocalDirStore::open(path)
            .with_context(|| format!("Could not open repository at {}", path.display()))?;
        Self::from_contents(Arc::new(store))
    }

    pub fn contents(&self) -> &Arc<dyn ContentManager> {
        &self.contents
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn manifests(&self) -> &ManifestDb {
        &self.manifests
    }

    pub fn flush(&self) -> Result<()> {
        self.contents.flush()
    }
}
