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

use std::time::Duration;

use crate::utils::size;

// -- Concurrency --
/// Number of snapshot manifests loaded in parallel by the manifest store.
pub(crate) const PARALLEL_MANIFEST_LOADS: usize = 50;

// -- Chunking --
/// Minimum chunk size
pub(crate) const MIN_CHUNK_SIZE: u32 = (512 * size::KiB) as u32;
/// Average chunk size
pub(crate) const AVG_CHUNK_SIZE: u32 = size::MiB as u32;
/// Maximum chunk size
pub(crate) const MAX_CHUNK_SIZE: u32 = (8 * size::MiB) as u32;

// -- Uploader --
/// Interval between periodic snapshot checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(45 * 60);

/// Files larger than this are split into sections and uploaded in parallel
/// unless the upload policy says otherwise.
pub const DEFAULT_PARALLEL_UPLOAD_ABOVE_SIZE: u64 = 2 * size::GiB;

/// Failed entries recorded per directory summary.
pub(crate) const MAX_FAILED_ENTRIES_PER_DIR: usize = 10;

// -- Garbage collection --
/// Contents younger than this are never swept, so that blobs written by a
/// concurrent snapshot are not collected before their manifest lands.
pub const DEFAULT_MIN_CONTENT_AGE: Duration = Duration::from_secs(24 * 3600);

/// Flush the content store after this many deletions.
pub(crate) const GC_FLUSH_EVERY_DELETIONS: u64 = 100_000;

// -- Display --
/// Display length for a manifest or content ID in bytes
pub(crate) const SHORT_ID_LEN: usize = 4;

pub(crate) const DEFAULT_VERBOSITY: u32 = 1;
