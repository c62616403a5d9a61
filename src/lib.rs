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

//! urraca is a deduplicating, content-addressed snapshot engine: it turns
//! directory trees into immutable snapshot manifests over a content store,
//! reproduces any past tree from a manifest, and maintains the snapshot
//! population over time with policies, retention and garbage collection.

pub mod commands;
pub mod content;
pub mod errors;
pub mod fs;
pub mod gc;
pub mod global;
pub mod manifest;
pub mod object;
pub mod policy;
pub mod repo;
pub mod repofs;
pub mod restorer;
pub mod snapshot;
pub mod ui;
pub mod uploader;
pub mod utils;
