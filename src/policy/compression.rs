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

use serde::{Deserialize, Serialize};

use crate::content::Compression;
use crate::snapshot::SourceInfo;
use crate::ui;

use super::fields::{ExtensionSet, is_false, merge_extension_set, merge_optional};

pub const COMPRESSOR_NONE: &str = "none";
pub const COMPRESSOR_ZSTD: &str = "zstd";

/// How file (or metadata) payloads are compressed before landing in the
/// content store. `"none"` disables compression explicitly; an unset name
/// inherits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressor_name: Option<String>,

    /// When non-empty, only these extensions are compressed.
    #[serde(skip_serializing_if = "ExtensionSet::is_empty")]
    pub only_compress: ExtensionSet,
    #[serde(skip_serializing_if = "is_false")]
    pub no_parent_only_compress: bool,

    #[serde(skip_serializing_if = "ExtensionSet::is_empty")]
    pub never_compress: ExtensionSet,
    #[serde(skip_serializing_if = "is_false")]
    pub no_parent_never_compress: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

/// Metadata payloads (directory manifests) share the compression policy
/// shape.
pub type MetadataCompressionPolicy = CompressionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressor_name: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_compress: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub never_compress: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<SourceInfo>,
}

impl CompressionPolicy {
    pub(super) fn merge(
        &mut self,
        src: &CompressionPolicy,
        def: &mut CompressionPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(
            &mut self.compressor_name,
            &src.compressor_name,
            &mut def.compressor_name,
            source,
        );
        merge_extension_set(
            &mut self.only_compress,
            &mut self.no_parent_only_compress,
            &src.only_compress,
            src.no_parent_only_compress,
            &mut def.only_compress,
            source,
        );
        merge_extension_set(
            &mut self.never_compress,
            &mut self.no_parent_never_compress,
            &src.never_compress,
            src.no_parent_never_compress,
            &mut def.never_compress,
            source,
        );
        merge_optional(&mut self.min_size, &src.min_size, &mut def.min_size, source);
        merge_optional(&mut self.max_size, &src.max_size, &mut def.max_size, source);
    }

    /// Decides the compression for an entry of the given name and size.
    pub fn compression_for(&self, name: &str, size: u64) -> Option<Compression> {
        let compressor = self.compressor_name.as_deref()?;
        if compressor == COMPRESSOR_NONE {
            return None;
        }

        let extension = name.rsplit_once('.').map(|(_, ext)| ext);

        if !self.only_compress.is_empty()
            && !extension.is_some_and(|ext| self.only_compress.contains(ext))
        {
            return None;
        }

        if extension.is_some_and(|ext| self.never_compress.contains(ext)) {
            return None;
        }

        if self.min_size.is_some_and(|min| size < min) {
            return None;
        }
        if self.max_size.is_some_and(|max| max > 0 && size > max) {
            return None;
        }

        self.named_compression(compressor)
    }

    /// Decides the compression for metadata payloads, where extension and
    /// size filters do not apply.
    pub fn metadata_compression(&self) -> Option<Compression> {
        let compressor = self.compressor_name.as_deref()?;
        if compressor == COMPRESSOR_NONE {
            return None;
        }
        self.named_compression(compressor)
    }

    fn named_compression(&self, compressor: &str) -> Option<Compression> {
        match compressor {
            COMPRESSOR_ZSTD => Some(Compression::zstd_default()),
            other => {
                ui::cli::warning!("Unknown compressor '{other}', storing uncompressed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_or_none_disables_compression() {
        let policy = CompressionPolicy::default();
        assert_eq!(policy.compression_for("a.txt", 100), None);

        let policy = CompressionPolicy {
            compressor_name: Some(COMPRESSOR_NONE.to_string()),
            ..CompressionPolicy::default()
        };
        assert_eq!(policy.compression_for("a.txt", 100), None);
    }

    #[test]
    fn test_extension_filters() {
        let policy = CompressionPolicy {
            compressor_name: Some(COMPRESSOR_ZSTD.to_string()),
            only_compress: ExtensionSet::new(["txt"]),
            never_compress: ExtensionSet::new(["jpg"]),
            ..CompressionPolicy::default()
        };

        assert!(policy.compression_for("notes.txt", 100).is_some());
        assert!(policy.compression_for("notes.TXT", 100).is_some());
        assert!(policy.compression_for("photo.jpg", 100).is_none());
        assert!(policy.compression_for("archive.zip", 100).is_none());
        assert!(policy.compression_for("no_extension", 100).is_none());
    }

    #[test]
    fn test_size_bounds() {
        let policy = CompressionPolicy {
            compressor_name: Some(COMPRESSOR_ZSTD.to_string()),
            min_size: Some(10),
            max_size: Some(1000),
            ..CompressionPolicy::default()
        };

        assert!(policy.compression_for("a.txt", 5).is_none());
        assert!(policy.compression_for("a.txt", 500).is_some());
        assert!(policy.compression_for("a.txt", 2000).is_none());
    }
}
