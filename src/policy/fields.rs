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

//! Building blocks shared by all policy types: tri-state field merging
//! with provenance, ordered string lists and extension sets.

use serde::{Deserialize, Deserializer, Serialize};

use crate::snapshot::SourceInfo;

/// Log verbosity on a 0..10 scale. 0 suppresses the event entirely.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogDetail(pub u8);

impl LogDetail {
    pub const NONE: LogDetail = LogDetail(0);
    pub const NORMAL: LogDetail = LogDetail(5);
    pub const MAX: LogDetail = LogDetail(10);
}

/// Merge rule for scalar tri-state fields: the destination wins when set;
/// an unset destination takes the source value and records where it came
/// from.
pub(crate) fn merge_optional<T: Clone>(
    dst: &mut Option<T>,
    src: &Option<T>,
    def: &mut Option<SourceInfo>,
    source: &SourceInfo,
) {
    if dst.is_none() && src.is_some() {
        *dst = src.clone();
        *def = Some(source.clone());
    }
}

/// Merge rule for ordered collection fields: unless the destination cut
/// the chain with its `no_parent` flag, source elements are prepended and
/// the list is sorted and deduplicated. A `no_parent` flag on the source
/// propagates forward so more distant ancestors cannot re-contribute.
pub(crate) fn merge_sorted_list<T: Clone + Ord>(
    dst: &mut Vec<T>,
    dst_no_parent: &mut bool,
    src: &[T],
    src_no_parent: bool,
    def: &mut Option<SourceInfo>,
    source: &SourceInfo,
) {
    if !*dst_no_parent && !src.is_empty() {
        if dst.is_empty() {
            *def = Some(source.clone());
        }

        let mut merged = src.to_vec();
        merged.extend(dst.iter().cloned());
        merged.sort();
        merged.dedup();
        *dst = merged;
    }

    *dst_no_parent = *dst_no_parent || src_no_parent;
}

pub(crate) fn merge_string_list(
    dst: &mut Vec<String>,
    dst_no_parent: &mut bool,
    src: &[String],
    src_no_parent: bool,
    def: &mut Option<SourceInfo>,
    source: &SourceInfo,
) {
    merge_sorted_list(dst, dst_no_parent, src, src_no_parent, def, source);
}

/// Case-insensitive, dot-stripped set of file extensions. The normalized
/// form (lowercase, no leading dots, sorted, unique) is also the
/// serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExtensionSet(Vec<String>);

impl ExtensionSet {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        Self(normalized)
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.0
            .binary_search(&normalize_extension(extension))
            .is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub(crate) fn union_from(&mut self, other: &ExtensionSet) {
        if other.0.is_empty() {
            return;
        }

        self.0.extend(other.0.iter().cloned());
        self.0.sort();
        self.0.dedup();
    }
}

impl<'de> Deserialize<'de> for ExtensionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        Ok(ExtensionSet::new(raw))
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}

pub(crate) fn is_false(v: &bool) -> bool {
    !*v
}

/// Merge rule for extension sets: union, with the same `no_parent`
/// semantics as ordered lists.
pub(crate) fn merge_extension_set(
    dst: &mut ExtensionSet,
    dst_no_parent: &mut bool,
    src: &ExtensionSet,
    src_no_parent: bool,
    def: &mut Option<SourceInfo>,
    source: &SourceInfo,
) {
    if !*dst_no_parent && !src.is_empty() {
        if dst.is_empty() {
            *def = Some(source.clone());
        }
        dst.union_from(src);
    }

    *dst_no_parent = *dst_no_parent || src_no_parent;
}
