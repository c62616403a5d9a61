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

use crate::snapshot::SourceInfo;

use super::fields::{is_false, merge_optional, merge_string_list};

pub const DEFAULT_DOT_IGNORE_FILE: &str = ".kopiaignore";

/// Which files a snapshot includes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilesPolicy {
    /// Glob patterns for entries to exclude.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_rules: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub no_parent_ignore_rules: bool,

    /// Names of in-directory ignore files whose rules apply to the
    /// directory containing them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dot_ignore_files: Vec<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub no_parent_dot_ignore_files: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_cache_dirs: Option<bool>,

    /// Files larger than this are excluded. Unset means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilesPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_rules: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dot_ignore_files: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_cache_dirs: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<SourceInfo>,
}

impl FilesPolicy {
    pub(super) fn merge(
        &mut self,
        src: &FilesPolicy,
        def: &mut FilesPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_string_list(
            &mut self.ignore_rules,
            &mut self.no_parent_ignore_rules,
            &src.ignore_rules,
            src.no_parent_ignore_rules,
            &mut def.ignore_rules,
            source,
        );
        merge_string_list(
            &mut self.dot_ignore_files,
            &mut self.no_parent_dot_ignore_files,
            &src.dot_ignore_files,
            src.no_parent_dot_ignore_files,
            &mut def.dot_ignore_files,
            source,
        );
        merge_optional(
            &mut self.ignore_cache_dirs,
            &src.ignore_cache_dirs,
            &mut def.ignore_cache_dirs,
            source,
        );
        merge_optional(
            &mut self.max_file_size,
            &src.max_file_size,
            &mut def.max_file_size,
            source,
        );
    }

    /// Max file size with 0/unset meaning unlimited.
    pub fn effective_max_file_size(&self) -> Option<u64> {
        match self.max_file_size {
            None | Some(0) => None,
            Some(limit) => Some(limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_combines_rules_sorted() {
        let mut dst = FilesPolicy {
            ignore_rules: vec!["*.tmp".to_string()],
            ..FilesPolicy::default()
        };
        let src = FilesPolicy {
            ignore_rules: vec!["*.bak".to_string(), "*.tmp".to_string()],
            ..FilesPolicy::default()
        };

        let mut def = FilesPolicyDefinition::default();
        dst.merge(&src, &mut def, &SourceInfo::for_host("burrow"));

        assert_eq!(dst.ignore_rules, vec!["*.bak", "*.tmp"]);
    }

    #[test]
    fn test_no_parent_blocks_inheritance() {
        let mut dst = FilesPolicy {
            ignore_rules: vec!["mine".to_string()],
            no_parent_ignore_rules: true,
            ..FilesPolicy::default()
        };
        let src = FilesPolicy {
            ignore_rules: vec!["parent".to_string()],
            ..FilesPolicy::default()
        };

        let mut def = FilesPolicyDefinition::default();
        dst.merge(&src, &mut def, &SourceInfo::for_host("burrow"));

        assert_eq!(dst.ignore_rules, vec!["mine"]);
        assert_eq!(def.ignore_rules, None);
    }

    #[test]
    fn test_effective_max_file_size_zero_is_unlimited() {
        let mut policy = FilesPolicy::default();
        assert_eq!(policy.effective_max_file_size(), None);

        policy.max_file_size = Some(0);
        assert_eq!(policy.effective_max_file_size(), None);

        policy.max_file_size = Some(1024);
        assert_eq!(policy.effective_max_file_size(), Some(1024));
    }
}
