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

//! The smaller policy records: error handling, upload tuning, logging,
//! snapshot actions, OS snapshots, splitter selection and metrics.

use serde::{Deserialize, Serialize};

use crate::snapshot::SourceInfo;

use super::fields::{LogDetail, merge_optional};

/// Whether per-entry failures abort a snapshot or are recorded and
/// skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorHandlingPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_file_errors: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_directory_errors: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_unknown_types: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorHandlingPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_file_errors: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_directory_errors: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_unknown_types: Option<SourceInfo>,
}

impl ErrorHandlingPolicy {
    pub(super) fn merge(
        &mut self,
        src: &ErrorHandlingPolicy,
        def: &mut ErrorHandlingPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(
            &mut self.ignore_file_errors,
            &src.ignore_file_errors,
            &mut def.ignore_file_errors,
            source,
        );
        merge_optional(
            &mut self.ignore_directory_errors,
            &src.ignore_directory_errors,
            &mut def.ignore_directory_errors,
            source,
        );
        merge_optional(
            &mut self.ignore_unknown_types,
            &src.ignore_unknown_types,
            &mut def.ignore_unknown_types,
            source,
        );
    }

    pub fn file_errors_ignored(&self) -> bool {
        self.ignore_file_errors.unwrap_or(false)
    }

    pub fn directory_errors_ignored(&self) -> bool {
        self.ignore_directory_errors.unwrap_or(false)
    }

    pub fn unknown_types_ignored(&self) -> bool {
        self.ignore_unknown_types.unwrap_or(true)
    }
}

/// Upload parallelism tuning. `max_parallel_snapshots` is only meaningful
/// at the global, host or user scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_snapshots: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_file_reads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_upload_above_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_snapshots: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel_file_reads: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_upload_above_size: Option<SourceInfo>,
}

impl UploadPolicy {
    pub(super) fn merge(
        &mut self,
        src: &UploadPolicy,
        def: &mut UploadPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(
            &mut self.max_parallel_snapshots,
            &src.max_parallel_snapshots,
            &mut def.max_parallel_snapshots,
            source,
        );
        merge_optional(
            &mut self.max_parallel_file_reads,
            &src.max_parallel_file_reads,
            &mut def.max_parallel_file_reads,
            source,
        );
        merge_optional(
            &mut self.parallel_upload_above_size,
            &src.parallel_upload_above_size,
            &mut def.parallel_upload_above_size,
            source,
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirLoggingPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshotted: Option<LogDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<LogDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntryLoggingPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshotted: Option<LogDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<LogDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<LogDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_miss: Option<LogDetail>,
}

/// Per-event log detail for the uploader, on the 0..10 scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingPolicy {
    pub directories: DirLoggingPolicy,
    pub entries: EntryLoggingPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirLoggingPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshotted: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<SourceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntryLoggingPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshotted: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_miss: Option<SourceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingPolicyDefinition {
    pub directories: DirLoggingPolicyDefinition,
    pub entries: EntryLoggingPolicyDefinition,
}

impl LoggingPolicy {
    pub(super) fn merge(
        &mut self,
        src: &LoggingPolicy,
        def: &mut LoggingPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(
            &mut self.directories.snapshotted,
            &src.directories.snapshotted,
            &mut def.directories.snapshotted,
            source,
        );
        merge_optional(
            &mut self.directories.ignored,
            &src.directories.ignored,
            &mut def.directories.ignored,
            source,
        );
        merge_optional(
            &mut self.entries.snapshotted,
            &src.entries.snapshotted,
            &mut def.entries.snapshotted,
            source,
        );
        merge_optional(
            &mut self.entries.ignored,
            &src.entries.ignored,
            &mut def.entries.ignored,
            source,
        );
        merge_optional(
            &mut self.entries.cache_hit,
            &src.entries.cache_hit,
            &mut def.entries.cache_hit,
            source,
        );
        merge_optional(
            &mut self.entries.cache_miss,
            &src.entries.cache_miss,
            &mut def.entries.cache_miss,
            source,
        );
    }
}

/// A command run around a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionCommand {
    pub command: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// `essential`, `optional` or `async`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionsPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_snapshot_root: Option<ActionCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_snapshot_root: Option<ActionCommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionsPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_snapshot_root: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_snapshot_root: Option<SourceInfo>,
}

impl ActionsPolicy {
    pub(super) fn merge(
        &mut self,
        src: &ActionsPolicy,
        def: &mut ActionsPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(
            &mut self.before_snapshot_root,
            &src.before_snapshot_root,
            &mut def.before_snapshot_root,
            source,
        );
        merge_optional(
            &mut self.after_snapshot_root,
            &src.after_snapshot_root,
            &mut def.after_snapshot_root,
            source,
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsSnapshotMode {
    Never,
    Always,
    WhenAvailable,
}

/// Whether filesystem-level snapshots (VSS and friends) are taken before
/// reading sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OsSnapshotPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_shadow_copy: Option<OsSnapshotMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OsSnapshotPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_shadow_copy: Option<SourceInfo>,
}

impl OsSnapshotPolicy {
    pub(super) fn merge(
        &mut self,
        src: &OsSnapshotPolicy,
        def: &mut OsSnapshotPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(
            &mut self.volume_shadow_copy,
            &src.volume_shadow_copy,
            &mut def.volume_shadow_copy,
            source,
        );
    }
}

/// Which object splitter cuts file payloads into contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SplitterPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SplitterPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<SourceInfo>,
}

impl SplitterPolicy {
    pub(super) fn merge(
        &mut self,
        src: &SplitterPolicy,
        def: &mut SplitterPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(&mut self.algorithm, &src.algorithm, &mut def.algorithm, source);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetricsPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<SourceInfo>,
}

impl MetricsPolicy {
    pub(super) fn merge(
        &mut self,
        src: &MetricsPolicy,
        def: &mut MetricsPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(&mut self.enabled, &src.enabled, &mut def.enabled, source);
    }
}
