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

pub mod compression;
pub mod fields;
pub mod files;
pub mod retention;
pub mod scheduling;
pub mod subpolicies;
pub mod tree;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::global::defaults::DEFAULT_PARALLEL_UPLOAD_ABOVE_SIZE;
use crate::manifest::{Labels, ManifestDb, ManifestId, TYPE_LABEL};
use crate::snapshot::source::{parent_path, validate_policy_path};
use crate::snapshot::store::{HOSTNAME_LABEL, PATH_LABEL, USERNAME_LABEL};
use crate::snapshot::SourceInfo;

pub use compression::{CompressionPolicy, CompressionPolicyDefinition, MetadataCompressionPolicy};
pub use fields::{ExtensionSet, LogDetail};
pub use files::{DEFAULT_DOT_IGNORE_FILE, FilesPolicy, FilesPolicyDefinition};
pub use retention::{RetentionPolicy, RetentionPolicyDefinition, apply_retention_policy};
pub use scheduling::{SchedulingPolicy, SchedulingPolicyDefinition, TimeOfDay};
pub use subpolicies::{
    ActionCommand, ActionsPolicy, ActionsPolicyDefinition, DirLoggingPolicy, EntryLoggingPolicy,
    ErrorHandlingPolicy, ErrorHandlingPolicyDefinition, LoggingPolicy, LoggingPolicyDefinition,
    MetricsPolicy, MetricsPolicyDefinition, OsSnapshotMode, OsSnapshotPolicy,
    OsSnapshotPolicyDefinition, SplitterPolicy, SplitterPolicyDefinition, UploadPolicy,
    UploadPolicyDefinition,
};
pub use tree::{PolicyTree, build_tree};

use fields::is_false;

pub const TYPE_POLICY: &str = "policy";
pub const POLICY_TYPE_LABEL: &str = "policyType";

pub const POLICY_TYPE_GLOBAL: &str = "global";
pub const POLICY_TYPE_HOST: &str = "host";
pub const POLICY_TYPE_USER: &str = "user";
pub const POLICY_TYPE_PATH: &str = "path";

/// The full policy for a source scope: a composite of typed sub-policies,
/// each field tri-state so that merging can tell unset from set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Policy {
    pub retention: RetentionPolicy,
    pub files: FilesPolicy,
    pub error_handling: ErrorHandlingPolicy,
    pub scheduling: SchedulingPolicy,
    pub compression: CompressionPolicy,
    pub metadata_compression: MetadataCompressionPolicy,
    pub splitter: SplitterPolicy,
    pub actions: ActionsPolicy,
    pub os_snapshots: OsSnapshotPolicy,
    pub logging: LoggingPolicy,
    pub upload: UploadPolicy,
    pub metrics: MetricsPolicy,

    /// Cuts the merge chain: ancestors of this policy contribute nothing.
    #[serde(skip_serializing_if = "is_false")]
    pub no_parent: bool,
}

/// Mirror of `Policy` recording, per field, the source whose policy
/// supplied the effective value. Fields filled from built-in defaults are
/// not recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyDefinition {
    pub retention: RetentionPolicyDefinition,
    pub files: FilesPolicyDefinition,
    pub error_handling: ErrorHandlingPolicyDefinition,
    pub scheduling: SchedulingPolicyDefinition,
    pub compression: CompressionPolicyDefinition,
    pub metadata_compression: CompressionPolicyDefinition,
    pub splitter: SplitterPolicyDefinition,
    pub actions: ActionsPolicyDefinition,
    pub os_snapshots: OsSnapshotPolicyDefinition,
    pub logging: LoggingPolicyDefinition,
    pub upload: UploadPolicyDefinition,
    pub metrics: MetricsPolicyDefinition,
}

impl Policy {
    /// Merges `src` (a less specific policy) into `self`, recording the
    /// provenance of newly filled fields.
    pub(crate) fn merge(
        &mut self,
        src: &Policy,
        def: &mut PolicyDefinition,
        source: &SourceInfo,
    ) {
        self.retention.merge(&src.retention, &mut def.retention, source);
        self.files.merge(&src.files, &mut def.files, source);
        self.error_handling
            .merge(&src.error_handling, &mut def.error_handling, source);
        self.scheduling.merge(&src.scheduling, &mut def.scheduling, source);
        self.compression
            .merge(&src.compression, &mut def.compression, source);
        self.metadata_compression.merge(
            &src.metadata_compression,
            &mut def.metadata_compression,
            source,
        );
        self.splitter.merge(&src.splitter, &mut def.splitter, source);
        self.actions.merge(&src.actions, &mut def.actions, source);
        self.os_snapshots
            .merge(&src.os_snapshots, &mut def.os_snapshots, source);
        self.logging.merge(&src.logging, &mut def.logging, source);
        self.upload.merge(&src.upload, &mut def.upload, source);
        self.metrics.merge(&src.metrics, &mut def.metrics, source);
    }
}

/// Built-in defaults, merged below every policy chain.
pub fn default_policy() -> Policy {
    Policy {
        retention: RetentionPolicy {
            keep_latest: Some(10),
            keep_hourly: Some(48),
            keep_daily: Some(7),
            keep_weekly: Some(4),
            keep_monthly: Some(24),
            keep_annual: Some(3),
        },
        files: FilesPolicy {
            dot_ignore_files: vec![DEFAULT_DOT_IGNORE_FILE.to_string()],
            ignore_cache_dirs: Some(true),
            ..FilesPolicy::default()
        },
        error_handling: ErrorHandlingPolicy {
            ignore_file_errors: Some(false),
            ignore_directory_errors: Some(false),
            ignore_unknown_types: Some(true),
        },
        compression: CompressionPolicy {
            compressor_name: Some(compression::COMPRESSOR_NONE.to_string()),
            ..CompressionPolicy::default()
        },
        metadata_compression: MetadataCompressionPolicy {
            compressor_name: Some(compression::COMPRESSOR_ZSTD.to_string()),
            ..MetadataCompressionPolicy::default()
        },
        os_snapshots: OsSnapshotPolicy {
            volume_shadow_copy: Some(OsSnapshotMode::WhenAvailable),
        },
        logging: LoggingPolicy {
            directories: subpolicies::DirLoggingPolicy {
                snapshotted: Some(LogDetail::NONE),
                ignored: Some(LogDetail::NONE),
            },
            entries: subpolicies::EntryLoggingPolicy {
                snapshotted: Some(LogDetail::NONE),
                ignored: Some(LogDetail::NONE),
                cache_hit: Some(LogDetail::NONE),
                cache_miss: Some(LogDetail::NONE),
            },
        },
        upload: UploadPolicy {
            max_parallel_snapshots: Some(1),
            max_parallel_file_reads: None,
            parallel_upload_above_size: Some(DEFAULT_PARALLEL_UPLOAD_ABOVE_SIZE),
        },
        metrics: MetricsPolicy {
            enabled: Some(false),
        },
        ..Policy::default()
    }
}

/// Merges policies most specific first, honoring `no_parent` cutoffs, and
/// finishes with the built-in defaults (whose contributions are not
/// recorded in the definition).
pub fn merge_policies(chain: &[(Policy, SourceInfo)]) -> (Policy, PolicyDefinition) {
    let mut merged = Policy::default();
    let mut definition = PolicyDefinition::default();

    for (policy, source) in chain {
        merged.merge(policy, &mut definition, source);
        if policy.no_parent {
            break;
        }
    }

    let mut scratch = PolicyDefinition::default();
    merged.merge(&default_policy(), &mut scratch, &SourceInfo::global());

    (merged, definition)
}

/// Labels addressing the policy manifest for one source scope.
pub fn policy_target_labels(source: &SourceInfo) -> Labels {
    let mut labels = Labels::from([(TYPE_LABEL.to_string(), TYPE_POLICY.to_string())]);

    let policy_type = if !source.path.is_empty() {
        labels.insert(HOSTNAME_LABEL.to_string(), source.host.clone());
        labels.insert(USERNAME_LABEL.to_string(), source.user.clone());
        labels.insert(PATH_LABEL.to_string(), source.path.clone());
        POLICY_TYPE_PATH
    } else if !source.user.is_empty() {
        labels.insert(HOSTNAME_LABEL.to_string(), source.host.clone());
        labels.insert(USERNAME_LABEL.to_string(), source.user.clone());
        POLICY_TYPE_USER
    } else if !source.host.is_empty() {
        labels.insert(HOSTNAME_LABEL.to_string(), source.host.clone());
        POLICY_TYPE_HOST
    } else {
        POLICY_TYPE_GLOBAL
    };

    labels.insert(POLICY_TYPE_LABEL.to_string(), policy_type.to_string());
    labels
}

/// Defines (or replaces) the policy for a source scope.
pub fn set_policy(db: &ManifestDb, source: &SourceInfo, policy: &Policy) -> Result<ManifestId> {
    if !source.path.is_empty() {
        validate_policy_path(&source.path)?;

        // Snapshot-level concurrency only makes sense above path scope.
        if policy.upload.max_parallel_snapshots.is_some() {
            return Err(StoreError::invalid(
                "policy",
                "maxParallelSnapshots can only be set at the global, host or user level",
            )
            .into());
        }
    }
    policy.scheduling.validate()?;

    // Replace any existing definition for this scope.
    for existing in db.find_manifests(&policy_target_labels(source)) {
        db.delete_manifest(&existing.id)?;
    }

    db.put_manifest(policy_target_labels(source), policy)
}

/// The policy explicitly defined for a source scope.
pub fn get_defined_policy(db: &ManifestDb, source: &SourceInfo) -> Result<Policy> {
    let matches = db.find_manifests(&policy_target_labels(source));

    match matches.len() {
        0 => Err(StoreError::PolicyNotFound(source.to_string()).into()),
        1 => {
            let (_, policy): (_, Policy) = db.get_manifest(&matches[0].id)?;
            Ok(policy)
        }
        _ => Err(StoreError::AmbiguousPolicy(source.to_string()).into()),
    }
}

pub fn delete_policy(db: &ManifestDb, source: &SourceInfo) -> Result<()> {
    let matches = db.find_manifests(&policy_target_labels(source));
    if matches.is_empty() {
        return Err(StoreError::PolicyNotFound(source.to_string()).into());
    }

    for entry in matches {
        db.delete_manifest(&entry.id)?;
    }
    Ok(())
}

/// All defined policies with their targets.
pub fn list_policies(db: &ManifestDb) -> Result<Vec<(SourceInfo, Policy)>> {
    let filter = Labels::from([(TYPE_LABEL.to_string(), TYPE_POLICY.to_string())]);

    let mut result = Vec::new();
    for entry in db.find_manifests(&filter) {
        let (meta, policy): (_, Policy) = db.get_manifest(&entry.id)?;
        let target = SourceInfo::new(
            meta.labels.get(HOSTNAME_LABEL).map(String::as_str).unwrap_or(""),
            meta.labels.get(USERNAME_LABEL).map(String::as_str).unwrap_or(""),
            meta.labels.get(PATH_LABEL).map(String::as_str).unwrap_or(""),
        );
        result.push((target, policy));
    }

    result.sort_by_key(|(target, _)| target.to_string());
    Ok(result)
}

fn defined_policy_if_any(db: &ManifestDb, source: &SourceInfo) -> Result<Option<Policy>> {
    match get_defined_policy(db, source) {
        Ok(policy) => Ok(Some(policy)),
        Err(e) => match e.downcast_ref::<StoreError>() {
            Some(StoreError::PolicyNotFound(_)) => Ok(None),
            _ => Err(e),
        },
    }
}

/// Effective policy for a source: source path and its ancestors, then
/// user@host, host and global scope, finished with built-in defaults.
pub fn effective_policy(
    db: &ManifestDb,
    source: &SourceInfo,
) -> Result<(Policy, PolicyDefinition)> {
    let mut chain: Vec<(Policy, SourceInfo)> = Vec::new();

    let push_if_defined = |target: SourceInfo, chain: &mut Vec<(Policy, SourceInfo)>| {
        match defined_policy_if_any(db, &target) {
            Ok(Some(policy)) => {
                chain.push((policy, target));
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        }
    };

    if !source.path.is_empty() {
        let mut path = Some(source.path.clone());
        while let Some(p) = path {
            push_if_defined(
                SourceInfo::new(&source.host, &source.user, &p),
                &mut chain,
            )?;
            path = parent_path(&p);
        }
    }

    if !source.user.is_empty() {
        push_if_defined(SourceInfo::for_user(&source.user, &source.host), &mut chain)?;
    }
    if !source.host.is_empty() {
        push_if_defined(SourceInfo::for_host(&source.host), &mut chain)?;
    }
    push_if_defined(SourceInfo::global(), &mut chain)?;

    Ok(merge_policies(&chain))
}

/// Builds the policy tree for an upload of `source`: the effective policy
/// at the source root plus overlays for every policy defined beneath it.
pub fn tree_for_source(db: &ManifestDb, source: &SourceInfo) -> Result<PolicyTree> {
    let (root_policy, _) = effective_policy(db, source)?;

    let filter = Labels::from([
        (TYPE_LABEL.to_string(), TYPE_POLICY.to_string()),
        (POLICY_TYPE_LABEL.to_string(), POLICY_TYPE_PATH.to_string()),
        (HOSTNAME_LABEL.to_string(), source.host.clone()),
        (USERNAME_LABEL.to_string(), source.user.clone()),
    ]);

    let prefix = format!("{}/", source.path.trim_end_matches('/'));
    let mut subpath_policies = std::collections::BTreeMap::new();

    for entry in db.find_manifests(&filter) {
        let Some(path) = entry.labels.get(PATH_LABEL) else {
            continue;
        };
        let Some(rel) = path.strip_prefix(&prefix) else {
            continue;
        };

        let (_, policy): (_, Policy) = db.get_manifest(&entry.id)?;
        subpath_policies.insert(format!("./{rel}"), policy);
    }

    Ok(build_tree(&subpath_policies, root_policy))
}
