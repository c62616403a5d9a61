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

//! Retention algebra: classifies a set of snapshot manifests into
//! kept/expired with human-readable keep reasons.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::manifest::ManifestDb;
use crate::snapshot::{Manifest, SourceInfo, store};
use crate::ui;

use super::fields::merge_optional;

/// How long (hours) the newest run of incomplete snapshots stays
/// protected.
const INCOMPLETE_KEEP_AGE_HOURS: i64 = 4;
/// The newest incomplete snapshots always kept, regardless of age.
const INCOMPLETE_KEEP_MIN_COUNT: usize = 3;

pub const INCOMPLETE_REASON: &str = "incomplete";

/// How many snapshots to keep per time bucket. An unset count disables the
/// bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetentionPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_latest: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_hourly: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_annual: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetentionPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_latest: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_hourly: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_annual: Option<SourceInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Latest,
    Annual,
    Monthly,
    Weekly,
    Daily,
    Hourly,
}

impl Bucket {
    /// Evaluation and reason-priority order.
    const ORDER: [Bucket; 6] = [
        Bucket::Latest,
        Bucket::Annual,
        Bucket::Monthly,
        Bucket::Weekly,
        Bucket::Daily,
        Bucket::Hourly,
    ];

    fn name(self) -> &'static str {
        match self {
            Bucket::Latest => "latest",
            Bucket::Annual => "annual",
            Bucket::Monthly => "monthly",
            Bucket::Weekly => "weekly",
            Bucket::Daily => "daily",
            Bucket::Hourly => "hourly",
        }
    }

    /// The time-period identifier a snapshot claims within this bucket.
    fn period_id(self, start_time: DateTime<Utc>, position: usize) -> String {
        match self {
            Bucket::Latest => position.to_string(),
            Bucket::Annual => start_time.format("%Y").to_string(),
            Bucket::Monthly => start_time.format("%Y-%m").to_string(),
            Bucket::Weekly => {
                let iso = start_time.iso_week();
                format!("{:04}-W{:02}", iso.year(), iso.week())
            }
            Bucket::Daily => start_time.format("%Y-%m-%d").to_string(),
            Bucket::Hourly => start_time.format("%Y-%m-%d %H").to_string(),
        }
    }
}

impl RetentionPolicy {
    pub(super) fn merge(
        &mut self,
        src: &RetentionPolicy,
        def: &mut RetentionPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(&mut self.keep_latest, &src.keep_latest, &mut def.keep_latest, source);
        merge_optional(&mut self.keep_hourly, &src.keep_hourly, &mut def.keep_hourly, source);
        merge_optional(&mut self.keep_daily, &src.keep_daily, &mut def.keep_daily, source);
        merge_optional(&mut self.keep_weekly, &src.keep_weekly, &mut def.keep_weekly, source);
        merge_optional(
            &mut self.keep_monthly,
            &src.keep_monthly,
            &mut def.keep_monthly,
            source,
        );
        merge_optional(&mut self.keep_annual, &src.keep_annual, &mut def.keep_annual, source);
    }

    fn keep_count(&self, bucket: Bucket) -> Option<u32> {
        match bucket {
            Bucket::Latest => self.keep_latest,
            Bucket::Annual => self.keep_annual,
            Bucket::Monthly => self.keep_monthly,
            Bucket::Weekly => self.keep_weekly,
            Bucket::Daily => self.keep_daily,
            Bucket::Hourly => self.keep_hourly,
        }
    }

    /// Bucket cutoff relative to the most recent complete snapshot. A
    /// snapshot qualifies for the bucket only while newer than the cutoff;
    /// `latest` has no cutoff.
    fn cutoff(&self, bucket: Bucket, max_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match bucket {
            Bucket::Latest => None,
            Bucket::Annual => self
                .keep_annual
                .map(|n| max_time - Months::new(12 * n)),
            Bucket::Monthly => self.keep_monthly.map(|n| max_time - Months::new(n)),
            Bucket::Weekly => self.keep_weekly.map(|n| max_time - Duration::weeks(n as i64)),
            Bucket::Daily => self.keep_daily.map(|n| max_time - Duration::days(n as i64)),
            Bucket::Hourly => self.keep_hourly.map(|n| max_time - Duration::hours(n as i64)),
        }
    }

    /// Recomputes `retention_reasons` on every manifest. The computation is
    /// a pure function of the manifest set and the policy, so consecutive
    /// evaluations over an unchanged set produce identical reasons.
    pub fn compute_retention_reasons(&self, manifests: &mut [Manifest]) {
        for manifest in manifests.iter_mut() {
            manifest.retention_reasons.clear();
        }

        if manifests.is_empty() {
            return;
        }

        // Most recent first; stable on ties.
        let mut order: Vec<usize> = (0..manifests.len()).collect();
        order.sort_by_key(|&i| manifests[i].start_time);
        order.reverse();

        self.tag_incomplete(manifests, &order);
        self.tag_complete(manifests, &order);
    }

    /// Tags the newest run of incomplete snapshots (checkpoints included)
    /// while they are fresh or among the first few. Stops at the first one
    /// that no longer qualifies or at the first complete snapshot.
    fn tag_incomplete(&self, manifests: &mut [Manifest], order: &[usize]) {
        let newest_time = manifests[order[0]].start_time;
        let mut position = 0;

        for &idx in order {
            let manifest = &mut manifests[idx];
            if manifest.is_complete() {
                break;
            }

            let age = newest_time - manifest.start_time;
            if age < Duration::hours(INCOMPLETE_KEEP_AGE_HOURS)
                || position < INCOMPLETE_KEEP_MIN_COUNT
            {
                manifest
                    .retention_reasons
                    .push(INCOMPLETE_REASON.to_string());
            } else {
                break;
            }

            position += 1;
        }
    }

    fn tag_complete(&self, manifests: &mut [Manifest], order: &[usize]) {
        let Some(max_time) = order
            .iter()
            .find(|&&i| manifests[i].is_complete())
            .map(|&i| manifests[i].start_time)
        else {
            return;
        };

        let mut claimed: HashSet<String> = HashSet::new();
        let mut counters = [0u32; Bucket::ORDER.len()];

        let complete_indices: Vec<usize> = order
            .iter()
            .filter(|&&i| manifests[i].is_complete())
            .copied()
            .collect();

        for (position, idx) in complete_indices.into_iter().enumerate() {
            let start_time = manifests[idx].start_time;

            for (bucket_index, &bucket) in Bucket::ORDER.iter().enumerate() {
                let Some(keep) = self.keep_count(bucket) else {
                    continue;
                };

                if let Some(cutoff) = self.cutoff(bucket, max_time) {
                    if start_time <= cutoff {
                        continue;
                    }
                }

                let period = bucket.period_id(start_time, position);
                let claim_key = format!("{}-{}", bucket.name(), period);

                if counters[bucket_index] < keep && !claimed.contains(&claim_key) {
                    claimed.insert(claim_key);
                    counters[bucket_index] += 1;
                    manifests[idx]
                        .retention_reasons
                        .push(format!("{}-{}", bucket.name(), counters[bucket_index]));
                }
            }
        }
    }
}

/// Applies the effective retention policy to a source: computes reasons,
/// returns the expired manifests and optionally deletes them. A failing
/// deletion surfaces immediately; manifests already deleted stay deleted.
pub fn apply_retention_policy(
    db: &ManifestDb,
    source: &SourceInfo,
    really_delete: bool,
) -> Result<Vec<Manifest>> {
    let manifests = store::list_snapshots(db, Some(source));

    let mut expired = Vec::new();

    // Grouping is defensive: the label filter should already confine the
    // list to one source.
    for (group_source, mut group) in store::group_by_source(manifests) {
        let policy = super::effective_policy(db, &group_source)?.0;
        policy.retention.compute_retention_reasons(&mut group);

        expired.extend(group.into_iter().filter(Manifest::is_expired));
    }

    if really_delete {
        for manifest in &expired {
            let id = manifest.id.context("Expired manifest has no ID")?;
            store::delete_snapshot(db, &id)
                .with_context(|| format!("Could not delete expired snapshot {id}"))?;
            ui::cli::verbose_1!("Deleted expired snapshot {id}");
        }
    }

    Ok(expired)
}
