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

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Duration, Local, TimeZone};
use croner::Cron;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::snapshot::SourceInfo;

use super::fields::{is_false, merge_optional, merge_sorted_list, merge_string_list};

/// A previous run older than this many minutes counts as missed when
/// run-missed catch-up is enabled.
const MISSED_SNAPSHOT_AGE_MINUTES: i64 = 23 * 60 + 30;
/// Catch-up only snaps the schedule forward when the next regular run is
/// further away than this many minutes.
const MISSED_SNAPSHOT_SNAP_WINDOW_MINUTES: i64 = 30;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TimeOfDay {
    pub hour: u32,
    pub min: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, min: u32) -> Self {
        Self { hour, min }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.min)
    }
}

impl FromStr for TimeOfDay {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = || -> Option<TimeOfDay> {
            let (h, m) = s.split_once(':')?;
            let hour: u32 = h.parse().ok()?;
            let min: u32 = m.parse().ok()?;
            (hour < 24 && min < 60).then_some(TimeOfDay { hour, min })
        };

        parse().ok_or_else(|| {
            StoreError::invalid("time of day", format!("'{s}' is not HH:MM")).into()
        })
    }
}

/// Idempotent normalization of a times-of-day list into strictly
/// increasing `(hour, minute)` pairs.
pub fn sort_and_dedupe(mut times: Vec<TimeOfDay>) -> Vec<TimeOfDay> {
    times.sort();
    times.dedup();
    times
}

/// When automatic snapshots of a source happen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulingPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<i64>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub times_of_day: Vec<TimeOfDay>,
    #[serde(skip_serializing_if = "is_false")]
    pub no_parent_times_of_day: bool,

    /// Cron expressions; a trailing `# comment` is ignored.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cron: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_missed: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulingPolicyDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times_of_day: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual: Option<SourceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_missed: Option<SourceInfo>,
}

impl SchedulingPolicy {
    pub(super) fn merge(
        &mut self,
        src: &SchedulingPolicy,
        def: &mut SchedulingPolicyDefinition,
        source: &SourceInfo,
    ) {
        merge_optional(
            &mut self.interval_seconds,
            &src.interval_seconds,
            &mut def.interval_seconds,
            source,
        );
        merge_sorted_list(
            &mut self.times_of_day,
            &mut self.no_parent_times_of_day,
            &src.times_of_day,
            src.no_parent_times_of_day,
            &mut def.times_of_day,
            source,
        );

        let mut no_parent_cron = false;
        merge_string_list(
            &mut self.cron,
            &mut no_parent_cron,
            &src.cron,
            false,
            &mut def.cron,
            source,
        );

        merge_optional(&mut self.manual, &src.manual, &mut def.manual, source);
        merge_optional(&mut self.run_missed, &src.run_missed, &mut def.run_missed, source);
    }

    /// Validates every cron expression in the policy.
    pub fn validate(&self) -> Result<()> {
        for expr in &self.cron {
            parse_cron(expr)?;
        }
        Ok(())
    }

    /// Next time a snapshot of the source should start, or `None` for
    /// manual-only sources. Candidates are the interval tick after
    /// `previous`, each time-of-day occurrence and each cron tick; the
    /// earliest wins. With run-missed enabled, a long-overdue schedule
    /// snaps to `now`.
    pub fn next_snapshot_time(
        &self,
        previous: DateTime<Local>,
        now: DateTime<Local>,
    ) -> Option<DateTime<Local>> {
        if self.manual == Some(true) {
            return None;
        }

        let mut next: Option<DateTime<Local>> = None;
        let mut consider = |candidate: DateTime<Local>| {
            if next.is_none_or(|n| candidate < n) {
                next = Some(candidate);
            }
        };

        if let Some(interval) = self.interval_seconds.filter(|s| *s > 0) {
            // Truncate down to a multiple of the interval so runs stay
            // aligned regardless of how long each snapshot took.
            let ts = (previous.timestamp() + interval).div_euclid(interval) * interval;
            if let Some(t) = Local.timestamp_opt(ts, 0).earliest() {
                consider(t.max(now));
            }
        }

        for tod in &self.times_of_day {
            let Some(naive) = now.date_naive().and_hms_opt(tod.hour, tod.min, 0) else {
                continue;
            };
            let Some(today) = naive.and_local_timezone(Local).earliest() else {
                continue;
            };

            let candidate = if today > now {
                today
            } else {
                today + Duration::days(1)
            };
            consider(candidate);
        }

        for expr in &self.cron {
            let Ok(cron) = parse_cron(expr) else {
                continue;
            };
            if let Ok(t) = cron.find_next_occurrence(&now, false) {
                consider(t);
            }
        }

        let mut chosen = next?;

        if self.run_missed == Some(true)
            && (!self.times_of_day.is_empty() || !self.cron.is_empty())
            && previous + Duration::minutes(MISSED_SNAPSHOT_AGE_MINUTES) < now
            && chosen > now + Duration::minutes(MISSED_SNAPSHOT_SNAP_WINDOW_MINUTES)
        {
            chosen = now;
        }

        Some(chosen)
    }
}

/// Parses one cron expression, ignoring a trailing `# comment`.
pub fn parse_cron(expr: &str) -> Result<Cron> {
    let without_comment = expr.split('#').next().unwrap_or_default().trim();

    Cron::new(without_comment).parse().map_err(|e| {
        StoreError::invalid("cron expression", format!("'{expr}': {e}")).into()
    })
}
