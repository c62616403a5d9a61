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

use std::str::FromStr;

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

use crate::errors::StoreError;
use crate::policy::{self, Policy, TimeOfDay};
use crate::snapshot::{SourceInfo, parse_source};
use crate::ui;
use crate::utils;

use super::{GlobalArgs, open_repository};

#[derive(Args, Debug)]
#[clap(about = "Show or edit policies")]
pub struct CmdArgs {
    #[clap(subcommand)]
    pub command: PolicyCommand,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommand {
    /// Show the policy defined for a target and the effective result
    Show {
        /// Target: (global), host, user@host or user@host:path
        #[clap(value_parser, default_value = "(global)")]
        target: String,
    },

    /// List all defined policies
    List,

    /// Edit the policy for a target
    Set {
        #[clap(value_parser)]
        target: String,

        #[clap(long)]
        keep_latest: Option<u32>,
        #[clap(long)]
        keep_hourly: Option<u32>,
        #[clap(long)]
        keep_daily: Option<u32>,
        #[clap(long)]
        keep_weekly: Option<u32>,
        #[clap(long)]
        keep_monthly: Option<u32>,
        #[clap(long)]
        keep_annual: Option<u32>,

        /// Add ignore glob patterns
        #[clap(long = "add-ignore", value_parser)]
        add_ignore: Vec<String>,

        /// Compressor for file data ('none' or 'zstd')
        #[clap(long)]
        compression: Option<String>,

        /// Exclude files larger than this many bytes (0 = unlimited)
        #[clap(long)]
        max_file_size: Option<u64>,

        /// Ignore per-file read errors
        #[clap(long)]
        ignore_file_errors: Option<bool>,

        /// Ignore directory read errors
        #[clap(long)]
        ignore_dir_errors: Option<bool>,

        /// Snapshot only when triggered manually
        #[clap(long)]
        manual: Option<bool>,

        /// Snapshot times (HH:MM, comma separated)
        #[clap(long = "times", value_parser, value_delimiter = ',')]
        times_of_day: Vec<String>,

        /// Cron expressions for scheduled snapshots
        #[clap(long = "cron", value_parser)]
        cron: Vec<String>,
    },

    /// Remove the policy defined for a target
    Delete {
        #[clap(value_parser)]
        target: String,
    },
}

fn parse_target(raw: &str) -> Result<SourceInfo> {
    parse_source(
        raw,
        &utils::current_hostname(),
        &utils::current_username(),
    )
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let repo = open_repository(global_args)?;
    let db = repo.manifests();

    match &args.command {
        PolicyCommand::Show { target } => {
            let target = parse_target(target)?;

            match policy::get_defined_policy(db, &target) {
                Ok(defined) => {
                    ui::cli::log!("{}", format!("Defined policy for {target}").bold());
                    ui::cli::log!("{}", serde_json::to_string_pretty(&defined)?);
                }
                Err(e) => match e.downcast_ref::<StoreError>() {
                    Some(StoreError::PolicyNotFound(_)) => {
                        ui::cli::log!("No policy defined for {target}");
                    }
                    _ => return Err(e),
                },
            }

            let (effective, _) = policy::effective_policy(db, &target)?;
            ui::cli::log!("{}", format!("Effective policy for {target}").bold());
            ui::cli::log!("{}", serde_json::to_string_pretty(&effective)?);
        }

        PolicyCommand::List => {
            for (target, _) in policy::list_policies(db)? {
                ui::cli::log!("{target}");
            }
        }

        PolicyCommand::Set {
            target,
            keep_latest,
            keep_hourly,
            keep_daily,
            keep_weekly,
            keep_monthly,
            keep_annual,
            add_ignore,
            compression,
            max_file_size,
            ignore_file_errors,
            ignore_dir_errors,
            manual,
            times_of_day,
            cron,
        } => {
            let target = parse_target(target)?;

            let mut policy = match policy::get_defined_policy(db, &target) {
                Ok(defined) => defined,
                Err(e) => match e.downcast_ref::<StoreError>() {
                    Some(StoreError::PolicyNotFound(_)) => Policy::default(),
                    _ => return Err(e),
                },
            };

            apply_option(&mut policy.retention.keep_latest, keep_latest);
            apply_option(&mut policy.retention.keep_hourly, keep_hourly);
            apply_option(&mut policy.retention.keep_daily, keep_daily);
            apply_option(&mut policy.retention.keep_weekly, keep_weekly);
            apply_option(&mut policy.retention.keep_monthly, keep_monthly);
            apply_option(&mut policy.retention.keep_annual, keep_annual);

            for pattern in add_ignore {
                if !policy.files.ignore_rules.contains(pattern) {
                    policy.files.ignore_rules.push(pattern.clone());
                }
            }
            policy.files.ignore_rules.sort();

            apply_option(&mut policy.compression.compressor_name, compression);
            apply_option(&mut policy.files.max_file_size, max_file_size);
            apply_option(&mut policy.error_handling.ignore_file_errors, ignore_file_errors);
            apply_option(
                &mut policy.error_handling.ignore_directory_errors,
                ignore_dir_errors,
            );
            apply_option(&mut policy.scheduling.manual, manual);

            if !times_of_day.is_empty() {
                let parsed: Result<Vec<TimeOfDay>> =
                    times_of_day.iter().map(|t| TimeOfDay::from_str(t)).collect();
                policy.scheduling.times_of_day =
                    policy::scheduling::sort_and_dedupe(parsed?);
            }
            if !cron.is_empty() {
                policy.scheduling.cron = cron.clone();
            }

            policy::set_policy(db, &target, &policy)?;
            ui::cli::log!("Policy for {target} updated");
        }

        PolicyCommand::Delete { target } => {
            let target = parse_target(target)?;
            policy::delete_policy(db, &target)?;
            ui::cli::log!("Policy for {target} removed");
        }
    }

    Ok(())
}

fn apply_option<T: Clone>(field: &mut Option<T>, value: &Option<T>) {
    if let Some(v) = value {
        *field = Some(v.clone());
    }
}
