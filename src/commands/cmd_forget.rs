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

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::global::defaults::SHORT_ID_LEN;
use crate::policy;
use crate::snapshot::{SourceInfo, parse_source, store};
use crate::ui;
use crate::utils;

use super::{GlobalArgs, open_repository};

#[derive(Args, Debug)]
#[clap(about = "Apply the retention policy, expiring old snapshots")]
pub struct CmdArgs {
    /// Only this source (user@host:path or local path); all sources
    /// otherwise
    #[clap(long, value_parser)]
    pub source: Option<String>,

    /// Actually delete expired snapshots instead of listing them
    #[clap(long, default_value_t = false)]
    pub delete: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let repo = open_repository(global_args)?;

    let sources: Vec<SourceInfo> = match &args.source {
        Some(raw) => vec![parse_source(
            raw,
            &utils::current_hostname(),
            &utils::current_username(),
        )?],
        None => store::list_sources(repo.manifests()).into_iter().collect(),
    };

    let mut total_expired = 0;
    for source in &sources {
        let expired = policy::apply_retention_policy(repo.manifests(), source, args.delete)?;
        if expired.is_empty() {
            continue;
        }

        total_expired += expired.len();
        ui::cli::log!("{}", source.to_string().bold().cyan());
        for manifest in &expired {
            ui::cli::log!(
                "  {} {}",
                manifest
                    .id
                    .map(|id| id.hash().to_short_hex(SHORT_ID_LEN))
                    .unwrap_or_default()
                    .bold(),
                manifest.start_time.format("%Y-%m-%d %H:%M:%S"),
            );
        }
    }

    if args.delete {
        ui::cli::log!("Deleted {total_expired} expired snapshots");
        repo.flush()?;
    } else if total_expired > 0 {
        ui::cli::log!(
            "{total_expired} snapshots would expire; re-run with {} to delete them",
            "--delete".bold()
        );
    } else {
        ui::cli::log!("Nothing to expire");
    }

    Ok(())
}
