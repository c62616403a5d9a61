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
use crate::snapshot::{parse_source, store};
use crate::ui::{
    self,
    table::{Alignment, Table},
};
use crate::utils::format_size;

use super::{GlobalArgs, open_repository};

#[derive(Args, Debug)]
#[clap(about = "List snapshots")]
pub struct CmdArgs {
    /// Only list snapshots of this source (user@host:path or local path)
    #[clap(long, value_parser)]
    pub source: Option<String>,

    /// Show retention reasons for every snapshot
    #[clap(long, default_value_t = false)]
    pub reasons: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let repo = open_repository(global_args)?;

    let filter = match &args.source {
        Some(raw) => Some(parse_source(
            raw,
            &crate::utils::current_hostname(),
            &crate::utils::current_username(),
        )?),
        None => None,
    };

    let manifests = store::list_snapshots(repo.manifests(), filter.as_ref());

    for (source, mut group) in store::group_by_source(manifests) {
        let effective = policy::effective_policy(repo.manifests(), &source)?.0;
        effective.retention.compute_retention_reasons(&mut group);
        store::sort_by_time(&mut group, false);

        ui::cli::log!("{}", source.to_string().bold().cyan());

        let mut table = Table::new_with_alignments(vec![
            Alignment::Left,
            Alignment::Left,
            Alignment::Right,
            Alignment::Right,
            Alignment::Left,
        ]);
        table.set_headers(vec![
            "id".to_string(),
            "time".to_string(),
            "files".to_string(),
            "size".to_string(),
            if args.reasons {
                "reasons".to_string()
            } else {
                "".to_string()
            },
        ]);

        for manifest in &group {
            let id = manifest
                .id
                .map(|id| id.hash().to_short_hex(SHORT_ID_LEN))
                .unwrap_or_default();

            let summary = manifest.root_entry.as_ref().and_then(|e| e.summary.as_ref());
            let (files, size) = summary
                .map(|s| (s.files.to_string(), format_size(s.size, 1)))
                .unwrap_or_default();

            let mut notes = Vec::new();
            if let Some(reason) = &manifest.incomplete_reason {
                notes.push(format!("({reason})").yellow().to_string());
            }
            if !manifest.pins.is_empty() {
                notes.push(format!("pins: {}", manifest.pins.join(",")));
            }
            if args.reasons && !manifest.retention_reasons.is_empty() {
                notes.push(manifest.retention_reasons.join(","));
            }

            table.add_row(vec![
                id.bold().to_string(),
                manifest
                    .start_time
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
                files,
                size,
                notes.join(" "),
            ]);
        }

        ui::cli::log!("{}", table.render());
    }

    Ok(())
}
