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

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use crate::gc::{self, DryRunError, GcStats, SafetyParameters};
use crate::ui::{
    self,
    table::{Alignment, Table},
};
use crate::utils::format_size;

use super::{GlobalArgs, open_repository};

#[derive(Args, Debug)]
#[clap(about = "Collect unreferenced contents")]
pub struct CmdArgs {
    /// Actually delete garbage instead of reporting it
    #[clap(long, default_value_t = false)]
    pub delete: bool,

    /// Minimum content age (hours) before it can be collected
    #[clap(long, default_value_t = 24)]
    pub min_content_age_hours: u64,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let repo = open_repository(global_args)?;

    let safety = SafetyParameters {
        min_content_age_subject_to_gc: Duration::from_secs(args.min_content_age_hours * 3600),
    };

    let result = gc::run(&repo, args.delete, &safety, Utc::now());

    match result {
        Ok(stats) => {
            show_stats(&stats);
            Ok(())
        }
        Err(e) => {
            if let Some(dry_run) = e.downcast_ref::<DryRunError>() {
                show_stats(&dry_run.stats);
            }
            Err(e)
        }
    }
}

fn show_stats(stats: &GcStats) {
    let mut table = Table::new_with_alignments(vec![
        Alignment::Left,
        Alignment::Right,
        Alignment::Right,
    ]);
    table.set_headers(vec![
        "".to_string(),
        "contents".to_string(),
        "bytes".to_string(),
    ]);

    let mut row = |label: &str, counter: &gc::GcCounter| {
        table.add_row(vec![
            label.to_string(),
            counter.count.to_string(),
            format_size(counter.bytes, 1),
        ]);
    };

    row("In use", &stats.in_use);
    row("System", &stats.in_use_system);
    row("Recovered", &stats.recovered);
    row("Unreferenced (recent)", &stats.unreferenced_recent);
    row("Unreferenced", &stats.unreferenced);
    row("Deleted", &stats.deleted);

    ui::cli::log!("{}", table.render());
}
