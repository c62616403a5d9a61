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

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;

use crate::repofs::ObjectDirectory;
use crate::restorer::{RestoreOptions, restore_tree};
use crate::ui;
use crate::utils::{format_size, pretty_print_duration};

use super::{GlobalArgs, find_snapshot, open_repository};

#[derive(Args, Debug)]
#[clap(about = "Restore a snapshot to a local directory")]
pub struct CmdArgs {
    /// Snapshot ID prefix, or 'latest'
    #[clap(value_parser, default_value = "latest")]
    pub snapshot: String,

    /// Target directory
    #[clap(long, value_parser, required = true)]
    pub target: PathBuf,

    /// Overwrite files already present in the target
    #[clap(long, default_value_t = false)]
    pub overwrite: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let repo = open_repository(global_args)?;
    let start = Instant::now();

    let manifest = find_snapshot(&repo, &args.snapshot)?;
    let Some(root_entry) = &manifest.root_entry else {
        bail!("Snapshot {} has no root directory", args.snapshot);
    };

    let root = ObjectDirectory::from_entry(repo.clone(), root_entry);
    let stats = restore_tree(
        &(root as std::sync::Arc<dyn crate::fs::Directory>),
        &args.target,
        &RestoreOptions {
            overwrite: args.overwrite,
        },
    )
    .with_context(|| format!("Could not restore into {}", args.target.display()))?;

    ui::cli::log!(
        "Restored {} files ({}), {} dirs, {} symlinks in {}",
        stats.restored_files,
        format_size(stats.restored_bytes, 1),
        stats.restored_dirs,
        stats.restored_symlinks,
        pretty_print_duration(start.elapsed()),
    );
    if stats.skipped > 0 {
        ui::cli::warning!("Skipped {} existing entries (use --overwrite)", stats.skipped);
    }

    Ok(())
}
