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

use crate::snapshot::store;
use crate::ui;

use super::{GlobalArgs, find_snapshot, open_repository};

#[derive(Args, Debug)]
#[clap(about = "Add or remove pins protecting a snapshot from retention")]
pub struct CmdArgs {
    /// Snapshot ID prefix, or 'latest'
    #[clap(value_parser, default_value = "latest")]
    pub snapshot: String,

    /// Pins to add
    #[clap(long = "add", value_parser, value_delimiter = ',')]
    pub add: Vec<String>,

    /// Pins to remove
    #[clap(long = "remove", value_parser, value_delimiter = ',')]
    pub remove: Vec<String>,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let repo = open_repository(global_args)?;

    let mut manifest = find_snapshot(&repo, &args.snapshot)?;

    if !manifest.update_pins(&args.add, &args.remove) {
        ui::cli::log!("Pins unchanged");
        return Ok(());
    }

    store::update_snapshot(repo.manifests(), &mut manifest)?;
    match manifest.pins.is_empty() {
        true => ui::cli::log!("All pins removed"),
        false => ui::cli::log!("Pins: {}", manifest.pins.join(", ")),
    }

    Ok(())
}
