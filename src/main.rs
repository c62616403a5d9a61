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

use clap::{Parser, Subcommand};

use urraca::commands::{
    self, GlobalArgs, cmd_forget, cmd_gc, cmd_init, cmd_pin, cmd_policy, cmd_restore,
    cmd_snapshot, cmd_snapshots,
};
use urraca::ui;

#[derive(Parser, Debug)]
#[clap(
    name = "urraca",
    version,
    about = "A deduplicating, content-addressed snapshot engine"
)]
struct Cli {
    #[clap(flatten)]
    global: GlobalArgs,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(about = "Initialize a new repository")]
    Init,
    Snapshot(cmd_snapshot::CmdArgs),
    Snapshots(cmd_snapshots::CmdArgs),
    Policy(cmd_policy::CmdArgs),
    Forget(cmd_forget::CmdArgs),
    Gc(cmd_gc::CmdArgs),
    Restore(cmd_restore::CmdArgs),
    Pin(cmd_pin::CmdArgs),
}

fn main() {
    let cli = Cli::parse();
    commands::set_global_opts_with_args(&cli.global);

    let result = match &cli.command {
        Command::Init => cmd_init::run(&cli.global),
        Command::Snapshot(args) => cmd_snapshot::run(&cli.global, args),
        Command::Snapshots(args) => cmd_snapshots::run(&cli.global, args),
        Command::Policy(args) => cmd_policy::run(&cli.global, args),
        Command::Forget(args) => cmd_forget::run(&cli.global, args),
        Command::Gc(args) => cmd_gc::run(&cli.global, args),
        Command::Restore(args) => cmd_restore::run(&cli.global, args),
        Command::Pin(args) => cmd_pin::run(&cli.global, args),
    };

    if let Err(e) = result {
        ui::cli::error!("{e:#}");
        std::process::exit(1);
    }
}
