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

pub mod cmd_forget;
pub mod cmd_gc;
pub mod cmd_init;
pub mod cmd_pin;
pub mod cmd_policy;
pub mod cmd_restore;
pub mod cmd_snapshot;
pub mod cmd_snapshots;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Args;

use crate::global::{GlobalOpts, defaults, set_global_opts};
use crate::repo::Repository;
use crate::snapshot::{Manifest, store};

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Repository path
    #[clap(short, long, value_parser)]
    pub repo: PathBuf,

    /// Suppress all non-error output
    #[clap(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Verbosity level
    #[clap(short, long)]
    pub verbosity: Option<u32>,
}

pub fn set_global_opts_with_args(args: &GlobalArgs) {
    set_global_opts(GlobalOpts {
        quiet: args.quiet,
        verbosity: args.verbosity.unwrap_or(defaults::DEFAULT_VERBOSITY),
    });
}

pub fn open_repository(args: &GlobalArgs) -> Result<Arc<Repository>> {
    Repository::open_local(&args.repo)
}

/// Parses `key=value[,key=value...]` tag strings.
pub fn parse_tags(tags_str: &str) -> Result<BTreeMap<String, String>> {
    let mut tags = BTreeMap::new();

    for part in tags_str.split(',').filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                tags.insert(key.to_string(), value.to_string());
            }
            _ => bail!("Invalid tag '{part}', expected key=value"),
        }
    }

    Ok(tags)
}

/// Resolves a snapshot from an ID prefix, or the most recent one for
/// `"latest"`.
pub fn find_snapshot(repo: &Repository, selector: &str) -> Result<Manifest> {
    let mut manifests = store::list_snapshots(repo.manifests(), None);
    if manifests.is_empty() {
        bail!("The repository contains no snapshots");
    }
    store::sort_by_time(&mut manifests, true);

    if selector == "latest" {
        return Ok(manifests.remove(0));
    }

    let mut matches = manifests.into_iter().filter(|m| {
        m.id.map(|id| id.to_string().starts_with(selector))
            .unwrap_or(false)
    });

    match (matches.next(), matches.next()) {
        (None, _) => bail!("No snapshot matches '{selector}'"),
        (Some(m), None) => Ok(m),
        (Some(_), Some(_)) => bail!("Snapshot prefix '{selector}' is ambiguous"),
    }
}
