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
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::fs::{self, local};
use crate::global::defaults::SHORT_ID_LEN;
use crate::policy;
use crate::snapshot::{Manifest, parse_source, store};
use crate::ui::{
    self, PROGRESS_REFRESH_RATE_HZ, SPINNER_TICK_CHARS, default_bar_draw_target,
    table::{Alignment, Table},
};
use crate::uploader::Uploader;
use crate::utils::{self, format_size};

use super::{GlobalArgs, open_repository, parse_tags};

#[derive(Args, Debug)]
#[clap(about = "Create a new snapshot")]
pub struct CmdArgs {
    /// Directory (or file) to snapshot
    #[clap(value_parser, required = true)]
    pub path: PathBuf,

    /// Snapshot description
    #[clap(long, value_parser)]
    pub description: Option<String>,

    /// Tags: key=value[,key=value...]
    #[clap(long = "tags", value_parser, default_value_t = String::new())]
    pub tags_str: String,

    /// Number of files to upload in parallel
    #[clap(long)]
    pub parallel: Option<usize>,

    /// Abort on the first fatal error
    #[clap(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Probability (0..100) of re-hashing entries despite the cache
    #[clap(long, default_value_t = 0)]
    pub force_hash: u32,

    /// Ignore previous snapshots and re-hash everything
    #[clap(long = "no-parent", default_value_t = false)]
    pub rescan: bool,
}

pub fn run(global_args: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let repo = open_repository(global_args)?;
    let start = Instant::now();

    let source = parse_source(
        &args.path.to_string_lossy(),
        &utils::current_hostname(),
        &utils::current_username(),
    )?;

    let root_entry = local::entry_from_path(&args.path)
        .with_context(|| format!("Cannot access {}", args.path.display()))?;
    let tags = parse_tags(&args.tags_str)?;

    let policy_tree = policy::tree_for_source(repo.manifests(), &source)?;

    let previous: Vec<Manifest> = if args.rescan {
        ui::cli::log!("Full scan");
        Vec::new()
    } else {
        let mut manifests = store::list_snapshots(repo.manifests(), Some(&source));
        store::sort_by_time(&mut manifests, true);
        manifests.retain(Manifest::is_complete);
        manifests.truncate(1);

        match manifests.first().and_then(|m| m.id) {
            Some(id) => ui::cli::log!(
                "Using snapshot {} as parent",
                id.hash().to_short_hex(SHORT_ID_LEN).bold().yellow()
            ),
            None => ui::cli::log!("No previous snapshot found, doing a full scan"),
        }
        manifests
    };

    estimate(&root_entry);

    let mut uploader = Uploader::new(repo.clone());
    uploader.parallel_uploads = args.parallel;
    uploader.fail_fast = args.fail_fast;
    uploader.force_hash_percentage = args.force_hash;
    uploader.checkpoint_labels = tags.clone();

    let uploader = Arc::new(uploader);
    let cancel_handle = uploader.clone();
    ctrlc::set_handler(move || {
        ui::cli::warning!("Cancelling snapshot...");
        cancel_handle.cancel();
    })
    .with_context(|| "Could not install the Ctrl-C handler")?;

    let mut manifest = uploader.upload(root_entry, &policy_tree, source, &previous)?;
    manifest.description = args.description.clone().unwrap_or_default();
    manifest.tags = tags;

    let id = store::save_snapshot(repo.manifests(), &mut manifest)?;
    repo.flush()?;

    show_report(&manifest);
    ui::cli::log!(
        "Snapshot {} created in {}",
        id.hash().to_short_hex(SHORT_ID_LEN).bold().green(),
        utils::pretty_print_duration(start.elapsed())
    );
    if let Some(reason) = &manifest.incomplete_reason {
        ui::cli::warning!("Snapshot is incomplete: {reason}");
    }

    Ok(())
}

/// Pre-scan of the tree so the user sees what is about to be committed.
fn estimate(root: &fs::Entry) {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(default_bar_draw_target());
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} Scanning filesystem ({msg})")
            .expect("The scan spinner template is valid")
            .tick_chars(SPINNER_TICK_CHARS),
    );
    spinner.enable_steady_tick(Duration::from_millis(
        (1000.0_f32 / PROGRESS_REFRESH_RATE_HZ as f32) as u64,
    ));

    let mut num_files: u64 = 0;
    let mut num_dirs: u64 = 0;
    let mut total_bytes: u64 = 0;

    let mut stack = vec![root.clone()];
    while let Some(entry) = stack.pop() {
        match entry {
            fs::Entry::File(file) => {
                num_files += 1;
                total_bytes += file.metadata().size;
            }
            fs::Entry::Directory(dir) => {
                num_dirs += 1;
                if let Ok(children) = dir.entries() {
                    stack.extend(children);
                }
            }
            fs::Entry::Symlink(_) | fs::Entry::Error(_) => {}
        }

        spinner.set_message(format!(
            "{num_files} files, {num_dirs} dirs, {}",
            format_size(total_bytes, 1)
        ));
    }

    spinner.finish_and_clear();
    ui::cli::log!(
        "{} {} files, {} directories, {}",
        "To commit:".bold().cyan(),
        num_files,
        num_dirs,
        format_size(total_bytes, 1),
    );
}

fn show_report(manifest: &Manifest) {
    let stats = &manifest.stats;

    let mut table = Table::new_with_alignments(vec![Alignment::Left, Alignment::Right]);
    table.add_row(vec![
        "Hashed files".to_string(),
        format!(
            "{} ({})",
            stats.non_cached_files,
            format_size(stats.total_file_size, 1)
        ),
    ]);
    table.add_row(vec!["Cached files".to_string(), stats.cached_files.to_string()]);
    table.add_row(vec![
        "Directories".to_string(),
        stats.total_directory_count.to_string(),
    ]);
    table.add_row(vec![
        "Symlinks".to_string(),
        stats.total_symlink_count.to_string(),
    ]);
    if stats.excluded_file_count + stats.excluded_dir_count > 0 {
        table.add_row(vec![
            "Excluded".to_string(),
            format!(
                "{} files, {} dirs",
                stats.excluded_file_count, stats.excluded_dir_count
            ),
        ]);
    }
    if stats.error_count + stats.ignored_error_count > 0 {
        table.add_row(vec![
            "Errors".to_string(),
            format!(
                "{} fatal, {} ignored",
                stats.error_count.to_string().red(),
                stats.ignored_error_count
            ),
        ]);
    }

    ui::cli::log!("{}", table.render());
}
