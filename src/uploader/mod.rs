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

//! The uploader walks a filesystem entry under an effective policy tree
//! and produces a snapshot manifest, reusing results from previous
//! snapshots for unchanged files, uploading changed files through a
//! bounded worker pool and committing periodic checkpoints.

mod ignore;
mod workers;

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use rand::Rng;

use crate::content::Compression;
use crate::fs;
use crate::global::defaults::{DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_PARALLEL_UPLOAD_ABOVE_SIZE};
use crate::object::splitter::SplitterConfig;
use crate::object::{ObjectId, WriteOptions};
use crate::policy::{LogDetail, PolicyTree};
use crate::repo::Repository;
use crate::snapshot::store;
use crate::snapshot::{
    DirEntry, DirManifest, DirectorySummary, EntryType, Manifest, Permissions, SnapshotStats,
    SourceInfo,
};
use crate::ui;
use crate::utils;

use ignore::{CompiledRules, IgnoreContext};
use workers::WorkerPool;

pub const CHECKPOINT_REASON: &str = "checkpoint";
pub const CANCELLED_REASON: &str = "cancelled";

const CACHE_DIR_TAG_NAME: &str = "CACHEDIR.TAG";
const CACHE_DIR_TAG_SIGNATURE: &[u8] = b"Signature: 8a477f597d28d172789f06886806bc55";

/// Produces snapshot manifests from filesystem entries. One uploader can
/// run many uploads; `cancel` cooperatively aborts the current (and any
/// subsequent) one.
pub struct Uploader {
    repo: Arc<Repository>,

    /// Worker pool width; defaults to the upload policy or the CPU count.
    pub parallel_uploads: Option<usize>,

    /// Abort on the first fatal entry error instead of recording it.
    pub fail_fast: bool,

    /// Probability (0..100) of re-hashing an entry despite a cache hit,
    /// for periodic integrity re-validation.
    pub force_hash_percentage: u32,

    pub checkpoint_interval: std::time::Duration,

    /// Tags attached to checkpoint manifests.
    pub checkpoint_labels: BTreeMap<String, String>,

    pub override_dir_log_detail: Option<LogDetail>,
    pub override_entry_log_detail: Option<LogDetail>,

    cancel_requested: Arc<AtomicBool>,
    test_ticker: Mutex<Option<Receiver<Instant>>>,
    checkpoint_finished: Mutex<Option<crossbeam_channel::Sender<()>>>,
}

impl Uploader {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            parallel_uploads: None,
            fail_fast: false,
            force_hash_percentage: 0,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            checkpoint_labels: BTreeMap::new(),
            override_dir_log_detail: None,
            override_entry_log_detail: None,
            cancel_requested: Arc::new(AtomicBool::new(false)),
            test_ticker: Mutex::new(None),
            checkpoint_finished: Mutex::new(None),
        }
    }

    /// Requests cooperative cancellation. The in-flight upload commits a
    /// manifest marked `incomplete = "cancelled"`.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Test hook: replaces the checkpoint ticker for the next upload.
    pub fn override_ticker(&self, ticker: Receiver<Instant>) {
        *self.test_ticker.lock() = Some(ticker);
    }

    /// Test hook: signalled after every committed checkpoint.
    pub fn notify_checkpoints(&self, tx: crossbeam_channel::Sender<()>) {
        *self.checkpoint_finished.lock() = Some(tx);
    }

    /// Uploads `source_entry`, reusing `previous` manifests where inputs
    /// are unchanged, and returns the (unsaved) snapshot manifest.
    pub fn upload(
        &self,
        source_entry: fs::Entry,
        policy_tree: &PolicyTree,
        source: SourceInfo,
        previous: &[Manifest],
    ) -> Result<Manifest> {
        let effective = policy_tree.effective();

        let parallel = self
            .parallel_uploads
            .or(effective.upload.max_parallel_file_reads.map(|n| n as usize))
            .unwrap_or_else(num_cpus::get)
            .max(1);

        let splitter = match &effective.splitter.algorithm {
            Some(algorithm) => SplitterConfig::from_algorithm(algorithm)?,
            None => SplitterConfig::default(),
        };

        let ticker = self
            .test_ticker
            .lock()
            .take()
            .unwrap_or_else(|| crossbeam_channel::tick(self.checkpoint_interval));

        let run = UploadRun {
            repo: self.repo.clone(),
            stats: Arc::new(AtomicStats::default()),
            cancel: self.cancel_requested.clone(),
            workers: WorkerPool::new(parallel),
            parallel,
            fail_fast: self.fail_fast,
            force_hash_percentage: self.force_hash_percentage,
            override_dir_log_detail: self.override_dir_log_detail,
            override_entry_log_detail: self.override_entry_log_detail,
            source: source.clone(),
            checkpoint_labels: self.checkpoint_labels.clone(),
            start_time: Utc::now(),
            checkpoint_count: AtomicU32::new(0),
            frames: Mutex::new(Vec::new()),
            checkpoint_finished: self.checkpoint_finished.lock().clone(),
            ticker,
            splitter,
            parallel_upload_above_size: effective
                .upload
                .parallel_upload_above_size
                .unwrap_or(DEFAULT_PARALLEL_UPLOAD_ABOVE_SIZE),
            metadata_compression: effective.metadata_compression.metadata_compression(),
        };

        let prev_roots: Vec<DirManifest> = previous
            .iter()
            .filter_map(|m| m.root_entry.as_ref())
            .filter(|e| e.entry_type == EntryType::Directory)
            .filter_map(|e| run.read_dir_manifest(&e.object_id).ok())
            .collect();

        let root_entry = match source_entry {
            fs::Entry::Directory(dir) => {
                run.process_directory(&dir, "", policy_tree, &prev_roots, &IgnoreContext::root())?
            }
            fs::Entry::File(file) => {
                let compression = effective
                    .compression
                    .compression_for(&file.metadata().name, file.metadata().size);
                let entry = upload_file_blob(&run.repo, &file, run.splitter, compression)?;
                run.stats.add_uploaded_file(entry.size);
                entry
            }
            fs::Entry::Symlink(link) => run.upload_symlink(&link)?,
            fs::Entry::Error(e) => {
                bail!("Cannot snapshot {}: {}", e.name, e.message);
            }
        };

        let checkpoints = run.checkpoint_count.load(Ordering::SeqCst);
        let start_time = run.start_time + ChronoDuration::microseconds(checkpoints as i64);
        let end_time = Utc::now().max(start_time);

        Ok(Manifest {
            id: None,
            source,
            description: String::new(),
            start_time,
            end_time,
            stats: run.stats.snapshot(),
            incomplete_reason: run
                .cancelled()
                .then(|| CANCELLED_REASON.to_string()),
            root_entry: Some(root_entry),
            tags: BTreeMap::new(),
            pins: Vec::new(),
            retention_reasons: Vec::new(),
        })
    }
}

/// Live partial state of one directory on the walk chain, consumed by
/// checkpoints.
#[derive(Clone)]
struct Frame {
    metadata: fs::Metadata,
    completed: Vec<DirEntry>,
}

struct UploadRun {
    repo: Arc<Repository>,
    stats: Arc<AtomicStats>,
    cancel: Arc<AtomicBool>,
    workers: WorkerPool,
    parallel: usize,
    fail_fast: bool,
    force_hash_percentage: u32,
    override_dir_log_detail: Option<LogDetail>,
    override_entry_log_detail: Option<LogDetail>,
    source: SourceInfo,
    checkpoint_labels: BTreeMap<String, String>,
    start_time: DateTime<Utc>,
    checkpoint_count: AtomicU32,
    frames: Mutex<Vec<Frame>>,
    checkpoint_finished: Option<crossbeam_channel::Sender<()>>,
    ticker: Receiver<Instant>,
    splitter: SplitterConfig,
    parallel_upload_above_size: u64,
    metadata_compression: Option<Compression>,
}

impl UploadRun {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Walks one directory and returns its serialized entry. The caller
    /// decides how a failure is classified (fatal vs ignored).
    fn process_directory(
        &self,
        dir: &Arc<dyn fs::Directory>,
        rel: &str,
        policy: &PolicyTree,
        prev: &[DirManifest],
        ignore: &IgnoreContext,
    ) -> Result<DirEntry> {
        let started = Instant::now();
        let metadata = dir.metadata().clone();

        self.frames.lock().push(Frame {
            metadata: metadata.clone(),
            completed: Vec::new(),
        });

        let result = self.process_children(dir, rel, policy, prev, ignore);

        // The frame comes off the chain whether the directory succeeded
        // or not.
        self.frames.lock().pop();

        let (mut entries, error_summary) = result?;
        entries.sort_by(|first, second| first.name.cmp(&second.name));

        let mut summary = DirectorySummary::from_entries(&entries);
        summary.fatal_error_count += error_summary.fatal_error_count;
        summary.ignored_error_count += error_summary.ignored_error_count;
        summary.failed_entries.extend(error_summary.failed_entries);
        summary
            .failed_entries
            .truncate(crate::global::defaults::MAX_FAILED_ENTRIES_PER_DIR);

        let manifest = DirManifest::new(entries, summary);

        let object_id = self.write_dir_object(&manifest)?;
        self.stats.total_directory_count.fetch_add(1, Ordering::Relaxed);

        let entry = DirEntry {
            name: metadata.name.clone(),
            entry_type: EntryType::Directory,
            mode: Permissions(metadata.mode),
            size: 0,
            mtime: metadata.mtime,
            uid: metadata.uid,
            gid: metadata.gid,
            birth_time: metadata.birth_time,
            object_id,
            summary: Some(manifest.summary.clone()),
        };

        self.complete_entry(entry.clone());

        let detail = self.dir_detail(policy.effective().logging.directories.snapshotted);
        self.log_dir(detail, "snapshotted directory", rel, Some(&entry), started.elapsed());

        Ok(entry)
    }

    /// Processes the children of a directory, returning the accumulated
    /// entries and the error side of the summary (counts plus failed
    /// entries local to this directory).
    #[allow(clippy::type_complexity)]
    fn process_children(
        &self,
        dir: &Arc<dyn fs::Directory>,
        rel: &str,
        policy: &PolicyTree,
        prev: &[DirManifest],
        ignore: &IgnoreContext,
    ) -> Result<(Vec<DirEntry>, DirectorySummary)> {
        let effective = policy.effective();
        let files_policy = &effective.files;
        let error_policy = &effective.error_handling;

        let mut ignore = ignore.clone();

        // Policy ignore rules anchor at their definition point: the source
        // root, or any subpath with an explicitly defined policy.
        if (rel.is_empty() || !policy.is_inherited()) && !files_policy.ignore_rules.is_empty() {
            ignore.push(CompiledRules::compile(rel, &files_policy.ignore_rules)?);
        }

        let mut entries: Vec<DirEntry> = Vec::new();
        let mut error_summary = DirectorySummary::default();
        let mut async_uploads: Vec<(String, Receiver<Result<DirEntry>>)> = Vec::new();

        let children = dir
            .entries()
            .with_context(|| format!("Cannot read directory {}", display_rel(rel)))?;

        for child in children {
            if self.cancelled() {
                break;
            }
            self.maybe_checkpoint()?;

            let name = child.name().to_string();
            let child_rel = join_rel(rel, &name);

            if let fs::Entry::Error(error_entry) = &child {
                match error_entry.kind {
                    fs::ErrorEntryKind::UnknownType if error_policy.unknown_types_ignored() => {
                        // Silently skipped.
                    }
                    _ => {
                        self.record_entry_error(
                            &mut error_summary,
                            &child_rel,
                            &name,
                            &error_entry.message,
                            error_policy.file_errors_ignored(),
                        )?;
                    }
                }
                continue;
            }

            if ignore.is_ignored(&child_rel, child.is_dir()) {
                self.count_excluded(&child, &child_rel, effective);
                continue;
            }

            match child {
                fs::Entry::File(file) => {
                    if files_policy.dot_ignore_files.contains(&name) {
                        match read_ignore_file(&file) {
                            Ok(patterns) => {
                                ignore.push(CompiledRules::compile(rel, &patterns)?);
                            }
                            Err(e) => {
                                self.record_entry_error(
                                    &mut error_summary,
                                    &child_rel,
                                    &name,
                                    &e.to_string(),
                                    error_policy.file_errors_ignored(),
                                )?;
                                continue;
                            }
                        }
                    }

                    let metadata = file.metadata().clone();

                    if let Some(max) = files_policy.effective_max_file_size()
                        && metadata.size > max
                    {
                        self.stats.excluded_file_count.fetch_add(1, Ordering::Relaxed);
                        self.stats
                            .excluded_total_file_size
                            .fetch_add(metadata.size, Ordering::Relaxed);
                        let detail = self.entry_detail(effective.logging.entries.ignored);
                        self.log_entry(detail, "ignored", &child_rel, Some(&metadata));
                        continue;
                    }

                    let cached = prev
                        .iter()
                        .find_map(|m| m.find_entry(&name))
                        .filter(|e| e.entry_type == EntryType::File);

                    if let Some(prior) = cached
                        && prior.metadata_matches(&metadata)
                        && !self.force_hash_roll()
                    {
                        let mut reused = prior.clone();
                        // A live birth time wins; otherwise the cached one
                        // is carried over.
                        if metadata.birth_time.is_some() {
                            reused.birth_time = metadata.birth_time;
                        }

                        self.stats.cached_files.fetch_add(1, Ordering::Relaxed);
                        let detail = self.entry_detail(effective.logging.entries.cache_hit);
                        self.log_entry(detail, "cached", &child_rel, Some(&metadata));
                        self.complete_entry(reused.clone());
                        entries.push(reused);
                        continue;
                    }

                    let detail = self.entry_detail(effective.logging.entries.cache_miss);
                    self.log_entry(detail, "hashing", &child_rel, Some(&metadata));

                    let compression = effective
                        .compression
                        .compression_for(&name, metadata.size);

                    if metadata.size > self.parallel_upload_above_size {
                        match self.upload_large_file(&file, compression) {
                            Ok(entry) => {
                                let detail =
                                    self.entry_detail(effective.logging.entries.snapshotted);
                                self.log_entry(detail, "snapshotted", &child_rel, Some(&metadata));
                                self.complete_entry(entry.clone());
                                entries.push(entry);
                            }
                            Err(e) => {
                                self.record_entry_error(
                                    &mut error_summary,
                                    &child_rel,
                                    &name,
                                    &e.to_string(),
                                    error_policy.file_errors_ignored(),
                                )?;
                            }
                        }
                        continue;
                    }

                    let (tx, rx) = crossbeam_channel::bounded(1);
                    let repo = self.repo.clone();
                    let stats = self.stats.clone();
                    let splitter = self.splitter;
                    self.workers.submit(Box::new(move || {
                        let result = upload_file_blob(&repo, &file, splitter, compression)
                            .inspect(|entry| stats.add_uploaded_file(entry.size));
                        let _ = tx.send(result);
                    }));
                    async_uploads.push((name, rx));
                }

                fs::Entry::Directory(subdir) => {
                    let child_policy = policy.child(&name);

                    if child_policy
                        .effective()
                        .files
                        .ignore_cache_dirs
                        .unwrap_or(true)
                        && is_cache_dir(&subdir)
                    {
                        self.stats.excluded_dir_count.fetch_add(1, Ordering::Relaxed);
                        let detail =
                            self.dir_detail(effective.logging.directories.ignored);
                        self.log_dir(detail, "ignored cache directory", &child_rel, None, Default::default());
                        continue;
                    }

                    let child_prev = self.load_child_manifests(prev, &name);

                    match self.process_directory(
                        &subdir,
                        &child_rel,
                        &child_policy,
                        &child_prev,
                        &ignore,
                    ) {
                        Ok(entry) => entries.push(entry),
                        Err(e) => {
                            let ignored = child_policy
                                .effective()
                                .error_handling
                                .directory_errors_ignored();
                            self.record_entry_error(
                                &mut error_summary,
                                &child_rel,
                                &name,
                                &e.to_string(),
                                ignored,
                            )?;
                        }
                    }
                }

                fs::Entry::Symlink(link) => match self.upload_symlink(&link) {
                    Ok(entry) => {
                        let detail = self.entry_detail(effective.logging.entries.snapshotted);
                        self.log_entry(detail, "snapshotted", &child_rel, Some(link.metadata()));
                        self.complete_entry(entry.clone());
                        entries.push(entry);
                    }
                    Err(e) => {
                        self.record_entry_error(
                            &mut error_summary,
                            &child_rel,
                            &name,
                            &e.to_string(),
                            error_policy.file_errors_ignored(),
                        )?;
                    }
                },

                fs::Entry::Error(_) => unreachable!("handled above"),
            }
        }

        for (name, rx) in async_uploads {
            let result = rx
                .recv()
                .map_err(|_| anyhow!("Upload worker disappeared"))?;
            match result {
                Ok(entry) => {
                    self.complete_entry(entry.clone());
                    entries.push(entry);
                }
                Err(e) => {
                    self.record_entry_error(
                        &mut error_summary,
                        &join_rel(rel, &name),
                        &name,
                        &e.to_string(),
                        policy.effective().error_handling.file_errors_ignored(),
                    )?;
                }
            }
        }

        Ok((entries, error_summary))
    }

    /// Records a per-entry failure according to the error policy. Errors
    /// are always logged; fatal errors abort the upload in fail-fast mode.
    fn record_entry_error(
        &self,
        error_summary: &mut DirectorySummary,
        child_rel: &str,
        name: &str,
        message: &str,
        ignored: bool,
    ) -> Result<()> {
        ui::cli::error!("{}: {}", display_rel(child_rel), message);

        error_summary.add_failure(name, message, ignored);

        if ignored {
            self.stats.ignored_error_count.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.stats.error_count.fetch_add(1, Ordering::Relaxed);
        if self.fail_fast {
            bail!("{}: {}", display_rel(child_rel), message);
        }
        Ok(())
    }

    fn count_excluded(&self, child: &fs::Entry, child_rel: &str, effective: &crate::policy::Policy) {
        if child.is_dir() {
            self.stats.excluded_dir_count.fetch_add(1, Ordering::Relaxed);
            let detail = self.dir_detail(effective.logging.directories.ignored);
            self.log_dir(detail, "ignored directory", child_rel, None, Default::default());
        } else {
            self.stats.excluded_file_count.fetch_add(1, Ordering::Relaxed);
            if let Some(metadata) = child.metadata() {
                self.stats
                    .excluded_total_file_size
                    .fetch_add(metadata.size, Ordering::Relaxed);
            }
            let detail = self.entry_detail(effective.logging.entries.ignored);
            self.log_entry(detail, "ignored", child_rel, child.metadata());
        }
    }

    fn complete_entry(&self, entry: DirEntry) {
        if let Some(frame) = self.frames.lock().last_mut() {
            frame.completed.push(entry);
        }
    }

    fn force_hash_roll(&self) -> bool {
        self.force_hash_percentage > 0
            && rand::rng().random_range(0..100u32) < self.force_hash_percentage
    }

    fn upload_symlink(&self, link: &Arc<dyn fs::Symlink>) -> Result<DirEntry> {
        let metadata = link.metadata().clone();
        let target = link.readlink()?;

        let object_id = self.repo.objects().write_object(
            target.as_bytes(),
            WriteOptions {
                description: format!("SYMLINK:{}", metadata.name),
                splitter: self.splitter,
                compression: None,
            },
        )?;

        self.stats.total_symlink_count.fetch_add(1, Ordering::Relaxed);

        Ok(DirEntry {
            name: metadata.name,
            entry_type: EntryType::Symlink,
            mode: Permissions(metadata.mode),
            size: target.len() as u64,
            mtime: metadata.mtime,
            uid: metadata.uid,
            gid: metadata.gid,
            birth_time: metadata.birth_time,
            object_id,
            summary: None,
        })
    }

    /// Splits a large file into equal sections uploaded concurrently
    /// through the worker pool and stitches them into an indirect object.
    fn upload_large_file(
        &self,
        file: &Arc<dyn fs::File>,
        compression: Option<Compression>,
    ) -> Result<DirEntry> {
        let metadata = file.metadata().clone();
        let max_chunk = self.splitter.max_chunk_size() as u64;

        let section_size = metadata
            .size
            .div_ceil(self.parallel as u64)
            .max(max_chunk)
            .next_multiple_of(max_chunk);
        let num_sections = metadata.size.div_ceil(section_size).max(1);

        let (tx, rx) = crossbeam_channel::bounded(num_sections as usize);

        for i in 0..num_sections {
            let start = i * section_size;
            let length = section_size.min(metadata.size - start);

            let tx = tx.clone();
            let repo = self.repo.clone();
            let splitter = self.splitter;
            let file = file.clone();

            self.workers.submit(Box::new(move || {
                let result = (|| -> Result<crate::object::IndirectEntry> {
                    let mut reader = file.open()?;
                    reader.seek(SeekFrom::Start(start))?;

                    let mut writer = repo.objects().open_writer(WriteOptions {
                        description: format!("SECTION:{start}"),
                        splitter,
                        compression,
                    });
                    std::io::copy(&mut reader.take(length), &mut writer)?;

                    Ok(crate::object::IndirectEntry {
                        start,
                        length,
                        object: writer.result()?,
                    })
                })();
                let _ = tx.send(result);
            }));
        }
        drop(tx);

        let mut sections = Vec::with_capacity(num_sections as usize);
        let mut first_error = None;
        for result in rx {
            match result {
                Ok(section) => sections.push(section),
                Err(e) => first_error = first_error.or(Some(e)),
            }
        }
        if let Some(e) = first_error {
            return Err(e).with_context(|| format!("Uploading {}", metadata.name));
        }

        sections.sort_by_key(|s| s.start);
        let object_id = self.repo.objects().stitch_sections(sections)?;

        self.stats.add_uploaded_file(metadata.size);

        Ok(DirEntry {
            name: metadata.name.clone(),
            entry_type: EntryType::File,
            mode: Permissions(metadata.mode),
            size: metadata.size,
            mtime: metadata.mtime,
            uid: metadata.uid,
            gid: metadata.gid,
            birth_time: metadata.birth_time,
            object_id,
            summary: None,
        })
    }

    fn write_dir_object(&self, manifest: &DirManifest) -> Result<ObjectId> {
        self.repo.objects().write_object(
            &manifest.to_canonical_bytes()?,
            WriteOptions {
                description: String::from("DIR"),
                splitter: self.splitter,
                compression: self.metadata_compression,
            },
        )
    }

    fn read_dir_manifest(&self, object_id: &ObjectId) -> Result<DirManifest> {
        DirManifest::from_bytes(&self.repo.objects().read_object(object_id)?)
    }

    fn load_child_manifests(&self, prev: &[DirManifest], name: &str) -> Vec<DirManifest> {
        prev.iter()
            .filter_map(|m| m.find_entry(name))
            .filter(|e| e.entry_type == EntryType::Directory)
            .filter_map(|e| self.read_dir_manifest(&e.object_id).ok())
            .collect()
    }

    /// Services pending checkpoint ticks. Called between child entries.
    fn maybe_checkpoint(&self) -> Result<()> {
        while self.ticker.try_recv().is_ok() {
            self.perform_checkpoint()?;
        }
        Ok(())
    }

    /// Builds a partial tree from the live directory chain (completed
    /// children only) and commits it as an incomplete snapshot.
    fn perform_checkpoint(&self) -> Result<()> {
        let frames = self.frames.lock().clone();
        if frames.is_empty() {
            return Ok(());
        }

        let mut child: Option<DirEntry> = None;
        for frame in frames.iter().rev() {
            let mut entries = frame.completed.clone();
            if let Some(entry) = child.take() {
                entries.push(entry);
            }

            let summary = DirectorySummary::from_entries(&entries);
            let manifest = DirManifest::new(entries, summary);
            let object_id = self.write_dir_object(&manifest)?;

            child = Some(DirEntry {
                name: frame.metadata.name.clone(),
                entry_type: EntryType::Directory,
                mode: Permissions(frame.metadata.mode),
                size: 0,
                mtime: frame.metadata.mtime,
                uid: frame.metadata.uid,
                gid: frame.metadata.gid,
                birth_time: frame.metadata.birth_time,
                object_id,
                summary: Some(manifest.summary.clone()),
            });
        }

        let ordinal = self.checkpoint_count.fetch_add(1, Ordering::SeqCst);

        let mut manifest = Manifest {
            id: None,
            source: self.source.clone(),
            description: String::new(),
            start_time: self.start_time + ChronoDuration::microseconds(ordinal as i64),
            end_time: Utc::now().max(self.start_time),
            stats: self.stats.snapshot(),
            incomplete_reason: Some(CHECKPOINT_REASON.to_string()),
            root_entry: child,
            tags: self.checkpoint_labels.clone(),
            pins: Vec::new(),
            retention_reasons: Vec::new(),
        };

        store::save_snapshot(self.repo.manifests(), &mut manifest)?;
        ui::cli::verbose_1!(
            "Checkpoint {} committed",
            manifest.id.map(|id| id.to_string()).unwrap_or_default()
        );

        if let Some(tx) = &self.checkpoint_finished {
            let _ = tx.send(());
        }

        Ok(())
    }

    fn dir_detail(&self, policy_detail: Option<LogDetail>) -> LogDetail {
        self.override_dir_log_detail
            .or(policy_detail)
            .unwrap_or(LogDetail::NONE)
    }

    fn entry_detail(&self, policy_detail: Option<LogDetail>) -> LogDetail {
        self.override_entry_log_detail
            .or(policy_detail)
            .unwrap_or(LogDetail::NONE)
    }

    fn log_dir(
        &self,
        detail: LogDetail,
        action: &str,
        rel: &str,
        entry: Option<&DirEntry>,
        dur: std::time::Duration,
    ) {
        if detail == LogDetail::NONE {
            return;
        }

        if detail < LogDetail::NORMAL {
            ui::cli::log!(
                "{action} {} dur={}",
                display_rel(rel),
                utils::pretty_print_duration(dur)
            );
            return;
        }

        let (size, dirs, files, errors, oid) = entry
            .and_then(|e| e.summary.as_ref().map(|s| (e, s)))
            .map(|(e, s)| {
                (
                    s.size,
                    s.dirs,
                    s.files,
                    s.fatal_error_count + s.ignored_error_count,
                    e.object_id.to_string(),
                )
            })
            .unwrap_or_default();
        ui::cli::log!(
            "{action} {} dur={} size={size} dirs={dirs} files={files} errors={errors} oid={oid}",
            display_rel(rel),
            utils::pretty_print_duration(dur),
        );
    }

    fn log_entry(
        &self,
        detail: LogDetail,
        action: &str,
        rel: &str,
        metadata: Option<&fs::Metadata>,
    ) {
        if detail == LogDetail::NONE {
            return;
        }

        if detail < LogDetail::NORMAL {
            ui::cli::log!("{action} {}", display_rel(rel));
            return;
        }

        let (size, mtime, mode) = metadata
            .map(|m| (m.size, m.mtime.to_rfc3339(), format!("0{:o}", m.mode)))
            .unwrap_or_default();
        ui::cli::log!(
            "{action} {} size={size} mtime={mtime} mode={mode}",
            display_rel(rel)
        );
    }
}

#[derive(Default)]
struct AtomicStats {
    total_file_size: AtomicU64,
    excluded_total_file_size: AtomicU64,
    total_file_count: AtomicU32,
    total_symlink_count: AtomicU32,
    total_directory_count: AtomicU32,
    cached_files: AtomicU32,
    non_cached_files: AtomicU32,
    excluded_file_count: AtomicU32,
    excluded_dir_count: AtomicU32,
    error_count: AtomicU32,
    ignored_error_count: AtomicU32,
}

impl AtomicStats {
    fn add_uploaded_file(&self, size: u64) {
        self.total_file_count.fetch_add(1, Ordering::Relaxed);
        self.non_cached_files.fetch_add(1, Ordering::Relaxed);
        self.total_file_size.fetch_add(size, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SnapshotStats {
        SnapshotStats {
            total_file_size: self.total_file_size.load(Ordering::Relaxed),
            excluded_total_file_size: self.excluded_total_file_size.load(Ordering::Relaxed),
            total_file_count: self.total_file_count.load(Ordering::Relaxed),
            total_symlink_count: self.total_symlink_count.load(Ordering::Relaxed),
            total_directory_count: self.total_directory_count.load(Ordering::Relaxed),
            cached_files: self.cached_files.load(Ordering::Relaxed),
            non_cached_files: self.non_cached_files.load(Ordering::Relaxed),
            excluded_file_count: self.excluded_file_count.load(Ordering::Relaxed),
            excluded_dir_count: self.excluded_dir_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            ignored_error_count: self.ignored_error_count.load(Ordering::Relaxed),
        }
    }
}

fn upload_file_blob(
    repo: &Repository,
    file: &Arc<dyn fs::File>,
    splitter: SplitterConfig,
    compression: Option<Compression>,
) -> Result<DirEntry> {
    let metadata = file.metadata().clone();

    let mut reader = file
        .open()
        .with_context(|| format!("Cannot open {}", metadata.name))?;
    let mut writer = repo.objects().open_writer(WriteOptions {
        description: format!("FILE:{}", metadata.name),
        splitter,
        compression,
    });

    let copied = std::io::copy(&mut reader, &mut writer)
        .with_context(|| format!("Cannot read {}", metadata.name))?;
    let object_id = writer.result()?;

    Ok(DirEntry {
        name: metadata.name,
        entry_type: EntryType::File,
        mode: Permissions(metadata.mode),
        size: copied,
        mtime: metadata.mtime,
        uid: metadata.uid,
        gid: metadata.gid,
        birth_time: metadata.birth_time,
        object_id,
        summary: None,
    })
}

fn read_ignore_file(file: &Arc<dyn fs::File>) -> Result<Vec<String>> {
    let mut raw = String::new();
    file.open()?.read_to_string(&mut raw)?;

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// A directory carrying a signed CACHEDIR.TAG is a tool cache and is
/// excluded wholesale. Children are enumerated only up to the tag name.
fn is_cache_dir(dir: &Arc<dyn fs::Directory>) -> bool {
    let Ok(children) = dir.entries() else {
        return false;
    };

    for child in children {
        let name = child.name();
        if name > CACHE_DIR_TAG_NAME {
            return false;
        }
        if name != CACHE_DIR_TAG_NAME {
            continue;
        }

        let fs::Entry::File(file) = child else {
            return false;
        };
        let Ok(mut reader) = file.open() else {
            return false;
        };

        let mut prefix = vec![0u8; CACHE_DIR_TAG_SIGNATURE.len()];
        return match reader.read_exact(&mut prefix) {
            Ok(()) => prefix == CACHE_DIR_TAG_SIGNATURE,
            Err(_) => false,
        };
    }

    false
}

fn join_rel(rel: &str, name: &str) -> String {
    if rel.is_empty() {
        name.to_string()
    } else {
        format!("{rel}/{name}")
    }
}

fn display_rel(rel: &str) -> String {
    if rel.is_empty() {
        String::from(".")
    } else {
        format!("./{rel}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::fs::memory::{MemDirectory, MemFile, StreamingDirectory};
    use crate::policy::{self, Policy};
    use crate::snapshot::store as snapshot_store;

    fn source() -> SourceInfo {
        SourceInfo::new("burrow", "pepe", "/data")
    }

    fn default_tree() -> PolicyTree {
        PolicyTree::for_policy(policy::default_policy())
    }

    fn upload_with(
        uploader: &Uploader,
        root: &Arc<MemDirectory>,
        tree: &PolicyTree,
        previous: &[Manifest],
    ) -> Result<Manifest> {
        uploader.upload(
            fs::Entry::Directory(root.clone() as Arc<dyn fs::Directory>),
            tree,
            source(),
            previous,
        )
    }

    /// The directory tree from the cached-upload scenario:
    /// f1..f3 at the root, d1/d1/{f1,f2}, d1/f2, d2/d1/{f1,f2}.
    fn build_tree_fixture() -> Arc<MemDirectory> {
        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("f1", b"abc".as_slice());
        root.add_file("f2", b"abcd".as_slice());
        root.add_file("f3", b"abcde".as_slice());

        let d1 = root.add_dir("d1");
        let d1d1 = d1.add_dir("d1");
        d1d1.add_file("f1", b"abc".as_slice());
        d1d1.add_file("f2", b"abcd".as_slice());
        d1.add_file("f2", b"abcd".as_slice());

        let d2 = root.add_dir("d2");
        let d2d1 = d2.add_dir("d1");
        d2d1.add_file("f1", b"abc".as_slice());
        d2d1.add_file("f2", b"abcd".as_slice());

        root
    }

    #[test]
    fn test_second_upload_is_fully_cached() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);
        let root = build_tree_fixture();
        let tree = default_tree();

        let s1 = upload_with(&uploader, &root, &tree, &[])?;
        let s2 = upload_with(&uploader, &root, &tree, &[s1.clone()])?;

        assert_eq!(s1.root_object_id(), s2.root_object_id());
        assert_eq!(s1.stats.non_cached_files, 8);
        assert_eq!(s2.stats.cached_files, s1.stats.non_cached_files);
        assert_eq!(s2.stats.non_cached_files, 0);

        Ok(())
    }

    #[test]
    fn test_addition_changes_only_affected_ancestors() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);
        let tree = default_tree();

        // Build the fixture keeping a live handle on d2/d1.
        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("f1", b"abc".as_slice());
        root.add_file("f2", b"abcd".as_slice());
        root.add_file("f3", b"abcde".as_slice());
        let d1 = root.add_dir("d1");
        let d1d1 = d1.add_dir("d1");
        d1d1.add_file("f1", b"abc".as_slice());
        d1d1.add_file("f2", b"abcd".as_slice());
        d1.add_file("f2", b"abcd".as_slice());
        let d2 = root.add_dir("d2");
        let d2d1 = d2.add_dir("d1");
        d2d1.add_file("f1", b"abc".as_slice());
        d2d1.add_file("f2", b"abcd".as_slice());

        let s1 = upload_with(&uploader, &root, &tree, &[])?;
        let s2 = upload_with(&uploader, &root, &tree, &[s1.clone()])?;

        d2d1.add_file("f3", b"abcde".as_slice());
        let s3 = upload_with(&uploader, &root, &tree, &[s1])?;

        assert_ne!(s3.root_object_id(), s2.root_object_id());
        assert_eq!(s3.stats.non_cached_files, 1);
        assert_eq!(s3.stats.cached_files, 8);

        Ok(())
    }

    #[test]
    fn test_symlink_stats() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);
        let tree = default_tree();

        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("f1", b"abc".as_slice());
        root.add_symlink("s1", "d1/d1/f1");
        root.add_symlink("s2", "f1");
        root.add_symlink("s3", "d1");
        let d1 = root.add_dir("d1");
        let d1d1 = d1.add_dir("d1");
        d1d1.add_file("f1", b"abc".as_slice());

        let s1 = upload_with(&uploader, &root, &tree, &[])?;
        let summary = s1.root_entry.as_ref().unwrap().summary.as_ref().unwrap();

        assert_eq!(summary.symlinks, 3);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.size, s1.stats.total_file_size);

        let s2 = upload_with(&uploader, &root, &tree, &[s1])?;
        assert_eq!(s2.stats.total_file_count, 0);

        Ok(())
    }

    #[test]
    fn test_checkpoints_are_committed_with_labels() -> Result<()> {
        let repo = Repository::new_in_memory();
        let mut uploader = Uploader::new(repo.clone());
        uploader.checkpoint_labels =
            BTreeMap::from([("purpose".to_string(), "test".to_string())]);

        // Three buffered ticks fire three checkpoints during the upload.
        let (tick_tx, tick_rx) = crossbeam_channel::bounded(3);
        for _ in 0..3 {
            tick_tx.send(Instant::now()).unwrap();
        }
        uploader.override_ticker(tick_rx);

        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        uploader.notify_checkpoints(done_tx);

        let root = build_tree_fixture();
        let final_manifest = upload_with(&uploader, &root, &default_tree(), &[])?;

        assert_eq!(done_rx.try_iter().count(), 3);

        let saved = snapshot_store::list_snapshots(repo.manifests(), None);
        let checkpoints: Vec<&Manifest> = saved
            .iter()
            .filter(|m| m.incomplete_reason.as_deref() == Some(CHECKPOINT_REASON))
            .collect();

        assert_eq!(checkpoints.len(), 3);
        for checkpoint in checkpoints {
            assert!(checkpoint.start_time < final_manifest.start_time);
            assert_eq!(
                checkpoint.tags.get("purpose").map(String::as_str),
                Some("test")
            );
        }

        Ok(())
    }

    struct FailingDirectory {
        metadata: fs::Metadata,
    }

    impl FailingDirectory {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                metadata: fs::Metadata {
                    name: name.to_string(),
                    mode: 0o755,
                    size: 0,
                    mtime: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                    uid: 1000,
                    gid: 1000,
                    birth_time: None,
                },
            })
        }
    }

    impl fs::Directory for FailingDirectory {
        fn metadata(&self) -> &fs::Metadata {
            &self.metadata
        }

        fn entries(&self) -> Result<Box<dyn Iterator<Item = fs::Entry> + Send>> {
            bail!("permission denied")
        }
    }

    #[test]
    fn test_directory_errors_fatal_and_ignored() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);

        let root = Arc::new(MemDirectory::new("root"));
        root.add(fs::Entry::Directory(FailingDirectory::new("d1")));
        let d2 = root.add_dir("d2");
        d2.add(fs::Entry::Directory(FailingDirectory::new("d1")));
        root.add(fs::Entry::Directory(FailingDirectory::new("d3")));

        // Directory errors are ignored under ./d3, fatal elsewhere.
        let mut ignore_dir_errors = Policy::default();
        ignore_dir_errors.error_handling.ignore_directory_errors = Some(true);
        let mut subpath_policies = std::collections::BTreeMap::new();
        subpath_policies.insert("./d3".to_string(), ignore_dir_errors);
        let tree = policy::build_tree(&subpath_policies, policy::default_policy());

        let manifest = upload_with(&uploader, &root, &tree, &[])?;

        assert_eq!(manifest.stats.error_count, 2);
        assert_eq!(manifest.stats.ignored_error_count, 1);
        assert!(manifest.is_complete());

        let summary = manifest.root_entry.as_ref().unwrap().summary.as_ref().unwrap();
        assert_eq!(summary.fatal_error_count, 2);
        assert_eq!(summary.ignored_error_count, 1);

        Ok(())
    }

    #[test]
    fn test_fail_fast_aborts() {
        let repo = Repository::new_in_memory();
        let mut uploader = Uploader::new(repo);
        uploader.fail_fast = true;

        let root = Arc::new(MemDirectory::new("root"));
        root.add(fs::Entry::Directory(FailingDirectory::new("bad")));

        let result = upload_with(&uploader, &root, &default_tree(), &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cancelled_upload_is_marked_incomplete() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);
        uploader.cancel();

        let root = build_tree_fixture();
        let manifest = upload_with(&uploader, &root, &default_tree(), &[])?;

        assert_eq!(manifest.incomplete_reason.as_deref(), Some(CANCELLED_REASON));
        assert!(manifest.root_entry.is_some());
        assert_eq!(manifest.stats.total_file_count, 0);

        Ok(())
    }

    #[test]
    fn test_force_hash_bypasses_cache() -> Result<()> {
        let repo = Repository::new_in_memory();
        let mut uploader = Uploader::new(repo);
        let root = build_tree_fixture();
        let tree = default_tree();

        let s1 = upload_with(&uploader, &root, &tree, &[])?;

        uploader.force_hash_percentage = 100;
        let s2 = upload_with(&uploader, &root, &tree, &[s1.clone()])?;
        assert_eq!(s2.stats.cached_files, 0);
        assert_eq!(s2.stats.non_cached_files, s1.stats.non_cached_files);

        // Content addressing still dedups everything.
        assert_eq!(s1.root_object_id(), s2.root_object_id());

        Ok(())
    }

    #[test]
    fn test_birth_time_preservation() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);
        let tree = default_tree();

        let btime = Utc.with_ymd_and_hms(2020, 5, 5, 5, 5, 5).unwrap();

        let root1 = Arc::new(MemDirectory::new("root"));
        root1.add(fs::Entry::File(Arc::new(
            MemFile::new("f", b"data".as_slice()).with_birth_time(btime),
        )));
        let s1 = upload_with(&uploader, &root1, &tree, &[])?;

        // Same file, but the filesystem no longer exposes a birth time.
        let root2 = Arc::new(MemDirectory::new("root"));
        root2.add_file("f", b"data".as_slice());
        let s2 = upload_with(&uploader, &root2, &tree, &[s1])?;

        assert_eq!(s2.stats.cached_files, 1);
        let root_manifest = DirManifest::from_bytes(
            &uploader
                .repo
                .objects()
                .read_object(s2.root_object_id().unwrap())?,
        )?;
        assert_eq!(root_manifest.find_entry("f").unwrap().birth_time, Some(btime));

        // A live birth time takes precedence over the cached one.
        let newer = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let root3 = Arc::new(MemDirectory::new("root"));
        root3.add(fs::Entry::File(Arc::new(
            MemFile::new("f", b"data".as_slice()).with_birth_time(newer),
        )));
        let s3 = upload_with(&uploader, &root3, &tree, &[s2])?;

        let root_manifest = DirManifest::from_bytes(
            &uploader
                .repo
                .objects()
                .read_object(s3.root_object_id().unwrap())?,
        )?;
        assert_eq!(root_manifest.find_entry("f").unwrap().birth_time, Some(newer));

        Ok(())
    }

    #[test]
    fn test_large_file_parallel_sections() -> Result<()> {
        let repo = Repository::new_in_memory();
        let mut uploader = Uploader::new(repo.clone());
        uploader.parallel_uploads = Some(4);

        let mut policy = policy::default_policy();
        policy.upload.parallel_upload_above_size = Some(4 * 1024);
        policy.splitter.algorithm = Some("fixed-4k".to_string());
        let tree = PolicyTree::for_policy(policy);

        let content: Vec<u8> = (0..100_000u32)
            .map(|i| (i.wrapping_mul(31) % 251) as u8)
            .collect();
        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("big.bin", content.clone());

        let manifest = upload_with(&uploader, &root, &tree, &[])?;

        let root_manifest =
            DirManifest::from_bytes(&repo.objects().read_object(manifest.root_object_id().unwrap())?)?;
        let entry = root_manifest.find_entry("big.bin").unwrap();

        assert!(entry.object_id.is_indirect());
        assert_eq!(entry.size, content.len() as u64);
        assert_eq!(repo.objects().read_object(&entry.object_id)?, content);

        Ok(())
    }

    #[test]
    fn test_ignore_rules_and_dot_ignore_files() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);

        let mut policy = policy::default_policy();
        policy.files.ignore_rules = vec!["*.tmp".to_string()];
        let tree = PolicyTree::for_policy(policy);

        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("a.tmp", b"x".as_slice());
        root.add_file("keep.txt", b"keep".as_slice());
        root.add_file(".kopiaignore", b"*.log\n# comment\n".as_slice());
        let sub = root.add_dir("sub");
        sub.add_file("b.tmp", b"x".as_slice());
        sub.add_file("c.log", b"x".as_slice());
        sub.add_file("d.txt", b"d".as_slice());

        let manifest = upload_with(&uploader, &root, &tree, &[])?;

        // a.tmp, sub/b.tmp (policy) and sub/c.log (dot-ignore) excluded;
        // the ignore file itself is snapshotted.
        assert_eq!(manifest.stats.excluded_file_count, 3);
        let summary = manifest.root_entry.as_ref().unwrap().summary.as_ref().unwrap();
        assert_eq!(summary.files, 3);

        Ok(())
    }

    #[test]
    fn test_streaming_directory_upload() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);

        let stream = Arc::new(StreamingDirectory::new(
            "root",
            Box::new(|| {
                Box::new((0..500).map(|i| {
                    fs::Entry::File(Arc::new(MemFile::new(
                        &format!("file-{i:04}"),
                        format!("content {i}").into_bytes(),
                    )))
                }))
            }),
        ));

        let manifest = uploader.upload(
            fs::Entry::Directory(stream as Arc<dyn fs::Directory>),
            &default_tree(),
            source(),
            &[],
        )?;

        assert_eq!(manifest.stats.total_file_count, 500);
        let summary = manifest.root_entry.as_ref().unwrap().summary.as_ref().unwrap();
        assert_eq!(summary.files, 500);

        Ok(())
    }

    #[test]
    fn test_unknown_entry_types_skipped_by_default() -> Result<()> {
        let repo = Repository::new_in_memory();
        let uploader = Uploader::new(repo);

        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("f", b"x".as_slice());
        root.add(fs::Entry::Error(fs::ErrorEntry {
            name: "socket".to_string(),
            kind: fs::ErrorEntryKind::UnknownType,
            message: "unsupported file type".to_string(),
        }));

        let manifest = upload_with(&uploader, &root, &default_tree(), &[])?;
        assert_eq!(manifest.stats.error_count, 0);
        assert_eq!(manifest.stats.ignored_error_count, 0);

        // Reclassified as fatal when the policy says so.
        let mut strict = policy::default_policy();
        strict.error_handling.ignore_unknown_types = Some(false);
        let manifest = upload_with(
            &uploader,
            &root,
            &PolicyTree::for_policy(strict),
            &[],
        )?;
        assert_eq!(manifest.stats.error_count, 1);

        Ok(())
    }

    #[test]
    fn test_parallel_upload_concurrency_is_bounded_and_positive() -> Result<()> {
        use crate::content::{
            Compression, ContentId, ContentInfo, ContentManager, IterateOptions,
            memory::MemoryContentStore,
        };
        use std::sync::atomic::AtomicUsize;

        struct CountingStore {
            inner: MemoryContentStore,
            active: AtomicUsize,
            max_active: AtomicUsize,
        }

        impl ContentManager for CountingStore {
            fn write_content(
                &self,
                data: &[u8],
                prefix: Option<char>,
                compression: Option<Compression>,
            ) -> Result<ContentId> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(3));
                let result = self.inner.write_content(data, prefix, compression);
                self.active.fetch_sub(1, Ordering::SeqCst);
                result
            }

            fn read_content(&self, id: &ContentId) -> Result<Vec<u8>> {
                self.inner.read_content(id)
            }
            fn contains(&self, id: &ContentId) -> bool {
                self.inner.contains(id)
            }
            fn content_info(&self, id: &ContentId) -> Result<ContentInfo> {
                self.inner.content_info(id)
            }
            fn iterate_contents(
                &self,
                options: IterateOptions,
                cb: &mut dyn FnMut(ContentInfo) -> Result<()>,
            ) -> Result<()> {
                self.inner.iterate_contents(options, cb)
            }
            fn delete_content(&self, id: &ContentId) -> Result<()> {
                self.inner.delete_content(id)
            }
            fn undelete_content(&self, id: &ContentId) -> Result<()> {
                self.inner.undelete_content(id)
            }
            fn flush(&self) -> Result<()> {
                self.inner.flush()
            }
        }

        let store = Arc::new(CountingStore {
            inner: MemoryContentStore::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        let repo = Repository::from_contents(store.clone())?;

        let mut uploader = Uploader::new(repo);
        uploader.parallel_uploads = Some(3);

        let root = Arc::new(MemDirectory::new("root"));
        for i in 0..30 {
            root.add_file(&format!("file-{i:02}"), format!("unique content {i}").into_bytes());
        }

        upload_with(&uploader, &root, &default_tree(), &[])?;

        let max = store.max_active.load(Ordering::SeqCst);
        assert!(max >= 2, "expected some overlap, saw {max}");
        assert!(max <= 3, "pool width exceeded: {max}");

        Ok(())
    }
}

