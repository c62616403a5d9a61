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

//! Reproduces a snapshotted tree on the local filesystem. Works on any
//! `fs::Entry`, which in practice means overlay nodes resolved from a
//! snapshot manifest.

use std::path::Path;

use anyhow::{Context, Result};
use filetime::FileTime;

use crate::fs::{Directory, Entry, Metadata};
use crate::ui;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreStats {
    pub restored_files: u64,
    pub restored_dirs: u64,
    pub restored_symlinks: u64,
    pub restored_bytes: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Overwrite files that already exist at the target.
    pub overwrite: bool,
}

/// Restores the children of `dir` into the directory `target`, creating
/// it if necessary.
pub fn restore_tree(
    dir: &std::sync::Arc<dyn Directory>,
    target: &Path,
    options: &RestoreOptions,
) -> Result<RestoreStats> {
    let mut stats = RestoreStats::default();
    std::fs::create_dir_all(target)
        .with_context(|| format!("Cannot create {}", target.display()))?;

    restore_children(dir, target, options, &mut stats)?;
    Ok(stats)
}

fn restore_children(
    dir: &std::sync::Arc<dyn Directory>,
    target: &Path,
    options: &RestoreOptions,
    stats: &mut RestoreStats,
) -> Result<()> {
    for child in dir.entries()? {
        let dest = target.join(child.name());

        match child {
            Entry::Directory(subdir) => {
                std::fs::create_dir_all(&dest)
                    .with_context(|| format!("Cannot create {}", dest.display()))?;
                restore_children(&subdir, &dest, options, stats)?;

                // Times and permissions go on last so that writing the
                // children does not disturb them.
                apply_metadata(&dest, subdir.metadata())?;
                stats.restored_dirs += 1;
            }

            Entry::File(file) => {
                if dest.exists() && !options.overwrite {
                    stats.skipped += 1;
                    continue;
                }

                let mut reader = file.open()?;
                let mut writer = std::fs::File::create(&dest)
                    .with_context(|| format!("Cannot create {}", dest.display()))?;
                let copied = std::io::copy(&mut reader, &mut writer)
                    .with_context(|| format!("Cannot write {}", dest.display()))?;
                drop(writer);

                apply_metadata(&dest, file.metadata())?;
                stats.restored_files += 1;
                stats.restored_bytes += copied;
            }

            Entry::Symlink(link) => {
                let target_path = link.readlink()?;

                #[cfg(unix)]
                {
                    if dest.exists() && options.overwrite {
                        std::fs::remove_file(&dest)?;
                    }
                    std::os::unix::fs::symlink(&target_path, &dest)
                        .with_context(|| format!("Cannot create symlink {}", dest.display()))?;
                    stats.restored_symlinks += 1;
                }

                #[cfg(not(unix))]
                {
                    ui::cli::warning!(
                        "Skipping symlink {} -> {target_path}: not supported on this platform",
                        dest.display()
                    );
                    stats.skipped += 1;
                }
            }

            Entry::Error(error_entry) => {
                ui::cli::warning!(
                    "Skipping {}: {}",
                    target.join(&error_entry.name).display(),
                    error_entry.message
                );
                stats.skipped += 1;
            }
        }
    }

    Ok(())
}

fn apply_metadata(path: &Path, metadata: &Metadata) -> Result<()> {
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;

        if metadata.mode != 0 {
            std::fs::set_permissions(path, Permissions::from_mode(metadata.mode))
                .with_context(|| format!("Cannot set permissions on {}", path.display()))?;
        }
    }

    let mtime = FileTime::from_unix_time(
        metadata.mtime.timestamp(),
        metadata.mtime.timestamp_subsec_nanos(),
    );
    filetime::set_file_mtime(path, mtime)
        .with_context(|| format!("Cannot set mtime on {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fs::memory::MemDirectory;
    use tempfile::tempdir;

    fn as_directory(dir: Arc<MemDirectory>) -> Arc<dyn Directory> {
        dir
    }

    #[test]
    fn test_restore_tree_round_trip() -> Result<()> {
        let tmp = tempdir()?;

        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("a.txt", b"alpha".as_slice());
        let sub = root.add_dir("sub");
        sub.add_file("b.txt", b"beta".as_slice());

        let stats = restore_tree(
            &as_directory(root),
            tmp.path(),
            &RestoreOptions::default(),
        )?;

        assert_eq!(stats.restored_files, 2);
        assert_eq!(stats.restored_dirs, 1);
        assert_eq!(stats.restored_bytes, 9);

        assert_eq!(std::fs::read(tmp.path().join("a.txt"))?, b"alpha");
        assert_eq!(std::fs::read(tmp.path().join("sub/b.txt"))?, b"beta");

        Ok(())
    }

    #[test]
    fn test_restore_skips_existing_without_overwrite() -> Result<()> {
        let tmp = tempdir()?;
        std::fs::write(tmp.path().join("a.txt"), b"original")?;

        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("a.txt", b"replacement".as_slice());

        let stats = restore_tree(
            &as_directory(root.clone()),
            tmp.path(),
            &RestoreOptions::default(),
        )?;
        assert_eq!(stats.skipped, 1);
        assert_eq!(std::fs::read(tmp.path().join("a.txt"))?, b"original");

        let stats = restore_tree(
            &as_directory(root),
            tmp.path(),
            &RestoreOptions { overwrite: true },
        )?;
        assert_eq!(stats.restored_files, 1);
        assert_eq!(std::fs::read(tmp.path().join("a.txt"))?, b"replacement");

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_restore_applies_mtime_and_symlinks() -> Result<()> {
        let tmp = tempdir()?;

        let root = Arc::new(MemDirectory::new("root"));
        root.add_file("f", b"data".as_slice());
        root.add_symlink("link", "f");

        restore_tree(&as_directory(root), tmp.path(), &RestoreOptions::default())?;

        let meta = std::fs::symlink_metadata(tmp.path().join("link"))?;
        assert!(meta.file_type().is_symlink());
        assert_eq!(std::fs::read_link(tmp.path().join("link"))?, Path::new("f"));

        // The fixture's deterministic mtime survives the restore.
        let restored = std::fs::metadata(tmp.path().join("f"))?;
        let mtime: chrono::DateTime<chrono::Utc> = restored.modified()?.into();
        assert_eq!(
            mtime,
            chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2025, 1, 1, 12, 0, 0).unwrap()
        );

        Ok(())
    }
}
