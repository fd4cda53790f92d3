//! Backup snapshot management
//!
//! Before every mutating write the store captures a copy of the current
//! live log under `backups/`. Backups are named with a zero-padded sequence
//! number so lexicographic order is capture order, and the set is pruned to
//! a bounded count. Backups are validated at recovery time, not at capture
//! time: even a corrupt live file is worth preserving for inspection, and
//! recovery simply skips candidates that fail validation.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

const BACKUP_PREFIX: &str = "backup-";
const BACKUP_EXT: &str = "jsonl";

/// Manages the rotated set of pre-write log copies
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Capture a copy of the live log, then prune to `keep` backups.
    ///
    /// Returns `None` when there is no live file yet (first ever write).
    pub fn capture(&self, live: &Path, keep: usize) -> io::Result<Option<PathBuf>> {
        if !live.exists() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir)?;

        let dest = self.dir.join(format!(
            "{}{:08}.{}",
            BACKUP_PREFIX,
            self.next_index()?,
            BACKUP_EXT
        ));
        fs::copy(live, &dest)?;
        File::open(&dest)?.sync_all()?;

        debug!(backup = %dest.display(), "captured pre-write backup");

        self.prune(keep)?;
        Ok(Some(dest))
    }

    /// All backups, oldest first
    pub fn list(&self) -> io::Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if Self::is_backup(&path) {
                backups.push(path);
            }
        }

        backups.sort();
        Ok(backups)
    }

    /// All backups, newest first (recovery candidate order)
    pub fn newest_first(&self) -> io::Result<Vec<PathBuf>> {
        let mut backups = self.list()?;
        backups.reverse();
        Ok(backups)
    }

    /// Delete the oldest backups beyond `keep`; returns how many were removed
    pub fn prune(&self, keep: usize) -> io::Result<usize> {
        let backups = self.list()?;
        if backups.len() <= keep {
            return Ok(0);
        }

        let excess = &backups[..backups.len() - keep];
        for path in excess {
            fs::remove_file(path)?;
        }
        Ok(excess.len())
    }

    fn is_backup(path: &Path) -> bool {
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };
        name.starts_with(BACKUP_PREFIX)
            && path.extension().and_then(|e| e.to_str()) == Some(BACKUP_EXT)
    }

    fn next_index(&self) -> io::Result<u64> {
        let max = self
            .list()?
            .iter()
            .filter_map(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix(BACKUP_PREFIX))
                    .and_then(|s| s.parse::<u64>().ok())
            })
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }
}
