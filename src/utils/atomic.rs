//! Atomic file operations
//!
//! This module provides utilities for atomic file writes to prevent
//! data corruption during crashes or power failures.
//!
//! # Pattern
//!
//! 1. Write to a temporary file (.tmp)
//! 2. Call sync_all() to flush to disk
//! 3. Rename temp file to final path (atomic on most filesystems)
//!
//! This ensures that the final file is either:
//! - The old version (if crash before rename)
//! - The new version (if rename completed)
//! - Never a partial/corrupted state
//!
//! The staging and commit steps are exposed separately so callers can
//! validate the staged file before it replaces the live one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Write content to the staging file (`<path>.tmp`) and sync it to disk.
///
/// The staged file is NOT renamed into place; the returned path must be
/// passed to [`commit_staged`] (usually after validating its content) or
/// deleted by the caller.
pub fn stage_write<P, F>(path: P, write_fn: F) -> io::Result<PathBuf>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&temp_path)?;
    write_fn(&mut file)?;

    // Sync to disk (ensure data is durable before any rename)
    file.sync_all()?;

    Ok(temp_path)
}

/// Atomically rename a staged file over the final path.
pub fn commit_staged<P1: AsRef<Path>, P2: AsRef<Path>>(staged: P1, path: P2) -> io::Result<()> {
    fs::rename(staged.as_ref(), path.as_ref())
}

/// Atomically write content using a writer function
///
/// Stage + commit in one step, for callers that do not need to inspect
/// the staged file first.
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let staged = stage_write(path, write_fn)?;
    commit_staged(&staged, path)
}

/// Copy an existing file into a staging file next to `dest` and sync it.
///
/// Used by recovery to restore a backup with the same temp-then-rename
/// protocol as normal writes.
pub fn stage_copy<P1: AsRef<Path>, P2: AsRef<Path>>(src: P1, dest: P2) -> io::Result<PathBuf> {
    let dest = dest.as_ref();
    let temp_path = dest.with_extension("tmp");

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::copy(src.as_ref(), &temp_path)?;
    File::open(&temp_path)?.sync_all()?;

    Ok(temp_path)
}

/// Clean up any leftover temp files from interrupted operations
///
/// Call this on startup to clean up .tmp files that may have been
/// left behind from crashes.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    let mut cleaned = 0;

    if !dir.exists() {
        return Ok(0);
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            fs::remove_file(&path)?;
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
