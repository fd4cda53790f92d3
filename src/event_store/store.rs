//! Event Store - durable, corruption-resistant append-only log
//!
//! Every mutation follows the same protocol: capture a backup of the live
//! file, serialize the new log state to a staging file, validate the staged
//! file by re-reading it, then atomically rename it over the live file. A
//! reader never observes a half-written log, and a failed mutation leaves
//! the live file byte-identical to its pre-call state.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Event, NewEvent};
use crate::utils::{atomic_write_with, cleanup_temp_files, commit_staged, stage_copy, stage_write};
use crate::utils::now_millis;

use super::backup::BackupManager;
use super::lock::StoreLock;
use super::validate::{validate_log_file, ValidationReport};

/// Configuration for the EventStore
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Path to the data directory
    pub data_dir: PathBuf,
    /// Number of pre-write backups to retain
    pub keep_backups: usize,
    /// Whether compaction archives removed events instead of discarding them
    pub archive_removed: bool,
    /// Take an advisory OS file lock around mutations, for deployments
    /// where multiple processes share one backing file
    pub cross_process_lock: bool,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            keep_backups: 5,
            archive_removed: true,
            cross_process_lock: false,
        }
    }
}

impl EventStoreConfig {
    /// Create config with custom data directory
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Get path to the live log file
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Get path to the backups directory
    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Get path to the archive directory (compacted + quarantined logs)
    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    /// Get path to the sidecar advisory lock file
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("store.lock")
    }
}

/// Result type for EventStore operations
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Errors that can occur in EventStore operations
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Malformed input handed to a mutating operation
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Writing the staged log failed; the live log is unchanged
    #[error("failed to write staged log")]
    Write(#[source] io::Error),

    /// The staged log did not round-trip; the live log is unchanged
    #[error("staged log failed validation: {0}")]
    Validation(String),

    /// The atomic rename failed; the live log is unchanged
    #[error("failed to swap staged log into place")]
    Swap(#[source] io::Error),

    /// Recovery was requested but no backup exists
    #[error("no backup available")]
    NoBackupAvailable,

    /// Every backup candidate failed validation
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// How [`EventStore::compact`] decides which events to drop
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    /// Drop events with a timestamp strictly below this (milliseconds)
    pub older_than: Option<i64>,
    /// Keep at most this many of the newest events
    pub max_events: Option<usize>,
}

impl RetentionPolicy {
    /// Drop everything older than the given timestamp
    pub fn older_than(cutoff_ms: i64) -> Self {
        Self {
            older_than: Some(cutoff_ms),
            max_events: None,
        }
    }

    /// Keep only the newest `n` events
    pub fn keep_latest(n: usize) -> Self {
        Self {
            older_than: None,
            max_events: Some(n),
        }
    }

    /// Split an append-ordered log into (retained, removed)
    fn partition(&self, events: &[Event]) -> (Vec<Event>, Vec<Event>) {
        let mut drop = match self.older_than {
            // Timestamps are non-decreasing, so the drop set is a prefix
            Some(cutoff) => events.partition_point(|e| e.timestamp < cutoff),
            None => 0,
        };
        if let Some(max) = self.max_events {
            let kept = events.len() - drop;
            if kept > max {
                drop += kept - max;
            }
        }
        (events[drop..].to_vec(), events[..drop].to_vec())
    }
}

/// Result of a successful [`EventStore::recover_from_backup`] call
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Backup the live log was restored from
    pub restored_from: PathBuf,
    /// Number of events in the restored log
    pub event_count: usize,
    /// Newer backups that failed validation and were skipped
    pub skipped_backups: usize,
}

/// Result of a [`EventStore::compact`] call
#[derive(Debug, Clone)]
pub struct CompactionReport {
    pub removed: usize,
    pub retained: usize,
    /// Where the removed events were archived, if archiving is enabled
    pub archive: Option<PathBuf>,
}

struct StoreInner {
    /// In-memory mirror of the live log, in append order
    events: Vec<Event>,
    /// Next event ID to assign
    next_event_id: u64,
}

/// Durable append-only log of [`Event`]s
///
/// All mutations serialize on a process-local mutex plus, when configured,
/// an advisory OS file lock. Reads take a snapshot of the in-memory mirror
/// and never observe a mutation in progress.
pub struct EventStore {
    config: EventStoreConfig,
    backups: BackupManager,
    lock: StoreLock,
    inner: Mutex<StoreInner>,
}

impl EventStore {
    /// Open (or create) a store at the configured data directory.
    ///
    /// Stray `.tmp` files left by interrupted swaps are removed before the
    /// live log is loaded, so a crash mid-write is invisible to readers.
    pub fn open(config: EventStoreConfig) -> EventStoreResult<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let cleaned = cleanup_temp_files(&config.data_dir)?;
        if cleaned > 0 {
            warn!(cleaned, "removed stale staging files from interrupted writes");
        }

        let lock = if config.cross_process_lock {
            StoreLock::open(&config.lock_path())?
        } else {
            StoreLock::disabled()
        };

        let events = Self::load_live_events(&config.events_path())?;
        let next_event_id = events.last().map(|e| e.event_id + 1).unwrap_or(1);

        info!(
            event_count = events.len(),
            data_dir = %config.data_dir.display(),
            "opened event store"
        );

        Ok(Self {
            backups: BackupManager::new(config.backups_dir()),
            lock,
            inner: Mutex::new(StoreInner {
                events,
                next_event_id,
            }),
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Number of events currently in the log
    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Append an event to the log.
    ///
    /// Protocol: backup the live file, stage `existing + new` to a temp
    /// file, re-read and validate the staged file, then atomically rename
    /// it into place. On any failure the live log is unchanged.
    pub fn append(&self, draft: NewEvent) -> EventStoreResult<Event> {
        if draft.event_type.trim().is_empty() {
            return Err(EventStoreError::InvalidEvent(
                "event type must not be empty".to_string(),
            ));
        }
        if draft.source_agent.trim().is_empty() {
            return Err(EventStoreError::InvalidEvent(
                "source agent must not be empty".to_string(),
            ));
        }

        let _file_guard = self.lock.exclusive()?;
        let mut inner = self.inner.lock();
        let events_path = self.config.events_path();

        self.backups.capture(&events_path, self.config.keep_backups)?;

        let min_ts = inner.events.last().map(|e| e.timestamp).unwrap_or(0);
        let event = draft.into_event(inner.next_event_id, min_ts);

        let staged = Self::stage_log(
            &events_path,
            inner.events.iter().chain(std::iter::once(&event)),
        )
        .map_err(EventStoreError::Write)?;

        let expected = inner.events.len() + 1;
        self.check_staged(&staged, expected)?;

        commit_staged(&staged, &events_path).map_err(|e| {
            let _ = fs::remove_file(&staged);
            EventStoreError::Swap(e)
        })?;

        inner.next_event_id = event.event_id + 1;
        inner.events.push(event.clone());

        debug!(
            event_id = event.event_id,
            event_type = %event.event_type,
            source = %event.source_agent,
            "appended event"
        );

        Ok(event)
    }

    /// Replay events in append order, optionally from a lower-bound
    /// timestamp (inclusive, milliseconds).
    ///
    /// The iterator is a snapshot taken at call time: it is finite, does
    /// not block for future events, and can be abandoned at any point.
    pub fn replay(&self, since: Option<i64>) -> impl Iterator<Item = Event> {
        let events = self.inner.lock().events.clone();
        events
            .into_iter()
            .filter(move |e| since.map_or(true, |ts| e.timestamp >= ts))
    }

    /// Full structural check of the live log file, without mutation.
    ///
    /// Serialized against in-flight mutations, so the report always
    /// describes a complete pre- or post-mutation state.
    pub fn validate(&self) -> EventStoreResult<ValidationReport> {
        let _inner = self.inner.lock();
        Ok(validate_log_file(&self.config.events_path())?)
    }

    /// Restore the live log from the most recent backup that passes
    /// validation, trying progressively older backups before giving up.
    ///
    /// The corrupt live file is quarantined under `archive/` for
    /// inspection rather than destroyed.
    pub fn recover_from_backup(&self) -> EventStoreResult<RecoveryReport> {
        let _file_guard = self.lock.exclusive()?;
        let mut inner = self.inner.lock();
        let events_path = self.config.events_path();

        let candidates = self.backups.newest_first()?;
        if candidates.is_empty() {
            return Err(EventStoreError::NoBackupAvailable);
        }

        let mut skipped = 0usize;
        for candidate in candidates {
            let usable = match validate_log_file(&candidate) {
                Ok(report) => report.valid,
                Err(e) => {
                    warn!(backup = %candidate.display(), error = %e, "backup unreadable");
                    false
                }
            };
            if !usable {
                warn!(backup = %candidate.display(), "backup failed validation, trying older");
                skipped += 1;
                continue;
            }

            // Stage the restore before touching the live file, so a failed
            // copy leaves the corrupt log in place for inspection
            let staged = stage_copy(&candidate, &events_path).map_err(EventStoreError::Write)?;
            self.quarantine_live(&events_path);
            commit_staged(&staged, &events_path).map_err(|e| {
                let _ = fs::remove_file(&staged);
                EventStoreError::Swap(e)
            })?;

            let events = Self::load_live_events(&events_path)?;
            let restored_max = events.last().map(|e| e.event_id).unwrap_or(0);
            // Never reuse ids that earlier (now lost) events may have held
            inner.next_event_id = inner.next_event_id.max(restored_max + 1);
            let event_count = events.len();
            inner.events = events;

            info!(
                restored_from = %candidate.display(),
                event_count,
                skipped,
                "recovered event log from backup"
            );

            return Ok(RecoveryReport {
                restored_from: candidate,
                event_count,
                skipped_backups: skipped,
            });
        }

        Err(EventStoreError::RecoveryFailed(format!(
            "all {} backup candidates failed validation",
            skipped
        )))
    }

    /// Rewrite the log dropping events outside the retention policy, using
    /// the same backup + stage + validate + swap protocol as `append`.
    pub fn compact(&self, policy: RetentionPolicy) -> EventStoreResult<CompactionReport> {
        let _file_guard = self.lock.exclusive()?;
        let mut inner = self.inner.lock();
        let events_path = self.config.events_path();

        let (retained, removed) = policy.partition(&inner.events);
        if removed.is_empty() {
            return Ok(CompactionReport {
                removed: 0,
                retained: retained.len(),
                archive: None,
            });
        }

        self.backups.capture(&events_path, self.config.keep_backups)?;

        let archive = if self.config.archive_removed {
            Some(self.archive_events(&removed)?)
        } else {
            None
        };

        let staged =
            Self::stage_log(&events_path, retained.iter()).map_err(EventStoreError::Write)?;
        self.check_staged(&staged, retained.len())?;

        commit_staged(&staged, &events_path).map_err(|e| {
            let _ = fs::remove_file(&staged);
            EventStoreError::Swap(e)
        })?;

        let report = CompactionReport {
            removed: removed.len(),
            retained: retained.len(),
            archive,
        };
        inner.events = retained;

        info!(
            removed = report.removed,
            retained = report.retained,
            "compacted event log"
        );

        Ok(report)
    }

    /// Serialize events to the staging file next to `path`
    fn stage_log<'a>(
        path: &Path,
        events: impl Iterator<Item = &'a Event>,
    ) -> io::Result<PathBuf> {
        let lines: Vec<String> = events
            .map(|e| e.to_json_line())
            .collect::<Result<_, _>>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        stage_write(path, |file| {
            for line in &lines {
                writeln!(file, "{}", line)?;
            }
            Ok(())
        })
    }

    /// Round-trip validation of a staged file before it replaces the live log
    fn check_staged(&self, staged: &Path, expected_count: usize) -> EventStoreResult<()> {
        let report = match validate_log_file(staged) {
            Ok(report) => report,
            Err(e) => {
                let _ = fs::remove_file(staged);
                return Err(EventStoreError::Validation(format!(
                    "staged log unreadable: {}",
                    e
                )));
            }
        };

        if !report.valid {
            let _ = fs::remove_file(staged);
            return Err(EventStoreError::Validation(report.errors.join("; ")));
        }
        if report.event_count != expected_count {
            let _ = fs::remove_file(staged);
            return Err(EventStoreError::Validation(format!(
                "expected {} events after write, staged file has {}",
                expected_count, report.event_count
            )));
        }
        Ok(())
    }

    /// Move a corrupt live file into the archive directory. Best-effort:
    /// when the move fails the subsequent swap overwrites the file anyway.
    fn quarantine_live(&self, events_path: &Path) {
        if !events_path.exists() {
            return;
        }
        let quarantine = self
            .config
            .archive_dir()
            .join(format!("corrupt-{}.jsonl", now_millis()));
        if let Err(e) = fs::create_dir_all(self.config.archive_dir())
            .and_then(|_| fs::rename(events_path, &quarantine))
        {
            warn!(error = %e, "could not quarantine corrupt live log");
        } else {
            info!(quarantine = %quarantine.display(), "quarantined corrupt live log");
        }
    }

    /// Write removed events to a named archive file
    fn archive_events(&self, removed: &[Event]) -> EventStoreResult<PathBuf> {
        let first = removed.first().map(|e| e.event_id).unwrap_or(0);
        let last = removed.last().map(|e| e.event_id).unwrap_or(0);
        let path = self
            .config
            .archive_dir()
            .join(format!("events_{}_to_{}.jsonl", first, last));

        let lines: Vec<String> = removed
            .iter()
            .map(|e| e.to_json_line())
            .collect::<Result<_, _>>()?;

        atomic_write_with(&path, |file| {
            for line in &lines {
                writeln!(file, "{}", line)?;
            }
            Ok(())
        })
        .map_err(EventStoreError::Write)?;

        Ok(path)
    }

    /// Load the live log, skipping (and logging) unparseable lines.
    ///
    /// Lenient on purpose: a store must still open in the face of a corrupt
    /// tail so the integrity monitor can detect and recover it.
    fn load_live_events(path: &Path) -> EventStoreResult<Vec<Event>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match Event::from_json_line(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(line = line_num + 1, error = %e, "skipping malformed event line");
                }
            }
        }

        Ok(events)
    }
}
