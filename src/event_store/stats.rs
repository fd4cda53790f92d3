//! Event Store statistics
//!
//! On-demand metrics about the store's on-disk footprint: event counts by
//! type, live log size, backup and archive usage. Reads straight from disk
//! so it can be pointed at any data directory, live store or not.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::backup::BackupManager;
use super::store::{EventStoreConfig, EventStoreResult};

/// Statistics about an event store's data directory
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of events in the live log
    pub live_event_count: usize,
    /// Size of the live log in bytes
    pub live_log_size: u64,
    /// Highest event id in the live log
    pub last_event_id: u64,
    /// Event counts keyed by event type
    pub events_by_type: HashMap<String, usize>,
    /// Number of backup files
    pub backup_count: usize,
    /// Total size of backups in bytes
    pub backup_size: u64,
    /// Number of archive files (compaction output + quarantined logs)
    pub archive_file_count: usize,
    /// Total size of archives in bytes
    pub archive_size: u64,
}

impl StoreStats {
    /// Total on-disk footprint
    pub fn total_size(&self) -> u64 {
        self.live_log_size + self.backup_size + self.archive_size
    }
}

/// Collector for event store statistics
pub struct StatsCollector {
    config: EventStoreConfig,
}

impl StatsCollector {
    pub fn new(config: EventStoreConfig) -> Self {
        Self { config }
    }

    /// Collect all statistics
    pub fn collect(&self) -> EventStoreResult<StoreStats> {
        let mut stats = StoreStats::default();

        let events_path = self.config.events_path();
        if events_path.exists() {
            stats.live_log_size = fs::metadata(&events_path)?.len();
            self.analyze_log(&events_path, &mut stats)?;
        }

        let backups = BackupManager::new(self.config.backups_dir());
        for path in backups.list()? {
            stats.backup_count += 1;
            stats.backup_size += fs::metadata(&path)?.len();
        }

        let archive_dir = self.config.archive_dir();
        if archive_dir.exists() {
            for entry in fs::read_dir(&archive_dir)? {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) == Some("jsonl") {
                    stats.archive_file_count += 1;
                    stats.archive_size += entry.metadata()?.len();
                }
            }
        }

        Ok(stats)
    }

    fn analyze_log(&self, path: &Path, stats: &mut StoreStats) -> EventStoreResult<()> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        for line_result in reader.lines() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            // Tolerant of malformed lines; counting is best-effort
            let value: serde_json::Value = match serde_json::from_str(&line) {
                Ok(value) => value,
                Err(_) => continue,
            };

            stats.live_event_count += 1;

            if let Some(id) = value.get("eventId").and_then(|v| v.as_u64()) {
                stats.last_event_id = stats.last_event_id.max(id);
            }
            if let Some(event_type) = value.get("eventType").and_then(|v| v.as_str()) {
                *stats
                    .events_by_type
                    .entry(event_type.to_string())
                    .or_insert(0) += 1;
            }
        }

        Ok(())
    }
}
