//! Integrity Monitor
//!
//! Background task that periodically validates the live event log and
//! drives automatic recovery when corruption is found. The monitor never
//! panics out of its loop: a failed check is reported through the alert
//! hook and the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event_store::EventStore;

/// Configuration for the integrity monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between integrity checks
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

impl MonitorConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

/// Alerts raised by the monitor when a check finds trouble
#[derive(Debug, Clone)]
pub enum IntegrityAlert {
    /// The live log failed validation; recovery is about to start
    CorruptionDetected { errors: Vec<String> },
    /// Recovery succeeded from the named backup
    Recovered {
        restored_from: String,
        event_count: usize,
    },
    /// No backup could restore the store; operator action is required
    RecoveryFailed { reason: String },
}

/// Fire-and-forget callback for integrity alerts; must never block
pub type AlertHook = Arc<dyn Fn(&IntegrityAlert) + Send + Sync>;

/// Handle to a running monitor task
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the monitor to stop and wait for the task to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Periodic validator and auto-recoverer for an event store
pub struct IntegrityMonitor {
    store: Arc<EventStore>,
    config: MonitorConfig,
    alert_hook: RwLock<Option<AlertHook>>,
}

impl IntegrityMonitor {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self::with_config(store, MonitorConfig::default())
    }

    pub fn with_config(store: Arc<EventStore>, config: MonitorConfig) -> Self {
        Self {
            store,
            config,
            alert_hook: RwLock::new(None),
        }
    }

    /// Install the alert side channel
    pub fn set_alert_hook(&self, hook: AlertHook) {
        *self.alert_hook.write() = Some(hook);
    }

    /// Run one validation pass, recovering from backup if the log is
    /// corrupt. Returns whether the store is healthy afterwards.
    pub fn check_once(&self) -> bool {
        let report = match self.store.validate() {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "integrity check could not read the log");
                self.raise(IntegrityAlert::RecoveryFailed {
                    reason: format!("validation failed to run: {}", e),
                });
                return false;
            }
        };

        if report.valid {
            debug!(events = report.event_count, "integrity check passed");
            return true;
        }

        warn!(errors = report.errors.len(), "event log corruption detected");
        self.raise(IntegrityAlert::CorruptionDetected {
            errors: report.errors.clone(),
        });

        match self.store.recover_from_backup() {
            Ok(recovery) => {
                let restored_from = recovery.restored_from.display().to_string();
                info!(
                    backup = %restored_from,
                    events = recovery.event_count,
                    "recovered event log from backup"
                );
                self.raise(IntegrityAlert::Recovered {
                    restored_from,
                    event_count: recovery.event_count,
                });
                // Confirm the swapped-in log actually validates
                match self.store.validate() {
                    Ok(report) if report.valid => true,
                    Ok(report) => {
                        error!("restored log failed re-validation");
                        self.raise(IntegrityAlert::RecoveryFailed {
                            reason: format!(
                                "restored log failed re-validation: {}",
                                report.errors.join("; ")
                            ),
                        });
                        false
                    }
                    Err(e) => {
                        error!(error = %e, "re-validation after recovery failed to run");
                        self.raise(IntegrityAlert::RecoveryFailed {
                            reason: format!("re-validation failed to run: {}", e),
                        });
                        false
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "recovery from backup failed");
                self.raise(IntegrityAlert::RecoveryFailed {
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Spawn the periodic check loop on the current tokio runtime
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.config.interval;
        let monitor = Arc::new(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a freshly
            // opened store is not re-checked on spawn.
            ticker.tick().await;

            info!(interval = ?interval, "integrity monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.check_once();
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("integrity monitor stopped");
                            break;
                        }
                    }
                }
            }
        });

        MonitorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    fn raise(&self, alert: IntegrityAlert) {
        if let Some(hook) = self.alert_hook.read().clone() {
            hook(&alert);
        }
    }
}
