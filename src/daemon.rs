//! Daemon - repeats the sync cycle on a fixed interval
//!
//! Between cycles the configuration is reloaded from its source. A bad
//! reload keeps the previous configuration; a failed cycle is logged and the
//! next one is scheduled as usual. Shutdown aborts both the running cycle and
//! the sleep.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigSource};
use crate::reconcile::{CycleSummary, Reconciler};

/// Daemon statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub last_cycle: Option<DateTime<Utc>>,
}

/// Long-running sync loop
pub struct Daemon {
    reconciler: Reconciler,
    source: Box<dyn ConfigSource>,
    config: Config,
    /// Forces dry run regardless of `sync.dry_run`
    force_dry_run: bool,
    stats: DaemonStats,
}

impl Daemon {
    pub fn new(
        reconciler: Reconciler,
        source: Box<dyn ConfigSource>,
        config: Config,
        force_dry_run: bool,
    ) -> Self {
        Self {
            reconciler,
            source,
            config,
            force_dry_run,
            stats: DaemonStats::default(),
        }
    }

    pub fn stats(&self) -> &DaemonStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn dry_run(&self) -> bool {
        self.force_dry_run || self.config.sync.dry_run
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.sync.daemon_interval_minutes.max(1).saturating_mul(60))
    }

    /// Run in the foreground until Ctrl+C
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Run until `shutdown` completes
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Starting qbt-sync daemon (every {} minute(s), {} child(ren))",
            self.config.sync.daemon_interval_minutes,
            self.config.children.len()
        );

        loop {
            let dry_run = self.dry_run();
            let cycle_start = Instant::now();

            let outcome = tokio::select! {
                _ = &mut shutdown => None,
                result = self.reconciler.run_cycle(&self.config, dry_run) => Some(result),
            };
            let Some(result) = outcome else {
                info!("Shutdown signal received, abandoning the running cycle");
                break;
            };
            self.record_cycle(result, cycle_start.elapsed());

            let interval = self.interval();
            info!("Next sync in {} minute(s)", interval.as_secs() / 60);

            let stopped = tokio::select! {
                _ = &mut shutdown => true,
                _ = tokio::time::sleep(interval) => false,
            };
            if stopped {
                info!("Shutdown signal received, stopping daemon");
                break;
            }

            self.reload();
        }

        info!(
            "Daemon stopped after {} cycle(s) ({} failed)",
            self.stats.total_cycles, self.stats.failed_cycles
        );
        Ok(())
    }

    fn record_cycle(&mut self, result: Result<CycleSummary>, duration: Duration) {
        self.stats.total_cycles += 1;
        self.stats.last_cycle = Some(Utc::now());

        match result {
            Ok(summary) => {
                self.stats.successful_cycles += 1;
                let totals = summary.totals();
                info!(
                    "Cycle completed in {:.2}s: {} deleted, {} added, {} recategorized, {} relocated, \
                     {} file-selection synced, {} failed, {} child(ren) skipped",
                    duration.as_secs_f64(),
                    totals.deleted,
                    totals.added,
                    totals.recategorized,
                    totals.relocated,
                    totals.file_synced,
                    totals.failed,
                    totals.skipped_children
                );
            }
            Err(e) => {
                self.stats.failed_cycles += 1;
                error!("Sync cycle failed: {:#}", e);
            }
        }
    }

    /// Reload configuration, keeping the current one on failure.
    ///
    /// Returns whether a new configuration was installed.
    pub fn reload(&mut self) -> bool {
        let new_config = match self.source.load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Config reload failed, keeping previous configuration: {:#}", anyhow::Error::new(e));
                return false;
            }
        };

        let changes = self.config.sync.changes(&new_config.sync);
        if changes.is_empty() {
            debug!("Config reloaded, sync options unchanged");
        } else {
            info!("Config reloaded, sync options changed:");
            for change in &changes {
                info!("  {}: {} → {}", change.field, change.old, change.new);
            }
        }
        if new_config.children != self.config.children {
            info!(
                "Child list changed: {} → {} child(ren)",
                self.config.children.len(),
                new_config.children.len()
            );
        }

        self.config = new_config;
        true
    }
}

/// Wait for Ctrl+C
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    debug!("Ctrl+C received");
}
