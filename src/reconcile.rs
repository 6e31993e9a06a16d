//! Reconciler - drives one full sync cycle across every child
//!
//! A cycle connects to the master, takes its eligible snapshot, then visits
//! each child in configuration order: connect, clean stale torrents, fetch,
//! diff, and either report (dry run) or apply. A master failure aborts the
//! cycle; a child failure only skips that child.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::apply::{Applier, ApplyOptions, ApplyReport};
use crate::cleanup::clean_stale;
use crate::client::{Connector, TorrentClient};
use crate::config::{Config, InstanceConfig, SyncConfig};
use crate::diff::{compute_diff, SyncDiff};
use crate::refine::refine_file_syncs;
use crate::snapshot::{fetch_child, fetch_master, SnapshotMap};

/// What happened to one child during a cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChildOutcome {
    /// Connection or listing failed; nothing was done
    Skipped { reason: String },
    /// Dry run: the diff that would have been applied
    Planned { stale: usize, diff: SyncDiff },
    Applied {
        stale_removed: usize,
        diff: SyncDiff,
        report: ApplyReport,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildSummary {
    pub name: String,
    pub host: String,
    pub outcome: ChildOutcome,
}

/// Per-cycle counts for presentation.
///
/// Dry-run children contribute their planned actions, live children what
/// was actually applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleTotals {
    pub deleted: usize,
    pub added: usize,
    pub already_present: usize,
    pub recategorized: usize,
    pub relocated: usize,
    pub file_synced: usize,
    pub failed: usize,
    pub stale: usize,
    pub skipped_children: usize,
}

/// Structured result of one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub master_eligible: usize,
    pub children: Vec<ChildSummary>,
}

impl CycleSummary {
    pub fn totals(&self) -> CycleTotals {
        let mut totals = CycleTotals::default();

        for child in &self.children {
            match &child.outcome {
                ChildOutcome::Skipped { .. } => totals.skipped_children += 1,
                ChildOutcome::Planned { stale, diff } => {
                    let counts = diff.counts();
                    totals.stale += stale;
                    totals.deleted += counts.delete;
                    totals.added += counts.add;
                    totals.recategorized += counts.recategorize;
                    totals.relocated += counts.relocate;
                    totals.file_synced += counts.sync_files;
                }
                ChildOutcome::Applied {
                    stale_removed,
                    report,
                    ..
                } => {
                    totals.stale += stale_removed;
                    totals.deleted += report.deleted;
                    totals.added += report.added;
                    totals.already_present += report.already_present;
                    totals.recategorized += report.recategorized;
                    totals.relocated += report.relocated;
                    totals.file_synced += report.file_synced;
                    totals.failed += report.failed();
                }
            }
        }

        totals
    }
}

/// Runs sync cycles through a [`Connector`]
#[derive(Clone)]
pub struct Reconciler {
    connector: Arc<dyn Connector>,
}

impl Reconciler {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    pub fn from_arc(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Run one full cycle against fresh sessions
    pub async fn run_cycle(&self, config: &Config, dry_run: bool) -> Result<CycleSummary> {
        let started_at = Utc::now();
        let sync = &config.sync;

        if dry_run {
            info!("[DRY RUN] No changes will be made to any child");
        }

        info!(
            "Connecting to master {} ({})",
            config.master.name, config.master.host
        );
        let master = self
            .connector
            .connect(&config.master)
            .await
            .with_context(|| format!("Cannot connect to master at {}", config.master.host))?;

        let master_map = fetch_master(master.as_ref(), sync)
            .await
            .context("Failed to fetch torrents from master")?;

        info!("Found {} eligible torrent(s) on master", master_map.len());
        if sync.treat_stopped_as_removed {
            debug!("Stopped/paused torrents on master are treated as removed");
        }
        if !sync.sync_file_selections {
            debug!("File-selection sync is disabled");
        }

        let mut children = Vec::with_capacity(config.children.len());
        for instance in &config.children {
            let outcome = self
                .sync_child(master.as_ref(), &master_map, instance, sync, dry_run)
                .await;
            children.push(ChildSummary {
                name: instance.name.clone(),
                host: instance.host.clone(),
                outcome,
            });
        }

        Ok(CycleSummary {
            started_at,
            dry_run,
            master_eligible: master_map.len(),
            children,
        })
    }

    async fn sync_child(
        &self,
        master: &dyn TorrentClient,
        master_map: &SnapshotMap,
        instance: &InstanceConfig,
        sync: &SyncConfig,
        dry_run: bool,
    ) -> ChildOutcome {
        info!("Syncing child {} ({})", instance.name, instance.host);

        let child = match self.connector.connect(instance).await {
            Ok(client) => client,
            Err(e) => {
                error!(
                    child = %instance.name,
                    "Cannot connect to child {} at {}, skipping: {}",
                    instance.name, instance.host, e
                );
                return ChildOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let stale = match clean_stale(child.as_ref(), dry_run).await {
            Ok(stale) => stale.len(),
            Err(e) => {
                warn!("Stale cleanup failed on {}: {}", instance.name, e);
                0
            }
        };

        let child_map = match fetch_child(child.as_ref()).await {
            Ok(map) => map,
            Err(e) => {
                error!(
                    child = %instance.name,
                    "Failed to list torrents on {}, skipping: {}", instance.name, e
                );
                return ChildOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let mut diff = compute_diff(master_map, &child_map, &instance.name);
        if sync.sync_file_selections && !diff.to_sync_files.is_empty() {
            let candidates = std::mem::take(&mut diff.to_sync_files);
            diff.to_sync_files = refine_file_syncs(child.as_ref(), candidates).await;
        }

        log_diff(&diff, dry_run);

        if dry_run {
            return ChildOutcome::Planned { stale, diff };
        }

        let report = if diff.is_empty() {
            ApplyReport::default()
        } else {
            Applier::new(master, child.as_ref(), ApplyOptions::from(sync))
                .apply(&mut diff)
                .await
        };

        ChildOutcome::Applied {
            stale_removed: stale,
            diff,
            report,
        }
    }
}

/// Emit the diff as log lines, names at debug level
fn log_diff(diff: &SyncDiff, dry_run: bool) {
    let label = if dry_run { "[DRY RUN] " } else { "" };

    if diff.is_empty() {
        info!("{}{} is already in sync", label, diff.child_name);
        return;
    }

    let counts = diff.counts();
    info!(
        child = %diff.child_name,
        "{}Sync plan for {}: {} delete, {} add, {} recategorize, {} relocate, {} file selection",
        label,
        diff.child_name,
        counts.delete,
        counts.add,
        counts.recategorize,
        counts.relocate,
        counts.sync_files
    );

    for e in &diff.to_delete {
        debug!("  delete: {}", e.name);
    }
    for e in &diff.to_add {
        debug!("  add: {} → {}", e.name, e.save_path);
    }
    for pair in &diff.to_recategorize {
        debug!(
            "  recategorize: {} ({:?} → {:?})",
            pair.master.name, pair.child.category, pair.master.category
        );
    }
    for pair in &diff.to_relocate {
        debug!(
            "  relocate: {} ({} → {})",
            pair.master.name, pair.child.save_path, pair.master.save_path
        );
    }
    for e in &diff.to_sync_files {
        debug!("  file selection: {}", e.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TorrentEntry;

    fn entry(hash: &str) -> TorrentEntry {
        TorrentEntry {
            hash: hash.to_string(),
            name: hash.to_string(),
            save_path: "/data".to_string(),
            download_path: String::new(),
            category: String::new(),
            tags: Vec::new(),
            content_path: String::new(),
            file_priorities: None,
        }
    }

    #[test]
    fn test_totals_mix_planned_applied_and_skipped() {
        let mut planned = SyncDiff::new("a");
        planned.to_add = vec![entry("h1"), entry("h2")];

        let applied_report = ApplyReport {
            deleted: 1,
            added: 3,
            already_present: 1,
            ..Default::default()
        };

        let summary = CycleSummary {
            started_at: Utc::now(),
            dry_run: false,
            master_eligible: 5,
            children: vec![
                ChildSummary {
                    name: "a".to_string(),
                    host: "http://a".to_string(),
                    outcome: ChildOutcome::Planned {
                        stale: 2,
                        diff: planned,
                    },
                },
                ChildSummary {
                    name: "b".to_string(),
                    host: "http://b".to_string(),
                    outcome: ChildOutcome::Applied {
                        stale_removed: 1,
                        diff: SyncDiff::new("b"),
                        report: applied_report,
                    },
                },
                ChildSummary {
                    name: "c".to_string(),
                    host: "http://c".to_string(),
                    outcome: ChildOutcome::Skipped {
                        reason: "connection refused".to_string(),
                    },
                },
            ],
        };

        let totals = summary.totals();
        assert_eq!(totals.added, 5);
        assert_eq!(totals.deleted, 1);
        assert_eq!(totals.already_present, 1);
        assert_eq!(totals.stale, 3);
        assert_eq!(totals.skipped_children, 1);
        assert_eq!(totals.failed, 0);
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = ChildOutcome::Skipped {
            reason: "down".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "down");
    }
}
