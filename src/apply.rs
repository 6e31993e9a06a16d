//! Applier - executes one diff against one child
//!
//! Actions run in a fixed order: deletes, adds, recategorizations,
//! relocations, file-selection syncs. Each torrent is handled on its own;
//! a failure is recorded in the [`ApplyReport`] and processing moves on.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{AddTorrentRequest, ClientError, TorrentClient, TorrentFile};
use crate::config::SyncConfig;
use crate::diff::{EntryPair, SyncDiff};
use crate::refine::pending_deselections;
use crate::snapshot::TorrentEntry;

/// Bounded polling for a freshly added torrent's file list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileListWait {
    pub attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOptions {
    pub skip_hash_check: bool,
    pub sync_file_selections: bool,
    pub file_list_wait: FileListWait,
}

impl From<&SyncConfig> for ApplyOptions {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            skip_hash_check: sync.skip_hash_check,
            sync_file_selections: sync.sync_file_selections,
            file_list_wait: FileListWait {
                attempts: sync.file_list_attempts.max(1),
                delay: Duration::from_millis(sync.file_list_retry_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Delete,
    Add,
    Recategorize,
    Relocate,
    SyncFiles,
}

/// One torrent action that did not go through
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub action: Action,
    pub hash: String,
    pub name: String,
    pub error: String,
}

/// Outcome of applying one diff
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub deleted: usize,
    pub added: usize,
    /// Adds the child answered with a conflict
    pub already_present: usize,
    pub recategorized: usize,
    pub relocated: usize,
    pub file_synced: usize,
    /// Added torrents whose file deselection could not be pushed
    pub deselection_failed: usize,
    pub failures: Vec<ItemFailure>,
}

impl ApplyReport {
    fn fail(&mut self, action: Action, entry: &TorrentEntry, error: impl ToString) {
        self.failures.push(ItemFailure {
            action,
            hash: entry.hash.clone(),
            name: entry.name.clone(),
            error: error.to_string(),
        });
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Applies diffs to one child, pulling metadata from the master
pub struct Applier<'a> {
    master: &'a dyn TorrentClient,
    child: &'a dyn TorrentClient,
    options: ApplyOptions,
}

impl<'a> Applier<'a> {
    pub fn new(master: &'a dyn TorrentClient, child: &'a dyn TorrentClient, options: ApplyOptions) -> Self {
        Self {
            master,
            child,
            options,
        }
    }

    /// Apply every category of the diff.
    ///
    /// Entries in `to_add` get their file priorities backfilled.
    pub async fn apply(&self, diff: &mut SyncDiff) -> ApplyReport {
        let mut report = ApplyReport::default();

        self.apply_deletes(&diff.to_delete, &mut report).await;
        self.apply_adds(&mut diff.to_add, &mut report).await;
        self.apply_recategorize(&diff.to_recategorize, &mut report).await;
        self.apply_relocates(&diff.to_relocate, &mut report).await;
        if self.options.sync_file_selections {
            self.apply_file_syncs(&diff.to_sync_files, &mut report).await;
        }

        info!(
            child = self.child.name(),
            "Done: {} deleted, {} added, {} recategorized, {} relocated, {} file-selection synced, {} failed",
            report.deleted,
            report.added,
            report.recategorized,
            report.relocated,
            report.file_synced,
            report.failed()
        );

        report
    }

    /// Single batched delete; content stays on disk
    pub async fn apply_deletes(&self, entries: &[TorrentEntry], report: &mut ApplyReport) {
        if entries.is_empty() {
            return;
        }

        let hashes: Vec<String> = entries.iter().map(|e| e.hash.clone()).collect();
        match self.child.delete_torrents(&hashes, false).await {
            Ok(()) => {
                for e in entries {
                    info!(child = self.child.name(), hash = %e.hash, "Deleted torrent: {}", e.name);
                }
                report.deleted += entries.len();
            }
            Err(err) => {
                warn!(
                    "Failed to delete {} torrent(s) from {}: {}",
                    entries.len(),
                    self.child.name(),
                    err
                );
                for e in entries {
                    report.fail(Action::Delete, e, &err);
                }
            }
        }
    }

    pub async fn apply_adds(&self, entries: &mut [TorrentEntry], report: &mut ApplyReport) {
        for entry in entries.iter_mut() {
            self.add_one(entry, report).await;
        }
    }

    async fn add_one(&self, entry: &mut TorrentEntry, report: &mut ApplyReport) {
        let blob = match self.master.export_torrent(&entry.hash).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Failed to export .torrent for {}, skipping: {}", entry.name, e);
                report.fail(Action::Add, entry, e);
                return;
            }
        };

        if entry.file_priorities.is_none() {
            match self.master.list_files(&entry.hash).await {
                Ok(files) => entry.file_priorities = Some(files),
                Err(e) => warn!("Failed to fetch file priorities for {}: {}", entry.name, e),
            }
        }

        let deselected = entry.deselected_indices();
        let has_deselected = !deselected.is_empty();
        let download_path = (!entry.download_path.is_empty()).then(|| entry.download_path.clone());

        let request = AddTorrentRequest {
            hash: entry.hash.clone(),
            name: entry.name.clone(),
            blob,
            save_path: entry.save_path.clone(),
            download_path,
            category: entry.category.clone(),
            tags: entry.tags.clone(),
            skip_checking: self.options.skip_hash_check,
            paused: has_deselected,
            auto_torrent_management: false,
        };

        match self.child.add_torrent(request).await {
            Ok(()) => {
                if entry.download_path.is_empty() {
                    info!(
                        child = self.child.name(),
                        hash = %entry.hash,
                        "Added torrent: {} → {}",
                        entry.name,
                        entry.save_path
                    );
                } else {
                    info!(
                        child = self.child.name(),
                        hash = %entry.hash,
                        "Added torrent: {} → {} (temp: {})",
                        entry.name,
                        entry.save_path,
                        entry.download_path
                    );
                }
                report.added += 1;
            }
            Err(e) if e.is_conflict() => {
                debug!("Torrent already exists on {}: {}", self.child.name(), entry.name);
                report.already_present += 1;
                return;
            }
            Err(e) => {
                warn!("Failed to add torrent {}, skipping: {}", entry.name, e);
                report.fail(Action::Add, entry, e);
                return;
            }
        }

        if has_deselected {
            self.deselect_after_add(entry, &deselected, report).await;
        }
    }

    /// Push zero priority to a just-added paused torrent, then resume it
    async fn deselect_after_add(&self, entry: &TorrentEntry, deselected: &[usize], report: &mut ApplyReport) {
        let highest = deselected.iter().copied().max().unwrap_or(0);

        if self.wait_for_files(&entry.hash, highest).await.is_none() {
            warn!(
                "File list for {} not ready on {} after {} attempt(s), pushing priorities anyway",
                entry.name,
                self.child.name(),
                self.options.file_list_wait.attempts
            );
        }

        match self.child.set_file_priority(&entry.hash, deselected, 0).await {
            Ok(()) => debug!("Deselected {} file(s) for {}", deselected.len(), entry.name),
            Err(e) => {
                warn!(
                    "Failed to set file priorities for {}, it will download every file: {}",
                    entry.name, e
                );
                report.deselection_failed += 1;
            }
        }

        if let Err(e) = self.child.resume(&entry.hash).await {
            warn!(
                "Failed to resume {} on {} after file deselection, torrent left paused: {}",
                entry.name,
                self.child.name(),
                e
            );
        }
    }

    /// Poll until the child lists a file at `highest_index`, or give up
    async fn wait_for_files(&self, hash: &str, highest_index: usize) -> Option<Vec<TorrentFile>> {
        let wait = self.options.file_list_wait;

        for attempt in 1..=wait.attempts.max(1) {
            match self.child.list_files(hash).await {
                Ok(files) if files.iter().any(|f| f.index >= highest_index) => return Some(files),
                Ok(_) => debug!("File list for {} not ready (attempt {})", hash, attempt),
                Err(e) => debug!("File list for {} unavailable (attempt {}): {}", hash, attempt, e),
            }

            if attempt < wait.attempts {
                tokio::time::sleep(wait.delay).await;
            }
        }

        None
    }

    pub async fn apply_recategorize(&self, pairs: &[EntryPair], report: &mut ApplyReport) {
        for pair in pairs {
            let master = &pair.master;
            match self.child.set_category(&master.hash, &master.category).await {
                Ok(()) => {
                    info!(
                        child = self.child.name(),
                        hash = %master.hash,
                        "Recategorized torrent: {} ({:?} → {:?})",
                        master.name,
                        pair.child.category,
                        master.category
                    );
                    report.recategorized += 1;
                }
                Err(e) => {
                    warn!("Failed to recategorize torrent {}, skipping: {}", master.name, e);
                    report.fail(Action::Recategorize, master, e);
                }
            }
        }
    }

    pub async fn apply_relocates(&self, pairs: &[EntryPair], report: &mut ApplyReport) {
        for pair in pairs {
            match self.relocate_one(pair).await {
                Ok(()) => {
                    let mut parts = Vec::new();
                    if pair.save_path_differs() {
                        parts.push(format!("save_path: {} → {}", pair.child.save_path, pair.master.save_path));
                    }
                    if pair.download_path_differs() {
                        parts.push(format!(
                            "temp_path: {:?} → {:?}",
                            pair.child.download_path, pair.master.download_path
                        ));
                    }
                    info!(
                        child = self.child.name(),
                        hash = %pair.master.hash,
                        "Relocated torrent: {} ({})",
                        pair.master.name,
                        parts.join("; ")
                    );
                    report.relocated += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to relocate torrent {}, it may be left paused: {}",
                        pair.master.name, e
                    );
                    report.fail(Action::Relocate, &pair.master, e);
                }
            }
        }
    }

    /// Pause, move, resume
    async fn relocate_one(&self, pair: &EntryPair) -> Result<(), ClientError> {
        let hash = &pair.master.hash;

        self.child.pause(hash).await?;

        if pair.save_path_differs() {
            self.child.set_save_path(hash, &pair.master.save_path).await?;
        }
        if pair.download_path_differs() {
            self.child.set_download_path(hash, &pair.master.download_path).await?;
        }

        self.child.resume(hash).await
    }

    pub async fn apply_file_syncs(&self, entries: &[TorrentEntry], report: &mut ApplyReport) {
        for entry in entries {
            let Some(master_files) = entry.file_priorities.as_deref() else {
                continue;
            };

            let child_files = match self.child.list_files(&entry.hash).await {
                Ok(files) => files,
                Err(e) => {
                    warn!("Failed to fetch files for {} on child, skipping: {}", entry.name, e);
                    report.fail(Action::SyncFiles, entry, e);
                    continue;
                }
            };

            let indices = pending_deselections(master_files, &child_files);
            if indices.is_empty() {
                continue;
            }

            match self.child.set_file_priority(&entry.hash, &indices, 0).await {
                Ok(()) => {
                    info!(
                        child = self.child.name(),
                        hash = %entry.hash,
                        "Deselected {} file(s) for {}",
                        indices.len(),
                        entry.name
                    );
                    report.file_synced += 1;
                }
                Err(e) => {
                    warn!("Failed to update file priorities for {}, skipping: {}", entry.name, e);
                    report.fail(Action::SyncFiles, entry, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_sync_config() {
        let sync = SyncConfig {
            skip_hash_check: false,
            file_list_attempts: 3,
            file_list_retry_ms: 20,
            ..Default::default()
        };
        let options = ApplyOptions::from(&sync);

        assert!(!options.skip_hash_check);
        assert!(options.sync_file_selections);
        assert_eq!(options.file_list_wait.attempts, 3);
        assert_eq!(options.file_list_wait.delay, Duration::from_millis(20));
    }

    #[test]
    fn test_report_failure_bookkeeping() {
        let entry = TorrentEntry {
            hash: "h1".to_string(),
            name: "debian.iso".to_string(),
            save_path: "/data".to_string(),
            download_path: String::new(),
            category: String::new(),
            tags: Vec::new(),
            content_path: String::new(),
            file_priorities: None,
        };

        let mut report = ApplyReport::default();
        report.fail(Action::Relocate, &entry, "boom");

        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].action, Action::Relocate);
        assert_eq!(report.failures[0].error, "boom");
    }
}
