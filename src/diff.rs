//! Diff engine - compares a master snapshot with a child snapshot
//!
//! [`compute_diff`] performs no I/O. Comparisons are exact string equality.

use serde::Serialize;

use crate::snapshot::{SnapshotMap, TorrentEntry};

/// A torrent present on both sides whose metadata differs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPair {
    pub master: TorrentEntry,
    pub child: TorrentEntry,
}

impl EntryPair {
    pub fn save_path_differs(&self) -> bool {
        self.master.save_path != self.child.save_path
    }

    pub fn download_path_differs(&self) -> bool {
        self.master.download_path != self.child.download_path
    }
}

/// Computed delta between master and one child
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncDiff {
    pub child_name: String,
    pub to_delete: Vec<TorrentEntry>,
    pub to_add: Vec<TorrentEntry>,
    pub to_recategorize: Vec<EntryPair>,
    pub to_relocate: Vec<EntryPair>,
    pub to_sync_files: Vec<TorrentEntry>,
}

/// Per-category action counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffCounts {
    pub delete: usize,
    pub add: usize,
    pub recategorize: usize,
    pub relocate: usize,
    pub sync_files: usize,
}

impl SyncDiff {
    pub fn new(child_name: impl Into<String>) -> Self {
        Self {
            child_name: child_name.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty()
            && self.to_add.is_empty()
            && self.to_recategorize.is_empty()
            && self.to_relocate.is_empty()
            && self.to_sync_files.is_empty()
    }

    pub fn counts(&self) -> DiffCounts {
        DiffCounts {
            delete: self.to_delete.len(),
            add: self.to_add.len(),
            recategorize: self.to_recategorize.len(),
            relocate: self.to_relocate.len(),
            sync_files: self.to_sync_files.len(),
        }
    }
}

pub fn compute_diff(master: &SnapshotMap, child: &SnapshotMap, child_name: &str) -> SyncDiff {
    let mut diff = SyncDiff::new(child_name);

    for (hash, child_entry) in child {
        if !master.contains_key(hash) {
            diff.to_delete.push(child_entry.clone());
        }
    }

    for (hash, master_entry) in master {
        let Some(child_entry) = child.get(hash) else {
            diff.to_add.push(master_entry.clone());
            continue;
        };

        if master_entry.category != child_entry.category {
            diff.to_recategorize.push(EntryPair {
                master: master_entry.clone(),
                child: child_entry.clone(),
            });
        }

        if master_entry.save_path != child_entry.save_path
            || master_entry.download_path != child_entry.download_path
        {
            diff.to_relocate.push(EntryPair {
                master: master_entry.clone(),
                child: child_entry.clone(),
            });
        }

        // Narrowed against the child's actual priorities before applying
        if master_entry.has_deselected_files() {
            diff.to_sync_files.push(master_entry.clone());
        }
    }

    diff
}
