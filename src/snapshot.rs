//! Snapshot fetching - turns raw torrent listings into hash-keyed entry maps

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::client::{ClientResult, RawTorrent, TorrentClient, TorrentFile};
use crate::config::SyncConfig;

/// Point-in-time record of one torrent's sync-relevant fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentEntry {
    pub hash: String,
    pub name: String,
    pub save_path: String,
    pub download_path: String,
    pub category: String,
    pub tags: Vec<String>,
    pub content_path: String,
    /// Absent until explicitly loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_priorities: Option<Vec<TorrentFile>>,
}

impl TorrentEntry {
    /// Indices of files marked do-not-download, if priorities are loaded
    pub fn deselected_indices(&self) -> Vec<usize> {
        self.file_priorities
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|f| f.is_deselected())
            .map(|f| f.index)
            .collect()
    }

    pub fn has_deselected_files(&self) -> bool {
        self.file_priorities
            .as_deref()
            .is_some_and(|files| files.iter().any(TorrentFile::is_deselected))
    }
}

impl From<&RawTorrent> for TorrentEntry {
    fn from(t: &RawTorrent) -> Self {
        Self {
            hash: t.hash.clone(),
            name: t.name.clone(),
            save_path: t.save_path.clone(),
            download_path: t.download_path.clone(),
            category: t.category.clone(),
            tags: t.tag_list(),
            content_path: t.content_path.clone(),
            file_priorities: None,
        }
    }
}

/// Hash-keyed snapshot of one instance
pub type SnapshotMap = BTreeMap<String, TorrentEntry>;

const COMPLETED_STATES: &[&str] = &[
    "uploading",
    "stalledup",
    "forcedup",
    "pausedup",
    "stoppedup",
    "queuedup",
    "checkingup",
    "seeding",
    "completed",
];

const STOPPED_STATES: &[&str] = &["pausedup", "pauseddl", "stoppedup", "stoppeddl"];

/// Why a master torrent is or isn't mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Stopped on the master while stopped-means-removed is on
    Stopped,
    Incomplete,
    Seeding { seconds: i64, required: i64 },
}

pub fn eligibility(
    torrent: &RawTorrent,
    min_seeding_seconds: i64,
    treat_stopped_as_removed: bool,
) -> Eligibility {
    let state = torrent.state_key();

    if treat_stopped_as_removed && STOPPED_STATES.contains(&state.as_str()) {
        return Eligibility::Stopped;
    }

    let is_completed = COMPLETED_STATES.contains(&state.as_str()) || torrent.progress >= 1.0;
    if !is_completed {
        return Eligibility::Incomplete;
    }

    if torrent.seeding_time < min_seeding_seconds {
        return Eligibility::Seeding {
            seconds: torrent.seeding_time,
            required: min_seeding_seconds,
        };
    }

    Eligibility::Eligible
}

/// Build a map keeping the first record seen for each hash
fn insert_unique(map: &mut SnapshotMap, torrent: &RawTorrent, instance: &str) {
    if map.contains_key(&torrent.hash) {
        warn!(
            instance,
            hash = %torrent.hash,
            "Duplicate hash in torrent listing, keeping the first record"
        );
        return;
    }
    map.insert(torrent.hash.clone(), TorrentEntry::from(torrent));
}

/// Fetch the eligible torrents on the master
pub async fn fetch_master(client: &dyn TorrentClient, sync: &SyncConfig) -> ClientResult<SnapshotMap> {
    let torrents = client.list_torrents().await?;
    let min_seeding_seconds = sync.min_seeding_seconds();

    let mut result = SnapshotMap::new();
    let mut stopped_count = 0usize;

    for torrent in &torrents {
        match eligibility(torrent, min_seeding_seconds, sync.treat_stopped_as_removed) {
            Eligibility::Eligible => insert_unique(&mut result, torrent, client.name()),
            Eligibility::Stopped => {
                stopped_count += 1;
                debug!("Treating stopped torrent as removed: {}", torrent.label());
            }
            Eligibility::Incomplete => {
                debug!("Skipping {} (not complete)", torrent.label());
            }
            Eligibility::Seeding { seconds, required } => {
                debug!(
                    "Skipping {} (seeding {}s < {}s)",
                    torrent.label(),
                    seconds,
                    required
                );
            }
        }
    }

    if stopped_count > 0 {
        info!(
            "Excluded {} stopped/paused torrent(s) from master (treated as removed)",
            stopped_count
        );
    }

    if sync.sync_file_selections {
        load_file_priorities(client, &mut result).await;

        let deselected_count = result.values().filter(|e| e.has_deselected_files()).count();
        if deselected_count > 0 {
            info!("{} torrent(s) have deselected files on master", deselected_count);
        }
    }

    Ok(result)
}

/// Attach per-file priorities; a failure for one torrent leaves it without
async fn load_file_priorities(client: &dyn TorrentClient, entries: &mut SnapshotMap) {
    for entry in entries.values_mut() {
        match client.list_files(&entry.hash).await {
            Ok(files) => entry.file_priorities = Some(files),
            Err(e) => warn!("Failed to fetch file priorities for {}: {}", entry.name, e),
        }
    }
}

/// Fetch every torrent on a child, unfiltered
pub async fn fetch_child(client: &dyn TorrentClient) -> ClientResult<SnapshotMap> {
    let torrents = client.list_torrents().await?;

    let mut result = SnapshotMap::new();
    for torrent in &torrents {
        insert_unique(&mut result, torrent, client.name());
    }

    debug!("Child {} has {} torrent(s)", client.name(), result.len());
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(state: &str, progress: f64, seeding_time: i64) -> RawTorrent {
        RawTorrent {
            hash: "h1".to_string(),
            name: "ubuntu.iso".to_string(),
            state: state.to_string(),
            progress,
            seeding_time,
            ..Default::default()
        }
    }

    #[test]
    fn test_seeding_at_threshold_is_eligible() {
        let t = torrent("uploading", 1.0, 600);
        assert_eq!(eligibility(&t, 600, false), Eligibility::Eligible);
    }

    #[test]
    fn test_seeding_below_threshold_is_excluded() {
        let t = torrent("stalledUP", 1.0, 599);
        assert_eq!(
            eligibility(&t, 600, false),
            Eligibility::Seeding {
                seconds: 599,
                required: 600
            }
        );
    }

    #[test]
    fn test_full_progress_counts_as_complete() {
        let t = torrent("moving", 1.0, 1000);
        assert_eq!(eligibility(&t, 600, false), Eligibility::Eligible);
    }

    #[test]
    fn test_downloading_is_incomplete() {
        let t = torrent("downloading", 0.4, 0);
        assert_eq!(eligibility(&t, 0, false), Eligibility::Incomplete);
    }

    #[test]
    fn test_stopped_excluded_only_when_enabled() {
        let t = torrent("pausedUP", 1.0, 100_000);
        assert_eq!(eligibility(&t, 600, false), Eligibility::Eligible);
        assert_eq!(eligibility(&t, 600, true), Eligibility::Stopped);

        let v5 = torrent("stoppedUP", 1.0, 100_000);
        assert_eq!(eligibility(&v5, 600, true), Eligibility::Stopped);
    }

    #[test]
    fn test_entry_deselected_indices() {
        let mut entry = TorrentEntry::from(&torrent("uploading", 1.0, 0));
        assert!(!entry.has_deselected_files());
        assert!(entry.deselected_indices().is_empty());

        entry.file_priorities = Some(vec![
            TorrentFile { index: 0, priority: 1 },
            TorrentFile { index: 1, priority: 0 },
            TorrentFile { index: 2, priority: 7 },
        ]);
        assert!(entry.has_deselected_files());
        assert_eq!(entry.deselected_indices(), vec![1]);
    }
}
