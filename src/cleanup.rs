//! Pre-sync cleanup of broken torrents on a child

use serde::Serialize;
use tracing::{debug, info};

use crate::client::{ClientResult, RawTorrent, TorrentClient};

const STALE_STATES: &[&str] = &["error", "missingfiles"];

/// A torrent flagged for removal before reconciliation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaleTorrent {
    pub hash: String,
    pub name: String,
    pub reason: String,
}

pub fn find_stale(torrents: &[RawTorrent]) -> Vec<StaleTorrent> {
    torrents
        .iter()
        .filter_map(|t| {
            let state = t.state_key();
            let reason = if STALE_STATES.contains(&state.as_str()) {
                format!("state={}", state)
            } else if t.progress <= 0.0 {
                "0% progress".to_string()
            } else {
                return None;
            };

            Some(StaleTorrent {
                hash: t.hash.clone(),
                name: t.label().to_string(),
                reason,
            })
        })
        .collect()
}

/// Remove stale torrents from a child, keeping their files on disk.
///
/// Returns the torrents that were found. In dry-run mode nothing is deleted.
pub async fn clean_stale(client: &dyn TorrentClient, dry_run: bool) -> ClientResult<Vec<StaleTorrent>> {
    let torrents = client.list_torrents().await?;
    let stale = find_stale(&torrents);

    if stale.is_empty() {
        debug!("No stale torrents found on {}", client.name());
        return Ok(stale);
    }

    for t in &stale {
        debug!(child = client.name(), hash = %t.hash, "Stale torrent {} ({})", t.name, t.reason);
    }

    if dry_run {
        info!(
            "[DRY RUN] Would remove {} stale torrent(s) from {}",
            stale.len(),
            client.name()
        );
        return Ok(stale);
    }

    let hashes: Vec<String> = stale.iter().map(|t| t.hash.clone()).collect();
    client.delete_torrents(&hashes, false).await?;
    info!("Removed {} stale torrent(s) from {}", stale.len(), client.name());

    Ok(stale)
}
