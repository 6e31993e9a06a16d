//! File-selection refinement against a child's actual file priorities

use std::collections::HashMap;
use tracing::debug;

use crate::client::{TorrentClient, TorrentFile};
use crate::snapshot::TorrentEntry;

/// Indices the master has deselected but the child still downloads.
///
/// Files the child doesn't list yet are ignored.
pub fn pending_deselections(master_files: &[TorrentFile], child_files: &[TorrentFile]) -> Vec<usize> {
    let child_priorities: HashMap<usize, i64> =
        child_files.iter().map(|f| (f.index, f.priority)).collect();

    master_files
        .iter()
        .filter(|f| f.is_deselected())
        .filter(|f| matches!(child_priorities.get(&f.index), Some(&p) if p != 0))
        .map(|f| f.index)
        .collect()
}

/// Keep only candidates whose child still downloads a file the master deselected.
///
/// A candidate whose child listing can't be fetched is kept.
pub async fn refine_file_syncs(
    child: &dyn TorrentClient,
    candidates: Vec<TorrentEntry>,
) -> Vec<TorrentEntry> {
    let mut needed = Vec::with_capacity(candidates.len());

    for entry in candidates {
        let Some(master_files) = entry.file_priorities.as_deref() else {
            continue;
        };

        match child.list_files(&entry.hash).await {
            Ok(child_files) => {
                if pending_deselections(master_files, &child_files).is_empty() {
                    debug!("File selection already matches on {} for {}", child.name(), entry.name);
                    continue;
                }
                needed.push(entry);
            }
            Err(e) => {
                debug!(
                    "Could not read files for {} on {} ({}), keeping candidate",
                    entry.name,
                    child.name(),
                    e
                );
                needed.push(entry);
            }
        }
    }

    needed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(priorities: &[i64]) -> Vec<TorrentFile> {
        priorities
            .iter()
            .enumerate()
            .map(|(index, &priority)| TorrentFile { index, priority })
            .collect()
    }

    #[test]
    fn test_pending_deselections_only_where_child_differs() {
        assert_eq!(pending_deselections(&files(&[1, 0, 1]), &files(&[1, 1, 1])), vec![1]);
        assert!(pending_deselections(&files(&[1, 0, 1]), &files(&[1, 0, 1])).is_empty());
        assert_eq!(
            pending_deselections(&files(&[0, 0, 1]), &files(&[6, 0, 0])),
            vec![0]
        );
    }

    #[test]
    fn test_pending_deselections_ignores_missing_child_files() {
        assert_eq!(pending_deselections(&files(&[1, 0, 0]), &files(&[1, 1])), vec![1]);
        assert!(pending_deselections(&files(&[0]), &[]).is_empty());
    }

    #[test]
    fn test_pending_deselections_matches_by_index() {
        let master = vec![TorrentFile { index: 3, priority: 0 }];
        let child = vec![
            TorrentFile { index: 0, priority: 1 },
            TorrentFile { index: 3, priority: 1 },
        ];
        assert_eq!(pending_deselections(&master, &child), vec![3]);
    }
}
