//! Client capability - the abstract interface to one torrent-client host
//!
//! The reconciliation engine only talks to instances through [`TorrentClient`].
//! The production implementation lives in [`crate::qbittorrent`]; tests use
//! in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use thiserror::Error;

use crate::config::InstanceConfig;

/// Raw torrent record as reported by `torrents/info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTorrent {
    pub hash: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub progress: f64,
    /// Accumulated seeding time in seconds
    #[serde(default)]
    pub seeding_time: i64,
    #[serde(default)]
    pub save_path: String,
    #[serde(default)]
    pub download_path: String,
    #[serde(default)]
    pub category: String,
    /// Comma separated tag list
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub content_path: String,
}

impl RawTorrent {
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Lowercased lifecycle state
    pub fn state_key(&self) -> String {
        self.state.to_lowercase()
    }

    /// Name for log lines, falling back to the hash
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.hash
        } else {
            &self.name
        }
    }
}

/// One file inside a torrent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub index: usize,
    /// 0 means "do not download"
    pub priority: i64,
}

impl TorrentFile {
    pub fn is_deselected(&self) -> bool {
        self.priority == 0
    }
}

/// Everything needed to create a torrent on a child
#[derive(Debug, Clone)]
pub struct AddTorrentRequest {
    pub hash: String,
    pub name: String,
    /// Exported .torrent metadata
    pub blob: Vec<u8>,
    pub save_path: String,
    pub download_path: Option<String>,
    pub category: String,
    pub tags: Vec<String>,
    pub skip_checking: bool,
    pub paused: bool,
    pub auto_torrent_management: bool,
}

/// Errors returned by a client capability
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication rejected by {host}")]
    Auth { host: String },

    #[error("{operation} request failed")]
    Transport {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("torrent {hash} already exists")]
    Conflict { hash: String },

    #[error("{operation} returned HTTP {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("{operation} was rejected by the host")]
    Rejected { operation: &'static str },

    #[error("unexpected {operation} response")]
    Decode {
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ClientError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict { .. })
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Operations the engine needs from one torrent-client host
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Display name of the instance
    fn name(&self) -> &str;

    async fn authenticate(&self) -> ClientResult<()>;

    async fn list_torrents(&self) -> ClientResult<Vec<RawTorrent>>;

    async fn list_files(&self, hash: &str) -> ClientResult<Vec<TorrentFile>>;

    /// Export the .torrent metadata blob
    async fn export_torrent(&self, hash: &str) -> ClientResult<Vec<u8>>;

    /// Fails with [`ClientError::Conflict`] if the hash is already present
    async fn add_torrent(&self, request: AddTorrentRequest) -> ClientResult<()>;

    async fn delete_torrents(&self, hashes: &[String], delete_files: bool) -> ClientResult<()>;

    async fn set_category(&self, hash: &str, category: &str) -> ClientResult<()>;

    async fn set_save_path(&self, hash: &str, path: &str) -> ClientResult<()>;

    async fn set_download_path(&self, hash: &str, path: &str) -> ClientResult<()>;

    async fn set_file_priority(&self, hash: &str, indices: &[usize], priority: i64)
        -> ClientResult<()>;

    async fn pause(&self, hash: &str) -> ClientResult<()>;

    async fn resume(&self, hash: &str) -> ClientResult<()>;
}

/// Opens an authenticated session with an instance
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, instance: &InstanceConfig) -> ClientResult<Box<dyn TorrentClient>>;
}
