//! qbt-sync - Master/child torrent synchronization for qBittorrent
//!
//! qbt-sync keeps a set of child qBittorrent instances in line with one
//! authoritative master: torrents that finished seeding on the master are
//! mirrored onto every child, torrents dropped by the master are removed from
//! children, and save path, category and file selection drift is corrected.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, validation and reload sources
//! - [`client`]: The client capability trait the engine talks through
//! - [`qbittorrent`]: Web API v2 implementation of that trait
//! - [`snapshot`]: Master/child snapshot fetching and eligibility
//! - [`diff`]: Pure master/child diff computation
//! - [`refine`]: File-selection narrowing against a child's real priorities
//! - [`cleanup`]: Stale torrent removal on children
//! - [`apply`]: Ordered, failure-isolated application of a diff
//! - [`reconcile`]: One full cycle across every child
//! - [`daemon`]: The repeating loop with config reload

pub mod apply;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod daemon;
pub mod diff;
pub mod qbittorrent;
pub mod reconcile;
pub mod refine;
pub mod snapshot;

pub use apply::{Applier, ApplyOptions, ApplyReport};
pub use client::{ClientError, Connector, TorrentClient};
pub use config::{Config, ConfigError, ConfigSource, FileConfigSource};
pub use daemon::{Daemon, DaemonStats};
pub use diff::{compute_diff, SyncDiff};
pub use qbittorrent::{QbitClient, QbitConnector};
pub use reconcile::{ChildOutcome, CycleSummary, Reconciler};
pub use snapshot::{SnapshotMap, TorrentEntry};
