/// Common test utilities and helpers for qbt-sync tests
#[allow(dead_code)]
pub mod fake {
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex, MutexGuard};

    use qbt_sync::client::{
        AddTorrentRequest, ClientError, ClientResult, Connector, RawTorrent, TorrentClient,
        TorrentFile,
    };
    use qbt_sync::config::{Config, HttpConfig, InstanceConfig, LoggingConfig, SyncConfig};

    /// Everything a fake instance knows and remembers
    #[derive(Debug, Default)]
    pub struct FakeState {
        pub torrents: Vec<RawTorrent>,
        /// Per-hash file lists, served only while the torrent exists
        pub files: HashMap<String, Vec<TorrentFile>>,
        /// Empty file listings to serve before the real one
        pub files_pending: HashMap<String, usize>,
        /// Torrents whose add requests were received, in order
        pub added: Vec<AddRequestRecord>,
        /// (operation, hash) pairs that fail; "*" matches any hash
        pub failures: HashSet<(String, String)>,
        /// Hashes the host answers with a conflict on add
        pub conflicts: HashSet<String>,
        pub calls: Vec<String>,
    }

    /// An add request without its blob
    #[derive(Debug, Clone, PartialEq)]
    pub struct AddRequestRecord {
        pub hash: String,
        pub save_path: String,
        pub download_path: Option<String>,
        pub category: String,
        pub tags: Vec<String>,
        pub skip_checking: bool,
        pub paused: bool,
        pub auto_torrent_management: bool,
    }

    /// In-memory torrent client; clones share state
    #[derive(Debug, Clone)]
    pub struct FakeClient {
        name: String,
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeClient {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                state: Arc::new(Mutex::new(FakeState::default())),
            }
        }

        pub fn state(&self) -> MutexGuard<'_, FakeState> {
            self.state.lock().expect("fake state poisoned")
        }

        pub fn with_torrent(self, torrent: RawTorrent) -> Self {
            self.state().torrents.push(torrent);
            self
        }

        pub fn with_files(self, hash: &str, priorities: &[i64]) -> Self {
            self.state().files.insert(hash.to_string(), files(priorities));
            self
        }

        /// Serve `count` empty listings for `hash` before the real one
        pub fn with_files_pending(self, hash: &str, count: usize) -> Self {
            self.state().files_pending.insert(hash.to_string(), count);
            self
        }

        pub fn failing(self, operation: &str, hash: &str) -> Self {
            self.state()
                .failures
                .insert((operation.to_string(), hash.to_string()));
            self
        }

        pub fn with_conflict(self, hash: &str) -> Self {
            self.state().conflicts.insert(hash.to_string());
            self
        }

        pub fn torrent(&self, hash: &str) -> Option<RawTorrent> {
            self.state().torrents.iter().find(|t| t.hash == hash).cloned()
        }

        pub fn hashes(&self) -> Vec<String> {
            let mut hashes: Vec<String> = self.state().torrents.iter().map(|t| t.hash.clone()).collect();
            hashes.sort();
            hashes
        }

        pub fn priorities(&self, hash: &str) -> Vec<i64> {
            self.state()
                .files
                .get(hash)
                .map(|files| files.iter().map(|f| f.priority).collect())
                .unwrap_or_default()
        }

        pub fn calls(&self) -> Vec<String> {
            self.state().calls.clone()
        }

        /// Calls that change state on the host
        pub fn mutating_calls(&self) -> Vec<String> {
            const READS: &[&str] = &["authenticate", "list_torrents", "list_files", "export"];
            self.calls()
                .into_iter()
                .filter(|c| !READS.iter().any(|r| c.starts_with(r)))
                .collect()
        }

        fn record(&self, operation: &str, hash: &str) -> ClientResult<()> {
            let mut state = self.state();
            state.calls.push(if hash.is_empty() {
                operation.to_string()
            } else {
                format!("{} {}", operation, hash)
            });

            let fails = state.failures.contains(&(operation.to_string(), hash.to_string()))
                || state.failures.contains(&(operation.to_string(), "*".to_string()));
            if fails {
                return Err(ClientError::Status {
                    operation: "fake",
                    status: 500,
                });
            }
            Ok(())
        }

        fn with_torrent_mut(&self, hash: &str, f: impl FnOnce(&mut RawTorrent)) -> ClientResult<()> {
            let mut state = self.state();
            match state.torrents.iter_mut().find(|t| t.hash == hash) {
                Some(torrent) => {
                    f(torrent);
                    Ok(())
                }
                None => Err(not_found()),
            }
        }
    }

    fn not_found() -> ClientError {
        ClientError::Status {
            operation: "fake",
            status: 404,
        }
    }

    pub fn files(priorities: &[i64]) -> Vec<TorrentFile> {
        priorities
            .iter()
            .enumerate()
            .map(|(index, &priority)| TorrentFile { index, priority })
            .collect()
    }

    #[async_trait]
    impl TorrentClient for FakeClient {
        fn name(&self) -> &str {
            &self.name
        }

        async fn authenticate(&self) -> ClientResult<()> {
            self.record("authenticate", "")
        }

        async fn list_torrents(&self) -> ClientResult<Vec<RawTorrent>> {
            self.record("list_torrents", "")?;
            Ok(self.state().torrents.clone())
        }

        async fn list_files(&self, hash: &str) -> ClientResult<Vec<TorrentFile>> {
            self.record("list_files", hash)?;
            let mut state = self.state();
            if !state.torrents.iter().any(|t| t.hash == hash) {
                return Err(not_found());
            }
            if let Some(pending) = state.files_pending.get_mut(hash) {
                if *pending > 0 {
                    *pending -= 1;
                    return Ok(Vec::new());
                }
            }
            Ok(state.files.get(hash).cloned().unwrap_or_default())
        }

        async fn export_torrent(&self, hash: &str) -> ClientResult<Vec<u8>> {
            self.record("export", hash)?;
            if self.torrent(hash).is_none() {
                return Err(not_found());
            }
            Ok(format!("d4:hash{}:{}e", hash.len(), hash).into_bytes())
        }

        async fn add_torrent(&self, request: AddTorrentRequest) -> ClientResult<()> {
            self.record("add", &request.hash)?;
            let mut state = self.state();

            if state.conflicts.contains(&request.hash)
                || state.torrents.iter().any(|t| t.hash == request.hash)
            {
                return Err(ClientError::Conflict { hash: request.hash });
            }

            state.added.push(AddRequestRecord {
                hash: request.hash.clone(),
                save_path: request.save_path.clone(),
                download_path: request.download_path.clone(),
                category: request.category.clone(),
                tags: request.tags.clone(),
                skip_checking: request.skip_checking,
                paused: request.paused,
                auto_torrent_management: request.auto_torrent_management,
            });
            state.torrents.push(RawTorrent {
                hash: request.hash,
                name: request.name,
                state: if request.paused { "pausedDL" } else { "downloading" }.to_string(),
                // skip_checking trusts the data already on disk
                progress: if request.skip_checking { 1.0 } else { 0.0 },
                save_path: request.save_path,
                download_path: request.download_path.unwrap_or_default(),
                category: request.category,
                tags: request.tags.join(","),
                ..Default::default()
            });
            Ok(())
        }

        async fn delete_torrents(&self, hashes: &[String], delete_files: bool) -> ClientResult<()> {
            self.record("delete", &hashes.join("|"))?;
            assert!(!delete_files, "content must never be deleted");
            self.state().torrents.retain(|t| !hashes.contains(&t.hash));
            Ok(())
        }

        async fn set_category(&self, hash: &str, category: &str) -> ClientResult<()> {
            self.record("set_category", hash)?;
            self.with_torrent_mut(hash, |t| t.category = category.to_string())
        }

        async fn set_save_path(&self, hash: &str, path: &str) -> ClientResult<()> {
            self.record("set_save_path", hash)?;
            self.with_torrent_mut(hash, |t| t.save_path = path.to_string())
        }

        async fn set_download_path(&self, hash: &str, path: &str) -> ClientResult<()> {
            self.record("set_download_path", hash)?;
            self.with_torrent_mut(hash, |t| t.download_path = path.to_string())
        }

        async fn set_file_priority(&self, hash: &str, indices: &[usize], priority: i64) -> ClientResult<()> {
            self.record("set_file_priority", hash)?;
            let mut state = self.state();
            let files = state.files.get_mut(hash).ok_or_else(not_found)?;
            for file in files.iter_mut().filter(|f| indices.contains(&f.index)) {
                file.priority = priority;
            }
            Ok(())
        }

        async fn pause(&self, hash: &str) -> ClientResult<()> {
            self.record("pause", hash)?;
            self.with_torrent_mut(hash, |t| t.state = "pausedUP".to_string())
        }

        async fn resume(&self, hash: &str) -> ClientResult<()> {
            self.record("resume", hash)?;
            self.with_torrent_mut(hash, |t| t.state = "stalledUP".to_string())
        }
    }

    /// Hands out fake clients by host
    #[derive(Debug, Clone, Default)]
    pub struct FakeConnector {
        clients: HashMap<String, FakeClient>,
        unreachable: HashSet<String>,
        connects: Arc<Mutex<Vec<String>>>,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(mut self, host: &str, client: FakeClient) -> Self {
            self.clients.insert(host.to_string(), client);
            self
        }

        pub fn with_unreachable(mut self, host: &str) -> Self {
            self.unreachable.insert(host.to_string());
            self
        }

        pub fn connects(&self) -> Vec<String> {
            self.connects.lock().expect("connects poisoned").clone()
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, instance: &InstanceConfig) -> ClientResult<Box<dyn TorrentClient>> {
            self.connects
                .lock()
                .expect("connects poisoned")
                .push(instance.host.clone());

            let client = match self.clients.get(&instance.host) {
                Some(client) if !self.unreachable.contains(&instance.host) => client.clone(),
                _ => {
                    return Err(ClientError::Transport {
                        operation: "login",
                        source: Box::new(std::io::Error::new(
                            std::io::ErrorKind::ConnectionRefused,
                            format!("{} unreachable", instance.host),
                        )),
                    })
                }
            };
            client.authenticate().await?;
            Ok(Box::new(client))
        }
    }

    pub const MASTER_HOST: &str = "http://master:8080";

    pub fn child_host(n: usize) -> String {
        format!("http://child{}:8080", n)
    }

    pub fn instance(name: &str, host: &str) -> InstanceConfig {
        InstanceConfig {
            host: host.to_string(),
            username: "admin".to_string(),
            password: "adminadmin".to_string(),
            name: name.to_string(),
        }
    }

    /// Master plus `children` children, no seeding threshold, fast file polling
    pub fn test_config(children: usize) -> Config {
        Config {
            master: instance("master", MASTER_HOST),
            children: (1..=children)
                .map(|n| instance(&format!("child-{}", n), &child_host(n)))
                .collect(),
            sync: SyncConfig {
                min_seeding_time_minutes: 0,
                file_list_attempts: 3,
                file_list_retry_ms: 10,
                ..Default::default()
            },
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
        }
    }

    /// A completed torrent that has been seeding for an hour
    pub fn seeding(hash: &str, save_path: &str) -> RawTorrent {
        RawTorrent {
            hash: hash.to_string(),
            name: format!("{}.mkv", hash),
            state: "stalledUP".to_string(),
            progress: 1.0,
            seeding_time: 3600,
            save_path: save_path.to_string(),
            ..Default::default()
        }
    }
}
