//! qBittorrent Web API v2 client

use async_trait::async_trait;
use reqwest::header::REFERER;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::client::{
    AddTorrentRequest, ClientError, ClientResult, Connector, RawTorrent, TorrentClient, TorrentFile,
};
use crate::config::InstanceConfig;

/// Session-holding client for one qBittorrent instance
pub struct QbitClient {
    http: reqwest::Client,
    base_url: String,
    name: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    priority: i64,
}

fn transport(operation: &'static str) -> impl FnOnce(reqwest::Error) -> ClientError {
    move |e| ClientError::Transport {
        operation,
        source: Box::new(e),
    }
}

/// Prefix a scheme if missing and drop trailing slashes
pub fn normalize_base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

impl QbitClient {
    pub fn new(instance: &InstanceConfig, timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(transport("client setup"))?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&instance.host),
            name: instance.name.clone(),
            username: instance.username.clone(),
            password: instance.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v2/{}", self.base_url, endpoint)
    }

    /// Map non-success statuses; 403 means the session is not authenticated
    fn check(&self, operation: &'static str, response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::FORBIDDEN {
            Err(ClientError::Auth {
                host: self.base_url.clone(),
            })
        } else {
            Err(ClientError::Status {
                operation,
                status: status.as_u16(),
            })
        }
    }

    async fn get(&self, operation: &'static str, endpoint: &str, query: &[(&str, &str)]) -> ClientResult<Response> {
        let response = self
            .http
            .get(self.url(endpoint))
            .header(REFERER, &self.base_url)
            .query(query)
            .send()
            .await
            .map_err(transport(operation))?;
        self.check(operation, response)
    }

    async fn post_raw(&self, operation: &'static str, endpoint: &str, form: &[(&str, &str)]) -> ClientResult<Response> {
        self.http
            .post(self.url(endpoint))
            .header(REFERER, &self.base_url)
            .form(form)
            .send()
            .await
            .map_err(transport(operation))
    }

    async fn post(&self, operation: &'static str, endpoint: &str, form: &[(&str, &str)]) -> ClientResult<()> {
        let response = self.post_raw(operation, endpoint, form).await?;
        self.check(operation, response)?;
        Ok(())
    }

    /// Post to `endpoint`, retrying on `fallback` when the host doesn't know it
    async fn post_with_fallback(
        &self,
        operation: &'static str,
        endpoint: &str,
        fallback: &str,
        form: &[(&str, &str)],
    ) -> ClientResult<()> {
        let response = self.post_raw(operation, endpoint, form).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("{} has no {} endpoint, using {}", self.name, endpoint, fallback);
            return self.post(operation, fallback, form).await;
        }
        self.check(operation, response)?;
        Ok(())
    }
}

#[async_trait]
impl TorrentClient for QbitClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self) -> ClientResult<()> {
        let form = [("username", self.username.as_str()), ("password", self.password.as_str())];
        let response = self.post_raw("login", "auth/login", &form).await?;
        let response = self.check("login", response)?;
        let body = response.text().await.map_err(transport("login"))?;

        if body.trim() == "Ok." {
            debug!("Connected to {} ({})", self.name, self.base_url);
            Ok(())
        } else {
            Err(ClientError::Auth {
                host: self.base_url.clone(),
            })
        }
    }

    async fn list_torrents(&self) -> ClientResult<Vec<RawTorrent>> {
        self.get("list torrents", "torrents/info", &[])
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode {
                operation: "list torrents",
                source: Box::new(e),
            })
    }

    async fn list_files(&self, hash: &str) -> ClientResult<Vec<TorrentFile>> {
        let files: Vec<WireFile> = self
            .get("list files", "torrents/files", &[("hash", hash)])
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode {
                operation: "list files",
                source: Box::new(e),
            })?;

        Ok(files
            .into_iter()
            .enumerate()
            .map(|(position, f)| TorrentFile {
                index: f.index.unwrap_or(position),
                priority: f.priority,
            })
            .collect())
    }

    async fn export_torrent(&self, hash: &str) -> ClientResult<Vec<u8>> {
        let bytes = self
            .get("export", "torrents/export", &[("hash", hash)])
            .await?
            .bytes()
            .await
            .map_err(transport("export"))?;
        Ok(bytes.to_vec())
    }

    async fn add_torrent(&self, request: AddTorrentRequest) -> ClientResult<()> {
        let file = Part::bytes(request.blob)
            .file_name(format!("{}.torrent", request.hash))
            .mime_str("application/x-bittorrent")
            .map_err(transport("add"))?;

        let flag = |b: bool| if b { "true" } else { "false" };
        let mut form = Form::new()
            .part("torrents", file)
            .text("savepath", request.save_path)
            .text("category", request.category)
            .text("skip_checking", flag(request.skip_checking))
            .text("paused", flag(request.paused))
            .text("stopped", flag(request.paused))
            .text("autoTMM", flag(request.auto_torrent_management));
        if !request.tags.is_empty() {
            form = form.text("tags", request.tags.join(","));
        }
        if let Some(download_path) = request.download_path {
            form = form
                .text("downloadPath", download_path)
                .text("useDownloadPath", "true");
        }

        let response = self
            .http
            .post(self.url("torrents/add"))
            .header(REFERER, &self.base_url)
            .multipart(form)
            .send()
            .await
            .map_err(transport("add"))?;

        if response.status() == StatusCode::CONFLICT {
            return Err(ClientError::Conflict { hash: request.hash });
        }
        let body = self
            .check("add", response)?
            .text()
            .await
            .map_err(transport("add"))?;

        if body.trim() == "Fails." {
            return Err(ClientError::Rejected { operation: "add" });
        }
        Ok(())
    }

    async fn delete_torrents(&self, hashes: &[String], delete_files: bool) -> ClientResult<()> {
        let joined = hashes.join("|");
        let delete_files = if delete_files { "true" } else { "false" };
        self.post(
            "delete",
            "torrents/delete",
            &[("hashes", joined.as_str()), ("deleteFiles", delete_files)],
        )
        .await
    }

    async fn set_category(&self, hash: &str, category: &str) -> ClientResult<()> {
        self.post(
            "set category",
            "torrents/setCategory",
            &[("hashes", hash), ("category", category)],
        )
        .await
    }

    async fn set_save_path(&self, hash: &str, path: &str) -> ClientResult<()> {
        self.post(
            "set save path",
            "torrents/setLocation",
            &[("hashes", hash), ("location", path)],
        )
        .await
    }

    async fn set_download_path(&self, hash: &str, path: &str) -> ClientResult<()> {
        self.post(
            "set download path",
            "torrents/setDownloadPath",
            &[("id", hash), ("path", path)],
        )
        .await
    }

    async fn set_file_priority(&self, hash: &str, indices: &[usize], priority: i64) -> ClientResult<()> {
        let ids = indices
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join("|");
        let priority = priority.to_string();
        self.post(
            "set file priority",
            "torrents/filePrio",
            &[("hash", hash), ("id", ids.as_str()), ("priority", priority.as_str())],
        )
        .await
    }

    async fn pause(&self, hash: &str) -> ClientResult<()> {
        self.post_with_fallback("pause", "torrents/pause", "torrents/stop", &[("hashes", hash)])
            .await
    }

    async fn resume(&self, hash: &str) -> ClientResult<()> {
        self.post_with_fallback("resume", "torrents/resume", "torrents/start", &[("hashes", hash)])
            .await
    }
}

/// Production connector: one fresh authenticated session per call
pub struct QbitConnector {
    timeout: Duration,
}

impl QbitConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Connector for QbitConnector {
    async fn connect(&self, instance: &InstanceConfig) -> ClientResult<Box<dyn TorrentClient>> {
        let client = QbitClient::new(instance, self.timeout)?;
        client.authenticate().await?;
        Ok(Box::new(client))
    }
}
