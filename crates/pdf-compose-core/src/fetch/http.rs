use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::Fetcher;
use crate::config::FetchConfig;
use crate::error::{Error, Result};

/// Fetches `http(s)://` URLs with reqwest and `file://` URLs from disk.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ConfigInvalid {
                field: "fetch".to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }

    async fn fetch_file(url: &str, path: &str) -> Result<Bytes> {
        let path = PathBuf::from(path);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::fetch(url, e))?;
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Some(path) = url.strip_prefix("file://") {
            debug!("Reading {}", path);
            return Self::fetch_file(url, path).await;
        }

        debug!("Fetching {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::fetch(url, "request timed out")
            } else {
                Error::fetch(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Fetch of {} failed: HTTP {}", url, status);
            return Err(Error::fetch(url, format!("HTTP {status}")));
        }

        response.bytes().await.map_err(|e| Error::fetch(url, e))
    }
}
