use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::Config;
use crate::error::{FetchError, FetchResult};

/// Remote keyed-lookup API.
///
/// Paths are relative to the API root, e.g. `item/8863` or `user/pg`.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetch a structured resource (`<path>.json`).
    async fn get_json(&self, path: &str) -> FetchResult<serde_json::Value>;

    /// Fetch an arbitrary resource body as bytes.
    async fn get_bytes(&self, path: &str) -> FetchResult<Vec<u8>>;
}

pub struct HackerNewsClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HackerNewsClient {
    pub fn new(config: &Config) -> FetchResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("hn_thread_loader/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get(&self, url: &str) -> FetchResult<reqwest::Response> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        response.error_for_status().map_err(|e| self.classify(e))
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl ItemSource for HackerNewsClient {
    async fn get_json(&self, path: &str) -> FetchResult<serde_json::Value> {
        let url = format!("{}.json", self.url(path));
        let response = self.get(&url).await?;
        response.json().await.map_err(|e| self.classify(e))
    }

    async fn get_bytes(&self, path: &str) -> FetchResult<Vec<u8>> {
        let response = self.get(&self.url(path)).await?;
        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok(body.to_vec())
    }
}
