//! HTTP client shared by the installer, status probes and network monitor.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::WarpError;

const TIMEOUT_SECS: u64 = 30;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 1000;

/// Largest body accepted by [`Fetcher::download`] (100 MB)
const MAX_DOWNLOAD_SIZE: usize = 100 * 1024 * 1024;

/// Delay before retry number `attempt` (1-based): 1s, 2s, 4s...
pub fn retry_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(RETRY_DELAY_MS * (1 << (attempt - 1)))
}

/// HTTP client with a fixed user agent and timeout
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("warp-nextdns/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Download a binary artifact, retrying with exponential backoff.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        info!("Downloading {}...", url);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt);
                debug!("Retry {} after {:?} for {}", attempt, delay, url);
                tokio::time::sleep(delay).await;
            }

            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    if let Some(len) = response.content_length() {
                        if len as usize > MAX_DOWNLOAD_SIZE {
                            anyhow::bail!("Download too large: {} bytes", len);
                        }
                    }
                    let bytes = match response.bytes().await {
                        Ok(b) => b,
                        Err(e) => {
                            debug!("Body of {} interrupted: {}", url, e);
                            last_error =
                                Some(anyhow::Error::new(e).context("Failed to read response body"));
                            continue;
                        }
                    };
                    if bytes.len() > MAX_DOWNLOAD_SIZE {
                        anyhow::bail!("Download too large: {} bytes", bytes.len());
                    }
                    debug!("Downloaded {} bytes from {}", bytes.len(), url);
                    return Ok(bytes.to_vec());
                }
                Ok(response) => {
                    last_error = Some(anyhow::anyhow!("HTTP {} for {}", response.status(), url));
                }
                Err(e) => {
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| WarpError::Connection(url.to_string()).into())
            .context(format!("Download failed after {} attempts", MAX_RETRIES)))
    }

    /// Single GET returning the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        if !response.status().is_success() {
            return Err(WarpError::Connection(format!("HTTP {} for {}", response.status(), url)).into());
        }
        response.text().await.context("Failed to read response body")
    }

    /// Single GET decoding a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        if !response.status().is_success() {
            return Err(WarpError::Connection(format!("HTTP {} for {}", response.status(), url)).into());
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("Invalid JSON from {}", url))
    }

    /// True when `url` answers with a 2xx status.
    pub async fn is_reachable(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("{} unreachable: {}", url, e);
                false
            }
        }
    }
}
