//! Forced-alignment service adapter (spec §6.3).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::model::Fragment;

#[derive(Debug, Clone)]
pub struct AlignerConfig {
    pub base_url: String,
    pub language: String,
    pub timeout_sec: f64,
    pub max_retries: u32,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8124".to_string(),
            language: "en".to_string(),
            timeout_sec: 120.0,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Serialize)]
struct AlignChunkRequest<'a> {
    chunk_id: &'a str,
    audio_path: &'a str,
    lines: &'a [String],
    language: &'a str,
    timeout_sec: f64,
}

#[derive(Debug, Deserialize)]
pub struct ToolInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlignChunkResponse {
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default, rename = "windowId")]
    pub window_id: Option<String>,
    pub fragments: Vec<Fragment>,
    pub tool: ToolInfo,
    pub generated_at: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Clone)]
pub struct AlignerClient {
    client: Client,
    config: AlignerConfig,
}

impl AlignerClient {
    pub fn new(config: AlignerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(config.timeout_sec))
            .build()
            .context("failed to build aligner HTTP client")?;
        Ok(Self { client, config })
    }

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/v1/health", self.config.base_url);
        let resp: HealthResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("aligner health check request failed")?
            .json()
            .await
            .context("aligner health check returned unparseable body")?;
        Ok(resp.status == "ok")
    }

    /// Align one window's lines against its audio slice, retrying
    /// retryable failures with capped exponential backoff (spec §4.8/§7).
    /// Caller normalizes `audio_path` (Windows↔POSIX) before this call;
    /// path mapping is the caller's responsibility per spec §6.3.
    pub async fn align_chunk(
        &self,
        window_id: &str,
        audio_path: &str,
        lines: &[String],
    ) -> Result<AlignChunkResponse> {
        let url = format!("{}/v1/align-chunk", self.config.base_url);
        let body = AlignChunkRequest {
            chunk_id: window_id,
            audio_path,
            lines,
            language: &self.config.language,
            timeout_sec: self.config.timeout_sec,
        };

        let mut attempt = 0;
        loop {
            let result = self.client.post(&url).json(&body).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json().await.context("aligner response unparseable");
                }
                Ok(resp) if resp.status().is_server_error() && attempt < self.config.max_retries => {
                    attempt += 1;
                    backoff_sleep(attempt).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    anyhow::bail!("aligner align-chunk failed ({status}) for window {window_id}: {body}");
                }
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    backoff_sleep(attempt).await;
                    let _ = e;
                }
                Err(e) => {
                    return Err(e).context(format!("aligner request failed for window {window_id}"))
                }
            }
        }
    }
}

async fn backoff_sleep(attempt: u32) {
    let millis = 250u64.saturating_mul(1u64 << attempt.min(6));
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
