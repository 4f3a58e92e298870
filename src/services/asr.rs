//! ASR service adapter (spec §6.2), modeled on the Anthropic HTTP client:
//! a `reqwest::Client` field plus a config struct, JSON request/response
//! types, and `.context()`-wrapped error propagation.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::model::TranscriptWord;

#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub base_url: String,
    pub language: String,
    pub model: Option<String>,
    pub beam_size: Option<u32>,
    pub device: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8123".to_string(),
            language: "en".to_string(),
            model: None,
            beam_size: None,
            device: None,
            timeout: Duration::from_secs(120),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Serialize)]
struct TranscribeRequest<'a> {
    audio_path: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(rename = "beamSize", skip_serializing_if = "Option::is_none")]
    beam_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct TranscribeResponse {
    pub text: String,
    pub words: Vec<TranscriptWord>,
    #[serde(rename = "durationSec")]
    pub duration_sec: f64,
    #[serde(rename = "toolVersions")]
    pub tool_versions: std::collections::BTreeMap<String, String>,
    #[serde(rename = "generatedAt")]
    pub generated_at: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct VersionResponse {
    pub service: String,
    pub version: String,
}

#[derive(Clone)]
pub struct AsrClient {
    client: Client,
    config: AsrConfig,
}

impl AsrClient {
    pub fn new(config: AsrConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build ASR HTTP client")?;
        Ok(Self { client, config })
    }

    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/v1/health", self.config.base_url);
        let resp: HealthResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("ASR health check request failed")?
            .json()
            .await
            .context("ASR health check returned unparseable body")?;
        Ok(resp.status == "ok")
    }

    pub async fn version(&self) -> Result<VersionResponse> {
        let url = format!("{}/v1/version", self.config.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .context("ASR version request failed")?
            .json()
            .await
            .context("ASR version response unparseable")
    }

    /// Transcribe one chunk, retrying retryable (5xx/network) failures with
    /// capped exponential backoff up to `config.max_retries` (spec §4.5/§7).
    pub async fn transcribe(&self, audio_path: &str) -> Result<TranscribeResponse> {
        let url = format!("{}/v1/transcribe", self.config.base_url);
        let body = TranscribeRequest {
            audio_path,
            language: &self.config.language,
            model: self.config.model.as_deref(),
            beam_size: self.config.beam_size,
            device: self.config.device.as_deref(),
        };

        let mut attempt = 0;
        loop {
            let result = self.client.post(&url).json(&body).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp.json().await.context("ASR transcribe response unparseable");
                }
                Ok(resp) if resp.status().is_server_error() && attempt < self.config.max_retries => {
                    attempt += 1;
                    backoff_sleep(attempt).await;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    anyhow::bail!("ASR transcribe failed ({status}) for {audio_path}: {body}");
                }
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    backoff_sleep(attempt).await;
                    let _ = e;
                }
                Err(e) => return Err(e).context(format!("ASR transcribe request failed for {audio_path}")),
            }
        }
    }
}

async fn backoff_sleep(attempt: u32) {
    let millis = 250u64.saturating_mul(1u64 << attempt.min(6));
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
