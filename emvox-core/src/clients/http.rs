//! HTTP implementations of the inference ports.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use tracing::{debug, warn};

use crate::clients::{EmotionAnalysis, EmotionClient, TranscriptReport, TranscriptionClient};
use crate::error::{ClientError, EmvoxError, Result};

const SER_SERVICE: &str = "ser";
const ASR_SERVICE: &str = "asr";

#[derive(Clone, Debug)]
pub struct EmotionHttpSettings {
    pub base_url: String,
    pub segment_ms: i64,
    pub overlap_ms: i64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub health_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct TranscriptionHttpSettings {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct HttpEmotionClient {
    http: reqwest::Client,
    base_url: String,
    segment_ms: i64,
    overlap_ms: i64,
    read_timeout: Duration,
    health_timeout: Duration,
}

impl HttpEmotionClient {
    pub fn new(settings: EmotionHttpSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()
            .map_err(|e| EmvoxError::Internal(format!("ser http client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            segment_ms: settings.segment_ms,
            overlap_ms: settings.overlap_ms,
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
            health_timeout: Duration::from_millis(settings.health_timeout_ms),
        })
    }

    async fn probe(&self, path: &str) -> bool {
        let url = format!("{}{path}", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "ser probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl EmotionClient for HttpEmotionClient {
    async fn analyze(&self, audio_path: &Path, file_name: &str) -> Result<EmotionAnalysis> {
        let bytes = tokio::fs::read(audio_path).await?;
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new()
            .part("file", part)
            .text("segment_ms", self.segment_ms.to_string())
            .text("overlap_ms", self.overlap_ms.to_string());

        let response = self
            .http
            .post(format!("{}/ser/analyze", self.base_url))
            .multipart(form)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(SER_SERVICE, e))?
            .error_for_status()
            .map_err(|e| ClientError::from_reqwest(SER_SERVICE, e))?;

        let analysis = response
            .json::<EmotionAnalysis>()
            .await
            .map_err(|e| ClientError::from_reqwest(SER_SERVICE, e))?;
        Ok(analysis)
    }

    async fn health(&self) -> bool {
        self.probe("/health").await
    }

    async fn warmup(&self) -> bool {
        if self.probe("/warmup").await {
            return true;
        }
        warn!("ser warmup endpoint unavailable, falling back to health probe");
        self.probe("/health").await
    }
}

#[derive(Clone, Debug)]
pub struct HttpTranscriptionClient {
    http: reqwest::Client,
    base_url: String,
    read_timeout: Duration,
}

impl HttpTranscriptionClient {
    pub fn new(settings: TranscriptionHttpSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()
            .map_err(|e| EmvoxError::Internal(format!("asr http client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
        })
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn transcribe(&self, audio_path: &Path, file_name: &str) -> Result<TranscriptReport> {
        let bytes = tokio::fs::read(audio_path).await?;
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/asr/transcribe", self.base_url))
            .multipart(form)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(|e| ClientError::from_reqwest(ASR_SERVICE, e))?
            .error_for_status()
            .map_err(|e| ClientError::from_reqwest(ASR_SERVICE, e))?;

        let mut report = response
            .json::<TranscriptReport>()
            .await
            .map_err(|e| ClientError::from_reqwest(ASR_SERVICE, e))?;
        if let Some(language) = report.language.take() {
            report.language = Some(language.to_lowercase());
        }
        Ok(report)
    }
}
