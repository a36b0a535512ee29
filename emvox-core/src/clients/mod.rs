//! Ports for the two upstream inference services.
//!
//! The emotion (SER) call is required: when it fails the attempt fails and
//! retry policy takes over. The transcription (ASR) call is best-effort:
//! callers degrade to an empty transcript and keep going. Which
//! implementation backs a port is decided once at startup from
//! configuration, never per call.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod fixture;
mod http;

pub use fixture::{FixtureEmotionClient, FixtureTranscriptionClient};
pub use http::{
    EmotionHttpSettings, HttpEmotionClient, HttpTranscriptionClient, TranscriptionHttpSettings,
};

/// Overall emotion plus the time-ordered segment series, as returned by the
/// SER service. Metadata fields are optional; older service builds omit them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionAnalysis {
    pub emotion_code: String,
    pub confidence: f64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<i32>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub segments: Vec<EmotionSegment>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    pub emotion_code: String,
    pub confidence: f64,
}

/// Transcript returned by the ASR service. `language` is normalized to
/// lowercase (`zh`, `en`, ...) before anything downstream sees it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptReport {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

impl TranscriptReport {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            language: None,
            duration_ms: None,
        }
    }
}

#[async_trait]
pub trait EmotionClient: Send + Sync {
    /// Run speech emotion recognition over the audio at `audio_path`.
    async fn analyze(&self, audio_path: &Path, file_name: &str) -> Result<EmotionAnalysis>;

    /// Short-timeout liveness probe.
    async fn health(&self) -> bool;

    /// Ask the service to pre-load its model; falls back to a health probe
    /// on services without a warmup endpoint.
    async fn warmup(&self) -> bool;
}

#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(&self, audio_path: &Path, file_name: &str) -> Result<TranscriptReport>;
}
