//! Deterministic local implementations for dev and test deployments.
//!
//! Output is a pure function of the audio file's byte length, so repeated
//! runs over the same recording always produce the same analysis.

use std::path::Path;

use async_trait::async_trait;

use crate::clients::{
    EmotionAnalysis, EmotionClient, EmotionSegment, TranscriptReport, TranscriptionClient,
};
use crate::error::Result;

const PALETTE: [(&str, f64); 4] = [
    ("neutral", 0.82),
    ("happy", 0.74),
    ("sad", 0.61),
    ("angry", 0.58),
];

const TRANSCRIPTS: [&str; 3] = [
    "今天状态还可以，下午出去散了会儿步。",
    "最近压力很大，晚上总是失眠。",
    "项目进展顺利，心情还不错。",
];

// Roughly 16 kHz mono 16-bit.
const BYTES_PER_MS: u64 = 32;

#[derive(Clone, Debug)]
pub struct FixtureEmotionClient {
    segment_ms: i64,
}

impl FixtureEmotionClient {
    pub fn new(segment_ms: i64) -> Self {
        Self { segment_ms }
    }
}

impl Default for FixtureEmotionClient {
    fn default() -> Self {
        Self::new(8_000)
    }
}

#[async_trait]
impl EmotionClient for FixtureEmotionClient {
    async fn analyze(&self, audio_path: &Path, _file_name: &str) -> Result<EmotionAnalysis> {
        let len = tokio::fs::metadata(audio_path).await?.len();
        let count = 2 + (len % 4) as usize;

        let mut segments = Vec::with_capacity(count);
        for i in 0..count {
            let (emotion_code, confidence) = PALETTE[(len as usize + i) % PALETTE.len()];
            segments.push(EmotionSegment {
                start_ms: i as i64 * self.segment_ms,
                end_ms: (i as i64 + 1) * self.segment_ms,
                emotion_code: emotion_code.to_string(),
                confidence,
            });
        }

        // Overall = most frequent segment emotion, first seen wins ties.
        let mut tally: Vec<(String, usize, f64)> = Vec::new();
        for segment in &segments {
            match tally
                .iter_mut()
                .find(|(code, _, _)| code == &segment.emotion_code)
            {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 += segment.confidence;
                }
                None => tally.push((segment.emotion_code.clone(), 1, segment.confidence)),
            }
        }
        let mut overall = ("neutral".to_string(), 0usize, 0.0_f64);
        for entry in tally {
            if entry.1 > overall.1 {
                overall = entry;
            }
        }
        let (emotion_code, occurrences, confidence_sum) = overall;

        Ok(EmotionAnalysis {
            emotion_code,
            confidence: confidence_sum / occurrences.max(1) as f64,
            model: Some("fixture-ser".to_string()),
            sample_rate: Some(16_000),
            duration_ms: Some(count as i64 * self.segment_ms),
            segments,
        })
    }

    async fn health(&self) -> bool {
        true
    }

    async fn warmup(&self) -> bool {
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FixtureTranscriptionClient;

#[async_trait]
impl TranscriptionClient for FixtureTranscriptionClient {
    async fn transcribe(&self, audio_path: &Path, _file_name: &str) -> Result<TranscriptReport> {
        let len = tokio::fs::metadata(audio_path).await?.len();
        let text = TRANSCRIPTS[(len % TRANSCRIPTS.len() as u64) as usize];
        Ok(TranscriptReport {
            text: text.to_string(),
            language: Some("zh".to_string()),
            duration_ms: Some((len / BYTES_PER_MS).max(1_000) as i64),
        })
    }
}
