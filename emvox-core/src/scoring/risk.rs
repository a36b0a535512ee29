//! Voice/text risk blend over the persisted segment series.

use serde::{Deserialize, Serialize};

use crate::scoring::{round2, round4};
use crate::types::SegmentRecord;

const SAD_ALIASES: [&str; 2] = ["sad", "sadness"];
const ANGRY_ALIASES: [&str; 3] = ["ang", "angry", "anger"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Normal,
    Attention,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Normal => "NORMAL",
            RiskLevel::Attention => "ATTENTION",
            RiskLevel::High => "HIGH",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub p_sad: f64,
    pub p_angry: f64,
    pub var_conf: f64,
    pub text_neg: f64,
}

fn is_alias(emotion: &str, aliases: &[&str]) -> bool {
    let lowered = emotion.to_lowercase();
    aliases.contains(&lowered.as_str())
}

/// Blend the duration-weighted sad/angry shares, the confidence variance
/// and the transcript negativity into a 0..100 score.
///
/// The three voice weights intentionally sum to 0.80; the published formula
/// is preserved as-is so historical scores stay reproducible.
pub fn evaluate(segments: &[SegmentRecord], text_neg: f64) -> RiskAssessment {
    let text_neg = text_neg.clamp(0.0, 1.0);

    let total_ms: f64 = segments
        .iter()
        .map(|s| (s.end_ms - s.start_ms).max(0) as f64)
        .sum();

    let (mut p_sad, mut p_angry) = (0.0_f64, 0.0_f64);
    if total_ms > 0.0 {
        for segment in segments {
            let duration = (segment.end_ms - segment.start_ms).max(0) as f64;
            if is_alias(&segment.emotion, &SAD_ALIASES) {
                p_sad += duration;
            } else if is_alias(&segment.emotion, &ANGRY_ALIASES) {
                p_angry += duration;
            }
        }
        p_sad /= total_ms;
        p_angry /= total_ms;
    }

    let var_conf = if segments.is_empty() {
        0.0
    } else {
        let n = segments.len() as f64;
        let mean = segments.iter().map(|s| s.confidence).sum::<f64>() / n;
        let variance = segments
            .iter()
            .map(|s| (s.confidence - mean).powi(2))
            .sum::<f64>()
            / n;
        variance.clamp(0.0, 1.0)
    };

    let voice_risk = 100.0 * (0.45 * p_sad + 0.25 * p_angry + 0.10 * var_conf);
    let text_risk = 100.0 * text_neg;
    let risk_score = round2((0.6 * voice_risk + 0.4 * text_risk).clamp(0.0, 100.0));

    let risk_level = if risk_score >= 70.0 {
        RiskLevel::High
    } else if risk_score >= 40.0 {
        RiskLevel::Attention
    } else {
        RiskLevel::Normal
    };

    RiskAssessment {
        risk_score,
        risk_level,
        p_sad: round4(p_sad),
        p_angry: round4(p_angry),
        var_conf: round4(var_conf),
        text_neg: round4(text_neg),
    }
}
