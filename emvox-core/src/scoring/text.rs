//! Lexicon-based transcript negativity.

use serde::{Deserialize, Serialize};

/// Negative lexicon. Occurrences are counted per term, non-overlapping.
pub const NEGATIVE_TERMS: [&str; 17] = [
    "难受", "抑郁", "想哭", "崩溃", "压力", "焦虑", "失眠", "绝望", "没意义", "不想活", "烦",
    "恐惧", "害怕", "孤独", "无助", "自责", "内疚",
];

/// Crisis terms. Any hit floors the score at 0.8 regardless of hit count.
pub const HIGH_RISK_TERMS: [&str; 3] = ["不想活", "轻生", "自杀"];

const HITS_AT_FULL_SCORE: f64 = 8.0;
const HIGH_RISK_FLOOR: f64 = 0.8;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNegativity {
    pub text_neg: f64,
    pub hit_count: u32,
    pub hits: Vec<String>,
    pub high_risk_hit: bool,
}

impl TextNegativity {
    pub fn zero() -> Self {
        Self {
            text_neg: 0.0,
            hit_count: 0,
            hits: Vec::new(),
            high_risk_hit: false,
        }
    }
}

/// Score a transcript against the negative lexicon.
pub fn score(transcript: &str) -> TextNegativity {
    let transcript = transcript.trim();
    if transcript.is_empty() {
        return TextNegativity::zero();
    }

    let mut hit_count = 0u32;
    let mut hits = Vec::new();
    for term in NEGATIVE_TERMS {
        let occurrences = transcript.matches(term).count() as u32;
        if occurrences > 0 {
            hit_count += occurrences;
            hits.push(format!("{term}x{occurrences}"));
        }
    }

    let mut text_neg = (f64::from(hit_count) / HITS_AT_FULL_SCORE).clamp(0.0, 1.0);
    let high_risk_hit = HIGH_RISK_TERMS.iter().any(|term| transcript.contains(term));
    if high_risk_hit {
        text_neg = text_neg.max(HIGH_RISK_FLOOR);
    }

    TextNegativity {
        text_neg,
        hit_count,
        hits,
        high_risk_hit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_lexicon_hits() {
        let negativity = score("压力很大，焦虑失眠，真的很无助");

        assert_eq!(negativity.hit_count, 4);
        assert_eq!(negativity.text_neg, 0.5);
        assert!(negativity.hits.contains(&"压力x1".to_string()));
        assert!(!negativity.high_risk_hit);
    }

    #[test]
    fn crisis_terms_floor_the_score() {
        let negativity = score("我有点烦，甚至不想活了");

        assert!(negativity.high_risk_hit);
        assert_eq!(negativity.text_neg, 0.8);
        assert_eq!(negativity.hit_count, 2);
    }

    #[test]
    fn blank_transcript_scores_zero() {
        assert_eq!(score(""), TextNegativity::zero());
        assert_eq!(score("   \n"), TextNegativity::zero());
    }

    #[test]
    fn repeated_terms_count_each_occurrence() {
        let negativity = score("烦烦烦");

        assert_eq!(negativity.hit_count, 3);
        assert_eq!(negativity.hits, vec!["烦x3".to_string()]);
        assert_eq!(negativity.text_neg, 0.375);
    }

    #[test]
    fn many_hits_saturate_at_one() {
        let negativity = score("难受难受难受，崩溃崩溃崩溃，想哭想哭想哭");
        assert_eq!(negativity.hit_count, 9);
        assert_eq!(negativity.text_neg, 1.0);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(score("压力")).unwrap();

        assert_eq!(json["textNeg"], 0.125);
        assert_eq!(json["hitCount"], 1);
        assert_eq!(json["highRiskHit"], false);
        assert!(json["hits"].is_array());
    }
}
