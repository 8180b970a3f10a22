// src/quality.rs
//! # Quality Fuser
//! Pure, testable logic that reconciles several raw source values for one
//! fact into a single figure plus a quality score. No I/O, safe to call from
//! any context including tests.
//!
//! Scoring policy:
//! - 1 source → base 0.60; 2 sources → 0.80; 3+ → 0.95
//! - sources within 10% of the fused value are concordant
//! - any source beyond 25% deviation flags the fact for manual review
//! - discord is penalized by the worst deviation (capped), floor 0.30
//! - the mean source confidence multiplies the final score

use serde::{Deserialize, Serialize};

const BASE_SCORE_SINGLE: f64 = 0.60;
const BASE_SCORE_DUAL: f64 = 0.80;
const BASE_SCORE_MULTI: f64 = 0.95;

/// Deviation threshold below which sources count as agreeing.
const CONCORDANCE_THRESHOLD: f64 = 0.10;
/// Deviation threshold beyond which a fact needs manual review.
const HIGH_DEVIATION_THRESHOLD: f64 = 0.25;

/// One provider's raw contribution to a fact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceValue {
    pub value: f64,
    pub confidence: f64,
    pub weight: f64,
}

impl SourceValue {
    pub fn new(value: f64) -> Self {
        Self { value, confidence: 1.0, weight: 1.0 }
    }

    pub fn with_confidence(value: f64, confidence: f64) -> Self {
        Self { value, confidence, weight: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.90 {
            QualityTier::Excellent
        } else if score >= 0.75 {
            QualityTier::Good
        } else if score >= 0.60 {
            QualityTier::Fair
        } else {
            QualityTier::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    pub final_value: Option<f64>,
    pub score: f64,
    pub num_sources: usize,
    pub is_concordant: bool,
    pub needs_review: bool,
    /// Relative deviation of each input from the fused value.
    pub deviations: Vec<f64>,
    pub std_deviation_percent: f64,
    pub max_deviation: f64,
    pub tier: QualityTier,
}

impl FusionResult {
    fn empty() -> Self {
        Self {
            final_value: None,
            score: 0.0,
            num_sources: 0,
            is_concordant: false,
            needs_review: true,
            deviations: Vec::new(),
            std_deviation_percent: 0.0,
            max_deviation: 0.0,
            tier: QualityTier::Poor,
        }
    }
}

/// A contribution row for audit persistence alongside the fused value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub data_source_id: u64,
    pub source_value: f64,
    pub confidence: f64,
    pub weight: f64,
    pub is_primary: bool,
    pub deviation_from_final: f64,
}

/// Fuse N raw source values for one fact into a final value + quality score.
pub fn fuse(inputs: &[SourceValue]) -> FusionResult {
    if inputs.is_empty() {
        return FusionResult::empty();
    }

    let num_sources = inputs.len();
    let values: Vec<f64> = inputs.iter().map(|s| s.value).collect();

    // Weighted mean; unweighted fallback when the denominator collapses.
    let denom: f64 = inputs.iter().map(|s| s.weight * s.confidence).sum();
    let final_value = if denom == 0.0 {
        values.iter().sum::<f64>() / num_sources as f64
    } else {
        inputs
            .iter()
            .map(|s| s.value * s.weight * s.confidence)
            .sum::<f64>()
            / denom
    };

    let deviations: Vec<f64> = values
        .iter()
        .map(|v| {
            if final_value == 0.0 {
                0.0
            } else {
                ((v - final_value) / final_value).abs()
            }
        })
        .collect();
    let max_deviation = deviations.iter().cloned().fold(0.0, f64::max);

    let std_dev = if num_sources > 1 {
        let mean = values.iter().sum::<f64>() / num_sources as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (num_sources - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    let std_deviation_percent = if final_value != 0.0 { std_dev / final_value } else { 0.0 };

    let is_concordant = deviations.iter().all(|d| *d <= CONCORDANCE_THRESHOLD);
    let needs_review = deviations.iter().any(|d| *d > HIGH_DEVIATION_THRESHOLD);

    let base_score = match num_sources {
        1 => BASE_SCORE_SINGLE,
        2 => BASE_SCORE_DUAL,
        _ => BASE_SCORE_MULTI,
    };

    let mut score = if is_concordant {
        base_score
    } else {
        (base_score - max_deviation.min(0.30)).max(0.30)
    };

    // Concordant extra sources beyond the third earn a small bonus.
    if num_sources >= 3 && is_concordant {
        score = (score + (num_sources - 3) as f64 * 0.01).min(1.0);
    }

    let avg_confidence = inputs.iter().map(|s| s.confidence).sum::<f64>() / num_sources as f64;
    score *= avg_confidence;

    FusionResult {
        final_value: Some(final_value),
        score,
        num_sources,
        is_concordant,
        needs_review,
        deviations,
        std_deviation_percent,
        max_deviation,
        tier: QualityTier::from_score(score),
    }
}

/// Build contribution rows for the given `(data_source_id, SourceValue)`
/// pairs against an already-computed fusion result. The first source is the
/// primary one.
pub fn contributions(
    sources: &[(u64, SourceValue)],
    result: &FusionResult,
) -> Vec<SourceContribution> {
    let final_value = match result.final_value {
        Some(v) => v,
        None => return Vec::new(),
    };
    sources
        .iter()
        .enumerate()
        .map(|(i, (source_id, sv))| SourceContribution {
            data_source_id: *source_id,
            source_value: sv.value,
            confidence: sv.confidence,
            weight: sv.weight,
            is_primary: i == 0,
            deviation_from_final: if final_value == 0.0 {
                0.0
            } else {
                ((sv.value - final_value) / final_value).abs()
            },
        })
        .collect()
}

/// Human-readable verdict on a set of multi-source data points.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub result: FusionResult,
    pub recommendation: &'static str,
}

/// Convenience wrapper: fuse and attach an operator-facing recommendation.
pub fn validate_multi_source(inputs: &[SourceValue]) -> ValidationSummary {
    let result = fuse(inputs);
    let recommendation = if result.num_sources == 0 {
        "No data available"
    } else if result.needs_review {
        "Manual review recommended - high deviation between sources"
    } else if result.num_sources == 1 {
        "Single source - consider adding more sources for validation"
    } else if result.is_concordant {
        "Data validated by multiple concordant sources"
    } else {
        "Multiple sources with some variance - acceptable quality"
    };
    ValidationSummary { result, recommendation }
}
