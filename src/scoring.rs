//! Linear, auditable fusion of the feature vector into a suspicion score.
//!
//! `suspicion = clamp01(base·w_spectral_cut + clipping·w_clipping
//!                      + crackling·w_crackling + snr_deficit·w_snr)`
//!
//! where `base` is a two-level step on the fake-HQ flag and `snr_deficit` is
//! the normalized shortfall below the configured SNR floor.

use crate::analyzer::hash::ContentHash;
use crate::analyzer::FeatureVector;
use crate::config::Weights;

/// Base contribution when the spectral centroid indicates down-sampling.
pub const FAKE_HQ_BASE: f64 = 0.85;
/// Base contribution otherwise.
pub const CLEAN_BASE: f64 = 0.1;

/// Suspicion assigned to inputs whose features cannot be trusted.
pub const DEFECTIVE_SCORE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub content_hash: ContentHash,
    /// In [0, 1]; higher = more suspicious.
    pub suspicion_score: f64,
    /// In [0, 100]; higher = cleaner signal.
    pub quality_score: f64,
    /// Set when the score comes from the defective short-circuit.
    pub defective: bool,
    pub arbitration_text: Option<String>,
}

/// Pure function of the features, the weights and the SNR floor.
pub fn score(features: &FeatureVector, weights: &Weights, snr_min_db: f64) -> ScoreResult {
    if features.status.is_defective() {
        return ScoreResult {
            content_hash: features.content_hash,
            suspicion_score: DEFECTIVE_SCORE,
            quality_score: 0.0,
            defective: true,
            arbitration_text: None,
        };
    }

    let base = if features.fake_hq { FAKE_HQ_BASE } else { CLEAN_BASE };
    let fused = base * weights.spectral_cut
        + unit(features.clipping_ratio) * weights.clipping
        + unit(features.crackling_ratio) * weights.crackling
        + snr_deficit(features.snr_db, snr_min_db) * weights.snr;

    ScoreResult {
        content_hash: features.content_hash,
        suspicion_score: unit(fused),
        quality_score: quality_score(features.clipping_ratio, features.crackling_ratio),
        defective: false,
        arbitration_text: None,
    }
}

/// Shortfall below `floor_db`, normalized to [0, 1] by the floor itself.
pub fn snr_deficit(snr_db: f64, floor_db: f64) -> f64 {
    if floor_db <= 0.0 || snr_db.is_nan() {
        return 0.0;
    }
    unit((floor_db - snr_db) / floor_db)
}

/// `100·(1 − min(5·clipping + 50·crackling, 0.9))`.
pub fn quality_score(clipping_ratio: f64, crackling_ratio: f64) -> f64 {
    let penalty = (clipping_ratio * 5.0 + crackling_ratio * 50.0).min(0.9);
    100.0 * (1.0 - penalty.max(0.0))
}

fn unit(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}
