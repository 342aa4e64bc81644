//! Multi-channel similarity scoring between two fingerprints.
//!
//! The index's cosine similarity is the authoritative ranking; these
//! per-channel scores ride along so a result can be explained ("same key,
//! similar timbre, tempo off by a third"). Weights are fixed: timbre
//! dominates because MFCCs capture instrumentation and production, chroma
//! covers harmonic content, tempo is a rhythmic guard, and energy and key
//! act as tie-breakers with soft penalties for missing data.

use serde::{Deserialize, Serialize};

use resona_analysis::{Feature, Fingerprint};

const WEIGHT_MFCC: f32 = 0.30;
const WEIGHT_CHROMA: f32 = 0.25;
const WEIGHT_TEMPO: f32 = 0.20;
const WEIGHT_ENERGY: f32 = 0.15;
const WEIGHT_KEY: f32 = 0.10;

/// Per-channel similarity in [0, 1], plus the weighted overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelScores {
    pub mfcc: f32,
    pub chroma: f32,
    pub tempo: f32,
    pub energy: f32,
    pub key: f32,
    pub overall: f32,
}

/// Score a candidate fingerprint against a query fingerprint.
///
/// Symmetric: `score(a, b) == score(b, a)`.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn score(query: &Fingerprint, candidate: &Fingerprint) -> ChannelScores {
    let mfcc = cosine_similarity(&query.mfcc_mean, &candidate.mfcc_mean).max(0.);
    let chroma = cosine_similarity(&query.chroma_mean, &candidate.chroma_mean).max(0.);
    let tempo = tempo_similarity(query.tempo, candidate.tempo);

    // neutral prior when either side has no energy measurement
    let energy = if query.energy > 0. && candidate.energy > 0. {
        query.energy.min(candidate.energy) / query.energy.max(candidate.energy)
    } else {
        0.5
    };

    let key = if query.key.is_known() && candidate.key.is_known() {
        if query.key == candidate.key {
            1.0
        } else {
            0.3
        }
    } else {
        0.5
    };

    let overall = WEIGHT_MFCC.mul_add(
        mfcc,
        WEIGHT_CHROMA.mul_add(
            chroma,
            WEIGHT_TEMPO.mul_add(tempo, WEIGHT_ENERGY.mul_add(energy, WEIGHT_KEY * key)),
        ),
    );

    ChannelScores {
        mfcc,
        chroma,
        tempo,
        energy,
        key,
        overall,
    }
}

/// `1 - |a - b| / max(a, b, 1)`, clamped at 0. A tempo of 0 means
/// "undetermined", and no rhythmic evidence scores 0.
#[must_use]
#[inline]
pub fn tempo_similarity(query: f32, candidate: f32) -> f32 {
    if query <= 0. || candidate <= 0. {
        return 0.;
    }
    let difference = (query - candidate).abs() / query.max(candidate).max(1.);
    (1. - difference).max(0.)
}

/// Cosine similarity of two equal-length vectors; 0 when either has no
/// magnitude (a zero vector is similar to nothing).
fn cosine_similarity(a: &[Feature], b: &[Feature]) -> f32 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    let denominator = (norm_a * norm_b).sqrt();
    if denominator <= 0. {
        return 0.;
    }
    #[allow(clippy::cast_possible_truncation)]
    {
        (dot / denominator) as f32
    }
}
