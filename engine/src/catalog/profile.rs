//! Mapping fingerprints onto the catalog feature space, and the reduced
//! cross-system similarity used for external candidates.

use serde::{Deserialize, Serialize};

use crate::scorer::tempo_similarity;
use resona_analysis::{Fingerprint, Mode};

/// The feature profile external catalogs speak: all unit-scale except
/// `loudness` (dB) and `tempo` (BPM).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CatalogProfile {
    pub acousticness: f32,
    pub danceability: f32,
    pub energy: f32,
    pub instrumentalness: f32,
    pub liveness: f32,
    pub loudness: f32,
    pub speechiness: f32,
    pub tempo: f32,
    pub valence: f32,
}

impl Default for CatalogProfile {
    /// The neutral profile used when a candidate comes back without
    /// features of its own.
    #[inline]
    fn default() -> Self {
        Self {
            acousticness: 0.5,
            danceability: 0.5,
            energy: 0.5,
            instrumentalness: 0.7,
            liveness: 0.1,
            loudness: -10.,
            speechiness: 0.1,
            tempo: 120.,
            valence: 0.5,
        }
    }
}

impl From<&Fingerprint> for CatalogProfile {
    /// Project a fingerprint onto the catalog space. Only energy, tempo,
    /// mode (via valence) and a danceability guess survive the trip; the
    /// rest are neutral defaults, since the fingerprint does not measure
    /// them directly.
    #[inline]
    fn from(fingerprint: &Fingerprint) -> Self {
        let energy = fingerprint.energy.clamp(0., 1.);
        let valence = match fingerprint.key.mode() {
            Some(Mode::Minor) => 0.3,
            Some(Mode::Major) => 0.7,
            None => 0.5,
        };

        Self {
            energy,
            tempo: fingerprint.tempo.clamp(60., 200.),
            valence,
            danceability: (0.8 * energy).min(1.),
            ..Self::default()
        }
    }
}

/// Reduced similarity between two catalog profiles: the mean of
/// `1 - |q - c|` over the seven unit-scale features plus the same tempo
/// formula the local scorer uses. Loudness is excluded (different scale,
/// and the fingerprint only ever reports the neutral default).
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn profile_similarity(query: &CatalogProfile, candidate: &CatalogProfile) -> f32 {
    let pairs = [
        (query.acousticness, candidate.acousticness),
        (query.danceability, candidate.danceability),
        (query.energy, candidate.energy),
        (query.instrumentalness, candidate.instrumentalness),
        (query.liveness, candidate.liveness),
        (query.speechiness, candidate.speechiness),
        (query.valence, candidate.valence),
    ];

    let mut total = 0.;
    for (q, c) in pairs {
        total += (1. - (q - c).abs()).max(0.);
    }
    total += tempo_similarity(query.tempo, candidate.tempo);

    #[allow(clippy::cast_precision_loss)]
    {
        total / (pairs.len() + 1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use resona_analysis::{Key, PitchClass};

    #[test]
    fn test_profile_from_zero_fingerprint() {
        let profile = CatalogProfile::from(&Fingerprint::zeroed());
        assert_eq!(profile.energy, 0.);
        assert_eq!(profile.tempo, 60.); // clamped up from 0
        assert_eq!(profile.valence, 0.5); // unknown key
        assert_eq!(profile.danceability, 0.);
        assert_eq!(profile.acousticness, 0.5);
        assert_eq!(profile.instrumentalness, 0.7);
    }

    #[test]
    fn test_profile_mapping_clamps() {
        let mut fp = Fingerprint::zeroed();
        fp.energy = 3.5;
        fp.tempo = 240.;
        fp.key = Key::Known {
            pitch_class: PitchClass::E,
            mode: Mode::Minor,
        };

        let profile = CatalogProfile::from(&fp);
        assert_eq!(profile.energy, 1.);
        assert_eq!(profile.tempo, 200.);
        assert_eq!(profile.valence, 0.3);
        assert_eq!(profile.danceability, 0.8);
    }

    #[test]
    fn test_major_key_raises_valence() {
        let mut fp = Fingerprint::zeroed();
        fp.key = Key::Known {
            pitch_class: PitchClass::C,
            mode: Mode::Major,
        };
        assert_eq!(CatalogProfile::from(&fp).valence, 0.7);
    }

    #[test]
    fn test_identical_profiles_score_one() {
        let profile = CatalogProfile::default();
        assert!((profile_similarity(&profile, &profile) - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_profile_similarity_symmetric_and_bounded() {
        let a = CatalogProfile {
            energy: 0.9,
            valence: 0.1,
            tempo: 185.,
            ..CatalogProfile::default()
        };
        let b = CatalogProfile::default();

        let ab = profile_similarity(&a, &b);
        let ba = profile_similarity(&b, &a);
        assert!((ab - ba).abs() < 1e-6);
        assert!((0. ..=1.).contains(&ab));
    }
}
