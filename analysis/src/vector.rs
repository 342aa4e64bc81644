//! Flattening a [`Fingerprint`] into the canonical feature vector.
//!
//! The layout is frozen: 20 scalars in a fixed order, then the eight array
//! fields. Any change to the order or lengths is a new schema version and
//! requires a full index rebuild, because standardizer parameters and
//! stored rows are positional.

use crate::{Feature, Fingerprint, N_CHROMA, N_CONTRAST, N_MFCC, N_TONNETZ};

/// Number of scalar features at the head of the vector.
const N_SCALARS: usize = 20;

/// Total feature vector dimension.
pub const FEATURE_DIM: usize =
    N_SCALARS + 2 * (N_MFCC + N_CHROMA + N_CONTRAST + N_TONNETZ);

/// Bumped whenever the vector layout changes.
pub const VECTOR_SCHEMA_VERSION: u32 = 1;

impl Fingerprint {
    /// Flatten into the canonical [`FEATURE_DIM`]-length vector.
    ///
    /// Scalars first (centroid, rolloff, zcr, bandwidth, tempo, onset,
    /// energies, rms, mel, overall energy), then mfcc, chroma, contrast
    /// and tonnetz means/stds. The key is categorical and not part of the
    /// vector.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn to_vector(&self) -> Vec<Feature> {
        let mut features = Vec::with_capacity(FEATURE_DIM);

        features.extend_from_slice(&[
            self.spectral_centroid_mean,
            self.spectral_centroid_std,
            self.spectral_rolloff_mean,
            self.spectral_rolloff_std,
            self.zero_crossing_rate_mean,
            self.zero_crossing_rate_std,
            self.spectral_bandwidth_mean,
            self.spectral_bandwidth_std,
            self.tempo,
            self.onset_strength_mean,
            self.onset_strength_std,
            self.harmonic_energy,
            self.percussive_energy,
            self.harmonic_percussive_ratio,
            self.rms_energy_mean,
            self.rms_energy_std,
            self.dynamic_range,
            self.mel_spectral_mean,
            self.mel_spectral_std,
            self.energy,
        ]);

        features.extend_from_slice(&self.mfcc_mean);
        features.extend_from_slice(&self.mfcc_std);
        features.extend_from_slice(&self.chroma_mean);
        features.extend_from_slice(&self.chroma_std);
        features.extend_from_slice(&self.spectral_contrast_mean);
        features.extend_from_slice(&self.spectral_contrast_std);
        features.extend_from_slice(&self.tonnetz_mean);
        features.extend_from_slice(&self.tonnetz_std);

        debug_assert_eq!(features.len(), FEATURE_DIM);
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dimension_is_96() {
        assert_eq!(FEATURE_DIM, 96);
        assert_eq!(Fingerprint::zeroed().to_vector().len(), FEATURE_DIM);
    }

    #[test]
    fn test_scalar_positions_are_frozen() {
        let fp = Fingerprint {
            spectral_centroid_mean: 1.,
            tempo: 2.,
            energy: 3.,
            ..Fingerprint::zeroed()
        };
        let vector = fp.to_vector();
        assert_eq!(vector[0], 1.);
        assert_eq!(vector[8], 2.);
        assert_eq!(vector[19], 3.);
    }

    #[test]
    fn test_array_positions_are_frozen() {
        let mut fp = Fingerprint::zeroed();
        fp.mfcc_mean[0] = 1.;
        fp.mfcc_std[12] = 2.;
        fp.chroma_mean[0] = 3.;
        fp.chroma_std[11] = 4.;
        fp.spectral_contrast_mean[0] = 5.;
        fp.spectral_contrast_std[6] = 6.;
        fp.tonnetz_mean[0] = 7.;
        fp.tonnetz_std[5] = 8.;

        let vector = fp.to_vector();
        assert_eq!(vector[20], 1.); // mfcc_mean starts after the scalars
        assert_eq!(vector[20 + 13 + 12], 2.); // last mfcc_std entry
        assert_eq!(vector[46], 3.); // chroma_mean
        assert_eq!(vector[46 + 12 + 11], 4.); // last chroma_std entry
        assert_eq!(vector[70], 5.); // spectral_contrast_mean
        assert_eq!(vector[70 + 7 + 6], 6.); // last contrast_std entry
        assert_eq!(vector[84], 7.); // tonnetz_mean
        assert_eq!(vector[95], 8.); // last entry
    }

    #[test]
    fn test_zero_fingerprint_maps_to_zero_vector() {
        assert_eq!(Fingerprint::zeroed().to_vector(), vec![0.; FEATURE_DIM]);
    }
}
