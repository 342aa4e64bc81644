//! Timbral feature extraction module.
//!
//! Contains the descriptors that summarize the shape of the spectrum:
//! spectral centroid, roll-off, bandwidth, per-band contrast, the mel
//! spectrogram statistics, MFCCs, and the zero-crossing rate.
//!
//! All spectral descriptors share one magnitude STFT (see
//! [`crate::Fingerprint::from_samples`]); it would be cleaner conceptually
//! to give each its own object, but that would re-compute the same FFT
//! several times over.

use ndarray::{Array1, Array2};

use crate::Feature;

use super::utils::{
    dct_ii_basis, fft_frequencies, mean_std, mel_filterbank, number_crossings, power_to_db,
    row_stats, AMIN,
};
use crate::{N_CONTRAST, N_MFCC};

/// Analysis frame length shared by every spectral descriptor.
pub const WINDOW_SIZE: usize = 2048;
/// Hop between successive analysis frames.
pub const HOP_SIZE: usize = 512;

/// Fraction of spectral energy below the roll-off frequency.
const ROLLOFF_PERCENT: f64 = 0.85;

/// Summary of a per-frame sequence: mean and population standard deviation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureStats {
    pub mean: Feature,
    pub std: Feature,
}

impl FeatureStats {
    pub(crate) fn of(values: &[f64]) -> Self {
        let (mean, std) = mean_std(values);
        #[allow(clippy::cast_possible_truncation)]
        Self {
            mean: mean as Feature,
            std: std as Feature,
        }
    }
}

/**
 * General object holding the frame-wise spectral shape descriptors.
 *
 * Holds spectral centroid (brightness), roll-off (the frequency below
 * which 85% of the energy lies) and bandwidth (spread around the
 * centroid) together, since all three are cheap projections of the same
 * magnitude spectrum.
 *
 * Values are in Hz; silent frames contribute zeros.
 */
pub struct SpectralDesc {
    freqs: Array1<f64>,
    values_centroid: Vec<f64>,
    values_rolloff: Vec<f64>,
    values_bandwidth: Vec<f64>,
}

impl SpectralDesc {
    #[must_use]
    #[inline]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            freqs: fft_frequencies(sample_rate, WINDOW_SIZE),
            values_centroid: Vec::new(),
            values_rolloff: Vec::new(),
            values_bandwidth: Vec::new(),
        }
    }

    /// Process every frame of a magnitude spectrum of shape
    /// `(WINDOW_SIZE / 2 + 1, n_frames)`.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn do_(&mut self, spectrum: &Array2<f64>) {
        for frame in spectrum.columns() {
            let total: f64 = frame.sum();
            if total <= AMIN {
                self.values_centroid.push(0.);
                self.values_rolloff.push(0.);
                self.values_bandwidth.push(0.);
                continue;
            }

            let centroid = frame
                .iter()
                .zip(&self.freqs)
                .map(|(&m, &f)| m * f)
                .sum::<f64>()
                / total;
            self.values_centroid.push(centroid);

            let threshold = ROLLOFF_PERCENT * total;
            let mut cumulative = 0.;
            let mut rolloff = *self.freqs.last().expect("non-empty fft frequencies");
            for (&m, &f) in frame.iter().zip(&self.freqs) {
                cumulative += m;
                if cumulative >= threshold {
                    rolloff = f;
                    break;
                }
            }
            self.values_rolloff.push(rolloff);

            let spread = frame
                .iter()
                .zip(&self.freqs)
                .map(|(&m, &f)| m * (f - centroid).powi(2))
                .sum::<f64>()
                / total;
            self.values_bandwidth.push(spread.sqrt());
        }
    }

    #[must_use]
    #[inline]
    pub fn get_centroid(&self) -> FeatureStats {
        FeatureStats::of(&self.values_centroid)
    }

    #[must_use]
    #[inline]
    pub fn get_rolloff(&self) -> FeatureStats {
        FeatureStats::of(&self.values_rolloff)
    }

    #[must_use]
    #[inline]
    pub fn get_bandwidth(&self) -> FeatureStats {
        FeatureStats::of(&self.values_bandwidth)
    }
}

/**
 * Spectral contrast descriptor: the dB gap between spectral peaks and
 * valleys in octave-spaced sub-bands.
 *
 * Tonal signals score high (sharp harmonic peaks over quiet valleys),
 * broadband noise scores near zero. Seven sub-bands: below 200 Hz, then
 * six octaves upward.
 */
pub struct ContrastDesc {
    bands: [Vec<usize>; N_CONTRAST],
    values: [Vec<f64>; N_CONTRAST],
}

impl ContrastDesc {
    pub const FMIN: f64 = 200.;
    /// Fraction of each band treated as its peak / valley.
    const QUANTILE: f64 = 0.02;

    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(sample_rate: u32) -> Self {
        let freqs = fft_frequencies(sample_rate, WINDOW_SIZE);
        let mut edges = [0.0; N_CONTRAST + 1];
        for (i, edge) in edges.iter_mut().enumerate().skip(1) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            {
                *edge = Self::FMIN * 2f64.powi(i as i32 - 1);
            }
        }

        let bands = std::array::from_fn(|k| {
            freqs
                .iter()
                .enumerate()
                .filter(|(_, &f)| f >= edges[k] && f <= edges[k + 1])
                .map(|(i, _)| i)
                .collect::<Vec<usize>>()
        });

        Self {
            bands,
            values: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Process every frame of a magnitude spectrum.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn do_(&mut self, spectrum: &Array2<f64>) {
        for frame in spectrum.columns() {
            for (band, values) in self.bands.iter().zip(self.values.iter_mut()) {
                if band.is_empty() {
                    values.push(0.);
                    continue;
                }
                let mut magnitudes: Vec<f64> = band.iter().map(|&i| frame[i]).collect();
                magnitudes
                    .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                #[allow(clippy::cast_precision_loss)]
                let take = ((Self::QUANTILE * magnitudes.len() as f64).round() as usize).max(1);
                let valley = magnitudes[..take].iter().sum::<f64>() / take as f64;
                let peak =
                    magnitudes[magnitudes.len() - take..].iter().sum::<f64>() / take as f64;

                values
                    .push(10. * (peak.max(AMIN).log10() - valley.max(AMIN).log10()));
            }
        }
    }

    /// Per-band mean and std over all processed frames.
    #[must_use]
    #[inline]
    pub fn get_value(&self) -> ([Feature; N_CONTRAST], [Feature; N_CONTRAST]) {
        let stats = self.values.each_ref().map(|v| FeatureStats::of(v));
        (stats.map(|s| s.mean), stats.map(|s| s.std))
    }
}

/**
 * Mel-domain descriptors: the dB mel spectrogram statistics and the
 * mel-frequency cepstral coefficients.
 *
 * MFCCs are the workhorse timbre descriptor; the first coefficients
 * capture the broad spectral envelope (instrumentation, production), which
 * is why the scorer weights them highest.
 */
pub struct MelDesc {
    filterbank: Array2<f64>,
    dct: Array2<f64>,
}

impl MelDesc {
    pub const N_MELS: usize = 128;

    #[must_use]
    #[inline]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            filterbank: mel_filterbank(
                sample_rate,
                WINDOW_SIZE,
                Self::N_MELS,
                0.,
                f64::from(sample_rate) / 2.,
            ),
            dct: dct_ii_basis(N_MFCC, Self::N_MELS),
        }
    }

    /// Project a magnitude spectrum onto the mel filterbank, yielding a
    /// power mel spectrogram of shape `(N_MELS, n_frames)`.
    #[must_use]
    #[inline]
    pub fn mel_power(&self, spectrum: &Array2<f64>) -> Array2<f64> {
        self.filterbank.dot(&spectrum.mapv(|x| x * x))
    }

    /// Log mel spectrogram (dB, clamped to an 80 dB range, not referenced
    /// to the maximum). The MFCC input.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn log_mel(mel_power: &Array2<f64>) -> Array2<f64> {
        let mut db = mel_power.mapv(|x| 10. * x.max(AMIN).log10());
        let max_db = db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        db.mapv_inplace(|x| x.max(max_db - 80.));
        db
    }

    /// Global mean and std of the dB mel spectrogram referenced to its
    /// maximum (so the mean is always <= 0).
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn db_stats(mel_power: &Array2<f64>) -> FeatureStats {
        let db = power_to_db(mel_power);
        let flat: Vec<f64> = db.iter().copied().collect();
        FeatureStats::of(&flat)
    }

    /// Per-coefficient mean and std of the MFCCs over all frames.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn mfcc(&self, mel_power: &Array2<f64>) -> ([Feature; N_MFCC], [Feature; N_MFCC]) {
        let coefficients = self.dct.dot(&Self::log_mel(mel_power));
        let (mean, std) = row_stats(&coefficients);

        #[allow(clippy::cast_possible_truncation)]
        (
            std::array::from_fn(|i| mean[i] as Feature),
            std::array::from_fn(|i| std[i] as Feature),
        )
    }
}

/**
 * [Zero-crossing rate](https://en.wikipedia.org/wiki/Zero-crossing_rate)
 * detection object.
 *
 * Mostly a noisiness proxy: percussive and noisy material crosses zero
 * often, sustained tonal material rarely. Computed frame-wise so the
 * fingerprint keeps both the average and how much it fluctuates.
 *
 * The per-frame value range is between 0 and 1.
 */
#[derive(Default, Clone)]
pub struct ZeroCrossingRateDesc {
    rates: Vec<f64>,
}

impl ZeroCrossingRateDesc {
    pub const WINDOW_SIZE: usize = WINDOW_SIZE;
    pub const HOP_SIZE: usize = HOP_SIZE;

    /// Record the crossing rate for one frame.
    #[allow(clippy::cast_precision_loss)]
    #[inline]
    pub fn do_(&mut self, frame: &[f32]) {
        if frame.is_empty() {
            return;
        }
        self.rates
            .push(f64::from(number_crossings(frame)) / frame.len() as f64);
    }

    #[must_use]
    #[inline]
    pub fn get_value(&self) -> FeatureStats {
        FeatureStats::of(&self.rates)
    }
}
