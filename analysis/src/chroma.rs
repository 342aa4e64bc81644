//! Chroma feature extraction module.
//!
//! Contains functions to compute the chromagram of a track (a 12-bin
//! pitch-class energy profile per frame) and, from a higher-resolution
//! chromagram, estimate the track's key and mode (minor / major) via
//! Krumhansl-Schmuckler profile correlation.

use crate::{Feature, Key, Mode, PitchClass, N_CHROMA};

use super::errors::{AnalysisError, AnalysisResult};
use super::utils::{fft_frequencies, hz_to_octs_inplace, row_stats, stft};
use ndarray::{s, Array, Array1, Array2, Axis};
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::QuantileExt;
use noisy_float::prelude::*;

/**
 * General object holding the chromagram of a track.
 *
 * Accumulates per-frame pitch-class profiles; the fingerprint keeps the
 * per-bin mean and standard deviation. Contrary to the other descriptors,
 * this one performs better if the full track is passed at once, because the
 * tuning estimate improves with more frames.
 */
#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct ChromaDesc {
    sample_rate: u32,
    values_chroma: Array2<f64>,
}

impl ChromaDesc {
    pub const WINDOW_SIZE: usize = 2048;
    pub const HOP_SIZE: usize = 512;

    #[must_use]
    #[inline]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            values_chroma: Array2::zeros((N_CHROMA, 0)),
        }
    }

    /// Compute and store the chromagram of a signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the chroma filterbank cannot be constructed.
    #[inline]
    pub fn do_(&mut self, signal: &[f32]) -> AnalysisResult<()> {
        let mut stft = stft(signal, Self::WINDOW_SIZE, Self::HOP_SIZE);
        let tuning = estimate_tuning(self.sample_rate, &stft, Self::WINDOW_SIZE, 0.01, 12)?;
        let chroma = chroma_stft(
            self.sample_rate,
            &mut stft,
            Self::WINDOW_SIZE,
            N_CHROMA,
            tuning,
        )?;
        self.values_chroma = ndarray::concatenate![Axis(1), self.values_chroma, chroma];
        Ok(())
    }

    /// Per-bin mean and standard deviation over all frames, bin 0 = C.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn get_value(&self) -> ([Feature; N_CHROMA], [Feature; N_CHROMA]) {
        let (mean, std) = row_stats(&self.values_chroma);
        #[allow(clippy::cast_possible_truncation)]
        (
            std::array::from_fn(|i| mean[i] as Feature),
            std::array::from_fn(|i| std[i] as Feature),
        )
    }
}

// The chroma filterbank and tuning estimation below follow librosa's
// chroma_stft pipeline (https://github.com/librosa/librosa), computed on
// the fly; building the filter takes very little time compared to the STFT.

/// Chroma filterbank of shape `(n_chroma, n_fft / 2 + 1)`, row 0 = C.
///
/// # Errors
///
/// Returns an error if the filter matrix cannot be reshaped.
#[allow(clippy::missing_panics_doc, clippy::module_name_repetitions)]
#[allow(clippy::missing_inline_in_public_items)]
pub fn chroma_filter(
    sample_rate: u32,
    n_fft: usize,
    n_chroma: usize,
    tuning: f64,
) -> AnalysisResult<Array2<f64>> {
    let ctroct = 5.0;
    let octwidth = 2.;
    #[allow(clippy::cast_precision_loss)]
    let n_chroma_float = n_chroma as f64;
    let n_chroma2 = (n_chroma_float / 2.0).round();

    let frequencies = Array::linspace(0., f64::from(sample_rate), n_fft + 1);

    let mut freq_bins = frequencies;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    hz_to_octs_inplace(&mut freq_bins, tuning, n_chroma as u32);
    freq_bins.mapv_inplace(|x| x * n_chroma_float);
    freq_bins[0] = 1.5f64.mul_add(-n_chroma_float, freq_bins[1]);

    let mut binwidth_bins = Array::ones(freq_bins.raw_dim());
    binwidth_bins.slice_mut(s![0..freq_bins.len() - 1]).assign(
        &(&freq_bins.slice(s![1..]) - &freq_bins.slice(s![..-1])).mapv(|x| x.max(1.)),
    );

    let mut d: Array2<f64> = Array::zeros((n_chroma, freq_bins.len()));
    for (idx, mut row) in d.rows_mut().into_iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        row.fill(idx as f64);
    }
    d = -d + &freq_bins;

    d.mapv_inplace(|x| 10f64.mul_add(n_chroma_float, x + n_chroma2) % n_chroma_float - n_chroma2);
    d = d / binwidth_bins;
    d.mapv_inplace(|x| (-0.5 * (2. * x) * (2. * x)).exp());

    let mut wts = d;
    // Normalize by computing the l2-norm over the columns
    for mut col in wts.columns_mut() {
        let mut sum = col.mapv(|x| x * x).sum().sqrt();
        if sum < f64::MIN_POSITIVE {
            sum = 1.;
        }
        col /= sum;
    }

    freq_bins.mapv_inplace(|x| (-0.5 * ((x / n_chroma_float - ctroct) / octwidth).powi(2)).exp());

    wts *= &freq_bins;

    // roll the rows so that row 0 is C instead of A (np.roll(wts, -3))
    let mut rolled = Array2::zeros(wts.raw_dim());
    rolled.slice_mut(s![-3.., ..]).assign(&wts.slice(s![..3, ..]));
    rolled.slice_mut(s![..-3, ..]).assign(&wts.slice(s![3.., ..]));

    let non_aliased = 1 + n_fft / 2;
    Ok(rolled.slice_move(s![.., ..non_aliased]))
}

/// Pick spectral peaks with parabolic interpolation, librosa's `piptrack`.
///
/// Returns interpolated `(pitches, magnitudes)` for every local maximum
/// above 10% of its frame's peak, within 150 Hz..4 kHz.
#[must_use]
#[allow(clippy::missing_panics_doc)]
#[allow(clippy::missing_inline_in_public_items)]
pub fn pip_track(sample_rate: u32, spectrum: &Array2<f64>, n_fft: usize) -> (Vec<f64>, Vec<f64>) {
    let sample_rate_float = f64::from(sample_rate);
    let fmin = 150.0_f64;
    let fmax = 4000.0_f64.min(sample_rate_float / 2.0);
    let threshold = 0.1;

    let fft_freqs = fft_frequencies(sample_rate, n_fft);

    let mut pitches = Vec::new();
    let mut mags = Vec::new();

    for frame in spectrum.columns() {
        let frame_max = frame.iter().copied().fold(0.0_f64, f64::max);
        if frame_max <= 0. {
            continue;
        }
        let ref_value = threshold * frame_max;

        for i in 1..frame.len() - 1 {
            if fft_freqs[i] < fmin || fft_freqs[i] >= fmax {
                continue;
            }
            let (before, elem, after) = (frame[i - 1], frame[i], frame[i + 1]);
            if elem > ref_value && before < elem && after <= elem {
                let avg = 0.5 * (after - before);
                let mut shift = 2f64.mul_add(elem, -after) - before;
                if shift.abs() < f64::MIN_POSITIVE {
                    shift += 1.;
                }
                let shift = avg / shift;
                #[allow(clippy::cast_precision_loss)]
                pitches.push((i as f64 + shift) * sample_rate_float / n_fft as f64);
                mags.push((0.5 * avg).mul_add(shift, elem));
            }
        }
    }

    (pitches, mags)
}

/// Estimate how far the track's tuning deviates from A440, as a fraction
/// of a chroma bin, from a histogram of interpolated pitch deviations.
///
/// Only use this with strictly positive `frequencies`.
///
/// # Errors
///
/// Returns an error if the histogram is degenerate.
#[allow(clippy::missing_panics_doc)]
#[inline]
pub fn pitch_tuning(
    frequencies: &mut Array1<f64>,
    resolution: f64,
    bins_per_octave: u32,
) -> AnalysisResult<f64> {
    if frequencies.is_empty() {
        return Ok(0.0);
    }
    hz_to_octs_inplace(frequencies, 0.0, 12);
    frequencies.mapv_inplace(|x| f64::from(bins_per_octave) * x % 1.0);

    // Put everything between -0.5 and 0.5.
    frequencies.mapv_inplace(|x| if x >= 0.5 { x - 1. } else { x });

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let indexes = ((frequencies.to_owned() - -0.5) / resolution).mapv(|x| x as usize);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut counts: Array1<usize> = Array::zeros((1.0 / resolution) as usize);
    let len = counts.len();
    for &idx in &indexes {
        counts[idx.min(len - 1)] += 1;
    }
    let max_index = counts
        .argmax()
        .map_err(|e| AnalysisError::AnalysisError(format!("in chroma: {e}")))?;

    // Return the bin with the most reoccurring deviation.
    #[allow(clippy::cast_precision_loss)]
    Ok(resolution.mul_add(max_index as f64, -0.5))
}

/// Estimate the tuning of a whole spectrum: pip-track the frames, discard
/// quiet peaks (below the median magnitude), histogram the deviations.
///
/// # Errors
///
/// Returns an error if the magnitude quantile cannot be computed.
#[allow(clippy::missing_panics_doc)]
#[inline]
pub fn estimate_tuning(
    sample_rate: u32,
    spectrum: &Array2<f64>,
    n_fft: usize,
    resolution: f64,
    bins_per_octave: u32,
) -> AnalysisResult<f64> {
    let (pitch, mag) = pip_track(sample_rate, spectrum, n_fft);

    let (filtered_pitch, filtered_mag): (Vec<N64>, Vec<N64>) = pitch
        .iter()
        .zip(&mag)
        .filter(|(&p, _)| p > 0.)
        .map(|(x, y)| (n64(*x), n64(*y)))
        .unzip();

    if filtered_pitch.is_empty() {
        return Ok(0.);
    }

    let threshold: N64 = Array::from(filtered_mag.clone())
        .quantile_axis_mut(Axis(0), n64(0.5), &Midpoint)
        .map_err(|e| AnalysisError::AnalysisError(format!("in chroma: {e}")))?
        .into_scalar();
    let mut pitch = filtered_pitch
        .iter()
        .zip(&filtered_mag)
        .filter_map(|(&p, &m)| if m >= threshold { Some(p.into()) } else { None })
        .collect::<Array1<f64>>();
    pitch_tuning(&mut pitch, resolution, bins_per_octave)
}

/// Project a magnitude spectrum onto the chroma filterbank and normalize
/// each frame by its maximum.
///
/// # Errors
///
/// Returns an error if the chroma filterbank cannot be constructed.
#[allow(clippy::module_name_repetitions)]
#[inline]
pub fn chroma_stft(
    sample_rate: u32,
    spectrum: &mut Array2<f64>,
    n_fft: usize,
    n_chroma: usize,
    tuning: f64,
) -> AnalysisResult<Array2<f64>> {
    spectrum.mapv_inplace(|x| x * x);
    let filter = chroma_filter(sample_rate, n_fft, n_chroma, tuning)?;

    let mut chroma = filter.dot(spectrum);
    for mut frame in chroma.columns_mut() {
        let mut max = frame.iter().copied().fold(0.0_f64, f64::max);
        if max < f64::MIN_POSITIVE {
            max = 1.;
        }
        frame /= max;
    }
    Ok(chroma)
}

// Krumhansl-Schmuckler key profiles.
const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Window used for the key chromagram. The longer window trades time
/// resolution (irrelevant here, the chroma is averaged over the whole
/// track) for the frequency resolution a constant-Q analysis would give.
pub const KEY_WINDOW_SIZE: usize = 8192;
/// Hop of the key chromagram, 100 ms at 22 050 Hz.
pub const KEY_HOP_SIZE: usize = 2205;

/// Estimate the musical key of a signal from a high-resolution chromagram.
///
/// # Errors
///
/// Returns an error if the chromagram cannot be computed; degenerate
/// chroma content yields `Ok(Key::Unknown)` instead.
#[allow(clippy::missing_inline_in_public_items)]
pub fn estimate_key(signal: &[f32], sample_rate: u32) -> AnalysisResult<Key> {
    let mut stft = stft(signal, KEY_WINDOW_SIZE, KEY_HOP_SIZE);
    let tuning = estimate_tuning(sample_rate, &stft, KEY_WINDOW_SIZE, 0.01, 12)?;
    let chroma = chroma_stft(sample_rate, &mut stft, KEY_WINDOW_SIZE, N_CHROMA, tuning)?;
    Ok(key_from_chroma(&chroma))
}

/// Correlate the time-averaged chroma with every rotation of the major and
/// minor profiles; the best correlation labels the key.
///
/// Major is checked first at each pitch class, and minor may overwrite it
/// only by strictly exceeding the best correlation so far.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn key_from_chroma(chroma: &Array2<f64>) -> Key {
    let Some(chroma_mean) = chroma.mean_axis(Axis(1)) else {
        return Key::Unknown;
    };
    let total: f64 = chroma_mean.sum();
    if !total.is_finite() || total <= 0. {
        return Key::Unknown;
    }
    let chroma_mean = chroma_mean.mapv(|x| x / total);

    let mut best_correlation = f64::NEG_INFINITY;
    let mut estimated = Key::Unknown;

    for pitch_class in 0..N_CHROMA {
        for (profile, mode) in [(MAJOR_PROFILE, Mode::Major), (MINOR_PROFILE, Mode::Minor)] {
            let mut rotated = profile.to_vec();
            rotated.rotate_right(pitch_class);

            let correlation = pearson(chroma_mean.as_slice().unwrap_or(&[]), &rotated);
            if correlation.is_finite() && correlation > best_correlation {
                best_correlation = correlation;
                estimated = Key::Known {
                    pitch_class: PitchClass::from_index(pitch_class),
                    mode,
                };
            }
        }
    }

    estimated
}

/// Pearson correlation; NaN when either side has zero variance.
fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::NAN;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut covariance = 0.;
    let mut variance_a = 0.;
    let mut variance_b = 0.;
    for (&x, &y) in a.iter().zip(b) {
        covariance += (x - mean_a) * (y - mean_b);
        variance_a += (x - mean_a).powi(2);
        variance_b += (y - mean_b).powi(2);
    }

    covariance / (variance_a * variance_b).sqrt()
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::arr2;
    use std::f32::consts::PI;

    const SAMPLE_RATE: u32 = 22050;

    fn tone_mix(freqs: &[f32], seconds: f32) -> Vec<f32> {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let n = (seconds * SAMPLE_RATE as f32) as usize;
        (0..n)
            .map(|i| {
                freqs
                    .iter()
                    .map(|f| (2. * PI * f * i as f32 / SAMPLE_RATE as f32).sin())
                    .sum::<f32>()
                    / freqs.len() as f32
            })
            .collect()
    }

    #[test]
    fn test_chroma_desc_shape_and_bounds() {
        // C4
        let signal = tone_mix(&[261.63], 2.);
        let mut desc = ChromaDesc::new(SAMPLE_RATE);
        desc.do_(&signal).unwrap();
        let (mean, std) = desc.get_value();

        assert!(mean.iter().all(|&x| (0. ..=1.).contains(&x)));
        assert!(std.iter().all(|&x| x >= 0.));
        // bin 0 is C; it should dominate
        let max_bin = mean
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(max_bin, 0, "chroma {mean:?}");
    }

    #[test]
    fn test_estimate_key_c_major_triad() {
        // C4, E4, G4
        let signal = tone_mix(&[261.63, 329.63, 392.00], 2.);
        let key = estimate_key(&signal, SAMPLE_RATE).unwrap();
        assert_eq!(key.to_string(), "C major");
    }

    #[test]
    fn test_estimate_key_a_minor_profile() {
        // feed the A-rotated minor profile directly as a chromagram
        let mut rotated = MINOR_PROFILE.to_vec();
        rotated.rotate_right(9);
        let chroma =
            Array2::from_shape_vec((12, 1), rotated).unwrap();
        let key = key_from_chroma(&chroma);
        assert_eq!(key.to_string(), "A minor");
    }

    #[test]
    fn test_key_from_zero_chroma_is_unknown() {
        let chroma = Array2::zeros((12, 8));
        assert_eq!(key_from_chroma(&chroma), Key::Unknown);
    }

    #[test]
    fn test_key_from_uniform_chroma_is_unknown() {
        // zero variance on the chroma side makes every correlation NaN
        let chroma = Array2::from_elem((12, 4), 0.25);
        assert_eq!(key_from_chroma(&chroma), Key::Unknown);
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1., 2., 3.], &[2., 4., 6.]) - 1.).abs() < 1e-12);
        assert!((pearson(&[1., 2., 3.], &[6., 4., 2.]) + 1.).abs() < 1e-12);
        assert!(pearson(&[1., 1., 1.], &[1., 2., 3.]).is_nan());
    }

    #[test]
    fn test_pitch_tuning_no_frequencies() {
        let mut frequencies = ndarray::arr1(&[]);
        assert_eq!(0.0, pitch_tuning(&mut frequencies, 0.05, 12).unwrap());
    }

    #[test]
    fn test_estimate_tuning_empty_spectrum() {
        assert!(
            0. == estimate_tuning(22050, &Array2::zeros((4097, 1)), 8192, 0.01, 12).unwrap()
        );
    }

    #[test]
    fn test_chroma_filter_rows_sum_positive() {
        let filter = chroma_filter(22050, 2048, 12, 0.).unwrap();
        assert_eq!(filter.shape(), &[12, 1025]);
        for (i, row) in filter.rows().into_iter().enumerate() {
            assert!(row.sum() > 0., "chroma filter row {i} is empty");
        }
    }

    #[test]
    fn test_chroma_stft_frames_normalized() {
        let signal = tone_mix(&[440.], 1.);
        let mut spectrum = stft(&signal, 2048, 512);
        let chroma = chroma_stft(SAMPLE_RATE, &mut spectrum, 2048, 12, 0.).unwrap();
        for frame in chroma.columns() {
            let max = frame.iter().copied().fold(0.0_f64, f64::max);
            assert!(max <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_key_rotation_names() {
        // G major profile rotated to G (pitch class 7)
        let mut rotated = MAJOR_PROFILE.to_vec();
        rotated.rotate_right(7);
        let chroma = arr2(&[[0.0_f64; 1]; 12])
            .into_shape_with_order((12, 1))
            .unwrap();
        let mut chroma = chroma;
        for (i, &v) in rotated.iter().enumerate() {
            chroma[[i, 0]] = v;
        }
        assert_eq!(key_from_chroma(&chroma).to_string(), "G major");
    }
}
