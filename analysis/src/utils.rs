//! Shared DSP building blocks: STFT, mel filterbank, dB conversion, and
//! small statistics helpers used by the descriptor modules.

use log::warn;
use ndarray::{arr1, s, Array, Array1, Array2, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;

/// Pad a signal on both sides by reflecting it around its endpoints,
/// the way librosa centers its frames.
#[must_use]
#[inline]
pub fn reflect_pad(array: &[f32], pad: usize) -> Vec<f32> {
    debug_assert!(pad < array.len(), "Padding is too large");
    let prefix = array[1..=pad].iter().rev().copied().collect::<Vec<f32>>();
    let suffix = array[(array.len() - 2) - pad + 1..array.len() - 1]
        .iter()
        .rev()
        .copied()
        .collect::<Vec<f32>>();
    let mut output = Vec::with_capacity(prefix.len() + array.len() + suffix.len());

    output.extend(prefix);
    output.extend(array);
    output.extend(suffix);
    output
}

/// Periodic Hann window of the given length.
#[must_use]
#[allow(clippy::cast_precision_loss)]
#[inline]
pub fn hann_window(window_length: usize) -> Array1<f32> {
    let mut window = Array::zeros(window_length);
    for n in 0..window_length {
        window[[n]] =
            0.5f32.mul_add(-f32::cos(2. * n as f32 * PI / (window_length as f32)), 0.5);
    }
    window
}

/// Compute the magnitude STFT of a signal, centered via reflection padding.
///
/// Returns an array of shape `(window_length / 2 + 1, ceil(len / hop))`,
/// frequency bins along rows, frames along columns.
#[must_use]
#[allow(clippy::missing_panics_doc)]
#[allow(clippy::missing_inline_in_public_items)]
pub fn stft(signal: &[f32], window_length: usize, hop_length: usize) -> Array2<f64> {
    debug_assert!(window_length % 2 == 0, "Window length must be even");
    debug_assert!(window_length < signal.len(), "Signal is too short");
    debug_assert!(hop_length < window_length, "Hop length is too large");
    // Take advantage of row-major order to have a contiguous window for the
    // `assign`, reversing the axes to have the expected shape at the end only.
    let mut stft = Array2::zeros((signal.len().div_ceil(hop_length), window_length / 2 + 1));
    let signal = reflect_pad(signal, window_length / 2);

    let hann_window = hann_window(window_length);
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(window_length);

    for (window, mut stft_col) in signal
        .windows(window_length)
        .step_by(hop_length)
        .zip(stft.rows_mut())
    {
        let mut signal = (arr1(window) * &hann_window).mapv(|x| Complex::new(x, 0.));
        if let Some(s) = signal.as_slice_mut() {
            fft.process(s);
        } else {
            warn!("non-contiguous slice found for stft; expect slow performances.");
            fft.process(&mut signal.to_vec());
        }

        stft_col.assign(
            &signal
                .slice(s![..=window_length / 2])
                .mapv(|x| f64::from(x.re.hypot(x.im))),
        );
    }
    stft.permuted_axes((1, 0))
}

/// Center frequency of every FFT bin for the given parameters.
#[must_use]
#[inline]
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Array1<f64> {
    Array::linspace(0., f64::from(sample_rate) / 2., 1 + n_fft / 2)
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean<T: Clone + Into<f32>>(input: &[T]) -> f32 {
    if input.is_empty() {
        return 0.;
    }
    input.iter().map(|x| x.clone().into()).sum::<f32>() / input.len() as f32
}

/// Mean and population standard deviation of a sequence.
///
/// The std is the population one (ddof = 0), so it is always >= 0 and is 0
/// for constant input.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean_std(input: &[f64]) -> (f64, f64) {
    if input.is_empty() {
        return (0., 0.);
    }
    let mean = input.iter().sum::<f64>() / input.len() as f64;
    let variance = input.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / input.len() as f64;
    (mean, variance.sqrt())
}

/// Per-row mean and population standard deviation of a matrix.
pub(crate) fn row_stats(matrix: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let mean = matrix
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(matrix.nrows()));
    let std = matrix.std_axis(Axis(1), 0.);
    (mean, std)
}

// Essentia algorithm
// https://github.com/MTG/essentia/blob/master/src/algorithms/temporal/zerocrossingrate.cpp
pub(crate) fn number_crossings(input: &[f32]) -> u32 {
    if input.is_empty() {
        return 0;
    }

    let mut crossings = 0;

    let mut was_positive = input[0] > 0.;

    for &sample in input {
        let is_positive = sample > 0.;
        if was_positive != is_positive {
            crossings += 1;
            was_positive = is_positive;
        }
    }

    crossings
}

fn hz_to_mel(freq: f64) -> f64 {
    2595.0 * (1.0 + freq / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank of shape `(n_mels, n_fft / 2 + 1)`.
///
/// Filters are equally spaced on the mel scale between `fmin` and `fmax`
/// and area-normalized so each integrates to roughly the same energy.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f64,
    fmax: f64,
) -> Array2<f64> {
    let n_bins = 1 + n_fft / 2;
    let fft_freqs = fft_frequencies(sample_rate, n_fft);

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let mel_points = Array::linspace(mel_min, mel_max, n_mels + 2);
    let hz_points = mel_points.mapv(mel_to_hz);

    let mut weights = Array2::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let (lower, center, upper) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        // area normalization, keeps the filterbank roughly energy-preserving
        let norm = 2.0 / (upper - lower);
        for (bin, &freq) in fft_freqs.iter().enumerate() {
            let weight = if freq <= lower || freq >= upper {
                0.0
            } else if freq <= center {
                (freq - lower) / (center - lower)
            } else {
                (upper - freq) / (upper - center)
            };
            weights[[m, bin]] = weight * norm;
        }
    }
    weights
}

pub(crate) const AMIN: f64 = 1e-10;
const TOP_DB: f64 = 80.0;

/// Convert a power spectrogram to decibels relative to its own maximum,
/// clamped to a dynamic range of 80 dB.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn power_to_db(power: &Array2<f64>) -> Array2<f64> {
    let reference = power.iter().copied().fold(AMIN, f64::max);
    let ref_db = 10.0 * reference.log10();
    let mut db = power.mapv(|x| 10.0 * x.max(AMIN).log10() - ref_db);
    let max_db = db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    db.mapv_inplace(|x| x.max(max_db - TOP_DB));
    db
}

/// Orthonormal DCT-II basis of shape `(n_out, n_in)`, the transform librosa
/// applies to the log-mel spectrum to obtain MFCCs.
#[must_use]
#[allow(clippy::cast_precision_loss)]
#[allow(clippy::missing_inline_in_public_items)]
pub fn dct_ii_basis(n_out: usize, n_in: usize) -> Array2<f64> {
    let mut basis = Array2::zeros((n_out, n_in));
    let n = n_in as f64;
    for k in 0..n_out {
        let scale = if k == 0 {
            (1.0 / n).sqrt()
        } else {
            (2.0 / n).sqrt()
        };
        for i in 0..n_in {
            basis[[k, i]] =
                scale * (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos();
        }
    }
    basis
}

pub(crate) fn hz_to_octs_inplace(
    frequencies: &mut Array1<f64>,
    tuning: f64,
    bins_per_octave: u32,
) -> &mut Array1<f64> {
    let a440 = 440.0 * (tuning / f64::from(bins_per_octave)).exp2();

    *frequencies /= a440 / 16.;
    frequencies.mapv_inplace(f64::log2);
    frequencies
}
