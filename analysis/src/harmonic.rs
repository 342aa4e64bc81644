//! Harmonic/percussive decomposition and tonal-centroid features.
//!
//! HPSS separates sustained (harmonic) content from transient (percussive)
//! content by median-filtering the magnitude STFT along time and frequency
//! respectively, then soft-masking and resynthesizing with the original
//! phase (Fitzgerald 2010, the same construction librosa uses). The
//! tonnetz projects the harmonic component's chromagram onto six
//! tonal-centroid coordinates (fifths and minor/major thirds circles).

use ndarray::{Array2, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::chroma::chroma_stft;
use crate::errors::AnalysisResult;
use crate::utils::{hann_window, stft};
use crate::{Feature, N_CHROMA, N_TONNETZ};

const WINDOW_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;
/// Median filter length, in frames (percussive) / bins (harmonic).
const KERNEL_SIZE: usize = 31;
/// Wiener mask exponent.
const MASK_POWER: f64 = 2.0;

/// Split a signal into its harmonic and percussive components.
///
/// Both outputs have the input's length. Signals shorter than one analysis
/// window cannot be decomposed and come back as silence.
#[must_use]
#[allow(clippy::missing_inline_in_public_items)]
pub fn hpss(signal: &[f32]) -> (Vec<f32>, Vec<f32>) {
    if signal.len() < WINDOW_SIZE {
        return (vec![0.; signal.len()], vec![0.; signal.len()]);
    }

    let spectrum = complex_stft(signal, WINDOW_SIZE, HOP_SIZE);
    let magnitude = spectrum.mapv(Complex::norm);

    let harmonic_envelope = median_filter_time(&magnitude, KERNEL_SIZE);
    let percussive_envelope = median_filter_frequency(&magnitude, KERNEL_SIZE);

    let mut harmonic_spectrum = spectrum.clone();
    let mut percussive_spectrum = spectrum;
    for ((h, p), (mut sh, mut sp)) in harmonic_envelope
        .outer_iter()
        .zip(percussive_envelope.outer_iter())
        .zip(
            harmonic_spectrum
                .outer_iter_mut()
                .zip(percussive_spectrum.outer_iter_mut()),
        )
    {
        for (((&h, &p), sh), sp) in h.iter().zip(&p).zip(&mut sh).zip(&mut sp) {
            let h_pow = h.max(1e-10).powf(MASK_POWER);
            let p_pow = p.max(1e-10).powf(MASK_POWER);
            let denominator = h_pow + p_pow;
            let (mask_h, mask_p) = if denominator > 0. {
                (h_pow / denominator, p_pow / denominator)
            } else {
                (0.5, 0.5)
            };
            *sp = *sh * mask_p;
            *sh *= mask_h;
        }
    }

    (
        istft(&harmonic_spectrum, WINDOW_SIZE, HOP_SIZE, signal.len()),
        istft(&percussive_spectrum, WINDOW_SIZE, HOP_SIZE, signal.len()),
    )
}

/// Sum of squared samples.
#[must_use]
#[inline]
pub fn component_energy(component: &[f32]) -> Feature {
    component.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>() as Feature
}

/// Complex STFT of shape `(n_fft / 2 + 1, n_frames)`, uncentered.
fn complex_stft(signal: &[f32], n_fft: usize, hop_length: usize) -> Array2<Complex<f64>> {
    let n_frames = (signal.len() - n_fft) / hop_length + 1;
    let n_bins = n_fft / 2 + 1;
    let window = hann_window(n_fft);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut spectrum = Array2::zeros((n_bins, n_frames));
    let mut buffer = vec![Complex::new(0.0_f64, 0.0); n_fft];
    for frame_idx in 0..n_frames {
        let start = frame_idx * hop_length;
        for (i, (&sample, &weight)) in signal[start..start + n_fft]
            .iter()
            .zip(window.iter())
            .enumerate()
        {
            buffer[i] = Complex::new(f64::from(sample * weight), 0.);
        }
        fft.process(&mut buffer);
        for (bin, value) in buffer[..n_bins].iter().enumerate() {
            spectrum[[bin, frame_idx]] = *value;
        }
    }
    spectrum
}

/// Overlap-add inverse STFT, truncated/padded to `n_samples`.
fn istft(
    spectrum: &Array2<Complex<f64>>,
    n_fft: usize,
    hop_length: usize,
    n_samples: usize,
) -> Vec<f32> {
    let n_bins = spectrum.nrows();
    let window = hann_window(n_fft);

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(n_fft);

    let mut output = vec![0.0_f64; n_samples];
    let mut weight = vec![0.0_f64; n_samples];
    let mut buffer = vec![Complex::new(0.0_f64, 0.0); n_fft];

    for (frame_idx, frame) in spectrum.axis_iter(Axis(1)).enumerate() {
        let start = frame_idx * hop_length;

        for (bin, value) in frame.iter().enumerate() {
            buffer[bin] = *value;
        }
        // conjugate symmetry for a real output signal
        for bin in 1..n_bins - 1 {
            buffer[n_fft - bin] = buffer[bin].conj();
        }

        ifft.process(&mut buffer);

        #[allow(clippy::cast_precision_loss)]
        let scale = 1.0 / n_fft as f64;
        for i in 0..n_fft {
            if start + i >= n_samples {
                break;
            }
            let w = f64::from(window[i]);
            output[start + i] += buffer[i].re * scale * w;
            weight[start + i] += w * w;
        }
    }

    output
        .iter()
        .zip(&weight)
        .map(|(&value, &w)| {
            #[allow(clippy::cast_possible_truncation)]
            if w > 1e-9 {
                (value / w) as f32
            } else {
                value as f32
            }
        })
        .collect()
}

/// Median filter along time (per frequency bin); smooths out transients,
/// leaving the harmonic envelope.
fn median_filter_time(magnitude: &Array2<f64>, kernel_size: usize) -> Array2<f64> {
    let (n_bins, n_frames) = magnitude.dim();
    let half = kernel_size / 2;
    let mut output = Array2::zeros((n_bins, n_frames));

    let mut values = Vec::with_capacity(kernel_size);
    for bin in 0..n_bins {
        for frame in 0..n_frames {
            let start = frame.saturating_sub(half);
            let end = (frame + half + 1).min(n_frames);
            values.clear();
            values.extend((start..end).map(|t| magnitude[[bin, t]]));
            output[[bin, frame]] = median(&mut values);
        }
    }
    output
}

/// Median filter along frequency (per frame); smooths out tonal peaks,
/// leaving the percussive envelope.
fn median_filter_frequency(magnitude: &Array2<f64>, kernel_size: usize) -> Array2<f64> {
    let (n_bins, n_frames) = magnitude.dim();
    let half = kernel_size / 2;
    let mut output = Array2::zeros((n_bins, n_frames));

    let mut values = Vec::with_capacity(kernel_size);
    for frame in 0..n_frames {
        for bin in 0..n_bins {
            let start = bin.saturating_sub(half);
            let end = (bin + half + 1).min(n_bins);
            values.clear();
            values.extend((start..end).map(|b| magnitude[[b, frame]]));
            output[[bin, frame]] = median(&mut values);
        }
    }
    output
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values[values.len() / 2]
}

/// Tonal centroid (tonnetz) of the harmonic component: per-frame mean and
/// std of the six coordinates.
///
/// # Errors
///
/// Returns an error if the chromagram cannot be computed.
#[allow(clippy::missing_inline_in_public_items)]
pub fn tonnetz(
    harmonic: &[f32],
    sample_rate: u32,
) -> AnalysisResult<([Feature; N_TONNETZ], [Feature; N_TONNETZ])> {
    if harmonic.len() < WINDOW_SIZE {
        return Ok(([0.; N_TONNETZ], [0.; N_TONNETZ]));
    }

    let mut spectrum = stft(harmonic, WINDOW_SIZE, HOP_SIZE);
    let mut chroma = chroma_stft(sample_rate, &mut spectrum, WINDOW_SIZE, N_CHROMA, 0.)?;

    // L1-normalize each frame before projecting
    for mut frame in chroma.columns_mut() {
        let sum: f64 = frame.iter().map(|x| x.abs()).sum();
        if sum > f64::MIN_POSITIVE {
            frame /= sum;
        }
    }

    let basis = tonnetz_basis();
    let coordinates = basis.dot(&chroma);

    let (mean, std) = crate::utils::row_stats(&coordinates);
    #[allow(clippy::cast_possible_truncation)]
    Ok((
        std::array::from_fn(|i| mean[i] as Feature),
        std::array::from_fn(|i| std[i] as Feature),
    ))
}

/// The 6 x 12 tonal-centroid basis: sin/cos pairs over the circle of
/// fifths, minor thirds, and major thirds (radii 1, 1, 0.5).
fn tonnetz_basis() -> Array2<f64> {
    let scale = [7. / 6., 7. / 6., 3. / 2., 3. / 2., 2. / 3., 2. / 3.];
    let radius = [1., 1., 1., 1., 0.5, 0.5];

    let mut basis = Array2::zeros((N_TONNETZ, N_CHROMA));
    for (k, (&s, &r)) in scale.iter().zip(&radius).enumerate() {
        for j in 0..N_CHROMA {
            #[allow(clippy::cast_precision_loss)]
            let mut v = s * j as f64;
            // even rows carry the sine of the angle
            if k % 2 == 0 {
                v -= 0.5;
            }
            basis[[k, j]] = r * (std::f64::consts::PI * v).cos();
        }
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SAMPLE_RATE: u32 = 22050;

    fn sine(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2. * PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
            .collect()
    }

    fn clicks(period: usize, n: usize) -> Vec<f32> {
        let mut signal = vec![0.0_f32; n];
        for (i, sample) in signal.iter_mut().enumerate() {
            if i % period < 32 {
                *sample = 1.0;
            }
        }
        signal
    }

    #[test]
    fn test_hpss_preserves_length() {
        let signal = sine(440., 22050);
        let (harmonic, percussive) = hpss(&signal);
        assert_eq!(harmonic.len(), signal.len());
        assert_eq!(percussive.len(), signal.len());
    }

    #[test]
    fn test_hpss_short_input_is_silence() {
        let signal = vec![1.0_f32; 100];
        let (harmonic, percussive) = hpss(&signal);
        assert_eq!(harmonic, vec![0.; 100]);
        assert_eq!(percussive, vec![0.; 100]);
    }

    #[test]
    fn test_hpss_sine_is_mostly_harmonic() {
        let signal = sine(440., 44100);
        let (harmonic, percussive) = hpss(&signal);
        let harmonic_energy = component_energy(&harmonic);
        let percussive_energy = component_energy(&percussive);
        assert!(
            harmonic_energy > percussive_energy * 5.,
            "harmonic {harmonic_energy} vs percussive {percussive_energy}"
        );
    }

    #[test]
    fn test_hpss_clicks_are_mostly_percussive() {
        let signal = clicks(5512, 44100);
        let (harmonic, percussive) = hpss(&signal);
        let harmonic_energy = component_energy(&harmonic);
        let percussive_energy = component_energy(&percussive);
        assert!(
            percussive_energy > harmonic_energy,
            "harmonic {harmonic_energy} vs percussive {percussive_energy}"
        );
    }

    #[test]
    fn test_component_energy() {
        assert_eq!(component_energy(&[]), 0.);
        assert!((component_energy(&[1., -2., 2.]) - 9.).abs() < 1e-6);
    }

    #[test]
    fn test_tonnetz_dimensions_and_bounds() {
        let signal = sine(261.63, 44100);
        let (mean, std) = tonnetz(&signal, SAMPLE_RATE).unwrap();
        assert_eq!(mean.len(), N_TONNETZ);
        // coordinates live on circles of radius <= 1
        assert!(mean.iter().all(|&x| x.abs() <= 1.0 + 1e-6));
        assert!(std.iter().all(|&x| x >= 0.));
    }

    #[test]
    fn test_tonnetz_short_input_is_zero() {
        let (mean, std) = tonnetz(&[0.1; 64], SAMPLE_RATE).unwrap();
        assert_eq!(mean, [0.; N_TONNETZ]);
        assert_eq!(std, [0.; N_TONNETZ]);
    }

    #[test]
    fn test_tonnetz_basis_shape() {
        let basis = tonnetz_basis();
        assert_eq!(basis.shape(), &[6, 12]);
        // fifths rows have unit radius, major-thirds rows half
        assert!(basis.row(0).iter().all(|&x| x.abs() <= 1.));
        assert!(basis.row(4).iter().all(|&x| x.abs() <= 0.5 + 1e-12));
    }
}
