//! Miscellaneous feature extraction module.
//!
//! Loudness-adjacent descriptors that don't fit the spectral categories:
//! frame-wise RMS energy, the dynamic range, and the overall signal energy.

use crate::utils::mean_std;
use crate::Feature;

/**
 * Frame-wise RMS energy descriptor.
 *
 * Tracks how loud each analysis frame is; the fingerprint keeps the mean,
 * the deviation, and the dynamic range (loudest frame minus quietest
 * frame). Unlike a dB loudness measure this stays in linear amplitude,
 * which is what the scorer's energy channel expects.
 */
#[derive(Default, Clone)]
pub struct RmsDesc {
    values: Vec<f64>,
}

/// RMS summary: mean, std, and `max - min` over frames.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RmsStats {
    pub mean: Feature,
    pub std: Feature,
    pub dynamic_range: Feature,
}

impl RmsDesc {
    pub const WINDOW_SIZE: usize = 2048;
    pub const HOP_SIZE: usize = 512;

    /// Record the RMS of one frame.
    #[allow(clippy::cast_precision_loss)]
    #[inline]
    pub fn do_(&mut self, frame: &[f32]) {
        if frame.is_empty() {
            return;
        }
        let mean_square = frame
            .iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
            / frame.len() as f64;
        self.values.push(mean_square.sqrt());
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn get_value(&self) -> RmsStats {
        if self.values.is_empty() {
            return RmsStats::default();
        }
        let (mean, std) = mean_std(&self.values);
        let max = self.values.iter().copied().fold(f64::MIN, f64::max);
        let min = self.values.iter().copied().fold(f64::MAX, f64::min);
        RmsStats {
            mean: mean as Feature,
            std: std as Feature,
            dynamic_range: (max - min) as Feature,
        }
    }
}

/// Overall signal energy, `sum(y^2) / N`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
#[inline]
pub fn signal_energy(signal: &[f32]) -> Feature {
    if signal.is_empty() {
        return 0.;
    }
    (signal
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        / signal.len() as f64) as Feature
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_constant_signal() {
        let mut desc = RmsDesc::default();
        let frame = vec![0.5_f32; RmsDesc::WINDOW_SIZE];
        desc.do_(&frame);
        desc.do_(&frame);

        let stats = desc.get_value();
        assert!((stats.mean - 0.5).abs() < 1e-6);
        assert_eq!(stats.std, 0.);
        assert!(stats.dynamic_range.abs() < 1e-9);
    }

    #[test]
    fn test_rms_dynamic_range() {
        let mut desc = RmsDesc::default();
        desc.do_(&vec![1.0_f32; RmsDesc::WINDOW_SIZE]);
        desc.do_(&vec![0.0_f32; RmsDesc::WINDOW_SIZE]);

        let stats = desc.get_value();
        assert!((stats.dynamic_range - 1.).abs() < 1e-6);
        assert!(stats.std > 0.);
    }

    #[test]
    fn test_rms_empty() {
        let desc = RmsDesc::default();
        assert_eq!(desc.get_value(), RmsStats::default());
    }

    #[test]
    fn test_signal_energy() {
        assert_eq!(signal_energy(&[]), 0.);
        assert!((signal_energy(&[1., 1., 1., 1.]) - 1.).abs() < 1e-9);
        assert!((signal_energy(&[2., 0.]) - 2.).abs() < 1e-9);
    }

    #[test]
    fn test_sine_rms_is_inverse_sqrt_two() {
        use std::f32::consts::PI;
        let frame: Vec<f32> = (0..2048)
            .map(|i| (2. * PI * 100. * i as f32 / 22050.).sin())
            .collect();
        let mut desc = RmsDesc::default();
        desc.do_(&frame);
        let stats = desc.get_value();
        assert!(
            (stats.mean - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.02,
            "{} !~= 0.707",
            stats.mean
        );
    }
}
