//! Temporal feature extraction module.
//!
//! Contains the onset-strength envelope and the tempo estimate derived
//! from it.

use ndarray::Array2;

use crate::timbral::FeatureStats;
use crate::Feature;

/**
 * Rhythm descriptor built on the onset-strength envelope.
 *
 * The envelope is the per-frame positive spectral flux of the dB mel
 * spectrogram (how much louder each band got since the previous frame,
 * averaged over bands); its mean and deviation summarize how much
 * rhythmic activity a track has.
 *
 * Tempo is the lag that maximizes the envelope's autocorrelation over the
 * 30..300 BPM range, biased toward 120 BPM with a log-normal weight so
 * octave errors (60 vs 120 vs 240) resolve toward common tempos. A flat
 * envelope yields 0 BPM, meaning "undetermined".
 */
pub struct OnsetDesc {
    envelope: Vec<f64>,
    /// Analysis frames per second.
    frame_rate: f64,
}

impl OnsetDesc {
    const MIN_BPM: f64 = 30.;
    const MAX_BPM: f64 = 300.;
    /// Center of the log-normal tempo prior.
    const START_BPM: f64 = 120.;

    /// Build the onset envelope from a dB mel spectrogram of shape
    /// `(n_mels, n_frames)`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(mel_db: &Array2<f64>, sample_rate: u32, hop_length: usize) -> Self {
        let n_frames = mel_db.ncols();
        let n_mels = mel_db.nrows();
        let mut envelope = vec![0.; n_frames];

        for t in 1..n_frames {
            let mut flux = 0.;
            for m in 0..n_mels {
                flux += (mel_db[[m, t]] - mel_db[[m, t - 1]]).max(0.);
            }
            envelope[t] = flux / n_mels as f64;
        }

        Self {
            envelope,
            frame_rate: f64::from(sample_rate) / hop_length as f64,
        }
    }

    /// Mean and std of the onset envelope.
    #[must_use]
    #[inline]
    pub fn get_strength(&self) -> FeatureStats {
        FeatureStats::of(&self.envelope)
    }

    /// Estimated tempo in BPM; 0 when no periodicity is found.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    #[allow(clippy::cast_sign_loss)]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn get_tempo(&self) -> Feature {
        let n = self.envelope.len();
        if n < 4 {
            return 0.;
        }

        let mean = self.envelope.iter().sum::<f64>() / n as f64;
        let centered: Vec<f64> = self.envelope.iter().map(|x| x - mean).collect();
        if centered.iter().all(|x| x.abs() < 1e-9) {
            return 0.;
        }

        let lag_min = ((60. * self.frame_rate / Self::MAX_BPM).ceil() as usize).max(1);
        let lag_max = ((60. * self.frame_rate / Self::MIN_BPM).floor() as usize).min(n - 1);
        if lag_min > lag_max {
            return 0.;
        }

        let mut best_score = 0.;
        let mut best_bpm = 0.;
        for lag in lag_min..=lag_max {
            let autocorrelation: f64 = centered[..n - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum();
            if autocorrelation <= 0. {
                continue;
            }

            let bpm = 60. * self.frame_rate / lag as f64;
            let octaves = (bpm / Self::START_BPM).log2();
            let weight = (-0.5 * octaves * octaves).exp();

            let score = autocorrelation * weight;
            if score > best_score {
                best_score = score;
                best_bpm = bpm;
            }
        }

        best_bpm as Feature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timbral::{MelDesc, HOP_SIZE, WINDOW_SIZE};
    use crate::utils::stft;

    const SAMPLE_RATE: u32 = 22050;

    /// A click every `period_secs`, `seconds` long.
    fn click_track(period_secs: f32, seconds: f32) -> Vec<f32> {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let n = (seconds * SAMPLE_RATE as f32) as usize;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let period = (period_secs * SAMPLE_RATE as f32) as usize;
        let mut signal = vec![0.0_f32; n];
        for (i, sample) in signal.iter_mut().enumerate() {
            if i % period < 64 {
                *sample = 1.0;
            }
        }
        signal
    }

    fn onset_desc_of(signal: &[f32]) -> OnsetDesc {
        let spectrum = stft(signal, WINDOW_SIZE, HOP_SIZE);
        let mel = MelDesc::new(SAMPLE_RATE);
        let mel_db = MelDesc::log_mel(&mel.mel_power(&spectrum));
        OnsetDesc::new(&mel_db, SAMPLE_RATE, HOP_SIZE)
    }

    #[test]
    fn test_tempo_of_click_track() {
        // two clicks per second = 120 BPM
        let desc = onset_desc_of(&click_track(0.5, 10.));
        let tempo = desc.get_tempo();
        assert!(
            (100. ..=140.).contains(&tempo),
            "tempo {tempo} not near 120 BPM"
        );
    }

    #[test]
    fn test_tempo_of_slower_click_track() {
        // one click per second = 60 BPM; the prior may fold it to 120
        let desc = onset_desc_of(&click_track(1.0, 10.));
        let tempo = desc.get_tempo();
        assert!(
            (50. ..=70.).contains(&tempo) || (110. ..=130.).contains(&tempo),
            "tempo {tempo} not near 60 or 120 BPM"
        );
    }

    #[test]
    fn test_tempo_of_silence_is_undetermined() {
        let desc = onset_desc_of(&vec![0.0_f32; SAMPLE_RATE as usize * 4]);
        assert_eq!(desc.get_tempo(), 0.);
    }

    #[test]
    fn test_onset_strength_is_nonnegative() {
        let desc = onset_desc_of(&click_track(0.5, 4.));
        let strength = desc.get_strength();
        assert!(strength.mean > 0.);
        assert!(strength.std >= 0.);

        let silent = onset_desc_of(&vec![0.0_f32; SAMPLE_RATE as usize * 2]);
        assert_eq!(silent.get_strength().mean, 0.);
    }
}
