//! This library turns audio files into compact acoustic fingerprints.
//!
//! A [`Fingerprint`] bundles timbral (MFCC, spectral shape), harmonic
//! (chroma, tonnetz), rhythmic (tempo, onset strength), dynamic (RMS,
//! energy) and tonal (key) descriptors of a track. Fingerprints are
//! immutable once constructed, flatten into a fixed-length feature vector
//! (see [`vector`]) for nearest-neighbor indexing, and survive
//! serialization unchanged.
//!
//! Use a [`decoder::Decoder`] to turn files into [`ResampledAudio`] (mono,
//! 22 050 Hz), then [`Fingerprint::extract`] to analyze it.

pub mod chroma;
pub mod decoder;
pub mod errors;
pub mod harmonic;
pub mod misc;
pub mod temporal;
pub mod timbral;
pub mod utils;
pub mod vector;

use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};

use chroma::ChromaDesc;
use errors::{AnalysisError, AnalysisResult};
use misc::{signal_energy, RmsDesc, RmsStats};
use temporal::OnsetDesc;
use timbral::{ContrastDesc, FeatureStats, MelDesc, SpectralDesc, ZeroCrossingRateDesc};

pub use vector::{FEATURE_DIM, VECTOR_SCHEMA_VERSION};

/// The sampling rate used for the analysis.
pub const SAMPLE_RATE: u32 = 22050;
/// Hop between analysis frames, in samples.
pub const HOP_LENGTH: usize = 512;
/// Number of MFCC coefficients kept per frame.
pub const N_MFCC: usize = 13;
/// Number of pitch classes in a chromagram.
pub const N_CHROMA: usize = 12;
/// Number of spectral contrast sub-bands.
pub const N_CONTRAST: usize = 7;
/// Number of tonal centroid coordinates.
pub const N_TONNETZ: usize = 6;

/// Epsilon guarding the harmonic/percussive ratio against division by zero.
pub const HPR_EPSILON: f32 = 1e-10;

/// The type of individual features.
pub type Feature = f32;

/// The resampled audio data used for analysis.
///
/// Must be in mono (1 channel), with a sample rate of 22050 Hz.
#[derive(Debug, Clone)]
pub struct ResampledAudio {
    pub path: PathBuf,
    pub samples: Vec<f32>,
}

/// The twelve pitch classes, C through B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    const NAMES: [&'static str; N_CHROMA] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];

    /// Pitch class for a chroma bin index (0 = C).
    ///
    /// # Panics
    ///
    /// Panics if `index >= 12`.
    #[must_use]
    #[inline]
    pub fn from_index(index: usize) -> Self {
        [
            Self::C,
            Self::CSharp,
            Self::D,
            Self::DSharp,
            Self::E,
            Self::F,
            Self::FSharp,
            Self::G,
            Self::GSharp,
            Self::A,
            Self::ASharp,
            Self::B,
        ][index]
    }

    #[must_use]
    #[inline]
    pub fn name(self) -> &'static str {
        Self::NAMES[self as usize]
    }
}

impl std::fmt::Display for PitchClass {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Major or minor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Major,
    Minor,
}

impl std::fmt::Display for Mode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Major => "major",
            Self::Minor => "minor",
        })
    }
}

/// A track's estimated musical key: one of the 24 `(pitch class, mode)`
/// pairs, or `Unknown` when estimation failed or was ambiguous.
///
/// Serialized as its display string (`"C# minor"`, `"Unknown"`) so the
/// persisted form matches what users see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Key {
    Known {
        pitch_class: PitchClass,
        mode: Mode,
    },
    #[default]
    Unknown,
}

impl Key {
    #[must_use]
    #[inline]
    pub const fn is_known(self) -> bool {
        matches!(self, Self::Known { .. })
    }

    #[must_use]
    #[inline]
    pub const fn mode(self) -> Option<Mode> {
        match self {
            Self::Known { mode, .. } => Some(mode),
            Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for Key {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known { pitch_class, mode } => write!(f, "{pitch_class} {mode}"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

impl From<Key> for String {
    #[inline]
    fn from(key: Key) -> Self {
        key.to_string()
    }
}

impl From<String> for Key {
    #[inline]
    fn from(s: String) -> Self {
        let mut parts = s.split_whitespace();
        let (Some(pitch), Some(mode)) = (parts.next(), parts.next()) else {
            return Self::Unknown;
        };
        let Some(index) = PitchClass::NAMES.iter().position(|&name| name == pitch) else {
            return Self::Unknown;
        };
        let mode = match mode {
            "major" => Mode::Major,
            "minor" => Mode::Minor,
            _ => return Self::Unknown,
        };
        Self::Known {
            pitch_class: PitchClass::from_index(index),
            mode,
        }
    }
}

/// Object holding the results of a track's analysis.
///
/// Every field is always present; a failed extraction produces the
/// all-zero fingerprint (see [`Fingerprint::extract`]) rather than a
/// partial one. Array fields have fixed, documented lengths, and every
/// `*_std` field is a population standard deviation, hence >= 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Per-coefficient mean of the MFCCs across frames.
    pub mfcc_mean: [Feature; N_MFCC],
    /// Per-coefficient std of the MFCCs across frames.
    pub mfcc_std: [Feature; N_MFCC],
    /// Per-pitch-class mean of the chromagram, bin 0 = C.
    pub chroma_mean: [Feature; N_CHROMA],
    /// Per-pitch-class std of the chromagram.
    pub chroma_std: [Feature; N_CHROMA],
    /// Brightness.
    pub spectral_centroid_mean: Feature,
    pub spectral_centroid_std: Feature,
    /// Frequency below which 85% of the spectral energy lies.
    pub spectral_rolloff_mean: Feature,
    pub spectral_rolloff_std: Feature,
    /// Spread of the spectrum around its centroid.
    pub spectral_bandwidth_mean: Feature,
    pub spectral_bandwidth_std: Feature,
    /// Noisiness proxy.
    pub zero_crossing_rate_mean: Feature,
    pub zero_crossing_rate_std: Feature,
    /// Peak-valley dB contrast per octave sub-band.
    pub spectral_contrast_mean: [Feature; N_CONTRAST],
    pub spectral_contrast_std: [Feature; N_CONTRAST],
    /// Tonal centroid coordinates of the harmonic component.
    pub tonnetz_mean: [Feature; N_TONNETZ],
    pub tonnetz_std: [Feature; N_TONNETZ],
    /// Estimated beats per minute; 0 means undetermined.
    pub tempo: Feature,
    /// Rhythmic activity.
    pub onset_strength_mean: Feature,
    pub onset_strength_std: Feature,
    /// Sum of squares of the harmonic component.
    pub harmonic_energy: Feature,
    /// Sum of squares of the percussive component.
    pub percussive_energy: Feature,
    /// `harmonic / (percussive + 1e-10)`.
    pub harmonic_percussive_ratio: Feature,
    /// Loudness.
    pub rms_energy_mean: Feature,
    pub rms_energy_std: Feature,
    /// Loudest frame minus quietest frame (RMS).
    pub dynamic_range: Feature,
    /// Global statistics of the dB mel spectrogram (referenced to max).
    pub mel_spectral_mean: Feature,
    pub mel_spectral_std: Feature,
    /// Estimated musical key.
    pub key: Key,
    /// Overall energy, `sum(y^2) / N`.
    pub energy: Feature,
}

/// The outcome of [`Fingerprint::extract`]: always a usable fingerprint,
/// with a diagnostic when analysis degraded to the zero fingerprint.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub fingerprint: Fingerprint,
    /// `Some(reason)` when extraction failed and the fingerprint is the
    /// all-zero one.
    pub diagnostic: Option<String>,
}

struct TimbralBundle {
    centroid: FeatureStats,
    rolloff: FeatureStats,
    bandwidth: FeatureStats,
    contrast_mean: [Feature; N_CONTRAST],
    contrast_std: [Feature; N_CONTRAST],
    mel_db: FeatureStats,
    mfcc_mean: [Feature; N_MFCC],
    mfcc_std: [Feature; N_MFCC],
    onset: FeatureStats,
    tempo: Feature,
    zcr: FeatureStats,
    rms: RmsStats,
}

struct HarmonicBundle {
    harmonic_energy: Feature,
    percussive_energy: Feature,
    tonnetz_mean: [Feature; N_TONNETZ],
    tonnetz_std: [Feature; N_TONNETZ],
}

impl Fingerprint {
    /// The all-zero fingerprint with an unknown key; the degraded output
    /// of a failed extraction. Still valid input to vectorization and
    /// search.
    #[must_use]
    #[inline]
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Analyze resampled audio into a fingerprint. Deterministic given
    /// its input.
    ///
    /// This is meant to be run within a rayon thread pool; the analysis
    /// branches are computed in parallel.
    ///
    /// # Errors
    ///
    /// Returns an error if the samples are shorter than the largest
    /// analysis window (one second of audio is always enough), or if a
    /// descriptor fails. Callers that want the degradation policy instead
    /// should use [`Fingerprint::extract`].
    #[allow(clippy::missing_panics_doc)]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn from_samples(audio: &ResampledAudio) -> AnalysisResult<Self> {
        let largest_window = chroma::KEY_WINDOW_SIZE
            .max(timbral::WINDOW_SIZE)
            .max(ChromaDesc::WINDOW_SIZE);

        if audio.samples.len() < largest_window {
            return Err(AnalysisError::EmptySamples);
        }
        let samples = &audio.samples;

        // jobs are split so that each branch takes roughly the same time:
        // the shared-spectrum descriptors together, chroma + key together,
        // and the HPSS resynthesis on its own.
        let (timbral, (chroma_key, harmonic)) = rayon::join(
            || Self::timbral_branch(samples),
            || {
                rayon::join(
                    || Self::chroma_branch(samples),
                    || Self::harmonic_branch(samples),
                )
            },
        );

        let timbral = timbral?;
        let (chroma_mean, chroma_std, key) = chroma_key?;
        let harmonic = harmonic?;

        Ok(Self {
            mfcc_mean: timbral.mfcc_mean,
            mfcc_std: timbral.mfcc_std,
            chroma_mean,
            chroma_std,
            spectral_centroid_mean: timbral.centroid.mean,
            spectral_centroid_std: timbral.centroid.std,
            spectral_rolloff_mean: timbral.rolloff.mean,
            spectral_rolloff_std: timbral.rolloff.std,
            spectral_bandwidth_mean: timbral.bandwidth.mean,
            spectral_bandwidth_std: timbral.bandwidth.std,
            zero_crossing_rate_mean: timbral.zcr.mean,
            zero_crossing_rate_std: timbral.zcr.std,
            spectral_contrast_mean: timbral.contrast_mean,
            spectral_contrast_std: timbral.contrast_std,
            tonnetz_mean: harmonic.tonnetz_mean,
            tonnetz_std: harmonic.tonnetz_std,
            tempo: timbral.tempo,
            onset_strength_mean: timbral.onset.mean,
            onset_strength_std: timbral.onset.std,
            harmonic_energy: harmonic.harmonic_energy,
            percussive_energy: harmonic.percussive_energy,
            harmonic_percussive_ratio: harmonic.harmonic_energy
                / (harmonic.percussive_energy + HPR_EPSILON),
            rms_energy_mean: timbral.rms.mean,
            rms_energy_std: timbral.rms.std,
            dynamic_range: timbral.rms.dynamic_range,
            mel_spectral_mean: timbral.mel_db.mean,
            mel_spectral_std: timbral.mel_db.std,
            key,
            energy: signal_energy(samples),
        })
    }

    /// Analyze resampled audio, degrading to the zero fingerprint on any
    /// analysis failure. Never fails; the failure reason travels in the
    /// [`Extraction::diagnostic`] and is logged.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn extract(audio: &ResampledAudio) -> Extraction {
        match Self::from_samples(audio) {
            Ok(fingerprint) => Extraction {
                fingerprint,
                diagnostic: None,
            },
            Err(e) => {
                warn!(
                    "extraction failed for {}, using zero fingerprint: {e}",
                    audio.path.display()
                );
                Extraction {
                    fingerprint: Self::zeroed(),
                    diagnostic: Some(e.to_string()),
                }
            }
        }
    }

    fn timbral_branch(samples: &[f32]) -> AnalysisResult<TimbralBundle> {
        let spectrum = utils::stft(samples, timbral::WINDOW_SIZE, timbral::HOP_SIZE);

        let mut spectral = SpectralDesc::new(SAMPLE_RATE);
        spectral.do_(&spectrum);

        let mut contrast = ContrastDesc::new(SAMPLE_RATE);
        contrast.do_(&spectrum);
        let (contrast_mean, contrast_std) = contrast.get_value();

        let mel = MelDesc::new(SAMPLE_RATE);
        let mel_power = mel.mel_power(&spectrum);
        let mel_db = MelDesc::db_stats(&mel_power);
        let (mfcc_mean, mfcc_std) = mel.mfcc(&mel_power);

        let onset_desc = OnsetDesc::new(&MelDesc::log_mel(&mel_power), SAMPLE_RATE, HOP_LENGTH);

        let mut zcr = ZeroCrossingRateDesc::default();
        for frame in samples
            .windows(ZeroCrossingRateDesc::WINDOW_SIZE)
            .step_by(ZeroCrossingRateDesc::HOP_SIZE)
        {
            zcr.do_(frame);
        }

        let mut rms = RmsDesc::default();
        for frame in samples
            .windows(RmsDesc::WINDOW_SIZE)
            .step_by(RmsDesc::HOP_SIZE)
        {
            rms.do_(frame);
        }

        Ok(TimbralBundle {
            centroid: spectral.get_centroid(),
            rolloff: spectral.get_rolloff(),
            bandwidth: spectral.get_bandwidth(),
            contrast_mean,
            contrast_std,
            mel_db,
            mfcc_mean,
            mfcc_std,
            onset: onset_desc.get_strength(),
            tempo: onset_desc.get_tempo(),
            zcr: zcr.get_value(),
            rms: rms.get_value(),
        })
    }

    #[allow(clippy::type_complexity)]
    fn chroma_branch(
        samples: &[f32],
    ) -> AnalysisResult<([Feature; N_CHROMA], [Feature; N_CHROMA], Key)> {
        let mut chroma_desc = ChromaDesc::new(SAMPLE_RATE);
        chroma_desc.do_(samples)?;
        let (chroma_mean, chroma_std) = chroma_desc.get_value();

        let key = chroma::estimate_key(samples, SAMPLE_RATE)?;

        Ok((chroma_mean, chroma_std, key))
    }

    fn harmonic_branch(samples: &[f32]) -> AnalysisResult<HarmonicBundle> {
        let (harmonic, percussive) = harmonic::hpss(samples);
        let (tonnetz_mean, tonnetz_std) = harmonic::tonnetz(&harmonic, SAMPLE_RATE)?;

        Ok(HarmonicBundle {
            harmonic_energy: harmonic::component_energy(&harmonic),
            percussive_energy: harmonic::component_energy(&percussive),
            tonnetz_mean,
            tonnetz_std,
        })
    }
}
