//! Implementation of the default decoder, built on symphonia for
//! demuxing/decoding and rubato for resampling.

use std::{f32::consts::SQRT_2, fs::File, path::Path};

use log::warn;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder as _, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader as _},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::{errors::AnalysisError, errors::AnalysisResult, ResampledAudio, SAMPLE_RATE};

use super::Decoder;

/// The default [`Decoder`]: symphonia demux/decode, channel-average
/// downmix, rubato cubic resampling to 22 050 Hz, and right zero-padding
/// of anything shorter than one second.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ResonaDecoder;

impl ResonaDecoder {
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a file into interleaved f32 samples.
    fn decode_interleaved(path: &Path) -> AnalysisResult<(Vec<f32>, usize, u32)> {
        let file = File::open(path)?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension() {
            hint.with_extension(&extension.to_string_lossy());
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AnalysisError::NoAudioTrack(path.to_owned()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(AnalysisError::UnknownSampleRate)?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        let mut channels = 0_usize;
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    channels = spec.channels.count();
                    let mut buffer =
                        SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                // a malformed packet is recoverable, skip it
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("skipping malformed packet in {}: {e}", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        if samples.is_empty() || channels == 0 {
            return Err(AnalysisError::EmptySamples);
        }
        Ok((samples, channels, sample_rate))
    }
}

impl Decoder for ResonaDecoder {
    #[allow(clippy::missing_inline_in_public_items)]
    #[allow(clippy::cast_precision_loss)]
    fn decode(&self, path: &Path) -> AnalysisResult<ResampledAudio> {
        let (interleaved, num_channels, sample_rate) = Self::decode_interleaved(path)?;

        // channels are interleaved; collapse them to mono by averaging
        // (stereo keeps the usual -3 dB pan-law scaling)
        let mut mono_sample_array: Vec<f32> = match num_channels {
            1 => interleaved,
            2 => interleaved
                .chunks_exact(2)
                .map(|chunk| (chunk[0] + chunk[1]) * SQRT_2 / 2.)
                .collect(),
            _ => interleaved
                .chunks_exact(num_channels)
                .map(|chunk| chunk.iter().sum::<f32>() / num_channels as f32)
                .collect(),
        };

        // then resample to the canonical 22 050 Hz
        let mut resampled_array = if sample_rate == SAMPLE_RATE {
            mono_sample_array.shrink_to_fit();
            mono_sample_array
        } else {
            let mut resampler = FastFixedIn::new(
                f64::from(SAMPLE_RATE) / f64::from(sample_rate),
                1.0,
                PolynomialDegree::Cubic,
                mono_sample_array.len(),
                1,
            )?;
            resampler.process(&[&mono_sample_array], None)?[0].clone()
        };

        // anything shorter than a second is padded up to exactly one
        if resampled_array.len() < SAMPLE_RATE as usize {
            resampled_array.resize(SAMPLE_RATE as usize, 0.);
        }

        Ok(ResampledAudio {
            path: path.to_owned(),
            samples: resampled_array,
        })
    }
}
