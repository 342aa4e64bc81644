#![allow(clippy::missing_inline_in_public_items)]

//! Decoding audio files into the canonical analysis form (mono f32 at
//! 22 050 Hz), and fanning fingerprint extraction out over a worker pool.

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::mpsc::{self, SendError},
    thread,
};

use log::debug;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{
    errors::AnalysisResult,
    Extraction, Fingerprint, ResampledAudio,
};

mod resona;
#[allow(clippy::module_name_repetitions)]
pub use resona::ResonaDecoder;

/// Channel the worker pool reports results through, one entry per file.
pub type ExtractionCallback = mpsc::Sender<(PathBuf, AnalysisResult<Extraction>)>;

/// Trait used to implement your own decoder.
///
/// The `decode` function should be implemented so that it decodes and
/// resamples a file to one channel with a sampling rate of 22 050 Hz and a
/// f32le layout, zero-padding anything shorter than one second up to
/// exactly one second. Once it is implemented, several functions to run
/// extraction from path(s) are available, such as
/// [`extract_paths_with_cores`](Decoder::extract_paths_with_cores) and
/// [`extract_paths`](Decoder::extract_paths).
pub trait Decoder {
    /// Decode and resample a file into the canonical analysis form.
    ///
    /// The output sample array must be f32le, one channel, 22 050 Hz, and
    /// at least one second long. Anything else will yield wrong results.
    ///
    /// # Errors
    ///
    /// Returns an error if the file path is invalid, points to a file
    /// containing no or corrupted audio stream, or cannot be resampled.
    fn decode(&self, path: &Path) -> AnalysisResult<ResampledAudio>;

    /// Decode a file and extract its fingerprint.
    ///
    /// Decoding failures propagate; extraction failures degrade to the
    /// zero fingerprint per [`Fingerprint::extract`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be decoded.
    #[inline]
    fn extract_path<P: AsRef<Path>>(&self, path: P) -> AnalysisResult<Extraction> {
        Ok(Fingerprint::extract(&self.decode(path.as_ref())?))
    }

    /// Extract fingerprints for `paths` in parallel across all logical
    /// cores, emitting each result through the provided callback channel.
    ///
    /// This function is blocking, so it should be called in a separate
    /// thread from where the receiver is consumed.
    ///
    /// You can cancel the job by dropping the channel's receiver;
    /// cancellation takes effect between files.
    ///
    /// # Errors
    ///
    /// Errors if the `callback` channel is closed.
    #[inline]
    fn extract_paths<P: Into<PathBuf>, I: Send + IntoIterator<Item = P>>(
        &self,
        paths: I,
        callback: ExtractionCallback,
    ) -> Result<(), SendError<()>>
    where
        Self: Sync + Send,
    {
        let cores = thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        self.extract_paths_with_cores(paths, cores, callback)
    }

    /// Extract fingerprints for `paths` in parallel across at most
    /// `number_cores` threads, emitting each result through the provided
    /// callback channel.
    ///
    /// See also: [`Decoder::extract_paths`]
    ///
    /// # Errors
    ///
    /// Errors if the `callback` channel is closed.
    fn extract_paths_with_cores<P: Into<PathBuf>, I: IntoIterator<Item = P>>(
        &self,
        paths: I,
        number_cores: NonZeroUsize,
        callback: ExtractionCallback,
    ) -> Result<(), SendError<()>>
    where
        Self: Sync + Send,
    {
        let mut cores = thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        if cores > number_cores {
            cores = number_cores;
        }
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();

        if paths.is_empty() {
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cores.get())
            .thread_name(|idx| format!("Extractor {idx}"))
            .build()
            .map_err(|_| SendError(()))?;

        pool.install(|| {
            paths.into_par_iter().try_for_each(|path| {
                debug!("Analyzing file '{}'", path.display());
                let extraction = self.extract_path(&path);
                callback
                    .send((path, extraction))
                    .map_err(|_| SendError(()))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::resona::tests::write_test_wav;
    use crate::SAMPLE_RATE;

    #[test]
    fn test_extract_paths_reports_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("tone_{i}.wav"));
            write_test_wav(&path, 440. + 100. * i as f32, 1.5, 44100);
            paths.push(path);
        }
        // one path that cannot be decoded
        let bad = dir.path().join("not_audio.wav");
        std::fs::write(&bad, b"definitely not a wav file").unwrap();
        paths.push(bad.clone());

        let (tx, rx) = mpsc::channel();
        let decoder = ResonaDecoder::new();
        let handle = std::thread::spawn(move || {
            decoder
                .extract_paths_with_cores(paths, NonZeroUsize::new(2).unwrap(), tx)
                .unwrap();
        });

        let results: Vec<_> = rx.into_iter().collect();
        handle.join().unwrap();

        assert_eq!(results.len(), 4);
        let failures: Vec<_> = results
            .iter()
            .filter(|(_, result)| result.is_err())
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, bad);
    }

    #[test]
    fn test_extract_paths_empty_input() {
        let (tx, _rx) = mpsc::channel();
        let decoder = ResonaDecoder::new();
        assert!(decoder.extract_paths(Vec::<PathBuf>::new(), tx).is_ok());
    }

    #[test]
    fn test_extract_path_produces_usable_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 440., 1.0, SAMPLE_RATE);

        let decoder = ResonaDecoder::new();
        let extraction = decoder.extract_path(&path).unwrap();
        assert!(extraction.diagnostic.is_none());
        assert!(extraction.fingerprint.energy > 0.);
    }
}
