use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Failed to open file: {0}")]
    FileOpenError(#[from] std::io::Error),
    #[error("Failed to decode audio: {0}")]
    DecodeError(#[from] symphonia::core::errors::Error),
    #[error("No decodable audio track in {0}")]
    NoAudioTrack(PathBuf),
    #[error("Audio stream does not declare a sample rate")]
    UnknownSampleRate,
    #[error("Failed to resample audio: {0}")]
    ResampleError(#[from] rubato::ResampleError),
    #[error("Failed to create resampler: {0}")]
    ResamplerConstructionError(#[from] rubato::ResamplerConstructionError),
    #[error("Failure During Analysis: {0}")]
    AnalysisError(String),
    #[error("Samples are empty or too short")]
    EmptySamples,
    #[error("Too many or too little features were provided at the end of the analysis")]
    InvalidFeaturesLen,
    #[error("Callback channel closed before analysis finished")]
    SendError,
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
