//! Configuration for the engine.
//!
//! Settings are layered: a TOML file first, then `RESONA_`-prefixed
//! environment variables on top. Every field has a default, so an empty
//! file (or none at all, via [`DEFAULT_CONFIG`]) yields a working setup.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr};

pub static DEFAULT_CONFIG: &str = include_str!("../Resona.toml");

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Library scanning and query settings.
    #[serde(default)]
    pub engine: EngineSettings,
    /// Settings for fingerprint extraction.
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

impl Settings {
    /// Load settings from the config file and environment variables.
    ///
    /// Environment variables are prefixed with `RESONA_`, e.g.
    /// `RESONA_ENGINE__THRESHOLD=0.5`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is missing or invalid.
    #[inline]
    pub fn init(
        config: PathBuf,
        log_level: Option<log::LevelFilter>,
    ) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(config))
            .add_source(Environment::with_prefix("RESONA").separator("__"))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        for path in &mut settings.engine.library_paths {
            *path = shellexpand::tilde(&path.to_string_lossy())
                .into_owned()
                .into();
        }

        if let Some(log_level) = log_level {
            settings.engine.log_level = log_level;
        }

        Ok(settings)
    }
}

/// How a similarity query sources its candidates.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Only the local library index.
    Local,
    /// Only the external catalog adapters.
    Online,
    /// Local index first, then external catalogs.
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Whether this mode consults the local index.
    #[must_use]
    #[inline]
    pub const fn searches_local(self) -> bool {
        matches!(self, Self::Local | Self::Hybrid)
    }

    /// Whether this mode consults the external catalogs.
    #[must_use]
    #[inline]
    pub const fn searches_external(self) -> bool {
        matches!(self, Self::Online | Self::Hybrid)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EngineSettings {
    /// The root paths of the music library.
    #[serde(default = "default_library_paths")]
    pub library_paths: Box<[PathBuf]>,
    /// Maximum number of results a similarity query returns.
    /// Default is 20.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Minimum index similarity for a candidate to survive filtering.
    /// Default is 0.7.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Where queries look for candidates: "local", "online", or "hybrid".
    #[serde(default)]
    pub search_mode: SearchMode,
    /// How many incremental index additions are allowed before the engine
    /// forces a full rebuild. Default is 100.
    #[serde(default = "default_rebuild_every")]
    pub rebuild_every: usize,
    /// Deadline for a single external catalog call, in seconds.
    /// Default is 10.
    #[serde(default = "default_catalog_timeout_secs")]
    pub catalog_timeout_secs: u64,
    /// Deadline for a single store operation or single-file decode, in
    /// seconds. Default is 30.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// What level of logging to use.
    /// Default is "info".
    #[serde(default = "default_log_level")]
    #[serde(deserialize_with = "de_log_level")]
    pub log_level: log::LevelFilter,
}

fn de_log_level<'de, D>(deserializer: D) -> Result<log::LevelFilter, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(log::LevelFilter::from_str(&s).unwrap_or_else(|_| default_log_level()))
}

fn default_library_paths() -> Box<[PathBuf]> {
    vec![shellexpand::tilde("~/Music/").into_owned().into()].into_boxed_slice()
}

const fn default_max_results() -> usize {
    20
}

const fn default_threshold() -> f32 {
    0.7
}

const fn default_rebuild_every() -> usize {
    100
}

const fn default_catalog_timeout_secs() -> u64 {
    10
}

const fn default_io_timeout_secs() -> u64 {
    30
}

const fn default_log_level() -> log::LevelFilter {
    log::LevelFilter::Info
}

impl Default for EngineSettings {
    #[inline]
    fn default() -> Self {
        Self {
            library_paths: default_library_paths(),
            max_results: default_max_results(),
            threshold: default_threshold(),
            search_mode: SearchMode::default(),
            rebuild_every: default_rebuild_every(),
            catalog_timeout_secs: default_catalog_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AnalysisSettings {
    /// The sample rate the decoder resamples to. Default is 22050 Hz.
    ///
    /// The fingerprint schema is calibrated for 22050 Hz; changing this
    /// changes what the features mean, so leave it alone unless you are
    /// rebuilding the whole library anyway.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Frame hop in samples. Default is 512.
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    /// Number of MFCC coefficients. Default is 13.
    ///
    /// The fingerprint schema currently fixes this at 13; any other value
    /// is rejected when the engine starts, because it would change the
    /// feature-vector dimension and silently corrupt the index.
    #[serde(default = "default_n_mfcc")]
    pub n_mfcc: usize,
    /// The number of threads to use for extraction.
    /// Default is the number of logical CPUs on the system.
    #[serde(default)]
    pub num_threads: Option<NonZeroUsize>,
}

const fn default_sample_rate() -> u32 {
    22050
}

const fn default_hop_length() -> usize {
    512
}

const fn default_n_mfcc() -> usize {
    13
}

impl Default for AnalysisSettings {
    #[inline]
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            hop_length: default_hop_length(),
            n_mfcc: default_n_mfcc(),
            num_threads: None,
        }
    }
}
