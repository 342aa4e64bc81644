//! The resona engine: ties the store, the similarity index, the scorer,
//! and the external catalog adapters into one long-lived object.
//!
//! An [`Engine`] is constructed once at startup and passed by reference to
//! whatever request surface the embedding application provides. Ingest
//! and search are the two long-running operations; both report progress
//! through a caller-supplied callback and are cancellable at file
//! boundaries.

pub mod catalog;
pub mod errors;
pub mod index;
pub mod scorer;
pub mod services;

use std::{
    num::NonZeroUsize,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use surrealdb::{engine::local::Db, Surreal};
use tokio::sync::RwLock;

use resona_analysis::{
    decoder::{Decoder as _, ResonaDecoder},
    Extraction, Fingerprint, HOP_LENGTH, N_MFCC, SAMPLE_RATE,
};
use resona_core::{config::Settings, progress::ProgressCallback};
use resona_storage::db::schemas::track::Track;

use catalog::{CatalogManager, ExternalHit};
use errors::{EngineError, EngineResult};
use index::{IndexStats, SimilarityIndex};
use services::library::ScanSummary;
use services::search::SearchOutcome;

pub use services::library::AUDIO_EXTENSIONS;

/// Shared cancellation flag for a running scan; set it to `true` to stop
/// between files.
pub type CancelFlag = Arc<AtomicBool>;

/// The long-lived similarity engine.
pub struct Engine {
    settings: Settings,
    db: Surreal<Db>,
    index: RwLock<SimilarityIndex>,
    catalogs: CatalogManager,
}

impl Engine {
    /// Build an engine over an initialized database, loading catalog
    /// credentials from the environment and building the index from
    /// whatever the store already holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured analysis parameters disagree
    /// with the fingerprint schema, or if the initial index build fails.
    #[inline]
    pub async fn new(settings: Settings, db: Surreal<Db>) -> EngineResult<Self> {
        let timeout = Duration::from_secs(settings.engine.catalog_timeout_secs);
        Self::with_catalogs(settings, db, CatalogManager::from_env(timeout)).await
    }

    /// Like [`Engine::new`], with an explicit catalog manager.
    ///
    /// # Errors
    ///
    /// See [`Engine::new`].
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn with_catalogs(
        settings: Settings,
        db: Surreal<Db>,
        catalogs: CatalogManager,
    ) -> EngineResult<Self> {
        validate_analysis_settings(&settings)?;

        let engine = Self {
            settings,
            db,
            index: RwLock::new(SimilarityIndex::new()),
            catalogs,
        };

        if with_deadline(engine.io_timeout(), Track::count(&engine.db)).await? > 0 {
            engine.rebuild_index().await?;
        }
        Ok(engine)
    }

    /// The configured deadline for store operations and single-file
    /// decodes.
    fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.engine.io_timeout_secs)
    }

    #[must_use]
    #[inline]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    #[inline]
    pub const fn db(&self) -> &Surreal<Db> {
        &self.db
    }

    #[must_use]
    #[inline]
    pub const fn catalogs(&self) -> &CatalogManager {
        &self.catalogs
    }

    /// Scan the configured library roots; see
    /// [`services::library`] for the mechanics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or index refuse an operation;
    /// per-file failures are reported in the summary instead.
    #[inline]
    pub async fn scan_library(
        &self,
        progress: &ProgressCallback,
        cancel: &CancelFlag,
    ) -> EngineResult<ScanSummary> {
        services::library::scan(
            &self.db,
            &self.index,
            self.settings.engine.rebuild_every,
            self.settings.analysis.num_threads,
            self.io_timeout(),
            &self.settings.engine.library_paths,
            progress,
            cancel,
        )
        .await
    }

    /// Scan specific roots instead of the configured ones.
    ///
    /// # Errors
    ///
    /// See [`Engine::scan_library`].
    #[inline]
    pub async fn scan_paths(
        &self,
        roots: &[PathBuf],
        progress: &ProgressCallback,
        cancel: &CancelFlag,
    ) -> EngineResult<ScanSummary> {
        services::library::scan(
            &self.db,
            &self.index,
            self.settings.engine.rebuild_every,
            self.settings.analysis.num_threads,
            self.io_timeout(),
            roots,
            progress,
            cancel,
        )
        .await
    }

    /// Ingest one already-fingerprinted track: persist, then index, with
    /// the configured rebuild cadence. Returns `false` when the content
    /// hash was already known.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence or indexing fails.
    #[inline]
    pub async fn ingest_track(&self, track: Track) -> EngineResult<bool> {
        services::library::ingest_track(
            &self.db,
            &self.index,
            self.settings.engine.rebuild_every,
            self.io_timeout(),
            track,
        )
        .await
    }

    /// Decode and fingerprint a single file off the async runtime, under
    /// the configured I/O deadline.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be decoded, or
    /// [`EngineError::Timeout`] if the deadline expires; analysis
    /// failures degrade per [`Fingerprint::extract`].
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn fingerprint_file(&self, path: PathBuf) -> EngineResult<Extraction> {
        let task = tokio::task::spawn_blocking(move || ResonaDecoder::new().extract_path(path));
        let extraction = tokio::time::timeout(self.io_timeout(), task)
            .await
            .map_err(|_| EngineError::Timeout)?
            .map_err(|e| EngineError::Task(e.to_string()))??;
        Ok(extraction)
    }

    /// Find tracks similar to `query`, per the configured search mode.
    ///
    /// # Errors
    ///
    /// Returns an error only for whole-query failures; per-path failures
    /// surface inside the outcome.
    #[inline]
    pub async fn search_similar(
        &self,
        query: &Fingerprint,
        source_file: Option<String>,
        progress: &ProgressCallback,
    ) -> EngineResult<SearchOutcome> {
        services::search::search_similar(
            &self.db,
            &self.index,
            &self.catalogs,
            &self.settings.engine,
            query,
            source_file,
            progress,
        )
        .await
    }

    /// Identify a clip of raw audio bytes via the identification adapter.
    /// Disabled or failing adapters degrade to an empty result.
    #[inline]
    pub async fn identify_audio(&self, audio: Vec<u8>) -> (Vec<ExternalHit>, Option<String>) {
        self.catalogs.identify(audio).await
    }

    /// Re-fit the standardizer and rebuild the index from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the rows disagree
    /// on dimension.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn rebuild_index(&self) -> EngineResult<IndexStats> {
        let mut guard = self.index.write().await;
        services::library::rebuild_index(&self.db, &mut guard, self.io_timeout()).await
    }

    /// Current index statistics.
    #[inline]
    pub async fn index_stats(&self) -> IndexStats {
        self.index.read().await.stats()
    }
}

/// Run a store or decoder future under a deadline, mapping expiry to
/// [`EngineError::Timeout`]. The operation's own error passes through.
pub(crate) async fn with_deadline<T, E, F>(deadline: Duration, future: F) -> EngineResult<T>
where
    F: std::future::Future<Output = Result<T, E>>,
    EngineError: From<E>,
{
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_| EngineError::Timeout)?
        .map_err(EngineError::from)
}

/// The extraction pipeline is compiled for fixed frame parameters; refuse
/// configurations that silently disagree with them.
fn validate_analysis_settings(settings: &Settings) -> EngineResult<()> {
    let analysis = &settings.analysis;
    if analysis.n_mfcc != N_MFCC {
        return Err(EngineError::Config(format!(
            "n_mfcc = {} is unsupported: the fingerprint schema stores {N_MFCC} coefficients; \
             changing it would change the feature-vector dimension",
            analysis.n_mfcc
        )));
    }
    if analysis.sample_rate != SAMPLE_RATE {
        return Err(EngineError::Config(format!(
            "sample_rate = {} is unsupported: the analysis is calibrated for {SAMPLE_RATE} Hz",
            analysis.sample_rate
        )));
    }
    if analysis.hop_length != HOP_LENGTH {
        return Err(EngineError::Config(format!(
            "hop_length = {} is unsupported: the analysis uses a {HOP_LENGTH}-sample hop",
            analysis.hop_length
        )));
    }
    if let Some(threads) = analysis.num_threads {
        log::debug!("extraction limited to {threads} threads");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::f32::consts::PI;
    use std::io::Write as _;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use resona_core::config::SearchMode;
    use resona_core::progress::{noop_progress, ProgressEvent, Stage};
    use resona_storage::db::init_test_database;
    use resona_storage::metadata::TrackMetadata;

    /// 16-bit PCM mono WAV: a tone with a loud pulse every half second so
    /// extraction finds both a key and a tempo.
    fn write_beat_wav(path: &Path, freq: f32, seconds: f32) {
        let sample_rate = 22050_u32;
        let n = (seconds * sample_rate as f32) as u32;
        let data_len = n * 2;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);

        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16_u32.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&1_u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2_u16.to_le_bytes());
        bytes.extend_from_slice(&16_u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());

        for i in 0..n {
            let beat = if i % (sample_rate / 2) < 1500 { 1.0 } else { 0.25 };
            let sample = ((2. * PI * freq * i as f32 / sample_rate as f32).sin()
                * beat
                * 0.8
                * 32767.) as i16;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
    }

    fn test_settings(library_path: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.engine.library_paths = vec![library_path.to_path_buf()].into();
        settings.engine.search_mode = SearchMode::Local;
        settings
    }

    async fn test_engine(settings: Settings) -> Engine {
        let db = init_test_database().await.unwrap();
        Engine::with_catalogs(settings, db, CatalogManager::disabled())
            .await
            .unwrap()
    }

    fn synthetic_track(seed: usize) -> Track {
        let mut fingerprint = Fingerprint::zeroed();
        fingerprint.mfcc_mean[seed % 13] = 10. + seed as f32;
        fingerprint.tempo = 100. + seed as f32;
        fingerprint.energy = 0.1 + 0.01 * seed as f32;
        Track::new(
            format!("/music/{seed}.flac").into(),
            format!("hash-{seed}"),
            TrackMetadata {
                title: format!("Track {seed}"),
                artist: "Artist".into(),
                album: "Album".into(),
                duration: 180.,
            },
            fingerprint,
        )
    }

    #[tokio::test]
    async fn test_rejects_unsupported_analysis_settings() {
        let db = init_test_database().await.unwrap();
        let mut settings = Settings::default();
        settings.analysis.n_mfcc = 20;

        let result = Engine::with_catalogs(settings, db, CatalogManager::disabled()).await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_expired_deadline_maps_to_timeout() {
        let result: EngineResult<()> = with_deadline(
            Duration::from_millis(10),
            std::future::pending::<Result<(), resona_storage::errors::Error>>(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Timeout)));
    }

    #[tokio::test]
    async fn test_deadline_passes_value_and_error_through() {
        let result = with_deadline(
            Duration::from_secs(1),
            std::future::ready(Ok::<_, resona_storage::errors::Error>(7)),
        )
        .await;
        assert_eq!(result.unwrap(), 7);

        let result: EngineResult<()> = with_deadline(
            Duration::from_secs(1),
            std::future::ready(Err(resona_storage::errors::Error::NotFound)),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Persist(_))));
    }

    #[tokio::test]
    async fn test_scan_ingests_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        write_beat_wav(&dir.path().join("a.wav"), 261.63, 1.5);
        write_beat_wav(&dir.path().join("b.wav"), 392.00, 1.5);
        std::fs::write(dir.path().join("notes.txt"), b"not audio").unwrap();

        let engine = test_engine(test_settings(dir.path())).await;
        let cancel = CancelFlag::default();

        let summary = engine
            .scan_library(&noop_progress(), &cancel)
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 0);
        assert!(summary.failed.is_empty());
        assert!(!summary.cancelled);

        assert_eq!(Track::count(engine.db()).await.unwrap(), 2);
        assert_eq!(engine.index_stats().await.count, 2);

        // re-ingesting identical bytes: no new rows, no new index entries
        let summary = engine
            .scan_library(&noop_progress(), &cancel)
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skipped, 2);
        assert_eq!(Track::count(engine.db()).await.unwrap(), 2);
        assert_eq!(engine.index_stats().await.count, 2);
    }

    #[tokio::test]
    async fn test_self_match_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.wav");
        write_beat_wav(&target, 261.63, 2.0);
        write_beat_wav(&dir.path().join("other.wav"), 740.00, 2.0);

        let engine = test_engine(test_settings(dir.path())).await;
        engine
            .scan_library(&noop_progress(), &CancelFlag::default())
            .await
            .unwrap();

        let extraction = engine.fingerprint_file(target.clone()).await.unwrap();
        assert!(extraction.diagnostic.is_none());

        let outcome = engine
            .search_similar(&extraction.fingerprint, None, &noop_progress())
            .await
            .unwrap();

        assert!(outcome.local_error.is_none());
        assert!(!outcome.hits.is_empty());
        let top = &outcome.hits[0];
        assert_eq!(top.path.as_deref(), Some(target.as_path()));
        assert!(top.similarity >= 0.99, "index similarity {}", top.similarity);
        let scores = top.scores.unwrap();
        assert!(scores.overall >= 0.99, "overall {}", scores.overall);
    }

    #[tokio::test]
    async fn test_search_progress_stages_are_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(test_settings(dir.path())).await;

        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::default();
        let sink = events.clone();
        let progress: ProgressCallback =
            Arc::new(move |event| sink.lock().unwrap().push(event));

        engine
            .search_similar(&Fingerprint::zeroed(), None, &progress)
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let stages: Vec<Stage> = events.iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::Searching, Stage::ExternalApis, Stage::Complete]
        );
        for pair in events.windows(2) {
            assert!(pair[0].percent <= pair[1].percent);
        }
    }

    #[tokio::test]
    async fn test_empty_index_search_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(test_settings(dir.path())).await;

        let outcome = engine
            .search_similar(&Fingerprint::zeroed(), None, &noop_progress())
            .await
            .unwrap();
        assert!(outcome.hits.is_empty());
        assert!(outcome.local_error.is_none());
    }

    #[tokio::test]
    async fn test_threshold_filters_uncorrelated_library() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.engine.threshold = 0.95;
        let engine = test_engine(settings).await;

        for seed in 0..5 {
            engine.ingest_track(synthetic_track(seed)).await.unwrap();
        }

        // a query orthogonal to everything stored
        let mut query = Fingerprint::zeroed();
        query.chroma_mean[0] = 10.;

        let outcome = engine
            .search_similar(&query, None, &noop_progress())
            .await
            .unwrap();
        assert_eq!(outcome.hits, vec![]);
    }

    #[tokio::test]
    async fn test_zero_threshold_returns_up_to_max_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.engine.threshold = 0.0;
        settings.engine.max_results = 2;
        let engine = test_engine(settings).await;

        for seed in 0..5 {
            engine.ingest_track(synthetic_track(seed)).await.unwrap();
        }

        let mut query = Fingerprint::zeroed();
        query.chroma_mean[0] = 10.;

        let outcome = engine
            .search_similar(&query, None, &noop_progress())
            .await
            .unwrap();
        // the cap binds: more candidates clear the zero threshold than
        // max_results allows
        assert_eq!(outcome.hits.len(), 2);
        for pair in outcome.hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_rebuild_cadence_exactly_one_implicit_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(test_settings(dir.path())).await;
        assert_eq!(engine.index_stats().await.generation, 0);

        for seed in 0..100 {
            engine.ingest_track(synthetic_track(seed)).await.unwrap();
        }

        let stats = engine.index_stats().await;
        assert_eq!(stats.count, 100);
        // the first insert builds the empty index; no cadence rebuild
        // should have fired within the next 99 additions
        assert_eq!(stats.generation, 1);

        // the 100th addition after that build trips the cadence
        engine.ingest_track(synthetic_track(100)).await.unwrap();
        let stats = engine.index_stats().await;
        assert_eq!(stats.count, 101);
        assert_eq!(stats.generation, 2);
    }

    #[tokio::test]
    async fn test_rebuild_puts_every_stored_fingerprint_first_for_itself() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(dir.path());
        settings.engine.threshold = 0.0;
        let engine = test_engine(settings).await;

        let tracks: Vec<Track> = (0..6).map(synthetic_track).collect();
        for track in &tracks {
            engine.ingest_track(track.clone()).await.unwrap();
        }
        engine.rebuild_index().await.unwrap();

        for track in &tracks {
            let outcome = engine
                .search_similar(&track.fingerprint, None, &noop_progress())
                .await
                .unwrap();
            assert_eq!(
                outcome.hits[0].path.as_deref(),
                Some(track.path.as_path()),
                "top-1 for {:?}",
                track.path
            );
        }
    }

    #[tokio::test]
    async fn test_cancelled_scan_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        write_beat_wav(&dir.path().join("a.wav"), 261.63, 1.5);

        let engine = test_engine(test_settings(dir.path())).await;
        let cancel = CancelFlag::default();
        cancel.store(true, Ordering::Relaxed);

        let summary = engine
            .scan_library(&noop_progress(), &cancel)
            .await
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert_eq!(Track::count(engine.db()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_history_is_recorded() {
        use resona_storage::db::schemas::history::SearchRecord;

        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(test_settings(dir.path())).await;

        engine
            .search_similar(
                &Fingerprint::zeroed(),
                Some("/music/query.flac".into()),
                &noop_progress(),
            )
            .await
            .unwrap();

        let history = SearchRecord::read_all(engine.db()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].source_file.as_deref(), Some("/music/query.flac"));
    }
}
