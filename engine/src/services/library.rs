//! Library ingest: walk folders, fingerprint new files on a worker pool,
//! persist, and feed the similarity index.

use std::{
    collections::HashMap,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};

use log::{debug, info, warn};
use surrealdb::{Connection, Surreal};
use tokio::sync::RwLock;
use walkdir::WalkDir;

use resona_analysis::decoder::{Decoder, ResonaDecoder};
use resona_core::progress::{ProgressCallback, ProgressEvent, Stage};
use resona_storage::{db::schemas::track::Track, metadata::TrackMetadata, util::file_hash};

use crate::{
    errors::EngineResult,
    index::{AddOutcome, IndexStats, SimilarityIndex},
};

/// File extensions treated as audio during a scan.
pub const AUDIO_EXTENSIONS: &[&str] = &["aac", "flac", "m4a", "mp3", "ogg", "wav"];

/// What a library scan accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Audio files found under the scanned roots.
    pub total: usize,
    /// Newly fingerprinted and persisted.
    pub processed: usize,
    /// Skipped because their bytes were already in the library.
    pub skipped: usize,
    /// Files that could not be hashed, decoded, or stored, with reasons.
    pub failed: Vec<(PathBuf, String)>,
    /// Whether the scan was cancelled before finishing.
    pub cancelled: bool,
}

/// Persist a track and insert its vector into the index.
///
/// Returns `false` (and writes nothing) when the track's content hash is
/// already in the library. Persistence strictly precedes index insertion,
/// so a stored fingerprint may be briefly unsearchable but never the
/// reverse. Triggers a full rebuild on the first-ever insert and after
/// every `rebuild_every` incremental additions.
pub(crate) async fn ingest_track<C: Connection>(
    db: &Surreal<C>,
    index: &RwLock<SimilarityIndex>,
    rebuild_every: usize,
    io_timeout: Duration,
    track: Track,
) -> EngineResult<bool> {
    if crate::with_deadline(io_timeout, Track::read_by_hash(db, &track.file_hash))
        .await?
        .is_some()
    {
        debug!("{} already ingested, skipping", track.path.display());
        return Ok(false);
    }

    let vector = track.fingerprint.to_vector();
    let stored = crate::with_deadline(io_timeout, Track::upsert_by_path(db, track)).await?;

    let mut guard = index.write().await;
    match guard.add(stored.id, &vector)? {
        AddOutcome::Deferred => {
            rebuild_index(db, &mut guard, io_timeout).await?;
        }
        AddOutcome::Added { adds_since_build }
            if rebuild_every > 0 && adds_since_build >= rebuild_every =>
        {
            info!("rebuild cadence reached ({adds_since_build} additions)");
            rebuild_index(db, &mut guard, io_timeout).await?;
        }
        AddOutcome::Added { .. } => {}
    }

    Ok(true)
}

/// Re-fit the standardizer and rebuild the index over every persisted
/// fingerprint.
pub(crate) async fn rebuild_index<C: Connection>(
    db: &Surreal<C>,
    index: &mut SimilarityIndex,
    io_timeout: Duration,
) -> EngineResult<IndexStats> {
    let tracks = crate::with_deadline(io_timeout, Track::read_all(db)).await?;
    let entries = tracks
        .into_iter()
        .map(|track| {
            let vector = track.fingerprint.to_vector();
            (track.id, vector)
        })
        .collect();
    index.build(entries)?;

    let stats = index.stats();
    info!(
        "index rebuilt: {} vectors, generation {}",
        stats.count, stats.generation
    );
    Ok(stats)
}

/// Scan library roots: enumerate audio files, skip already-known content,
/// fingerprint the rest on a worker pool, and ingest each result.
///
/// Emits `Scanning -> Processing -> Complete` progress. Cancellation (via
/// `cancel`) takes effect between files; in-flight extraction work for the
/// current file is discarded.
#[allow(clippy::too_many_lines)]
pub(crate) async fn scan<C: Connection>(
    db: &Surreal<C>,
    index: &RwLock<SimilarityIndex>,
    rebuild_every: usize,
    num_threads: Option<NonZeroUsize>,
    io_timeout: Duration,
    roots: &[PathBuf],
    progress: &ProgressCallback,
    cancel: &Arc<AtomicBool>,
) -> EngineResult<ScanSummary> {
    let emit = |event: ProgressEvent| progress.as_ref()(event);
    emit(ProgressEvent::new(
        Stage::Scanning,
        0,
        "enumerating media files",
    ));

    let files = collect_audio_files(roots);
    let mut summary = ScanSummary {
        total: files.len(),
        ..ScanSummary::default()
    };
    info!("library scan found {} candidate files", summary.total);

    if files.is_empty() {
        emit(ProgressEvent::new(Stage::Complete, 100, "nothing to scan"));
        return Ok(summary);
    }

    // hash everything upfront; identical bytes are a no-op
    let mut pending = Vec::new();
    let mut hashes: HashMap<PathBuf, String> = HashMap::new();
    for path in &files {
        if cancel.load(Ordering::Relaxed) {
            summary.cancelled = true;
            emit(ProgressEvent::new(Stage::Complete, 100, "scan cancelled"));
            return Ok(summary);
        }
        match file_hash(path) {
            Ok(hash) => {
                if crate::with_deadline(io_timeout, Track::read_by_hash(db, &hash))
                    .await?
                    .is_some()
                {
                    summary.skipped += 1;
                } else {
                    hashes.insert(path.clone(), hash);
                    pending.push(path.clone());
                }
            }
            Err(e) => {
                warn!("cannot hash {}: {e}", path.display());
                summary.failed.push((path.clone(), e.to_string()));
            }
        }
    }

    let mut completed = summary.skipped + summary.failed.len();
    emit(ProgressEvent::new(
        Stage::Processing,
        percent_of(completed, summary.total),
        format!("{} of {} files already known", summary.skipped, summary.total),
    ));

    if !pending.is_empty() {
        // the extraction pool runs on its own thread and reports through a
        // channel; a second thread bridges it into async land. Dropping
        // our receiver stops both between files.
        let (tx, rx) = mpsc::channel();
        let (async_tx, mut async_rx) = tokio::sync::mpsc::unbounded_channel();

        let worker_paths = pending;
        std::thread::spawn(move || {
            let decoder = ResonaDecoder::new();
            let result = match num_threads {
                Some(cores) => decoder.extract_paths_with_cores(worker_paths, cores, tx),
                None => decoder.extract_paths(worker_paths, tx),
            };
            if result.is_err() {
                debug!("extraction pool stopped early");
            }
        });
        std::thread::spawn(move || {
            for item in rx {
                if async_tx.send(item).is_err() {
                    break;
                }
            }
        });

        while let Some((path, result)) = async_rx.recv().await {
            if cancel.load(Ordering::Relaxed) {
                summary.cancelled = true;
                break;
            }
            completed += 1;

            match result {
                Ok(extraction) => {
                    if let Some(reason) = &extraction.diagnostic {
                        warn!(
                            "analysis degraded for {}: {reason}",
                            path.display()
                        );
                    }
                    let metadata = TrackMetadata::load(&path);
                    let hash = match hashes.get(&path) {
                        Some(hash) => hash.clone(),
                        None => file_hash(&path).unwrap_or_default(),
                    };
                    let track =
                        Track::new(path.clone(), hash, metadata, extraction.fingerprint);
                    match ingest_track(db, index, rebuild_every, io_timeout, track).await {
                        Ok(true) => summary.processed += 1,
                        Ok(false) => summary.skipped += 1,
                        Err(e) => {
                            warn!("failed to store {}: {e}", path.display());
                            summary.failed.push((path.clone(), e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    warn!("failed to decode {}: {e}", path.display());
                    summary.failed.push((path.clone(), e.to_string()));
                }
            }

            emit(ProgressEvent::new(
                Stage::Processing,
                percent_of(completed, summary.total),
                path.file_name()
                    .map_or_else(String::new, |name| name.to_string_lossy().into_owned()),
            ));
        }
    }

    emit(ProgressEvent::new(
        Stage::Complete,
        100,
        format!(
            "{} processed, {} skipped, {} failed{}",
            summary.processed,
            summary.skipped,
            summary.failed.len(),
            if summary.cancelled { ", cancelled" } else { "" }
        ),
    ));
    Ok(summary)
}

fn percent_of(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(done * 100 / total).unwrap_or(100)
}

fn collect_audio_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = roots
        .iter()
        .flat_map(|root| {
            WalkDir::new(root)
                .follow_links(true)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| {
                    entry.path().extension().is_some_and(|extension| {
                        let extension = extension.to_string_lossy().to_lowercase();
                        AUDIO_EXTENSIONS.contains(&extension.as_str())
                    })
                })
                .map(walkdir::DirEntry::into_path)
        })
        .collect();
    files.sort();
    files.dedup();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collect_audio_files_filters_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("b.FLAC"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.wav"), b"x").unwrap();

        let root = dir.path().to_path_buf();
        // same root twice must not duplicate entries
        let files = collect_audio_files(&[root.clone(), root]);

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.mp3", "b.FLAC", "c.wav"]);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 10), 0);
        assert_eq!(percent_of(5, 10), 50);
        assert_eq!(percent_of(10, 10), 100);
        assert_eq!(percent_of(0, 0), 100);
    }
}
