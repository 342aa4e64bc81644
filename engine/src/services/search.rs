//! The similarity query pipeline.
//!
//! Local candidates come from the index, which over-fetches, filters by
//! threshold, and keeps the top `max_results` by index similarity (the
//! index rank is authoritative); the per-channel scorer is attached to
//! each survivor as explanatory side information. External catalog hits
//! are merged in afterwards, tagged by source, and the whole search is
//! recorded in the history table.

use std::{path::PathBuf, time::Duration};

use log::warn;
use serde::{Deserialize, Serialize};
use surrealdb::{Connection, Surreal};
use tokio::sync::RwLock;

use resona_analysis::Fingerprint;
use resona_core::{
    config::EngineSettings,
    progress::{ProgressCallback, ProgressEvent, Stage},
};
use resona_storage::db::schemas::{history::SearchRecord, track::Track};

use crate::{
    catalog::{CatalogManager, ExternalHit, ResultSource},
    errors::EngineResult,
    index::SimilarityIndex,
    scorer::{self, ChannelScores},
};

/// One result of a similarity query, local or external.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Set for local hits only.
    pub path: Option<PathBuf>,
    /// The authoritative ranking value: index cosine similarity for local
    /// hits, the adapter's own measure for external ones.
    pub similarity: f32,
    /// Per-channel explanation, local hits only.
    pub scores: Option<ChannelScores>,
    pub source: ResultSource,
}

impl From<ExternalHit> for SearchHit {
    #[inline]
    fn from(hit: ExternalHit) -> Self {
        Self {
            title: hit.title,
            artist: hit.artist,
            album: hit.album,
            path: None,
            similarity: hit.similarity,
            scores: None,
            source: hit.source,
        }
    }
}

/// The outcome of a similarity query. Partial success is normal: either
/// path can fail while the other still returns results, and the failures
/// are reported here rather than swallowed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    /// All hits, sorted by similarity descending.
    pub hits: Vec<SearchHit>,
    pub local_error: Option<String>,
    pub external_error: Option<String>,
}

/// Run a similarity query against the local index and/or the external
/// catalogs, per the configured search mode.
pub(crate) async fn search_similar<C: Connection>(
    db: &Surreal<C>,
    index: &RwLock<SimilarityIndex>,
    catalogs: &CatalogManager,
    settings: &EngineSettings,
    query: &Fingerprint,
    source_file: Option<String>,
    progress: &ProgressCallback,
) -> EngineResult<SearchOutcome> {
    let emit = |event: ProgressEvent| progress.as_ref()(event);
    emit(ProgressEvent::new(
        Stage::Searching,
        20,
        "searching local library",
    ));

    let mut outcome = SearchOutcome::default();

    if settings.search_mode.searches_local() {
        match local_search(db, index, settings, query).await {
            Ok(hits) => outcome.hits = hits,
            Err(e) => {
                warn!("local search failed: {e}");
                outcome.local_error = Some(e.to_string());
            }
        }
    }

    emit(ProgressEvent::new(
        Stage::ExternalApis,
        60,
        "querying external catalogs",
    ));

    if settings.search_mode.searches_external() {
        let (external, error) = catalogs.search_external(query, settings.max_results).await;
        outcome.external_error = error;
        outcome.hits.extend(external.into_iter().map(SearchHit::from));
    }

    outcome.hits.sort_unstable_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // history is best-effort; a failed record must not fail the search
    let results_json =
        serde_json::to_string(&outcome.hits).unwrap_or_else(|_| "[]".to_string());
    if let Err(e) = crate::with_deadline(
        Duration::from_secs(settings.io_timeout_secs),
        SearchRecord::create(db, SearchRecord::new(source_file, results_json)),
    )
    .await
    {
        warn!("failed to record search history: {e}");
    }

    emit(ProgressEvent::new(
        Stage::Complete,
        100,
        format!("{} results", outcome.hits.len()),
    ));
    Ok(outcome)
}

/// Over-fetch `2 * max_results` candidates from the index, drop everything
/// below the similarity threshold, attach channel scores from the stored
/// fingerprints, and keep the top `max_results` in index order.
async fn local_search<C: Connection>(
    db: &Surreal<C>,
    index: &RwLock<SimilarityIndex>,
    settings: &EngineSettings,
    query: &Fingerprint,
) -> EngineResult<Vec<SearchHit>> {
    let vector = query.to_vector();
    let candidates = index.read().await.search(&vector, 2 * settings.max_results)?;
    let io_timeout = Duration::from_secs(settings.io_timeout_secs);

    let mut hits = Vec::new();
    for (similarity, id) in candidates {
        if similarity < settings.threshold {
            continue;
        }
        // the index may briefly reference rows the store no longer has
        let Some(track) = crate::with_deadline(io_timeout, Track::read(db, id)).await? else {
            continue;
        };
        let scores = scorer::score(query, &track.fingerprint);
        hits.push(SearchHit {
            title: track.title,
            artist: track.artist,
            album: track.album,
            path: Some(track.path),
            similarity: similarity.max(0.),
            scores: Some(scores),
            source: ResultSource::Local,
        });
        if hits.len() == settings.max_results {
            break;
        }
    }
    Ok(hits)
}
