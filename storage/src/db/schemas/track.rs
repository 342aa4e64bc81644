#![allow(clippy::module_name_repetitions)]
//----------------------------------------------------------------------------------------- std lib
use std::path::PathBuf;
//--------------------------------------------------------------------------------- other libraries
use serde::{Deserialize, Serialize};
use surrealdb::sql::{Datetime, Id, Thing};
//----------------------------------------------------------------------------------- local modules
use resona_analysis::Fingerprint;

use crate::metadata::TrackMetadata;

pub type TrackId = Thing;

pub const TABLE_NAME: &str = "track";

/// A library track: file identity, tag metadata, and the acoustic
/// fingerprint extracted from its audio.
///
/// `path` and `file_hash` are both unique; the hash is the deduplication
/// key (re-ingesting identical bytes is a no-op), the path supports
/// upserts when a file is retagged in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// The unique identifier for this [`Track`].
    pub id: TrackId,
    /// Where the file lives on disk. Unique.
    pub path: PathBuf,
    /// SHA-256 of the file's bytes, lowercase hex. Unique.
    pub file_hash: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Runtime in seconds.
    pub duration: f32,
    /// The acoustic fingerprint; immutable once stored.
    pub fingerprint: Fingerprint,
    pub created_at: Datetime,
    pub updated_at: Datetime,
}

impl Track {
    #[must_use]
    #[inline]
    pub fn generate_id() -> TrackId {
        Thing::from((TABLE_NAME, Id::ulid()))
    }

    /// Assemble a new record with fresh timestamps.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(
        path: PathBuf,
        file_hash: String,
        metadata: TrackMetadata,
        fingerprint: Fingerprint,
    ) -> Self {
        let now = Datetime::default();
        Self {
            id: Self::generate_id(),
            path,
            file_hash,
            title: metadata.title,
            artist: metadata.artist,
            album: metadata.album,
            duration: metadata.duration,
            fingerprint,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// The slice of a [`Track`] that query results carry around.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackBrief {
    pub id: TrackId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub path: PathBuf,
}

impl From<&Track> for TrackBrief {
    #[inline]
    fn from(track: &Track) -> Self {
        Self {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            path: track.path.clone(),
        }
    }
}
