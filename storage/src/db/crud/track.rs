//! CRUD operations for the track table

use serde::Deserialize;
use surrealdb::{Connection, RecordId, Surreal};

use crate::{
    db::{
        queries,
        schemas::track::{Track, TrackId, TABLE_NAME},
    },
    errors::{Error, StorageResult},
};

#[derive(Debug, Deserialize)]
struct CountRow {
    count: usize,
}

impl Track {
    /// Store a new track, deduplicating by content hash.
    ///
    /// If a track with the same `file_hash` already exists, nothing is
    /// written and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn create<C: Connection>(
        db: &Surreal<C>,
        track: Self,
    ) -> StorageResult<Option<Self>> {
        if Self::read_by_hash(db, &track.file_hash).await?.is_some() {
            return Ok(None);
        }

        let result: Option<Self> = db
            .create(RecordId::from_inner(track.id.clone()))
            .content(track)
            .await?;
        Ok(result)
    }

    /// Insert-or-replace keyed by path: an existing record at the same
    /// path keeps its id and `created_at`, everything else is replaced
    /// and `updated_at` is refreshed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or nothing is written.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn upsert_by_path<C: Connection>(
        db: &Surreal<C>,
        mut track: Self,
    ) -> StorageResult<Self> {
        if let Some(existing) = Self::read_by_path(db, &track.path.to_string_lossy()).await? {
            track.id = existing.id.clone();
            track.created_at = existing.created_at;
            track.updated_at = surrealdb::sql::Datetime::default();
            let updated: Option<Self> = db
                .update(RecordId::from_inner(existing.id))
                .content(track)
                .await?;
            updated.ok_or(Error::NotCreated)
        } else {
            Self::create(db, track).await?.ok_or(Error::NotCreated)
        }
    }

    /// # Errors
    ///
    /// Returns an error if the read fails.
    #[inline]
    pub async fn read<C: Connection>(db: &Surreal<C>, id: TrackId) -> StorageResult<Option<Self>> {
        Ok(db.select(RecordId::from_inner(id)).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the read fails.
    #[inline]
    pub async fn read_all<C: Connection>(db: &Surreal<C>) -> StorageResult<Vec<Self>> {
        Ok(db.select(TABLE_NAME).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the read fails.
    #[inline]
    pub async fn read_by_hash<C: Connection>(
        db: &Surreal<C>,
        hash: &str,
    ) -> StorageResult<Option<Self>> {
        Ok(db
            .query(queries::read_by_hash())
            .bind(("hash", hash.to_string()))
            .await?
            .take(0)?)
    }

    /// # Errors
    ///
    /// Returns an error if the read fails.
    #[inline]
    pub async fn read_by_path<C: Connection>(
        db: &Surreal<C>,
        path: &str,
    ) -> StorageResult<Option<Self>> {
        Ok(db
            .query(queries::read_by_path())
            .bind(("path", path.to_string()))
            .await?
            .take(0)?)
    }

    /// Number of stored tracks.
    ///
    /// # Errors
    ///
    /// Returns an error if the count query fails.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn count<C: Connection>(db: &Surreal<C>) -> StorageResult<usize> {
        let row: Option<CountRow> = db.query(queries::count_tracks()).await?.take(0)?;
        Ok(row.map_or(0, |r| r.count))
    }

    /// Delete a track.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    #[inline]
    pub async fn delete<C: Connection>(
        db: &Surreal<C>,
        id: TrackId,
    ) -> StorageResult<Option<Self>> {
        Ok(db.delete(RecordId::from_inner(id)).await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{db::init_test_database, metadata::TrackMetadata};

    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use resona_analysis::Fingerprint;

    fn arb_track(path: &str, hash: &str) -> Track {
        Track::new(
            path.into(),
            hash.to_string(),
            TrackMetadata {
                title: "Title".to_string(),
                artist: "Artist".to_string(),
                album: "Album".to_string(),
                duration: 123.4,
            },
            Fingerprint {
                tempo: 120.,
                energy: 0.5,
                ..Fingerprint::zeroed()
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_read() -> Result<()> {
        let db = init_test_database().await?;

        let track = arb_track("/music/a.flac", "hash-a");
        let result = Track::create(&db, track.clone()).await?;
        assert_eq!(result, Some(track.clone()));

        let result = Track::read(&db, track.id.clone()).await?;
        assert_eq!(result, Some(track));

        Ok(())
    }

    #[tokio::test]
    async fn test_create_deduplicates_by_hash() -> Result<()> {
        let db = init_test_database().await?;

        let track = arb_track("/music/a.flac", "hash-a");
        assert!(Track::create(&db, track).await?.is_some());

        // same bytes at a different path: no new row
        let duplicate = arb_track("/music/copy-of-a.flac", "hash-a");
        assert_eq!(Track::create(&db, duplicate).await?, None);

        assert_eq!(Track::count(&db).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_by_hash_and_path() -> Result<()> {
        let db = init_test_database().await?;

        let track = arb_track("/music/a.flac", "hash-a");
        Track::create(&db, track.clone()).await?;

        assert_eq!(
            Track::read_by_hash(&db, "hash-a").await?,
            Some(track.clone())
        );
        assert_eq!(Track::read_by_hash(&db, "hash-b").await?, None);
        assert_eq!(
            Track::read_by_path(&db, "/music/a.flac").await?,
            Some(track)
        );
        assert_eq!(Track::read_by_path(&db, "/music/b.flac").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_by_path_keeps_identity() -> Result<()> {
        let db = init_test_database().await?;

        let original = arb_track("/music/a.flac", "hash-a");
        Track::create(&db, original.clone()).await?;

        // retagged in place: new hash, same path
        let mut retagged = arb_track("/music/a.flac", "hash-a2");
        retagged.title = "Better Title".to_string();
        let updated = Track::upsert_by_path(&db, retagged).await?;

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_at, original.created_at);
        assert_eq!(updated.title, "Better Title");
        assert_eq!(updated.file_hash, "hash-a2");
        assert_eq!(Track::count(&db).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_by_path_creates_when_missing() -> Result<()> {
        let db = init_test_database().await?;

        let track = arb_track("/music/new.flac", "hash-new");
        let created = Track::upsert_by_path(&db, track.clone()).await?;
        assert_eq!(created, track);
        assert_eq!(Track::count(&db).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_read_all_and_delete() -> Result<()> {
        let db = init_test_database().await?;

        let a = arb_track("/music/a.flac", "hash-a");
        let b = arb_track("/music/b.flac", "hash-b");
        Track::create(&db, a.clone()).await?;
        Track::create(&db, b.clone()).await?;

        let mut all = Track::read_all(&db).await?;
        all.sort_by(|x, y| x.path.cmp(&y.path));
        assert_eq!(all, vec![a.clone(), b.clone()]);

        let deleted = Track::delete(&db, a.id.clone()).await?;
        assert_eq!(deleted, Some(a.clone()));
        assert_eq!(Track::count(&db).await?, 1);

        // deleting again is a no-op
        assert_eq!(Track::delete(&db, a.id).await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_fingerprint_survives_storage() -> Result<()> {
        let db = init_test_database().await?;

        let mut track = arb_track("/music/a.flac", "hash-a");
        track.fingerprint.mfcc_mean[3] = -42.5;
        track.fingerprint.key = resona_analysis::Key::Known {
            pitch_class: resona_analysis::PitchClass::A,
            mode: resona_analysis::Mode::Minor,
        };
        Track::create(&db, track.clone()).await?;

        let loaded = Track::read(&db, track.id.clone()).await?.unwrap();
        assert_eq!(loaded.fingerprint, track.fingerprint);
        assert_eq!(loaded.fingerprint.key.to_string(), "A minor");

        Ok(())
    }

    #[tokio::test]
    async fn test_count_empty() -> Result<()> {
        let db = init_test_database().await?;
        assert_eq!(Track::count(&db).await?, 0);
        Ok(())
    }
}
