//! CRUD operations for the search history table

use surrealdb::{Connection, RecordId, Surreal};

use crate::{
    db::{
        queries,
        schemas::history::{SearchRecord, TABLE_NAME},
    },
    errors::StorageResult,
};

impl SearchRecord {
    /// Record a search.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn create<C: Connection>(
        db: &Surreal<C>,
        record: Self,
    ) -> StorageResult<Option<Self>> {
        let result: Option<Self> = db
            .create(RecordId::from_inner(record.id.clone()))
            .content(record)
            .await?;
        Ok(result)
    }

    /// # Errors
    ///
    /// Returns an error if the read fails.
    #[inline]
    pub async fn read_all<C: Connection>(db: &Surreal<C>) -> StorageResult<Vec<Self>> {
        Ok(db.select(TABLE_NAME).await?)
    }

    /// The `limit` most recent searches, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    #[inline]
    pub async fn read_recent<C: Connection>(
        db: &Surreal<C>,
        limit: usize,
    ) -> StorageResult<Vec<Self>> {
        Ok(db
            .query(queries::recent_searches())
            .bind(("limit", limit))
            .await?
            .take(0)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::init_test_database;

    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_create_and_read_all() -> Result<()> {
        let db = init_test_database().await?;

        let record = SearchRecord::new(Some("/music/a.flac".into()), "[]".into());
        let created = SearchRecord::create(&db, record.clone()).await?;
        assert_eq!(created, Some(record.clone()));

        assert_eq!(SearchRecord::read_all(&db).await?, vec![record]);
        Ok(())
    }

    #[tokio::test]
    async fn test_read_recent_orders_and_limits() -> Result<()> {
        let db = init_test_database().await?;

        for i in 0..5 {
            let record = SearchRecord::new(Some(format!("/music/{i}.flac")), "[]".into());
            SearchRecord::create(&db, record).await?;
            // Datetime has millisecond precision; keep timestamps distinct
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let recent = SearchRecord::read_recent(&db, 3).await?;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].source_file.as_deref(), Some("/music/4.flac"));
        assert_eq!(recent[2].source_file.as_deref(), Some("/music/2.flac"));
        Ok(())
    }

    #[tokio::test]
    async fn test_source_file_is_optional() -> Result<()> {
        let db = init_test_database().await?;
        let record = SearchRecord::new(None, "[]".into());
        let created = SearchRecord::create(&db, record).await?.unwrap();
        assert_eq!(created.source_file, None);
        Ok(())
    }
}
