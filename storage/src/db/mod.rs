pub mod crud;
pub mod queries;
pub mod schemas;

use surrealdb::{
    engine::local::{Db, Mem, SurrealKV},
    Connection, Surreal,
};

static DB_DIR: tokio::sync::OnceCell<std::path::PathBuf> = tokio::sync::OnceCell::const_new();
static TEMP_DB_DIR: once_cell::sync::Lazy<tempfile::TempDir> = once_cell::sync::Lazy::new(|| {
    tempfile::tempdir().expect("Failed to create temporary directory")
});

/// Set the path to the database.
///
/// # Errors
///
/// This function will return an error if the path cannot be set.
#[inline]
pub fn set_database_path(
    path: std::path::PathBuf,
) -> Result<(), tokio::sync::SetError<std::path::PathBuf>> {
    DB_DIR.set(path)?;
    log::info!("Primed database path");
    Ok(())
}

/// Initialize the on-disk database with the necessary tables.
///
/// # Errors
///
/// This function will return an error if the database cannot be initialized.
#[allow(clippy::missing_inline_in_public_items)]
pub async fn init_database() -> surrealdb::Result<Surreal<Db>> {
    let db = Surreal::new::<SurrealKV>(DB_DIR
        .get().cloned()
        .unwrap_or_else(|| {
            log::warn!("DB_DIR not set, defaulting to a temporary directory `{}`, this is likely a bug because `init_database` should be called before the db is used", TEMP_DB_DIR.path().display());
            TEMP_DB_DIR.path()
            .to_path_buf()
        })).await?;

    db.use_ns("resona").use_db("library").await?;

    register_tables(&db).await?;

    Ok(db)
}

/// Initialize an in-memory database with the same tables as the main
/// database. This is useful for testing queries and mutations.
///
/// # Errors
///
/// This function will return an error if the database cannot be initialized.
#[allow(clippy::missing_inline_in_public_items)]
pub async fn init_test_database() -> surrealdb::Result<Surreal<Db>> {
    let db = Surreal::new::<Mem>(()).await?;
    db.use_ns("test").use_db("test").await?;

    register_tables(&db).await?;

    Ok(db)
}

/// Run the schema DDL; idempotent.
async fn register_tables<C: Connection>(db: &Surreal<C>) -> surrealdb::Result<()> {
    db.query(queries::DEFINE_TABLES).await?.check()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_register_tables_is_idempotent() -> anyhow::Result<()> {
        let db = Surreal::new::<Mem>(()).await?;
        db.use_ns("test").use_db("test").await?;

        // first run creates the schema, the second must not disturb it
        register_tables(&db).await?;
        register_tables(&db).await?;

        Ok(())
    }
}
