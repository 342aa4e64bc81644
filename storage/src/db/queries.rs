//! The raw SurrealQL this crate runs: table definitions and the handful
//! of non-trivial queries the CRUD layer binds parameters into.

/// Schema DDL, idempotent so it can run on every startup.
pub const DEFINE_TABLES: &str = "
DEFINE TABLE IF NOT EXISTS track SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS path ON track TYPE string;
DEFINE FIELD IF NOT EXISTS file_hash ON track TYPE string;
DEFINE FIELD IF NOT EXISTS title ON track TYPE string;
DEFINE FIELD IF NOT EXISTS artist ON track TYPE string;
DEFINE FIELD IF NOT EXISTS album ON track TYPE string;
DEFINE FIELD IF NOT EXISTS duration ON track TYPE float;
DEFINE FIELD IF NOT EXISTS fingerprint ON track FLEXIBLE TYPE object;
DEFINE FIELD IF NOT EXISTS created_at ON track TYPE datetime;
DEFINE FIELD IF NOT EXISTS updated_at ON track TYPE datetime;
DEFINE INDEX IF NOT EXISTS track_path_index ON track FIELDS path UNIQUE;
DEFINE INDEX IF NOT EXISTS track_hash_index ON track FIELDS file_hash UNIQUE;

DEFINE TABLE IF NOT EXISTS search_history SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS source_file ON search_history TYPE option<string>;
DEFINE FIELD IF NOT EXISTS results ON search_history TYPE string;
DEFINE FIELD IF NOT EXISTS searched_at ON search_history TYPE datetime;
";

/// Fetch a single track by content hash.
#[must_use]
#[inline]
pub const fn read_by_hash() -> &'static str {
    "SELECT * FROM track WHERE file_hash = $hash LIMIT 1"
}

/// Fetch a single track by path.
#[must_use]
#[inline]
pub const fn read_by_path() -> &'static str {
    "SELECT * FROM track WHERE path = $path LIMIT 1"
}

/// Count the library.
#[must_use]
#[inline]
pub const fn count_tracks() -> &'static str {
    "SELECT count() AS count FROM track GROUP ALL"
}

/// The most recent searches, newest first.
#[must_use]
#[inline]
pub const fn recent_searches() -> &'static str {
    "SELECT * FROM search_history ORDER BY searched_at DESC LIMIT $limit"
}
