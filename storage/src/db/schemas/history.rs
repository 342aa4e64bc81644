#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use surrealdb::sql::{Datetime, Id, Thing};

pub type SearchRecordId = Thing;

pub const TABLE_NAME: &str = "search_history";

/// One similarity query and its results, kept for later inspection.
///
/// Retention is unbounded, like the library itself; prune externally if
/// the table grows unwieldy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub id: SearchRecordId,
    /// The file the query fingerprint came from, when known.
    pub source_file: Option<String>,
    /// JSON-encoded result list.
    pub results: String,
    pub searched_at: Datetime,
}

impl SearchRecord {
    #[must_use]
    #[inline]
    pub fn generate_id() -> SearchRecordId {
        Thing::from((TABLE_NAME, Id::ulid()))
    }

    #[must_use]
    #[inline]
    pub fn new(source_file: Option<String>, results: String) -> Self {
        Self {
            id: Self::generate_id(),
            source_file,
            results,
            searched_at: Datetime::default(),
        }
    }
}
