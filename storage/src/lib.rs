//! Persistent storage for the resona library: track records (metadata +
//! fingerprint), deduplicated by content hash, plus the search history.
//!
//! Backed by embedded SurrealDB: SurrealKV on disk in production, the
//! in-memory engine in tests. The index in `resona-engine` is derived
//! state; everything needed to rebuild it lives here.

pub mod db;
pub mod errors;
pub mod metadata;
pub mod util;
