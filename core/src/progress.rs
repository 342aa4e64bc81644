//! Progress reporting for long-running operations.
//!
//! The engine pushes ordered [`ProgressEvent`]s through a caller-supplied
//! callback while scanning a library or running a similarity query. Events
//! carry a stage, a percentage that never decreases within one operation,
//! and a human-readable detail (usually the file currently being worked
//! on). Transport is the caller's choice; [`crate::udp`] provides a
//! broadcast implementation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Where a long-running operation currently is.
///
/// Library scans move `Scanning -> Processing -> Complete`; similarity
/// queries move `Searching -> ExternalApis -> Complete`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Enumerating media files on disk.
    Scanning,
    /// Decoding, fingerprinting, and persisting files.
    Processing,
    /// Querying the local index.
    Searching,
    /// Querying external catalog services.
    ExternalApis,
    /// The operation finished (possibly partially, see the detail).
    Complete,
}

/// One progress tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 0..=100, monotonically non-decreasing within one operation.
    pub percent: u8,
    pub detail: String,
}

impl ProgressEvent {
    #[must_use]
    #[inline]
    pub fn new(stage: Stage, percent: u8, detail: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            detail: detail.into(),
        }
    }
}

/// Callback the engine invokes for every progress tick.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// A callback that discards every event.
#[must_use]
#[inline]
pub fn noop_progress() -> ProgressCallback {
    Arc::new(|_| {})
}
