//! Tag metadata extraction via lofty.
//!
//! Tags are best-effort: a missing or unreadable tag never fails an
//! ingest, it just degrades to filename-derived defaults.

use std::path::Path;

use lofty::{file::TaggedFileExt, prelude::*, probe::Probe, tag::Accessor};
use log::debug;

/// Container-format metadata for a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Seconds.
    pub duration: f32,
}

impl TrackMetadata {
    /// Read tags and properties from a file, degrading to defaults where
    /// anything is missing or malformed.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn load(path: &Path) -> Self {
        let fallback_title = path
            .file_stem()
            .map_or_else(|| "Unknown".to_string(), |s| s.to_string_lossy().into_owned());

        let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
            Ok(f) => f,
            Err(e) => {
                debug!("no readable tags in {}: {e}", path.display());
                return Self {
                    title: fallback_title,
                    artist: "Unknown".to_string(),
                    album: "Unknown".to_string(),
                    duration: 0.,
                };
            }
        };

        let duration = tagged_file.properties().duration().as_secs_f32();

        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag());

        let field = |value: Option<std::borrow::Cow<'_, str>>, fallback: &str| {
            value
                .map(|v| v.into_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };

        match tag {
            Some(tag) => Self {
                title: field(tag.title(), &fallback_title),
                artist: field(tag.artist(), "Unknown"),
                album: field(tag.album(), "Unknown"),
                duration,
            },
            None => Self {
                title: fallback_title,
                artist: "Unknown".to_string(),
                album: "Unknown".to_string(),
                duration,
            },
        }
    }
}
