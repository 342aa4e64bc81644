//! Recommendation-by-features catalog client.
//!
//! Speaks the usual "target feature profile in, candidate tracks with
//! their own profiles out" recommendation contract, with client-credential
//! token auth. Every failure degrades to an empty result at the manager
//! level; this client only reports what went wrong.

use std::time::{Duration, Instant};

use log::debug;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::profile::{profile_similarity, CatalogProfile};
use super::{ExternalHit, ResultSource};
use crate::errors::{EngineError, EngineResult};

const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Refresh the token this long before it actually expires.
const TOKEN_SLACK: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct RecommendationsResponse {
    tracks: Vec<TrackEntry>,
}

#[derive(Debug, Deserialize)]
struct TrackEntry {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<NamedEntry>,
    #[serde(default)]
    album: Option<NamedEntry>,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    audio_features: Vec<Option<CatalogProfile>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client for the recommendation-by-features adapter.
pub struct FeaturesClient {
    client: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl FeaturesClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(client_id: String, client_secret: String, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        Ok(Self {
            client,
            api_base: std::env::var("RESONA_FEATURES_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            token_url: std::env::var("RESONA_FEATURES_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> EngineResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("refreshing catalog access token");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(map_transport_error)?
            .error_for_status()
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in)
                - TOKEN_SLACK.min(Duration::from_secs(token.expires_in)),
        });
        Ok(value)
    }

    /// Fetch up to `limit` recommendations near `target`, each scored with
    /// the reduced cross-system similarity.
    ///
    /// # Errors
    ///
    /// Returns an error on transport, auth, or parse failure; the caller
    /// degrades that to an empty result.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn recommend(
        &self,
        target: &CatalogProfile,
        limit: usize,
    ) -> EngineResult<Vec<ExternalHit>> {
        let token = self.access_token().await?;

        let params = [
            ("limit", limit.to_string()),
            ("target_acousticness", target.acousticness.to_string()),
            ("target_danceability", target.danceability.to_string()),
            ("target_energy", target.energy.to_string()),
            ("target_instrumentalness", target.instrumentalness.to_string()),
            ("target_liveness", target.liveness.to_string()),
            ("target_loudness", target.loudness.to_string()),
            ("target_speechiness", target.speechiness.to_string()),
            ("target_tempo", target.tempo.to_string()),
            ("target_valence", target.valence.to_string()),
        ];

        let recommendations: RecommendationsResponse = self
            .client
            .get(format!("{}/recommendations", self.api_base))
            .bearer_auth(&token)
            .query(&params)
            .send()
            .await
            .map_err(map_transport_error)?
            .error_for_status()
            .map_err(|e| EngineError::Catalog(e.to_string()))?
            .json()
            .await
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        if recommendations.tracks.is_empty() {
            return Ok(Vec::new());
        }

        let ids = recommendations
            .tracks
            .iter()
            .map(|t| t.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let features: AudioFeaturesResponse = self
            .client
            .get(format!("{}/audio-features", self.api_base))
            .bearer_auth(&token)
            .query(&[("ids", ids)])
            .send()
            .await
            .map_err(map_transport_error)?
            .error_for_status()
            .map_err(|e| EngineError::Catalog(e.to_string()))?
            .json()
            .await
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        let mut hits: Vec<ExternalHit> = recommendations
            .tracks
            .into_iter()
            .zip(
                features
                    .audio_features
                    .into_iter()
                    .chain(std::iter::repeat(None)),
            )
            .map(|(track, profile)| ExternalHit {
                title: track.name,
                artist: track
                    .artists
                    .into_iter()
                    .map(|a| a.name)
                    .collect::<Vec<_>>()
                    .join(", "),
                album: track.album.map(|a| a.name).unwrap_or_default(),
                similarity: profile_similarity(target, &profile.unwrap_or_default()),
                source: ResultSource::CatalogFeatures,
            })
            .collect();

        hits.sort_unstable_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

fn map_transport_error(e: reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::Timeout
    } else {
        EngineError::Catalog(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_recommendations_response_parses() {
        let json = r#"{
            "tracks": [
                {
                    "id": "abc123",
                    "name": "Some Track",
                    "artists": [{"name": "Artist A"}, {"name": "Artist B"}],
                    "album": {"name": "Some Album"},
                    "popularity": 55
                }
            ],
            "seeds": []
        }"#;
        let parsed: RecommendationsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0].id, "abc123");
        assert_eq!(parsed.tracks[0].artists.len(), 2);
        assert_eq!(parsed.tracks[0].album.as_ref().unwrap().name, "Some Album");
    }

    #[test]
    fn test_audio_features_response_parses_with_nulls() {
        let json = r#"{
            "audio_features": [
                {
                    "acousticness": 0.1,
                    "danceability": 0.8,
                    "energy": 0.9,
                    "instrumentalness": 0.0,
                    "liveness": 0.2,
                    "loudness": -5.5,
                    "speechiness": 0.05,
                    "tempo": 128.0,
                    "valence": 0.6,
                    "key": 5,
                    "mode": 1
                },
                null
            ]
        }"#;
        let parsed: AudioFeaturesResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.audio_features.len(), 2);
        let profile = parsed.audio_features[0].unwrap();
        assert_eq!(profile.tempo, 128.);
        assert!(parsed.audio_features[1].is_none());
    }

    #[test]
    fn test_token_response_parses() {
        let json = r#"{"access_token": "tok", "token_type": "Bearer", "expires_in": 3600}"#;
        let parsed: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "tok");
        assert_eq!(parsed.expires_in, 3600);
    }
}
