//! Acoustic identification catalog client.
//!
//! Uploads raw audio bytes with an HMAC-SHA1 request signature and maps
//! the service's 0..100 confidence score onto the engine's 0..1
//! similarity scale.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use log::warn;
use serde::Deserialize;
use sha1::Sha1;

use super::{ExternalHit, ResultSource};
use crate::errors::{EngineError, EngineResult};

type HmacSha1 = Hmac<Sha1>;

const DEFAULT_HOST: &str = "identify-us-west-2.acrcloud.com";
const ENDPOINT: &str = "/v1/identify";

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    status: Status,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Status {
    code: i32,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    music: Vec<MusicEntry>,
}

#[derive(Debug, Deserialize)]
struct MusicEntry {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artists: Vec<NamedEntry>,
    #[serde(default)]
    album: Option<NamedEntry>,
    #[serde(default)]
    score: f32,
}

#[derive(Debug, Deserialize)]
struct NamedEntry {
    #[serde(default)]
    name: String,
}

/// Client for the acoustic-identification adapter.
pub struct IdentClient {
    client: reqwest::Client,
    host: String,
    access_key: String,
    access_secret: String,
}

impl IdentClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn new(access_key: String, access_secret: String, timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        Ok(Self {
            client,
            host: std::env::var("RESONA_IDENT_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            access_key,
            access_secret,
        })
    }

    /// Base64 HMAC-SHA1 over the canonical request string.
    fn signature(access_key: &str, access_secret: &str, timestamp: u64) -> String {
        let string_to_sign =
            format!("POST\n{ENDPOINT}\n{access_key}\naudio\n1\n{timestamp}");

        let mut mac = HmacSha1::new_from_slice(access_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(string_to_sign.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Identify a clip of raw audio bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on transport or parse failure; the caller degrades
    /// that to an empty result.
    #[allow(clippy::missing_panics_doc)]
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn identify(&self, audio: Vec<u8>) -> EngineResult<Vec<ExternalHit>> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let signature = Self::signature(&self.access_key, &self.access_secret, timestamp);
        let sample_bytes = audio.len();

        let form = reqwest::multipart::Form::new()
            .part("sample", reqwest::multipart::Part::bytes(audio))
            .text("access_key", self.access_key.clone())
            .text("sample_bytes", sample_bytes.to_string())
            .text("timestamp", timestamp.to_string())
            .text("signature", signature)
            .text("data_type", "audio")
            .text("signature_version", "1");

        let response: IdentifyResponse = self
            .client
            .post(format!("https://{}{ENDPOINT}", self.host))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::Catalog(e.to_string())
                }
            })?
            .json()
            .await
            .map_err(|e| EngineError::Catalog(e.to_string()))?;

        if response.status.code != 0 {
            warn!(
                "acoustic identification refused: {} ({})",
                response.status.msg, response.status.code
            );
            return Ok(Vec::new());
        }

        Ok(response
            .metadata
            .map(|m| m.music)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| ExternalHit {
                title: entry.title,
                artist: entry
                    .artists
                    .into_iter()
                    .map(|a| a.name)
                    .collect::<Vec<_>>()
                    .join(", "),
                album: entry.album.map(|a| a.name).unwrap_or_default(),
                similarity: (entry.score / 100.).clamp(0., 1.),
                source: ResultSource::CatalogIdent,
            })
            .collect())
    }
}
