//! External catalog adapters and the manager that owns them.
//!
//! Two adapters: recommendation-by-features (fingerprint mapped to a
//! target profile) and acoustic identification (raw audio bytes, signed).
//! Missing credentials silently disable an adapter at construction;
//! transport and parse failures degrade to empty results so a hybrid
//! search still returns local matches.

pub mod features;
pub mod ident;
pub mod profile;

use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use features::FeaturesClient;
use ident::IdentClient;
use profile::CatalogProfile;
use resona_analysis::Fingerprint;

/// Where a search hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Local,
    CatalogFeatures,
    CatalogIdent,
}

/// A candidate returned by an external catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalHit {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// 0..1, comparable with (but computed differently from) local index
    /// similarities.
    pub similarity: f32,
    pub source: ResultSource,
}

/// Environment variables holding the recommendation adapter credentials.
pub const FEATURES_ID_VAR: &str = "RESONA_FEATURES_CLIENT_ID";
pub const FEATURES_SECRET_VAR: &str = "RESONA_FEATURES_CLIENT_SECRET";
/// Environment variables holding the identification adapter credentials.
pub const IDENT_KEY_VAR: &str = "RESONA_IDENT_ACCESS_KEY";
pub const IDENT_SECRET_VAR: &str = "RESONA_IDENT_ACCESS_SECRET";

/// Owns whichever catalog adapters have credentials.
pub struct CatalogManager {
    features: Option<FeaturesClient>,
    ident: Option<IdentClient>,
}

impl CatalogManager {
    /// Build from environment credentials. Adapters without credentials
    /// are disabled, not errors.
    #[must_use]
    #[allow(clippy::missing_inline_in_public_items)]
    pub fn from_env(timeout: Duration) -> Self {
        let features = match (
            std::env::var(FEATURES_ID_VAR),
            std::env::var(FEATURES_SECRET_VAR),
        ) {
            (Ok(id), Ok(secret)) if !id.is_empty() && !secret.is_empty() => {
                match FeaturesClient::new(id, secret, timeout) {
                    Ok(client) => {
                        info!("recommendation catalog adapter enabled");
                        Some(client)
                    }
                    Err(e) => {
                        warn!("recommendation catalog adapter failed to initialize: {e}");
                        None
                    }
                }
            }
            _ => {
                let e = EngineError::Auth(format!(
                    "{FEATURES_ID_VAR} / {FEATURES_SECRET_VAR} not set"
                ));
                info!("recommendation catalog adapter disabled: {e}");
                None
            }
        };

        let ident = match (std::env::var(IDENT_KEY_VAR), std::env::var(IDENT_SECRET_VAR)) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => {
                match IdentClient::new(key, secret, timeout) {
                    Ok(client) => {
                        info!("acoustic identification adapter enabled");
                        Some(client)
                    }
                    Err(e) => {
                        warn!("acoustic identification adapter failed to initialize: {e}");
                        None
                    }
                }
            }
            _ => {
                let e = EngineError::Auth(format!(
                    "{IDENT_KEY_VAR} / {IDENT_SECRET_VAR} not set"
                ));
                info!("acoustic identification adapter disabled: {e}");
                None
            }
        };

        Self { features, ident }
    }

    /// A manager with every adapter disabled.
    #[must_use]
    #[inline]
    pub const fn disabled() -> Self {
        Self {
            features: None,
            ident: None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn any_enabled(&self) -> bool {
        self.features.is_some() || self.ident.is_some()
    }

    /// Query the recommendation adapter with a fingerprint-derived
    /// profile. Disabled or failing adapters yield an empty list; the
    /// error string reports the failure for the caller's partial-success
    /// reporting.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn search_external(
        &self,
        fingerprint: &Fingerprint,
        limit: usize,
    ) -> (Vec<ExternalHit>, Option<String>) {
        let Some(client) = &self.features else {
            return (Vec::new(), None);
        };

        let target = CatalogProfile::from(fingerprint);
        match client.recommend(&target, limit).await {
            Ok(hits) => (hits, None),
            Err(e) => {
                warn!("external catalog search failed: {e}");
                (Vec::new(), Some(e.to_string()))
            }
        }
    }

    /// Identify raw audio bytes via the identification adapter, if
    /// enabled.
    #[allow(clippy::missing_inline_in_public_items)]
    pub async fn identify(&self, audio: Vec<u8>) -> (Vec<ExternalHit>, Option<String>) {
        let Some(client) = &self.ident else {
            return (Vec::new(), None);
        };

        match client.identify(audio).await {
            Ok(hits) => (hits, None),
            Err(e) => {
                warn!("acoustic identification failed: {e}");
                (Vec::new(), Some(e.to_string()))
            }
        }
    }
}
