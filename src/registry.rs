//! Tax-registry lookups for GSTINs.
//!
//! [`GstRegistry`] is the seam the checks call through. [`RapidApiRegistry`]
//! talks to the GST Insights API, [`OfflineRegistry`] answers from the local
//! checksum alone, and [`CachingRegistry`] wraps either to keep repeat
//! lookups off the (quota-limited) API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{GstBackend, GstSection};
use crate::error::{AuditError, Result};
use crate::gstin;

/// Registry answer for one GSTIN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GstVerification {
    pub gstin: String,
    pub is_valid: bool,
    pub is_active: bool,
    pub legal_name: Option<String>,
    pub trade_name: Option<String>,
    pub status: Option<String>,
    pub state: Option<String>,
    pub registration_date: Option<String>,
    pub taxpayer_type: Option<String>,
}

#[async_trait]
pub trait GstRegistry: Send + Sync {
    async fn verify(&self, gstin: &str) -> Result<GstVerification>;
}

// ---------------------------------------------------------------------------
// RapidAPI GST Insights
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct InsightsRequest<'a> {
    gstin: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsightsResponse {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    active: bool,
    legal_name: Option<String>,
    trade_name: Option<String>,
    status: Option<String>,
    registration_date: Option<String>,
    state: Option<String>,
    taxpayer_type: Option<String>,
}

impl InsightsResponse {
    fn into_verification(self, gstin: &str) -> GstVerification {
        GstVerification {
            gstin: gstin.to_string(),
            is_valid: self.valid,
            is_active: self.active,
            legal_name: self.legal_name,
            trade_name: self.trade_name,
            status: self.status,
            state: self.state,
            registration_date: self.registration_date,
            taxpayer_type: self.taxpayer_type,
        }
    }
}

pub struct RapidApiRegistry {
    client: Client,
    url: String,
    host: String,
    api_key: String,
}

impl RapidApiRegistry {
    pub fn new(section: &GstSection, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: section.base_url.clone(),
            host: section.host.clone(),
            api_key,
        })
    }

    /// Build from config, reading the key from `RAPIDAPI_KEY`.
    pub fn from_env(section: &GstSection) -> Result<Self> {
        let api_key =
            std::env::var("RAPIDAPI_KEY").map_err(|_| AuditError::MissingEnv("RAPIDAPI_KEY"))?;
        Self::new(section, api_key)
    }
}

#[async_trait]
impl GstRegistry for RapidApiRegistry {
    async fn verify(&self, gstin: &str) -> Result<GstVerification> {
        info!(gstin = %gstin, url = %self.url, "Querying GST registry");

        let response = self
            .client
            .post(&self.url)
            .header("x-rapidapi-key", &self.api_key)
            .header("x-rapidapi-host", &self.host)
            .json(&InsightsRequest { gstin })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuditError::Registry(format!("status {status}: {body}")));
        }

        let body: InsightsResponse = response.json().await?;
        let verification = body.into_verification(gstin);
        info!(
            gstin = %gstin,
            valid = verification.is_valid,
            active = verification.is_active,
            legal_name = ?verification.legal_name,
            "Registry answered"
        );
        Ok(verification)
    }
}

// ---------------------------------------------------------------------------
// Offline
// ---------------------------------------------------------------------------

/// Checksum-only registry for runs without network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineRegistry;

#[async_trait]
impl GstRegistry for OfflineRegistry {
    async fn verify(&self, gstin: &str) -> Result<GstVerification> {
        let is_valid = gstin::validate(gstin).is_ok();
        Ok(GstVerification {
            gstin: gstin::normalize(gstin),
            is_valid,
            is_active: is_valid,
            legal_name: None,
            trade_name: None,
            status: Some("UNVERIFIED".to_string()),
            state: None,
            registration_date: None,
            taxpayer_type: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Caching
// ---------------------------------------------------------------------------

/// Memoizes successful lookups per normalized GSTIN. Errors are not cached.
pub struct CachingRegistry<R> {
    inner: R,
    cache: Mutex<HashMap<String, GstVerification>>,
}

impl<R: GstRegistry> CachingRegistry<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl<R: GstRegistry> GstRegistry for CachingRegistry<R> {
    async fn verify(&self, gstin: &str) -> Result<GstVerification> {
        let key = gstin::normalize(gstin);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!(gstin = %key, "Registry cache hit");
            return Ok(hit.clone());
        }

        let verification = self.inner.verify(&key).await?;
        self.cache.lock().await.insert(key, verification.clone());
        Ok(verification)
    }
}

/// Build the registry selected in config, wrapped in a cache.
pub fn from_config(section: &GstSection) -> Result<Box<dyn GstRegistry>> {
    match section.backend {
        GstBackend::Rapidapi => match RapidApiRegistry::from_env(section) {
            Ok(r) => Ok(Box::new(CachingRegistry::new(r))),
            Err(AuditError::MissingEnv(var)) => {
                warn!(var, "No registry key, falling back to offline checksum validation");
                Ok(Box::new(OfflineRegistry))
            }
            Err(e) => Err(e),
        },
        GstBackend::Offline => {
            info!("Using offline GST registry");
            Ok(Box::new(OfflineRegistry))
        }
    }
}
