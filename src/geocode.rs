//! Reverse geocoding: coordinates to a road address.
//!
//! Resolution is best-effort. Any failure (transport, status, body shape)
//! collapses to an empty string so record persistence never waits on it.
//! There is exactly one attempt per fix.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::SurveyError;

// ---

#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Road address for the coordinate, or `""` when none could be found.
    async fn resolve(&self, lat: f64, lon: f64) -> String;
}

/// Used when no geocoder key is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

#[async_trait]
impl AddressResolver for NullResolver {
    async fn resolve(&self, _lat: f64, _lon: f64) -> String {
        String::new()
    }
}

/// Kakao Local `coord2address` client.
#[derive(Debug, Clone)]
pub struct KakaoResolver {
    // ---
    client: Client,
    url: String,
    api_key: String,
}

impl KakaoResolver {
    // ---
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        // ---
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    /// One lookup; errors are typed here and flattened by [`AddressResolver::resolve`].
    pub async fn lookup(&self, lat: f64, lon: f64) -> Result<String, SurveyError> {
        // ---
        let failure = |e: String| SurveyError::AddressResolution(e);

        // The service takes x = longitude, y = latitude.
        let response = self
            .client
            .get(&self.url)
            .query(&[("x", lon.to_string()), ("y", lat.to_string())])
            .header("Authorization", format!("KakaoAK {}", self.api_key))
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(format!("server returned {}: {}", status.as_u16(), body)));
        }

        let payload: Value = response.json().await.map_err(|e| failure(e.to_string()))?;
        debug!(%payload, "geocoder response");

        Ok(extract_address(&payload))
    }
}

#[async_trait]
impl AddressResolver for KakaoResolver {
    async fn resolve(&self, lat: f64, lon: f64) -> String {
        // ---
        match self.lookup(lat, lon).await {
            Ok(address) => {
                if address.is_empty() {
                    debug!(lat, lon, "geocoder returned no address");
                }
                address
            }
            Err(e) => {
                warn!(lat, lon, error = %e, "address lookup failed, continuing without address");
                String::new()
            }
        }
    }
}

/// Pull the address out of a `coord2address` payload.
///
/// Prefers `documents[0].road_address.address_name`, then the parcel address
/// `documents[0].address.address_name`. Any shape mismatch yields `""`.
pub fn extract_address(payload: &Value) -> String {
    // ---
    let first = payload
        .get("documents")
        .and_then(Value::as_array)
        .and_then(|docs| docs.first());

    let name_of = |key: &str| {
        first
            .and_then(|doc| doc.get(key))
            .and_then(|addr| addr.get("address_name"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    name_of("road_address")
        .or_else(|| name_of("address"))
        .unwrap_or_default()
        .to_string()
}
