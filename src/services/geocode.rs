//! Free-text location geocoding.
//!
//! The bulk importer only needs "coordinates or not" per location, so the
//! provider sits behind the `Geocoder` trait and tests run the import
//! pipeline against fakes. The real implementation talks to the Google Maps
//! Geocoding API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

use crate::errors::AppError;

const GEOCODE_API_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// An unresponsive geocoder must not stall the whole import, so every
/// request is bounded.
const GEOCODE_TIMEOUT_SECS: u64 = 10;

/// A resolved coordinate pair (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Resolves a free-text location into coordinates.
///
/// `Ok(None)` means the provider answered but had no usable result for this
/// location; `Err` means the provider itself failed. The importer treats both
/// as "no coordinates" for the row at hand.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, location: &str) -> Result<Option<Coordinates>, AppError>;
}

/// Client for the Google Maps Geocoding API.
#[derive(Debug, Clone)]
pub struct GoogleGeocoder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    user_agent: String,
}

// --- Google geocode JSON response types ---

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Option<GeocodeGeometry>,
}

#[derive(Debug, Deserialize)]
struct GeocodeGeometry {
    location: Option<GeocodeLocation>,
}

#[derive(Debug, Deserialize)]
struct GeocodeLocation {
    lat: f64,
    lng: f64,
}

impl GoogleGeocoder {
    pub fn new(api_key: &str, user_agent: &str) -> Self {
        Self::with_base_url(GEOCODE_API_URL, api_key, user_agent)
    }

    /// Construct against an alternative endpoint (tests point this at a mock).
    pub fn with_base_url(base_url: &str, api_key: &str, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(GEOCODE_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            user_agent: user_agent.to_string(),
        }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, location: &str) -> Result<Option<Coordinates>, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| AppError::InternalError(format!("Invalid User-Agent: {}", e)))?,
        );

        let response = self
            .client
            .get(&self.base_url)
            .headers(headers)
            .query(&[("address", location), ("key", &self.api_key)])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("Geocode request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "Geocode service returned HTTP {}",
                response.status()
            )));
        }

        let body: GeocodeResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Geocode response parse error: {}", e))
        })?;

        // The API reports quota/key problems as an error_message inside a 200
        // body. Treated as "no coordinates", same as an empty result set.
        if let Some(message) = body.error_message {
            tracing::warn!("Failed to load lat/lng for '{}': {}", location, message);
            return Ok(None);
        }

        let coordinates = body
            .results
            .into_iter()
            .next()
            .and_then(|r| r.geometry)
            .and_then(|g| g.location)
            .map(|l| Coordinates {
                latitude: l.lat,
                longitude: l.lng,
            });

        Ok(coordinates)
    }
}
