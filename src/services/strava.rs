//! Strava OAuth token-exchange client.
//!
//! Exchanges the OAuth authorization code handed to the front-end for an
//! access token and the athlete's profile.
//! See: https://developers.strava.com/docs/authentication/

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Client for the Strava OAuth token endpoint.
#[derive(Debug, Clone)]
pub struct StravaClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    user_agent: String,
}

/// Request body for the token exchange.
#[derive(Debug, Serialize)]
struct TokenExchangeRequest<'a> {
    code: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Successful token-exchange response. Fields we don't use are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaTokenResponse {
    pub access_token: String,
    pub athlete: StravaAthlete,
}

/// The athlete profile embedded in the token response.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaAthlete {
    pub id: i64,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    /// Profile picture URL.
    pub profile: Option<String>,
}

impl StravaClient {
    pub fn new(client_id: &str, client_secret: &str, user_agent: &str) -> Self {
        Self::with_base_url(STRAVA_TOKEN_URL, client_id, client_secret, user_agent)
    }

    /// Construct against an alternative endpoint (tests point this at a mock).
    pub fn with_base_url(
        base_url: &str,
        client_id: &str,
        client_secret: &str,
        user_agent: &str,
    ) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Exchange an OAuth authorization code for an access token and athlete.
    ///
    /// A non-success status from Strava (rejected/expired code) and a
    /// transport failure both surface as `ExternalServiceError` — the caller
    /// answers 502 either way.
    pub async fn exchange_code(&self, code: &str) -> Result<StravaTokenResponse, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|e| AppError::InternalError(format!("Invalid User-Agent: {}", e)))?,
        );

        let body = TokenExchangeRequest {
            code,
            client_id: &self.client_id,
            client_secret: &self.client_secret,
        };

        tracing::debug!("Exchanging OAuth code with Strava");
        let response = self
            .client
            .post(&self.base_url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!(
                    "Failed to exchange OAuth code for access token: {}",
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            tracing::error!("Strava token exchange returned HTTP {}: {}", status, detail);
            return Err(AppError::ExternalServiceError(
                "Failed to exchange OAuth code for access token".to_string(),
            ));
        }

        response.json::<StravaTokenResponse>().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Strava response parse error: {}", e))
        })
    }
}
