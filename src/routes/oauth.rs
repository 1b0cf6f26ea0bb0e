//! Strava OAuth sign-in.
//!
//! The front-end completes Strava's authorization redirect and posts the
//! resulting code here; we exchange it, upsert the athlete as a user, and
//! hand back a session token.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::queries::{self, UpsertUserParams};
use crate::errors::{AppError, ErrorResponse};

use super::AppState;

/// Request body for POST /api/v1/oauth.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OAuthRequest {
    /// The OAuth authorization code from Strava's redirect
    pub code: String,
}

/// The signed-in user plus their session token.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Unique user identifier
    pub id: Uuid,
    /// Strava athlete id
    pub strava_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    /// Bearer token for subsequent requests
    pub token: String,
}

/// Exchange a Strava OAuth code for a session token.
#[utoipa::path(
    post,
    path = "/api/v1/oauth",
    tag = "Auth",
    request_body = OAuthRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthenticatedUser),
        (status = 502, description = "Strava rejected the code or was unreachable", body = ErrorResponse),
    )
)]
pub async fn authenticate(
    State(state): State<AppState>,
    Json(body): Json<OAuthRequest>,
) -> Result<Json<AuthenticatedUser>, AppError> {
    let exchange = state.strava.exchange_code(&body.code).await?;
    let athlete = exchange.athlete;

    let user = queries::upsert_user(
        &state.pool,
        UpsertUserParams {
            strava_id: athlete.id,
            first_name: athlete.firstname,
            last_name: athlete.lastname,
            email_address: athlete.email,
            avatar_url: athlete.profile,
        },
    )
    .await?;

    tracing::info!("Creating JWT token for user: {}", user.id);
    let token = state.jwt.sign(&user)?;

    Ok(Json(AuthenticatedUser {
        id: user.id,
        strava_id: user.strava_id,
        first_name: user.first_name,
        last_name: user.last_name,
        email_address: user.email_address,
        avatar_url: user.avatar_url,
        is_admin: user.is_admin,
        token,
    }))
}
