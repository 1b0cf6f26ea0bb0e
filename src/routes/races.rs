use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser};
use crate::db::queries::{InsertRaceParams, RaceSearch, UpdateRaceParams};
use crate::db::{models, queries};
use crate::errors::{AppError, ErrorResponse};
use crate::helpers::{dec_to_f64, f64_to_decimal_full, opt_dec_to_f64};

use super::AppState;

/// Response type for race endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct RaceResponse {
    /// Unique race identifier
    pub id: Uuid,
    /// Race name (e.g. "Boulder 10K")
    pub name: String,
    /// Race distance (unit is by club convention, typically kilometres)
    pub distance: f64,
    /// Free-text location (e.g. "Boulder, CO")
    pub location: Option<String>,
    /// Latitude (WGS84); null until the race has been geocoded
    pub latitude: Option<f64>,
    /// Longitude (WGS84); null until the race has been geocoded
    pub longitude: Option<f64>,
    /// Additional race attributes (imported CSV columns, etc.)
    pub attributes: serde_json::Value,
    /// Creation time in ISO 8601 / RFC 3339 format
    pub created_at: String,
    /// Last update time in ISO 8601 / RFC 3339 format
    pub updated_at: String,
}

impl From<models::Race> for RaceResponse {
    fn from(r: models::Race) -> Self {
        Self {
            id: r.id,
            name: r.name,
            distance: dec_to_f64(r.distance),
            location: r.location,
            latitude: opt_dec_to_f64(r.latitude),
            longitude: opt_dec_to_f64(r.longitude),
            attributes: r.attributes,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

/// Optional exact-match search filters for GET /api/v1/races.
#[derive(Debug, Deserialize, IntoParams)]
pub struct RaceSearchParams {
    /// Filter by exact race name
    pub name: Option<String>,
    /// Filter by exact distance
    pub distance: Option<String>,
    /// Filter by exact location
    pub location: Option<String>,
}

/// Request body for POST /api/v1/races.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRaceRequest {
    pub name: String,
    pub distance: f64,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub attributes: Option<serde_json::Value>,
}

/// Request body for PATCH /api/v1/races/:id. Absent fields are unchanged.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRaceRequest {
    pub name: Option<String>,
    pub distance: Option<f64>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub attributes: Option<serde_json::Value>,
}

/// A distance must survive the trip into NUMERIC; NaN/Inf never will.
fn parse_distance(distance: f64) -> Result<Decimal, AppError> {
    if !distance.is_finite() {
        return Err(AppError::BadRequest(
            "distance must be a finite number".to_string(),
        ));
    }
    Ok(f64_to_decimal_full(distance))
}

/// List races, optionally filtered.
#[utoipa::path(
    get,
    path = "/api/v1/races",
    tag = "Races",
    params(RaceSearchParams),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Matching races", body = Vec<RaceResponse>),
        (status = 400, description = "Invalid search criteria", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
    )
)]
pub async fn list_races(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<RaceSearchParams>,
) -> Result<Json<Vec<RaceResponse>>, AppError> {
    let distance = params
        .distance
        .as_deref()
        .map(Decimal::from_str)
        .transpose()
        .map_err(|_| AppError::BadRequest("Invalid search criteria".to_string()))?;

    let search = RaceSearch {
        name: params.name,
        distance,
        location: params.location,
    };

    let races = queries::search_races(&state.pool, &search).await?;
    let items: Vec<RaceResponse> = races.into_iter().map(RaceResponse::from).collect();
    Ok(Json(items))
}

/// Create a race.
#[utoipa::path(
    post,
    path = "/api/v1/races",
    tag = "Races",
    request_body = CreateRaceRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The created race", body = RaceResponse),
        (status = 400, description = "Invalid or conflicting race", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "Admin privileges required", body = ErrorResponse),
    )
)]
pub async fn create_race(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<CreateRaceRequest>,
) -> Result<Json<RaceResponse>, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    let distance = parse_distance(body.distance)?;

    let params = InsertRaceParams {
        name: body.name,
        distance,
        location: body.location,
        latitude: body.latitude.map(f64_to_decimal_full),
        longitude: body.longitude.map(f64_to_decimal_full),
        attributes: body
            .attributes
            .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
    };

    match queries::create_race(&state.pool, params).await {
        Ok(race) => Ok(Json(race.into())),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(AppError::BadRequest(
                "A race with this name and distance already exists".to_string(),
            ))
        }
        Err(e) => {
            tracing::error!("Failed to create race: {}", e);
            Err(e.into())
        }
    }
}

/// Partially update a race.
#[utoipa::path(
    patch,
    path = "/api/v1/races/{id}",
    tag = "Races",
    params(("id" = Uuid, Path, description = "Race UUID")),
    request_body = UpdateRaceRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The updated race", body = RaceResponse),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "Race not found", body = ErrorResponse),
    )
)]
pub async fn update_race(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateRaceRequest>,
) -> Result<Json<RaceResponse>, AppError> {
    let distance = body.distance.map(parse_distance).transpose()?;

    let params = UpdateRaceParams {
        name: body.name,
        distance,
        location: body.location,
        latitude: body.latitude.map(f64_to_decimal_full),
        longitude: body.longitude.map(f64_to_decimal_full),
        attributes: body.attributes,
    };

    let race = queries::update_race(&state.pool, id, params)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::BadRequest(
                "A race with this name and distance already exists".to_string(),
            ),
            other => other.into(),
        })?
        .ok_or_else(|| AppError::NotFound(format!("Race {} not found", id)))?;

    Ok(Json(race.into()))
}

/// Delete a race.
#[utoipa::path(
    delete,
    path = "/api/v1/races/{id}",
    tag = "Races",
    params(("id" = Uuid, Path, description = "Race UUID")),
    security(("bearer" = [])),
    responses(
        (status = 204, description = "Race deleted"),
        (status = 404, description = "Race not found", body = ErrorResponse),
    )
)]
pub async fn delete_race(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if queries::delete_race(&state.pool, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Race {} not found", id)))
    }
}
