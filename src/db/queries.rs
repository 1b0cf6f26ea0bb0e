use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Race, User};

/// Profile fields taken from the Strava athlete on sign-in.
pub struct UpsertUserParams {
    pub strava_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
    pub avatar_url: Option<String>,
}

/// Parameters for inserting a new race record.
pub struct InsertRaceParams {
    pub name: String,
    pub distance: Decimal,
    pub location: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub attributes: serde_json::Value,
}

/// Optional exact-match filters for race search.
#[derive(Debug, Default)]
pub struct RaceSearch {
    pub name: Option<String>,
    pub distance: Option<Decimal>,
    pub location: Option<String>,
}

/// Partial update for a race. `None` fields are left unchanged.
#[derive(Debug, Default)]
pub struct UpdateRaceParams {
    pub name: Option<String>,
    pub distance: Option<Decimal>,
    pub location: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub attributes: Option<serde_json::Value>,
}

/// Insert a user on first sign-in, or refresh profile fields on return visits.
/// Keyed on strava_id; is_admin is never touched by the upsert.
pub async fn upsert_user(pool: &PgPool, params: UpsertUserParams) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "INSERT INTO users (id, strava_id, first_name, last_name, email_address, avatar_url)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (strava_id) DO UPDATE
         SET first_name = EXCLUDED.first_name,
             last_name = EXCLUDED.last_name,
             email_address = COALESCE(EXCLUDED.email_address, users.email_address),
             avatar_url = EXCLUDED.avatar_url,
             updated_at = NOW()
         RETURNING id, strava_id, first_name, last_name, email_address, avatar_url,
                   is_admin, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(params.strava_id)
    .bind(&params.first_name)
    .bind(&params.last_name)
    .bind(&params.email_address)
    .bind(&params.avatar_url)
    .fetch_one(pool)
    .await
}

/// Search races with optional exact-match filters, ordered by name.
pub async fn search_races(pool: &PgPool, search: &RaceSearch) -> Result<Vec<Race>, sqlx::Error> {
    sqlx::query_as::<_, Race>(
        "SELECT id, name, distance, location, latitude, longitude, attributes,
                created_at, updated_at
         FROM races
         WHERE ($1::text IS NULL OR name = $1)
           AND ($2::numeric IS NULL OR distance = $2)
           AND ($3::text IS NULL OR location = $3)
         ORDER BY name",
    )
    .bind(&search.name)
    .bind(search.distance)
    .bind(&search.location)
    .fetch_all(pool)
    .await
}

/// Find races matching a (name, distance) pair — the bulk importer's
/// existence check.
pub async fn find_races_by_name_distance(
    pool: &PgPool,
    name: &str,
    distance: Decimal,
) -> Result<Vec<Race>, sqlx::Error> {
    let search = RaceSearch {
        name: Some(name.to_string()),
        distance: Some(distance),
        location: None,
    };
    search_races(pool, &search).await
}

/// Insert a new race. Fails on a (name, distance) conflict.
pub async fn create_race(pool: &PgPool, params: InsertRaceParams) -> Result<Race, sqlx::Error> {
    sqlx::query_as::<_, Race>(
        "INSERT INTO races (id, name, distance, location, latitude, longitude, attributes)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, name, distance, location, latitude, longitude, attributes,
                   created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(&params.name)
    .bind(params.distance)
    .bind(&params.location)
    .bind(params.latitude)
    .bind(params.longitude)
    .bind(&params.attributes)
    .fetch_one(pool)
    .await
}

/// Insert a race unless its (name, distance) pair already exists.
///
/// Returns `None` when the unique index swallowed the insert — this is how
/// two identical in-flight import rows resolve to a single insertion.
pub async fn insert_race_if_absent(
    pool: &PgPool,
    params: InsertRaceParams,
) -> Result<Option<Race>, sqlx::Error> {
    sqlx::query_as::<_, Race>(
        "INSERT INTO races (id, name, distance, location, latitude, longitude, attributes)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (name, distance) DO NOTHING
         RETURNING id, name, distance, location, latitude, longitude, attributes,
                   created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(&params.name)
    .bind(params.distance)
    .bind(&params.location)
    .bind(params.latitude)
    .bind(params.longitude)
    .bind(&params.attributes)
    .fetch_optional(pool)
    .await
}

/// Partially update a race. Returns `None` if the id does not exist.
pub async fn update_race(
    pool: &PgPool,
    id: Uuid,
    params: UpdateRaceParams,
) -> Result<Option<Race>, sqlx::Error> {
    sqlx::query_as::<_, Race>(
        "UPDATE races
         SET name = COALESCE($2, name),
             distance = COALESCE($3, distance),
             location = COALESCE($4, location),
             latitude = COALESCE($5, latitude),
             longitude = COALESCE($6, longitude),
             attributes = COALESCE($7, attributes),
             updated_at = NOW()
         WHERE id = $1
         RETURNING id, name, distance, location, latitude, longitude, attributes,
                   created_at, updated_at",
    )
    .bind(id)
    .bind(&params.name)
    .bind(params.distance)
    .bind(&params.location)
    .bind(params.latitude)
    .bind(params.longitude)
    .bind(&params.attributes)
    .fetch_optional(pool)
    .await
}

/// Delete a race. Returns false if the id did not exist.
pub async fn delete_race(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM races WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
