// Cairn API v0.1
use axum::routing::{get, patch, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod db;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use routes::bulk::BULK_RESULTS_HEADER;
use routes::AppState;
use services::geocode::{Geocoder, GoogleGeocoder};
use services::strava::StravaClient;

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 2;

/// Cairn API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Cairn API",
        version = "0.1.0",
        description = "Race-listing API. Signs users in via Strava OAuth, issues \
            session tokens, and manages race records including bulk CSV import \
            with geocode enrichment.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Auth", description = "Strava OAuth sign-in"),
        (name = "Races", description = "Race listing, management and bulk import"),
    ),
    paths(
        routes::health::health_check,
        routes::oauth::authenticate,
        routes::races::list_races,
        routes::races::create_race,
        routes::races::update_race,
        routes::races::delete_race,
        routes::bulk::bulk_import_races,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::oauth::OAuthRequest,
            routes::oauth::AuthenticatedUser,
            routes::races::RaceResponse,
            routes::races::CreateRaceRequest,
            routes::races::UpdateRaceRequest,
            errors::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

/// Registers the bearer-token scheme referenced by the protected paths.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cairn_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();

    // Set up database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(DB_POOL_MAX_CONNECTIONS)
        .min_connections(DB_POOL_MIN_CONNECTIONS)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // External collaborators
    let strava = StravaClient::new(
        &config.strava_client_id,
        &config.strava_client_secret,
        &config.user_agent,
    );
    let geocoder: Arc<dyn Geocoder> =
        Arc::new(GoogleGeocoder::new(&config.google_maps_key, &config.user_agent));

    let state = AppState {
        pool,
        jwt: auth::JwtService::new(&config.jwt_secret),
        strava,
        geocoder,
        upload_dir: config.upload_dir.clone().into(),
    };

    // CORS — expose the bulk-import result header to browser clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers(Any)
        .expose_headers([BULK_RESULTS_HEADER
            .parse::<axum::http::HeaderName>()
            .unwrap()]);

    // Build router
    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/oauth", post(routes::oauth::authenticate))
        .route(
            "/api/v1/races",
            get(routes::races::list_races).post(routes::races::create_race),
        )
        .route("/api/v1/races/bulk", post(routes::bulk::bulk_import_races))
        .route(
            "/api/v1/races/:id",
            patch(routes::races::update_race).delete(routes::races::delete_race),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
