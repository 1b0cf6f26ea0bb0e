use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::JwtService;
use crate::services::geocode::Geocoder;
use crate::services::strava::StravaClient;

pub mod bulk;
pub mod health;
pub mod oauth;
pub mod races;

/// Shared application state.
///
/// The geocoder sits behind its trait object because the import pipeline is
/// written (and tested) against the seam, not the Google client.
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub jwt: JwtService,
    pub strava: StravaClient,
    pub geocoder: Arc<dyn Geocoder>,
    /// Where bulk-import uploads are spooled.
    pub upload_dir: PathBuf,
}
