pub mod geocode;
pub mod importer;
pub mod strava;
