//! Bulk race import pipeline.
//!
//! Consumes an uploaded CSV file and, for each row, runs an independent
//! existence-check → geocode → insert chain against the store and geocoder
//! collaborators. Rows are read in file order but their chains run
//! concurrently; every row task handle is collected and awaited after
//! end-of-input, so the reported insertion count covers all in-flight rows.
//!
//! Per-row problems (duplicate, no coordinates, insert failure) are logged
//! skips and never abort the stream. Only a failure reading the CSV stream
//! itself is fatal — and even then the uploaded file is still removed.

use async_trait::async_trait;
use csv_async::{AsyncReaderBuilder, StringRecord};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::db::models::Race;
use crate::db::queries::{self, InsertRaceParams};
use crate::errors::AppError;
use crate::helpers::f64_to_decimal_full;
use crate::services::geocode::{Coordinates, Geocoder};

// ---------------------------------------------------------------------------
// Collaborator seam
// ---------------------------------------------------------------------------

/// Race persistence as the importer sees it.
#[async_trait]
pub trait RaceStore: Send + Sync {
    /// Races already in the store matching a (name, distance) pair.
    async fn find_by_name_distance(
        &self,
        name: &str,
        distance: Decimal,
    ) -> Result<Vec<Race>, AppError>;

    /// Insert unless the (name, distance) pair exists. Returns whether a row
    /// was actually inserted; a swallowed duplicate is `Ok(false)`.
    async fn insert(&self, race: &HydratedRace) -> Result<bool, AppError>;
}

/// `RaceStore` backed by the races table.
#[derive(Clone)]
pub struct PgRaceStore {
    pool: PgPool,
}

impl PgRaceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RaceStore for PgRaceStore {
    async fn find_by_name_distance(
        &self,
        name: &str,
        distance: Decimal,
    ) -> Result<Vec<Race>, AppError> {
        Ok(queries::find_races_by_name_distance(&self.pool, name, distance).await?)
    }

    async fn insert(&self, race: &HydratedRace) -> Result<bool, AppError> {
        let inserted = queries::insert_race_if_absent(
            &self.pool,
            InsertRaceParams {
                name: race.name.clone(),
                distance: race.distance,
                location: Some(race.location.clone()),
                latitude: Some(race.latitude),
                longitude: Some(race.longitude),
                attributes: serde_json::Value::Object(race.attributes.clone()),
            },
        )
        .await?;
        Ok(inserted.is_some())
    }
}

// ---------------------------------------------------------------------------
// Row records
// ---------------------------------------------------------------------------

/// One CSV row, parsed but not yet geocoded.
#[derive(Debug, Clone)]
pub struct RaceCandidate {
    pub name: String,
    pub distance: Decimal,
    pub location: String,
    /// Columns beyond name/distance/location, passed through unchanged.
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A candidate enriched with resolved coordinates, ready for insertion.
#[derive(Debug, Clone)]
pub struct HydratedRace {
    pub name: String,
    pub distance: Decimal,
    pub location: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl RaceCandidate {
    /// Build a candidate from a CSV record, or explain why the row is skipped.
    fn from_record(columns: &ColumnMap, record: &StringRecord) -> Result<Self, String> {
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let name = field(columns.name);
        if name.is_empty() {
            return Err("missing name".to_string());
        }

        let distance_text = field(columns.distance);
        let distance = Decimal::from_str(distance_text)
            .map_err(|_| format!("unparseable distance '{}'", distance_text))?;

        let location = field(columns.location);
        if location.is_empty() {
            return Err("missing location".to_string());
        }

        let mut attributes = serde_json::Map::new();
        for (idx, header) in &columns.extras {
            let value = record.get(*idx).unwrap_or("");
            attributes.insert(
                header.clone(),
                serde_json::Value::String(value.to_string()),
            );
        }

        Ok(Self {
            name: name.to_string(),
            distance,
            location: location.to_string(),
            attributes,
        })
    }

    fn hydrate(self, coordinates: Coordinates) -> HydratedRace {
        HydratedRace {
            name: self.name,
            distance: self.distance,
            location: self.location,
            latitude: f64_to_decimal_full(coordinates.latitude),
            longitude: f64_to_decimal_full(coordinates.longitude),
            attributes: self.attributes,
        }
    }
}

/// Column positions resolved from the CSV header row.
struct ColumnMap {
    name: usize,
    distance: usize,
    location: usize,
    /// (index, header) for every other column.
    extras: Vec<(usize, String)>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self, AppError> {
        let position = |wanted: &str| headers.iter().position(|h| h.trim() == wanted);

        let name = position("name")
            .ok_or_else(|| AppError::BadRequest("CSV is missing a 'name' column".to_string()))?;
        let distance = position("distance").ok_or_else(|| {
            AppError::BadRequest("CSV is missing a 'distance' column".to_string())
        })?;
        let location = position("location").ok_or_else(|| {
            AppError::BadRequest("CSV is missing a 'location' column".to_string())
        })?;

        let extras = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != name && *idx != distance && *idx != location)
            .map(|(idx, h)| (idx, h.trim().to_string()))
            .collect();

        Ok(Self {
            name,
            distance,
            location,
            extras,
        })
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// What a finished import reports back.
#[derive(Debug)]
pub struct ImportOutcome {
    /// Rows read from the CSV (accepted or not).
    pub rows: usize,
    /// Rows actually inserted.
    pub inserted: usize,
}

/// Import a spooled upload, then remove the file.
///
/// The file is removed exactly once, whether the stream was fully consumed or
/// errored partway.
pub async fn import_csv_file(
    path: &Path,
    store: Arc<dyn RaceStore>,
    geocoder: Arc<dyn Geocoder>,
) -> Result<ImportOutcome, AppError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        AppError::InternalError(format!("Failed to open upload {}: {}", path.display(), e))
    })?;

    let result = import_csv(file, store, geocoder).await;

    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to remove upload {}: {}", path.display(), e);
    }

    result
}

/// Run the row pipeline over a CSV byte stream with a header row.
pub async fn import_csv<R>(
    reader: R,
    store: Arc<dyn RaceStore>,
    geocoder: Arc<dyn Geocoder>,
) -> Result<ImportOutcome, AppError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut csv_reader = AsyncReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .create_reader(reader);

    let headers = csv_reader
        .headers()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read CSV header row: {}", e)))?
        .clone();
    let columns = ColumnMap::from_headers(&headers)?;

    // Owned by this invocation; concurrent requests each get their own.
    let inserted = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    let mut record = StringRecord::new();
    let mut rows = 0usize;
    let mut stream_error = None;

    loop {
        match csv_reader.read_record(&mut record).await {
            Ok(true) => {
                rows += 1;
                match RaceCandidate::from_record(&columns, &record) {
                    Ok(candidate) => {
                        handles.push(tokio::spawn(process_row(
                            candidate,
                            store.clone(),
                            geocoder.clone(),
                            inserted.clone(),
                        )));
                    }
                    Err(reason) => {
                        tracing::warn!("Skipping row {}: {}", rows, reason);
                    }
                }
            }
            Ok(false) => break,
            // Stream-level failure: fatal. In-flight row tasks still get
            // joined below so none are left running against the store.
            Err(e) => {
                tracing::error!("CSV stream failed after {} rows: {}", rows, e);
                stream_error = Some(e);
                break;
            }
        }
    }

    // Every row task finishes before the count is reported.
    for join_result in futures::future::join_all(handles).await {
        if let Err(e) = join_result {
            tracing::error!("Import row task panicked: {}", e);
        }
    }

    if let Some(e) = stream_error {
        return Err(AppError::BadRequest(format!(
            "Failed to read CSV upload: {}",
            e
        )));
    }

    let outcome = ImportOutcome {
        rows,
        inserted: inserted.load(Ordering::Relaxed),
    };
    tracing::info!(
        "Bulk import finished: {} of {} rows inserted",
        outcome.inserted,
        outcome.rows
    );
    Ok(outcome)
}

/// One row's chain: existence check → geocode → insert.
///
/// Every early return here is a recoverable, per-row outcome.
async fn process_row(
    candidate: RaceCandidate,
    store: Arc<dyn RaceStore>,
    geocoder: Arc<dyn Geocoder>,
    inserted: Arc<AtomicUsize>,
) {
    tracing::debug!(
        "Checking for an existing race with name: {} and distance: {}",
        candidate.name,
        candidate.distance
    );
    match store
        .find_by_name_distance(&candidate.name, candidate.distance)
        .await
    {
        Ok(existing) if !existing.is_empty() => {
            tracing::info!("Not inserting {} as it already exists", candidate.name);
            return;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Existence check failed for {}: {}", candidate.name, e);
            return;
        }
    }

    let coordinates = match geocoder.geocode(&candidate.location).await {
        Ok(Some(coordinates)) => coordinates,
        Ok(None) => {
            tracing::info!(
                "Could not find lat/lng for {}, not creating",
                candidate.name
            );
            return;
        }
        Err(e) => {
            tracing::warn!("Geocoding failed for {}: {}", candidate.name, e);
            return;
        }
    };

    let name = candidate.name.clone();
    let race = candidate.hydrate(coordinates);
    match store.insert(&race).await {
        Ok(true) => {
            inserted.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Created race with name: {}", name);
        }
        Ok(false) => {
            tracing::info!("Not inserting {} as it already exists", name);
        }
        Err(e) => {
            tracing::warn!("Failed to insert {}: {}", name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use uuid::Uuid;

    // -- fakes ------------------------------------------------------------

    #[derive(Default)]
    struct FakeStore {
        existing: Mutex<HashSet<(String, Decimal)>>,
        inserted: Mutex<Vec<HydratedRace>>,
        fail_inserts: bool,
    }

    impl FakeStore {
        fn seeded(pairs: &[(&str, &str)]) -> Self {
            let existing = pairs
                .iter()
                .map(|(n, d)| (n.to_string(), Decimal::from_str(d).unwrap()))
                .collect();
            Self {
                existing: Mutex::new(existing),
                ..Default::default()
            }
        }

        fn inserted(&self) -> Vec<HydratedRace> {
            self.inserted.lock().unwrap().clone()
        }

        fn make_race(name: &str, distance: Decimal) -> Race {
            let now = Utc::now();
            Race {
                id: Uuid::new_v4(),
                name: name.to_string(),
                distance,
                location: None,
                latitude: None,
                longitude: None,
                attributes: serde_json::json!({}),
                created_at: now,
                updated_at: now,
            }
        }
    }

    #[async_trait]
    impl RaceStore for FakeStore {
        async fn find_by_name_distance(
            &self,
            name: &str,
            distance: Decimal,
        ) -> Result<Vec<Race>, AppError> {
            let existing = self.existing.lock().unwrap();
            if existing.contains(&(name.to_string(), distance)) {
                Ok(vec![Self::make_race(name, distance)])
            } else {
                Ok(vec![])
            }
        }

        async fn insert(&self, race: &HydratedRace) -> Result<bool, AppError> {
            if self.fail_inserts {
                return Err(AppError::InternalError("insert exploded".to_string()));
            }
            // One lock guards both the dedup set and the log, like the
            // database's unique index guards the real insert.
            let mut existing = self.existing.lock().unwrap();
            if !existing.insert((race.name.clone(), race.distance)) {
                return Ok(false);
            }
            self.inserted.lock().unwrap().push(race.clone());
            Ok(true)
        }
    }

    #[derive(Default)]
    struct FakeGeocoder {
        results: HashMap<String, Coordinates>,
        fail_locations: HashSet<String>,
    }

    impl FakeGeocoder {
        fn with(location: &str, latitude: f64, longitude: f64) -> Self {
            let mut geocoder = Self::default();
            geocoder.results.insert(
                location.to_string(),
                Coordinates {
                    latitude,
                    longitude,
                },
            );
            geocoder
        }

        fn failing_for(mut self, location: &str) -> Self {
            self.fail_locations.insert(location.to_string());
            self
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, location: &str) -> Result<Option<Coordinates>, AppError> {
            if self.fail_locations.contains(location) {
                return Err(AppError::ExternalServiceError(
                    "geocoder unavailable".to_string(),
                ));
            }
            Ok(self.results.get(location).copied())
        }
    }

    async fn run_import(
        csv: &str,
        store: Arc<FakeStore>,
        geocoder: Arc<FakeGeocoder>,
    ) -> Result<ImportOutcome, AppError> {
        import_csv(csv.as_bytes(), store as Arc<dyn RaceStore>, geocoder).await
    }

    // -- pipeline ---------------------------------------------------------

    #[tokio::test]
    async fn test_import_inserts_new_race() {
        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::with("Boulder, CO", 40.0, -105.27));
        let csv = "name,distance,location\nBoulder 10K,10,\"Boulder, CO\"\n";

        let outcome = run_import(csv, store.clone(), geocoder).await.unwrap();

        assert_eq!(outcome.rows, 1);
        assert_eq!(outcome.inserted, 1);

        let inserted = store.inserted();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].name, "Boulder 10K");
        assert_eq!(inserted[0].distance, Decimal::from_str("10").unwrap());
        // Stored coordinates are exactly what the geocoder returned.
        assert_eq!(inserted[0].latitude, f64_to_decimal_full(40.0));
        assert_eq!(inserted[0].longitude, f64_to_decimal_full(-105.27));
    }

    #[tokio::test]
    async fn test_import_skips_existing_race() {
        let store = Arc::new(FakeStore::seeded(&[("Boulder 10K", "10")]));
        let geocoder = Arc::new(FakeGeocoder::with("Boulder, CO", 40.0, -105.27));
        let csv = "name,distance,location\nBoulder 10K,10,\"Boulder, CO\"\n";

        let outcome = run_import(csv, store.clone(), geocoder).await.unwrap();

        assert_eq!(outcome.inserted, 0);
        assert!(store.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_import_duplicate_rows_count_once() {
        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::with("Boulder, CO", 40.0, -105.27));
        let csv = "name,distance,location\n\
                   Boulder 10K,10,\"Boulder, CO\"\n\
                   Boulder 10K,10,\"Boulder, CO\"\n";

        let outcome = run_import(csv, store.clone(), geocoder).await.unwrap();

        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(store.inserted().len(), 1);
    }

    #[tokio::test]
    async fn test_import_skips_rows_without_coordinates() {
        let store = Arc::new(FakeStore::default());
        // Geocoder knows nothing about this location.
        let geocoder = Arc::new(FakeGeocoder::default());
        let csv = "name,distance,location\nBoulder 10K,10,\"Boulder, CO\"\n";

        let outcome = run_import(csv, store.clone(), geocoder).await.unwrap();

        assert_eq!(outcome.rows, 1);
        assert_eq!(outcome.inserted, 0);
        assert!(store.inserted().is_empty());
    }

    #[tokio::test]
    async fn test_import_geocode_error_only_skips_that_row() {
        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(
            FakeGeocoder::with("Boulder, CO", 40.0, -105.27).failing_for("Leadville, CO"),
        );
        let csv = "name,distance,location\n\
                   Leadville 100,100,\"Leadville, CO\"\n\
                   Boulder 10K,10,\"Boulder, CO\"\n";

        let outcome = run_import(csv, store.clone(), geocoder).await.unwrap();

        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(store.inserted()[0].name, "Boulder 10K");
    }

    #[tokio::test]
    async fn test_import_insert_failure_continues() {
        let store = Arc::new(FakeStore {
            fail_inserts: true,
            ..Default::default()
        });
        let geocoder = Arc::new(FakeGeocoder::with("Boulder, CO", 40.0, -105.27));
        let csv = "name,distance,location\n\
                   Boulder 10K,10,\"Boulder, CO\"\n\
                   Boulder Half,21.1,\"Boulder, CO\"\n";

        let outcome = run_import(csv, store, geocoder).await.unwrap();

        assert_eq!(outcome.rows, 2);
        assert_eq!(outcome.inserted, 0);
    }

    #[tokio::test]
    async fn test_import_bad_rows_are_skipped_not_fatal() {
        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::with("Boulder, CO", 40.0, -105.27));
        let csv = "name,distance,location\n\
                   ,10,\"Boulder, CO\"\n\
                   Boulder 10K,ten,\"Boulder, CO\"\n\
                   Boulder Trail,5,\n\
                   Boulder 10K,10,\"Boulder, CO\"\n";

        let outcome = run_import(csv, store.clone(), geocoder).await.unwrap();

        assert_eq!(outcome.rows, 4);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(store.inserted()[0].name, "Boulder 10K");
    }

    #[tokio::test]
    async fn test_import_missing_required_header() {
        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::default());
        let csv = "title,distance,location\nBoulder 10K,10,\"Boulder, CO\"\n";

        let result = run_import(csv, store, geocoder).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_import_extra_columns_pass_through() {
        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::with("Boulder, CO", 40.0, -105.27));
        let csv = "name,distance,location,website,surface\n\
                   Boulder 10K,10,\"Boulder, CO\",https://boulder10k.example,trail\n";

        let outcome = run_import(csv, store.clone(), geocoder).await.unwrap();

        assert_eq!(outcome.inserted, 1);
        let attributes = &store.inserted()[0].attributes;
        assert_eq!(
            attributes.get("website").and_then(|v| v.as_str()),
            Some("https://boulder10k.example")
        );
        assert_eq!(
            attributes.get("surface").and_then(|v| v.as_str()),
            Some("trail")
        );
    }

    // -- file lifecycle ---------------------------------------------------

    #[tokio::test]
    async fn test_import_file_removed_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.csv");
        std::fs::write(
            &path,
            "name,distance,location\nBoulder 10K,10,\"Boulder, CO\"\n",
        )
        .unwrap();

        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::with("Boulder, CO", 40.0, -105.27));
        let outcome = import_csv_file(&path, store as Arc<dyn RaceStore>, geocoder)
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_import_file_removed_when_nothing_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.csv");
        std::fs::write(
            &path,
            "name,distance,location\nBoulder 10K,10,\"Boulder, CO\"\n",
        )
        .unwrap();

        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::default());
        let outcome = import_csv_file(&path, store as Arc<dyn RaceStore>, geocoder)
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_import_file_removed_on_stream_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.csv");
        // Invalid UTF-8 partway through the stream fails the record read.
        let mut bytes = b"name,distance,location\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b',', b'1', b'0', b',', b'x', b'\n']);
        std::fs::write(&path, bytes).unwrap();

        let store = Arc::new(FakeStore::default());
        let geocoder = Arc::new(FakeGeocoder::default());
        let result = import_csv_file(&path, store as Arc<dyn RaceStore>, geocoder).await;

        assert!(result.is_err());
        assert!(!path.exists());
    }

    // -- candidate parsing ------------------------------------------------

    fn columns_for(headers: &[&str]) -> ColumnMap {
        ColumnMap::from_headers(&StringRecord::from(headers.to_vec())).unwrap()
    }

    #[test]
    fn test_candidate_from_record() {
        let columns = columns_for(&["name", "distance", "location"]);
        let record = StringRecord::from(vec!["Boulder 10K", "10", "Boulder, CO"]);

        let candidate = RaceCandidate::from_record(&columns, &record).unwrap();
        assert_eq!(candidate.name, "Boulder 10K");
        assert_eq!(candidate.distance, Decimal::from_str("10").unwrap());
        assert_eq!(candidate.location, "Boulder, CO");
        assert!(candidate.attributes.is_empty());
    }

    #[test]
    fn test_candidate_trims_fields() {
        let columns = columns_for(&["name", "distance", "location"]);
        let record = StringRecord::from(vec![" Boulder 10K ", " 10 ", " Boulder, CO "]);

        let candidate = RaceCandidate::from_record(&columns, &record).unwrap();
        assert_eq!(candidate.name, "Boulder 10K");
        assert_eq!(candidate.location, "Boulder, CO");
    }

    #[test]
    fn test_candidate_short_row_is_skipped() {
        // flexible(true) lets short rows through the reader; the candidate
        // parser rejects them.
        let columns = columns_for(&["name", "distance", "location"]);
        let record = StringRecord::from(vec!["Boulder 10K"]);

        assert!(RaceCandidate::from_record(&columns, &record).is_err());
    }

    #[test]
    fn test_column_map_rejects_missing_headers() {
        for headers in [
            vec!["distance", "location"],
            vec!["name", "location"],
            vec!["name", "distance"],
        ] {
            assert!(ColumnMap::from_headers(&StringRecord::from(headers)).is_err());
        }
    }
}
