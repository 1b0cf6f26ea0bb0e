//! Bulk race upload endpoint.
//!
//! Accepts a multipart CSV upload, spools it to the upload directory, runs
//! the import pipeline, and reports the number of inserted races in the
//! X-Cairn-Bulk-Results response header. Individual row rejections are not
//! reported back; the count is the whole contract.

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::errors::{AppError, ErrorResponse};
use crate::services::importer::{self, PgRaceStore, RaceStore};

use super::AppState;

/// Response header carrying the insertion count.
pub const BULK_RESULTS_HEADER: &str = "X-Cairn-Bulk-Results";

/// Multipart field name the upload must arrive under.
const UPLOAD_FIELD: &str = "file";

/// Import races from an uploaded CSV file.
///
/// The CSV must have a header row with at least `name`, `distance` and
/// `location` columns; other columns are stored as race attributes. Rows
/// whose (name, distance) already exists, or whose location cannot be
/// geocoded, are skipped silently — the response only carries the count of
/// rows actually inserted.
#[utoipa::path(
    post,
    path = "/api/v1/races/bulk",
    tag = "Races",
    request_body(content = String, description = "multipart form with a 'file' field holding the CSV", content_type = "multipart/form-data"),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Import finished; body is empty",
         headers(
             ("X-Cairn-Bulk-Results" = String, description = "Decimal count of races inserted by this upload")
         )),
        (status = 400, description = "Missing file field or unreadable CSV", body = ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorResponse),
        (status = 403, description = "Admin privileges required", body = ErrorResponse),
    )
)]
pub async fn bulk_import_races(
    State(state): State<AppState>,
    _admin: AdminUser,
    multipart: Multipart,
) -> Result<(StatusCode, HeaderMap), AppError> {
    let path = spool_upload(multipart, &state.upload_dir).await?;

    let store: Arc<dyn RaceStore> = Arc::new(PgRaceStore::new(state.pool.clone()));
    let outcome = importer::import_csv_file(&path, store, state.geocoder.clone()).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        BULK_RESULTS_HEADER,
        outcome
            .inserted
            .to_string()
            .parse()
            .map_err(|e| AppError::InternalError(format!("Invalid header value: {}", e)))?,
    );
    Ok((StatusCode::OK, headers))
}

/// Write the multipart `file` field to the upload directory.
///
/// A partially written file is removed before the error surfaces, so a
/// failed upload leaves nothing behind.
async fn spool_upload(mut multipart: Multipart, upload_dir: &Path) -> Result<PathBuf, AppError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart upload: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        // Keep only the basename of whatever the client called the file.
        let original_name = field
            .file_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "upload.csv".to_string());
        let base_name = Path::new(&original_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string());

        tokio::fs::create_dir_all(upload_dir).await.map_err(|e| {
            AppError::InternalError(format!(
                "Failed to create upload dir {}: {}",
                upload_dir.display(),
                e
            ))
        })?;

        let path = upload_dir.join(format!("{}-{}", Uuid::new_v4(), base_name));
        let result = write_field_to(&mut field, &path).await;
        if let Err(e) = result {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    "Failed to remove partial upload {}: {}",
                    path.display(),
                    remove_err
                );
            }
            return Err(e);
        }

        tracing::debug!("Spooled bulk upload to {}", path.display());
        return Ok(path);
    }

    Err(AppError::BadRequest(format!(
        "Multipart field '{}' is required",
        UPLOAD_FIELD
    )))
}

async fn write_field_to(
    field: &mut axum::extract::multipart::Field<'_>,
    path: &Path,
) -> Result<(), AppError> {
    let mut file = tokio::fs::File::create(path).await.map_err(|e| {
        AppError::InternalError(format!("Failed to create {}: {}", path.display(), e))
    })?;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        file.write_all(&chunk).await.map_err(|e| {
            AppError::InternalError(format!("Failed to write {}: {}", path.display(), e))
        })?;
    }

    file.flush().await.map_err(|e| {
        AppError::InternalError(format!("Failed to flush {}: {}", path.display(), e))
    })?;
    Ok(())
}
