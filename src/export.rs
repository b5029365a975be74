//! File naming and saving for `/extract` downloads.

use crate::api_client::ApiResponse;
use crate::errors::AppError;
use crate::models::ExportFormat;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// `YYYY-MM-DD-HH-MM-SS` in UTC.
pub fn export_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H-%M-%S").to_string()
}

/// `<LIBRARY>_<TABLE>_<timestamp>.<ext>`
pub fn export_filename(
    library: &str,
    table: &str,
    format: ExportFormat,
    now: DateTime<Utc>,
) -> String {
    format!(
        "{}_{}_{}.{}",
        library.trim().to_uppercase(),
        table.trim().to_uppercase(),
        export_timestamp(now),
        format.extension()
    )
}

/// Bytes to write for a download.
///
/// JSON answers are pretty-printed; anything else is written verbatim.
pub fn export_payload(response: ApiResponse) -> Result<Vec<u8>, AppError> {
    match response {
        ApiResponse::Json(value) => Ok(serde_json::to_vec_pretty(&value)?),
        ApiResponse::Binary { bytes, .. } => Ok(bytes.to_vec()),
    }
}

/// Writes `payload` into `dir/filename`, creating `dir` if needed.
pub async fn save_export(dir: &Path, filename: &str, payload: &[u8]) -> Result<PathBuf, AppError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(filename);
    tokio::fs::write(&path, payload).await?;
    tracing::info!("Saved {} ({} bytes)", path.display(), payload.len());
    Ok(path)
}
