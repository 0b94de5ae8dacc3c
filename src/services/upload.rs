//! Upload staging
//!
//! Validates an uploaded file, writes it under the upload directory with a
//! generated name and counts its data rows. Empty files are rejected here,
//! before any job is queued.

use std::path::{Path, PathBuf};

use base64::Engine;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ImportError;
use crate::services::import_job::TempUpload;
use crate::services::spreadsheet_reader::count_data_rows;
use crate::types::SpreadsheetFormat;

/// A validated upload on disk
#[derive(Debug)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub file_name: String,
    pub format: SpreadsheetFormat,
    pub total_rows: u64,
}

/// Request envelope around the base64 content: id, token, file name
const ENVELOPE_BYTES: u64 = 4 * 1024;

/// NATS `max_payload` needed to carry an upload of `max_upload_bytes`
pub fn required_payload_bytes(max_upload_bytes: u64) -> u64 {
    max_upload_bytes.div_ceil(3) * 4 + ENVELOPE_BYTES
}

/// Decode the base64 payload of an upload request
pub fn decode_content(content: &str) -> Result<Vec<u8>, ImportError> {
    base64::engine::general_purpose::STANDARD
        .decode(content.trim())
        .map_err(|e| ImportError::InvalidPayload(format!("content is not valid base64: {}", e)))
}

/// Check format and size, write the file and count its rows
pub async fn stage_upload(
    upload_dir: &Path,
    max_bytes: u64,
    file_name: &str,
    bytes: &[u8],
) -> Result<StagedUpload, ImportError> {
    let format = SpreadsheetFormat::from_file_name(file_name)
        .ok_or_else(|| ImportError::UnsupportedFormat(file_name.to_string()))?;

    let size = bytes.len() as u64;
    if size > max_bytes {
        return Err(ImportError::FileTooLarge { size, limit: max_bytes });
    }

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ImportError::unreadable(upload_dir, e))?;

    let path = upload_dir.join(format!("{}.{}", Uuid::new_v4(), format.extension()));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ImportError::unreadable(&path, e))?;
    debug!("Staged '{}' at {} ({} bytes)", file_name, path.display(), size);

    // Removes the file if counting fails or finds nothing
    let guard = TempUpload::new(&path);
    let total_rows = count_data_rows(path.clone(), format).await?;
    if total_rows == 0 {
        return Err(ImportError::NoData(file_name.to_string()));
    }
    let path = guard.keep();

    info!("Upload '{}' staged with {} data rows", file_name, total_rows);
    Ok(StagedUpload {
        path,
        file_name: file_name.to_string(),
        format,
        total_rows,
    })
}
