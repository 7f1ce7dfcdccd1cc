use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use db::repository::files as file_repo;
use nodes::extract::{extract_pdf_text, validate_pdf_bytes};
use nodes::NodeError;

use crate::error::ApiError;
use crate::AppState;

#[derive(Serialize)]
pub struct UploadResponse {
    pub file_id: Uuid,
    pub filename: String,
    pub message: String,
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("file.pdf").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?
            .to_vec();
        upload = Some((filename, mime_type, bytes));
        break;
    }

    let Some((filename, mime_type, bytes)) = upload else {
        return Err(ApiError::Validation("No file uploaded".to_string()));
    };

    // Same structural checks the extract_text executor applies at run time.
    validate_pdf_bytes(&mime_type, &bytes)?;

    // Parse once at the boundary so encrypted or corrupted documents are
    // rejected before they can strand a job.
    extract_pdf_text(bytes.clone()).await.map_err(|e| match e {
        NodeError::Validation(detail) => ApiError::Validation(detail),
        _ => ApiError::Validation("PDF file is corrupted or invalid".to_string()),
    })?;

    let file_id = Uuid::new_v4();
    let path = state
        .files
        .save(file_id, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to store file: {e}")))?;

    let row = file_repo::insert_file(
        &state.pool,
        file_id,
        &filename,
        &mime_type,
        bytes.len() as i64,
        &path.to_string_lossy(),
    )
    .await?;

    info!(file_id = %row.id, size_bytes = row.size_bytes, "stored uploaded PDF");

    Ok(Json(UploadResponse {
        file_id: row.id,
        filename: row.filename,
        message: "File uploaded".to_string(),
    }))
}
