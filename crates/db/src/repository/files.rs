//! Uploaded-file metadata persistence.  Blobs live on disk; rows here only
//! reference them.

use chrono::Utc;
use uuid::Uuid;

use crate::models::UploadedFileRow;
use crate::{DbError, DbPool};

/// Insert metadata for a stored upload.  `id` is chosen by the caller so
/// the on-disk blob can be keyed by it before the row exists.
pub async fn insert_file(
    pool: &DbPool,
    id: Uuid,
    filename: &str,
    mime_type: &str,
    size_bytes: i64,
    path: &str,
) -> Result<UploadedFileRow, DbError> {
    let row = sqlx::query_as::<_, UploadedFileRow>(
        r#"
        INSERT INTO uploaded_files (id, filename, mime_type, size_bytes, path, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id, filename, mime_type, size_bytes, path, created_at
        "#,
    )
    .bind(id)
    .bind(filename)
    .bind(mime_type)
    .bind(size_bytes)
    .bind(path)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch file metadata by id.
pub async fn get_file(pool: &DbPool, id: Uuid) -> Result<UploadedFileRow, DbError> {
    sqlx::query_as::<_, UploadedFileRow>(
        r#"
        SELECT id, filename, mime_type, size_bytes, path, created_at
        FROM uploaded_files
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}
