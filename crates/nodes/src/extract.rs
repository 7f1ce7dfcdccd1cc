//! `extract_text` node — read an uploaded PDF and return its text.
//!
//! The file is re-read on every run; executors keep no per-invocation
//! state, so editing a node or re-uploading between runs cannot leak into
//! an in-flight job.

use async_trait::async_trait;

use crate::config::{NodeConfig, NodeType};
use crate::error::NodeError;
use crate::traits::{NodeExecutor, Services, StoredFile};

/// Upload size ceiling (10 MiB).
pub const MAX_PDF_BYTES: usize = 10 * 1024 * 1024;

/// Required MIME type for uploads.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Magic prefix every PDF must carry.
pub const PDF_HEADER: &[u8] = b"%PDF-";

pub struct ExtractTextNode;

#[async_trait]
impl NodeExecutor for ExtractTextNode {
    async fn execute(
        &self,
        config_snapshot: &serde_json::Value,
        _input_text: &str,
        services: &Services,
    ) -> Result<String, NodeError> {
        let NodeConfig::ExtractText(config) =
            NodeConfig::parse(NodeType::ExtractText, config_snapshot)?
        else {
            unreachable!("parse returns the variant matching the node type");
        };

        let file = services.files.load(config.file_id).await?;
        validate_pdf_bytes(&file.mime_type, &file.bytes)?;

        let StoredFile { bytes, .. } = file;
        let text = extract_pdf_text(bytes).await?;
        if text.trim().is_empty() {
            return Err(NodeError::Validation(
                "No text content found in PDF".to_string(),
            ));
        }
        Ok(text.trim().to_string())
    }
}

/// Structural checks shared by the upload endpoint and the executor:
/// MIME type, non-empty content, size ceiling, and the `%PDF-` header.
pub fn validate_pdf_bytes(mime_type: &str, bytes: &[u8]) -> Result<(), NodeError> {
    if mime_type != PDF_MIME_TYPE {
        return Err(NodeError::Validation(format!(
            "Invalid file type. Expected PDF, got {mime_type}"
        )));
    }
    if bytes.is_empty() {
        return Err(NodeError::Validation("Empty file uploaded".to_string()));
    }
    if bytes.len() > MAX_PDF_BYTES {
        return Err(NodeError::Validation(format!(
            "File too large. Maximum size: {:.1}MB",
            MAX_PDF_BYTES as f64 / (1024.0 * 1024.0)
        )));
    }
    if !bytes.starts_with(PDF_HEADER) {
        return Err(NodeError::Validation(
            "File is not a valid PDF document".to_string(),
        ));
    }
    Ok(())
}

/// Run the extraction library on a blocking worker and classify its errors.
/// Encrypted documents become validation errors; anything else surfaces the
/// library's message verbatim.
pub async fn extract_pdf_text(bytes: Vec<u8>) -> Result<String, NodeError> {
    let result = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| NodeError::Internal(format!("extraction task failed: {e}")))?;

    result.map_err(|e| classify_extract_error(&e.to_string()))
}

fn classify_extract_error(message: &str) -> NodeError {
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        NodeError::Validation("Encrypted PDFs are not supported".to_string())
    } else {
        NodeError::Internal(format!("Error extracting text from PDF: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::mock_services;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn structural_validation_rejects_bad_uploads() {
        let pdf = b"%PDF-1.7 minimal".to_vec();
        assert!(validate_pdf_bytes(PDF_MIME_TYPE, &pdf).is_ok());

        assert!(matches!(
            validate_pdf_bytes("text/plain", &pdf),
            Err(NodeError::Validation(msg)) if msg.contains("Expected PDF")
        ));
        assert!(matches!(
            validate_pdf_bytes(PDF_MIME_TYPE, b""),
            Err(NodeError::Validation(msg)) if msg.contains("Empty file")
        ));
        assert!(matches!(
            validate_pdf_bytes(PDF_MIME_TYPE, b"PK\x03\x04 not a pdf"),
            Err(NodeError::Validation(msg)) if msg.contains("not a valid PDF")
        ));

        let oversized = vec![b'a'; MAX_PDF_BYTES + 1];
        assert!(matches!(
            validate_pdf_bytes(PDF_MIME_TYPE, &oversized),
            Err(NodeError::Validation(msg)) if msg.contains("too large")
        ));
    }

    #[test]
    fn encrypted_extraction_errors_become_validation_errors() {
        assert!(matches!(
            classify_extract_error("the file is encrypted"),
            NodeError::Validation(_)
        ));
        assert!(matches!(
            classify_extract_error("password required"),
            NodeError::Validation(_)
        ));
        assert!(matches!(
            classify_extract_error("malformed xref table"),
            NodeError::Internal(msg) if msg.contains("malformed xref table")
        ));
    }

    #[tokio::test]
    async fn missing_file_fails_the_step() {
        let services = mock_services();
        let cfg = json!({ "file_id": Uuid::new_v4() });
        let err = ExtractTextNode
            .execute(&cfg, "ignored", &services)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::NotFound(_)));
    }
}
