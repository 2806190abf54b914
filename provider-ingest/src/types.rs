//! Wire types for the ingest backend's REST interface.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sync_traits::DocumentInfo;

#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    #[allow(dead_code)]
    pub status: Option<String>,
    #[allow(dead_code)]
    pub message: Option<String>,
    pub track_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentsResponse {
    pub statuses: Option<HashMap<String, Vec<DocumentRecord>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DocumentRecord {
    pub id: String,
    pub file_path: Option<String>,
    pub created_at: Option<String>,
    pub track_id: Option<String>,
    pub error_msg: Option<String>,
}

impl DocumentRecord {
    /// Attach the (lowercased) status group this record was listed under.
    pub fn into_document(self, status: &str) -> DocumentInfo {
        DocumentInfo {
            id: self.id,
            file_path: self.file_path,
            created_at: self.created_at,
            track_id: self.track_id,
            status: Some(status.to_string()),
            error_msg: self.error_msg,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteDocumentsRequest<'a> {
    pub doc_ids: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteDocumentResponse {
    pub status: Option<String>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_response_parses_with_missing_track_id() {
        let parsed: UploadResponse =
            serde_json::from_str(r#"{"status": "success", "message": "queued"}"#).unwrap();
        assert_eq!(parsed.track_id, None);

        let parsed: UploadResponse = serde_json::from_str(
            r#"{"status": "success", "message": "queued", "track_id": "upload-1"}"#,
        )
        .unwrap();
        assert_eq!(parsed.track_id.as_deref(), Some("upload-1"));
    }

    #[test]
    fn documents_response_parses_status_groups() {
        let body = r#"{
            "statuses": {
                "PROCESSED": [
                    {"id": "d1", "file_path": "/inputs/a.pdf", "created_at": "2026-01-01T00:00:00", "track_id": "t1"}
                ],
                "failed": [
                    {"id": "d2", "file_path": "/inputs/b.pdf", "error_msg": "empty document"}
                ]
            }
        }"#;
        let parsed: DocumentsResponse = serde_json::from_str(body).unwrap();
        let statuses = parsed.statuses.unwrap();
        assert_eq!(statuses["PROCESSED"].len(), 1);
        assert_eq!(statuses["failed"][0].error_msg.as_deref(), Some("empty document"));

        let doc = statuses["PROCESSED"][0].clone().into_document("processed");
        assert_eq!(doc.status.as_deref(), Some("processed"));
        assert_eq!(doc.file_path.as_deref(), Some("/inputs/a.pdf"));
    }

    #[test]
    fn delete_request_serializes_doc_ids() {
        let body = serde_json::to_string(&DeleteDocumentsRequest {
            doc_ids: vec!["d1"],
        })
        .unwrap();
        assert_eq!(body, r#"{"doc_ids":["d1"]}"#);
    }

    #[test]
    fn delete_response_carries_busy_status() {
        let parsed: DeleteDocumentResponse =
            serde_json::from_str(r#"{"status": "busy", "message": "pipeline is running"}"#)
                .unwrap();
        assert_eq!(parsed.status.as_deref(), Some("busy"));
        assert_eq!(parsed.message.as_deref(), Some("pipeline is running"));
    }
}
