use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use sync_traits::{BackendError, DocumentInfo, IngestBackend};
use tracing::{debug, info};

use crate::types::{
    DeleteDocumentsRequest, DeleteDocumentResponse, DocumentsResponse, UploadResponse,
};

/// Reqwest-based client for the ingest backend.
///
/// Connection pooling and per-request timeouts come from the underlying
/// `reqwest::Client`. An API key, when configured, is sent as `X-API-Key`
/// on every request.
pub struct IngestHttpClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl IngestHttpClient {
    /// Create a client with default timeouts (30s request, 10s connect).
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_timeout(base_url, api_key, Duration::from_secs(30))
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("docsink/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if api_key.is_some() {
            info!("ingest backend API key configured");
        }
        Self {
            http,
            base_url,
            api_key,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }
        builder
    }
}

fn request_err(e: reqwest::Error) -> BackendError {
    BackendError::Request(e.to_string())
}

fn decode_err(e: reqwest::Error) -> BackendError {
    BackendError::UnexpectedResponse(e.to_string())
}

#[async_trait]
impl IngestBackend for IngestHttpClient {
    async fn upload(&self, file: &Path) -> Result<Option<String>, BackendError> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BackendError::Request(format!("upload path has no file name: {}", file.display()))
            })?;
        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| BackendError::Request(format!("failed to read {file_name}: {e}")))?;

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.clone()));

        let response = self
            .request(Method::POST, "/documents/upload")
            .multipart(form)
            .send()
            .await
            .map_err(request_err)?
            .error_for_status()
            .map_err(request_err)?
            .json::<UploadResponse>()
            .await
            .map_err(decode_err)?;

        info!(
            file = %file_name,
            track_id = response.track_id.as_deref().unwrap_or(""),
            "uploaded document"
        );
        Ok(response.track_id)
    }

    async fn documents_by_status(
        &self,
    ) -> Result<HashMap<String, Vec<DocumentInfo>>, BackendError> {
        let response = self
            .request(Method::GET, "/documents")
            .send()
            .await
            .map_err(request_err)?
            .error_for_status()
            .map_err(request_err)?
            .json::<DocumentsResponse>()
            .await
            .map_err(decode_err)?;

        let mut result = HashMap::new();
        for (status, records) in response.statuses.unwrap_or_default() {
            let status = status.to_lowercase();
            let docs: Vec<DocumentInfo> = records
                .into_iter()
                .map(|record| record.into_document(&status))
                .collect();
            result.entry(status).or_insert_with(Vec::new).extend(docs);
        }
        debug!(
            statuses = result.len(),
            documents = result.values().map(Vec::len).sum::<usize>(),
            "listed backend documents"
        );
        Ok(result)
    }

    async fn delete_document(&self, doc_id: &str) -> Result<(), BackendError> {
        let response = self
            .request(Method::DELETE, "/documents/delete_document")
            .json(&DeleteDocumentsRequest {
                doc_ids: vec![doc_id],
            })
            .send()
            .await
            .map_err(request_err)?
            .error_for_status()
            .map_err(request_err)?
            .json::<DeleteDocumentResponse>()
            .await
            .map_err(decode_err)?;

        if response.status.as_deref() == Some("busy") {
            return Err(BackendError::Busy(
                response.message.unwrap_or_else(|| "pipeline is processing".to_string()),
            ));
        }

        info!(
            doc_id = %doc_id,
            status = response.status.as_deref().unwrap_or("unknown"),
            "deleted document"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized_without_trailing_slash() {
        let client = IngestHttpClient::new("http://localhost:9621/", None);
        assert_eq!(client.base_url, "http://localhost:9621");
    }
}
