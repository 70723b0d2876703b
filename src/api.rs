//! Contexter API Client - HTTP communication with the Contexter server
//!
//! Every request carries the device credentials:
//! - `x-device-id: <device id>`
//! - `Authorization: Bearer <device secret>`
//!
//! and is recorded in the bounded request log, whatever its outcome.

use crate::store::{ConfigStore, ConfigStoreExt, StoreError};
use crate::sync::history::{new_log_id, ApiRequestLog, RequestStatus, SyncHistory};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Transport Abstraction
// ============================================================================

/// One file part of a multipart upload
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Form fields plus file parts for `multipart/form-data` uploads
#[derive(Debug, Clone, Default)]
pub struct MultipartUpload {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartUpload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.files.push(part);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Authenticated upload channel to the server
///
/// A returned `Ok` means the server confirmed the upload.
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn upload_json(&self, path: &str, body: &Value) -> Result<Value, TransportError>;

    async fn upload_multipart(
        &self,
        path: &str,
        upload: MultipartUpload,
    ) -> Result<Option<Value>, TransportError>;
}

// ============================================================================
// HTTP Client
// ============================================================================

/// reqwest-backed [`TransportClient`] reading credentials from settings
pub struct ContexterApiClient {
    client: Client,
    store: Arc<dyn ConfigStore>,
    history: SyncHistory,
}

struct Credentials {
    base_url: String,
    device_id: String,
    secret: String,
}

impl ContexterApiClient {
    pub fn new(store: Arc<dyn ConfigStore>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self {
            client,
            history: SyncHistory::new(store.clone()),
            store,
        })
    }

    /// Credentials are read per request so settings changes apply immediately
    fn credentials(&self) -> Result<Credentials, TransportError> {
        let base_url = self.store.server_url()?.ok_or(TransportError::MissingServerUrl)?;
        let secret = self
            .store
            .device_secret()?
            .ok_or(TransportError::MissingDeviceSecret)?;
        let device_id = self.store.device_id()?;

        Ok(Credentials {
            base_url,
            device_id,
            secret,
        })
    }

    fn post(&self, path: &str) -> Result<RequestBuilder, TransportError> {
        let creds = self.credentials()?;
        Ok(self
            .client
            .post(format!("{}{}", creds.base_url, path))
            .header("x-device-id", creds.device_id)
            .bearer_auth(creds.secret))
    }

    /// Send a request and log it; non-2xx responses become errors
    async fn dispatch(&self, path: &str, request: RequestBuilder) -> Result<Response, TransportError> {
        let timestamp = Utc::now();
        let started = Instant::now();
        let result = request.send().await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut entry = ApiRequestLog {
            id: new_log_id(),
            timestamp,
            method: "POST".to_string(),
            path: path.to_string(),
            status: RequestStatus::Success,
            status_code: None,
            duration_ms,
            error: None,
        };

        let outcome = match result {
            Ok(response) => {
                let status = response.status();
                entry.status_code = Some(status.as_u16());
                if status.is_success() {
                    Ok(response)
                } else {
                    let body = response.text().await.unwrap_or_default();
                    entry.status = RequestStatus::Error;
                    entry.error = Some(status.to_string());
                    Err(TransportError::Status {
                        status: status.as_u16(),
                        body,
                    })
                }
            }
            Err(e) => {
                entry.status = RequestStatus::Error;
                entry.error = Some(e.to_string());
                Err(TransportError::Network(e.to_string()))
            }
        };

        if let Err(e) = self.history.record_request(&entry) {
            log::warn!("Failed to record request log for {}: {}", path, e);
        }

        outcome
    }

    pub fn history(&self) -> &SyncHistory {
        &self.history
    }
}

#[async_trait]
impl TransportClient for ContexterApiClient {
    async fn upload_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let request = self.post(path)?.json(body);
        let response = self.dispatch(path, request).await?;
        handle_response(response).await
    }

    async fn upload_multipart(
        &self,
        path: &str,
        upload: MultipartUpload,
    ) -> Result<Option<Value>, TransportError> {
        let mut form = Form::new();
        for (name, value) in upload.fields {
            form = form.text(name, value);
        }
        for file in upload.files {
            let part = Part::bytes(file.bytes)
                .file_name(file.filename)
                .mime_str(&file.mime_type)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            form = form.part(file.field, part);
        }

        let request = self.post(path)?.multipart(form);
        let response = self.dispatch(path, request).await?;

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with(mime::APPLICATION_JSON.as_ref()))
            .unwrap_or(false);

        if is_json {
            handle_response(response).await.map(Some)
        } else {
            Ok(None)
        }
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Server URL not configured")]
    MissingServerUrl,

    #[error("Device secret not configured")]
    MissingDeviceSecret,

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response from server")]
    InvalidResponse,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Settings error: {0}")]
    Store(#[from] StoreError),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Errors that retrying cannot fix until settings change
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingServerUrl | Self::MissingDeviceSecret)
    }
}

/// Parse a successful response body; an empty body is `Value::Null`
async fn handle_response(response: Response) -> Result<Value, TransportError> {
    let text = response
        .text()
        .await
        .map_err(|e| TransportError::Network(e.to_string()))?;

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|_| TransportError::InvalidResponse)
}

// ============================================================================
// Tests
// ============================================================================
