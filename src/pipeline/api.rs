//! Remote conversion API: catalog fetch, file conversion and OCR.
//!
//! The traits here are the seam between the workflow and the network.
//! [`HttpConversionApi`] is the production implementation over `reqwest`;
//! tests substitute in-process stubs.
//!
//! ## Endpoints
//!
//! | Call | Method | Path |
//! |------|--------|------|
//! | catalog | GET | `/api/target_conversions/` |
//! | convert | POST multipart | `/api/convert/` |
//! | OCR | POST multipart | `/api/ocr/` |
//!
//! Errors come back as JSON `{"error": "..."}` with a non-2xx status; the
//! server message is surfaced verbatim in [`JobError::Http`].

use crate::catalog::Catalog;
use crate::config::WorkflowConfig;
use crate::error::{DocshiftError, JobError};
use crate::job::FilePayload;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Supplies the capability catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_supported_conversions(&self) -> Result<Catalog, JobError>;
}

/// The remote operations a job can run.
#[async_trait]
pub trait ConversionApi: CatalogSource {
    /// Convert `file` into `target_format`.
    async fn convert_file(&self, file: &FilePayload, target_format: &str) -> Result<ApiResponse, JobError>;

    /// Extract text from `file`, producing an output file in `output_format`.
    async fn extract_text(&self, file: &FilePayload, output_format: &str) -> Result<ApiResponse, JobError>;
}

// ── Response types ───────────────────────────────────────────────────────

/// Body of a successful convert or OCR call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub original_file: OriginalFile,
    pub converted_file: ConvertedFile,
    /// OCR only.
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginalFile {
    #[serde(default, alias = "fileName", alias = "file_name")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertedFile {
    #[serde(default, alias = "fileName")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub converted_size: u64,
}

impl ApiResponse {
    /// True when the server flagged the job as failed despite a 2xx status.
    pub fn reports_failure(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "failed" | "failure" | "error"))
            .unwrap_or(false)
    }
}

#[derive(Deserialize)]
struct CatalogEnvelope {
    supported_conversions: Catalog,
}

// ── HTTP implementation ──────────────────────────────────────────────────

/// `reqwest`-backed [`ConversionApi`].
#[derive(Debug, Clone)]
pub struct HttpConversionApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpConversionApi {
    /// Build a client from the workflow config (base URL, token, timeout).
    pub fn new(config: &WorkflowConfig) -> Result<Self, DocshiftError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DocshiftError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(
            client,
            config.api_base_url.clone(),
            config.auth_token.clone(),
        ))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token {
            Some(ref token) => req.header(reqwest::header::AUTHORIZATION, format!("Token {token}")),
            None => req,
        }
    }

    /// Multipart body shared by the convert and OCR endpoints.
    fn file_form(&self, file: &FilePayload, format_field: &'static str, format: &str) -> Result<Form, JobError> {
        let mut part = Part::bytes(file.data.to_vec()).file_name(file.name.clone());
        if !file.mime_type.is_empty() {
            part = part
                .mime_str(&file.mime_type)
                .map_err(|e| JobError::MalformedResponse {
                    detail: format!("invalid MIME type '{}': {e}", file.mime_type),
                })?;
        }

        let mut form = Form::new()
            .part("original_file", part)
            .text(format_field, format.to_string());
        if let Some(ref token) = self.auth_token {
            form = form.text("auth_token", token.clone());
        }
        Ok(form)
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, JobError> {
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| JobError::Network { detail: e.to_string() })?;
        handle_response(response).await
    }
}

/// Map an HTTP response to a typed body or a [`JobError`].
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, JobError> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    if !is_json {
        if !status.is_success() {
            return Err(JobError::http(status.as_u16(), None));
        }
        return Err(JobError::MalformedResponse {
            detail: format!("expected a JSON body (HTTP {status})"),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| JobError::Network { detail: e.to_string() })?;
    debug!(
        "API response ({} bytes): {}",
        body.len(),
        body.chars().take(500).collect::<String>()
    );

    if !status.is_success() {
        let server_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string));
        return Err(JobError::http(status.as_u16(), server_message));
    }

    serde_json::from_str(&body).map_err(|e| JobError::MalformedResponse { detail: e.to_string() })
}

#[async_trait]
impl CatalogSource for HttpConversionApi {
    async fn fetch_supported_conversions(&self) -> Result<Catalog, JobError> {
        let envelope: CatalogEnvelope = self
            .send(self.client.get(self.url("/api/target_conversions/")))
            .await?;
        Ok(envelope.supported_conversions)
    }
}

#[async_trait]
impl ConversionApi for HttpConversionApi {
    async fn convert_file(&self, file: &FilePayload, target_format: &str) -> Result<ApiResponse, JobError> {
        debug!("POST /api/convert/ {} → {}", file.name, target_format);
        let form = self.file_form(file, "converted_mimetype", target_format)?;
        self.send(self.client.post(self.url("/api/convert/")).multipart(form))
            .await
    }

    async fn extract_text(&self, file: &FilePayload, output_format: &str) -> Result<ApiResponse, JobError> {
        debug!("POST /api/ocr/ {} → {}", file.name, output_format);
        let form = self.file_form(file, "output_format", output_format)?;
        self.send(self.client.post(self.url("/api/ocr/")).multipart(form))
            .await
    }
}
