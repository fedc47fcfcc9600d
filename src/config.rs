//! Configuration types for a batch-conversion workflow.
//!
//! All workflow behaviour is controlled through [`WorkflowConfig`], built via
//! its [`WorkflowConfigBuilder`]. Collaborators (API client, link issuer,
//! storage) are injected separately when constructing
//! [`crate::workflow::Workflow`]; this struct only carries plain settings.

use crate::error::DocshiftError;
use crate::progress::ProgressCallback;
use crate::storage::keys;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 100 MiB, the largest file the upload form accepts.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Which remote operation a workflow drives for each job.
///
/// Both kinds share one job type; they differ in the remote call, the shape
/// of the result (OCR keeps the extracted text inline), the accepted inputs
/// and the history key they persist under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Generic format conversion, any input type.
    #[default]
    Convert,
    /// Text extraction from images and PDFs.
    Ocr,
}

impl WorkflowKind {
    /// Storage key holding this workflow's resolved-job history.
    pub fn history_key(&self) -> &'static str {
        match self {
            WorkflowKind::Convert => keys::CONVERSION_HISTORY,
            WorkflowKind::Ocr => keys::OCR_HISTORY,
        }
    }

    /// Whether a file with this name and declared MIME type may be added.
    ///
    /// OCR accepts `image/*` and PDF only, mirroring the upload picker's
    /// `accept="image/*,.pdf"`.
    pub fn accepts(&self, file_name: &str, mime_type: &str) -> bool {
        match self {
            WorkflowKind::Convert => true,
            WorkflowKind::Ocr => {
                let mime = mime_type.to_ascii_lowercase();
                if mime.starts_with("image/") || mime == "application/pdf" {
                    return true;
                }
                let ext = file_name
                    .rsplit_once('.')
                    .map(|(_, e)| e.to_ascii_lowercase())
                    .unwrap_or_default();
                matches!(
                    ext.as_str(),
                    "pdf" | "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp"
                )
            }
        }
    }

    pub fn default_reference_policy(&self) -> ReferencePolicy {
        match self {
            WorkflowKind::Convert => ReferencePolicy::Always,
            WorkflowKind::Ocr => ReferencePolicy::WhenMissing,
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowKind::Convert => f.write_str("conversion"),
            WorkflowKind::Ocr => f.write_str("ocr"),
        }
    }
}

/// When to ask the link issuer for a download link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferencePolicy {
    /// Always issue a fresh link from the output file name. The API's
    /// `source_url` points at private storage and is not directly usable.
    Always,
    /// Use the API's `source_url` when it is an absolute http(s) URL; issue a
    /// link only otherwise.
    WhenMissing,
}

/// Configuration for a batch-conversion workflow.
///
/// # Example
/// ```rust
/// use docshift::{WorkflowConfig, WorkflowKind};
///
/// let config = WorkflowConfig::builder()
///     .kind(WorkflowKind::Ocr)
///     .api_base_url("https://convert.example.com")
///     .auth_token("secret")
///     .build()
///     .unwrap();
/// assert_eq!(config.link_expiry_secs, 3600);
/// ```
#[derive(Clone)]
pub struct WorkflowConfig {
    /// Remote operation driven per job. Default: [`WorkflowKind::Convert`].
    pub kind: WorkflowKind,

    /// Root URL of the conversion API, without trailing slash.
    pub api_base_url: String,

    /// API token. Sent both as an `Authorization: Token …` header and as the
    /// `auth_token` form field the convert endpoint expects.
    pub auth_token: Option<String>,

    /// Per-request HTTP timeout in seconds. Default: 300.
    ///
    /// Large office documents can take minutes to convert server-side; this
    /// bound belongs to the HTTP client, not the workflow.
    pub request_timeout_secs: u64,

    /// Largest accepted input file in bytes. Default: 100 MiB.
    pub max_file_size: u64,

    /// Validity of issued download links in seconds. Default: 3600.
    pub link_expiry_secs: u64,

    /// When to call the link issuer. Default depends on `kind`.
    pub reference_policy: ReferencePolicy,

    /// Receives per-job events as a batch runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let kind = WorkflowKind::default();
        Self {
            kind,
            api_base_url: "http://localhost:8000".to_string(),
            auth_token: None,
            request_timeout_secs: 300,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            link_expiry_secs: 3600,
            reference_policy: kind.default_reference_policy(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for WorkflowConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowConfig")
            .field("kind", &self.kind)
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_file_size", &self.max_file_size)
            .field("link_expiry_secs", &self.link_expiry_secs)
            .field("reference_policy", &self.reference_policy)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn JobProgressCallback>"),
            )
            .finish()
    }
}

impl WorkflowConfig {
    pub fn builder() -> WorkflowConfigBuilder {
        WorkflowConfigBuilder {
            config: Self::default(),
            policy_set: false,
        }
    }
}

/// Builder for [`WorkflowConfig`].
#[derive(Debug)]
pub struct WorkflowConfigBuilder {
    config: WorkflowConfig,
    policy_set: bool,
}

impl WorkflowConfigBuilder {
    /// Select the workflow kind. Also resets the reference policy to the
    /// kind's default unless one was set explicitly.
    pub fn kind(mut self, kind: WorkflowKind) -> Self {
        self.config.kind = kind;
        if !self.policy_set {
            self.config.reference_policy = kind.default_reference_policy();
        }
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    /// Link validity, clamped to S3's 1 second – 7 day presigning window.
    pub fn link_expiry_secs(mut self, secs: u64) -> Self {
        self.config.link_expiry_secs = secs.clamp(1, 7 * 24 * 3600);
        self
    }

    pub fn reference_policy(mut self, policy: ReferencePolicy) -> Self {
        self.config.reference_policy = policy;
        self.policy_set = true;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkflowConfig, DocshiftError> {
        let c = &self.config;
        if !(c.api_base_url.starts_with("http://") || c.api_base_url.starts_with("https://")) {
            return Err(DocshiftError::InvalidConfig(format!(
                "API base URL must start with http:// or https://, got '{}'",
                c.api_base_url
            )));
        }
        if c.max_file_size == 0 {
            return Err(DocshiftError::InvalidConfig(
                "Maximum file size must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = WorkflowConfig::default();
        assert_eq!(c.kind, WorkflowKind::Convert);
        assert_eq!(c.max_file_size, 100 * 1024 * 1024);
        assert_eq!(c.link_expiry_secs, 3600);
        assert_eq!(c.reference_policy, ReferencePolicy::Always);
    }

    #[test]
    fn ocr_kind_switches_reference_policy() {
        let c = WorkflowConfig::builder().kind(WorkflowKind::Ocr).build().unwrap();
        assert_eq!(c.reference_policy, ReferencePolicy::WhenMissing);
    }

    #[test]
    fn explicit_policy_survives_kind_change() {
        let c = WorkflowConfig::builder()
            .reference_policy(ReferencePolicy::Always)
            .kind(WorkflowKind::Ocr)
            .build()
            .unwrap();
        assert_eq!(c.reference_policy, ReferencePolicy::Always);
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = WorkflowConfig::builder()
            .api_base_url("https://api.example.com/")
            .build()
            .unwrap();
        assert_eq!(c.api_base_url, "https://api.example.com");
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = WorkflowConfig::builder()
            .api_base_url("ftp://example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, DocshiftError::InvalidConfig(_)));
    }

    #[test]
    fn link_expiry_is_clamped() {
        let c = WorkflowConfig::builder().link_expiry_secs(0).build().unwrap();
        assert_eq!(c.link_expiry_secs, 1);
        let c = WorkflowConfig::builder()
            .link_expiry_secs(30 * 24 * 3600)
            .build()
            .unwrap();
        assert_eq!(c.link_expiry_secs, 7 * 24 * 3600);
    }

    #[test]
    fn debug_redacts_token() {
        let c = WorkflowConfig::builder().auth_token("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn ocr_accepts_images_and_pdf_only() {
        let ocr = WorkflowKind::Ocr;
        assert!(ocr.accepts("scan.png", "image/png"));
        assert!(ocr.accepts("scan.PDF", ""));
        assert!(ocr.accepts("photo.jpeg", ""));
        assert!(!ocr.accepts("sheet.xlsx", ""));
        assert!(!ocr.accepts("notes", "text/plain"));
        assert!(WorkflowKind::Convert.accepts("sheet.xlsx", ""));
    }
}
