//! Download-link issuance for converted outputs.
//!
//! Converted files live in an object store under
//! `media/converted_files/<sanitised name>`. A [`LinkIssuer`] turns an output
//! file name into a time-limited URL the user can fetch it from.

use crate::error::JobError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Object-key prefix for converted outputs.
pub const OUTPUT_KEY_PREFIX: &str = "media/converted_files/";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_.\-]").unwrap());

/// Issues a retrieval URL for an output file.
#[async_trait]
pub trait LinkIssuer: Send + Sync {
    async fn issue(&self, file_name: &str, expires_in: Duration) -> Result<String, JobError>;
}

/// Runs of whitespace become `_`; anything outside `[A-Za-z0-9_.-]` is dropped.
pub fn sanitize_filename(name: &str) -> String {
    let underscored = WHITESPACE.replace_all(name, "_");
    UNSAFE_CHARS.replace_all(&underscored, "").into_owned()
}

/// Object key under which the API stores `file_name`.
pub fn object_key(file_name: &str) -> String {
    format!("{OUTPUT_KEY_PREFIX}{}", sanitize_filename(file_name))
}

#[cfg(feature = "s3")]
pub use s3::S3LinkIssuer;

#[cfg(feature = "s3")]
mod s3 {
    use super::*;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::presigning::PresigningConfig;
    use tracing::debug;

    /// Pre-signed S3 `GetObject` URLs with an attachment disposition.
    #[derive(Debug, Clone)]
    pub struct S3LinkIssuer {
        client: aws_sdk_s3::Client,
        bucket: String,
    }

    impl S3LinkIssuer {
        pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
            Self {
                client,
                bucket: bucket.into(),
            }
        }

        /// Credentials come from the standard AWS environment chain.
        pub async fn from_env(bucket: impl Into<String>, region: Option<String>) -> Self {
            let mut loader = aws_config::from_env();
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            let shared = loader.load().await;
            Self::new(aws_sdk_s3::Client::new(&shared), bucket)
        }

        pub fn bucket(&self) -> &str {
            &self.bucket
        }
    }

    #[async_trait]
    impl LinkIssuer for S3LinkIssuer {
        async fn issue(&self, file_name: &str, expires_in: Duration) -> Result<String, JobError> {
            let key = object_key(file_name);
            let issuance_err = |detail: String| JobError::ReferenceIssuance {
                file: file_name.to_string(),
                detail,
            };

            let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| issuance_err(e.to_string()))?;
            let request = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&key)
                .response_content_disposition(format!(
                    "attachment; filename=\"{}\"",
                    sanitize_filename(file_name)
                ))
                .presigned(presigning)
                .await
                .map_err(|e| issuance_err(e.to_string()))?;

            debug!("Issued link for s3://{}/{} ({}s)", self.bucket, key, expires_in.as_secs());
            Ok(request.uri().to_string())
        }
    }
}
