//! Turn a successful API response into a [`ResolvedJob`].
//!
//! The output file name comes from `converted_file.file_name` and falls back
//! to the last path segment of `converted_file.source_url`. The download URL
//! follows the configured [`ReferencePolicy`].

use crate::catalog::Catalog;
use crate::config::{ReferencePolicy, WorkflowKind};
use crate::error::JobError;
use crate::job::{FilePayload, JobId, JobStatus, ResolvedJob};
use crate::pipeline::api::ApiResponse;
use crate::pipeline::links::LinkIssuer;
use chrono::Utc;
use std::time::Duration;

/// Everything besides the response that resolution depends on.
pub struct ResolveContext<'a> {
    pub kind: WorkflowKind,
    pub policy: ReferencePolicy,
    pub issuer: Option<&'a dyn LinkIssuer>,
    pub link_expiry: Duration,
    pub catalog: &'a Catalog,
}

/// Build the resolved record for `id`, issuing a download link if needed.
pub async fn resolve_output(
    id: JobId,
    file: &FilePayload,
    target: &str,
    response: ApiResponse,
    ctx: &ResolveContext<'_>,
) -> Result<ResolvedJob, JobError> {
    if response.reports_failure() {
        return Err(JobError::Rejected {
            status: response.status.unwrap_or_default(),
        });
    }

    let output_file_name = output_name(&response).ok_or_else(|| JobError::MalformedResponse {
        detail: "response names no converted file".into(),
    })?;

    let direct = response
        .converted_file
        .source_url
        .as_deref()
        .filter(|u| is_fetchable_url(u));

    let download_url = match (ctx.policy, direct) {
        (ReferencePolicy::WhenMissing, Some(url)) => url.to_string(),
        _ => match ctx.issuer {
            Some(issuer) => issuer.issue(&output_file_name, ctx.link_expiry).await?,
            None => direct
                .map(str::to_string)
                .ok_or_else(|| JobError::ReferenceIssuance {
                    file: output_file_name.clone(),
                    detail: "no link issuer configured".into(),
                })?,
        },
    };

    if download_url.trim().is_empty() {
        return Err(JobError::ReferenceIssuance {
            file: output_file_name,
            detail: "issuer returned an empty link".into(),
        });
    }

    let original_file_name = response
        .original_file
        .filename
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| file.name.clone());

    Ok(ResolvedJob {
        id,
        kind: ctx.kind,
        original_file_name,
        output_file_name,
        output_size: response.converted_file.converted_size,
        output_format: target.to_string(),
        output_extension: ctx.catalog.extension_for(target),
        download_url,
        extracted_text: response.extracted_text,
        status: JobStatus::Completed,
        completed_at: Utc::now(),
    })
}

fn output_name(response: &ApiResponse) -> Option<String> {
    if let Some(name) = response.converted_file.file_name.as_deref().filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    let url = response.converted_file.source_url.as_deref()?;
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|seg| !seg.is_empty())
        .map(str::to_string)
}

fn is_fetchable_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}
