//! Download action for resolved jobs, plus small display helpers.

use crate::error::DocshiftError;
use crate::job::ResolvedJob;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Fetch a resolved job's output into `dest_dir` and return the written path.
///
/// OCR results in `text/plain` carry their text inline and are written
/// without a network request. Everything else is fetched from the job's
/// download URL.
pub async fn download_resolved(job: &ResolvedJob, dest_dir: impl AsRef<Path>) -> Result<PathBuf, DocshiftError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .map_err(|e| DocshiftError::Internal(format!("HTTP client: {e}")))?;
    download_with(&client, job, dest_dir).await
}

/// [`download_resolved`] with a caller-supplied client.
pub async fn download_with(
    client: &reqwest::Client,
    job: &ResolvedJob,
    dest_dir: impl AsRef<Path>,
) -> Result<PathBuf, DocshiftError> {
    let path = dest_dir.as_ref().join(local_file_name(job));

    let bytes = match job.extracted_text {
        Some(ref text) if job.is_inline_text() => {
            debug!("Writing inline text for '{}'", job.output_file_name);
            text.as_bytes().to_vec()
        }
        _ => fetch(client, job).await?,
    };

    write_atomic(&path, &bytes).await?;
    info!("Downloaded '{}' → {} ({} bytes)", job.output_file_name, path.display(), bytes.len());
    Ok(path)
}

async fn fetch(client: &reqwest::Client, job: &ResolvedJob) -> Result<Vec<u8>, DocshiftError> {
    let failed = |reason: String| DocshiftError::DownloadFailed {
        file: job.output_file_name.clone(),
        reason,
    };

    debug!("GET {}", job.download_url);
    let response = client
        .get(&job.download_url)
        .send()
        .await
        .map_err(|e| failed(format!("Network error or server unreachable: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(failed(format!("HTTP error! Status: {}", status.as_u16())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// The last path component of the output name, so a server-supplied name
/// can never escape the destination directory.
fn local_file_name(job: &ResolvedJob) -> String {
    Path::new(&job.output_file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("output.{}", job.output_extension))
}

/// Temp file next to the target, then rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DocshiftError> {
    let write_err = |source: std::io::Error| DocshiftError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp_path = PathBuf::from(tmp);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Human-readable size: `512 bytes`, `1.50 KB`, `2.00 MB`, `1.25 GB`.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{bytes} bytes")
    } else if bytes < MB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    }
}

/// Cut `name` to at most `max_len` characters, ending in `...` when cut.
pub fn truncate_filename(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = name.chars().take(keep).collect();
    out.push_str("...");
    out
}
