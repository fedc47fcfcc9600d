//! CLI binary for docshift.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `WorkflowConfig`, runs one batch per invocation and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docshift::{
    download_resolved, format_file_size, truncate_filename, DocshiftError, FilePayload, FileStore,
    HttpConversionApi, JobId, JobOutcome, JobProgressCallback, KeyValueStore, LinkIssuer,
    ProgressCallback, ResolvedJob, Workflow, WorkflowConfig, WorkflowKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per finished job. Jobs finish in any
/// order, so start times are keyed by job id.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<JobId, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
    }

    fn elapsed_secs(&self, id: JobId) -> f64 {
        self.start_times
            .lock()
            .map(|mut t| t.remove(&id))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn abandon(&self) {
        self.bar.finish_and_clear();
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_jobs: usize) {
        self.activate_bar(total_jobs);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Sending {total_jobs} file(s)…"))
        ));
    }

    fn on_job_start(&self, id: JobId, file_name: &str) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(id, Instant::now());
        }
        self.bar.set_message(truncate_filename(file_name, 30));
    }

    fn on_job_complete(&self, id: JobId, file_name: &str, output_size: u64) {
        let elapsed = self.elapsed_secs(id);
        self.bar.println(format!(
            "  {} {:<30}  {:<12}  {}",
            green("✓"),
            truncate_filename(file_name, 30),
            dim(&format_file_size(output_size)),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_job_error(&self, id: JobId, file_name: &str, error: &str) {
        let elapsed = self.elapsed_secs(id);
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<30}  {}  {}",
            red("✗"),
            truncate_filename(file_name, 30),
            red(&truncate_filename(error, 80)),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_jobs: usize, success_count: usize) {
        let failed = total_jobs.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} file(s) converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} file(s) converted  ({} failed)",
                if failed == total_jobs { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_jobs,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # What can a file be converted to?
  docshift formats report.docx

  # Convert one file (target chosen per file)
  docshift convert report.docx=application/pdf

  # Convert several files to the same target
  docshift convert a.pdf b.pdf --to text/plain

  # OCR a scan into a Word document
  docshift ocr scan.png --format application/vnd.openxmlformats-officedocument.wordprocessingml.document

  # List, download and prune history (indices start at 1)
  docshift history
  docshift download 2 -o ./out
  docshift remove 2
  docshift --ocr clear

OCR OUTPUT FORMATS:
  text/plain                                                                 txt
  application/pdf                                                            pdf
  application/vnd.openxmlformats-officedocument.wordprocessingml.document    docx
  application/msword                                                         doc

ENVIRONMENT VARIABLES:
  DOCSHIFT_API_URL        Conversion API root (default http://localhost:8000)
  DOCSHIFT_AUTH_TOKEN     API token
  DOCSHIFT_STATE_DIR      History and catalog cache directory
  DOCSHIFT_S3_BUCKET      Bucket holding converted files; enables pre-signed links
  DOCSHIFT_S3_REGION      Region of that bucket
  AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / AWS_PROFILE   S3 credentials

  A `.env` file in the working directory is loaded first.
"#;

/// Convert files and run OCR through a remote conversion API.
#[derive(Parser, Debug)]
#[command(
    name = "docshift",
    version,
    about = "Convert files and run OCR through a remote conversion API",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Conversion API root URL.
    #[arg(long, global = true, env = "DOCSHIFT_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// API token.
    #[arg(long, global = true, env = "DOCSHIFT_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory for history and the cached catalog.
    #[arg(long, global = true, env = "DOCSHIFT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// S3 bucket holding converted files. Without it, only direct URLs from
    /// the API can be used as download links.
    #[arg(long, global = true, env = "DOCSHIFT_S3_BUCKET")]
    s3_bucket: Option<String>,

    /// Region of the S3 bucket.
    #[arg(long, global = true, env = "DOCSHIFT_S3_REGION")]
    s3_region: Option<String>,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, global = true, env = "DOCSHIFT_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Download-link validity in seconds.
    #[arg(long, global = true, env = "DOCSHIFT_LINK_EXPIRY", default_value_t = 3600)]
    link_expiry: u64,

    /// Use the OCR history for history/remove/clear/download.
    #[arg(long, global = true)]
    ocr: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOCSHIFT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSHIFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSHIFT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the conversion catalog, or the targets for one file.
    Formats {
        file: Option<PathBuf>,
    },
    /// Convert files. Give a target per file as PATH=TARGET, or one for all with --to.
    Convert {
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Extract text from images and PDFs. Give a format per file as PATH=FORMAT, or --format.
    Ocr {
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long)]
        format: Option<String>,
    },
    /// List completed jobs.
    History {
        /// Print JSON records instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Delete one history entry (1-based index from `history`).
    Remove { index: usize },
    /// Delete all history for the workflow.
    Clear,
    /// Download one completed output (1-based index from `history`).
    Download {
        index: usize,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar covers INFO-level feedback while a batch runs.
    let batch_command = matches!(cli.command, Command::Convert { .. } | Command::Ocr { .. });
    let show_progress = batch_command && !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(
        cli.state_dir.clone().unwrap_or_else(FileStore::default_dir),
    ));
    let history_kind = if cli.ocr { WorkflowKind::Ocr } else { WorkflowKind::Convert };

    match cli.command {
        Command::Formats { ref file } => {
            let workflow = open_workflow(&cli, WorkflowKind::Convert, None, store).await?;
            print_formats(&workflow, file.as_deref()).await
        }
        Command::Convert { ref inputs, ref to } => {
            run_batch(&cli, WorkflowKind::Convert, inputs, to.as_deref(), show_progress, store).await
        }
        Command::Ocr { ref inputs, ref format } => {
            run_batch(&cli, WorkflowKind::Ocr, inputs, format.as_deref(), show_progress, store).await
        }
        Command::History { json } => {
            let workflow = open_workflow(&cli, history_kind, None, store).await?;
            print_history(&workflow.resolved_snapshot().await, json)
        }
        Command::Remove { index } => {
            let workflow = open_workflow(&cli, history_kind, None, store).await?;
            let removed = workflow
                .remove_resolved_at(to_position(index)?)
                .await
                .context("Failed to update history")?
                .with_context(|| format!("No history entry #{index}"))?;
            if !cli.quiet {
                eprintln!("{} Removed {}", green("✔"), removed.output_file_name);
            }
            Ok(())
        }
        Command::Clear => {
            let workflow = open_workflow(&cli, history_kind, None, store).await?;
            workflow.clear_all().await.context("Failed to clear history")?;
            if !cli.quiet {
                eprintln!("{} Cleared {} history", green("✔"), workflow.kind());
            }
            Ok(())
        }
        Command::Download { index, ref output } => {
            let workflow = open_workflow(&cli, history_kind, None, store).await?;
            let job = workflow
                .resolved_at(to_position(index)?)
                .await
                .with_context(|| format!("No history entry #{index}"))?;
            let path = download_resolved(&job, output)
                .await
                .with_context(|| format!("Failed to download {}", job.output_file_name))?;
            if !cli.quiet {
                eprintln!("{} {}", green("✔"), bold(&path.display().to_string()));
            }
            Ok(())
        }
    }
}

/// Build the workflow for `kind` from CLI flags and load its history.
async fn open_workflow(
    cli: &Cli,
    kind: WorkflowKind,
    progress: Option<ProgressCallback>,
    store: Arc<dyn KeyValueStore>,
) -> Result<Workflow> {
    let mut builder = WorkflowConfig::builder()
        .kind(kind)
        .api_base_url(cli.api_url.clone())
        .request_timeout_secs(cli.timeout)
        .link_expiry_secs(cli.link_expiry);
    if let Some(ref token) = cli.token {
        builder = builder.auth_token(token.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let api = Arc::new(HttpConversionApi::new(&config).context("Failed to build HTTP client")?);
    let issuer = build_issuer(cli).await;
    Workflow::open(config, api, issuer, store)
        .await
        .context("Failed to load history")
}

#[cfg(feature = "s3")]
async fn build_issuer(cli: &Cli) -> Option<Arc<dyn LinkIssuer>> {
    let bucket = cli.s3_bucket.clone()?;
    let issuer = docshift::S3LinkIssuer::from_env(bucket, cli.s3_region.clone()).await;
    Some(Arc::new(issuer))
}

#[cfg(not(feature = "s3"))]
async fn build_issuer(cli: &Cli) -> Option<Arc<dyn LinkIssuer>> {
    if cli.s3_bucket.is_some() {
        tracing::warn!("--s3-bucket ignored: built without the `s3` feature");
    }
    None
}

/// Add every input, assign targets, run one batch and print the outputs.
async fn run_batch(
    cli: &Cli,
    kind: WorkflowKind,
    inputs: &[String],
    default_target: Option<&str>,
    show_progress: bool,
    store: Arc<dyn KeyValueStore>,
) -> Result<()> {
    let progress = show_progress.then(CliProgressCallback::new);
    let workflow = open_workflow(
        cli,
        kind,
        progress.clone().map(|cb| cb as ProgressCallback),
        store,
    )
    .await?;

    let mut files = Vec::with_capacity(inputs.len());
    let mut targets = Vec::with_capacity(inputs.len());
    for input in inputs {
        let (path, target) = split_input(input);
        let file = FilePayload::from_path(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(file);
        targets.push(target.or_else(|| default_target.map(str::to_string)));
    }

    let ids = match workflow.add_files(files).await {
        Ok(ids) => ids,
        Err(e) => {
            abandon(&progress);
            return Err(e).context("Rejected input");
        }
    };

    for (id, target) in ids.iter().zip(targets) {
        let Some(target) = target else { continue };
        let offered = workflow.targets_for(*id).await;
        if !offered.is_empty() && !offered.contains(&target) {
            tracing::warn!("'{}' is not among the offered targets: {}", target, offered.join(", "));
        }
        workflow.set_target(*id, target).await;
    }

    let summary = match workflow.run_batch().await {
        Ok(summary) => summary,
        Err(DocshiftError::MissingTargets { files }) => {
            abandon(&progress);
            eprintln!("{} Select a target format for every file:", red("✘"));
            for job in workflow.pending_snapshot().await {
                if job.has_target() {
                    continue;
                }
                let offered = workflow.targets_for(job.id).await;
                let hint = if offered.is_empty() {
                    "no targets known for this file".to_string()
                } else {
                    offered.join(", ")
                };
                eprintln!("  {}  {}", bold(&job.file.name), dim(&hint));
            }
            anyhow::bail!("{} file(s) without a target", files.len());
        }
        Err(e) => {
            abandon(&progress);
            return Err(e).context("Batch failed to start");
        }
    };

    if !cli.quiet {
        let resolved = workflow.resolved_snapshot().await;
        for (id, outcome) in &summary.outcomes {
            match outcome {
                JobOutcome::Completed => {
                    if let Some(job) = resolved.iter().find(|r| r.id == *id) {
                        println!("{}\t{}", job.output_file_name, job.download_url);
                    }
                }
                JobOutcome::Failed(err) if !show_progress => {
                    eprintln!("{} {}: {}", red("✗"), id, err);
                }
                _ => {}
            }
        }
    }

    if summary.failed() > 0 {
        anyhow::bail!("{} of {} file(s) failed", summary.failed(), summary.len());
    }
    Ok(())
}

fn abandon(progress: &Option<Arc<CliProgressCallback>>) {
    if let Some(ref cb) = progress {
        cb.abandon();
    }
}

async fn print_formats(workflow: &Workflow, file: Option<&Path>) -> Result<()> {
    if let Some(path) = file {
        let payload = FilePayload::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let catalog = workflow.load_catalog().await;
        let source = catalog.lookup_source_format(&payload);
        let targets = workflow.targets_for_file(&payload).await;

        println!("File:     {}", payload.name);
        println!("Source:   {}", source.unwrap_or("(not recognised)"));
        if targets.is_empty() {
            println!("Targets:  none");
        } else {
            println!("Targets:");
            for t in targets {
                println!("  {t}  {}", dim(&format!(".{}", catalog.extension_for(&t))));
            }
        }
        return Ok(());
    }

    let catalog = workflow.load_catalog().await;
    if catalog.is_empty() {
        eprintln!("{} No conversions available (is the API reachable?)", cyan("⚠"));
        return Ok(());
    }
    for (source, descriptor) in catalog.iter() {
        println!(
            "{} {}\n    → {}",
            bold(source),
            dim(&format!(".{}", descriptor.extension)),
            descriptor.targetable_formats.join(", ")
        );
    }
    Ok(())
}

fn print_history(resolved: &[ResolvedJob], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(resolved).context("Failed to serialise history")?
        );
        return Ok(());
    }
    if resolved.is_empty() {
        eprintln!("{}", dim("No history."));
        return Ok(());
    }
    for (i, job) in resolved.iter().enumerate() {
        println!(
            "{:>3}  {:<30}  →  {:<30}  {:>12}  {}",
            i + 1,
            truncate_filename(&job.original_file_name, 30),
            truncate_filename(&job.output_file_name, 30),
            format_file_size(job.output_size),
            dim(&job.completed_at.format("%Y-%m-%d %H:%M").to_string()),
        );
    }
    Ok(())
}

/// `PATH=TARGET` → (`PATH`, `TARGET`). An existing path containing `=` is
/// taken whole.
fn split_input(input: &str) -> (PathBuf, Option<String>) {
    if Path::new(input).exists() {
        return (PathBuf::from(input), None);
    }
    match input.rsplit_once('=') {
        Some((path, target)) if !target.trim().is_empty() => {
            (PathBuf::from(path), Some(target.trim().to_string()))
        }
        _ => (PathBuf::from(input), None),
    }
}

fn to_position(index: usize) -> Result<usize> {
    index
        .checked_sub(1)
        .context("History indices start at 1")
}
