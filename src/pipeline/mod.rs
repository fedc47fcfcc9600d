//! Per-job stages between the registry and the network.
//!
//! ```text
//! api ──▶ resolve ──▶ links
//! (HTTP)   (response → ResolvedJob)  (pre-signed URL)
//! ```
//!
//! 1. [`api`]: the remote conversion and OCR calls, plus the catalog fetch
//! 2. [`resolve`]: build the resolved record from a successful response
//! 3. [`links`]: issue the time-limited download link for the output

pub mod api;
pub mod links;
pub mod resolve;
