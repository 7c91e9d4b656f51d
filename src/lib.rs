//! # color-assist
//!
//! Color-correction advice for photographers from an Azure OpenAI chat
//! deployment. Send exported photo thumbnails and get back concrete Lightroom
//! adjustments. Connection problems come back as staged, human-readable
//! diagnostics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use color_assist::ai::AzureChatClient;
//! use color_assist::config::Config;
//! use color_assist::pipeline::{
//!     BatchOptions, CancellationFlag, PhotoJob, analyze_batch, collect_images, export_thumbnail,
//! };
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let client = Arc::new(AzureChatClient::new(
//!         config.api_versions.clone(),
//!         config.analysis.clone(),
//!     ));
//!
//!     // Check credentials first: validation, current API version, legacy fallback
//!     let report = client.test_connection(&config.azure, false).await;
//!     if !report.success {
//!         anyhow::bail!("{}", report.message);
//!     }
//!
//!     let mut jobs = Vec::new();
//!     for path in collect_images(&[PathBuf::from("./photos")]) {
//!         jobs.push(PhotoJob {
//!             label: path.display().to_string(),
//!             image_bytes: export_thumbnail(&path, config.batch.thumbnail_edge)?,
//!         });
//!     }
//!
//!     let options = BatchOptions::from(&config.batch);
//!     let batch = analyze_batch(client, &config.azure, jobs, &options, &CancellationFlag::new()).await;
//!     for outcome in &batch.outcomes {
//!         println!("{}: {:?}", outcome.label, outcome.result);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Connection test stages
//!
//! | Stage | Request | Moves on when |
//! |-------|---------|---------------|
//! | Basic validation | none | config is well formed |
//! | Primary probe | current API version, `max_completion_tokens`, `model` | HTTP 400 |
//! | Fallback probe | legacy API version, same payload | never (final) |
//! | Legacy compatibility probe | current API version, `max_tokens`, no `model` | run separately |
//!
//! ## Modules
//!
//! - [`ai`] — the Azure chat client: validation, payloads, transport, probes, diagnostics
//! - [`config`] — configuration types and loading/saving
//! - [`error`] — error taxonomy
//! - [`json`] — minimal JSON encoder and field extractor for the wire format
//! - [`pipeline`] — thumbnail export and batch analysis

pub mod ai;
pub mod config;
pub mod error;
pub mod json;
pub mod pipeline;
