//! Batch analysis and the thumbnail exporter that feeds it.
//!
//! The exporter half ([`collect_images`], [`export_thumbnail`]) plays the
//! role of the host's photo export: it finds image files and produces JPEG
//! thumbnails. The batch half ([`analyze_batch`]) pushes those thumbnails
//! through an [`AzureChatClient`] with a bound on in-flight requests and a
//! cooperative cancellation flag.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::ai::{ApiCallResult, AzureChatClient, DiagnosticRecord, Transport};
use crate::error::ErrorKind;
use crate::config::{AzureConfig, BatchSettings};

/// Extensions the exporter can decode.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tif", "tiff", "webp"];

/// Collect supported image files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks).
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode an image, shrink it so its longest edge is at most `max_edge`, and
/// re-encode it as JPEG. Smaller images are re-encoded at their own size.
pub fn export_thumbnail(path: &Path, max_edge: u32) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    thumbnail_from_bytes(&bytes, max_edge)
        .with_context(|| format!("Failed to export thumbnail for {}", path.display()))
}

/// [`export_thumbnail`] for in-memory image data.
pub fn thumbnail_from_bytes(bytes: &[u8], max_edge: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;
    let img = if img.width() > max_edge || img.height() > max_edge {
        img.thumbnail(max_edge, max_edge)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, image::ImageFormat::Jpeg)
        .context("Failed to encode JPEG thumbnail")?;
    Ok(out.into_inner())
}

/// One photo to analyze.
#[derive(Debug, Clone)]
pub struct PhotoJob {
    /// Shown to the model and in reports (usually the file name).
    pub label: String,
    /// Encoded JPEG thumbnail.
    pub image_bytes: Vec<u8>,
}

/// Shared stop signal for a batch. Checked between photos only; a request
/// already in flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Maximum requests in flight; 0 is treated as 1.
    pub concurrency: usize,
    /// Pause between dispatches.
    pub delay: Duration,
    pub capture_diagnostics: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&BatchSettings::default())
    }
}

impl From<&BatchSettings> for BatchOptions {
    fn from(settings: &BatchSettings) -> Self {
        Self {
            concurrency: settings.concurrency,
            delay: Duration::from_millis(settings.delay_ms),
            capture_diagnostics: false,
        }
    }
}

/// What happened to one photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoOutcome {
    pub label: String,
    /// `None` when the photo was never sent because the batch was cancelled.
    pub result: Option<ApiCallResult>,
    pub diagnostic: Option<DiagnosticRecord>,
}

impl PhotoOutcome {
    pub fn skipped(&self) -> bool {
        self.result.is_none()
    }
}

/// Per-photo outcomes, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<PhotoOutcome>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.as_ref().is_some_and(ApiCallResult::is_success))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.as_ref().is_some_and(|r| !r.is_success()))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.skipped()).count()
    }
}

/// Analyze photos with at most `options.concurrency` requests in flight.
///
/// The cancellation flag is checked before each photo is dispatched. Once it
/// is set no further requests are issued; photos not yet sent are reported as
/// skipped and requests already in flight finish normally. Failures of one
/// photo never stop the batch: rate limits and server errors come back as
/// that photo's [`ApiCallResult`], and any backoff is up to the caller
/// (`options.delay` paces dispatches).
pub async fn analyze_batch<T>(
    client: Arc<AzureChatClient<T>>,
    config: &AzureConfig,
    jobs: Vec<PhotoJob>,
    options: &BatchOptions,
    cancel: &CancellationFlag,
) -> BatchReport
where
    T: Transport + 'static,
{
    let total = jobs.len();
    let limit = options.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let config = Arc::new(config.clone());
    let mut slots: Vec<Option<PhotoOutcome>> = vec![None; total];
    let labels: Vec<String> = jobs.iter().map(|j| j.label.clone()).collect();
    let mut tasks = JoinSet::new();
    let mut cancelled = false;

    log::info!("Analyzing {total} photo(s), up to {limit} at a time");

    for (index, job) in jobs.into_iter().enumerate() {
        if index > 0 && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        if cancel.is_cancelled() {
            log::warn!("Batch cancelled; {} photo(s) not sent", total - index);
            cancelled = true;
            break;
        }

        log::info!("[{}/{}] Sending {}", index + 1, total, job.label);
        let client = Arc::clone(&client);
        let config = Arc::clone(&config);
        let capture = options.capture_diagnostics;
        tasks.spawn(async move {
            let _permit = permit;
            let PhotoJob { label, image_bytes } = job;
            let photo_label = label.clone();
            let work = tokio::spawn(async move {
                if capture {
                    client.analyze_with_diagnostics(&config, &image_bytes, &photo_label).await
                } else {
                    (client.analyze(&config, &image_bytes, &photo_label).await, None)
                }
            });
            let outcome = match work.await {
                Ok((result, diagnostic)) => PhotoOutcome {
                    label,
                    result: Some(result),
                    diagnostic,
                },
                // a panicked analysis was sent, so it counts as failed
                Err(e) => PhotoOutcome {
                    result: Some(ApiCallResult::Failure {
                        kind: ErrorKind::NoResponse,
                        message: format!("Analysis of {label} aborted: {e}"),
                        http_status: None,
                    }),
                    label,
                    diagnostic: None,
                },
            };
            (index, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome)) => {
                match &outcome.result {
                    Some(ApiCallResult::Failure { message, .. }) => {
                        log::warn!("  {} failed: {message}", outcome.label);
                    }
                    _ => log::info!("  {} done", outcome.label),
                }
                slots[index] = Some(outcome);
            }
            Err(e) => log::error!("Analysis task failed: {e}"),
        }
    }

    // anything without an outcome was never sent
    let outcomes = slots
        .into_iter()
        .zip(labels)
        .map(|(slot, label)| {
            slot.unwrap_or(PhotoOutcome {
                label,
                result: None,
                diagnostic: None,
            })
        })
        .collect();

    BatchReport {
        outcomes,
        cancelled,
    }
}
