use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use color_assist::ai::{AzureChatClient, ConnectionReport, diagnostics};
use color_assist::config;
use color_assist::pipeline::{self, BatchOptions, BatchReport, CancellationFlag, PhotoJob};

#[derive(Parser, Debug)]
#[command(
    name = "color-assist",
    version,
    about = "Color-correction advice for photos from an Azure OpenAI deployment"
)]
struct Cli {
    /// Image files or directories to analyze
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Run the staged connection test and exit
    #[arg(long = "test-connection")]
    test_connection: bool,

    /// Probe with the older payload shape (max_tokens, no model) and exit
    #[arg(long = "legacy-probe")]
    legacy_probe: bool,

    /// Capture and print request/response diagnostics
    #[arg(long)]
    diagnostics: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Maximum requests in flight (overrides config)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Load config
    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_env_overrides();
    if let Some(n) = cli.concurrency {
        config.batch.concurrency = n;
    }
    log::debug!("Settings: {}", config.describe());

    let client = Arc::new(AzureChatClient::new(
        config.api_versions.clone(),
        config.analysis.clone(),
    ));

    // Handle --test-connection / --legacy-probe
    if cli.test_connection || cli.legacy_probe {
        let mut all_ok = true;
        if cli.test_connection {
            let report = client.test_connection(&config.azure, cli.diagnostics).await;
            all_ok &= report.success;
            print_connection_report(&report, cli.json)?;
        }
        if cli.legacy_probe {
            let report = client
                .test_legacy_compatibility(&config.azure, cli.diagnostics)
                .await;
            all_ok &= report.success;
            print_connection_report(&report, cli.json)?;
        }
        if !all_ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    // Collect images and export thumbnails
    let images = pipeline::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }
    log::info!("Found {} image(s) to analyze", images.len());

    let mut jobs = Vec::with_capacity(images.len());
    for path in &images {
        match pipeline::export_thumbnail(path, config.batch.thumbnail_edge) {
            Ok(bytes) => jobs.push(PhotoJob {
                label: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
                image_bytes: bytes,
            }),
            Err(e) => log::error!("Skipping {}: {e:#}", path.display()),
        }
    }

    // Ctrl-C stops new requests; in-flight ones finish
    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted: finishing in-flight requests");
            on_signal.cancel();
        }
    });

    let mut options = BatchOptions::from(&config.batch);
    options.capture_diagnostics = cli.diagnostics;
    let total = jobs.len();
    let report = pipeline::analyze_batch(client, &config.azure, jobs, &options, &cancel).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_batch_report(&report, cli.diagnostics);
    }

    log::info!(
        "Done: {} succeeded, {} failed, {} skipped out of {total} photos",
        report.succeeded(),
        report.failed(),
        report.skipped()
    );

    Ok(())
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

fn print_connection_report(report: &ConnectionReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let color = if report.success { GREEN } else { RED };
    println!();
    println!("  {BOLD}Connection test{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(72));
    for line in report.render().lines() {
        println!("  {line}");
    }
    println!("  {color}{}{RESET}", if report.success { "Connected" } else { "Not connected" });

    if !report.diagnostics.is_empty() {
        println!();
        println!("  {BOLD}Diagnostics{RESET}");
        println!("{}", diagnostics::render_report(&report.diagnostics));
    }
    Ok(())
}

fn print_batch_report(report: &BatchReport, show_diagnostics: bool) {
    for outcome in &report.outcomes {
        println!();
        println!("{BOLD}{}{RESET}", outcome.label);
        println!("{DIM}{}{RESET}", "═".repeat(72));
        match &outcome.result {
            Some(result) => match result.text() {
                Some(text) => println!("{text}"),
                None => println!(
                    "{RED}{}{RESET}",
                    result.message().unwrap_or("Request failed")
                ),
            },
            None => println!("{DIM}(not sent: batch cancelled){RESET}"),
        }
        if show_diagnostics {
            if let Some(ref record) = outcome.diagnostic {
                println!("{DIM}{}{RESET}", record.render());
            }
        }
    }
    println!();
}
