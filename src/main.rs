use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use bucketsync::fs::S3Store;
use bucketsync::{SyncOptions, SyncRunner, SyncSummary};

#[derive(Parser)]
#[command(name = "bucketsync")]
#[command(about = "Push a build directory to an S3 bucket, uploading only what changed", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "bucketsync.toml")]
    config: PathBuf,

    /// Upload every file without comparing
    #[arg(long)]
    force: bool,

    /// Delete remote objects missing locally
    #[arg(long)]
    delete: bool,

    /// Show what would change without touching the bucket
    #[arg(long)]
    dry_run: bool,

    /// Upload `.gz` siblings in place of originals
    #[arg(long)]
    prefer_gzip: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bucketsync=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{}: {:#}", "error".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let mut options = SyncOptions::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    options.force |= cli.force;
    options.delete |= cli.delete;
    options.dry_run |= cli.dry_run;
    options.prefer_gzip |= cli.prefer_gzip;
    options.validate()?;

    let store = S3Store::from_options(&options).context("configuring S3 store")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    let summary = SyncRunner::new(options, Arc::new(store))
        .with_cancellation(cancel)
        .run()
        .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(summary.is_success())
}

fn print_summary(summary: &SyncSummary) {
    let title = if summary.dry_run { "Dry run" } else { "Sync" };

    if summary.is_noop() && !summary.cancelled {
        println!("{} {}: nothing to do ({} unchanged)", "✓".green(), title, summary.skipped);
        return;
    }

    println!("{}", format!("{} summary", title).bold());
    println!("  {:<10} {}", "created".green(), summary.created);
    println!("  {:<10} {}", "updated".yellow(), summary.updated);
    println!("  {:<10} {}", "deleted".red(), summary.deleted);
    println!("  {:<10} {}", "unchanged", summary.skipped);
    if !summary.dry_run {
        println!(
            "  {:<10} {} in {:.1}s",
            "uploaded",
            humansize::format_size(summary.bytes_uploaded, humansize::BINARY),
            summary.duration.as_secs_f64()
        );
    }

    if !summary.failures.is_empty() {
        println!("{}", format!("{} failed:", summary.failed).red().bold());
        for failure in &summary.failures {
            println!("  {} {} ({})", failure.operation, failure.path, failure.cause);
        }
    }
    if summary.cancelled {
        println!("{}", "Cancelled before all files were processed".yellow());
    }
}
