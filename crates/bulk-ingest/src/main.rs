//! Bulk Ingest - Main entry point

use anyhow::Context;
use bulk_ingest::service::rest::RestConfig;
use bulk_ingest::{
    Cli, InMemoryMediaService, IngestMode, IngestOutcome, Ingestor, MediaService,
    RestMediaService, Settings,
};
use bulk_ingest_common::logging::{init_logging, LogConfig};
use clap::Parser;
use colored::Colorize;
use inquire::Select;
use std::io::IsTerminal;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Polls after which a dry run pretends the external upload finished
const DRY_RUN_EXTERNAL_POLLS: u32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Environment variables take precedence over the verbose flag
    let log_config = LogConfig::for_cli(cli.verbose)
        .with_env_overrides()
        .unwrap_or_else(|_| LogConfig::for_cli(cli.verbose));

    // The CLI still works without logging
    let _guard = init_logging(&log_config).ok().flatten();

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Ingest failed");
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(folder) = &cli.watch_folder {
        settings.watch_folder = folder.clone();
    }
    settings.validate(!cli.dry_run)?;

    let mode = match cli.mode {
        Some(mode) => mode,
        None => prompt_mode()?,
    };

    let service: Arc<dyn MediaService> = if cli.dry_run {
        let service = InMemoryMediaService::new();
        service.complete_external_uploads_after(DRY_RUN_EXTERNAL_POLLS);
        Arc::new(service)
    } else {
        Arc::new(RestMediaService::new(RestConfig::from(&settings))?)
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling ingest");
            on_interrupt.cancel();
        }
    });

    info!(folder = %settings.watch_folder.display(), %mode, dry_run = cli.dry_run, "Starting ingest");

    let ingestor = Ingestor::new(service, settings.ingest.clone())
        .with_progress_bars(std::io::stderr().is_terminal());
    let outcome = ingestor
        .run(&settings.watch_folder, mode, &cancel)
        .await
        .with_context(|| format!("Ingest of '{}' failed", settings.watch_folder.display()))?;

    print_outcome(&outcome);

    if !cli.no_wait {
        println!();
        println!("Press Enter to exit.");
        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)
        })
        .await??;
    }

    Ok(())
}

fn prompt_mode() -> anyhow::Result<IngestMode> {
    let mode = Select::new(
        "Upload the files directly (D) or through an external ingest manifest (E)?",
        vec![IngestMode::Direct, IngestMode::External],
    )
    .prompt()?;
    Ok(mode)
}

fn print_outcome(outcome: &IngestOutcome) {
    println!("{} Asset published", "✓".green().bold());
    println!("  {:14} {}", "Asset id:".bold(), outcome.asset.id);
    if let Some(alternate_id) = &outcome.asset.alternate_id {
        println!("  {:14} {}", "Alternate id:".bold(), alternate_id);
    }
    println!("  {:14} {}", "Primary file:".bold(), outcome.manifest_file.name);
    println!("  {:14} {}", "Files:".bold(), outcome.files.len());
    println!();

    for (label, url) in outcome.publication.playback.entries() {
        println!("{}", format!("{label} URL:").cyan().bold());
        println!("{url}");
    }
}
