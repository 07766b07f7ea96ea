use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use nzbfetch::cli::{Cli, Commands};
use nzbfetch::progress;
use nzbfetch::{Config, DownloadEngine, Nzb};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Download { nzb_file, .. } => {
            let nzb_file = nzb_file.clone();
            download_command(&cli, &nzb_file).await
        }
        Commands::Info { nzb_file } => info_command(nzb_file),
    }
}

async fn download_command(cli: &Cli, nzb_file: &Path) -> Result<()> {
    let nzb = Nzb::from_file(nzb_file)?;

    let mut config = Config::load()?;
    config.apply_overrides(cli.config_overrides());
    config.ensure_dirs()?;

    println!(
        "Downloading {} ({} files, {} segments, {}, {} connections)",
        nzb_file
            .file_name()
            .unwrap_or_default()
            .to_string_lossy(),
        nzb.files().len(),
        nzb.total_segments(),
        human_bytes::human_bytes(nzb.total_size() as f64),
        config.total_connections()
    );

    let bar = if cli.quiet {
        None
    } else {
        Some(progress::create_progress_bar(nzb.total_size()))
    };

    let mut engine = DownloadEngine::new(&config)?;
    if let Some(bar) = &bar {
        engine = engine.with_progress(bar.clone());
    }

    let started = Instant::now();
    let result = engine.download(&nzb).await;
    engine.shutdown();

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    result?;
    println!(
        "✓ {}",
        progress::format_download_summary(nzb.files().len(), nzb.total_size(), started.elapsed())
    );
    Ok(())
}

fn info_command(nzb_file: &Path) -> Result<()> {
    let nzb = Nzb::from_file(nzb_file)?;

    println!(
        "{}: {} files, {} segments, {}",
        nzb_file
            .file_name()
            .unwrap_or_default()
            .to_string_lossy(),
        nzb.files().len(),
        nzb.total_segments(),
        human_bytes::human_bytes(nzb.total_size() as f64)
    );
    for (i, file) in nzb.files().iter().enumerate() {
        println!(
            "  {:>3}. {} ({}, {} segments)",
            i + 1,
            file.file_name(),
            human_bytes::human_bytes(file.total_size() as f64),
            file.segments.segment.len()
        );
    }

    Ok(())
}
