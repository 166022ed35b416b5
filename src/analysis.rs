//! Stage drivers shared by the CLI commands.

use anyhow::Result;
use chrono::NaiveDate;
use std::path::PathBuf;

use crate::config::{AppConfig, DataSettings};
use crate::downloader::{self, DownloadOutcome};
use crate::processor::{self, IndicatorEngine, SymbolSummary};
use crate::report;
use crate::storage_utils::AsyncStorageManager;
use crate::summary_table;

/// Shared state for one run: storage root, configuration and run date.
pub struct RunContext {
    pub storage: AsyncStorageManager,
    pub config: AppConfig,
    pub date: NaiveDate,
}

pub async fn run_download(
    ctx: &RunContext,
    symbols: Option<&[String]>,
    settings: DataSettings,
) -> Result<DownloadOutcome> {
    downloader::download_all(&ctx.storage, &ctx.config, settings, symbols, ctx.date).await
}

/// Annotates every raw series and prints the latest-bar summaries.
pub async fn run_processing(ctx: &RunContext, symbols: Option<&[String]>) -> Result<Vec<SymbolSummary>> {
    let engine = IndicatorEngine::default();
    let summaries = processor::process_all(&ctx.storage, &ctx.config, &engine, symbols, ctx.date).await?;

    println!("\n{}", summary_table::build_table(&summaries));
    println!("Processed {} symbols", summaries.len());
    Ok(summaries)
}

pub async fn run_report(ctx: &RunContext, symbols: Option<&[String]>) -> Result<PathBuf> {
    let path = report::generate_daily_report(&ctx.storage, &ctx.config, symbols, ctx.date).await?;
    println!("Report generated successfully: {}", path.display());
    Ok(path)
}

/// Runs the full pipeline:
/// 1. Downloads daily bars for each symbol.
/// 2. Computes indicators and writes processed files.
/// 3. Aggregates the market and renders the HTML report.
///
/// A download failure for some symbols is not fatal; processing uses
/// whatever raw data is on disk.
pub async fn run_analysis_pipeline(ctx: &RunContext, symbols: Option<&[String]>) -> Result<PathBuf> {
    tracing::info!("--- Step 1: Downloading market data ---");
    let outcome = run_download(ctx, symbols, ctx.config.data_settings.clone()).await?;
    if outcome.successful == 0 {
        tracing::warn!("no symbols downloaded, continuing with existing data");
    }

    tracing::info!("--- Step 2: Calculating indicators ---");
    run_processing(ctx, symbols).await?;

    tracing::info!("--- Step 3: Generating report ---");
    run_report(ctx, symbols).await
}
