use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use market_pulse::analysis::{self, RunContext};
use market_pulse::logging;
use market_pulse::storage_utils::{AsyncStorageManager, LoadedConfig};

#[derive(Parser)]
#[command(author, version, about = "Download daily bars, compute indicators and render a market report")]
struct Cli {
    /// Storage root (defaults to a `storage` directory next to the binary)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file, relative to the storage root (defaults to config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download daily bars for the configured (or given) symbols
    Download {
        /// Specific symbols to download (e.g. AAPL MSFT)
        #[arg(long, num_args = 1..)]
        symbols: Option<Vec<String>>,

        /// Data period, e.g. 1mo, 6mo, 1y
        #[arg(long)]
        period: Option<String>,

        /// Bar interval, e.g. 1d
        #[arg(long)]
        interval: Option<String>,
    },

    /// Calculate technical indicators for downloaded data
    Process {
        /// Process a single symbol only
        #[arg(long)]
        symbol: Option<String>,
    },

    /// Generate the HTML market report from processed data
    Report {
        /// Specific symbols to include in the report
        #[arg(long, num_args = 1..)]
        symbols: Option<Vec<String>>,
    },

    /// Download, process and report in one go
    Run {
        #[arg(long, num_args = 1..)]
        symbols: Option<Vec<String>>,
    },
}

impl Commands {
    /// Prefix of the log file for this command.
    fn stage(&self) -> &'static str {
        match self {
            Commands::Download { .. } => "data_download",
            Commands::Process { .. } => "data_processing",
            Commands::Report { .. } => "report_generation",
            Commands::Run { .. } => "pipeline",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let storage = match &cli.root {
        Some(root) => AsyncStorageManager::new(root).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let LoadedConfig {
        config,
        path: config_path,
        from_file,
    } = storage.load_config(cli.config.as_deref()).await?;
    let date = Local::now().date_naive();

    let log_dir = storage.resolve(&config.paths.logs_dir);
    let log_path = logging::init_tracing(&log_dir, cli.command.stage(), date)?;
    tracing::debug!(root = %storage.base_dir.display(), log = %log_path.display(), "storage ready");
    if !from_file {
        tracing::warn!(path = %config_path.display(), "config not found, using defaults");
    }

    let ctx = RunContext {
        storage,
        config,
        date,
    };

    let result = match cli.command {
        Commands::Download {
            symbols,
            period,
            interval,
        } => {
            let mut settings = ctx.config.data_settings.clone();
            if let Some(period) = period {
                settings.period = period;
            }
            if let Some(interval) = interval {
                settings.interval = interval;
            }
            analysis::run_download(&ctx, symbols.as_deref(), settings)
                .await
                .map(|_| ())
        }
        Commands::Process { symbol } => {
            let filter = symbol.map(|s| vec![s]);
            analysis::run_processing(&ctx, filter.as_deref()).await.map(|_| ())
        }
        Commands::Report { symbols } => analysis::run_report(&ctx, symbols.as_deref()).await.map(|_| ()),
        Commands::Run { symbols } => analysis::run_analysis_pipeline(&ctx, symbols.as_deref())
            .await
            .map(|_| ()),
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "run failed");
    }
    result
}
