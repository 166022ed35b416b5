use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_ENV: &str = "MARKET_PULSE_LOG";

/// Installs the global subscriber: human-readable lines on stdout plus a
/// plain-text copy in `<log_dir>/<stage>_<YYYYMMDD>.log`.
///
/// The filter comes from `MARKET_PULSE_LOG`, then `RUST_LOG`, then `info`.
pub fn init_tracing(log_dir: &Path, stage: &str, date: NaiveDate) -> anyhow::Result<PathBuf> {
    let filter = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(&filter)
        .map_err(|err| anyhow::anyhow!("invalid log filter {filter:?}: {err}"))?;

    fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(format!("{}_{}.log", stage, date.format("%Y%m%d")));
    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()?;

    Ok(log_path)
}
