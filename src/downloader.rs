use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::bars::{Bar, normalize_series};
use crate::config::{AppConfig, DataSettings};
use crate::error::DownloadError;
use crate::filter_utils::raw_file_name;
use crate::storage_utils::AsyncStorageManager;

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const USER_AGENT: &str = concat!("market-pulse/", env!("CARGO_PKG_VERSION"));
/// Minimum spacing between the start of two request batches.
const BATCH_SPACING: Duration = Duration::from_secs(1);
/// Upper bound on how long a Retry-After header can make us wait.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

// --- Provider response ---

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Deserialize, Debug)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug, Default)]
struct ChartMeta {
    /// Exchange offset from UTC in seconds.
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Deserialize, Debug)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

// Every column may contain nulls for halted or partial sessions.
#[derive(Deserialize, Debug, Default)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Turns a chart payload into a clean, ascending, de-duplicated series.
/// Rows with a missing column or inconsistent prices are dropped.
fn parse_chart(symbol: &str, response: ChartResponse) -> Result<Vec<Bar>, DownloadError> {
    if let Some(err) = response.chart.error {
        return Err(DownloadError::Api(format!("{}: {}", err.code, err.description)));
    }
    let Some(result) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Err(DownloadError::Empty(symbol.to_string()));
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let offset = result.meta.gmtoffset;

    let column = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();

    let mut bars = Vec::with_capacity(result.timestamp.len());
    let mut dropped = 0usize;
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let row = (
            session_date(ts, offset),
            column(&quote.open, i),
            column(&quote.high, i),
            column(&quote.low, i),
            column(&quote.close, i),
            column(&quote.volume, i),
        );
        let (Some(date), Some(open), Some(high), Some(low), Some(close), Some(volume)) = row else {
            dropped += 1;
            continue;
        };

        let bar = Bar {
            date,
            open,
            high,
            low,
            close,
            volume: volume.max(0.0).round() as u64,
            symbol: symbol.to_string(),
        };
        if bar.is_valid() {
            bars.push(bar);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        tracing::debug!(%symbol, dropped, "dropped incomplete or inconsistent rows");
    }
    if bars.is_empty() {
        return Err(DownloadError::Empty(symbol.to_string()));
    }
    Ok(normalize_series(bars))
}

/// Calendar day of a session in the exchange's local time.
fn session_date(ts: i64, gmtoffset: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts.checked_add(gmtoffset)?, 0).map(|dt| dt.date_naive())
}

// --- Client ---

pub struct Downloader {
    client: Client,
    settings: DataSettings,
}

impl Downloader {
    pub fn new(settings: DataSettings) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .pool_max_idle_per_host(settings.batch_size.max(1))
            .build()?;
        Ok(Self { client, settings })
    }

    /// Fetches the configured period of daily bars for one symbol.
    pub async fn fetch_symbol(&self, symbol: &str) -> Result<Vec<Bar>, DownloadError> {
        tracing::info!(%symbol, "downloading data");

        let url = format!("{}/{}", CHART_URL, symbol);
        let query = [
            ("range", self.settings.period.as_str()),
            ("interval", self.settings.interval.as_str()),
        ];
        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(BATCH_SPACING)
                .min(MAX_RETRY_AFTER);
            tracing::warn!(%symbol, wait_secs = wait.as_secs(), "rate limited, backing off");
            tokio::time::sleep(wait).await;
            return Err(DownloadError::RateLimited(status.as_u16()));
        }
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let payload: ChartResponse = response.json().await?;
        let bars = parse_chart(symbol, payload)?;
        tracing::info!(%symbol, records = bars.len(), "downloaded records");
        Ok(bars)
    }
}

#[derive(Debug, Default)]
pub struct DownloadOutcome {
    pub successful: usize,
    pub failed: Vec<String>,
}

/// Downloads every requested symbol (the configured list when `symbols` is
/// `None`) and writes `<data_dir>/<SYMBOL>_<YYYYMMDD>.csv` for each.
///
/// Requests run concurrently within a batch; failures are collected rather
/// than aborting the run.
pub async fn download_all(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    settings: DataSettings,
    symbols: Option<&[String]>,
    stamp: NaiveDate,
) -> anyhow::Result<DownloadOutcome> {
    let symbols: Vec<String> = symbols.map_or_else(|| config.symbols.clone(), |s| s.to_vec());
    let batch_size = settings.batch_size.max(1);
    let downloader = Downloader::new(settings)?;
    let data_dir = storage.ensure_dir(&config.paths.data_dir).await?;

    tracing::info!(count = symbols.len(), "starting download");
    let mut outcome = DownloadOutcome::default();

    for (i, batch) in symbols.chunks(batch_size).enumerate() {
        let start_time = Instant::now();

        let tasks: Vec<_> = batch.iter().map(|s| downloader.fetch_symbol(s)).collect();
        let results = futures::future::join_all(tasks).await;

        for (symbol, result) in batch.iter().zip(results) {
            let saved = match result {
                Ok(bars) => {
                    let path = data_dir.join(raw_file_name(symbol, stamp));
                    match storage.save_csv(&path, &bars).await {
                        Ok(()) => {
                            tracing::info!(path = %path.display(), "saved data");
                            true
                        }
                        Err(e) => {
                            tracing::error!(%symbol, error = %e, "error saving data");
                            false
                        }
                    }
                }
                Err(DownloadError::Empty(_)) => {
                    tracing::warn!(%symbol, "no data found");
                    false
                }
                Err(e) => {
                    tracing::error!(%symbol, error = %e, "error downloading");
                    false
                }
            };

            if saved {
                outcome.successful += 1;
            } else {
                outcome.failed.push(symbol.clone());
            }
        }

        if (i + 1) * batch_size < symbols.len() {
            let elapsed = start_time.elapsed();
            if elapsed < BATCH_SPACING {
                tokio::time::sleep(BATCH_SPACING - elapsed).await;
            }
        }
    }

    tracing::info!(
        successful = outcome.successful,
        failed = outcome.failed.len(),
        "download complete"
    );
    if !outcome.failed.is_empty() {
        tracing::warn!(failed = ?outcome.failed, "failed downloads");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Vec<Bar>, DownloadError> {
        let response: ChartResponse = serde_json::from_str(json).unwrap();
        parse_chart("AAPL", response)
    }

    #[test]
    fn parses_chart_payload() {
        // 2024-01-02 and 2024-01-03 14:30 UTC, New York offset
        let json = r#"{"chart":{"result":[{
            "meta":{"symbol":"AAPL","gmtoffset":-18000},
            "timestamp":[1704205800,1704292200],
            "indicators":{"quote":[{
                "open":[187.15,184.22],
                "high":[188.44,185.88],
                "low":[183.89,183.43],
                "close":[185.64,184.25],
                "volume":[82488700,58414500]
            }]}
        }],"error":null}}"#;
        let bars = parse(json).unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[1].close, 184.25);
        assert_eq!(bars[1].volume, 58_414_500);
        assert_eq!(bars[0].symbol, "AAPL");
    }

    #[test]
    fn drops_null_and_inconsistent_rows() {
        let json = r#"{"chart":{"result":[{
            "meta":{"gmtoffset":0},
            "timestamp":[1704153600,1704240000,1704326400],
            "indicators":{"quote":[{
                "open":[10.0,null,10.0],
                "high":[11.0,11.0,9.0],
                "low":[9.0,9.0,8.0],
                "close":[10.5,10.0,10.0],
                "volume":[100,100,100]
            }]}
        }],"error":null}}"#;
        let bars = parse(json).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 10.5);
    }

    #[test]
    fn provider_error_is_reported() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        assert!(matches!(parse(json), Err(DownloadError::Api(msg)) if msg.starts_with("Not Found")));
    }

    #[test]
    fn empty_result_is_empty() {
        let json = r#"{"chart":{"result":[{"meta":{},"timestamp":[],"indicators":{"quote":[{}]}}],"error":null}}"#;
        assert!(matches!(parse(json), Err(DownloadError::Empty(_))));
    }
}
