//! Indicator engine: turns one symbol's bars into an annotated series and a
//! latest-bar summary.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::bars::{Bar, normalize_series};
use crate::config::AppConfig;
use crate::error::{PipelineError, ProcessError};
use crate::filter_utils::{DataFile, FileKind, latest_per_symbol, processed_file_name};
use crate::indicators;
use crate::storage_utils::AsyncStorageManager;

// --- Data Structures ---

/// A bar plus every derived indicator column.
///
/// Columns keep the processed CSV layout (`SMA_20`, `BB_Upper`, ...); empty
/// cells mean the value is undefined at that bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedBar {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Open")]
    pub open: f64,
    #[serde(rename = "High")]
    pub high: f64,
    #[serde(rename = "Low")]
    pub low: f64,
    #[serde(rename = "Close")]
    pub close: f64,
    #[serde(rename = "Volume")]
    pub volume: u64,
    #[serde(rename = "Symbol")]
    pub symbol: String,

    #[serde(rename = "SMA_20")]
    pub sma_20: Option<f64>,
    #[serde(rename = "SMA_50")]
    pub sma_50: Option<f64>,
    #[serde(rename = "EMA_20")]
    pub ema_20: Option<f64>,
    #[serde(rename = "RSI")]
    pub rsi: Option<f64>,
    #[serde(rename = "BB_Upper")]
    pub bb_upper: Option<f64>,
    #[serde(rename = "BB_Middle")]
    pub bb_middle: Option<f64>,
    #[serde(rename = "BB_Lower")]
    pub bb_lower: Option<f64>,
    #[serde(rename = "MACD")]
    pub macd: Option<f64>,
    #[serde(rename = "MACD_Signal")]
    pub macd_signal: Option<f64>,
    #[serde(rename = "MACD_Histogram")]
    pub macd_histogram: Option<f64>,
    #[serde(rename = "Volatility")]
    pub volatility: Option<f64>,
    #[serde(rename = "Volume_MA")]
    pub volume_ma: Option<f64>,
    #[serde(rename = "Volume_Ratio")]
    pub volume_ratio: Option<f64>,
    #[serde(rename = "OBV")]
    pub obv: i64,
    #[serde(rename = "Daily_Return")]
    pub daily_return: Option<f64>,
    #[serde(rename = "Price_Change")]
    pub price_change: f64,
    #[serde(rename = "Price_Change_Pct")]
    pub price_change_pct: Option<f64>,
    #[serde(rename = "HL_Spread")]
    pub hl_spread: f64,
    #[serde(rename = "HL_Spread_Pct")]
    pub hl_spread_pct: Option<f64>,
}

pub type AnnotatedSeries = Vec<AnnotatedBar>;

/// Where the last close sits inside the Bollinger Bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BandPosition {
    Upper,
    Middle,
    Lower,
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl fmt::Display for BandPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BandPosition::Upper => "Upper",
            BandPosition::Middle => "Middle",
            BandPosition::Lower => "Lower",
            BandPosition::NotAvailable => "N/A",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MacdSignal {
    Bullish,
    Bearish,
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl fmt::Display for MacdSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MacdSignal::Bullish => "Bullish",
            MacdSignal::Bearish => "Bearish",
            MacdSignal::NotAvailable => "N/A",
        };
        f.write_str(s)
    }
}

/// Snapshot of the most recent bar of an annotated series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: f64,
    pub daily_return: Option<f64>,
    pub volume: u64,
    pub volume_ratio: Option<f64>,
    pub rsi: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub volatility: Option<f64>,
    pub bb_position: BandPosition,
    pub macd_signal: MacdSignal,
}

// --- Engine ---

/// Window lengths and smoothing spans. These are fixed parameters, not fitted.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorParams {
    pub sma_short: usize,
    pub sma_long: usize,
    pub ema_span: usize,
    pub rsi_window: usize,
    pub bb_window: usize,
    pub bb_num_std: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volatility_window: usize,
    pub volume_window: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            sma_short: 20,
            sma_long: 50,
            ema_span: 20,
            rsi_window: 14,
            bb_window: 20,
            bb_num_std: 2.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volatility_window: 20,
            volume_window: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    params: IndicatorParams,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn ratio_pct(num: f64, den: f64) -> Option<f64> {
    if den == 0.0 {
        return None;
    }
    finite(num / den * 100.0)
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Self {
        Self { params }
    }

    /// Computes every indicator column over the full series.
    ///
    /// `bars` must already be sorted ascending by date. An empty series
    /// returns `ProcessError::NoData`.
    pub fn annotate(&self, symbol: &str, bars: &[Bar]) -> Result<AnnotatedSeries, ProcessError> {
        if bars.is_empty() {
            return Err(ProcessError::NoData(symbol.to_string()));
        }
        let p = &self.params;

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

        let sma_short = indicators::sma(&closes, p.sma_short);
        let sma_long = indicators::sma(&closes, p.sma_long);
        let ema = indicators::ema(&closes, p.ema_span);
        let rsi = indicators::rsi(&closes, p.rsi_window);
        let bb = indicators::bollinger_bands(&closes, p.bb_window, p.bb_num_std);
        let macd = indicators::macd(&closes, p.macd_fast, p.macd_slow, p.macd_signal);
        let returns = indicators::pct_change(&closes);
        let volatility = indicators::volatility(&returns, p.volatility_window);
        let vol = indicators::volume_indicators(&closes, &volumes, p.volume_window);

        let annotated = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| AnnotatedBar {
                date: bar.date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
                symbol: symbol.to_string(),
                sma_20: sma_short[i],
                sma_50: sma_long[i],
                ema_20: finite(ema[i]),
                rsi: rsi[i],
                bb_upper: bb.upper[i],
                bb_middle: bb.middle[i],
                bb_lower: bb.lower[i],
                macd: finite(macd.macd[i]),
                macd_signal: finite(macd.signal[i]),
                macd_histogram: finite(macd.histogram[i]),
                volatility: volatility[i],
                volume_ma: vol.volume_ma[i],
                volume_ratio: vol.volume_ratio[i],
                obv: vol.obv[i],
                daily_return: returns[i],
                price_change: bar.close - bar.open,
                price_change_pct: ratio_pct(bar.close - bar.open, bar.open),
                hl_spread: bar.high - bar.low,
                hl_spread_pct: ratio_pct(bar.high - bar.low, bar.close),
            })
            .collect();

        Ok(annotated)
    }
}

/// Builds the summary record from the last bar, or `None` for an empty series.
pub fn generate_summary(series: &[AnnotatedBar]) -> Option<SymbolSummary> {
    let latest = series.last()?;
    Some(SymbolSummary {
        symbol: latest.symbol.clone(),
        date: latest.date,
        close: latest.close,
        daily_return: latest.daily_return,
        volume: latest.volume,
        volume_ratio: latest.volume_ratio,
        rsi: latest.rsi,
        sma_20: latest.sma_20,
        sma_50: latest.sma_50,
        volatility: latest.volatility,
        bb_position: band_position(latest),
        macd_signal: macd_signal(latest),
    })
}

fn band_position(bar: &AnnotatedBar) -> BandPosition {
    let (Some(upper), Some(lower)) = (bar.bb_upper, bar.bb_lower) else {
        return BandPosition::NotAvailable;
    };
    let width = upper - lower;
    if width == 0.0 {
        return BandPosition::NotAvailable;
    }

    let position = (bar.close - lower) / width;
    if position > 0.8 {
        BandPosition::Upper
    } else if position < 0.2 {
        BandPosition::Lower
    } else {
        BandPosition::Middle
    }
}

fn macd_signal(bar: &AnnotatedBar) -> MacdSignal {
    match (bar.macd, bar.macd_signal) {
        (Some(m), Some(s)) if m > s => MacdSignal::Bullish,
        (Some(_), Some(_)) => MacdSignal::Bearish,
        _ => MacdSignal::NotAvailable,
    }
}

// --- Main Execution ---

/// Loads, annotates and persists one raw data file.
pub async fn process_symbol_file(
    storage: &AsyncStorageManager,
    engine: &IndicatorEngine,
    file: &DataFile,
    processed_dir: &Path,
    stamp: NaiveDate,
) -> Result<SymbolSummary, ProcessError> {
    tracing::info!(symbol = %file.symbol, "processing data");

    let bars: Vec<Bar> = storage.load_csv(&file.path).await?;
    let loaded = bars.len();
    let bars: Vec<Bar> = normalize_series(bars)
        .into_iter()
        .filter(Bar::is_valid)
        .collect();
    if bars.len() < loaded {
        tracing::warn!(
            symbol = %file.symbol,
            dropped = loaded - bars.len(),
            "dropped duplicate or invalid bars"
        );
    }
    let annotated = engine.annotate(&file.symbol, &bars)?;
    tracing::info!(symbol = %file.symbol, bars = annotated.len(), "added technical indicators");

    let out_path = processed_dir.join(processed_file_name(&file.symbol, stamp));
    storage.save_csv(&out_path, &annotated).await?;
    tracing::info!(path = %out_path.display(), "saved processed data");

    generate_summary(&annotated).ok_or_else(|| ProcessError::NoData(file.symbol.clone()))
}

/// Processes the newest raw file of every symbol (optionally filtered).
///
/// Per-symbol failures are logged and skipped. The run fails only when no
/// symbol has usable data.
pub async fn process_all(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    engine: &IndicatorEngine,
    symbols: Option<&[String]>,
    stamp: NaiveDate,
) -> anyhow::Result<Vec<SymbolSummary>> {
    let data_dir = storage.resolve(&config.paths.data_dir);
    let files = storage.list_files(&config.paths.data_dir, "csv").await?;
    let latest = latest_per_symbol(&files, FileKind::Raw, symbols);

    if latest.is_empty() {
        tracing::warn!(dir = %data_dir.display(), "no data files found to process");
        return Err(PipelineError::NoInputData(data_dir).into());
    }

    let processed_dir = storage.ensure_dir(&config.paths.processed_dir).await?;
    let mut summaries = Vec::with_capacity(latest.len());

    for file in latest.values() {
        match process_symbol_file(storage, engine, file, &processed_dir, stamp).await {
            Ok(summary) => summaries.push(summary),
            Err(ProcessError::NoData(symbol)) => {
                tracing::warn!(%symbol, "no bars to process, skipping");
            }
            Err(e) => {
                tracing::error!(symbol = %file.symbol, error = %e, "error processing symbol");
            }
        }
    }

    if summaries.is_empty() {
        return Err(PipelineError::NoInputData(data_dir).into());
    }

    tracing::info!(count = summaries.len(), "processed symbols");
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                date: start + chrono::Days::new(i as u64),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000 + i as u64,
                symbol: "TEST".to_string(),
            })
            .collect()
    }

    #[test]
    fn empty_series_signals_no_data() {
        let engine = IndicatorEngine::default();
        let err = engine.annotate("EMPTY", &[]).unwrap_err();
        assert!(matches!(err, ProcessError::NoData(s) if s == "EMPTY"));
    }

    #[test]
    fn three_bar_example() {
        let engine = IndicatorEngine::default();
        let mut bars = bars_from_closes(&[100.0, 102.0, 99.0]);
        bars[2].open = 101.0;
        let out = engine.annotate("TEST", &bars).unwrap();

        assert_eq!(out[0].daily_return, None);
        assert!((out[1].daily_return.unwrap() - 0.02).abs() < 1e-12);
        assert!((out[2].daily_return.unwrap() - (99.0 / 102.0 - 1.0)).abs() < 1e-12);
        assert_eq!(out[2].price_change, -2.0);
        assert!((out[2].price_change_pct.unwrap() - (-2.0 / 101.0 * 100.0)).abs() < 1e-12);
        assert_eq!(out[2].hl_spread, 2.0);

        // not enough history for any window
        assert!(out.iter().all(|b| b.sma_20.is_none() && b.rsi.is_none()));
        assert!(out.iter().all(|b| b.volume_ratio.is_none()));
        assert!(out.iter().all(|b| b.ema_20.is_some() && b.macd.is_some()));
    }

    #[test]
    fn zero_open_gives_undefined_pct() {
        let engine = IndicatorEngine::default();
        let mut bars = bars_from_closes(&[10.0]);
        bars[0].open = 0.0;
        let out = engine.annotate("TEST", &bars).unwrap();
        assert_eq!(out[0].price_change_pct, None);
    }

    #[test]
    fn first_valid_indices_match_windows() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + ((i * 13) % 7) as f64).collect();
        let out = IndicatorEngine::default()
            .annotate("TEST", &bars_from_closes(&closes))
            .unwrap();

        assert!(out[18].sma_20.is_none() && out[19].sma_20.is_some());
        assert!(out[48].sma_50.is_none() && out[49].sma_50.is_some());
        assert!(out[13].rsi.is_none() && out[14].rsi.is_some());
        assert!(out[18].bb_upper.is_none() && out[19].bb_upper.is_some());
        assert!(out[19].volatility.is_none() && out[20].volatility.is_some());
        assert!(out[18].volume_ratio.is_none() && out[19].volume_ratio.is_some());
    }

    #[test]
    fn summary_classifies_latest_bar() {
        // Rising closes put the last bar near the top band and MACD above signal.
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = IndicatorEngine::default()
            .annotate("TEST", &bars_from_closes(&closes))
            .unwrap();
        let summary = generate_summary(&out).unwrap();

        assert_eq!(summary.symbol, "TEST");
        assert_eq!(summary.close, 139.0);
        assert_eq!(summary.bb_position, BandPosition::Upper);
        assert_eq!(summary.macd_signal, MacdSignal::Bullish);
        assert_eq!(summary.sma_50, None);
    }

    #[test]
    fn flat_bands_are_not_available() {
        for close in [50.0, 0.1, 101.37] {
            let out = IndicatorEngine::default()
                .annotate("TEST", &bars_from_closes(&[close; 25]))
                .unwrap();
            let summary = generate_summary(&out).unwrap();
            assert_eq!(summary.bb_position, BandPosition::NotAvailable, "close {close}");
            assert_eq!(summary.bb_position.to_string(), "N/A");
        }
    }

    #[tokio::test]
    async fn invalid_raw_rows_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AsyncStorageManager::new(dir.path()).await.unwrap();
        let raw = "Date,Open,High,Low,Close,Volume,Symbol\n\
                   2024-01-01,10.0,11.0,9.0,10.5,100,BAD\n\
                   2024-01-02,10.0,11.0,9.0,NaN,100,BAD\n\
                   2024-01-03,10.0,inf,9.0,10.0,100,BAD\n\
                   2024-01-04,10.5,11.5,10.0,11.0,100,BAD\n";
        let path = dir.path().join("BAD_20240105.csv");
        std::fs::write(&path, raw).unwrap();

        let file = crate::filter_utils::parse_data_file(&path).unwrap();
        let stamp = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let summary = process_symbol_file(&storage, &IndicatorEngine::default(), &file, dir.path(), stamp)
            .await
            .unwrap();
        assert_eq!(summary.close, 11.0);

        let out: Vec<AnnotatedBar> = storage
            .load_csv(&dir.path().join("BAD_processed_20240105.csv"))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|b| b.close.is_finite()));
        assert!(out[1].daily_return.is_some_and(f64::is_finite));
    }

    #[test]
    fn missing_macd_is_not_available() {
        let mut out = IndicatorEngine::default()
            .annotate("TEST", &bars_from_closes(&[10.0, 11.0]))
            .unwrap();
        out[1].macd_signal = None;
        assert_eq!(generate_summary(&out).unwrap().macd_signal, MacdSignal::NotAvailable);
    }
}
