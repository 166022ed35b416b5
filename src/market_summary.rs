//! Cross-symbol aggregation: ranked movers, alerts and per-symbol narratives.

use chrono::NaiveDate;
use indexmap::IndexSet;
use std::collections::BTreeMap;
use std::fmt;

use crate::config::AlertSettings;
use crate::indicators::{mean, quantile, sample_std};
use crate::processor::{AnnotatedBar, AnnotatedSeries};

/// Daily return (fraction) a symbol must beat to be a gainer, or fall below
/// (negated) to be a loser.
const MOVER_THRESHOLD: f64 = 0.02;
/// Daily return (fraction) above which an alert is high severity.
const HIGH_SEVERITY_THRESHOLD: f64 = 0.10;
const RANKED_LIST_CAP: usize = 10;

const DETAIL_GAINERS: usize = 5;
const DETAIL_LOSERS: usize = 5;
const DETAIL_HIGH_VOLUME: usize = 3;

const SUPPORT_RESISTANCE_BARS: usize = 20;
const SUPPORT_RESISTANCE_MIN_BARS: usize = 10;

// --- Report structures ---

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub symbol: String,
    pub price: f64,
    /// Daily return in percent.
    pub change: f64,
    pub volume: u64,
    pub volume_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    High,
    Medium,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::High => f.write_str("high"),
            Severity::Medium => f.write_str("medium"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub symbol: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandStatus {
    AboveUpper,
    BelowLower,
    Within,
    NotAvailable,
}

impl fmt::Display for BandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BandStatus::AboveUpper => "Above Upper Band (Overbought)",
            BandStatus::BelowLower => "Below Lower Band (Oversold)",
            BandStatus::Within => "Within Bands (Normal)",
            BandStatus::NotAvailable => "N/A",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmaTrend {
    StrongUptrend,
    WeakUptrend,
    StrongDowntrend,
    WeakDowntrend,
    InsufficientData,
}

impl fmt::Display for SmaTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmaTrend::StrongUptrend => "Strong Uptrend",
            SmaTrend::WeakUptrend => "Weak Uptrend",
            SmaTrend::StrongDowntrend => "Strong Downtrend",
            SmaTrend::WeakDowntrend => "Weak Downtrend",
            SmaTrend::InsufficientData => "Insufficient data",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SupportResistance {
    pub support: Option<f64>,
    pub resistance: Option<f64>,
}

/// Narrative metrics for one significant symbol. Percent fields are already
/// multiplied by 100.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolAnalysis {
    pub symbol: String,
    pub current_price: f64,
    pub daily_change: Option<f64>,
    pub daily_change_abs: f64,
    pub volume: u64,
    pub volume_change: f64,
    pub rsi: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub macd: Option<f64>,
    pub volatility: Option<f64>,
    pub avg_return_7d: Option<f64>,
    pub avg_return_30d: Option<f64>,
    pub volatility_7d: Option<f64>,
    pub volatility_30d: Option<f64>,
    pub bb_position: BandStatus,
    pub trend_sma: SmaTrend,
    pub support_resistance: SupportResistance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketReport {
    pub date: NaiveDate,
    pub total_symbols: usize,
    pub gainers: Vec<SymbolInfo>,
    pub losers: Vec<SymbolInfo>,
    pub high_volume: Vec<SymbolInfo>,
    /// Unsorted and uncapped; the renderer shows the first few.
    pub alerts: Vec<Alert>,
    pub detailed_analysis: Vec<SymbolAnalysis>,
}

// --- Aggregator ---

#[derive(Debug, Clone, Default)]
pub struct MarketAggregator {
    settings: AlertSettings,
}

impl MarketAggregator {
    pub fn new(settings: AlertSettings) -> Self {
        Self { settings }
    }

    /// Builds the full report, including narratives for significant symbols.
    pub fn build_report(&self, data: &BTreeMap<String, AnnotatedSeries>, date: NaiveDate) -> MarketReport {
        let mut report = self.summarize(data, date);

        let significant = significant_symbols(&report);
        report.detailed_analysis = significant
            .iter()
            .filter_map(|symbol| analyze_symbol(symbol, data.get(symbol)?))
            .collect();

        tracing::debug!(
            gainers = report.gainers.len(),
            losers = report.losers.len(),
            high_volume = report.high_volume.len(),
            alerts = report.alerts.len(),
            detailed = report.detailed_analysis.len(),
            "market summary built"
        );
        report
    }

    /// Classifies and ranks every symbol by its latest bar.
    pub fn summarize(&self, data: &BTreeMap<String, AnnotatedSeries>, date: NaiveDate) -> MarketReport {
        let mut gainers = Vec::new();
        let mut losers = Vec::new();
        let mut high_volume = Vec::new();
        let mut alerts = Vec::new();

        let alert_threshold = self.settings.price_change_threshold / 100.0;

        for (symbol, series) in data {
            let Some(latest) = series.last() else {
                continue;
            };
            let Some(daily_return) = latest.daily_return.filter(|r| r.is_finite()) else {
                continue;
            };
            if !latest.close.is_finite() {
                continue;
            }

            let info = SymbolInfo {
                symbol: symbol.clone(),
                price: latest.close,
                change: daily_return * 100.0,
                volume: latest.volume,
                volume_ratio: latest.volume_ratio,
            };

            if daily_return > MOVER_THRESHOLD {
                gainers.push(info.clone());
            } else if daily_return < -MOVER_THRESHOLD {
                losers.push(info.clone());
            }

            if info
                .volume_ratio
                .is_some_and(|r| r > self.settings.volume_multiplier)
            {
                high_volume.push(info);
            }

            if daily_return.abs() > alert_threshold {
                alerts.push(Alert {
                    symbol: symbol.clone(),
                    message: format!("{} moved {:.2}% today", symbol, daily_return * 100.0),
                    severity: if daily_return.abs() > HIGH_SEVERITY_THRESHOLD {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                });
            }
        }

        gainers.sort_by(|a, b| b.change.total_cmp(&a.change));
        gainers.truncate(RANKED_LIST_CAP);

        losers.sort_by(|a, b| a.change.total_cmp(&b.change));
        losers.truncate(RANKED_LIST_CAP);

        // only symbols with a defined ratio get here
        high_volume.sort_by(|a, b| {
            let (ra, rb) = (a.volume_ratio.unwrap_or(0.0), b.volume_ratio.unwrap_or(0.0));
            rb.total_cmp(&ra)
        });
        high_volume.truncate(RANKED_LIST_CAP);

        MarketReport {
            date,
            total_symbols: data.len(),
            gainers,
            losers,
            high_volume,
            alerts,
            detailed_analysis: Vec::new(),
        }
    }
}

/// Symbols worth a detailed write-up, in insertion order: top gainers, then
/// top losers, then the heaviest volume.
pub fn significant_symbols(report: &MarketReport) -> IndexSet<String> {
    report
        .gainers
        .iter()
        .take(DETAIL_GAINERS)
        .chain(report.losers.iter().take(DETAIL_LOSERS))
        .chain(report.high_volume.iter().take(DETAIL_HIGH_VOLUME))
        .map(|info| info.symbol.clone())
        .collect()
}

/// Detailed narrative for one symbol, or `None` for an empty series.
pub fn analyze_symbol(symbol: &str, series: &[AnnotatedBar]) -> Option<SymbolAnalysis> {
    let latest = series.last()?;
    let prev = if series.len() > 1 {
        &series[series.len() - 2]
    } else {
        latest
    };

    let volume_change = if prev.volume > 0 {
        (latest.volume as f64 - prev.volume as f64) / prev.volume as f64 * 100.0
    } else {
        0.0
    };

    let returns_7d = trailing_returns(series, 7);
    let returns_30d = trailing_returns(series, 30);
    let pct = |v: Option<f64>| v.map(|v| v * 100.0);

    Some(SymbolAnalysis {
        symbol: symbol.to_string(),
        current_price: latest.close,
        daily_change: pct(latest.daily_return),
        daily_change_abs: latest.price_change,
        volume: latest.volume,
        volume_change,
        rsi: latest.rsi,
        sma_20: latest.sma_20,
        sma_50: latest.sma_50,
        macd: latest.macd,
        volatility: latest.volatility,
        avg_return_7d: pct(mean(&returns_7d)),
        avg_return_30d: pct(mean(&returns_30d)),
        volatility_7d: pct(sample_std(&returns_7d)),
        volatility_30d: pct(sample_std(&returns_30d)),
        bb_position: band_status(latest),
        trend_sma: sma_trend(latest),
        support_resistance: support_resistance(series),
    })
}

/// Defined daily returns among the last `n` bars.
fn trailing_returns(series: &[AnnotatedBar], n: usize) -> Vec<f64> {
    let start = series.len().saturating_sub(n);
    series[start..].iter().filter_map(|b| b.daily_return).collect()
}

fn band_status(bar: &AnnotatedBar) -> BandStatus {
    let (Some(upper), Some(lower)) = (bar.bb_upper, bar.bb_lower) else {
        return BandStatus::NotAvailable;
    };
    if bar.close > upper {
        BandStatus::AboveUpper
    } else if bar.close < lower {
        BandStatus::BelowLower
    } else {
        BandStatus::Within
    }
}

fn sma_trend(bar: &AnnotatedBar) -> SmaTrend {
    let (Some(sma_20), Some(sma_50)) = (bar.sma_20, bar.sma_50) else {
        return SmaTrend::InsufficientData;
    };
    let close = bar.close;

    if close > sma_20 && sma_20 > sma_50 {
        SmaTrend::StrongUptrend
    } else if close > sma_20 && sma_20 < sma_50 {
        SmaTrend::WeakUptrend
    } else if close < sma_20 && sma_20 < sma_50 {
        SmaTrend::StrongDowntrend
    } else {
        SmaTrend::WeakDowntrend
    }
}

/// Naive levels from the trailing bars: 10th percentile of lows and 90th
/// percentile of highs.
pub fn support_resistance(series: &[AnnotatedBar]) -> SupportResistance {
    let start = series.len().saturating_sub(SUPPORT_RESISTANCE_BARS);
    let window = &series[start..];
    if window.len() < SUPPORT_RESISTANCE_MIN_BARS {
        return SupportResistance::default();
    }

    let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = window.iter().map(|b| b.low).collect();
    SupportResistance {
        support: quantile(&lows, 0.1),
        resistance: quantile(&highs, 0.9),
    }
}
