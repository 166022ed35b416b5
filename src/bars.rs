use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ta::DataItem;

/// One daily session for one symbol.
///
/// Column names follow the raw CSV layout written by the downloader
/// (`Date,Open,High,Low,Close,Volume,Symbol`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub symbol: String,
}

impl Bar {
    /// Checks the OHLC invariants (finite positive prices, low <= open/close <= high).
    ///
    /// The actual range checks are delegated to `ta::DataItem`, which refuses
    /// to build an item with inconsistent prices.
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if !prices.iter().all(|p| p.is_finite() && *p > 0.0) {
            return false;
        }
        DataItem::builder()
            .open(self.open)
            .high(self.high)
            .low(self.low)
            .close(self.close)
            .volume(self.volume as f64)
            .build()
            .is_ok()
    }
}

/// Sorts bars ascending by date and drops duplicate dates, keeping the
/// last occurrence of each day.
pub fn normalize_series(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(prev) if prev.date == bar.date => *prev = bar,
            _ => out.push(bar),
        }
    }
    out
}
