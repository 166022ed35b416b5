//! Daily market data pipeline: download bars, compute technical indicators,
//! and render an HTML market report.

pub mod analysis;
pub mod bars;
pub mod config;
pub mod downloader;
pub mod error;
pub mod filter_utils;
pub mod indicators;
pub mod logging;
pub mod market_summary;
pub mod processor;
pub mod report;
pub mod storage_utils;
pub mod summary_table;
