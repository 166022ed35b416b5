//! HTML rendering of the market report and the report stage driver.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::filter_utils::{FileKind, latest_per_symbol};
use crate::market_summary::{MarketAggregator, MarketReport, SymbolAnalysis, SymbolInfo};
use crate::processor::AnnotatedSeries;
use crate::storage_utils::AsyncStorageManager;

/// Items shown per summary card.
const CARD_LIMIT: usize = 5;

const STYLE: &str = r#"
        body { font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }
        .container { max-width: 1200px; margin: 0 auto; background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
        .header { text-align: center; border-bottom: 2px solid #333; padding-bottom: 20px; margin-bottom: 30px; }
        .summary { display: grid; grid-template-columns: repeat(auto-fit, minmax(300px, 1fr)); gap: 20px; margin-bottom: 30px; }
        .card { background: #f8f9fa; padding: 15px; border-radius: 5px; border-left: 4px solid #007bff; }
        .card h3 { margin-top: 0; color: #333; }
        .gainers { border-left-color: #28a745; }
        .losers { border-left-color: #dc3545; }
        .volume { border-left-color: #ffc107; }
        .alerts { border-left-color: #fd7e14; }
        .symbol-list { list-style: none; padding: 0; }
        .symbol-list li { padding: 5px 0; border-bottom: 1px solid #eee; }
        .symbol-list li:last-child { border-bottom: none; }
        .positive { color: #28a745; font-weight: bold; }
        .negative { color: #dc3545; font-weight: bold; }
        .detailed { margin-top: 30px; }
        .symbol-detail { margin-bottom: 20px; padding: 15px; border: 1px solid #ddd; border-radius: 5px; }
        .metrics { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 10px; margin-top: 10px; }
        .metric { background: #f1f3f4; padding: 8px; border-radius: 3px; text-align: center; }
        .alert-high { background-color: #f8d7da; border-color: #f5c6cb; color: #721c24; }
        .alert-medium { background-color: #fff3cd; border-color: #ffeaa7; color: #856404; }
"#;

// --- Formatting helpers ---

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Formats a value with `precision` decimals, or "N/A" when undefined.
pub fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", precision, v),
        _ => "N/A".to_string(),
    }
}

fn sign_class(value: Option<f64>) -> &'static str {
    if value.is_some_and(|v| v > 0.0) {
        "positive"
    } else {
        "negative"
    }
}

// --- Rendering ---

fn render_mover(out: &mut String, info: &SymbolInfo, class: &str) {
    let sign = if info.change > 0.0 { "+" } else { "" };
    let _ = writeln!(
        out,
        "                    <li><strong>{}</strong>: ${:.2} <span class=\"{}\">({}{:.2}%)</span></li>",
        escape(&info.symbol),
        info.price,
        class,
        sign,
        info.change
    );
}

fn render_card(out: &mut String, class: &str, title: &str, body: &str) {
    let _ = write!(
        out,
        "            <div class=\"card {class}\">\n                <h3>{title}</h3>\n                <ul class=\"symbol-list\">\n{body}                </ul>\n            </div>\n"
    );
}

fn render_metric(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(
        out,
        "                    <div class=\"metric\"><strong>{label}</strong><br>{value}</div>"
    );
}

fn render_analysis(out: &mut String, a: &SymbolAnalysis) {
    let _ = writeln!(out, "            <div class=\"symbol-detail\">");
    let _ = writeln!(
        out,
        "                <h3>{} - ${:.2}</h3>",
        escape(&a.symbol),
        a.current_price
    );
    let _ = writeln!(out, "                <div class=\"metrics\">");

    let change = format!(
        "<span class=\"{}\">{}%</span>",
        sign_class(a.daily_change),
        fmt_opt(a.daily_change, 2)
    );
    render_metric(out, "Daily Change", &change);
    render_metric(out, "RSI", &fmt_opt(a.rsi, 1));
    render_metric(out, "Trend", &a.trend_sma.to_string());
    render_metric(out, "BB Position", &a.bb_position.to_string());
    render_metric(out, "30d Volatility", &format!("{}%", fmt_opt(a.volatility_30d, 2)));
    let volume = format!(
        "<span class=\"{}\">{:.1}%</span>",
        sign_class(Some(a.volume_change)),
        a.volume_change
    );
    render_metric(out, "Volume Change", &volume);
    render_metric(out, "Support", &fmt_opt(a.support_resistance.support, 2));
    render_metric(out, "Resistance", &fmt_opt(a.support_resistance.resistance, 2));

    let _ = writeln!(out, "                </div>\n            </div>");
}

/// Renders the report as a standalone HTML page.
///
/// Each card lists at most five entries; undefined numbers print as "N/A".
pub fn render_html(report: &MarketReport) -> String {
    let date = report.date.format("%Y-%m-%d");
    let mut out = String::with_capacity(16 * 1024);

    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n    <meta charset=\"utf-8\">\n    <title>Daily Market Report - {date}</title>\n    <style>{STYLE}    </style>\n</head>\n<body>\n    <div class=\"container\">\n"
    );
    let _ = write!(
        out,
        "        <div class=\"header\">\n            <h1>Daily Market Report</h1>\n            <h2>{date}</h2>\n            <p>Analyzing {} symbols</p>\n        </div>\n",
        report.total_symbols
    );

    out.push_str("        <div class=\"summary\">\n");

    let mut body = String::new();
    for info in report.gainers.iter().take(CARD_LIMIT) {
        render_mover(&mut body, info, "positive");
    }
    render_card(&mut out, "gainers", "📈 Top Gainers", &body);

    body.clear();
    for info in report.losers.iter().take(CARD_LIMIT) {
        render_mover(&mut body, info, "negative");
    }
    render_card(&mut out, "losers", "📉 Top Losers", &body);

    body.clear();
    for info in report.high_volume.iter().take(CARD_LIMIT) {
        let _ = writeln!(
            body,
            "                    <li><strong>{}</strong>: {}x avg volume</li>",
            escape(&info.symbol),
            fmt_opt(info.volume_ratio, 1)
        );
    }
    render_card(&mut out, "volume", "📊 High Volume", &body);

    body.clear();
    for alert in report.alerts.iter().take(CARD_LIMIT) {
        let _ = writeln!(
            body,
            "                    <li class=\"alert-{}\">{}</li>",
            alert.severity,
            escape(&alert.message)
        );
    }
    render_card(&mut out, "alerts", "🚨 Alerts", &body);

    out.push_str("        </div>\n");

    if !report.detailed_analysis.is_empty() {
        out.push_str("        <div class=\"detailed\">\n            <h2>Detailed Symbol Analysis</h2>\n");
        for analysis in &report.detailed_analysis {
            render_analysis(&mut out, analysis);
        }
        out.push_str("        </div>\n");
    }

    let _ = write!(
        out,
        "        <div style=\"margin-top: 30px; text-align: center; font-size: 12px; color: #666;\">\n            Report generated on {date} by Market Data Pipeline\n        </div>\n    </div>\n</body>\n</html>\n"
    );
    out
}

// --- Main Execution ---

/// Loads the newest processed file per symbol. Unreadable files are logged
/// and skipped.
pub async fn load_processed_data(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    symbols: Option<&[String]>,
) -> anyhow::Result<BTreeMap<String, AnnotatedSeries>> {
    let files = storage.list_files(&config.paths.processed_dir, "csv").await?;
    let latest = latest_per_symbol(&files, FileKind::Processed, symbols);

    let mut data = BTreeMap::new();
    for (symbol, file) in latest {
        match storage.load_csv::<crate::processor::AnnotatedBar>(&file.path).await {
            Ok(series) => {
                tracing::info!(%symbol, bars = series.len(), "loaded processed data");
                data.insert(symbol, series);
            }
            Err(e) => tracing::error!(%symbol, error = %e, "error loading processed data"),
        }
    }
    Ok(data)
}

/// Aggregates processed data, renders the HTML page and saves it as
/// `market_report_<YYYYMMDD>.html`. Returns the written path.
pub async fn generate_daily_report(
    storage: &AsyncStorageManager,
    config: &AppConfig,
    symbols: Option<&[String]>,
    date: NaiveDate,
) -> anyhow::Result<PathBuf> {
    tracing::info!("starting daily report generation");

    let data = load_processed_data(storage, config, symbols).await?;
    if data.is_empty() {
        let dir = storage.resolve(&config.paths.processed_dir);
        tracing::warn!(dir = %dir.display(), "no processed data found for report generation");
        return Err(PipelineError::NoProcessedData(dir).into());
    }

    let aggregator = MarketAggregator::new(config.alerts.clone());
    let report = aggregator.build_report(&data, date);
    let html = render_html(&report);

    let reports_dir = storage.ensure_dir(&config.paths.reports_dir).await?;
    let path = reports_dir.join(format!("market_report_{}.html", date.format("%Y%m%d")));
    storage.save_text(&path, &html).await?;

    tracing::info!(path = %path.display(), symbols = data.len(), "daily report generation complete");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_summary::{
        Alert, BandStatus, Severity, SmaTrend, SupportResistance,
    };

    fn info(symbol: &str, change: f64, ratio: Option<f64>) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            price: 123.456,
            change,
            volume: 10,
            volume_ratio: ratio,
        }
    }

    fn empty_report() -> MarketReport {
        MarketReport {
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            total_symbols: 0,
            gainers: Vec::new(),
            losers: Vec::new(),
            high_volume: Vec::new(),
            alerts: Vec::new(),
            detailed_analysis: Vec::new(),
        }
    }

    #[test]
    fn fmt_opt_shows_na() {
        assert_eq!(fmt_opt(None, 2), "N/A");
        assert_eq!(fmt_opt(Some(f64::NAN), 2), "N/A");
        assert_eq!(fmt_opt(Some(1.23456), 2), "1.23");
    }

    #[test]
    fn cards_are_capped_at_five() {
        let mut report = empty_report();
        report.gainers = (0..8).map(|i| info(&format!("G{i}"), 9.0 - i as f64, None)).collect();
        report.alerts = (0..7)
            .map(|i| Alert {
                symbol: format!("A{i}"),
                message: format!("A{i} moved 6.00% today"),
                severity: Severity::Medium,
            })
            .collect();
        let html = render_html(&report);

        assert!(html.contains("<strong>G4</strong>"));
        assert!(!html.contains("<strong>G5</strong>"));
        assert_eq!(html.matches("class=\"alert-medium\"").count(), 5);
        assert!(html.contains("2024-06-03"));
    }

    #[test]
    fn movers_format_two_decimals() {
        let mut report = empty_report();
        report.gainers = vec![info("UP", 3.14159, None)];
        report.losers = vec![info("DN", -4.5, None)];
        report.high_volume = vec![info("VOL", 0.0, Some(2.345))];
        let html = render_html(&report);

        assert!(html.contains("$123.46 <span class=\"positive\">(+3.14%)</span>"));
        assert!(html.contains("<span class=\"negative\">(-4.50%)</span>"));
        assert!(html.contains("2.3x avg volume"));
    }

    #[test]
    fn detail_section_shows_na_for_missing() {
        let mut report = empty_report();
        report.detailed_analysis = vec![SymbolAnalysis {
            symbol: "<X>".to_string(),
            current_price: 10.0,
            daily_change: Some(-6.0),
            daily_change_abs: -0.6,
            volume: 100,
            volume_change: 12.5,
            rsi: None,
            sma_20: None,
            sma_50: None,
            macd: None,
            volatility: None,
            avg_return_7d: None,
            avg_return_30d: None,
            volatility_7d: None,
            volatility_30d: None,
            bb_position: BandStatus::NotAvailable,
            trend_sma: SmaTrend::InsufficientData,
            support_resistance: SupportResistance::default(),
        }];
        let html = render_html(&report);

        assert!(html.contains("&lt;X&gt; - $10.00"));
        assert!(html.contains("<strong>RSI</strong><br>N/A"));
        assert!(html.contains("Insufficient data"));
        assert!(html.contains("<span class=\"negative\">-6.00%</span>"));
        assert!(html.contains("<span class=\"positive\">12.5%</span>"));
    }
}
