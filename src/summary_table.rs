use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::processor::{BandPosition, MacdSignal, SymbolSummary};
use crate::report::fmt_opt;

fn header(label: &str) -> Cell {
    Cell::new(label).add_attribute(Attribute::Bold)
}

fn number(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

/// Builds the terminal table printed after the processing stage.
pub fn build_table(summaries: &[SymbolSummary]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            header("Symbol"),
            header("Date"),
            header("Close").set_alignment(CellAlignment::Right),
            header("Return (%)").set_alignment(CellAlignment::Right),
            header("RSI").set_alignment(CellAlignment::Right),
            header("Vol Ratio").set_alignment(CellAlignment::Right),
            header("BB"),
            header("MACD"),
        ]);

    for s in summaries {
        let ret = s.daily_return.map(|r| r * 100.0);
        let ret_color = match ret {
            Some(r) if r > 0.0 => Color::Green,
            Some(r) if r < 0.0 => Color::Red,
            _ => Color::DarkGrey,
        };
        let bb_color = match s.bb_position {
            BandPosition::Upper => Color::Yellow,
            BandPosition::Lower => Color::Cyan,
            _ => Color::Reset,
        };
        let macd_color = match s.macd_signal {
            MacdSignal::Bullish => Color::Green,
            MacdSignal::Bearish => Color::Red,
            MacdSignal::NotAvailable => Color::DarkGrey,
        };

        table.add_row(vec![
            Cell::new(&s.symbol).fg(Color::Cyan),
            Cell::new(s.date.format("%Y-%m-%d")).fg(Color::DarkGrey),
            number(format!("{:.2}", s.close)),
            number(fmt_opt(ret, 2)).fg(ret_color),
            number(fmt_opt(s.rsi, 1)),
            number(fmt_opt(s.volume_ratio, 2)),
            Cell::new(s.bb_position).fg(bb_color),
            Cell::new(s.macd_signal).fg(macd_color),
        ]);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn table_lists_every_summary() {
        let summary = SymbolSummary {
            symbol: "AAPL".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            close: 194.03,
            daily_return: Some(0.0123),
            volume: 1,
            volume_ratio: None,
            rsi: Some(61.234),
            sma_20: None,
            sma_50: None,
            volatility: None,
            bb_position: BandPosition::Middle,
            macd_signal: MacdSignal::NotAvailable,
        };
        let rendered = build_table(&[summary]).to_string();
        assert!(rendered.contains("AAPL"));
        assert!(rendered.contains("1.23"));
        assert!(rendered.contains("61.2"));
        assert!(rendered.contains("N/A"));
    }
}
