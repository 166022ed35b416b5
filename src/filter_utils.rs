use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

// <SYMBOL>_<YYYYMMDD>.csv or <SYMBOL>_processed_<YYYYMMDD>.csv
static DATA_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<symbol>[^_]+)(?P<processed>_processed)?(?:_(?P<stamp>\d{8}))?\.csv$")
        .expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Raw,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub symbol: String,
    pub kind: FileKind,
    pub stamp: Option<NaiveDate>,
    pub path: PathBuf,
}

pub fn raw_file_name(symbol: &str, stamp: NaiveDate) -> String {
    format!("{}_{}.csv", symbol, stamp.format("%Y%m%d"))
}

pub fn processed_file_name(symbol: &str, stamp: NaiveDate) -> String {
    format!("{}_processed_{}.csv", symbol, stamp.format("%Y%m%d"))
}

/// Splits a data file name into symbol, kind and date stamp.
pub fn parse_data_file(path: &Path) -> Option<DataFile> {
    let name = path.file_name()?.to_str()?;
    let caps = DATA_FILE_RE.captures(name)?;

    let stamp = caps
        .name("stamp")
        .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%Y%m%d").ok());
    let kind = if caps.name("processed").is_some() {
        FileKind::Processed
    } else {
        FileKind::Raw
    };

    Some(DataFile {
        symbol: caps["symbol"].to_string(),
        kind,
        stamp,
        path: path.to_path_buf(),
    })
}

/// True when no filter is set or `symbol` is in it (case-insensitive).
pub fn matches_symbols(symbol: &str, filter: Option<&[String]>) -> bool {
    match filter {
        None => true,
        Some(wanted) => wanted.iter().any(|w| w.eq_ignore_ascii_case(symbol)),
    }
}

/// Picks the newest file of `kind` for every symbol that passes `filter`.
pub fn latest_per_symbol(
    files: &[PathBuf],
    kind: FileKind,
    filter: Option<&[String]>,
) -> BTreeMap<String, DataFile> {
    let mut latest: BTreeMap<String, DataFile> = BTreeMap::new();

    for file in files.iter().filter_map(|p| parse_data_file(p)) {
        if file.kind != kind || !matches_symbols(&file.symbol, filter) {
            continue;
        }
        match latest.get(&file.symbol) {
            Some(current) if current.stamp >= file.stamp => {}
            _ => {
                latest.insert(file.symbol.clone(), file);
            }
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_and_processed_names() {
        let raw = parse_data_file(Path::new("data/AAPL_20240105.csv")).unwrap();
        assert_eq!(raw.symbol, "AAPL");
        assert_eq!(raw.kind, FileKind::Raw);
        assert_eq!(raw.stamp, NaiveDate::from_ymd_opt(2024, 1, 5));

        let processed = parse_data_file(Path::new("MSFT_processed_20240105.csv")).unwrap();
        assert_eq!(processed.symbol, "MSFT");
        assert_eq!(processed.kind, FileKind::Processed);
    }

    #[test]
    fn bare_symbol_file_has_no_stamp() {
        let f = parse_data_file(Path::new("SPY.csv")).unwrap();
        assert_eq!(f.symbol, "SPY");
        assert_eq!(f.stamp, None);
        assert!(parse_data_file(Path::new("notes.txt")).is_none());
    }

    #[test]
    fn newest_file_wins() {
        let files = vec![
            PathBuf::from("AAPL_20240101.csv"),
            PathBuf::from("AAPL_20240301.csv"),
            PathBuf::from("AAPL_20240201.csv"),
            PathBuf::from("AAPL_processed_20240401.csv"),
            PathBuf::from("IBM_20240101.csv"),
        ];
        let latest = latest_per_symbol(&files, FileKind::Raw, None);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["AAPL"].path, PathBuf::from("AAPL_20240301.csv"));

        let only_ibm = vec!["ibm".to_string()];
        let filtered = latest_per_symbol(&files, FileKind::Raw, Some(&only_ibm));
        assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["IBM"]);
    }
}
