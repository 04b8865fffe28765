use std::cmp::Ordering;
use std::path::Path;

use chrono::NaiveDate;
use polars::prelude::{Column, DataFrame, DataType, PolarsResult};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::domain::TableKey;
use crate::error::AssetError;

pub const MACRO_START_YEAR: i32 = 2009;
pub const MACRO_SERIES: &str = "SP500";

pub const CONSTITUENT_COLUMNS: [&str; 7] = [
    "name",
    "gics_sector",
    "gics_sub_industry",
    "location",
    "first_added",
    "cik",
    "founded",
];

#[derive(Debug, Clone)]
pub struct NormalizedTable {
    pub key: TableKey,
    pub index: Vec<String>,
    pub frame: DataFrame,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub key: String,
    pub index: Vec<String>,
    pub columns: Vec<String>,
    pub rows: usize,
}

impl NormalizedTable {
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn value_columns(&self) -> Vec<String> {
        self.column_names()
            .into_iter()
            .filter(|name| !self.index.contains(name))
            .collect()
    }

    pub fn summary(&self) -> TableSummary {
        TableSummary {
            key: self.key.to_string(),
            index: self.index.clone(),
            columns: self.column_names(),
            rows: self.height(),
        }
    }
}

pub fn normalize_prices(path: &Path) -> Result<NormalizedTable, AssetError> {
    let key = TableKey::WikiPrices;
    let fail = |message: String| AssetError::normalization(key.source_name(), message);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| fail(format!("open {}: {err}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|err| fail(err.to_string()))?
        .iter()
        .map(|name| name.trim().to_string())
        .collect::<Vec<_>>();

    let date_idx = position(&headers, "date").ok_or_else(|| fail("missing date column".into()))?;
    let ticker_idx =
        position(&headers, "ticker").ok_or_else(|| fail("missing ticker column".into()))?;
    let value_idx = (0..headers.len())
        .filter(|idx| *idx != date_idx && *idx != ticker_idx)
        .collect::<Vec<_>>();

    let mut dates = Vec::new();
    let mut tickers = Vec::new();
    let mut values = vec![Vec::new(); value_idx.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|err| fail(err.to_string()))?;
        let line = row + 2;
        let raw_date = record.get(date_idx).unwrap_or_default();
        dates.push(parse_date(raw_date).map_err(|err| fail(format!("line {line}: {err}")))?);
        tickers.push(record.get(ticker_idx).unwrap_or_default().trim().to_string());
        for (slot, idx) in value_idx.iter().enumerate() {
            let cell = record.get(*idx).unwrap_or_default();
            let value = parse_float(cell).map_err(|err| {
                fail(format!("line {line}, column {}: {err}", headers[*idx]))
            })?;
            values[slot].push(value);
        }
    }

    let mut order = (0..dates.len()).collect::<Vec<_>>();
    order.sort_by(|a, b| match dates[*a].cmp(&dates[*b]) {
        Ordering::Equal => tickers[*a].cmp(&tickers[*b]),
        other => other,
    });

    let mut columns = Vec::with_capacity(headers.len());
    columns.push(
        date_column("date", order.iter().map(|i| dates[*i])).map_err(|err| fail(err.to_string()))?,
    );
    columns.push(Column::new(
        "ticker".into(),
        order.iter().map(|i| tickers[*i].clone()).collect::<Vec<_>>(),
    ));
    for (slot, idx) in value_idx.iter().enumerate() {
        let sorted = order.iter().map(|i| values[slot][*i]).collect::<Vec<_>>();
        columns.push(Column::new(headers[*idx].as_str().into(), sorted));
    }

    let frame = DataFrame::new(columns).map_err(|err| fail(err.to_string()))?;
    Ok(NormalizedTable {
        key,
        index: vec!["date".to_string(), "ticker".to_string()],
        frame,
    })
}

pub fn normalize_stocks(path: &Path) -> Result<NormalizedTable, AssetError> {
    let key = TableKey::WikiStocks;
    let fail = |message: String| AssetError::normalization(key.source_name(), message);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| fail(format!("open {}: {err}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|err| fail(err.to_string()))?
        .iter()
        .enumerate()
        .map(|(idx, name)| match name.trim() {
            "" => format!("unnamed_{idx}"),
            trimmed => trimmed.to_string(),
        })
        .collect::<Vec<_>>();

    let mut cells = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record.map_err(|err| fail(err.to_string()))?;
        for (idx, column) in cells.iter_mut().enumerate() {
            column.push(non_empty(record.get(idx).unwrap_or_default()));
        }
    }

    let columns = headers
        .iter()
        .zip(cells)
        .map(|(name, values)| infer_column(name, values))
        .collect::<Vec<_>>();
    let frame = DataFrame::new(columns).map_err(|err| fail(err.to_string()))?;
    Ok(NormalizedTable {
        key,
        index: Vec::new(),
        frame,
    })
}

/// S&P 500 membership from the first HTML table on the page. The SEC filings
/// column, when the page has one, is dropped; the remaining eight cells map
/// positionally onto `ticker` plus [`CONSTITUENT_COLUMNS`].
pub fn normalize_constituents(html: &str) -> Result<NormalizedTable, AssetError> {
    let key = TableKey::Sp500Stocks;
    let fail = |message: String| AssetError::normalization(key.source_name(), message);

    let document = Html::parse_document(html);
    let table_selector = selector("table").map_err(&fail)?;
    let row_selector = selector("tr").map_err(&fail)?;
    let cell_selector = selector("th, td").map_err(&fail)?;

    let table = document
        .select(&table_selector)
        .next()
        .ok_or_else(|| fail("page contains no table".into()))?;
    let mut rows = table
        .select(&row_selector)
        .map(|row| row.select(&cell_selector).map(cell_text).collect::<Vec<_>>())
        .filter(|cells| !cells.is_empty());

    let header = rows.next().ok_or_else(|| fail("table has no rows".into()))?;
    let filings_idx = header
        .iter()
        .position(|name| name.to_ascii_lowercase().contains("filings"));
    let width = CONSTITUENT_COLUMNS.len() + 1;

    let mut columns = vec![Vec::new(); width];
    for (line, mut cells) in rows.enumerate() {
        if let Some(idx) = filings_idx.filter(|idx| *idx < cells.len()) {
            cells.remove(idx);
        }
        if cells.len() < width {
            return Err(fail(format!(
                "row {} has {} cells, expected {width}",
                line + 1,
                cells.len()
            )));
        }
        for (column, value) in columns.iter_mut().zip(cells) {
            column.push(non_empty(&value));
        }
    }

    let names = std::iter::once("ticker").chain(CONSTITUENT_COLUMNS);
    let frame = DataFrame::new(
        names
            .zip(columns)
            .map(|(name, values)| infer_column(name, values))
            .collect(),
    )
    .map_err(|err| fail(err.to_string()))?;

    Ok(NormalizedTable {
        key,
        index: vec!["ticker".to_string()],
        frame,
    })
}

pub fn normalize_macro(csv_text: &str, start: NaiveDate) -> Result<NormalizedTable, AssetError> {
    let key = TableKey::Sp500Fred;
    let fail = |message: String| AssetError::normalization(key.source_name(), message);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_text.as_bytes());
    let header_len = reader.headers().map_err(|err| fail(err.to_string()))?.len();
    if header_len != 2 {
        return Err(fail(format!(
            "expected a date and one value column, found {header_len} columns"
        )));
    }

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|err| fail(err.to_string()))?;
        let line = row + 2;
        let date = parse_date(record.get(0).unwrap_or_default())
            .map_err(|err| fail(format!("line {line}: {err}")))?;
        if date < start {
            continue;
        }
        let raw = record.get(1).unwrap_or_default().trim();
        let value = if raw == "." {
            None
        } else {
            parse_float(raw).map_err(|err| fail(format!("line {line}: {err}")))?
        };
        rows.push((date, value));
    }
    rows.sort_by_key(|(date, _)| *date);

    let frame = DataFrame::new(vec![
        date_column("date", rows.iter().map(|(date, _)| *date))
            .map_err(|err| fail(err.to_string()))?,
        Column::new(
            "close".into(),
            rows.iter().map(|(_, value)| *value).collect::<Vec<_>>(),
        ),
    ])
    .map_err(|err| fail(err.to_string()))?;

    Ok(NormalizedTable {
        key,
        index: vec!["date".to_string()],
        frame,
    })
}

pub fn macro_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(MACRO_START_YEAR, 1, 1).unwrap_or_default()
}

fn position(headers: &[String], name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.eq_ignore_ascii_case(name))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|err| format!("invalid date {trimmed:?}: {err}"))
}

fn parse_float(raw: &str) -> Result<Option<f64>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("invalid number {trimmed:?}"))
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn date_column(name: &str, dates: impl Iterator<Item = NaiveDate>) -> PolarsResult<Column> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let days = dates
        .map(|date| (date - epoch).num_days() as i32)
        .collect::<Vec<_>>();
    Column::new(name.into(), days).cast(&DataType::Date)
}

fn infer_column(name: &str, values: Vec<Option<String>>) -> Column {
    let present = || values.iter().flatten();
    let has_values = present().next().is_some();

    if has_values && present().all(|value| value.parse::<i64>().is_ok()) {
        let ints = values
            .iter()
            .map(|value| value.as_ref().and_then(|v| v.parse::<i64>().ok()))
            .collect::<Vec<_>>();
        return Column::new(name.into(), ints);
    }
    if has_values && present().all(|value| value.parse::<f64>().is_ok()) {
        let floats = values
            .iter()
            .map(|value| value.as_ref().and_then(|v| v.parse::<f64>().ok()))
            .collect::<Vec<_>>();
        return Column::new(name.into(), floats);
    }
    Column::new(name.into(), values)
}

fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|err| format!("invalid selector {css:?}: {err}"))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    let sup = Selector::parse("sup").ok();
    let footnotes = sup
        .as_ref()
        .map(|sup| {
            cell.select(sup)
                .map(|note| note.text().collect::<String>())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut text = cell.text().collect::<String>();
    for note in footnotes {
        text = text.replacen(&note, "", 1);
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
