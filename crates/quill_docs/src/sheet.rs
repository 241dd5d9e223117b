use anyhow::{Context, Result};
use calamine::{Data, Ods, Range, Reader, Xls, Xlsx};
use chrono::{NaiveDate, TimeDelta, Timelike};
use quill_core::QuillError;
use regex::Regex;
use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::text::clean_text;

static FLOAT_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?\d*\.\d+$").expect("valid regex"));

/// Spreadsheet formats accepted as data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Xlsx,
    Xls,
    Ods,
    Csv,
}

impl SheetFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xlsx" | "xlsm" => Ok(Self::Xlsx),
            "xls" => Ok(Self::Xls),
            "ods" => Ok(Self::Ods),
            "csv" | "txt" => Ok(Self::Csv),
            other => Err(QuillError::MalformedData(format!(
                "unsupported data file extension \"{other}\""
            ))
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// DataTable
// ---------------------------------------------------------------------------

/// Spreadsheet contents as text: one header row of column names plus data
/// rows, every row padded to the column count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let columns = unique_headers(columns);
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Read a data file, picking the format from its extension. `sheet`
    /// selects a worksheet by name; the first sheet is used otherwise.
    pub fn open(path: &Path, sheet: Option<&str>) -> Result<Self> {
        let format = SheetFormat::from_path(path)?;
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read data file: {}", path.display()))?;
        let table = Self::from_bytes(bytes, format, sheet)?;
        info!(
            "Loaded {} rows x {} columns from {}",
            table.len(),
            table.columns.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn from_bytes(bytes: Vec<u8>, format: SheetFormat, sheet: Option<&str>) -> Result<Self> {
        let range = match format {
            SheetFormat::Csv => {
                let text = String::from_utf8(bytes)
                    .map_err(|_| QuillError::MalformedData("CSV is not valid UTF-8".into()))?;
                return Self::from_csv(&text);
            }
            SheetFormat::Xlsx => load_range::<Xlsx<_>>(bytes, sheet)?,
            SheetFormat::Xls => load_range::<Xls<_>>(bytes, sheet)?,
            SheetFormat::Ods => load_range::<Ods<_>>(bytes, sheet)?,
        };
        Self::from_range(&range)
    }

    /// Parse CSV text; the first record is the header row.
    pub fn from_csv(input: &str) -> Result<Self> {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| QuillError::MalformedData(format!("CSV header: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(QuillError::MalformedData("no header row".into()).into());
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| QuillError::MalformedData(format!("CSV record: {e}")))?;
            let row: Vec<String> = record.iter().map(normalize_text_cell).collect();
            rows.push(row);
        }
        trim_empty_tail(&mut rows);
        Ok(Self::new(headers, rows))
    }

    fn from_range(range: &Range<Data>) -> Result<Self> {
        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            return Err(QuillError::MalformedData("sheet is empty".into()).into());
        };
        let columns: Vec<String> = header.iter().map(cell_to_string).collect();
        if columns.iter().all(String::is_empty) {
            return Err(QuillError::MalformedData("no header row".into()).into());
        }

        let mut data = Vec::new();
        for row in rows {
            let values: Vec<String> = row.iter().map(cell_to_string).collect();
            data.push(values);
        }
        trim_empty_tail(&mut data);
        debug!("Parsed sheet: {} columns, {} rows", columns.len(), data.len());
        Ok(Self::new(columns, data))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row by 0-based index.
    pub fn row(&self, index: usize) -> Option<DataRow<'_>> {
        (index < self.rows.len()).then_some(DataRow { table: self, index })
    }

    pub fn rows(&self) -> impl Iterator<Item = DataRow<'_>> {
        (0..self.rows.len()).map(|index| DataRow { table: self, index })
    }

    /// First `n` rows for display.
    pub fn preview(&self, n: usize) -> Vec<DataRow<'_>> {
        self.rows().take(n).collect()
    }

    /// Position of a column. Exact names win; otherwise names are compared
    /// after trimming and width normalisation.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name).or_else(|| {
            let wanted = clean_text(name);
            self.columns.iter().position(|c| clean_text(c) == wanted)
        })
    }
}

/// One data row, borrowed from its [`DataTable`].
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    table: &'a DataTable,
    index: usize,
}

impl<'a> DataRow<'a> {
    /// 1-based row number as shown to users.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn get(&self, column: &str) -> Option<&'a str> {
        let col = self.table.column_index(column)?;
        self.table.rows[self.index].get(col).map(String::as_str)
    }

    pub fn require(&self, column: &str) -> Result<&'a str> {
        self.get(column).ok_or_else(|| {
            QuillError::MissingColumn {
                row: self.number(),
                column: column.to_string(),
            }
            .into()
        })
    }

    pub fn values(&self) -> &'a [String] {
        &self.table.rows[self.index]
    }
}

// ---------------------------------------------------------------------------
// Cell conversion
// ---------------------------------------------------------------------------

fn load_range<R>(bytes: Vec<u8>, sheet: Option<&str>) -> Result<Range<Data>>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: std::fmt::Display,
{
    let mut workbook =
        R::new(Cursor::new(bytes)).map_err(|e| QuillError::MalformedData(e.to_string()))?;
    let names = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .cloned()
            .ok_or_else(|| QuillError::MalformedData(format!("no sheet named \"{wanted}\"")))?,
        None => names
            .first()
            .cloned()
            .ok_or_else(|| QuillError::MalformedData("workbook has no sheets".into()))?,
    };
    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| QuillError::MalformedData(format!("sheet \"{name}\": {e}")))?;
    Ok(range)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => normalize_text_cell(s),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => normalize_number(*f),
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::DateTime(dt) => excel_serial_to_string(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{e:?}"),
    }
}

/// Trim a text cell and repair float artefacts in numbers stored as text
/// (`0.48729999999999996` becomes `0.4873`).
fn normalize_text_cell(text: &str) -> String {
    let trimmed = text.trim();
    if FLOAT_TEXT.is_match(trimmed) {
        let fraction = trimmed.split_once('.').map(|(_, f)| f).unwrap_or_default();
        if fraction.contains("999999") || fraction.contains("000000") {
            if let Ok(value) = trimmed.parse::<f64>() {
                return normalize_number(value);
            }
        }
    }
    trimmed.to_string()
}

/// Render a spreadsheet number without float artefacts.
///
/// Whole numbers print without a decimal point. Fractions use the fewest
/// decimals (up to 10) that reproduce the value within `1e-9`, so values
/// closer to zero than that print as `0`.
pub fn normalize_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }

    let rendered = (1..=10)
        .map(|places| format!("{value:.places$}"))
        .find(|candidate| {
            candidate
                .parse::<f64>()
                .is_ok_and(|parsed| (parsed - value).abs() < 1e-9)
        })
        .map(|candidate| trim_fraction(&candidate))
        .unwrap_or_else(|| format!("{value}"));

    if rendered == "-0" {
        return "0".to_string();
    }
    rendered
}

fn trim_fraction(number: &str) -> String {
    if number.contains('.') {
        number.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        number.to_string()
    }
}

/// Excel serial date (days since 1899-12-30) as ISO text. A serial outside
/// chrono's calendar falls back to the plain number.
fn excel_serial_to_string(serial: f64) -> String {
    let datetime = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .zip(serial_millis(serial).and_then(TimeDelta::try_milliseconds))
        .and_then(|(epoch, offset)| epoch.checked_add_signed(offset));
    let Some(datetime) = datetime else {
        return normalize_number(serial);
    };
    if datetime.num_seconds_from_midnight() == 0 {
        datetime.format("%Y-%m-%d").to_string()
    } else {
        datetime.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn serial_millis(serial: f64) -> Option<i64> {
    let millis = (serial * 86_400_000.0).round();
    (millis.is_finite() && millis.abs() < i64::MAX as f64).then_some(millis as i64)
}

/// Blank headers become `column_<n>`; repeated names get `.1`, `.2`, ...
fn unique_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(headers.len());
    for (i, header) in headers.into_iter().enumerate() {
        let base = if header.trim().is_empty() {
            format!("column_{}", i + 1)
        } else {
            header.trim().to_string()
        };
        let mut name = base.clone();
        let mut n = 1;
        while seen.contains(&name) {
            name = format!("{base}.{n}");
            n += 1;
        }
        seen.push(name);
    }
    seen
}

fn trim_empty_tail(rows: &mut Vec<Vec<String>>) {
    while rows
        .last()
        .is_some_and(|row| row.iter().all(|v| v.is_empty()))
    {
        rows.pop();
    }
}
