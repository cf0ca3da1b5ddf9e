use crate::error::ServiceError;
use calamine::{open_workbook_auto_from_rs, Data, ExcelDateTime, Range, Reader};
use chrono::{NaiveDateTime, Timelike};
use serde_json::{Number, Value};
use std::collections::HashSet;
use std::io::Cursor;
use tracing::debug;

/// Largest float still converted to an exact integer (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A worksheet split into header rows and data rows.
///
/// Cells are kept at their absolute column index, so column offsets in a
/// [`ColumnLayout`](super::layout::ColumnLayout) line up with the columns a
/// person sees in the spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    headers: Vec<Vec<Value>>,
    rows: Vec<Vec<Value>>,
    width: usize,
}

impl Sheet {
    /// Read a worksheet from an in-memory workbook. Uses the first sheet when
    /// `sheet_name` is `None`.
    pub fn from_xlsx(
        bytes: Vec<u8>,
        sheet_name: Option<&str>,
        header_rows: usize,
    ) -> Result<Self, ServiceError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;

        let name = match sheet_name {
            Some(name) => name.to_string(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| ServiceError::Workbook("workbook has no worksheets".to_string()))?,
        };

        debug!(sheet = %name, "Reading worksheet");
        let range = workbook.worksheet_range(&name)?;
        Ok(Self::from_range(&range, header_rows))
    }

    fn from_range(range: &Range<Data>, header_rows: usize) -> Self {
        let first_column = range.start().map(|(_, col)| col as usize).unwrap_or(0);

        let grid = range
            .rows()
            .map(|row| {
                let mut cells = vec![Value::Null; first_column];
                cells.extend(row.iter().map(cell_value));
                cells
            })
            .collect();

        Self::from_grid(grid, header_rows)
    }

    /// Build a sheet from rows of cells that start at column 0.
    pub fn from_grid(mut grid: Vec<Vec<Value>>, header_rows: usize) -> Self {
        let width = grid.iter().map(Vec::len).max().unwrap_or(0);
        let split = header_rows.min(grid.len());
        let rows = grid
            .split_off(split)
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.is_null()))
            .collect();

        Self {
            headers: grid,
            rows,
            width,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Label in the bottom header row, which names a single option.
    pub fn option_label(&self, column: usize) -> Option<String> {
        self.headers
            .last()
            .and_then(|row| row.get(column))
            .and_then(header_text)
    }

    /// One name per column: the non-empty header cells joined with a space.
    ///
    /// Columns without header text are named `Column <n>` (1-based), and
    /// repeated names get a `.1`, `.2`, ... suffix. Names listed in
    /// `reserved` are treated as already taken.
    pub fn column_names(&self, reserved: &[&str]) -> Vec<String> {
        let mut seen: HashSet<String> = reserved.iter().map(|s| s.to_string()).collect();

        (0..self.width)
            .map(|column| {
                let parts: Vec<String> = self
                    .headers
                    .iter()
                    .filter_map(|row| row.get(column).and_then(header_text))
                    .collect();

                let base = if parts.is_empty() {
                    format!("Column {}", column + 1)
                } else {
                    parts.join(" ")
                };

                let mut name = base.clone();
                let mut suffix = 1;
                while !seen.insert(name.clone()) {
                    name = format!("{}.{}", base, suffix);
                    suffix += 1;
                }
                name
            })
            .collect()
    }
}

fn header_text(cell: &Value) -> Option<String> {
    let text = match cell {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn float_value(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_INTEGER {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// ISO 8601 date, with the time only when it is not midnight.
fn datetime_text(datetime: NaiveDateTime) -> String {
    if datetime.num_seconds_from_midnight() == 0 {
        datetime.format("%Y-%m-%d").to_string()
    } else {
        datetime.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

fn excel_datetime_value(datetime: &ExcelDateTime) -> Value {
    if datetime.is_duration() {
        if let Some(duration) = datetime.as_duration() {
            let seconds = duration.num_seconds();
            return Value::String(format!(
                "{}:{:02}:{:02}",
                seconds / 3600,
                seconds % 3600 / 60,
                seconds % 60
            ));
        }
    } else if let Some(parsed) = datetime.as_datetime() {
        return Value::String(datetime_text(parsed));
    }
    float_value(datetime.as_f64())
}

pub(crate) fn cell_value(data: &Data) -> Value {
    match data {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => float_value(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(datetime) => excel_datetime_value(datetime),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::String(s) if s.trim().is_empty() => Value::Null,
        Data::String(s) => Value::String(s.clone()),
    }
}
