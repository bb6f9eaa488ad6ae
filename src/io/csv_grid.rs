use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
use tracing::{debug, instrument};

use crate::config::CellTyping;
use crate::error::{Result, ToolError};
use crate::model::{CellGrid, CellValue};

/// Field delimiter of simulation logs.
pub const DELIMITER: u8 = b';';

/// Reads a headerless semicolon log from disk.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn read_grid(path: &Path, typing: CellTyping) -> Result<CellGrid> {
    let file = std::fs::File::open(path)?;
    parse_grid(file, typing)
}

/// Parses a headerless semicolon log into a rectangular grid.
///
/// Fields are taken verbatim; quotes carry no meaning. Blank lines are
/// skipped. The first row fixes the width: shorter rows are padded, longer
/// rows are rejected.
pub fn parse_grid<R: Read>(source: R, typing: CellTyping) -> Result<CellGrid> {
    let mut reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .quoting(false)
        .flexible(true)
        .from_reader(source);

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut width = 0;

    for record in reader.records() {
        let record = record?;
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }

        if rows.is_empty() {
            width = record.len();
        } else if record.len() > width {
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            return Err(ToolError::InvalidLog(format!(
                "expected {width} fields in line {line}, saw {}",
                record.len()
            )));
        }

        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(width, String::new());
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ToolError::InvalidLog("no data rows".into()));
    }

    let numeric_columns: Vec<bool> = match typing {
        CellTyping::Infer => (0..width).map(|col| is_numeric_column(&rows, col)).collect(),
        CellTyping::Text => vec![false; width],
    };

    let grid = CellGrid::new(
        rows.into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(&numeric_columns)
                    .map(|(text, &numeric)| to_cell(text, numeric))
                    .collect()
            })
            .collect(),
    );
    debug!(rows = grid.height(), columns = grid.width(), "log parsed");
    Ok(grid)
}

fn is_numeric_column(rows: &[Vec<String>], col: usize) -> bool {
    let mut seen = false;
    for cell in rows.iter().map(|row| row[col].as_str()) {
        if cell.is_empty() {
            continue;
        }
        if parse_number(cell).is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

fn to_cell(text: String, numeric: bool) -> CellValue {
    if text.is_empty() {
        return CellValue::Empty;
    }
    if numeric {
        if let Some(value) = parse_number(&text) {
            return CellValue::Number(value);
        }
    }
    CellValue::Text(text)
}
