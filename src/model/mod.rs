use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::FileError;

/// Sheet receiving the content of a primary log.
pub const DATA_SHEET: &str = "Data";
/// Sheet receiving the content of a companion (gas) log.
pub const GAS_DATA_SHEET: &str = "GasData";

/// Role of a log file, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Main measurement log; gets its own workbook.
    Primary,
    /// Gas log merged into its primary's workbook.
    Companion,
}

impl LogKind {
    /// Sheet this kind of log is written into.
    pub fn sheet_name(self) -> &'static str {
        match self {
            LogKind::Primary => DATA_SHEET,
            LogKind::Companion => GAS_DATA_SHEET,
        }
    }
}

/// A discovered log file. Source logs are read-only inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFile {
    pub path: PathBuf,
    /// File name without its directory.
    pub base_name: String,
    pub kind: LogKind,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>, base_name: impl Into<String>, kind: LogKind) -> Self {
        Self {
            path: path.into(),
            base_name: base_name.into(),
            kind,
        }
    }

    pub fn is_companion(&self) -> bool {
        self.kind == LogKind::Companion
    }
}

/// Every log found below a root, plus the entries that could not be read.
#[derive(Debug, Clone, Default)]
pub struct LogFileSet {
    pub files: Vec<LogFile>,
    pub issues: Vec<FileError>,
}

impl LogFileSet {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn primaries(&self) -> impl Iterator<Item = &LogFile> {
        self.files.iter().filter(|file| !file.is_companion())
    }

    pub fn companions(&self) -> impl Iterator<Item = &LogFile> {
        self.files.iter().filter(|file| file.is_companion())
    }
}

/// The logs that feed one output workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPair {
    /// Output workbook path, next to the logs.
    pub target: PathBuf,
    pub primary: Option<LogFile>,
    pub companion: Option<LogFile>,
}

impl LogPair {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            primary: None,
            companion: None,
        }
    }
}

/// A single parsed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(value) => write!(f, "{value}"),
            CellValue::Text(value) => f.write_str(value),
        }
    }
}

/// Rectangular grid of cells; every row has `width` entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellGrid {
    rows: Vec<Vec<CellValue>>,
    width: usize,
}

impl CellGrid {
    /// Builds a grid, padding short rows with empty cells.
    pub fn new(mut rows: Vec<Vec<CellValue>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, CellValue::Empty);
        }
        Self { rows, width }
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .filter(|cell| !cell.is_empty())
            .count()
    }

    /// Text rendering of every cell, as a reader would see it.
    pub fn to_strings(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(CellValue::to_string).collect())
            .collect()
    }
}

/// One write of tabular content into a named sheet of a workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetOverlay {
    pub workbook: PathBuf,
    pub sheet_name: String,
    pub grid: CellGrid,
}

impl SheetOverlay {
    pub fn new(workbook: impl Into<PathBuf>, sheet_name: impl Into<String>, grid: CellGrid) -> Self {
        Self {
            workbook: workbook.into(),
            sheet_name: sheet_name.into(),
            grid,
        }
    }
}
