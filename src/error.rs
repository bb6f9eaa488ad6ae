use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type covering the different failure cases that can occur when the
/// tool discovers logs, parses them, or rewrites workbooks.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when the run summary cannot be serialised.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when the workbook package (zip container) cannot be read or written.
    #[error("workbook package error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Raised when a workbook part is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Raised when the CSV reader fails, including non UTF-8 content.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Raised when a log parses but does not form a rectangular grid.
    #[error("malformed log: {0}")]
    InvalidLog(String),

    /// Raised when a workbook does not follow the expected package layout.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when the overlay target has no sheet with the requested name.
    #[error("workbook {workbook} has no sheet named '{sheet}'")]
    MissingSheet { workbook: PathBuf, sheet: String },

    /// Raised when the user provides a path that does not exist.
    #[error("input not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the log root is a file rather than a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Raised when the root of the log tree cannot be walked.
    #[error("cannot read log directory {path}: {source}")]
    Discovery {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

/// Stage of the pipeline a per-file failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileErrorKind {
    /// An entry below the root could not be read or named.
    Discovery,
    /// The template could not be copied to the target workbook.
    Clone,
    /// The log could not be read as a semicolon grid.
    Parse,
    /// The target workbook could not be opened, rewritten, or does not exist.
    Overlay,
}

impl fmt::Display for FileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileErrorKind::Discovery => write!(f, "discovery"),
            FileErrorKind::Clone => write!(f, "clone"),
            FileErrorKind::Parse => write!(f, "parse"),
            FileErrorKind::Overlay => write!(f, "overlay"),
        }
    }
}

/// A failure isolated to a single file. Collected into the run summary
/// instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{kind} failed for {}: {cause}", path.display())]
pub struct FileError {
    pub kind: FileErrorKind,
    pub path: PathBuf,
    pub cause: String,
}

impl FileError {
    pub fn new(kind: FileErrorKind, path: impl AsRef<Path>, cause: impl fmt::Display) -> Self {
        Self {
            kind,
            path: path.as_ref().to_path_buf(),
            cause: cause.to_string(),
        }
    }

    /// File name used in progress and skip lines.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_error_display_names_stage_and_path() {
        let error = FileError::new(FileErrorKind::Parse, "logs/run1.csv", "expected 3 fields");
        assert_eq!(
            error.to_string(),
            "parse failed for logs/run1.csv: expected 3 fields"
        );
        assert_eq!(error.file_name(), "run1.csv");
    }

    #[test]
    fn file_error_serialises_kind_in_lowercase() {
        let error = FileError::new(FileErrorKind::Overlay, "run2_gasLog.csv", "missing");
        let json = serde_json::to_value(&error).expect("serialised");
        assert_eq!(json["kind"], "overlay");
        assert_eq!(json["path"], "run2_gasLog.csv");
    }
}
