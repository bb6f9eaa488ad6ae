//! Progress reporting and the run summary.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use crate::error::{FileError, FileErrorKind};

/// A sheet successfully written during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrittenSheet {
    pub workbook: PathBuf,
    pub sheet: String,
    pub source: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub cells: usize,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Number of log files found below the root.
    pub discovered: usize,
    pub written: Vec<WrittenSheet>,
    pub skipped: Vec<FileError>,
    /// Set when the run stopped early on request.
    pub cancelled: bool,
}

impl RunSummary {
    /// True when every discovered log made it into a workbook.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && !self.cancelled
    }

    /// Distinct workbooks created by the run.
    pub fn workbooks(&self) -> Vec<&PathBuf> {
        let mut workbooks: Vec<&PathBuf> = self.written.iter().map(|sheet| &sheet.workbook).collect();
        workbooks.sort();
        workbooks.dedup();
        workbooks
    }

    pub fn skipped_of(&self, kind: FileErrorKind) -> usize {
        self.skipped.iter().filter(|error| error.kind == kind).count()
    }

    /// Human-readable one-line summary.
    pub fn format(&self) -> String {
        format!(
            "discovered={} workbooks={} sheets={} skipped={}{}",
            self.discovered,
            self.workbooks().len(),
            self.written.len(),
            self.skipped.len(),
            if self.cancelled { " (cancelled)" } else { "" }
        )
    }
}

/// Receives per-file progress while a run is in flight.
pub trait ProgressReporter {
    /// A log is about to be processed.
    fn on_file(&mut self, index: usize, approx_total: usize, file_name: &str);
    /// A log was skipped.
    fn on_skip(&mut self, error: &FileError);
    /// The run finished, possibly early.
    fn on_done(&mut self, _summary: &RunSummary) {}
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn on_file(&mut self, _index: usize, _approx_total: usize, _file_name: &str) {}

    fn on_skip(&mut self, _error: &FileError) {}
}

/// Prints progress lines in the `<index> of <total> - <file>` form.
#[derive(Debug)]
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if let Err(error) = writeln!(self.out, "{line}") {
            warn!(%error, "failed to write progress line");
        }
    }
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ProgressReporter for ConsoleReporter<W> {
    fn on_file(&mut self, index: usize, approx_total: usize, file_name: &str) {
        self.emit(format_args!("{index} of {approx_total} - {file_name}"));
    }

    fn on_skip(&mut self, error: &FileError) {
        self.emit(format_args!("Skipping {}", error.file_name()));
        self.emit(format_args!("    {}: {}", error.kind, error.cause));
    }

    fn on_done(&mut self, summary: &RunSummary) {
        self.emit(format_args!("{}", summary.format()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_lines_follow_progress_format() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.on_file(0, 2, "run1.csv");
        reporter.on_skip(&FileError::new(
            FileErrorKind::Overlay,
            "sims/run2_gasLog.csv",
            "primary workbook was not created",
        ));

        let output = String::from_utf8(reporter.into_inner()).expect("utf-8 output");
        assert_eq!(
            output,
            "0 of 2 - run1.csv\nSkipping run2_gasLog.csv\n    overlay: primary workbook was not created\n"
        );
    }

    #[test]
    fn summary_counts_distinct_workbooks() {
        let sheet = |sheet: &str| WrittenSheet {
            workbook: PathBuf::from("run1.xlsx"),
            sheet: sheet.to_string(),
            source: PathBuf::from("run1.csv"),
            rows: 1,
            columns: 1,
            cells: 1,
        };
        let summary = RunSummary {
            discovered: 3,
            written: vec![sheet("Data"), sheet("GasData")],
            skipped: vec![FileError::new(FileErrorKind::Parse, "bad.csv", "no data rows")],
            cancelled: false,
        };

        assert!(!summary.is_clean());
        assert_eq!(summary.workbooks().len(), 1);
        assert_eq!(summary.skipped_of(FileErrorKind::Parse), 1);
        assert_eq!(summary.format(), "discovered=3 workbooks=1 sheets=2 skipped=1");
    }
}
