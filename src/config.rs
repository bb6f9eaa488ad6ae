use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::model::LogKind;

/// How parsed log cells are typed before they are written to a sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellTyping {
    /// A column whose non-empty cells all parse as finite numbers is written
    /// as numbers; any other column is written as text.
    #[default]
    Infer,
    /// Every cell is written as text.
    Text,
}

/// File naming convention that links logs to each other and to workbooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNaming {
    pub log_extension: String,
    pub companion_marker: String,
    pub workbook_extension: String,
}

impl Default for LogNaming {
    fn default() -> Self {
        Self {
            log_extension: ".csv".to_string(),
            companion_marker: "_gasLog".to_string(),
            workbook_extension: ".xlsx".to_string(),
        }
    }
}

impl LogNaming {
    /// Returns the kind of log a file name denotes, or `None` when the name
    /// does not carry the log extension.
    pub fn classify(&self, file_name: &str) -> Option<LogKind> {
        if !file_name.ends_with(&self.log_extension) {
            return None;
        }
        if file_name.contains(&self.companion_marker) {
            Some(LogKind::Companion)
        } else {
            Some(LogKind::Primary)
        }
    }

    /// Workbook a primary log is written to: same directory, log extension
    /// swapped for the workbook extension.
    pub fn primary_target(&self, log_path: &Path) -> Option<PathBuf> {
        let file_name = log_path.file_name()?.to_str()?;
        let base = file_name.strip_suffix(&self.log_extension)?;
        Some(log_path.with_file_name(format!("{base}{}", self.workbook_extension)))
    }

    /// Workbook a companion log is merged into. Only `<base><marker><ext>`
    /// names have one; the marker anywhere else in the name does not pair.
    pub fn companion_target(&self, log_path: &Path) -> Option<PathBuf> {
        let file_name = log_path.file_name()?.to_str()?;
        let stem = file_name.strip_suffix(&self.log_extension)?;
        let base = stem.strip_suffix(&self.companion_marker)?;
        if base.is_empty() {
            return None;
        }
        Some(log_path.with_file_name(format!("{base}{}", self.workbook_extension)))
    }
}

/// Inputs of one merge run. Both paths are explicit so the run never depends
/// on the process working directory.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Workbook cloned for every primary log. Never modified.
    pub template: PathBuf,
    /// Directory searched recursively for logs.
    pub root: PathBuf,
    pub typing: CellTyping,
    pub naming: LogNaming,
}

impl MergeConfig {
    pub fn new(template: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            root: root.into(),
            typing: CellTyping::default(),
            naming: LogNaming::default(),
        }
    }

    pub fn with_typing(mut self, typing: CellTyping) -> Self {
        self.typing = typing;
        self
    }

    pub fn with_naming(mut self, naming: LogNaming) -> Self {
        self.naming = naming;
        self
    }
}
