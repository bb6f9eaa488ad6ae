use std::fs;
use std::path::Path;

use calamine::{Reader, Xlsx, open_workbook};
use rust_xlsxwriter::Workbook;
use tracing::{debug, instrument};

use crate::error::{Result, ToolError};
use crate::model::{DATA_SHEET, GAS_DATA_SHEET};

/// Sheets every template must provide.
pub const REQUIRED_SHEETS: [&str; 2] = [DATA_SHEET, GAS_DATA_SHEET];

/// Checks that the template exists and declares every required sheet.
/// Returns all sheet names in workbook order.
#[instrument(level = "info", skip_all, fields(template = %template.display()))]
pub fn validate_template(template: &Path, required: &[&str]) -> Result<Vec<String>> {
    if !template.is_file() {
        return Err(ToolError::MissingInput(template.to_path_buf()));
    }

    let workbook: Xlsx<_> = open_workbook(template)?;
    let sheet_names = workbook.sheet_names().to_vec();
    for name in required {
        if !sheet_names.iter().any(|sheet| sheet == name) {
            return Err(ToolError::MissingSheet {
                workbook: template.to_path_buf(),
                sheet: (*name).to_string(),
            });
        }
    }

    debug!(sheets = ?sheet_names, "template validated");
    Ok(sheet_names)
}

/// Copies the template to `target`, replacing whatever is there.
pub fn clone_template(template: &Path, target: &Path) -> Result<()> {
    if !template.is_file() {
        return Err(ToolError::MissingInput(template.to_path_buf()));
    }
    if target.exists() && fs::canonicalize(template)? == fs::canonicalize(target)? {
        return Err(ToolError::InvalidWorkbook(format!(
            "refusing to overwrite the template {}",
            template.display()
        )));
    }

    fs::copy(template, target)?;
    debug!(template = %template.display(), target = %target.display(), "template cloned");
    Ok(())
}

/// Writes a minimal template holding the two log sheets.
pub fn write_blank_template(path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    for name in REQUIRED_SHEETS {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(name)?;
    }
    workbook.save(path)?;
    Ok(())
}
