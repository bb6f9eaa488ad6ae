//! Orchestration of a merge run: discover logs, pair them, and fill one
//! workbook per primary log.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::config::MergeConfig;
use crate::discover::discover;
use crate::error::{FileError, FileErrorKind, Result};
use crate::io::{csv_grid, overlay, template};
use crate::model::{LogFile, LogPair, SheetOverlay};
use crate::pairing::pair_logs;
use crate::report::{ProgressReporter, RunSummary, WrittenSheet};

/// Runs a full merge over `config.root`.
///
/// Every output is recomputed: the template is cloned afresh for each primary
/// log. Per-file failures end up in [`RunSummary::skipped`]; only a missing or
/// unusable template and an unreadable root abort the run.
///
/// `cancel` is polled between workbooks.
#[instrument(
    level = "info",
    skip_all,
    fields(template = %config.template.display(), root = %config.root.display())
)]
pub fn run(
    config: &MergeConfig,
    reporter: &mut dyn ProgressReporter,
    cancel: Option<&AtomicBool>,
) -> Result<RunSummary> {
    template::validate_template(&config.template, &template::REQUIRED_SHEETS)?;
    let logs = discover(&config.root, &config.naming)?;
    let plan = pair_logs(&logs, &config.naming);
    info!(
        logs = logs.len(),
        primaries = logs.primaries().count(),
        companions = logs.companions().count(),
        workbooks = plan.len(),
        "logs discovered and paired"
    );

    let mut summary = RunSummary {
        discovered: logs.len(),
        ..RunSummary::default()
    };
    for issue in logs.issues.iter().chain(&plan.unpaired) {
        skip(&mut summary, reporter, issue.clone());
    }

    let approx_total = logs.len() / 2;
    for (index, pair) in plan.pairs.values().enumerate() {
        if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            info!(processed = index, "run cancelled");
            summary.cancelled = true;
            break;
        }
        merge_pair(config, pair, index, approx_total, &mut summary, reporter);
    }

    info!(
        written = summary.written.len(),
        skipped = summary.skipped.len(),
        "run finished"
    );
    reporter.on_done(&summary);
    Ok(summary)
}

/// Fills the workbook of one pair: clone plus `Data` for the primary, then
/// `GasData` for the companion once the workbook exists.
fn merge_pair(
    config: &MergeConfig,
    pair: &LogPair,
    index: usize,
    approx_total: usize,
    summary: &mut RunSummary,
    reporter: &mut dyn ProgressReporter,
) {
    let mut workbook_ready = false;

    if let Some(primary) = &pair.primary {
        reporter.on_file(index, approx_total, &primary.base_name);
        match write_primary(config, primary, &pair.target) {
            Ok(written) => {
                summary.written.push(written);
                workbook_ready = true;
            }
            Err(error) => skip(summary, reporter, error),
        }
    }

    if let Some(companion) = &pair.companion {
        reporter.on_file(index, approx_total, &companion.base_name);
        let result = if workbook_ready {
            write_companion(config, companion, &pair.target)
        } else {
            Err(FileError::new(
                FileErrorKind::Overlay,
                &companion.path,
                format!(
                    "primary workbook {} was not created",
                    pair.target.display()
                ),
            ))
        };
        match result {
            Ok(written) => summary.written.push(written),
            Err(error) => skip(summary, reporter, error),
        }
    }
}

fn write_primary(
    config: &MergeConfig,
    log: &LogFile,
    target: &Path,
) -> std::result::Result<WrittenSheet, FileError> {
    let grid = csv_grid::read_grid(&log.path, config.typing)
        .map_err(|err| FileError::new(FileErrorKind::Parse, &log.path, err))?;
    template::clone_template(&config.template, target)
        .map_err(|err| FileError::new(FileErrorKind::Clone, &log.path, err))?;
    write_overlay(log, SheetOverlay::new(target, log.kind.sheet_name(), grid))
}

fn write_companion(
    config: &MergeConfig,
    log: &LogFile,
    target: &Path,
) -> std::result::Result<WrittenSheet, FileError> {
    let grid = csv_grid::read_grid(&log.path, config.typing)
        .map_err(|err| FileError::new(FileErrorKind::Parse, &log.path, err))?;
    write_overlay(log, SheetOverlay::new(target, log.kind.sheet_name(), grid))
}

fn write_overlay(
    log: &LogFile,
    sheet: SheetOverlay,
) -> std::result::Result<WrittenSheet, FileError> {
    let cells = overlay::overlay_sheet(&sheet)
        .map_err(|err| FileError::new(FileErrorKind::Overlay, &log.path, err))?;
    debug!(
        source = %log.path.display(),
        workbook = %sheet.workbook.display(),
        sheet = %sheet.sheet_name,
        cells,
        "sheet written"
    );
    Ok(WrittenSheet {
        rows: sheet.grid.height(),
        columns: sheet.grid.width(),
        workbook: sheet.workbook,
        sheet: sheet.sheet_name,
        source: log.path.clone(),
        cells,
    })
}

fn skip(summary: &mut RunSummary, reporter: &mut dyn ProgressReporter, error: FileError) {
    warn!(path = %error.path.display(), kind = %error.kind, cause = %error.cause, "skipping file");
    reporter.on_skip(&error);
    summary.skipped.push(error);
}
