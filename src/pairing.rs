use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, instrument};

use crate::config::LogNaming;
use crate::error::{FileError, FileErrorKind};
use crate::model::{LogFileSet, LogKind, LogPair};

/// Logs grouped by the workbook they feed.
#[derive(Debug, Clone, Default)]
pub struct PairingPlan {
    /// Ordered by target path so runs are deterministic.
    pub pairs: BTreeMap<PathBuf, LogPair>,
    /// Logs whose name yields no target workbook.
    pub unpaired: Vec<FileError>,
}

impl PairingPlan {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Groups every discovered log with the other log of the same run.
///
/// A companion `<base>_gasLog.csv` pairs with `<base>.csv` in the same
/// directory because both derive the same `<base>.xlsx` target.
#[instrument(level = "debug", skip_all, fields(files = set.len()))]
pub fn pair_logs(set: &LogFileSet, naming: &LogNaming) -> PairingPlan {
    let mut plan = PairingPlan::default();

    for file in &set.files {
        let target = match file.kind {
            LogKind::Primary => naming.primary_target(&file.path),
            LogKind::Companion => naming.companion_target(&file.path),
        };
        let Some(target) = target else {
            plan.unpaired.push(FileError::new(
                FileErrorKind::Overlay,
                &file.path,
                "no primary workbook can be derived from this name",
            ));
            continue;
        };

        let pair = plan
            .pairs
            .entry(target.clone())
            .or_insert_with(|| LogPair::new(target));
        let slot = match file.kind {
            LogKind::Primary => &mut pair.primary,
            LogKind::Companion => &mut pair.companion,
        };
        *slot = Some(file.clone());
    }

    debug!(
        pairs = plan.len(),
        unpaired = plan.unpaired.len(),
        "logs paired"
    );
    plan
}
