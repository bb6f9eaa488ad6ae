//! Recursive discovery of log files below a root directory.
//!
//! Symbolic links are not followed, so the walk terminates on any finite tree.
//! Link loops created through other means (bind mounts) are not detected.

use std::path::Path;

use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::config::LogNaming;
use crate::error::{FileError, FileErrorKind, Result, ToolError};
use crate::model::{LogFile, LogFileSet};

/// Walks `root` and returns every regular file carrying the log extension.
///
/// Only an unreadable root is fatal. Unreadable entries further down are
/// recorded in [`LogFileSet::issues`] and the walk continues without them.
#[instrument(level = "info", skip_all, fields(root = %root.display()))]
pub fn discover(root: &Path, naming: &LogNaming) -> Result<LogFileSet> {
    if !root.exists() {
        return Err(ToolError::MissingInput(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ToolError::NotADirectory(root.to_path_buf()));
    }

    let mut set = LogFileSet::default();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.depth() == 0 => {
                return Err(ToolError::Discovery {
                    path: root.to_path_buf(),
                    source: error,
                });
            }
            Err(error) => {
                let path = error.path().unwrap_or(root).to_path_buf();
                warn!(path = %path.display(), %error, "skipping unreadable entry");
                set.issues
                    .push(FileError::new(FileErrorKind::Discovery, path, error));
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(file_name) = entry.file_name().to_str() else {
            if entry.path().to_string_lossy().ends_with(&naming.log_extension) {
                set.issues.push(FileError::new(
                    FileErrorKind::Discovery,
                    entry.path(),
                    "file name is not valid UTF-8",
                ));
            }
            continue;
        };

        if let Some(kind) = naming.classify(file_name) {
            debug!(file = file_name, ?kind, "found log");
            set.files
                .push(LogFile::new(entry.path(), file_name.to_string(), kind));
        }
    }

    debug!(
        files = set.len(),
        issues = set.issues.len(),
        "discovery finished"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_logs_at_any_depth() {
        let dir = tempdir().expect("temporary directory");
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("nested directories");
        fs::write(dir.path().join("run1.csv"), "1;2").expect("log written");
        fs::write(dir.path().join("run1_gasLog.csv"), "3;4").expect("log written");
        fs::write(nested.join("deep.csv"), "5").expect("log written");
        fs::write(nested.join("notes.txt"), "ignored").expect("note written");
        fs::write(nested.join("deep.xlsx"), "ignored").expect("workbook written");

        let set = discover(dir.path(), &LogNaming::default()).expect("discovered");

        let mut names: Vec<_> = set
            .files
            .iter()
            .map(|file| (file.base_name.as_str(), file.kind))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                ("deep.csv", LogKind::Primary),
                ("run1.csv", LogKind::Primary),
                ("run1_gasLog.csv", LogKind::Companion),
            ]
        );
        assert!(set.issues.is_empty());
        assert_eq!(set.primaries().count(), 2);
        assert_eq!(set.companions().count(), 1);
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempdir().expect("temporary directory");
        let result = discover(&dir.path().join("absent"), &LogNaming::default());
        assert!(matches!(result, Err(ToolError::MissingInput(_))));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_ignored() {
        let dir = tempdir().expect("temporary directory");
        let outside = tempdir().expect("second directory");
        fs::write(outside.path().join("linked.csv"), "1").expect("log written");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link"))
            .expect("directory link");
        std::os::unix::fs::symlink(
            outside.path().join("linked.csv"),
            dir.path().join("file_link.csv"),
        )
        .expect("file link");

        let set = discover(dir.path(), &LogNaming::default()).expect("discovered");
        assert!(set.is_empty());
    }
}
