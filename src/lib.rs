//! Core library for the simsheet command line application.
//!
//! The library turns a tree of semicolon-delimited simulation logs into
//! workbooks cloned from a template. Discovery lives in [`discover`], the
//! explicit log pairing in [`pairing`], the file adapters (CSV grids, template
//! cloning, in-place sheet overlay) under [`io`], and the run orchestration in
//! [`merge`].

pub mod config;
pub mod discover;
pub mod error;
pub mod io;
pub mod merge;
pub mod model;
pub mod pairing;
pub mod report;

pub use config::{CellTyping, LogNaming, MergeConfig};
pub use error::{FileError, FileErrorKind, Result, ToolError};
pub use report::{ConsoleReporter, ProgressReporter, RunSummary, SilentReporter};
