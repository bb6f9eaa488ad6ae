use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand, ValueEnum};
use simsheet::io::{excel_read, template};
use simsheet::{
    CellTyping, ConsoleReporter, LogNaming, MergeConfig, ProgressReporter, Result, SilentReporter,
    ToolError, merge,
};
use tracing_subscriber::EnvFilter;

/// Exit status when the run finished but skipped at least one log.
const EXIT_SKIPPED: i32 = 2;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging(cli.verbose) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Merge(args) => execute_merge(args),
        Command::Template(args) => {
            template::write_blank_template(&args.output)?;
            println!("template written to {}", args.output.display());
            Ok(0)
        }
        Command::Dump(args) => {
            for row in excel_read::read_sheet(&args.workbook, &args.sheet)? {
                println!("{}", row.join(";"));
            }
            Ok(0)
        }
    }
}

fn execute_merge(args: MergeArgs) -> Result<i32> {
    let naming = LogNaming {
        companion_marker: args.companion_marker,
        ..LogNaming::default()
    };
    let config = MergeConfig::new(args.template, args.root)
        .with_typing(args.typing.into())
        .with_naming(naming);

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    if let Err(error) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst)) {
        tracing::warn!(%error, "Ctrl+C handler unavailable; run cannot be interrupted cleanly");
    }

    let mut console = ConsoleReporter::stdout();
    let mut silent = SilentReporter;
    let reporter: &mut dyn ProgressReporter = if args.json { &mut silent } else { &mut console };

    let summary = merge::run(&config, reporter, Some(cancel.as_ref()))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(if summary.is_clean() { 0 } else { EXIT_SKIPPED })
}

fn init_logging(verbose: u8) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|error| ToolError::Logging(error.to_string()))
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Merge semicolon-delimited simulation logs into copies of a workbook template."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fill one workbook per primary log found below the root directory.
    Merge(MergeArgs),
    /// Write a blank template with the Data and GasData sheets.
    Template(TemplateArgs),
    /// Print a sheet of a workbook as semicolon-delimited rows.
    Dump(DumpArgs),
}

#[derive(clap::Args)]
struct MergeArgs {
    /// Workbook cloned for every primary log.
    #[arg(long)]
    template: PathBuf,

    /// Directory searched recursively for logs.
    #[arg(long)]
    root: PathBuf,

    /// How log cells are typed in the workbook.
    #[arg(long, value_enum, default_value_t = TypingKind::Infer)]
    typing: TypingKind,

    /// File name marker that identifies a companion gas log.
    #[arg(long, default_value = "_gasLog")]
    companion_marker: String,

    /// Print the run summary as JSON instead of progress lines.
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args)]
struct TemplateArgs {
    /// Output file path.
    #[arg(long)]
    output: PathBuf,
}

#[derive(clap::Args)]
struct DumpArgs {
    /// Workbook to read.
    #[arg(long)]
    workbook: PathBuf,

    /// Sheet to print.
    #[arg(long, default_value = "Data")]
    sheet: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TypingKind {
    Infer,
    Text,
}

impl From<TypingKind> for CellTyping {
    fn from(kind: TypingKind) -> Self {
        match kind {
            TypingKind::Infer => CellTyping::Infer,
            TypingKind::Text => CellTyping::Text,
        }
    }
}
