use clap::{CommandFactory, Parser};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

mod error;
#[cfg_attr(windows, allow(dead_code))]
mod pe;
mod output;
mod scanner;
mod version_block;
mod version_extractor;
#[cfg(windows)]
mod winver;

use crate::error::Error;
use crate::output::FilterMode;
use crate::version_extractor::SystemVersionQuery;

#[derive(Parser, Debug)]
#[command(disable_version_flag = true)]
struct Args {
    /// Directory to read.
    #[arg(short, long = "dir", default_value = ".", allow_hyphen_values = true)]
    dir: PathBuf,

    /// Show names in output.
    #[arg(short, long = "names")]
    names: bool,

    /// Show Windows build tags that could theoretically be full Windows builds.
    #[arg(short, long = "windows")]
    windows: bool,

    /// Show build tags that use older source depot format.
    #[arg(long = "wsd")]
    wsd: bool,

    /// Show version and exit.
    #[arg(short, long = "version")]
    version: bool,
}

/// `-wsd` is a single dash flag with a long name; clap would read it as `-w -s -d`.
/// Only flag positions are rewritten, never the value of `-d` or anything after `--`.
fn normalize_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    let mut takes_value = false;
    let mut operands = false;
    args.into_iter()
        .map(|arg| {
            let is_flag = !takes_value && !operands;
            takes_value = is_flag && (arg == "-d" || arg == "--dir");
            operands = operands || (is_flag && arg == "--");
            if is_flag && arg == "-wsd" {
                OsString::from("--wsd")
            } else {
                arg
            }
        })
        .collect()
}

fn init_logging() -> Result<(), log::SetLoggerError> {
    SimpleLogger::new().with_level(LevelFilter::Warn).env().init()
}

fn banner() -> String {
    format!(
        "{} v{} by {}.",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_AUTHORS")
    )
}

fn run(args: Args) -> Result<(), Error> {
    if args.version {
        println!("{}", banner());
        return Ok(());
    }

    let mode = FilterMode::from_flags(args.names, args.windows, args.wsd)?;
    let versions = scanner::scan_directory(&SystemVersionQuery::default(), &args.dir)?;

    for line in output::render(&versions, mode) {
        println!("{}", line);
    }
    Ok(())
}

fn main() -> ExitCode {
    // Diagnostics go to stderr; stdout carries only results.
    if let Err(e) = init_logging() {
        eprintln!("{}: failed to initialize logging: {}", env!("CARGO_PKG_NAME"), e);
    }

    let args = Args::parse_from(normalize_args(std::env::args_os()));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::ConflictingFilters) => {
            println!("{}", Error::ConflictingFilters);
            eprintln!("{}", Args::command().render_help());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", env!("CARGO_PKG_NAME"), e);
            ExitCode::FAILURE
        }
    }
}
