use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use patronus_convert::error::{exit_code, ConvertError};
use patronus_convert::report::render_issues;
use tracing_subscriber::EnvFilter;

mod check_cmd;
mod cli;
mod convert_cmd;
mod export_cmd;
mod input;
mod inspect_cmd;
mod path_guard;
mod simulate_cmd;

use cli::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            let convert = err.downcast_ref::<ConvertError>();
            if let Some(issues) = convert.map(ConvertError::issues).filter(|i| !i.is_empty()) {
                eprintln!("{}", render_issues(issues));
            }
            eprintln!("{} {err:#}", "error:".red().bold());
            convert.map_or(exit_code::GENERAL, ConvertError::exit_code)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Convert(args) => convert_cmd::run_convert(args),
        Command::Check(args) => check_cmd::run_check(args),
        Command::Inspect(args) => inspect_cmd::run_inspect(args),
        Command::Export(args) => export_cmd::run_export(args),
        Command::Simulate(args) => simulate_cmd::run_simulate(args),
    }
}
