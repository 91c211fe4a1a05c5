//! vinestore - vineyard record tables on local files and Google Sheets.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use vinestore::Result;
use vinestore::app::AppContext;
use vinestore::cli::output::{emit_json, robot_error};
use vinestore::cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.output_format().is_machine_readable() {
                // Machine mode: structured error on stdout
                if emit_json(&robot_error(&e)).is_err() {
                    eprintln!("Error: {e}");
                }
            } else {
                eprintln!("Error: {e}");
                let suggestion = e.to_structured().suggestion;
                if !suggestion.is_empty() {
                    eprintln!("Hint: {suggestion}");
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        vinestore::cli::commands::completions::run(args);
        return Ok(());
    }
    let ctx = AppContext::from_cli(cli)?;
    vinestore::cli::commands::run(&ctx, &cli.command)
}

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => "warn,vinestore=info",
        1 => "info,vinestore=debug",
        2 => "debug,vinestore=trace",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.robot {
        // JSON logging for robot mode
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
