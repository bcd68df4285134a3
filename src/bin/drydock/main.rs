//! drydock CLI - dynamic plugin export tool

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use drydock::ops::ExportError;
use drydock::util::diagnostic;
use drydock::util::TaskError;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("drydock=debug")
    } else if cli.quiet {
        EnvFilter::new("drydock=error")
    } else {
        EnvFilter::new("drydock=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        report_error(&e);
        std::process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Export(args) => commands::export::execute(args),
        Commands::Package(args) => commands::package::execute(args),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}

fn report_error(error: &anyhow::Error) {
    if let Some(export_err) = error.downcast_ref::<ExportError>() {
        diagnostic::emit(&export_err.to_diagnostic());
    } else {
        eprintln!("error: {:#}", error);
    }
}

/// Subprocess exit codes are surfaced; everything else exits 1.
fn exit_code(error: &anyhow::Error) -> i32 {
    let task_code = match error.downcast_ref::<ExportError>() {
        Some(ExportError::Subprocess(task)) => task.code,
        _ => error.downcast_ref::<TaskError>().and_then(|task| task.code),
    };
    match task_code {
        Some(code) if code != 0 => code,
        _ => 1,
    }
}
