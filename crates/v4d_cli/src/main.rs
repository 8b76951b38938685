//! Vantage4D CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Stage failure
//! - 130: Interrupted (Ctrl-C)

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, Interrupted};
use v4d_core::CoreError;
use v4d_rig::RigError;

/// Script-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const STAGE_FAILURE: u8 = 3;
    pub const INTERRUPTED: u8 = 130;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match commands::build_rig(&cli) {
        Ok(rig) => {
            let output = cli.output();
            match cli.command {
                Commands::Calibrate(args) => {
                    commands::calibrate::execute(args, &rig, &output).await
                }
                Commands::Reconstruct(args) => {
                    commands::reconstruct::execute(args, &rig, &output).await
                }
                Commands::FocusStack(args) => {
                    commands::focus_stack::execute(args, &rig, &output).await
                }
                Commands::Lighting(args) => commands::lighting::execute(args, &rig, &output).await,
            }
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            if exit_code == ExitCodes::INTERRUPTED {
                eprintln!("Interrupted");
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(exit_code)
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,v4d={}", level)));

    let registry = tracing_subscriber::registry().with(filter);
    let log_result = if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Map an error to its exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<Interrupted>().is_some() {
        return ExitCodes::INTERRUPTED;
    }

    let core = e
        .downcast_ref::<CoreError>()
        .or_else(|| match e.downcast_ref::<RigError>() {
            Some(RigError::Core(core)) => Some(core),
            _ => None,
        });
    match core {
        Some(CoreError::StageFailed { .. }) => return ExitCodes::STAGE_FAILURE,
        Some(CoreError::Cancelled) => return ExitCodes::INTERRUPTED,
        _ => {}
    }

    match e.downcast_ref::<RigError>() {
        Some(
            RigError::Config(_)
            | RigError::Toml(_)
            | RigError::Unknown { .. }
            | RigError::UnsupportedFormat(_),
        ) => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
