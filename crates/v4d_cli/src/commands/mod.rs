//! CLI command definitions.
//!
//! Each subcommand drives one rig procedure to completion, rendering
//! progress while it runs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thiserror::Error;
use v4d_rig::{Rig, RigConfig};

pub mod calibrate;
pub mod focus_stack;
pub mod lighting;
pub mod progress;
pub mod reconstruct;

pub use progress::Output;

/// Vantage4D - volumetric capture rig control
#[derive(Parser)]
#[command(name = "v4d")]
#[command(version, about = "Vantage4D - volumetric capture rig control")]
#[command(long_about = r#"
Drive the Vantage4D capture rig from the command line.

PROCEDURES:
  calibrate     → Calibrate cameras, gimbal, lighting, synchronization
  reconstruct   → Gaussian splatting reconstruction (optionally export)
  focus-stack   → Capture a focus stack on the R5 Mk II
  lighting      → Apply a lighting scene or run a lighting sequence

Press Ctrl-C to stop a running procedure.

EXIT CODES:
  0   - Success
  1   - General error
  2   - Invalid arguments or configuration
  3   - Stage failure
  130 - Interrupted
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Rig configuration file (TOML)
    #[arg(short, long, global = true, env = "V4D_CONFIG")]
    pub config: Option<PathBuf>,

    /// Multiplier for simulated stage durations (0 = instant)
    #[arg(long, global = true)]
    pub time_scale: Option<f64>,

    /// Progress polling interval in milliseconds
    #[arg(long, global = true, default_value_t = 200)]
    pub poll_ms: u64,

    /// Print the final state as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output(&self) -> Output {
        Output {
            json: self.json,
            quiet: self.quiet,
            poll: Duration::from_millis(self.poll_ms.max(1)),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Calibrate the rig
    Calibrate(calibrate::CalibrateArgs),

    /// Reconstruct a 3D model from captured frames
    Reconstruct(reconstruct::ReconstructArgs),

    /// Capture a focus stack
    #[command(name = "focus-stack")]
    FocusStack(focus_stack::FocusStackArgs),

    /// Control the DMX lighting
    Lighting(lighting::LightingArgs),
}

/// The user pressed Ctrl-C and the running procedure was stopped.
#[derive(Debug, Error)]
#[error("interrupted")]
pub struct Interrupted;

/// Load the config file (if any), apply flag overrides, and build the rig.
pub fn build_rig(cli: &Cli) -> Result<Rig> {
    let mut config = match &cli.config {
        Some(path) => RigConfig::load(path)
            .with_context(|| format!("Failed to load rig configuration from {:?}", path))?,
        None => RigConfig::default(),
    };

    if let Some(scale) = cli.time_scale {
        config = config.time_scale(scale);
        config.validate().context("Invalid --time-scale")?;
    }

    Ok(Rig::new(config))
}
