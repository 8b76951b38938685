//! Focus-stack command.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use v4d_rig::Rig;

use super::progress::{follow, Output};

#[derive(Args)]
pub struct FocusStackArgs {
    /// Number of frames (defaults to the configured frame count)
    #[arg(short, long)]
    frames: Option<u32>,
}

pub async fn execute(args: FocusStackArgs, rig: &Rig, output: &Output) -> Result<()> {
    let service = rig.focus_stack();
    let report = follow(service.process(), service.run(args.frames), output).await?;

    output.line(format!(
        "Captured {} frames on {}",
        report.frames_captured, report.camera
    ));
    output.document(&json!({ "snapshot": service.status() }))?;
    Ok(())
}
