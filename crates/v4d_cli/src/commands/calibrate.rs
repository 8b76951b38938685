//! Calibrate command - Calibrate the rig.

use anyhow::Result;
use clap::Args;
use serde_json::json;
use tracing::info;

use v4d_rig::{CalibrationKind, CalibrationValidation, OverallHealth, Rig};

use super::progress::{follow, Output};

#[derive(Args)]
pub struct CalibrateArgs {
    /// What to calibrate: cameras, gimbal, lighting, synchronization, full
    #[arg(short, long, default_value = "full")]
    kind: CalibrationKind,

    /// Validate the calibration record afterwards
    #[arg(long)]
    validate: bool,
}

pub async fn execute(args: CalibrateArgs, rig: &Rig, output: &Output) -> Result<()> {
    info!("Calibrating: {}", args.kind);
    let service = rig.calibration();

    let run = service.start(args.kind)?;
    let report = follow(service.process(), run.wait(), output).await?;

    output.line(format!("Calibration complete ({})", report.kind));
    if let Some(cameras) = &report.cameras {
        for (name, camera) in [("R5C", &cameras.r5c), ("R5 Mk II", &cameras.r5m2)] {
            if let Some(k) = camera.intrinsics {
                output.line(format!(
                    "  {:<9} fx={:.0} fy={:.0} cx={:.0} cy={:.0}",
                    name, k.fx, k.fy, k.cx, k.cy
                ));
            }
        }
    }
    if let Some(gimbal) = &report.gimbal {
        output.line(format!(
            "  Gimbal    pan={:+.3} tilt={:+.3} roll={:+.3}",
            gimbal.offsets.pan, gimbal.offsets.tilt, gimbal.offsets.roll
        ));
    }
    if let Some(lighting) = &report.lighting {
        if let Some(profile) = &lighting.color_profile {
            output.line(format!(
                "  Lighting  white balance {}K, gamma {:.1}",
                profile.white_balance, profile.gamma
            ));
        }
    }
    if let Some(sync) = &report.synchronization {
        output.line(format!(
            "  Sync      latency {:.2} ms, drift {:.3} ms",
            sync.latency_ms, sync.drift_ms
        ));
    }

    let validation = args.validate.then(|| service.validate());
    if let Some(validation) = &validation {
        print_validation(validation, output);
    }

    output.document(&json!({
        "snapshot": service.status(),
        "validation": validation,
    }))?;
    Ok(())
}

fn print_validation(validation: &CalibrationValidation, output: &Output) {
    output.line("");
    match validation.overall {
        OverallHealth::Good => output.line("Calibration status: good"),
        OverallHealth::NeedsAttention => output.line("Calibration status: needs attention"),
    }
    for recommendation in &validation.recommendations {
        output.line(format!("  - {}", recommendation));
    }
}
