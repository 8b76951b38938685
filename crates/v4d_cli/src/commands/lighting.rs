//! Lighting command - Apply a scene or run a sequence.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use v4d_rig::{LightingSequence, Rig, Scene};

use super::progress::{follow, Output};

#[derive(Args)]
#[command(group(clap::ArgGroup::new("action").required(true).args(["sequence", "scene"])))]
pub struct LightingArgs {
    /// Sequence to run: capture, daylight, color-cycle
    #[arg(short, long)]
    sequence: Option<LightingSequence>,

    /// Scene to apply: neutral, macro, dramatic, product
    #[arg(long)]
    scene: Option<Scene>,
}

pub async fn execute(args: LightingArgs, rig: &Rig, output: &Output) -> Result<()> {
    let lighting = rig.lighting();
    lighting.connect();

    let report = match (args.sequence, args.scene) {
        (Some(sequence), _) => {
            follow(lighting.process(), lighting.run_sequence(sequence), output).await?
        }
        (None, Some(scene)) => {
            follow(lighting.process(), lighting.apply_scene(scene), output).await?
        }
        (None, None) => anyhow::bail!("either --sequence or --scene is required"),
    };

    output.line(format!("Active scene: {}", report.active_scene));
    for light in &report.lights {
        output.line(format!(
            "  {:<10} ch {:>2}  {:>5.1}%  {}K  {}",
            light.name,
            light.dmx_channel(),
            light.intensity,
            light.temperature,
            if light.enabled { "on" } else { "off" }
        ));
    }

    output.document(&json!({
        "snapshot": lighting.status(),
        "lighting": lighting.state(),
    }))?;
    Ok(())
}
