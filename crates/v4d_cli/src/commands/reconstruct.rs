//! Reconstruct command - Build a 3D model and optionally export it.

use anyhow::Result;
use clap::Args;
use serde_json::json;

use v4d_rig::{ExportFormat, ExportQuality, Rig};

use super::progress::{follow, Output};

#[derive(Args)]
pub struct ReconstructArgs {
    /// Export the model when done: ply, obj, splat, glb
    #[arg(short, long)]
    export: Option<ExportFormat>,

    /// Export quality: low, medium, high, ultra
    #[arg(long, default_value = "high", requires = "export")]
    quality: ExportQuality,
}

pub async fn execute(args: ReconstructArgs, rig: &Rig, output: &Output) -> Result<()> {
    let service = rig.reconstruction();
    let report = follow(service.process(), service.run(), output).await?;

    let stats = report.model_stats;
    output.line("Reconstruction complete");
    output.line(format!("  Vertices:    {}", stats.vertices));
    output.line(format!("  Faces:       {}", stats.faces));
    output.line(format!("  Splats:      {}", stats.splats));
    output.line(format!("  File size:   {} MB", stats.file_size));
    output.line(format!("  Render time: {} ms", stats.render_time));
    output.line(format!(
        "  Processing:  {:.1} s (estimated {} s)",
        report.processing_time, report.estimated_time
    ));

    let artifact = match args.export {
        Some(format) => {
            let artifact = service.export(format, args.quality).await?;
            output.line(format!(
                "Exported {} ({} MB) -> {}",
                artifact.file_name, artifact.file_size, artifact.download_url
            ));
            Some(artifact)
        }
        None => None,
    };

    output.document(&json!({
        "snapshot": service.status(),
        "timing": service.timing(),
        "export": artifact,
    }))?;
    Ok(())
}
