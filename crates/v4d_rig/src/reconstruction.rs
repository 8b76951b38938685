//! Gaussian-splatting reconstruction and model export.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use v4d_core::{ProcessSnapshot, ProcessStatus, RunHandle, Stage, StagePlan, StagedProcess};

use crate::config::RigConfig;
use crate::error::{RigError, RigResult};

/// Name the reconstruction process is registered under.
pub const RECONSTRUCTION_PROCESS: &str = "reconstruction";

/// Up-front estimate shown before the first stage finishes, in seconds.
pub const ESTIMATED_TIME_SECS: u64 = 300;

const RECONSTRUCTION_STAGES: &[(&str, u64)] = &[
    ("Loading frames...", 2000),
    ("Feature extraction...", 3000),
    ("Depth estimation...", 4000),
    ("Point cloud generation...", 5000),
    ("Gaussian splatting optimization...", 8000),
    ("Texture mapping...", 3000),
    ("Final rendering...", 2000),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    pub vertices: u64,
    pub faces: u64,
    pub splats: u64,
    /// Megabytes
    pub file_size: u64,
    /// Milliseconds per frame
    pub render_time: u64,
}

impl ModelStats {
    /// Plausible statistics for a high-quality scan.
    pub fn synthesize() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            vertices: rng.gen_range(500_000..1_500_000),
            faces: rng.gen_range(1_000_000..3_000_000),
            splats: rng.gen_range(2_000_000..7_000_000),
            file_size: rng.gen_range(100..600),
            render_time: rng.gen_range(4..20),
        }
    }
}

/// Elapsed and estimated reconstruction time.
///
/// The processing time grows as stages finish: it is the nominal duration of
/// every completed stage, independent of the configured time scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionTiming {
    /// Seconds
    pub processing_time: f64,
    /// Seconds
    pub estimated_time: u64,
}

impl ReconstructionTiming {
    pub fn of(snapshot: &ProcessSnapshot) -> Self {
        Self {
            processing_time: elapsed_secs(snapshot.progress),
            estimated_time: ESTIMATED_TIME_SECS,
        }
    }
}

fn total_ms() -> u64 {
    RECONSTRUCTION_STAGES.iter().map(|(_, ms)| ms).sum()
}

/// Stage weights are nominal milliseconds, so progress maps back to whole ms.
#[allow(clippy::cast_precision_loss)]
fn elapsed_secs(progress: f64) -> f64 {
    let done_ms = (progress.clamp(0.0, 100.0) / 100.0 * total_ms() as f64).round();
    done_ms / 1000.0
}

/// Payload of a completed reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionReport {
    pub model_stats: ModelStats,
    /// Sum of nominal stage durations, in seconds
    pub processing_time: f64,
    pub estimated_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Ply,
    Obj,
    Splat,
    Glb,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ply => "ply",
            Self::Obj => "obj",
            Self::Splat => "splat",
            Self::Glb => "glb",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "ply" => Ok(Self::Ply),
            "obj" => Ok(Self::Obj),
            "splat" => Ok(Self::Splat),
            "glb" => Ok(Self::Glb),
            _ => Err(RigError::UnsupportedFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    Low,
    Medium,
    #[default]
    High,
    Ultra,
}

impl ExportQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Ultra => "ultra",
        }
    }
}

impl fmt::Display for ExportQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportQuality {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "ultra" => Ok(Self::Ultra),
            other => Err(RigError::Unknown {
                kind: "export quality",
                value: other.to_string(),
            }),
        }
    }
}

/// Where an exported model can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub download_url: String,
    pub file_name: String,
    /// Megabytes
    pub file_size: u64,
    pub format: ExportFormat,
    pub quality: ExportQuality,
}

impl ExportArtifact {
    fn new(format: ExportFormat, quality: ExportQuality, stats: &ModelStats) -> Self {
        Self {
            download_url: format!("/api/reconstruction/download/{}", format),
            file_name: format!("vantage4d_model.{}", format.extension()),
            file_size: stats.file_size,
            format,
            quality,
        }
    }
}

pub fn reconstruction_plan(config: &RigConfig) -> StagePlan {
    let processing_time = elapsed_secs(100.0);

    StagePlan::new("reconstruction", "3D Reconstruction")
        .with_description("Gaussian splatting reconstruction")
        .stages(RECONSTRUCTION_STAGES.iter().map(|(label, ms)| {
            Stage::timed(*label, Duration::from_millis(*ms), config.scaled(*ms))
        }))
        .produce_with(move || async move {
            let report = ReconstructionReport {
                model_stats: ModelStats::synthesize(),
                processing_time,
                estimated_time: ESTIMATED_TIME_SECS,
            };
            anyhow::Ok(serde_json::to_value(report)?)
        })
}

#[derive(Debug, Clone)]
pub struct ReconstructionService {
    process: StagedProcess,
    config: RigConfig,
}

impl ReconstructionService {
    pub fn new(config: RigConfig) -> Self {
        Self {
            process: StagedProcess::new(RECONSTRUCTION_PROCESS, reconstruction_plan(&config)),
            config,
        }
    }

    pub fn process(&self) -> &StagedProcess {
        &self.process
    }

    pub fn status(&self) -> ProcessSnapshot {
        self.process.status()
    }

    /// Start a reconstruction, replacing any finished one.
    pub fn start(&self) -> RigResult<RunHandle> {
        info!("Starting 3D reconstruction with Gaussian Splatting...");
        Ok(self
            .process
            .restart_with(reconstruction_plan(&self.config))?)
    }

    pub async fn run(&self) -> RigResult<ReconstructionReport> {
        let snapshot = self.start()?.wait().await?;
        report_from(&snapshot)
    }

    pub fn stop(&self) -> bool {
        self.process.stop()
    }

    pub fn reset(&self) -> RigResult<()> {
        Ok(self.process.reset()?)
    }

    /// Processing time so far; zero while idle.
    pub fn timing(&self) -> ReconstructionTiming {
        ReconstructionTiming::of(&self.process.status())
    }

    /// Report of the last completed reconstruction.
    pub fn report(&self) -> RigResult<ReconstructionReport> {
        let snapshot = self.process.status();
        if snapshot.status != ProcessStatus::Completed {
            return Err(RigError::NotReady(format!(
                "reconstruction is {}, not completed",
                snapshot.status
            )));
        }
        report_from(&snapshot)
    }

    /// Export the completed model.
    pub async fn export(
        &self,
        format: ExportFormat,
        quality: ExportQuality,
    ) -> RigResult<ExportArtifact> {
        let report = self.report()?;
        info!("Exporting model as {} with {} quality...", format, quality);
        tokio::time::sleep(self.config.scaled(self.config.export_delay_ms)).await;
        Ok(ExportArtifact::new(format, quality, &report.model_stats))
    }
}

fn report_from(snapshot: &ProcessSnapshot) -> RigResult<ReconstructionReport> {
    let value = snapshot.result.clone().ok_or_else(|| {
        RigError::NotReady("reconstruction finished without model statistics".to_string())
    })?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_ranges() {
        for _ in 0..50 {
            let stats = ModelStats::synthesize();
            assert!((500_000..1_500_000).contains(&stats.vertices));
            assert!((1_000_000..3_000_000).contains(&stats.faces));
            assert!((2_000_000..7_000_000).contains(&stats.splats));
            assert!((100..600).contains(&stats.file_size));
            assert!((4..20).contains(&stats.render_time));
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!(".GLB".parse::<ExportFormat>().unwrap(), ExportFormat::Glb);
        assert!(matches!(
            "fbx".parse::<ExportFormat>(),
            Err(RigError::UnsupportedFormat(_))
        ));
        assert_eq!("ultra".parse::<ExportQuality>().unwrap(), ExportQuality::Ultra);
    }

    #[test]
    fn test_plan_shape() {
        let plan = reconstruction_plan(&RigConfig::instant());
        assert_eq!(plan.len(), 7);
        assert_eq!(plan.total_weight(), 27_000);
        assert_eq!(plan.labels()[4], "Gaussian splatting optimization...");
    }

    #[tokio::test]
    async fn test_export_requires_completion() {
        let service = ReconstructionService::new(RigConfig::instant());
        let err = service
            .export(ExportFormat::Ply, ExportQuality::High)
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_run_then_export() {
        let service = ReconstructionService::new(RigConfig::instant());
        let report = service.run().await.unwrap();
        assert_eq!(report.processing_time, 27.0);
        assert_eq!(report.estimated_time, 300);

        let artifact = service
            .export(ExportFormat::Splat, ExportQuality::Medium)
            .await
            .unwrap();
        assert_eq!(artifact.download_url, "/api/reconstruction/download/splat");
        assert_eq!(artifact.file_name, "vantage4d_model.splat");
        assert_eq!(artifact.file_size, report.model_stats.file_size);
        assert_eq!(service.timing().processing_time, 27.0);
    }

    #[tokio::test]
    async fn test_processing_time_grows_while_running() {
        let service = ReconstructionService::new(RigConfig::default().time_scale(0.001));
        assert_eq!(service.timing().processing_time, 0.0);
        assert_eq!(service.timing().estimated_time, 300);

        let handle = service.start().unwrap();
        let completed_stage_sums = [2.0, 5.0, 9.0, 14.0, 22.0, 25.0];
        let mut seen = Vec::new();
        loop {
            let snapshot = service.status();
            if snapshot.status != ProcessStatus::Running {
                break;
            }
            let elapsed = ReconstructionTiming::of(&snapshot).processing_time;
            assert!(
                elapsed == 0.0 || completed_stage_sums.contains(&elapsed),
                "unexpected processing time {elapsed}"
            );
            if seen.last() != Some(&elapsed) {
                seen.push(elapsed);
            }
            tokio::task::yield_now().await;
        }
        handle.wait().await.unwrap();

        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(service.timing().processing_time, 27.0);

        service.reset().unwrap();
        assert_eq!(service.timing().processing_time, 0.0);
    }
}
