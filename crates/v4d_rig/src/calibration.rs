//! Rig calibration: cameras, gimbal, lighting and synchronization.
//!
//! Each calibration kind is a fixed table of stages. A completed run yields a
//! [`CalibrationReport`] covering the subsystems it calibrated; the service
//! merges reports into a [`CalibrationRecord`] that `validate()` inspects.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use v4d_core::{CoreError, ProcessSnapshot, Stage, StagePlan, StagedProcess};

use crate::config::RigConfig;
use crate::error::{RigError, RigResult};

/// Name the calibration process is registered under.
pub const CALIBRATION_PROCESS: &str = "calibration";

const CAMERA_STAGES: &[(&str, u64)] = &[
    ("Detecting checkerboard pattern...", 2000),
    ("Capturing calibration images...", 3000),
    ("Computing intrinsics...", 4000),
    ("Computing extrinsics...", 3000),
    ("Optimizing parameters...", 2000),
];

const GIMBAL_STAGES: &[(&str, u64)] = &[
    ("Finding home position...", 3000),
    ("Testing pan axis...", 2000),
    ("Testing tilt axis...", 2000),
    ("Testing roll axis...", 2000),
    ("Computing offsets...", 2000),
];

const LIGHTING_STAGES: &[(&str, u64)] = &[
    ("Measuring ambient light...", 2000),
    ("Testing key light...", 2000),
    ("Testing fill light...", 2000),
    ("Testing back light...", 2000),
    ("Creating color profile...", 3000),
];

const SYNC_STAGES: &[(&str, u64)] = &[
    ("Testing camera sync...", 3000),
    ("Measuring latency...", 2000),
    ("Testing trigger signals...", 2000),
    ("Optimizing timing...", 3000),
];

const FINAL_VALIDATION: (&str, u64) = ("Final validation...", 2000);

/// Which part of the rig to calibrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    Cameras,
    Gimbal,
    Lighting,
    Synchronization,
    Full,
}

impl CalibrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cameras => "cameras",
            Self::Gimbal => "gimbal",
            Self::Lighting => "lighting",
            Self::Synchronization => "synchronization",
            Self::Full => "full",
        }
    }

    /// Stage labels and nominal durations (ms), in execution order.
    pub fn stage_table(&self) -> Vec<(&'static str, u64)> {
        match self {
            Self::Cameras => CAMERA_STAGES.to_vec(),
            Self::Gimbal => GIMBAL_STAGES.to_vec(),
            Self::Lighting => LIGHTING_STAGES.to_vec(),
            Self::Synchronization => SYNC_STAGES.to_vec(),
            Self::Full => CAMERA_STAGES
                .iter()
                .chain(GIMBAL_STAGES)
                .chain(LIGHTING_STAGES)
                .chain(SYNC_STAGES)
                .copied()
                .chain(std::iter::once(FINAL_VALIDATION))
                .collect(),
        }
    }

    fn covers(&self, subsystem: CalibrationKind) -> bool {
        *self == Self::Full || *self == subsystem
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CalibrationKind {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cameras" | "camera" => Ok(Self::Cameras),
            "gimbal" => Ok(Self::Gimbal),
            "lighting" => Ok(Self::Lighting),
            "synchronization" | "sync" => Ok(Self::Synchronization),
            "full" => Ok(Self::Full),
            other => Err(RigError::Unknown {
                kind: "calibration kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Pinhole intrinsics with radial (k) and tangential (p) distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: [f64; 3],
    pub translation: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub calibrated: bool,
    pub intrinsics: Option<Intrinsics>,
    pub extrinsics: Option<Extrinsics>,
}

/// The R5C video body and the R5 Mk II stills body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraPair {
    pub r5c: CameraCalibration,
    pub r5m2: CameraCalibration,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GimbalOffsets {
    pub pan: f64,
    pub tilt: f64,
    pub roll: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GimbalCalibration {
    pub calibrated: bool,
    pub offsets: GimbalOffsets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorProfile {
    pub white_balance: u32,
    pub gamma: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub color_matrix: [[f64; 3]; 3],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingCalibration {
    pub calibrated: bool,
    pub color_profile: Option<ColorProfile>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCalibration {
    pub calibrated: bool,
    pub latency_ms: f64,
    pub drift_ms: f64,
}

/// Payload of a completed calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub kind: CalibrationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cameras: Option<CameraPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gimbal: Option<GimbalCalibration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting: Option<LightingCalibration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synchronization: Option<SyncCalibration>,
}

impl CalibrationReport {
    /// Synthesize the measurements for `kind`.
    ///
    /// Camera and lighting values are the rig's reference parameters; gimbal
    /// offsets and sync timing are drawn at random.
    pub fn measure(kind: CalibrationKind) -> Self {
        let mut rng = rand::thread_rng();

        let cameras = kind.covers(CalibrationKind::Cameras).then(reference_cameras);
        let gimbal = kind
            .covers(CalibrationKind::Gimbal)
            .then(|| GimbalCalibration {
                calibrated: true,
                offsets: GimbalOffsets {
                    pan: rng.gen_range(-1.0..1.0),
                    tilt: rng.gen_range(-1.0..1.0),
                    roll: rng.gen_range(-0.5..0.5),
                },
            });
        let lighting = kind
            .covers(CalibrationKind::Lighting)
            .then(|| LightingCalibration {
                calibrated: true,
                color_profile: Some(ColorProfile {
                    white_balance: 5600,
                    gamma: 2.2,
                    contrast: 1.1,
                    saturation: 1.0,
                    color_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                }),
            });
        let synchronization = kind
            .covers(CalibrationKind::Synchronization)
            .then(|| SyncCalibration {
                calibrated: true,
                latency_ms: rng.gen_range(5.0..15.0),
                drift_ms: rng.gen_range(0.0..0.1),
            });

        Self {
            kind,
            cameras,
            gimbal,
            lighting,
            synchronization,
        }
    }
}

fn reference_cameras() -> CameraPair {
    CameraPair {
        // 8K video body
        r5c: CameraCalibration {
            calibrated: true,
            intrinsics: Some(Intrinsics {
                fx: 6000.0,
                fy: 6000.0,
                cx: 3840.0,
                cy: 2160.0,
                k1: -0.1,
                k2: 0.05,
                p1: 0.001,
                p2: -0.001,
            }),
            extrinsics: Some(Extrinsics::default()),
        },
        // Stills body with the 100mm macro
        r5m2: CameraCalibration {
            calibrated: true,
            intrinsics: Some(Intrinsics {
                fx: 8000.0,
                fy: 8000.0,
                cx: 2736.0,
                cy: 1824.0,
                k1: -0.08,
                k2: 0.03,
                p1: 0.0005,
                p2: -0.0005,
            }),
            extrinsics: Some(Extrinsics {
                rotation: [0.1, -0.05, 0.02],
                translation: [0.5, 0.0, 0.3],
            }),
        },
    }
}

/// Accumulated calibration state of the rig.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRecord {
    pub cameras: CameraPair,
    pub gimbal: GimbalCalibration,
    pub lighting: LightingCalibration,
    pub synchronization: SyncCalibration,
    pub last_calibration: Option<DateTime<Utc>>,
}

impl CalibrationRecord {
    /// Fold a report into the record.
    pub fn merge(&mut self, report: &CalibrationReport, at: DateTime<Utc>) {
        if let Some(cameras) = &report.cameras {
            self.cameras = cameras.clone();
        }
        if let Some(gimbal) = &report.gimbal {
            self.gimbal = gimbal.clone();
        }
        if let Some(lighting) = &report.lighting {
            self.lighting = lighting.clone();
        }
        if let Some(sync) = &report.synchronization {
            self.synchronization = sync.clone();
        }
        self.last_calibration = Some(at);
    }

    /// Check the record against `now`.
    pub fn validate(&self, now: DateTime<Utc>, recalibration_days: i64) -> CalibrationValidation {
        let mut recommendations = Vec::new();

        if !self.cameras.r5c.calibrated {
            recommendations.push("Calibrate Canon R5C camera".to_string());
        }
        if !self.cameras.r5m2.calibrated {
            recommendations.push("Calibrate Canon R5 Mk II camera".to_string());
        }
        if !self.gimbal.calibrated {
            recommendations.push("Calibrate DJI Ronin gimbal".to_string());
        }
        if !self.lighting.calibrated {
            recommendations.push("Calibrate lighting color profile".to_string());
        }
        if !self.synchronization.calibrated {
            recommendations.push("Calibrate camera synchronization".to_string());
        }
        if let Some(last) = self.last_calibration {
            if now - last > ChronoDuration::days(recalibration_days) {
                recommendations.push(format!(
                    "Recalibration recommended (system not calibrated in {}+ days)",
                    recalibration_days
                ));
            }
        }

        let overall = if recommendations.is_empty() {
            OverallHealth::Good
        } else {
            OverallHealth::NeedsAttention
        };

        CalibrationValidation {
            overall,
            cameras: CameraStates {
                r5c: SubsystemState::from(self.cameras.r5c.calibrated),
                r5m2: SubsystemState::from(self.cameras.r5m2.calibrated),
            },
            gimbal: SubsystemState::from(self.gimbal.calibrated),
            lighting: SubsystemState::from(self.lighting.calibrated),
            synchronization: SubsystemState::from(self.synchronization.calibrated),
            recommendations,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemState {
    Calibrated,
    NotCalibrated,
}

impl From<bool> for SubsystemState {
    fn from(calibrated: bool) -> Self {
        if calibrated {
            Self::Calibrated
        } else {
            Self::NotCalibrated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Good,
    NeedsAttention,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraStates {
    pub r5c: SubsystemState,
    pub r5m2: SubsystemState,
}

/// Outcome of `CalibrationService::validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationValidation {
    pub overall: OverallHealth,
    pub cameras: CameraStates,
    pub gimbal: SubsystemState,
    pub lighting: SubsystemState,
    pub synchronization: SubsystemState,
    pub recommendations: Vec<String>,
}

/// Build the stage plan for one calibration kind.
pub fn calibration_plan(kind: CalibrationKind, config: &RigConfig) -> StagePlan {
    let stages = kind.stage_table().into_iter().map(|(label, nominal_ms)| {
        Stage::timed(
            label,
            std::time::Duration::from_millis(nominal_ms),
            config.scaled(nominal_ms),
        )
    });

    StagePlan::new(format!("calibration-{}", kind), format!("{} calibration", kind))
        .with_description("Simulated rig calibration")
        .stages(stages)
        .produce_with(move || async move {
            let report = CalibrationReport::measure(kind);
            anyhow::Ok(serde_json::to_value(report)?)
        })
}

/// Owns the calibration process and the rig's calibration record.
#[derive(Debug, Clone)]
pub struct CalibrationService {
    process: StagedProcess,
    record: Arc<RwLock<CalibrationRecord>>,
    config: RigConfig,
}

impl CalibrationService {
    pub fn new(config: RigConfig) -> Self {
        let process = StagedProcess::new(
            CALIBRATION_PROCESS,
            calibration_plan(CalibrationKind::Full, &config),
        );
        Self {
            process,
            record: Arc::new(RwLock::new(CalibrationRecord::default())),
            config,
        }
    }

    pub fn process(&self) -> &StagedProcess {
        &self.process
    }

    pub fn status(&self) -> ProcessSnapshot {
        self.process.status()
    }

    pub fn record(&self) -> CalibrationRecord {
        self.record.read().clone()
    }

    /// Start a calibration in the background, replacing any finished run.
    ///
    /// The report is merged into the record as soon as the run completes,
    /// whether or not the returned handle is awaited.
    pub fn start(&self, kind: CalibrationKind) -> RigResult<CalibrationRun> {
        let handle = self
            .process
            .restart_with(calibration_plan(kind, &self.config))?;
        info!("Starting {} calibration...", kind);

        let process = self.process.clone();
        let record = Arc::clone(&self.record);
        let task = tokio::spawn(async move {
            let snapshot = handle.wait().await?;
            let report = report_from(&snapshot)?;

            {
                // Held across the run id check so a reset cannot slip in between.
                let mut record = record.write();
                if process.status().run_id == snapshot.run_id {
                    let at = snapshot.completed_at.unwrap_or_else(Utc::now);
                    record.merge(&report, at);
                    info!("{} calibration completed successfully", kind);
                } else {
                    debug!("Discarding {} calibration report from a cleared run", kind);
                }
            }
            Ok(report)
        });

        Ok(CalibrationRun { kind, task })
    }

    /// Calibrate and wait for the report.
    pub async fn run(&self, kind: CalibrationKind) -> RigResult<CalibrationReport> {
        self.start(kind)?.wait().await
    }

    pub fn stop(&self) -> bool {
        self.process.stop()
    }

    /// Clear the process and every stored calibration.
    pub fn reset(&self) -> RigResult<()> {
        let mut record = self.record.write();
        self.process.reset()?;
        *record = CalibrationRecord::default();
        info!("Reset all calibration data");
        Ok(())
    }

    pub fn validate(&self) -> CalibrationValidation {
        self.validate_at(Utc::now())
    }

    pub fn validate_at(&self, now: DateTime<Utc>) -> CalibrationValidation {
        self.record
            .read()
            .validate(now, self.config.recalibration_days)
    }
}

/// A calibration running in the background.
#[derive(Debug)]
pub struct CalibrationRun {
    kind: CalibrationKind,
    task: JoinHandle<RigResult<CalibrationReport>>,
}

impl CalibrationRun {
    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }

    pub async fn wait(self) -> RigResult<CalibrationReport> {
        self.task
            .await
            .map_err(|e| RigError::Core(CoreError::TaskFailed(e.to_string())))?
    }
}

fn report_from(snapshot: &ProcessSnapshot) -> RigResult<CalibrationReport> {
    let value = snapshot
        .result
        .clone()
        .ok_or_else(|| RigError::NotReady("calibration finished without a report".to_string()))?;
    Ok(serde_json::from_value(value)?)
}
