//! Focus stacking on the R5 Mk II macro body.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use v4d_core::{ProcessSnapshot, RunHandle, Stage, StagePlan, StagedProcess};

use crate::config::RigConfig;
use crate::error::{RigError, RigResult};

/// Name the focus-stack process is registered under.
pub const FOCUS_STACK_PROCESS: &str = "focus-stack";

/// Camera that captures the stack.
pub const FOCUS_STACK_CAMERA: &str = "r5m2";

const FRAME_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusStackReport {
    pub camera: String,
    pub frames_captured: u32,
}

/// Rail positioning, then one stage per frame.
pub fn focus_stack_plan(frames: u32, config: &RigConfig) -> StagePlan {
    let nominal = Duration::from_millis(FRAME_INTERVAL_MS);
    let actual = config.scaled(FRAME_INTERVAL_MS);

    let frame_stages = (1..=frames)
        .map(move |i| Stage::timed(format!("Capturing frame {}/{}", i, frames), nominal, actual));

    StagePlan::new("focus-stack", "Focus stacking")
        .with_description(format!("{}-frame focus stack", frames))
        .stage(Stage::timed("Positioning focus rail...", nominal, actual))
        .stages(frame_stages)
        .produce_with(move || async move {
            let report = FocusStackReport {
                camera: FOCUS_STACK_CAMERA.to_string(),
                frames_captured: frames,
            };
            anyhow::Ok(serde_json::to_value(report)?)
        })
}

#[derive(Debug, Clone)]
pub struct FocusStackService {
    process: StagedProcess,
    config: RigConfig,
}

impl FocusStackService {
    pub fn new(config: RigConfig) -> Self {
        Self {
            process: StagedProcess::new(
                FOCUS_STACK_PROCESS,
                focus_stack_plan(config.focus_stack_frames, &config),
            ),
            config,
        }
    }

    pub fn process(&self) -> &StagedProcess {
        &self.process
    }

    pub fn status(&self) -> ProcessSnapshot {
        self.process.status()
    }

    /// Start a stack of `frames` frames (the configured default when `None`).
    pub fn start(&self, frames: Option<u32>) -> RigResult<RunHandle> {
        let frames = frames.unwrap_or(self.config.focus_stack_frames);
        info!("Starting focus stacking sequence ({} frames)...", frames);
        Ok(self
            .process
            .restart_with(focus_stack_plan(frames, &self.config))?)
    }

    pub async fn run(&self, frames: Option<u32>) -> RigResult<FocusStackReport> {
        let snapshot = self.start(frames)?.wait().await?;
        let value = snapshot.result.ok_or_else(|| {
            RigError::NotReady("focus stack finished without a report".to_string())
        })?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn stop(&self) -> bool {
        self.process.stop()
    }

    pub fn reset(&self) -> RigResult<()> {
        Ok(self.process.reset()?)
    }
}
