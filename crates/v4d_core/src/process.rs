//! Process status and the snapshot handed out to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a staged process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Not running; ready to start
    #[default]
    Idle,
    /// A run is in flight
    Running,
    /// Every stage succeeded and the result is available
    Completed,
    /// A stage (or the result producer) failed
    Error,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Completed or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Label used in a [`StageFailure`] when the result producer fails.
pub const RESULT_STAGE: &str = "result";

/// The failure that ended a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageFailure {
    /// Label of the failing stage
    pub stage: String,
    /// Position of the failing stage; `None` for the result producer
    pub index: Option<usize>,
    /// Error message from the unit of work
    pub message: String,
}

/// Immutable view of a process at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    /// Name of the owning process
    pub process: String,
    /// Plan the process runs
    pub plan_id: String,
    /// Id of the current or last run
    pub run_id: Option<Uuid>,
    pub status: ProcessStatus,
    /// 0-100
    pub progress: f64,
    /// Label of the active (or last started) stage
    pub current_step: Option<String>,
    pub current_stage_index: Option<usize>,
    pub stage_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present only when completed
    pub result: Option<Value>,
    /// Present only when failed
    pub error: Option<StageFailure>,
}

impl ProcessSnapshot {
    /// A fresh idle snapshot.
    pub fn idle(
        process: impl Into<String>,
        plan_id: impl Into<String>,
        stage_count: usize,
    ) -> Self {
        Self {
            process: process.into(),
            plan_id: plan_id.into(),
            run_id: None,
            status: ProcessStatus::Idle,
            progress: 0.0,
            current_step: None,
            current_stage_index: None,
            stage_count,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Error message of a failed run.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub(crate) fn begin(&mut self, plan_id: &str, stage_count: usize) -> Uuid {
        let process = std::mem::take(&mut self.process);
        let run_id = Uuid::new_v4();
        *self = Self::idle(process, plan_id, stage_count);
        self.run_id = Some(run_id);
        self.status = ProcessStatus::Running;
        self.started_at = Some(Utc::now());
        run_id
    }

    pub(crate) fn enter_stage(&mut self, index: usize, label: &str) {
        self.current_stage_index = Some(index);
        self.current_step = Some(label.to_string());
    }

    /// Raise progress; never lowers it.
    pub(crate) fn advance(&mut self, progress: f64) {
        if progress > self.progress {
            self.progress = progress.min(100.0);
        }
    }

    pub(crate) fn complete(&mut self, result: Value) {
        self.status = ProcessStatus::Completed;
        self.progress = 100.0;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, failure: StageFailure) {
        self.status = ProcessStatus::Error;
        self.result = None;
        self.error = Some(failure);
        self.completed_at = Some(Utc::now());
    }

    /// Back to idle, keeping identity but no run state.
    pub(crate) fn clear(&mut self) {
        let process = std::mem::take(&mut self.process);
        let plan_id = std::mem::take(&mut self.plan_id);
        *self = Self::idle(process, plan_id, self.stage_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_snapshot() {
        let snap = ProcessSnapshot::idle("calibration", "calibration-full", 21);
        assert_eq!(snap.status, ProcessStatus::Idle);
        assert_eq!(snap.progress, 0.0);
        assert!(snap.result.is_none());
        assert!(!snap.is_running());
    }

    #[test]
    fn test_complete_forces_full_progress() {
        let mut snap = ProcessSnapshot::idle("p", "plan", 2);
        snap.begin("plan", 2);
        snap.advance(42.0);
        snap.complete(Value::Bool(true));

        assert_eq!(snap.status, ProcessStatus::Completed);
        assert_eq!(snap.progress, 100.0);
        assert_eq!(snap.result, Some(Value::Bool(true)));
        assert!(snap.completed_at.is_some());
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut snap = ProcessSnapshot::idle("p", "plan", 2);
        snap.advance(50.0);
        snap.advance(25.0);
        assert_eq!(snap.progress, 50.0);
    }

    #[test]
    fn test_clear_keeps_identity() {
        let mut snap = ProcessSnapshot::idle("p", "plan", 3);
        snap.begin("plan", 3);
        snap.enter_stage(1, "B");
        snap.fail(StageFailure {
            stage: "B".to_string(),
            index: Some(1),
            message: "device offline".to_string(),
        });
        snap.clear();

        assert_eq!(snap, ProcessSnapshot::idle("p", "plan", 3));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snap = ProcessSnapshot::idle("p", "plan", 1);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["stageCount"], 1);
        assert!(json["currentStep"].is_null());
    }
}
