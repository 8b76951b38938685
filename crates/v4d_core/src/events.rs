//! Push-based progress events.
//!
//! Every `StagedProcess` owns a `tokio::sync::broadcast` channel. Observers
//! call `subscribe()` and receive the events below; polling `status()`
//! remains available for front ends that prefer it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::process::StageFailure;

/// Capacity of each process's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Event emitted while a process runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessEvent {
    /// A run began
    Started {
        process: String,
        run_id: Uuid,
        stage_count: usize,
        at: DateTime<Utc>,
    },
    /// A stage became the current step
    StageStarted {
        process: String,
        index: usize,
        label: String,
    },
    /// Progress moved after a stage succeeded
    Progress {
        process: String,
        index: usize,
        progress: f64,
    },
    /// All stages succeeded and the result was stored
    Completed { process: String, run_id: Uuid },
    /// The run ended in error
    Failed {
        process: String,
        failure: StageFailure,
    },
    /// `stop()` interrupted the run
    Stopped { process: String },
    /// `reset()` cleared the process
    Reset { process: String },
}
