//! # v4d_core
//!
//! Staged process runner for Vantage4D.
//!
//! Calibration, reconstruction, focus stacking and lighting sequences all
//! share one shape: an ordered list of labelled stages, each contributing a
//! weighted share of progress, followed by a result producer. This crate
//! runs that shape with explicit ownership, cooperative cancellation and
//! observable progress.
//!
//! # Architecture
//!
//! - **Stages**: Labelled, weighted units of asynchronous work
//! - **Plans**: Ordered stages plus the producer of the final result
//! - **Process**: Owns a plan and the state of its current run
//! - **Registry**: Maps process names to process handles
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use v4d_core::{Stage, StagePlan, StagedProcess};
//!
//! let plan = StagePlan::new("reconstruction", "3D Reconstruction")
//!     .stage(Stage::delay("Loading frames...", 2, Duration::from_secs(2)))
//!     .stage(Stage::delay("Feature extraction...", 3, Duration::from_secs(3)))
//!     .produce_with(|| async { anyhow::Ok(serde_json::json!({ "splats": 2_000_000 })) });
//!
//! let process = StagedProcess::new("reconstruction", plan);
//! let handle = process.start()?;
//! // poll process.status() or process.subscribe() while it runs
//! let snapshot = handle.wait().await?;
//! ```

pub mod error;
pub mod events;
pub mod plan;
pub mod process;
pub mod registry;
pub mod runner;
pub mod stage;

// Re-export main types for convenience
pub use error::{CoreError, CoreResult};
pub use events::{ProcessEvent, EVENT_CHANNEL_CAPACITY};
pub use plan::{FnProducer, NullProducer, ResultProducer, StagePlan};
pub use process::{ProcessSnapshot, ProcessStatus, StageFailure, RESULT_STAGE};
pub use registry::ProcessRegistry;
pub use runner::{RunHandle, StagedProcess};
pub use stage::{Delay, FnWork, Stage, StageContext, StageWork};
pub use tokio_util::sync::CancellationToken;
