//! # v4d_rig
//!
//! Vantage4D capture-rig procedures built on `v4d_core`.
//!
//! - **Calibration**: cameras, gimbal, lighting and synchronization
//! - **Reconstruction**: Gaussian splatting with model export
//! - **Focus stacking**: frame-by-frame macro capture
//! - **Lighting**: DMX scenes and automated sequences
//!
//! Device I/O is simulated: every stage waits for its nominal duration
//! scaled by [`RigConfig::time_scale`].

pub mod calibration;
pub mod config;
pub mod error;
pub mod focus_stack;
pub mod lighting;
pub mod reconstruction;
pub mod rig;

pub use calibration::{
    CalibrationKind, CalibrationRecord, CalibrationReport, CalibrationRun, CalibrationService,
    CalibrationValidation, OverallHealth, SubsystemState, CALIBRATION_PROCESS,
};
pub use config::RigConfig;
pub use error::{RigError, RigResult};
pub use focus_stack::{FocusStackReport, FocusStackService, FOCUS_STACK_PROCESS};
pub use lighting::{
    Light, LightUpdate, LightingController, LightingReport, LightingSequence, LightingState,
    Scene, LIGHTING_PROCESS,
};
pub use reconstruction::{
    ExportArtifact, ExportFormat, ExportQuality, ModelStats, ReconstructionReport,
    ReconstructionService, ReconstructionTiming, RECONSTRUCTION_PROCESS,
};
pub use rig::Rig;
