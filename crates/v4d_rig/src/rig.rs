//! The capture rig: every procedure behind one owned handle.

use v4d_core::{ProcessRegistry, ProcessSnapshot};

use crate::calibration::CalibrationService;
use crate::config::RigConfig;
use crate::error::RigResult;
use crate::focus_stack::FocusStackService;
use crate::lighting::LightingController;
use crate::reconstruction::ReconstructionService;

/// All rig procedures, sharing one configuration.
///
/// Each procedure owns its `StagedProcess`; the registry holds clones of the
/// same handles so front ends can look processes up by name.
#[derive(Debug)]
pub struct Rig {
    config: RigConfig,
    calibration: CalibrationService,
    reconstruction: ReconstructionService,
    focus_stack: FocusStackService,
    lighting: LightingController,
    registry: ProcessRegistry,
}

impl Rig {
    pub fn new(config: RigConfig) -> Self {
        let calibration = CalibrationService::new(config.clone());
        let reconstruction = ReconstructionService::new(config.clone());
        let focus_stack = FocusStackService::new(config.clone());
        let lighting = LightingController::new(config.clone());

        let mut registry = ProcessRegistry::new();
        registry.register(calibration.process().clone());
        registry.register(reconstruction.process().clone());
        registry.register(focus_stack.process().clone());
        registry.register(lighting.process().clone());

        Self {
            config,
            calibration,
            reconstruction,
            focus_stack,
            lighting,
            registry,
        }
    }

    /// Build a rig from a TOML config file, or defaults without one.
    pub fn from_config_file(path: Option<&std::path::Path>) -> RigResult<Self> {
        let config = match path {
            Some(path) => RigConfig::load(path)?,
            None => RigConfig::default(),
        };
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn calibration(&self) -> &CalibrationService {
        &self.calibration
    }

    pub fn reconstruction(&self) -> &ReconstructionService {
        &self.reconstruction
    }

    pub fn focus_stack(&self) -> &FocusStackService {
        &self.focus_stack
    }

    pub fn lighting(&self) -> &LightingController {
        &self.lighting
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn snapshots(&self) -> Vec<ProcessSnapshot> {
        self.registry.snapshots()
    }

    /// Stop everything that is running. Returns how many runs were stopped.
    pub fn stop_all(&self) -> usize {
        self.registry.stop_all()
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new(RigConfig::default())
    }
}
