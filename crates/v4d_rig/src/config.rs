//! Rig configuration.
//!
//! Every simulated stage has a nominal duration taken from the rig's
//! procedure tables. `time_scale` stretches or shrinks the actual wait:
//! `1.0` is real time, `0.0` makes every stage instant.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RigError, RigResult};

/// Largest accepted `time_scale`.
pub const MAX_TIME_SCALE: f64 = 1000.0;

/// Configuration shared by all rig procedures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RigConfig {
    /// Multiplier applied to nominal stage durations (0 = instant)
    pub time_scale: f64,
    /// Frames captured by a focus stack when none are requested
    pub focus_stack_frames: u32,
    /// Calibrations older than this are flagged for recalibration
    pub recalibration_days: i64,
    /// Nominal time to prepare an export, in milliseconds
    pub export_delay_ms: u64,
    /// Nominal DMX transmission time per light, in milliseconds
    pub dmx_delay_ms: u64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            focus_stack_frames: 15,
            recalibration_days: 7,
            export_delay_ms: 2000,
            dmx_delay_ms: 50,
        }
    }
}

impl RigConfig {
    /// A configuration where every simulated delay is skipped.
    pub fn instant() -> Self {
        Self::default().time_scale(0.0)
    }

    pub fn time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale;
        self
    }

    pub fn focus_stack_frames(mut self, frames: u32) -> Self {
        self.focus_stack_frames = frames;
        self
    }

    /// Load a configuration file, falling back to defaults for missing keys.
    pub fn load(path: &Path) -> RigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded rig config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> RigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make simulated timing meaningless.
    pub fn validate(&self) -> RigResult<()> {
        if !(0.0..=MAX_TIME_SCALE).contains(&self.time_scale) {
            return Err(RigError::Config(format!(
                "time_scale must be between 0 and {} (got {})",
                MAX_TIME_SCALE, self.time_scale
            )));
        }
        if self.recalibration_days < 0 {
            return Err(RigError::Config(format!(
                "recalibration_days must not be negative (got {})",
                self.recalibration_days
            )));
        }
        Ok(())
    }

    /// Actual wait for a stage with the given nominal duration.
    ///
    /// Saturates at `Duration::MAX` for scales that skipped `validate()`.
    pub fn scaled(&self, nominal_ms: u64) -> Duration {
        if self.time_scale <= 0.0 || self.time_scale.is_nan() {
            return Duration::ZERO;
        }
        let secs = Duration::from_millis(nominal_ms).as_secs_f64() * self.time_scale;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RigConfig::default();
        assert_eq!(config.time_scale, 1.0);
        assert_eq!(config.focus_stack_frames, 15);
        assert_eq!(config.scaled(2000), Duration::from_secs(2));
    }

    #[test]
    fn test_instant_skips_delays() {
        let config = RigConfig::instant();
        assert_eq!(config.scaled(8000), Duration::ZERO);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RigConfig::from_toml("time_scale = 0.5\n").unwrap();
        assert_eq!(config.time_scale, 0.5);
        assert_eq!(config.recalibration_days, 7);
        assert_eq!(config.scaled(3000), Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_negative_scale() {
        let err = RigConfig::from_toml("time_scale = -1.0\n").unwrap_err();
        assert!(matches!(err, RigError::Config(_)));
    }

    #[test]
    fn test_rejects_oversized_scale() {
        let err = RigConfig::from_toml("time_scale = 1e20\n").unwrap_err();
        assert!(matches!(err, RigError::Config(_)));
        assert!(RigConfig::from_toml("time_scale = 1000.0\n").is_ok());
    }

    #[test]
    fn test_unvalidated_huge_scale_saturates() {
        let config = RigConfig::default().time_scale(1e20);
        assert_eq!(config.scaled(2000), Duration::MAX);
        assert_eq!(RigConfig::default().time_scale(f64::INFINITY).scaled(1), Duration::MAX);
        assert_eq!(config.scaled(0), Duration::ZERO);

        let rig = crate::rig::Rig::new(config);
        assert_eq!(rig.calibration().status().stage_count, 20);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = RigConfig::from_toml("turntable_speed = 3\n").unwrap_err();
        assert!(matches!(err, RigError::Toml(_)));
    }
}
