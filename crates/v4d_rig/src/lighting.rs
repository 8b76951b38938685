//! DMX lighting: scenes, per-light updates and automated sequences.
//!
//! Scenes and sequences run through the lighting `StagedProcess`, one stage
//! per DMX transmission or sequence step, so they report progress and can
//! be stopped like any other rig procedure.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4d_core::{ProcessSnapshot, RunHandle, Stage, StageContext, StagePlan, StagedProcess};

use crate::config::RigConfig;
use crate::error::{RigError, RigResult};

/// Name the lighting process is registered under.
pub const LIGHTING_PROCESS: &str = "lighting";

/// Intensity, color temperature and color.
pub const DMX_CHANNELS_PER_LIGHT: u16 = 3;

const DAYLIGHT_STEPS: u32 = 10;
const DAYLIGHT_STEP_MS: u64 = 1000;
const COLOR_CYCLE_TEMPERATURES: [u32; 5] = [2700, 3200, 4000, 5600, 6500];
const COLOR_CYCLE_STEP_MS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub id: u8,
    pub name: String,
    /// Percent, 0-100
    pub intensity: f64,
    pub color: String,
    /// Kelvin
    pub temperature: u32,
    pub enabled: bool,
}

impl Light {
    fn new(id: u8, name: &str, intensity: f64, temperature: u32, enabled: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            intensity,
            color: "#FFFFFF".to_string(),
            temperature,
            enabled,
        }
    }

    /// First DMX channel addressed by this light.
    pub fn dmx_channel(&self) -> u16 {
        u16::from(self.id) * DMX_CHANNELS_PER_LIGHT
    }
}

/// The rig's four-light setup.
pub fn default_lights() -> Vec<Light> {
    vec![
        Light::new(1, "Key Light", 75.0, 5600, true),
        Light::new(2, "Fill Light", 50.0, 5600, true),
        Light::new(3, "Back Light", 30.0, 3200, true),
        Light::new(4, "Top Light", 40.0, 5600, false),
    ]
}

/// Partial update for one light. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightUpdate {
    pub intensity: Option<f64>,
    pub color: Option<String>,
    pub temperature: Option<u32>,
    pub enabled: Option<bool>,
}

impl LightUpdate {
    fn apply(&self, light: &mut Light) {
        if let Some(intensity) = self.intensity {
            light.intensity = intensity.clamp(0.0, 100.0);
        }
        if let Some(color) = &self.color {
            light.color = color.clone();
        }
        if let Some(temperature) = self.temperature {
            light.temperature = temperature;
        }
        if let Some(enabled) = self.enabled {
            light.enabled = enabled;
        }
    }
}

/// Predefined lighting scenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    Neutral,
    Macro,
    Dramatic,
    Product,
}

impl Scene {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Macro => "macro",
            Self::Dramatic => "dramatic",
            Self::Product => "product",
        }
    }

    /// `(light id, intensity, temperature)` for every light.
    pub fn preset(&self) -> [(u8, f64, u32); 4] {
        match self {
            Self::Neutral => [(1, 75.0, 5600), (2, 50.0, 5600), (3, 30.0, 3200), (4, 40.0, 5600)],
            Self::Macro => [(1, 90.0, 5600), (2, 70.0, 5600), (3, 20.0, 3200), (4, 60.0, 5600)],
            Self::Dramatic => [(1, 100.0, 3200), (2, 20.0, 5600), (3, 50.0, 3200), (4, 0.0, 5600)],
            Self::Product => [(1, 80.0, 5600), (2, 60.0, 5600), (3, 40.0, 5600), (4, 80.0, 5600)],
        }
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Scene {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neutral" => Ok(Self::Neutral),
            "macro" => Ok(Self::Macro),
            "dramatic" => Ok(Self::Dramatic),
            "product" => Ok(Self::Product),
            other => Err(RigError::Unknown {
                kind: "lighting scene",
                value: other.to_string(),
            }),
        }
    }
}

/// Automated lighting sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingSequence {
    /// Apply the macro scene for capture
    Capture,
    /// Slow brightness swing on every enabled light
    Daylight,
    /// Step through color temperatures
    ColorCycle,
}

impl LightingSequence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capture => "capture",
            Self::Daylight => "daylight",
            Self::ColorCycle => "color_cycle",
        }
    }
}

impl fmt::Display for LightingSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LightingSequence {
    type Err = RigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "capture" => Ok(Self::Capture),
            "daylight" => Ok(Self::Daylight),
            "color_cycle" | "color-cycle" => Ok(Self::ColorCycle),
            other => Err(RigError::Unknown {
                kind: "lighting sequence",
                value: other.to_string(),
            }),
        }
    }
}

/// Brightness of daylight step `step`.
pub fn daylight_brightness(step: u32) -> f64 {
    50.0 + (f64::from(step) * 0.5).sin() * 30.0
}

/// Live state of the lighting system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingState {
    pub connected: bool,
    pub universe: u16,
    pub lights: Vec<Light>,
    pub active_scene: Scene,
}

impl Default for LightingState {
    fn default() -> Self {
        Self {
            connected: false,
            universe: 1,
            lights: default_lights(),
            active_scene: Scene::Neutral,
        }
    }
}

impl LightingState {
    fn light_mut(&mut self, id: u8) -> Option<&mut Light> {
        self.lights.iter_mut().find(|l| l.id == id)
    }
}

/// Payload of a completed scene or sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightingReport {
    pub active_scene: Scene,
    pub lights: Vec<Light>,
}

type SharedState = Arc<RwLock<LightingState>>;

fn send_dmx(light: &Light) {
    debug!(
        "Sending DMX signal to channel {}: intensity={:.1} temperature={} color={}",
        light.dmx_channel(),
        light.intensity,
        light.temperature,
        light.color
    );
}

fn report_producer(plan: StagePlan, state: SharedState) -> StagePlan {
    plan.produce_with(move || {
        let state = Arc::clone(&state);
        async move {
            let state = state.read();
            let report = LightingReport {
                active_scene: state.active_scene,
                lights: state.lights.clone(),
            };
            anyhow::Ok(serde_json::to_value(report)?)
        }
    })
}

/// One stage per light in the scene: set its levels, then transmit.
fn scene_plan(scene: Scene, state: &SharedState, config: &RigConfig) -> StagePlan {
    let names: Vec<(u8, String)> = state
        .read()
        .lights
        .iter()
        .map(|l| (l.id, l.name.clone()))
        .collect();

    let stages = scene.preset().into_iter().filter_map(|(id, intensity, temperature)| {
        let (_, name) = names.iter().find(|(light_id, _)| *light_id == id)?;
        let state = Arc::clone(state);
        let delay = config.scaled(config.dmx_delay_ms);
        Some(Stage::from_fn(
            format!("Sending DMX to {}", name),
            weight_of(config.dmx_delay_ms),
            move |ctx: StageContext| {
                let state = Arc::clone(&state);
                async move {
                    {
                        let mut state = state.write();
                        // Checked under the lock so a disconnect is never overwritten.
                        ctx.check()?;
                        state.active_scene = scene;
                        if let Some(light) = state.light_mut(id) {
                            light.intensity = intensity;
                            light.temperature = temperature;
                            light.enabled = intensity > 0.0;
                            send_dmx(light);
                        }
                    }
                    ctx.sleep(delay).await?;
                    anyhow::Ok(())
                }
            },
        ))
    });

    let plan = StagePlan::new(format!("scene-{}", scene), format!("{} scene", scene))
        .with_description("Apply a lighting scene over DMX")
        .stages(stages);
    report_producer(plan, Arc::clone(state))
}

/// A sequence step: update every enabled light, then hold.
fn step_stage<F>(
    label: String,
    hold_ms: u64,
    config: &RigConfig,
    state: &SharedState,
    apply: F,
) -> Stage
where
    F: Fn(&mut Light) + Send + Sync + Copy + 'static,
{
    let state = Arc::clone(state);
    let hold = config.scaled(hold_ms);
    Stage::from_fn(label, weight_of(hold_ms), move |ctx: StageContext| {
        let state = Arc::clone(&state);
        async move {
            {
                let mut state = state.write();
                ctx.check()?;
                state
                    .lights
                    .iter_mut()
                    .filter(|l| l.enabled)
                    .for_each(apply);
            }
            ctx.sleep(hold).await?;
            anyhow::Ok(())
        }
    })
}

fn sequence_plan(sequence: LightingSequence, state: &SharedState, config: &RigConfig) -> StagePlan {
    let stages: Vec<Stage> = match sequence {
        LightingSequence::Capture => return scene_plan(Scene::Macro, state, config),
        LightingSequence::Daylight => (0..DAYLIGHT_STEPS)
            .map(|step| {
                let brightness = daylight_brightness(step);
                step_stage(
                    format!("Daylight step {}/{} ({:.0}%)", step + 1, DAYLIGHT_STEPS, brightness),
                    DAYLIGHT_STEP_MS,
                    config,
                    state,
                    move |light| light.intensity = brightness,
                )
            })
            .collect(),
        LightingSequence::ColorCycle => COLOR_CYCLE_TEMPERATURES
            .into_iter()
            .map(|temperature| {
                step_stage(
                    format!("Color temperature {}K", temperature),
                    COLOR_CYCLE_STEP_MS,
                    config,
                    state,
                    move |light| light.temperature = temperature,
                )
            })
            .collect(),
    };

    let plan = StagePlan::new(
        format!("sequence-{}", sequence),
        format!("{} sequence", sequence),
    )
    .with_description("Automated lighting sequence")
    .stages(stages);
    report_producer(plan, Arc::clone(state))
}

fn weight_of(nominal_ms: u64) -> u32 {
    u32::try_from(nominal_ms).unwrap_or(u32::MAX)
}

/// Owns the lighting process and the live light state.
#[derive(Debug, Clone)]
pub struct LightingController {
    process: StagedProcess,
    state: SharedState,
    config: RigConfig,
}

impl LightingController {
    pub fn new(config: RigConfig) -> Self {
        let state: SharedState = Arc::new(RwLock::new(LightingState::default()));
        let process = StagedProcess::new(
            LIGHTING_PROCESS,
            sequence_plan(LightingSequence::Capture, &state, &config),
        );
        Self {
            process,
            state,
            config,
        }
    }

    pub fn process(&self) -> &StagedProcess {
        &self.process
    }

    pub fn status(&self) -> ProcessSnapshot {
        self.process.status()
    }

    pub fn state(&self) -> LightingState {
        self.state.read().clone()
    }

    pub fn connect(&self) {
        self.state.write().connected = true;
        info!("Connected to DMX lighting system (universe {})", self.state.read().universe);
    }

    /// Stop any running sequence and switch every light off.
    pub fn disconnect(&self) {
        self.process.stop();
        let mut state = self.state.write();
        state.connected = false;
        for light in &mut state.lights {
            light.intensity = 0.0;
            light.enabled = false;
        }
        info!("Disconnected DMX lighting system");
    }

    fn ensure_connected(&self) -> RigResult<()> {
        if self.state.read().connected {
            Ok(())
        } else {
            Err(RigError::NotReady(
                "lighting system is not connected".to_string(),
            ))
        }
    }

    /// Start applying a scene in the background.
    pub fn start_scene(&self, scene: Scene) -> RigResult<RunHandle> {
        self.ensure_connected()?;
        info!("Applying lighting scene: {}", scene);
        Ok(self
            .process
            .restart_with(scene_plan(scene, &self.state, &self.config))?)
    }

    pub async fn apply_scene(&self, scene: Scene) -> RigResult<LightingReport> {
        report_from(self.start_scene(scene)?.wait().await?)
    }

    /// Start a sequence in the background.
    pub fn start_sequence(&self, sequence: LightingSequence) -> RigResult<RunHandle> {
        self.ensure_connected()?;
        info!("Starting lighting sequence: {}", sequence);
        Ok(self
            .process
            .restart_with(sequence_plan(sequence, &self.state, &self.config))?)
    }

    pub async fn run_sequence(&self, sequence: LightingSequence) -> RigResult<LightingReport> {
        report_from(self.start_sequence(sequence)?.wait().await?)
    }

    /// Update one light and transmit its new levels.
    pub async fn update_light(&self, id: u8, update: LightUpdate) -> RigResult<Light> {
        self.ensure_connected()?;
        let light = {
            let mut state = self.state.write();
            let light = state.light_mut(id).ok_or_else(|| RigError::Unknown {
                kind: "light",
                value: id.to_string(),
            })?;
            update.apply(light);
            send_dmx(light);
            light.clone()
        };
        info!("Updated {}", light.name);
        tokio::time::sleep(self.dmx_delay()).await;
        Ok(light)
    }

    /// Enable or disable every light. Disabled lights drop to zero intensity.
    pub fn toggle_all(&self, enabled: bool) -> RigResult<()> {
        self.ensure_connected()?;
        for light in &mut self.state.write().lights {
            light.enabled = enabled;
            if !enabled {
                light.intensity = 0.0;
            }
        }
        info!("{} all lights", if enabled { "Enabled" } else { "Disabled" });
        Ok(())
    }

    pub fn stop(&self) -> bool {
        self.process.stop()
    }

    fn dmx_delay(&self) -> Duration {
        self.config.scaled(self.config.dmx_delay_ms)
    }
}

fn report_from(snapshot: ProcessSnapshot) -> RigResult<LightingReport> {
    let value = snapshot
        .result
        .ok_or_else(|| RigError::NotReady("lighting run finished without a report".to_string()))?;
    Ok(serde_json::from_value(value)?)
}
