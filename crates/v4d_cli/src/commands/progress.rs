//! Progress rendering and Ctrl-C handling shared by every command.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tracing::warn;
use v4d_core::{ProcessSnapshot, StagedProcess};
use v4d_rig::RigResult;

use super::Interrupted;

/// How results and progress are shown.
#[derive(Debug, Clone)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
    pub poll: Duration,
}

impl Output {
    /// Human-readable line on stdout, unless JSON or quiet output was asked for.
    pub fn line(&self, text: impl AsRef<str>) {
        if !self.json && !self.quiet {
            println!("{}", text.as_ref());
        }
    }

    /// JSON document on stdout, when JSON output was asked for.
    pub fn document(&self, value: &Value) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        Ok(())
    }

    fn show_progress(&self) -> bool {
        !self.quiet
    }
}

/// Drive `run` to completion while polling `process` for progress.
///
/// Ctrl-C stops the process and turns the outcome into [`Interrupted`].
pub async fn follow<T, F>(process: &StagedProcess, run: F, output: &Output) -> Result<T>
where
    F: Future<Output = RigResult<T>>,
{
    tokio::pin!(run);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut ticker = tokio::time::interval(output.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut renderer = Renderer::default();
    let mut ctrl_c_armed = true;

    loop {
        tokio::select! {
            outcome = &mut run => {
                let snapshot = process.status();
                if output.show_progress() {
                    renderer.finish(&snapshot);
                }
                return Ok(outcome?);
            }
            signal = &mut ctrl_c, if ctrl_c_armed => {
                if let Err(e) = signal {
                    warn!("Cannot listen for Ctrl-C: {}", e);
                    ctrl_c_armed = false;
                    continue;
                }
                warn!("Ctrl-C received, stopping {}", process.name());
                process.stop();
                // The run now resolves with Cancelled.
                let _ = run.await;
                return Err(Interrupted.into());
            }
            _ = ticker.tick() => {
                if output.show_progress() {
                    renderer.update(&process.status());
                }
            }
        }
    }
}

/// Prints one line per stage as the process moves through its plan.
#[derive(Debug, Default)]
struct Renderer {
    last_stage: Option<usize>,
}

impl Renderer {
    fn update(&mut self, snapshot: &ProcessSnapshot) {
        if let Some(line) = self.next_line(snapshot) {
            eprintln!("{}", line);
        }
    }

    fn finish(&mut self, snapshot: &ProcessSnapshot) {
        self.update(snapshot);
        if snapshot.status.is_terminal() {
            eprintln!("{}", format_line(snapshot.progress, snapshot.status.as_str()));
        }
    }

    fn next_line(&mut self, snapshot: &ProcessSnapshot) -> Option<String> {
        let index = snapshot.current_stage_index?;
        if self.last_stage == Some(index) || !(snapshot.is_running() || snapshot.is_terminal()) {
            return None;
        }
        self.last_stage = Some(index);
        let step = snapshot.current_step.as_deref().unwrap_or_default();
        Some(format!(
            "{} ({}/{})",
            format_line(snapshot.progress, step),
            index + 1,
            snapshot.stage_count
        ))
    }
}

fn format_line(progress: f64, text: &str) -> String {
    format!("[{:>5.1}%] {}", progress, text)
}
