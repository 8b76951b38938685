//! Staged process runner with cooperative cancellation.
//!
//! A [`StagedProcess`] owns one plan and the state of its current run. Runs
//! execute on a spawned tokio task; the handle can be cloned and shared with
//! every caller that needs to start, stop, reset, or observe the process.
//!
//! Each run gets its own `CancellationToken` and generation number. The run
//! task only mutates state after confirming, under the state lock, that its
//! token is still live and its generation is still current. `stop()` cancels
//! the token and bumps the generation under the same lock, so a stopped run
//! never writes again once `stop()` has returned.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::events::{ProcessEvent, EVENT_CHANNEL_CAPACITY};
use crate::plan::{percent, StagePlan};
use crate::process::{ProcessSnapshot, ProcessStatus, StageFailure, RESULT_STAGE};
use crate::stage::StageContext;

struct RunState {
    plan: StagePlan,
    snapshot: ProcessSnapshot,
    generation: u64,
    cancel: Option<CancellationToken>,
}

struct Inner {
    name: String,
    state: RwLock<RunState>,
    events: broadcast::Sender<ProcessEvent>,
}

/// Handle to a long-running staged operation.
#[derive(Clone)]
pub struct StagedProcess {
    inner: Arc<Inner>,
}

impl StagedProcess {
    /// Create an idle process that runs `plan` when started.
    pub fn new(name: impl Into<String>, plan: StagePlan) -> Self {
        let name = name.into();
        let snapshot = ProcessSnapshot::idle(name.as_str(), plan.id.as_str(), plan.len());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                name,
                state: RwLock::new(RunState {
                    plan,
                    snapshot,
                    generation: 0,
                    cancel: None,
                }),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The plan the next `start()` will run.
    pub fn plan(&self) -> StagePlan {
        self.inner.state.read().plan.clone()
    }

    /// Replace the plan. Only allowed while idle.
    pub fn set_plan(&self, plan: StagePlan) -> CoreResult<()> {
        let mut state = self.inner.state.write();
        if state.snapshot.status != ProcessStatus::Idle {
            return Err(CoreError::InvalidState(format!(
                "cannot replace the plan of '{}' while {}",
                self.inner.name, state.snapshot.status
            )));
        }
        state.snapshot =
            ProcessSnapshot::idle(self.inner.name.as_str(), plan.id.as_str(), plan.len());
        state.plan = plan;
        Ok(())
    }

    /// Snapshot of the current state.
    pub fn status(&self) -> ProcessSnapshot {
        self.inner.state.read().snapshot.clone()
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.events.subscribe()
    }

    /// Start the configured plan on a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> CoreResult<RunHandle> {
        self.launch(None, false)
    }

    /// Replace the plan and start it.
    pub fn start_with(&self, plan: StagePlan) -> CoreResult<RunHandle> {
        self.launch(Some(plan), false)
    }

    /// Like `start_with`, but a completed or failed run is discarded instead
    /// of rejected. Still fails with `AlreadyRunning` while a run is in flight.
    pub fn restart_with(&self, plan: StagePlan) -> CoreResult<RunHandle> {
        self.launch(Some(plan), true)
    }

    /// Start the configured plan and wait for the run to end.
    pub async fn run(&self) -> CoreResult<ProcessSnapshot> {
        self.start()?.wait().await
    }

    /// Replace the plan, start it, and wait for the run to end.
    pub async fn run_with(&self, plan: StagePlan) -> CoreResult<ProcessSnapshot> {
        self.start_with(plan)?.wait().await
    }

    /// Stop the in-flight run, if any.
    ///
    /// Returns `true` if a run was stopped. The process goes back to idle
    /// with zero progress; nothing from the stopped run is kept.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.inner.state.write();
            if !state.snapshot.is_running() {
                debug!("Stop requested for '{}' but it is not running", self.inner.name);
                return false;
            }
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.generation += 1;
            state.snapshot.clear();
            self.emit(ProcessEvent::Stopped {
                process: self.inner.name.clone(),
            });
        }

        info!("Stopped process '{}'", self.inner.name);
        true
    }

    /// Clear all run state. Fails while a run is in flight.
    pub fn reset(&self) -> CoreResult<()> {
        {
            let mut state = self.inner.state.write();
            if state.snapshot.is_running() {
                return Err(CoreError::InvalidState(format!(
                    "cannot reset '{}' while it is running",
                    self.inner.name
                )));
            }
            state.generation += 1;
            state.cancel = None;
            state.snapshot.clear();
            self.emit(ProcessEvent::Reset {
                process: self.inner.name.clone(),
            });
        }

        debug!("Reset process '{}'", self.inner.name);
        Ok(())
    }

    fn launch(&self, plan: Option<StagePlan>, discard_finished: bool) -> CoreResult<RunHandle> {
        let (plan, token, generation, run_id) = {
            let mut state = self.inner.state.write();
            match state.snapshot.status {
                ProcessStatus::Running => {
                    warn!("Process '{}' is already running", self.inner.name);
                    return Err(CoreError::AlreadyRunning(self.inner.name.clone()));
                }
                ProcessStatus::Completed | ProcessStatus::Error if discard_finished => {
                    debug!("Discarding finished run of '{}'", self.inner.name);
                }
                status @ (ProcessStatus::Completed | ProcessStatus::Error) => {
                    return Err(CoreError::InvalidState(format!(
                        "process '{}' is {}; reset it before starting again",
                        self.inner.name, status
                    )));
                }
                ProcessStatus::Idle => {}
            }

            if let Some(plan) = plan {
                state.plan = plan;
            }
            let plan = state.plan.clone();
            let token = CancellationToken::new();
            state.generation += 1;
            state.cancel = Some(token.clone());
            let run_id = state.snapshot.begin(&plan.id, plan.len());
            self.emit(ProcessEvent::Started {
                process: self.inner.name.clone(),
                run_id,
                stage_count: plan.len(),
                at: chrono::Utc::now(),
            });
            (plan, token, state.generation, run_id)
        };

        info!(
            "Starting process: {} ({}, {} stages)",
            self.inner.name,
            plan.id,
            plan.len()
        );

        let process = self.clone();
        let span = info_span!("staged_process", process = %self.inner.name, %run_id);
        let handle = tokio::spawn(
            async move { process.drive(plan, token, generation).await }.instrument(span),
        );

        Ok(RunHandle { run_id, handle })
    }

    async fn drive(
        &self,
        plan: StagePlan,
        token: CancellationToken,
        generation: u64,
    ) -> CoreResult<ProcessSnapshot> {
        let total = plan.total_weight();
        let count = plan.len();
        let mut done: u64 = 0;

        for (index, stage) in plan.stage_list().iter().enumerate() {
            let label = stage.label();
            self.mutate(generation, &token, |snap| {
                snap.enter_stage(index, label);
                ProcessEvent::StageStarted {
                    process: self.inner.name.clone(),
                    index,
                    label: label.to_string(),
                }
            })?;
            info!("Executing stage [{}/{}]: {}", index + 1, count, label);

            let ctx = StageContext::new(index, label, token.clone());
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => return Err(CoreError::Cancelled),
                outcome = AssertUnwindSafe(stage.work().run(ctx)).catch_unwind() => outcome,
            };

            if let Err(message) = flatten(outcome) {
                return Err(self.fail(
                    generation,
                    &token,
                    StageFailure {
                        stage: label.to_string(),
                        index: Some(index),
                        message,
                    },
                ));
            }

            done += u64::from(stage.weight());
            let progress = percent(done, total);
            self.mutate(generation, &token, |snap| {
                snap.advance(progress);
                ProcessEvent::Progress {
                    process: self.inner.name.clone(),
                    index,
                    progress,
                }
            })?;
            debug!("Stage '{}' completed ({:.1}%)", label, progress);
        }

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => return Err(CoreError::Cancelled),
            outcome = AssertUnwindSafe(plan.result_producer().produce()).catch_unwind() => outcome,
        };
        let result: Value = match flatten(outcome) {
            Ok(value) => value,
            Err(message) => {
                return Err(self.fail(
                    generation,
                    &token,
                    StageFailure {
                        stage: RESULT_STAGE.to_string(),
                        index: None,
                        message,
                    },
                ));
            }
        };

        let snapshot = self.finish(generation, &token, |snap| {
            snap.complete(result);
            ProcessEvent::Completed {
                process: self.inner.name.clone(),
                run_id: snap.run_id.unwrap_or_default(),
            }
        })?;
        info!("Process '{}' completed successfully", self.inner.name);
        Ok(snapshot)
    }

    /// Record a failure and turn it into the run's error.
    fn fail(&self, generation: u64, token: &CancellationToken, failure: StageFailure) -> CoreError {
        let committed = self.finish(generation, token, |snap| {
            snap.fail(failure.clone());
            ProcessEvent::Failed {
                process: self.inner.name.clone(),
                failure: failure.clone(),
            }
        });
        if let Err(err) = committed {
            return err;
        }

        error!("Stage '{}' failed: {}", failure.stage, failure.message);
        CoreError::StageFailed {
            stage: failure.stage,
            message: failure.message,
        }
    }

    /// Apply `f` if the run identified by `generation` is still current.
    fn mutate<F>(
        &self,
        generation: u64,
        token: &CancellationToken,
        f: F,
    ) -> CoreResult<ProcessSnapshot>
    where
        F: FnOnce(&mut ProcessSnapshot) -> ProcessEvent,
    {
        self.commit(generation, token, false, f)
    }

    /// Like `mutate`, but also ends the run.
    fn finish<F>(
        &self,
        generation: u64,
        token: &CancellationToken,
        f: F,
    ) -> CoreResult<ProcessSnapshot>
    where
        F: FnOnce(&mut ProcessSnapshot) -> ProcessEvent,
    {
        self.commit(generation, token, true, f)
    }

    /// The event returned by `f` is sent before the lock is released, so
    /// subscribers see events in the same order as the state changes.
    fn commit<F>(
        &self,
        generation: u64,
        token: &CancellationToken,
        ends_run: bool,
        f: F,
    ) -> CoreResult<ProcessSnapshot>
    where
        F: FnOnce(&mut ProcessSnapshot) -> ProcessEvent,
    {
        let mut state = self.inner.state.write();
        if state.generation != generation || token.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let event = f(&mut state.snapshot);
        if ends_run {
            state.cancel = None;
        }
        self.emit(event);
        Ok(state.snapshot.clone())
    }

    /// Call with the state lock held. Never blocks.
    fn emit(&self, event: ProcessEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

impl fmt::Debug for StagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("StagedProcess")
            .field("name", &self.inner.name)
            .field("plan", &state.plan.id)
            .field("status", &state.snapshot.status)
            .field("progress", &state.snapshot.progress)
            .finish()
    }
}

/// Handle to one run, returned by `start()`.
///
/// Dropping the handle detaches the run; it keeps going in the background.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    handle: JoinHandle<CoreResult<ProcessSnapshot>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    ///
    /// Returns the final snapshot on completion, `StageFailed` when a stage
    /// failed, and `Cancelled` when the run was stopped.
    pub async fn wait(self) -> CoreResult<ProcessSnapshot> {
        self.handle
            .await
            .map_err(|e| CoreError::TaskFailed(e.to_string()))?
    }
}

fn flatten<T>(outcome: Result<anyhow::Result<T>, Box<dyn Any + Send>>) -> Result<T, String> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("stage panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("stage panicked: {msg}")
    } else {
        "stage panicked".to_string()
    }
}
