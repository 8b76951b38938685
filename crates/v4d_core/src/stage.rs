//! Stage definitions and the per-stage execution context.
//!
//! Stages are the building blocks of a staged process. Each stage has a
//! human-readable label, a weight that decides its share of overall
//! progress, and a unit of work that runs asynchronously.
//!
//! # Stage Lifecycle
//!
//! 1. **Planning**: Stages are appended to a `StagePlan` in execution order.
//! 2. **Execution**: The runner sets the stage label as the current step and
//!    calls the work's `run` method with a fresh `StageContext`.
//! 3. **Result**: `Ok(())` advances progress by the stage's weight; an error
//!    halts the run and is captured in the process snapshot.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use v4d_core::{Stage, StageContext};
//!
//! let detect = Stage::delay("Detecting checkerboard pattern...", 2, Duration::from_secs(2));
//! let capture = Stage::from_fn("Capturing calibration images...", 3, |ctx: StageContext| {
//!     async move {
//!         ctx.sleep(Duration::from_secs(3)).await?;
//!         anyhow::Ok(())
//!     }
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};

/// Context handed to a stage's unit of work.
///
/// Carries the stage's position in the plan and the run's cancellation
/// token. Long-running work should poll [`StageContext::is_cancelled`] or
/// use [`StageContext::sleep`] so a stop request is honored promptly.
#[derive(Debug, Clone)]
pub struct StageContext {
    index: usize,
    label: String,
    cancel: CancellationToken,
}

impl StageContext {
    pub fn new(index: usize, label: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            index,
            label: label.into(),
            cancel,
        }
    }

    /// Zero-based position of the stage in its plan.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Check whether the run has been stopped.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the run is stopped.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Return `Err(Cancelled)` if the run has been stopped.
    pub fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, returning early with `Cancelled` on stop.
    pub async fn sleep(&self, duration: Duration) -> CoreResult<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CoreError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Trait for a stage's unit of work.
///
/// Implementations stand in for device I/O or computation. They must be
/// `Send + Sync` because a plan is shared with the task driving the run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageWork: Send + Sync {
    /// Perform the work. An error fails the whole run.
    async fn run(&self, ctx: StageContext) -> anyhow::Result<()>;
}

/// Work that waits for a fixed duration (the simulated device latency).
#[derive(Debug, Clone, Copy)]
pub struct Delay(pub Duration);

#[async_trait]
impl StageWork for Delay {
    async fn run(&self, ctx: StageContext) -> anyhow::Result<()> {
        ctx.sleep(self.0).await?;
        Ok(())
    }
}

/// Adapter turning an async closure into [`StageWork`].
pub struct FnWork<F>(F);

#[async_trait]
impl<F, Fut> StageWork for FnWork<F>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, ctx: StageContext) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// One labelled, weighted unit of work in a plan.
#[derive(Clone)]
pub struct Stage {
    label: String,
    weight: u32,
    work: Arc<dyn StageWork>,
}

impl Stage {
    pub fn new(label: impl Into<String>, weight: u32, work: impl StageWork + 'static) -> Self {
        Self::from_arc(label, weight, Arc::new(work))
    }

    pub fn from_arc(label: impl Into<String>, weight: u32, work: Arc<dyn StageWork>) -> Self {
        Self {
            label: label.into(),
            weight,
            work,
        }
    }

    /// Build a stage from an async closure.
    pub fn from_fn<F, Fut>(label: impl Into<String>, weight: u32, f: F) -> Self
    where
        F: Fn(StageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(label, weight, FnWork(f))
    }

    /// A stage that only waits.
    pub fn delay(label: impl Into<String>, weight: u32, duration: Duration) -> Self {
        Self::new(label, weight, Delay(duration))
    }

    /// A waiting stage weighted by its nominal duration in milliseconds.
    pub fn timed(label: impl Into<String>, nominal: Duration, actual: Duration) -> Self {
        let weight = u32::try_from(nominal.as_millis()).unwrap_or(u32::MAX);
        Self::delay(label, weight, actual)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn work(&self) -> &Arc<dyn StageWork> {
        &self.work
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("label", &self.label)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}
