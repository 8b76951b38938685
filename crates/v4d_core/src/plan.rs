//! Stage plans: ordered stages plus the producer of the final result.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::stage::Stage;

/// Produces the payload attached to a completed process.
///
/// Invoked once, after every stage has succeeded. An error fails the run
/// just like a failing stage.
#[async_trait]
pub trait ResultProducer: Send + Sync {
    async fn produce(&self) -> anyhow::Result<Value>;
}

/// Producer used when a plan does not set one; yields `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProducer;

#[async_trait]
impl ResultProducer for NullProducer {
    async fn produce(&self) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

/// Adapter turning an async closure into a [`ResultProducer`].
pub struct FnProducer<F>(F);

#[async_trait]
impl<F, Fut> ResultProducer for FnProducer<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn produce(&self) -> anyhow::Result<Value> {
        (self.0)().await
    }
}

/// An ordered list of stages to execute.
#[derive(Clone)]
pub struct StagePlan {
    /// Unique plan identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Description
    pub description: Option<String>,
    stages: Vec<Stage>,
    producer: Arc<dyn ResultProducer>,
}

impl StagePlan {
    /// Create an empty plan.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            stages: Vec::new(),
            producer: Arc::new(NullProducer),
        }
    }

    /// Add a description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Append a stage.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append multiple stages.
    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    /// Set the result producer.
    pub fn producer(mut self, producer: impl ResultProducer + 'static) -> Self {
        self.producer = Arc::new(producer);
        self
    }

    /// Set the result producer from an async closure.
    pub fn produce_with<F, Fut>(self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.producer(FnProducer(f))
    }

    pub fn stage_list(&self) -> &[Stage] {
        &self.stages
    }

    pub fn result_producer(&self) -> &Arc<dyn ResultProducer> {
        &self.producer
    }

    /// Sum of all stage weights.
    pub fn total_weight(&self) -> u64 {
        self.stages.iter().map(|s| u64::from(s.weight())).sum()
    }

    /// Stage labels in execution order.
    pub fn labels(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::label).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagePlan")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

/// Percentage of `total` covered by `done`, clamped to 0..=100.
///
/// A zero total reports 0; completion is what forces 100.
pub(crate) fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = done as f64 / total as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_plan_builder() {
        let plan = StagePlan::new("calibration-gimbal", "Gimbal Calibration")
            .with_description("Home and sweep every axis")
            .stage(Stage::delay("Finding home position...", 3, Duration::ZERO))
            .stage(Stage::delay("Testing pan axis...", 2, Duration::ZERO));

        assert_eq!(plan.id, "calibration-gimbal");
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.total_weight(), 5);
        assert_eq!(
            plan.labels(),
            vec!["Finding home position...", "Testing pan axis..."]
        );
    }

    #[tokio::test]
    async fn test_default_producer_yields_null() {
        let plan = StagePlan::new("empty", "Empty");
        assert!(plan.is_empty());
        let value = plan.result_producer().produce().await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_closure_producer() {
        let plan = StagePlan::new("p", "P")
            .produce_with(|| async { anyhow::Ok(serde_json::json!({"splats": 3})) });
        let value = plan.result_producer().produce().await.unwrap();
        assert_eq!(value["splats"], 3);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 4), 0.0);
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(4, 4), 100.0);
        assert_eq!(percent(0, 0), 0.0);
    }
}
