//! Integration tests for the staged process runner.
//!
//! Stages complete instantly or wait on a `Notify` gate, so the tests are
//! deterministic and never depend on wall-clock timing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use v4d_core::{
    CoreError, ProcessEvent, ProcessStatus, Stage, StageContext, StagePlan, StagedProcess,
};

fn instant(label: &str, weight: u32) -> Stage {
    Stage::delay(label, weight, Duration::ZERO)
}

/// A stage that blocks until the gate is opened.
fn gated(label: &str, weight: u32, gate: Arc<Notify>) -> Stage {
    Stage::from_fn(label, weight, move |_ctx: StageContext| {
        let gate = Arc::clone(&gate);
        async move {
            gate.notified().await;
            anyhow::Ok(())
        }
    })
}

fn drain(rx: &mut broadcast::Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn stage_labels(events: &[ProcessEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ProcessEvent::StageStarted { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect()
}

fn progress_values(events: &[ProcessEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            ProcessEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

/// Weighted stages A, B, C run in order and finish at 100%.
#[tokio::test]
async fn test_weighted_stages_complete_in_order() {
    let plan = StagePlan::new("abc", "ABC")
        .stage(instant("A", 1))
        .stage(instant("B", 1))
        .stage(instant("C", 2));
    let process = StagedProcess::new("abc", plan);
    let mut rx = process.subscribe();

    let snap = process.run().await.unwrap();

    assert_eq!(snap.status, ProcessStatus::Completed);
    assert_eq!(snap.progress, 100.0);

    let events = drain(&mut rx);
    assert_eq!(stage_labels(&events), vec!["A", "B", "C"]);
    assert_eq!(progress_values(&events), vec![25.0, 50.0, 100.0]);
    assert!(matches!(events.first(), Some(ProcessEvent::Started { .. })));
    assert!(matches!(events.last(), Some(ProcessEvent::Completed { .. })));
}

/// Progress never decreases over a run.
#[tokio::test]
async fn test_progress_is_monotonic() {
    let plan = StagePlan::new("mono", "Mono").stages(
        [3, 0, 7, 1, 5, 0, 2]
            .into_iter()
            .enumerate()
            .map(|(i, w)| instant(&format!("stage-{i}"), w)),
    );
    let process = StagedProcess::new("mono", plan);
    let mut rx = process.subscribe();

    process.run().await.unwrap();

    let values = progress_values(&drain(&mut rx));
    assert_eq!(values.len(), 7);
    assert!(values.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(values.last().copied(), Some(100.0));
}

/// A failing stage ends the run; later stages never start.
#[tokio::test]
async fn test_stage_failure_halts_run() {
    let c_ran = Arc::new(AtomicBool::new(false));
    let c_flag = Arc::clone(&c_ran);

    let plan = StagePlan::new("fail", "Fail")
        .stage(instant("A", 1))
        .stage(Stage::from_fn("B", 1, |_ctx| async {
            Err::<(), _>(anyhow::anyhow!("device offline"))
        }))
        .stage(Stage::from_fn("C", 2, move |_ctx| {
            let flag = Arc::clone(&c_flag);
            async move {
                flag.store(true, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }))
        .produce_with(|| async { anyhow::Ok(serde_json::json!("unreachable")) });
    let process = StagedProcess::new("fail", plan);
    let mut rx = process.subscribe();

    let err = process.run().await.unwrap_err();
    match err {
        CoreError::StageFailed { stage, message } => {
            assert_eq!(stage, "B");
            assert_eq!(message, "device offline");
        }
        other => panic!("unexpected error: {other}"),
    }

    let snap = process.status();
    assert_eq!(snap.status, ProcessStatus::Error);
    assert_eq!(snap.error_message(), Some("device offline"));
    assert_eq!(snap.current_step.as_deref(), Some("B"));
    assert!(snap.result.is_none());
    assert!(!c_ran.load(Ordering::SeqCst));

    let events = drain(&mut rx);
    assert_eq!(stage_labels(&events), vec!["A", "B"]);
    assert!(matches!(events.last(), Some(ProcessEvent::Failed { .. })));
}

/// Starting twice rejects the second call and leaves the first run alone.
#[tokio::test]
async fn test_double_start_rejected() {
    let gate = Arc::new(Notify::new());
    let plan = StagePlan::new("double", "Double")
        .stage(gated("A", 1, Arc::clone(&gate)))
        .stage(instant("B", 1));
    let process = StagedProcess::new("double", plan);

    let handle = process.start().unwrap();
    let before = process.status();
    assert_eq!(before.status, ProcessStatus::Running);

    let err = process.start().unwrap_err();
    assert!(matches!(err, CoreError::AlreadyRunning(ref name) if name == "double"));
    assert_eq!(process.status().run_id, before.run_id);

    gate.notify_one();
    let snap = handle.wait().await.unwrap();
    assert_eq!(snap.status, ProcessStatus::Completed);
    assert_eq!(snap.run_id, before.run_id);
}

/// Reset is refused while running and clears everything afterwards.
#[tokio::test]
async fn test_reset_rules() {
    let gate = Arc::new(Notify::new());
    let plan = StagePlan::new("reset", "Reset")
        .stage(gated("A", 1, Arc::clone(&gate)))
        .produce_with(|| async { anyhow::Ok(serde_json::json!({"latency": 7.5})) });
    let process = StagedProcess::new("reset", plan);

    let handle = process.start().unwrap();
    assert!(matches!(process.reset(), Err(CoreError::InvalidState(_))));
    assert!(process.status().is_running());

    gate.notify_one();
    let snap = handle.wait().await.unwrap();
    assert!(snap.result.is_some());

    process.reset().unwrap();
    let snap = process.status();
    assert_eq!(snap.status, ProcessStatus::Idle);
    assert_eq!(snap.progress, 0.0);
    assert!(snap.result.is_none());
    assert!(snap.current_step.is_none());
    assert!(snap.started_at.is_none());
}

/// Reset works from the error state too.
#[tokio::test]
async fn test_reset_after_failure() {
    let plan = StagePlan::new("err", "Err").stage(Stage::from_fn("A", 1, |_ctx| async {
        Err::<(), _>(anyhow::anyhow!("trigger timeout"))
    }));
    let process = StagedProcess::new("err", plan);

    assert!(process.run().await.is_err());
    assert!(matches!(process.start(), Err(CoreError::InvalidState(_))));

    process.reset().unwrap();
    let snap = process.status();
    assert_eq!(snap.status, ProcessStatus::Idle);
    assert!(snap.error.is_none());
}

/// Stop cancels the in-flight stage and nothing from the run survives.
#[tokio::test]
async fn test_stop_cancels_run() {
    let gate = Arc::new(Notify::new());
    let plan = StagePlan::new("stop", "Stop")
        .stage(instant("A", 1))
        .stage(Stage::from_fn("B", 1, |ctx: StageContext| async move {
            ctx.cancelled().await;
            // Pretend the device answered anyway.
            anyhow::Ok(())
        }))
        .stage(gated("C", 1, Arc::clone(&gate)));
    let process = StagedProcess::new("stop", plan);
    let mut rx = process.subscribe();

    let handle = process.start().unwrap();
    // Let the run reach stage B.
    loop {
        if process.status().current_step.as_deref() == Some("B") {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert!(process.stop());
    let err = handle.wait().await.unwrap_err();
    assert!(err.is_cancelled());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let snap = process.status();
    assert_eq!(snap.status, ProcessStatus::Idle);
    assert_eq!(snap.progress, 0.0);
    assert!(snap.current_step.is_none());
    assert!(snap.result.is_none());

    let events = drain(&mut rx);
    assert_eq!(stage_labels(&events), vec!["A", "B"]);
    assert!(matches!(events.last(), Some(ProcessEvent::Stopped { .. })));
    assert!(!process.stop());
}

/// A stop racing a busy run on another worker is always the last event.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_event_follows_run_events() {
    for _ in 0..20 {
        let plan = (0..40).fold(StagePlan::new("race", "Race"), |plan, i| {
            plan.stage(instant(&format!("S{i}"), 1))
        });
        let process = StagedProcess::new("race", plan);
        let mut rx = process.subscribe();

        let handle = process.start().unwrap();
        tokio::task::yield_now().await;
        let stopped = process.stop();
        let outcome = handle.wait().await;

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(ProcessEvent::Started { .. })));
        if stopped {
            assert!(outcome.unwrap_err().is_cancelled());
            assert!(matches!(events.last(), Some(ProcessEvent::Stopped { .. })));
        } else {
            assert!(outcome.is_ok());
            assert!(matches!(events.last(), Some(ProcessEvent::Completed { .. })));
        }
    }
}

/// A stopped process can start a fresh run.
#[tokio::test]
async fn test_restart_after_stop() {
    let gate = Arc::new(Notify::new());
    let plan = StagePlan::new("restart", "Restart").stage(gated("A", 1, Arc::clone(&gate)));
    let process = StagedProcess::new("restart", plan);

    let first = process.start().unwrap();
    let first_id = first.run_id();
    process.stop();
    assert!(first.wait().await.is_err());

    let second = process.start().unwrap();
    let second_id = second.run_id();
    assert_ne!(second_id, first_id);
    gate.notify_one();
    let snap = second.wait().await.unwrap();
    assert_eq!(snap.status, ProcessStatus::Completed);
    assert_eq!(snap.run_id, Some(second_id));
}

/// An empty plan completes immediately with the producer's result.
#[tokio::test]
async fn test_empty_plan_completes() {
    let plan = StagePlan::new("empty", "Empty")
        .produce_with(|| async { anyhow::Ok(serde_json::json!({"frames": 0})) });
    let process = StagedProcess::new("empty", plan);

    let snap = process.run().await.unwrap();
    assert_eq!(snap.status, ProcessStatus::Completed);
    assert_eq!(snap.progress, 100.0);
    assert_eq!(snap.result, Some(serde_json::json!({"frames": 0})));
}

/// Zero-weight stages report no progress until completion.
#[tokio::test]
async fn test_zero_weight_plan() {
    let plan = StagePlan::new("zero", "Zero")
        .stage(instant("A", 0))
        .stage(instant("B", 0));
    let process = StagedProcess::new("zero", plan);
    let mut rx = process.subscribe();

    let snap = process.run().await.unwrap();
    assert_eq!(snap.progress, 100.0);
    assert_eq!(progress_values(&drain(&mut rx)), vec![0.0, 0.0]);
}

/// `start_with` swaps the plan before running.
#[tokio::test]
async fn test_start_with_replaces_plan() {
    let process = StagedProcess::new("swap", StagePlan::new("first", "First"));
    let plan = StagePlan::new("second", "Second")
        .stage(instant("X", 1))
        .stage(instant("Y", 1));

    let snap = process.run_with(plan).await.unwrap();
    assert_eq!(snap.plan_id, "second");
    assert_eq!(snap.stage_count, 2);
    assert_eq!(process.plan().id, "second");
}
