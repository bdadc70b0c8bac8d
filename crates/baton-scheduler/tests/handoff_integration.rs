#![allow(clippy::unwrap_used, clippy::panic)] // Integration tests use unwrap for brevity

//! Integration tests for handoff queuing and the two-tier drain policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use baton_core::SchedulerConfig;
use baton_scheduler::orchestration::{
    ActivationContext, HandoffInstruction, HandoffRequest, Notification, Orchestrator, Priority,
    Worker, WorkerError, WorkerRegistry, WorkerResult,
};
use baton_scheduler::sim::{ActivationLog, Outcome, SimulatedWorker};

async fn orchestrator(workers: Vec<SimulatedWorker>) -> Orchestrator {
    let registry = WorkerRegistry::new(16);
    for worker in workers {
        registry.register(Arc::new(worker)).await;
    }
    Orchestrator::new(SchedulerConfig::default(), Arc::new(registry))
}

fn worker(id: &str, delay_ms: u64, log: &Arc<ActivationLog>) -> SimulatedWorker {
    SimulatedWorker::new(id, Duration::from_millis(delay_ms)).with_log(Arc::clone(log))
}

fn handoff(to: &str, priority: Priority) -> HandoffRequest {
    HandoffRequest::new("dispatcher", to, priority, ActivationContext::default())
}

/// Let every pending activation run to completion.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

// =========================================================================
// Priority ordering
// =========================================================================

#[tokio::test(start_paused = true)]
async fn handoffs_are_served_by_priority_then_fifo() {
    let log = ActivationLog::new();
    let orch = orchestrator(vec![
        worker("low", 5, &log),
        worker("urgent-1", 5, &log),
        worker("medium", 5, &log),
        worker("urgent-2", 5, &log),
    ])
    .await;

    orch.emit_handoff(handoff("low", Priority::Low)).await.unwrap();
    orch.emit_handoff(handoff("urgent-1", Priority::Urgent))
        .await
        .unwrap();
    orch.emit_handoff(handoff("medium", Priority::Medium))
        .await
        .unwrap();
    orch.emit_handoff(handoff("urgent-2", Priority::Urgent))
        .await
        .unwrap();
    settle().await;

    assert_eq!(log.order(), vec!["urgent-1", "urgent-2", "medium", "low"]);
    assert_eq!(orch.pending_handoffs().await, 0);
    assert_eq!(orch.metrics().await.total_count, 4);
}

#[tokio::test(start_paused = true)]
async fn high_priority_jumps_a_backlog_of_low_handoffs() {
    let log = ActivationLog::new();
    let orch = orchestrator(vec![worker("bulk", 5, &log), worker("hotfix", 5, &log)]).await;

    for _ in 0..5 {
        orch.emit_handoff(handoff("bulk", Priority::Low)).await.unwrap();
    }
    orch.emit_handoff(handoff("hotfix", Priority::High))
        .await
        .unwrap();
    settle().await;

    let order = log.order();
    assert_eq!(order.first().map(String::as_str), Some("hotfix"));
    assert_eq!(log.count("bulk"), 5);
}

// =========================================================================
// Handoffs from worker results
// =========================================================================

#[tokio::test(start_paused = true)]
async fn low_priority_handoff_waits_for_chain_continuation() {
    let log = ActivationLog::new();
    let orch = orchestrator(vec![
        worker("a", 10, &log).with_handoff(HandoffInstruction::new("c", Priority::Low).unwrap()),
        worker("b", 10, &log),
        worker("c", 10, &log),
    ])
    .await;

    orch.start_chain(["a", "b"], ActivationContext::default())
        .await
        .unwrap();
    settle().await;

    assert_eq!(log.order(), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn urgent_handoff_runs_ahead_of_chain_continuation() {
    let log = ActivationLog::new();
    let orch = orchestrator(vec![
        worker("a", 10, &log)
            .with_handoff(HandoffInstruction::new("c", Priority::Urgent).unwrap()),
        worker("b", 10, &log),
        worker("c", 10, &log),
    ])
    .await;

    orch.start_chain(["a", "b"], ActivationContext::default())
        .await
        .unwrap();
    settle().await;

    assert_eq!(log.order(), vec!["a", "c", "b"]);
}

#[tokio::test(start_paused = true)]
async fn handoff_forwards_context_and_has_no_chain() {
    let orch = orchestrator(vec![
        SimulatedWorker::new("a", Duration::from_millis(10))
            .with_handoff(HandoffInstruction::new("c", Priority::High).unwrap()),
        SimulatedWorker::new("c", Duration::from_millis(10)),
    ])
    .await;
    let mut rx = orch.subscribe();

    let ctx = ActivationContext::new(serde_json::json!({"pr": 481}));
    orch.start_chain(["a"], ctx).await.unwrap();

    let result = loop {
        match rx.recv().await.unwrap() {
            Notification::WorkerCompleted {
                worker_id,
                chain_id,
                result,
                ..
            } if worker_id == "c" => {
                assert!(chain_id.is_none());
                break result;
            }
            _ => {}
        }
    };
    assert_eq!(result.output["context"]["pr"], 481);
}

#[tokio::test(start_paused = true)]
async fn failed_worker_requests_no_handoffs() {
    let log = ActivationLog::new();
    let orch = orchestrator(vec![
        worker("a", 10, &log)
            .with_outcome(Outcome::FailStatus)
            .with_handoff(HandoffInstruction::new("c", Priority::Urgent).unwrap()),
        worker("c", 10, &log),
    ])
    .await;

    orch.start_chain(["a"], ActivationContext::default())
        .await
        .unwrap();
    settle().await;

    assert_eq!(log.count("c"), 0);
}

#[tokio::test(start_paused = true)]
async fn handoff_to_unknown_worker_is_a_recorded_failure() {
    let orch = orchestrator(vec![]).await;
    let mut rx = orch.subscribe();

    orch.emit_handoff(handoff("ghost", Priority::Urgent))
        .await
        .unwrap();

    let error = loop {
        if let Notification::WorkerError {
            worker_id, error, ..
        } = rx.recv().await.unwrap()
        {
            assert_eq!(worker_id, "ghost");
            break error;
        }
    };
    assert!(error.contains("ghost"));

    let metrics = orch.metrics().await;
    assert_eq!(metrics.total_count, 1);
    assert!(metrics.success_rate_pct.abs() < 1e-9);
}

struct PanickingWorker;

#[async_trait]
impl Worker for PanickingWorker {
    fn id(&self) -> &str {
        "panicker"
    }

    async fn activate(&self, _context: &ActivationContext) -> Result<WorkerResult, WorkerError> {
        panic!("handoff target blew up");
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_handoff_target_does_not_stall_the_queue() {
    let log = ActivationLog::new();
    let registry = WorkerRegistry::new(4);
    registry.register(Arc::new(PanickingWorker)).await;
    registry.register(Arc::new(worker("next", 5, &log))).await;
    let orch = Orchestrator::new(SchedulerConfig::default(), Arc::new(registry));
    let mut rx = orch.subscribe();

    orch.emit_handoff(handoff("panicker", Priority::Urgent))
        .await
        .unwrap();
    orch.emit_handoff(handoff("next", Priority::Low))
        .await
        .unwrap();

    let (chain_id, error) = loop {
        if let Notification::WorkerError {
            chain_id, error, ..
        } = rx.recv().await.unwrap()
        {
            break (chain_id, error);
        }
    };
    assert!(chain_id.is_none());
    assert_eq!(error, "worker panicked");

    settle().await;
    assert_eq!(log.order(), vec!["next"]);
    assert_eq!(orch.pending_handoffs().await, 0);
    assert_eq!(orch.metrics().await.total_count, 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_fails_fast() {
    let registry = WorkerRegistry::new(1);
    registry
        .register(Arc::new(SimulatedWorker::new(
            "busy",
            Duration::from_millis(100),
        )))
        .await;
    let orch = Orchestrator::new(SchedulerConfig::default(), Arc::new(registry));
    let mut rx = orch.subscribe();

    orch.emit_handoff(handoff("busy", Priority::Urgent))
        .await
        .unwrap();
    orch.emit_handoff(handoff("busy", Priority::Urgent))
        .await
        .unwrap();

    let mut activated = 0;
    let mut errors = Vec::new();
    while activated + errors.len() < 2 {
        match rx.recv().await.unwrap() {
            Notification::WorkerActivated { .. } => activated += 1,
            Notification::WorkerError { error, .. } => errors.push(error),
            _ => {}
        }
    }
    assert_eq!(activated, 1);
    assert!(errors[0].contains("exhausted"));
}
