//! Baton Scheduler Library
//!
//! Event-driven handoff scheduling for chained worker activations:
//! - Ordered chains that advance the moment a worker settles
//! - Priority handoff queue with a two-tier drain policy
//! - Bounded latency window and lifetime success rate
//! - Simulated workers for demos and tests

pub mod orchestration;
pub mod sim;

pub use orchestration::{
    ActivationContext, ChainId, HandoffInstruction, HandoffRequest, Notification, Orchestrator,
    Priority, SchedulerError, Worker, WorkerPool, WorkerRegistry, WorkerResult,
};
