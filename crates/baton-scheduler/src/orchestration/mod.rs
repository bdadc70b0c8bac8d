//! Handoff orchestration: chains, handoff queue, metrics and the scheduler core.
//!
//! - [`Orchestrator`]: public entry point; starts chains, accepts handoffs,
//!   shuts down with a bounded wait.
//! - [`ChainManager`]: per-chain advancement state machine.
//! - [`HandoffQueue`]: priority-ordered, insertion-stable pending handoffs.
//! - [`MetricsTracker`]: windowed latency and lifetime success rate.
//! - [`EventBus`]: typed [`Notification`] broadcast.
//! - [`WorkerRegistry`]: semaphore-bounded [`WorkerPool`] implementation.

pub mod chain;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod worker;

pub use chain::{ChainId, ChainManager, ChainSnapshot};
pub use events::{EventBus, Notification};
pub use metrics::{MetricsSnapshot, MetricsTracker};
pub use orchestrator::{Orchestrator, SchedulerError, ShutdownReport};
pub use pool::{PoolError, WorkerLease, WorkerPool, WorkerRegistry};
pub use queue::{HandoffQueue, HandoffRequest, Priority};
pub use worker::{ActivationContext, HandoffInstruction, Worker, WorkerError, WorkerResult};
