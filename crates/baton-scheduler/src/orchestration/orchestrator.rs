//! Orchestrator core.
//!
//! [`Orchestrator`] is the coordinator that:
//! - creates chains and walks them one worker at a time
//! - queues handoff requests and drains them by priority
//! - records every activation in the metrics tracker
//! - publishes a [`Notification`] for every visible state change
//! - drains or abandons in-flight chains on shutdown
//!
//! State changes happen on a single dispatcher task fed by two turn queues.
//! The immediate queue carries chain continuations and urgent/high handoff
//! drains; the deferred queue carries medium/low drains and is only read when
//! the immediate queue is empty. Worker activations run as separate tasks and
//! report back by posting turns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use baton_core::SchedulerConfig;

use super::chain::{Advance, ChainId, ChainManager, ChainSnapshot};
use super::events::{EventBus, Notification};
use super::metrics::{MetricsSnapshot, MetricsTracker};
use super::pool::WorkerPool;
use super::queue::{HandoffQueue, HandoffRequest, Priority};
use super::worker::ActivationContext;

/// Errors returned to callers of the orchestrator.
///
/// Runtime failures (worker errors, pool errors) never surface here; they are
/// reported through [`Notification::WorkerError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Chain must contain at least one worker")]
    EmptyChain,

    #[error("Worker id at position {index} is blank")]
    BlankWorkerId { index: usize },

    #[error("Invalid handoff: {message}")]
    InvalidHandoff { message: String },

    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// Which dispatcher queue a turn is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Immediate,
    Deferred,
}

impl From<Priority> for Tier {
    fn from(priority: Priority) -> Self {
        if priority.is_immediate() {
            Self::Immediate
        } else {
            Self::Deferred
        }
    }
}

/// One unit of dispatcher work.
#[derive(Debug)]
enum Turn {
    /// A chain worker settled; move the chain on.
    Continue(ChainId),
    /// Serve the head of the handoff queue.
    DrainHandoffs,
}

/// Outcome of [`Orchestrator::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every chain completed before the timeout.
    pub drained: bool,
    /// Queued handoffs discarded without running.
    pub dropped_handoffs: usize,
    /// Chains still in progress when shutdown gave up waiting.
    pub abandoned_chains: usize,
    pub elapsed: Duration,
}

struct Inner {
    config: SchedulerConfig,
    pool: Arc<dyn WorkerPool>,
    chains: RwLock<ChainManager>,
    queue: Mutex<HandoffQueue>,
    metrics: Mutex<MetricsTracker>,
    events: EventBus,
    immediate_tx: mpsc::UnboundedSender<Turn>,
    deferred_tx: mpsc::UnboundedSender<Turn>,
    /// Cleared once shutdown begins; gates new chains only.
    accepting: AtomicBool,
    /// Set once the shutdown wait is over and the dispatcher is stopping.
    shutdown_tx: watch::Sender<bool>,
    dispatcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Event-driven handoff scheduler.
///
/// Cheap to clone; every clone drives the same scheduler. Must be created
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Create an orchestrator that activates workers from `pool`.
    pub fn new(config: SchedulerConfig, pool: Arc<dyn WorkerPool>) -> Self {
        let (immediate_tx, immediate_rx) = mpsc::unbounded_channel();
        let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            metrics: Mutex::new(MetricsTracker::from_config(&config)),
            events: EventBus::new(config.event_capacity),
            config,
            pool,
            chains: RwLock::new(ChainManager::new()),
            queue: Mutex::new(HandoffQueue::new()),
            immediate_tx,
            deferred_tx,
            accepting: AtomicBool::new(true),
            shutdown_tx,
            dispatcher: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch_loop(
            Arc::downgrade(&inner),
            immediate_rx,
            deferred_rx,
            shutdown_rx,
        ));
        *inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(
            chain_ttl_ms = inner.config.completed_chain_ttl_ms,
            latency_window = inner.config.latency_window,
            "Orchestrator created"
        );

        Self { inner }
    }

    /// Start a chain and activate its first worker before returning.
    pub async fn start_chain<I, S>(
        &self,
        workers: I,
        context: ActivationContext,
    ) -> Result<ChainId, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let workers: Vec<String> = workers.into_iter().map(Into::into).collect();
        let chain_id = {
            let mut chains = self.inner.chains.write().await;
            // Shutdown may have begun while waiting for the lock.
            if !self.inner.accepting.load(Ordering::SeqCst) {
                return Err(SchedulerError::ShuttingDown);
            }
            chains.create(workers.clone(), context)?
        };

        info!(chain_id = %chain_id, workers = ?workers, "Chain started");
        self.inner.events.emit(Notification::ChainStarted {
            chain_id: chain_id.clone(),
            workers,
        });

        self.inner.activate_next(&chain_id).await;
        Ok(chain_id)
    }

    /// Queue an out-of-band handoff.
    ///
    /// Handoffs are still served while `shutdown` waits for chains. Once the
    /// dispatcher has stopped the request is dropped without error.
    pub async fn emit_handoff(&self, request: HandoffRequest) -> Result<(), SchedulerError> {
        request.validate()?;
        self.inner.enqueue_handoff(request).await;
        Ok(())
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.lock().await.snapshot()
    }

    /// Snapshots of live chains, including completed ones not yet evicted.
    pub async fn active_chains(&self) -> Vec<ChainSnapshot> {
        self.inner.chains.read().await.snapshots()
    }

    pub async fn pending_handoffs(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Receive every notification emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting chains and wait up to `timeout` for running ones.
    ///
    /// Handoffs keep being served during the wait. In-flight workers are
    /// abandoned, not cancelled. Whatever is still queued afterwards is
    /// dropped and subscribers are released.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let inner = &self.inner;
        let started = Instant::now();
        let deadline = started + timeout;
        let poll = inner
            .config
            .shutdown_poll_interval()
            .max(Duration::from_millis(1));

        if inner.accepting.swap(false, Ordering::SeqCst) {
            info!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "Shutting down orchestrator"
            );
        } else {
            debug!("Shutdown already requested");
        }

        let drained = loop {
            if inner.chains.read().await.all_completed() {
                break true;
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        };

        // Stop first so nothing is enqueued behind the clear.
        inner.shutdown_tx.send_replace(true);
        let dropped_handoffs = inner.queue.lock().await.clear();
        let abandoned_chains = inner.chains.read().await.in_progress();
        inner.events.detach();

        let dispatcher = inner
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatcher task ended abnormally");
            }
        }

        let report = ShutdownReport {
            drained,
            dropped_handoffs,
            abandoned_chains,
            elapsed: started.elapsed(),
        };
        if drained {
            info!(dropped_handoffs, "Orchestrator shut down");
        } else {
            warn!(
                abandoned_chains,
                dropped_handoffs, "Shutdown timed out, abandoning running chains"
            );
        }
        report
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

async fn dispatch_loop(
    inner: Weak<Inner>,
    mut immediate: mpsc::UnboundedReceiver<Turn>,
    mut deferred: mpsc::UnboundedReceiver<Turn>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let turn = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(turn) = immediate.recv() => turn,
            Some(turn) = deferred.recv() => turn,
            else => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.run_turn(turn).await;
    }
    debug!("Dispatcher stopped");
}

impl Inner {
    async fn run_turn(self: &Arc<Self>, turn: Turn) {
        match turn {
            Turn::Continue(chain_id) => self.activate_next(&chain_id).await,
            Turn::DrainHandoffs => self.process_handoff_queue().await,
        }
    }

    fn schedule(&self, tier: Tier, turn: Turn) {
        let tx = match tier {
            Tier::Immediate => &self.immediate_tx,
            Tier::Deferred => &self.deferred_tx,
        };
        if let Err(e) = tx.send(turn) {
            debug!(turn = ?e.0, ?tier, "Dispatcher stopped, turn dropped");
        }
    }

    /// Advance a chain and either spawn its next worker or finalize it.
    async fn activate_next(self: &Arc<Self>, chain_id: &ChainId) {
        let mut chains = self.chains.write().await;
        match chains.advance(chain_id) {
            Advance::Ignored => {
                debug!(chain_id = %chain_id, "Ignoring advance for unknown or finished chain");
            }
            Advance::Exhausted => {
                let Some(done) = chains.complete(chain_id) else {
                    return;
                };
                drop(chains);

                info!(
                    chain_id = %done.chain_id,
                    worker_count = done.worker_count,
                    duration_ms = done.duration_ms(),
                    "Chain completed"
                );
                self.events.emit(Notification::ChainCompleted {
                    chain_id: done.chain_id.clone(),
                    worker_count: done.worker_count,
                    duration_ms: done.duration_ms(),
                });
                self.schedule_eviction(done.chain_id);
            }
            Advance::Next {
                worker_id,
                index,
                context,
            } => {
                drop(chains);
                debug!(chain_id = %chain_id, worker_id = %worker_id, index, "Activating chain worker");

                let inner = Arc::clone(self);
                let chain_id = chain_id.clone();
                tokio::spawn(async move {
                    inner
                        .run_activation(&worker_id, context, Some(chain_id.clone()))
                        .await;
                    // Success or failure, the chain moves on.
                    inner.schedule(Tier::Immediate, Turn::Continue(chain_id));
                });
            }
        }
    }

    fn schedule_eviction(self: &Arc<Self>, chain_id: ChainId) {
        let ttl = self.config.completed_chain_ttl();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.chains.write().await.evict(&chain_id) {
                debug!(chain_id = %chain_id, "Evicted completed chain");
            }
        });
    }

    /// Dispatch the head of the handoff queue.
    async fn process_handoff_queue(self: &Arc<Self>) {
        let Some(request) = self.queue.lock().await.dequeue_next() else {
            return;
        };
        debug!(
            from_worker = %request.from_worker,
            to_worker = %request.to_worker,
            priority = %request.priority,
            "Dispatching handoff"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let HandoffRequest {
                to_worker, context, ..
            } = request;
            inner.run_activation(&to_worker, context, None).await;

            let head = inner.queue.lock().await.peek_priority();
            if let Some(priority) = head {
                inner.schedule(Tier::from(priority), Turn::DrainHandoffs);
            }
        });
    }

    async fn enqueue_handoff(&self, request: HandoffRequest) {
        let priority = request.priority;
        let queued = Notification::HandoffQueued {
            from_worker: request.from_worker.clone(),
            to_worker: request.to_worker.clone(),
            priority,
            reason: request.reason.clone(),
        };

        let position = {
            let mut queue = self.queue.lock().await;
            // Checked under the queue lock so shutdown's clear cannot be overtaken.
            if *self.shutdown_tx.borrow() {
                warn!(
                    from_worker = %request.from_worker,
                    to_worker = %request.to_worker,
                    "Dispatcher stopped, handoff dropped"
                );
                return;
            }
            queue.enqueue(request)
        };
        debug!(%priority, position, "Handoff queued");

        self.events.emit(queued);
        self.schedule(Tier::from(priority), Turn::DrainHandoffs);
    }

    /// Borrow, run and return one worker, recording the outcome.
    async fn run_activation(
        &self,
        worker_id: &str,
        context: ActivationContext,
        chain_id: Option<ChainId>,
    ) {
        let requested = Instant::now();
        let lease = match self.pool.acquire(worker_id).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(
                    worker_id,
                    chain_id = chain_id.as_ref().map(ChainId::as_str),
                    error = %e,
                    "Failed to acquire worker"
                );
                self.settle_failure(worker_id, chain_id, requested.elapsed(), e.to_string())
                    .await;
                return;
            }
        };

        self.events.emit(Notification::WorkerActivated {
            worker_id: worker_id.to_string(),
            chain_id: chain_id.clone(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        // Run on its own task so a panicking worker settles as a failure
        // instead of taking the continuation down with it.
        let worker = lease.shared_worker();
        let activation_context = context.clone();
        let outcome =
            tokio::spawn(async move { worker.activate(&activation_context).await }).await;
        let elapsed = started.elapsed();

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.pool.release(lease).await;
                let message = if e.is_panic() {
                    "worker panicked".to_string()
                } else {
                    format!("worker task aborted: {e}")
                };
                self.settle_failure(worker_id, chain_id, elapsed, message)
                    .await;
                return;
            }
        };

        match outcome {
            Ok(result) if result.is_success() => {
                self.record(elapsed, true).await;
                let handoffs: Vec<HandoffRequest> = result
                    .handoffs
                    .iter()
                    .map(|instruction| {
                        HandoffRequest::from_instruction(worker_id, instruction, context.clone())
                    })
                    .collect();

                debug!(
                    worker_id,
                    chain_id = chain_id.as_ref().map(ChainId::as_str),
                    latency_ms = millis(elapsed),
                    handoffs = handoffs.len(),
                    "Worker completed"
                );
                self.events.emit(Notification::WorkerCompleted {
                    worker_id: worker_id.to_string(),
                    chain_id,
                    result,
                    timestamp: Utc::now(),
                });
                self.pool.release(lease).await;

                for request in handoffs {
                    self.enqueue_handoff(request).await;
                }
            }
            Ok(result) => {
                self.pool.release(lease).await;
                self.settle_failure(worker_id, chain_id, elapsed, result.failure_message())
                    .await;
            }
            Err(e) => {
                self.pool.release(lease).await;
                self.settle_failure(worker_id, chain_id, elapsed, e.to_string())
                    .await;
            }
        }
    }

    async fn settle_failure(
        &self,
        worker_id: &str,
        chain_id: Option<ChainId>,
        elapsed: Duration,
        error: String,
    ) {
        self.record(elapsed, false).await;
        warn!(
            worker_id,
            chain_id = chain_id.as_ref().map(ChainId::as_str),
            error = %error,
            "Worker failed"
        );
        self.events.emit(Notification::WorkerError {
            worker_id: worker_id.to_string(),
            chain_id,
            error,
            timestamp: Utc::now(),
        });
    }

    async fn record(&self, elapsed: Duration, success: bool) {
        self.metrics.lock().await.record(millis(elapsed), success);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
