//! Worker pool interface and a semaphore-bounded in-memory registry.
//!
//! The scheduler only sees [`WorkerPool`]: it borrows one worker per
//! activation with `acquire` and hands it back with `release`. The
//! [`WorkerRegistry`] implementation limits concurrent activations via a
//! Tokio semaphore and fails fast when the limit is reached.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, info};

use super::worker::Worker;

/// Default maximum number of concurrent worker activations.
const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// A worker borrowed from a pool for exactly one activation.
///
/// The concurrency permit is returned when the lease is dropped.
pub struct WorkerLease {
    worker: Arc<dyn Worker>,
    _permit: OwnedSemaphorePermit,
}

impl WorkerLease {
    pub fn new(worker: Arc<dyn Worker>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            worker,
            _permit: permit,
        }
    }

    pub fn worker(&self) -> &dyn Worker {
        self.worker.as_ref()
    }

    /// Owned handle for running the activation on its own task.
    pub fn shared_worker(&self) -> Arc<dyn Worker> {
        Arc::clone(&self.worker)
    }

    pub fn worker_id(&self) -> &str {
        self.worker.id()
    }
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("worker_id", &self.worker.id())
            .finish_non_exhaustive()
    }
}

/// Source of ready-to-run workers.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Borrow the worker registered as `worker_id`, failing fast if it is
    /// unknown or the pool is exhausted.
    async fn acquire(&self, worker_id: &str) -> Result<WorkerLease, PoolError>;

    /// Return a borrowed worker.
    async fn release(&self, lease: WorkerLease);
}

/// Errors from a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("Unknown worker: {id}")]
    UnknownWorker { id: String },

    #[error("Worker pool exhausted ({limit} activations in flight), cannot acquire {id}")]
    Exhausted { id: String, limit: usize },

    /// The semaphore was closed (pool shut down).
    #[error("Worker pool has been closed")]
    Closed,
}

/// Semaphore-bounded pool of registered workers.
pub struct WorkerRegistry {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    /// Registered workers keyed by worker ID.
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
}

impl WorkerRegistry {
    /// Create a new registry with the given concurrency limit.
    pub fn new(max_concurrency: usize) -> Self {
        let limit = if max_concurrency == 0 {
            DEFAULT_MAX_CONCURRENCY
        } else {
            max_concurrency
        };

        info!(max_concurrency = limit, "WorkerRegistry created");

        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            max_concurrency: limit,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker under its own ID, replacing any previous one.
    pub async fn register(&self, worker: Arc<dyn Worker>) {
        let id = worker.id().to_string();
        debug!(worker_id = %id, "Registering worker");
        self.workers.write().await.insert(id, worker);
    }

    /// Remove a worker. In-flight leases keep their own handle.
    pub async fn unregister(&self, worker_id: &str) -> Option<Arc<dyn Worker>> {
        debug!(worker_id, "Unregistering worker");
        self.workers.write().await.remove(worker_id)
    }

    pub async fn contains(&self, worker_id: &str) -> bool {
        self.workers.read().await.contains_key(worker_id)
    }

    /// IDs of all registered workers.
    pub async fn registered_ids(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    /// Maximum concurrency limit.
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of available permits (slots) remaining.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of activations currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Refuse all further acquisitions.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

#[async_trait]
impl WorkerPool for WorkerRegistry {
    async fn acquire(&self, worker_id: &str) -> Result<WorkerLease, PoolError> {
        let worker = self
            .workers
            .read()
            .await
            .get(worker_id)
            .cloned()
            .ok_or_else(|| PoolError::UnknownWorker {
                id: worker_id.to_string(),
            })?;

        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|e| match e {
                tokio::sync::TryAcquireError::Closed => PoolError::Closed,
                tokio::sync::TryAcquireError::NoPermits => PoolError::Exhausted {
                    id: worker_id.to_string(),
                    limit: self.max_concurrency,
                },
            })?;

        debug!(worker_id, available = self.available_permits(), "Worker acquired");
        Ok(WorkerLease::new(worker, permit))
    }

    async fn release(&self, lease: WorkerLease) {
        debug!(worker_id = lease.worker_id(), "Worker released");
        drop(lease);
    }
}
