//! Chain state machine.
//!
//! A chain walks `NOT_STARTED -> ACTIVE(0) -> ... -> ACTIVE(n-1) -> COMPLETED`.
//! There is no failed state: the orchestrator advances past a failed worker
//! exactly as it does past a successful one. [`ChainManager::advance`] is the
//! only path that moves the cursor.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::orchestrator::SchedulerError;
use super::worker::ActivationContext;

/// Opaque chain identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A live, ordered activation sequence.
#[derive(Debug, Clone)]
pub struct Chain {
    id: ChainId,
    workers: Vec<String>,
    context: ActivationContext,
    /// `None` before the first activation; `Some(workers.len())` once exhausted.
    cursor: Option<usize>,
    started_at: DateTime<Utc>,
    started: Instant,
    completed: bool,
    duration: Option<Duration>,
}

impl Chain {
    pub const fn id(&self) -> &ChainId {
        &self.id
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Worker the cursor currently points at, if any.
    pub fn active_worker(&self) -> Option<&str> {
        if self.completed {
            return None;
        }
        self.cursor
            .and_then(|c| self.workers.get(c))
            .map(String::as_str)
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            id: self.id.clone(),
            workers: self.workers.clone(),
            cursor: self.cursor,
            active_worker: self.active_worker().map(str::to_string),
            started_at: self.started_at,
            completed: self.completed,
            duration_ms: self.duration.map(duration_ms),
        }
    }
}

/// Read-only copy of a chain for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSnapshot {
    pub id: ChainId,
    pub workers: Vec<String>,
    pub cursor: Option<usize>,
    pub active_worker: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed: bool,
    pub duration_ms: Option<u64>,
}

/// Outcome of [`ChainManager::advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Activate this worker next.
    Next {
        worker_id: String,
        index: usize,
        context: ActivationContext,
    },
    /// The sequence just ran out; the caller should finalize the chain.
    Exhausted,
    /// Unknown, completed or already exhausted chain. Nothing changed.
    Ignored,
}

/// Summary produced when a chain is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCompletion {
    pub chain_id: ChainId,
    pub worker_count: usize,
    pub duration: Duration,
}

impl ChainCompletion {
    pub fn duration_ms(&self) -> u64 {
        duration_ms(self.duration)
    }
}

/// Owns every live chain.
#[derive(Debug, Default)]
pub struct ChainManager {
    chains: HashMap<ChainId, Chain>,
}

impl ChainManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new chain with its cursor before the first worker.
    pub fn create(
        &mut self,
        workers: Vec<String>,
        context: ActivationContext,
    ) -> Result<ChainId, SchedulerError> {
        if workers.is_empty() {
            return Err(SchedulerError::EmptyChain);
        }
        if let Some(index) = workers.iter().position(|w| w.trim().is_empty()) {
            return Err(SchedulerError::BlankWorkerId { index });
        }

        let id = ChainId::generate();
        self.chains.insert(
            id.clone(),
            Chain {
                id: id.clone(),
                workers,
                context,
                cursor: None,
                started_at: Utc::now(),
                started: Instant::now(),
                completed: false,
                duration: None,
            },
        );
        Ok(id)
    }

    /// Move the cursor one step.
    pub fn advance(&mut self, chain_id: &ChainId) -> Advance {
        let Some(chain) = self.chains.get_mut(chain_id) else {
            return Advance::Ignored;
        };
        if chain.completed {
            return Advance::Ignored;
        }

        let next = chain.cursor.map_or(0, |c| c + 1);
        if next > chain.workers.len() {
            return Advance::Ignored;
        }
        chain.cursor = Some(next);

        match chain.workers.get(next) {
            Some(worker_id) => Advance::Next {
                worker_id: worker_id.clone(),
                index: next,
                context: chain.context.clone(),
            },
            None => Advance::Exhausted,
        }
    }

    /// Mark the chain completed. Only the first call yields a completion.
    pub fn complete(&mut self, chain_id: &ChainId) -> Option<ChainCompletion> {
        let chain = self.chains.get_mut(chain_id)?;
        if chain.completed {
            return None;
        }
        let duration = chain.started.elapsed();
        chain.completed = true;
        chain.duration = Some(duration);
        Some(ChainCompletion {
            chain_id: chain.id.clone(),
            worker_count: chain.workers.len(),
            duration,
        })
    }

    /// Drop a completed chain from the live set.
    ///
    /// Chains still in progress are kept; returns whether anything was removed.
    pub fn evict(&mut self, chain_id: &ChainId) -> bool {
        if self.chains.get(chain_id).is_some_and(Chain::is_completed) {
            self.chains.remove(chain_id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, chain_id: &ChainId) -> Option<&Chain> {
        self.chains.get(chain_id)
    }

    /// Snapshots of every live chain, oldest first.
    pub fn snapshots(&self) -> Vec<ChainSnapshot> {
        let mut chains: Vec<&Chain> = self.chains.values().collect();
        chains.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.id.cmp(&b.id)));
        chains.into_iter().map(Chain::snapshot).collect()
    }

    pub fn all_completed(&self) -> bool {
        self.chains.values().all(Chain::is_completed)
    }

    pub fn in_progress(&self) -> usize {
        self.chains.values().filter(|c| !c.completed).count()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
