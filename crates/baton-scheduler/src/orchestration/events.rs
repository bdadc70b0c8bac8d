//! Typed notification stream for observers.
//!
//! Every state change the orchestrator makes visible is one [`Notification`]
//! variant, delivered over a Tokio broadcast channel. Slow subscribers lag
//! and skip; they never block the scheduler.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::chain::ChainId;
use super::queue::Priority;
use super::worker::WorkerResult;

/// Observable scheduler event.
///
/// `chain_id` is `None` on worker events caused by a handoff rather than a
/// chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    ChainStarted {
        chain_id: ChainId,
        workers: Vec<String>,
    },
    WorkerActivated {
        worker_id: String,
        chain_id: Option<ChainId>,
        timestamp: DateTime<Utc>,
    },
    WorkerCompleted {
        worker_id: String,
        chain_id: Option<ChainId>,
        result: WorkerResult,
        timestamp: DateTime<Utc>,
    },
    WorkerError {
        worker_id: String,
        chain_id: Option<ChainId>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ChainCompleted {
        chain_id: ChainId,
        worker_count: usize,
        duration_ms: u64,
    },
    HandoffQueued {
        from_worker: String,
        to_worker: String,
        priority: Priority,
        reason: String,
    },
}

impl Notification {
    /// Stable snake-case name of the variant.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ChainStarted { .. } => "chain_started",
            Self::WorkerActivated { .. } => "worker_activated",
            Self::WorkerCompleted { .. } => "worker_completed",
            Self::WorkerError { .. } => "worker_error",
            Self::ChainCompleted { .. } => "chain_completed",
            Self::HandoffQueued { .. } => "handoff_queued",
        }
    }

    pub const fn chain_id(&self) -> Option<&ChainId> {
        match self {
            Self::ChainStarted { chain_id, .. } | Self::ChainCompleted { chain_id, .. } => {
                Some(chain_id)
            }
            Self::WorkerActivated { chain_id, .. }
            | Self::WorkerCompleted { chain_id, .. }
            | Self::WorkerError { chain_id, .. } => chain_id.as_ref(),
            Self::HandoffQueued { .. } => None,
        }
    }

    pub fn worker_id(&self) -> Option<&str> {
        match self {
            Self::WorkerActivated { worker_id, .. }
            | Self::WorkerCompleted { worker_id, .. }
            | Self::WorkerError { worker_id, .. } => Some(worker_id),
            Self::HandoffQueued { to_worker, .. } => Some(to_worker),
            Self::ChainStarted { .. } | Self::ChainCompleted { .. } => None,
        }
    }
}

/// Broadcast hub for [`Notification`]s.
///
/// Once detached, emits are dropped and existing subscribers see the channel
/// close after draining what was already sent.
#[derive(Debug)]
pub struct EventBus {
    sender: RwLock<Option<broadcast::Sender<Notification>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(tx)),
        }
    }

    /// Subscribe to future notifications.
    ///
    /// After [`detach`](Self::detach) the returned receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            tx.subscribe()
        } else {
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            rx
        }
    }

    pub fn emit(&self, notification: Notification) {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            debug!(kind = notification.kind(), "Event bus detached, dropping notification");
            return;
        };
        debug!(
            kind = notification.kind(),
            chain_id = notification.chain_id().map(ChainId::as_str),
            worker_id = notification.worker_id(),
            "Notification"
        );
        // No subscribers is fine.
        let _ = tx.send(notification);
    }

    /// Drop the sender so every subscriber is released.
    ///
    /// Returns `false` if the bus was already detached.
    pub fn detach(&self) -> bool {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}
