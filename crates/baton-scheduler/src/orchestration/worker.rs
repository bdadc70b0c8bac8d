//! Worker contract consumed by the scheduler.
//!
//! A [`Worker`] is an external unit of work with a single activation entry
//! point. The scheduler never looks inside the [`ActivationContext`] it passes
//! along; from a [`WorkerResult`] it reads only the status and the explicit
//! [`HandoffInstruction`] list.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::orchestrator::SchedulerError;
use super::queue::Priority;

/// Opaque payload forwarded untouched to every worker of a chain and to
/// every handoff target.
///
/// Cloning is cheap: the payload is shared, never copied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivationContext(Arc<serde_json::Value>);

impl ActivationContext {
    pub fn new(value: serde_json::Value) -> Self {
        Self(Arc::new(value))
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for ActivationContext {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

/// Outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Success,
    Failure,
}

/// A validated request, carried on a [`WorkerResult`], to hand control to
/// another worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffInstruction {
    to_worker: String,
    priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl HandoffInstruction {
    /// Build an instruction targeting `to_worker`.
    ///
    /// Fails if the target identifier is blank.
    pub fn new(to_worker: impl Into<String>, priority: Priority) -> Result<Self, SchedulerError> {
        let to_worker = to_worker.into();
        if to_worker.trim().is_empty() {
            return Err(SchedulerError::InvalidHandoff {
                message: "handoff target must not be empty".to_string(),
            });
        }
        Ok(Self {
            to_worker,
            priority,
            reason: None,
        })
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn to_worker(&self) -> &str {
        &self.to_worker
    }

    pub const fn priority(&self) -> Priority {
        self.priority
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

/// Result of one worker activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerResult {
    pub status: WorkerStatus,
    /// Free-form output; only used for observability.
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub handoffs: Vec<HandoffInstruction>,
}

impl WorkerResult {
    pub const fn success(output: serde_json::Value) -> Self {
        Self {
            status: WorkerStatus::Success,
            output,
            handoffs: Vec::new(),
        }
    }

    pub const fn failure(output: serde_json::Value) -> Self {
        Self {
            status: WorkerStatus::Failure,
            output,
            handoffs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_handoff(mut self, instruction: HandoffInstruction) -> Self {
        self.handoffs.push(instruction);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Success
    }

    /// Human-readable reason for a failure status.
    ///
    /// Uses the output when it is a plain string.
    pub fn failure_message(&self) -> String {
        match &self.output {
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            _ => "worker reported failure status".to_string(),
        }
    }
}

/// Error raised by a worker's activation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct WorkerError {
    pub message: String,
}

impl WorkerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A unit of work the scheduler can activate.
///
/// `activate` may take arbitrarily long. The scheduler never cancels it and
/// relies on the worker to settle eventually.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Identifier the pool knows this worker by.
    fn id(&self) -> &str;

    async fn activate(&self, context: &ActivationContext) -> Result<WorkerResult, WorkerError>;
}
