//! Simulated workers.
//!
//! Used by the `baton-sim` binary and by tests. A [`SimulatedWorker`] sleeps
//! for a fixed delay and then settles with a scripted [`Outcome`].

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use crate::orchestration::queue::{ParsePriorityError, Priority};
use crate::orchestration::worker::{
    ActivationContext, HandoffInstruction, Worker, WorkerError, WorkerResult,
};

/// How a simulated activation settles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Succeed,
    /// Return a result with failure status.
    FailStatus,
    /// Return an activation error with this message.
    Error(String),
    /// Never settle.
    Hang,
}

/// One activation as seen by an [`ActivationLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRecord {
    pub worker_id: String,
    pub started: Instant,
    pub settled: Option<Instant>,
}

/// Shared record of activation start and settle times.
#[derive(Debug, Default)]
pub struct ActivationLog {
    records: Mutex<Vec<ActivationRecord>>,
}

impl ActivationLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn start(&self, worker_id: &str) -> usize {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push(ActivationRecord {
            worker_id: worker_id.to_string(),
            started: Instant::now(),
            settled: None,
        });
        records.len() - 1
    }

    fn settle(&self, index: usize) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = records.get_mut(index) {
            record.settled = Some(Instant::now());
        }
    }

    /// All activations in start order.
    pub fn records(&self) -> Vec<ActivationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Worker ids in the order they were started.
    pub fn order(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.worker_id).collect()
    }

    pub fn count(&self, worker_id: &str) -> usize {
        self.records()
            .iter()
            .filter(|r| r.worker_id == worker_id)
            .count()
    }

    /// First record for `worker_id`.
    pub fn find(&self, worker_id: &str) -> Option<ActivationRecord> {
        self.records().into_iter().find(|r| r.worker_id == worker_id)
    }
}

/// Worker that sleeps for `delay` and then settles with its [`Outcome`].
#[derive(Debug, Clone)]
pub struct SimulatedWorker {
    id: String,
    delay: Duration,
    outcome: Outcome,
    handoffs: Vec<HandoffInstruction>,
    log: Option<Arc<ActivationLog>>,
}

impl SimulatedWorker {
    pub fn new(id: impl Into<String>, delay: Duration) -> Self {
        Self {
            id: id.into(),
            delay,
            outcome: Outcome::Succeed,
            handoffs: Vec::new(),
            log: None,
        }
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Request this handoff on every successful activation.
    #[must_use]
    pub fn with_handoff(mut self, instruction: HandoffInstruction) -> Self {
        self.handoffs.push(instruction);
        self
    }

    #[must_use]
    pub fn with_log(mut self, log: Arc<ActivationLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    pub const fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

#[async_trait]
impl Worker for SimulatedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn activate(&self, context: &ActivationContext) -> Result<WorkerResult, WorkerError> {
        let entry = self.log.as_ref().map(|log| log.start(&self.id));

        tokio::time::sleep(self.delay).await;
        if self.outcome == Outcome::Hang {
            std::future::pending::<()>().await;
        }

        if let (Some(log), Some(index)) = (&self.log, entry) {
            log.settle(index);
        }

        let delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX);
        match &self.outcome {
            Outcome::Succeed | Outcome::Hang => {
                let output = json!({
                    "worker": self.id,
                    "delay_ms": delay_ms,
                    "context": context.value(),
                });
                Ok(self
                    .handoffs
                    .iter()
                    .cloned()
                    .fold(WorkerResult::success(output), WorkerResult::with_handoff))
            }
            Outcome::FailStatus => Ok(WorkerResult::failure(json!(format!(
                "{} reported failure",
                self.id
            )))),
            Outcome::Error(message) => Err(WorkerError::new(message.clone())),
        }
    }
}

/// Error parsing a worker or handoff spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("invalid spec '{spec}': {message}")]
    Invalid { spec: String, message: String },

    #[error(transparent)]
    Priority(#[from] ParsePriorityError),
}

impl SpecError {
    fn invalid(spec: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            spec: spec.to_string(),
            message: message.into(),
        }
    }
}

/// Parsed `name:delay_ms[:fail|error|hang]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub id: String,
    pub delay: Duration,
    pub outcome: Outcome,
}

impl WorkerSpec {
    pub fn into_worker(self) -> SimulatedWorker {
        SimulatedWorker::new(self.id, self.delay).with_outcome(self.outcome)
    }
}

impl FromStr for WorkerSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let id = parts
            .next()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SpecError::invalid(s, "missing worker name"))?;
        let delay_ms: u64 = match parts.next() {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| SpecError::invalid(s, format!("bad delay '{raw}'")))?,
            None => 0,
        };
        let outcome = match parts.next().map(str::trim) {
            None | Some("ok") => Outcome::Succeed,
            Some("fail") => Outcome::FailStatus,
            Some("error") => Outcome::Error(format!("{id} raised an error")),
            Some("hang") => Outcome::Hang,
            Some(other) => return Err(SpecError::invalid(s, format!("unknown outcome '{other}'"))),
        };
        if parts.next().is_some() {
            return Err(SpecError::invalid(s, "too many fields"));
        }

        Ok(Self {
            id: id.to_string(),
            delay: Duration::from_millis(delay_ms),
            outcome,
        })
    }
}

/// Parsed `from:to:priority`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffSpec {
    pub from_worker: String,
    pub to_worker: String,
    pub priority: Priority,
}

impl FromStr for HandoffSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(':').map(str::trim).collect();
        let [from, to, priority] = fields.as_slice() else {
            return Err(SpecError::invalid(s, "expected from:to:priority"));
        };
        if from.is_empty() || to.is_empty() {
            return Err(SpecError::invalid(s, "worker names must not be empty"));
        }
        Ok(Self {
            from_worker: (*from).to_string(),
            to_worker: (*to).to_string(),
            priority: priority.parse()?,
        })
    }
}
