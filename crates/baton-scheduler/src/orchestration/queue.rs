//! Priority-ordered queue of pending handoff requests.
//!
//! Entries are kept strictly priority-descending. A new request is inserted
//! after every entry of equal or higher priority, so equal priorities keep
//! their enqueue order. The queue is never re-sorted.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::orchestrator::SchedulerError;
use super::worker::{ActivationContext, HandoffInstruction};

/// Handoff priority. Declared lowest first so the derived ordering puts
/// `Urgent` on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Whether a drain for this priority runs on the next scheduler turn
    /// rather than after pending continuations.
    pub const fn is_immediate(self) -> bool {
        matches!(self, Self::Urgent | Self::High)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised priority name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority '{0}' (expected urgent, high, medium or low)")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// An explicit worker-to-worker transfer waiting to be served.
#[derive(Debug, Clone)]
pub struct HandoffRequest {
    pub from_worker: String,
    pub to_worker: String,
    pub priority: Priority,
    /// Forwarded to the target worker as-is.
    pub context: ActivationContext,
    /// Observability only.
    pub reason: String,
    pub enqueued_at: DateTime<Utc>,
}

impl HandoffRequest {
    pub fn new(
        from_worker: impl Into<String>,
        to_worker: impl Into<String>,
        priority: Priority,
        context: ActivationContext,
    ) -> Self {
        Self {
            from_worker: from_worker.into(),
            to_worker: to_worker.into(),
            priority,
            context,
            reason: String::new(),
            enqueued_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Build the request implied by a completed worker's instruction.
    pub fn from_instruction(
        from_worker: &str,
        instruction: &HandoffInstruction,
        context: ActivationContext,
    ) -> Self {
        let reason = instruction
            .reason()
            .map_or_else(|| format!("requested by {from_worker}"), str::to_string);
        Self::new(
            from_worker,
            instruction.to_worker(),
            instruction.priority(),
            context,
        )
        .with_reason(reason)
    }

    /// Check the fields a caller must supply.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.from_worker.trim().is_empty() {
            return Err(SchedulerError::InvalidHandoff {
                message: "from_worker must not be empty".to_string(),
            });
        }
        if self.to_worker.trim().is_empty() {
            return Err(SchedulerError::InvalidHandoff {
                message: "to_worker must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Stable priority queue of [`HandoffRequest`]s.
#[derive(Debug, Default)]
pub struct HandoffQueue {
    entries: VecDeque<HandoffRequest>,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert before the first entry with strictly lower priority.
    ///
    /// Returns the position the request landed at.
    pub fn enqueue(&mut self, request: HandoffRequest) -> usize {
        let position = self
            .entries
            .iter()
            .position(|e| e.priority < request.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, request);
        position
    }

    /// Remove the highest-priority, oldest entry.
    pub fn dequeue_next(&mut self) -> Option<HandoffRequest> {
        self.entries.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Priority of the entry that would be dequeued next.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.entries.front().map(|e| e.priority)
    }

    /// Drop every pending request, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandoffRequest> {
        self.entries.iter()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(to: &str, priority: Priority) -> HandoffRequest {
        HandoffRequest::new("origin", to, priority, ActivationContext::default())
    }

    fn drain(queue: &mut HandoffQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.dequeue_next())
            .map(|r| r.to_worker)
            .collect()
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    #[test]
    fn mixed_priorities_drain_urgent_first_fifo_within_tier() {
        let mut queue = HandoffQueue::new();
        queue.enqueue(request("low-1", Priority::Low));
        queue.enqueue(request("urgent-1", Priority::Urgent));
        queue.enqueue(request("medium-1", Priority::Medium));
        queue.enqueue(request("urgent-2", Priority::Urgent));

        assert_eq!(
            drain(&mut queue),
            vec!["urgent-1", "urgent-2", "medium-1", "low-1"]
        );
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let mut queue = HandoffQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.enqueue(request(name, Priority::Medium));
        }
        assert_eq!(drain(&mut queue), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn enqueue_reports_insert_position() {
        let mut queue = HandoffQueue::new();
        assert_eq!(queue.enqueue(request("low", Priority::Low)), 0);
        assert_eq!(queue.enqueue(request("high", Priority::High)), 0);
        assert_eq!(queue.enqueue(request("high-2", Priority::High)), 1);
        assert_eq!(queue.enqueue(request("medium", Priority::Medium)), 2);
        assert_eq!(queue.enqueue(request("low-2", Priority::Low)), 4);
    }

    #[test]
    fn queue_is_priority_descending_after_any_insert_sequence() {
        let mut queue = HandoffQueue::new();
        let pattern = [
            Priority::Medium,
            Priority::Low,
            Priority::Urgent,
            Priority::High,
            Priority::Low,
            Priority::Urgent,
            Priority::Medium,
        ];
        for (i, p) in pattern.iter().enumerate() {
            queue.enqueue(request(&format!("w{i}"), *p));
        }
        let priorities: Vec<Priority> = queue.iter().map(|r| r.priority).collect();
        assert!(priorities.windows(2).all(|w| w[0] >= w[1]));
    }

    // =========================================================================
    // Basic operations
    // =========================================================================

    #[test]
    fn empty_queue_dequeues_none() {
        let mut queue = HandoffQueue::new();
        assert!(queue.is_empty());
        assert!(queue.dequeue_next().is_none());
        assert!(queue.peek_priority().is_none());
    }

    #[test]
    fn peek_priority_tracks_head() {
        let mut queue = HandoffQueue::new();
        queue.enqueue(request("a", Priority::Low));
        assert_eq!(queue.peek_priority(), Some(Priority::Low));
        queue.enqueue(request("b", Priority::High));
        assert_eq!(queue.peek_priority(), Some(Priority::High));
    }

    #[test]
    fn clear_reports_dropped_count() {
        let mut queue = HandoffQueue::new();
        queue.enqueue(request("a", Priority::Low));
        queue.enqueue(request("b", Priority::Urgent));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }

    // =========================================================================
    // Priority and request helpers
    // =========================================================================

    #[test]
    fn priority_order_is_urgent_high_medium_low() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn only_urgent_and_high_are_immediate() {
        assert!(Priority::Urgent.is_immediate());
        assert!(Priority::High.is_immediate());
        assert!(!Priority::Medium.is_immediate());
        assert!(!Priority::Low.is_immediate());
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert_eq!(" low ".parse::<Priority>().unwrap(), Priority::Low);
        let err = "asap".parse::<Priority>().unwrap_err();
        assert!(err.to_string().contains("asap"));
    }

    #[test]
    fn validate_rejects_missing_endpoints() {
        let req = HandoffRequest::new("", "b", Priority::Low, ActivationContext::default());
        assert!(req.validate().is_err());
        let req = HandoffRequest::new("a", " ", Priority::Low, ActivationContext::default());
        assert!(req.validate().is_err());
        assert!(request("b", Priority::Low).validate().is_ok());
    }

    #[test]
    fn from_instruction_defaults_reason_to_origin() {
        let instr = HandoffInstruction::new("james-frontend", Priority::High).unwrap();
        let req = HandoffRequest::from_instruction("maria-qa", &instr, ActivationContext::default());
        assert_eq!(req.from_worker, "maria-qa");
        assert_eq!(req.to_worker, "james-frontend");
        assert_eq!(req.priority, Priority::High);
        assert_eq!(req.reason, "requested by maria-qa");

        let instr = instr.with_reason("visual regression");
        let req = HandoffRequest::from_instruction("maria-qa", &instr, ActivationContext::default());
        assert_eq!(req.reason, "visual regression");
    }
}
