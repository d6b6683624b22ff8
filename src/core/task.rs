//! Transfer task state machine.
//!
//! ```text
//! Pending ──start──▶ InProgress ──succeed──▶ Succeeded
//!    │                 │    ▲
//!    │               pause  resume
//!    │                 ▼    │
//!    │                 Paused ──(adapter returns)──▶ Succeeded | Failed
//!    └──reject (configuration)──────────────────────▶ Failed
//! ```
//!
//! `Succeeded` and `Failed` are terminal: every transition out of them is refused.

use serde::{Deserialize, Serialize};

use super::error::FailureKind;
use super::models::{DestinationId, DestinationOutcome, OutcomeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Paused,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Still occupying a transfer slot (started but not settled).
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }
}

/// One (file, destination) pairing.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub destination: DestinationId,
    pub destination_name: String,
    status: TaskStatus,
    progress: u8,
    remote_url: Option<String>,
    failure: Option<FailureKind>,
}

impl TransferTask {
    pub fn new(destination: DestinationId, destination_name: impl Into<String>) -> Self {
        Self {
            destination,
            destination_name: destination_name.into(),
            status: TaskStatus::Pending,
            progress: 0,
            remote_url: None,
            failure: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Display text for a failed task, drawn from the fixed vocabulary.
    pub fn error_text(&self) -> Option<&'static str> {
        self.failure.map(|kind| kind.summary())
    }

    /// `Pending → InProgress`.
    pub fn start(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::InProgress;
        true
    }

    /// Record adapter progress. Values never move backwards and are capped at 100.
    pub fn record_progress(&mut self, percentage: u8) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        let percentage = percentage.min(100);
        if percentage <= self.progress {
            return false;
        }
        self.progress = percentage;
        true
    }

    /// `InProgress → Paused`. Label only; progress is untouched.
    pub fn pause(&mut self) -> bool {
        if self.status != TaskStatus::InProgress {
            return false;
        }
        self.status = TaskStatus::Paused;
        true
    }

    /// `Paused → InProgress`.
    pub fn resume(&mut self) -> bool {
        if self.status != TaskStatus::Paused {
            return false;
        }
        self.status = TaskStatus::InProgress;
        true
    }

    /// `InProgress | Paused → Succeeded`, forcing progress to 100.
    pub fn succeed(&mut self, remote_url: String) -> bool {
        if !self.status.is_in_flight() {
            return false;
        }
        self.status = TaskStatus::Succeeded;
        self.progress = 100;
        self.remote_url = Some(remote_url);
        true
    }

    /// `Pending | InProgress | Paused → Failed`, resetting progress.
    ///
    /// `Pending` is only left this way when the destination was rejected
    /// before any I/O was attempted.
    pub fn fail(&mut self, kind: FailureKind) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.progress = 0;
        self.failure = Some(kind);
        true
    }

    /// Outcome record for a settled task.
    pub fn outcome(&self) -> Option<DestinationOutcome> {
        let status = match self.status {
            TaskStatus::Succeeded => OutcomeStatus::Succeeded,
            TaskStatus::Failed => OutcomeStatus::Failed,
            _ => return None,
        };

        Some(DestinationOutcome {
            destination: self.destination.clone(),
            destination_name: self.destination_name.clone(),
            status,
            url: self.remote_url.clone(),
            error: self.error_text().map(str::to_string),
        })
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            destination: self.destination.clone(),
            destination_name: self.destination_name.clone(),
            status: self.status,
            progress: self.progress,
            error: self.error_text().map(str::to_string),
        }
    }
}

/// Read-only view of a task for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub destination: DestinationId,
    pub destination_name: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TransferTask {
        TransferTask::new(DestinationId::new("acc-1"), "Office")
    }

    #[test]
    fn happy_path() {
        let mut t = task();
        assert_eq!(t.status(), TaskStatus::Pending);
        assert!(t.start());
        assert!(t.record_progress(40));
        assert!(t.succeed("https://x/y".into()));
        assert_eq!(t.status(), TaskStatus::Succeeded);
        assert_eq!(t.progress(), 100);
        assert_eq!(t.remote_url(), Some("https://x/y"));
        assert!(t.error_text().is_none());
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut t = task();
        t.start();
        assert!(t.record_progress(60));
        assert!(!t.record_progress(30));
        assert_eq!(t.progress(), 60);
        assert!(t.record_progress(250));
        assert_eq!(t.progress(), 100);
    }

    #[test]
    fn progress_ignored_outside_in_progress() {
        let mut t = task();
        assert!(!t.record_progress(10));
        t.start();
        t.pause();
        assert!(!t.record_progress(10));
        assert_eq!(t.progress(), 0);
    }

    #[test]
    fn failure_resets_progress_and_records_vocabulary() {
        let mut t = task();
        t.start();
        t.record_progress(80);
        assert!(t.fail(FailureKind::Transport));
        assert_eq!(t.progress(), 0);
        assert_eq!(t.error_text(), Some("transfer failed"));
    }

    #[test]
    fn pause_overlay_keeps_progress() {
        let mut t = task();
        t.start();
        t.record_progress(45);
        assert!(t.pause());
        assert_eq!(t.status(), TaskStatus::Paused);
        assert_eq!(t.progress(), 45);
        assert!(t.resume());
        assert_eq!(t.status(), TaskStatus::InProgress);
        assert!(t.pause());
        assert!(t.fail(FailureKind::Cancelled));
        assert_eq!(t.error_text(), Some("cancelled"));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut t = task();
        t.start();
        t.succeed("u".into());
        assert!(!t.fail(FailureKind::Cancelled));
        assert!(!t.pause());
        assert!(!t.start());
        assert_eq!(t.status(), TaskStatus::Succeeded);

        let mut f = task();
        f.start();
        f.fail(FailureKind::Unreachable);
        assert!(!f.succeed("u".into()));
        assert!(!f.resume());
        assert_eq!(f.status(), TaskStatus::Failed);
    }

    #[test]
    fn configuration_rejection_skips_in_progress() {
        let mut t = task();
        assert!(t.fail(FailureKind::Configuration));
        assert_eq!(t.error_text(), Some("destination unreachable"));
        assert!(!t.succeed("u".into()));
    }

    #[test]
    fn outcome_only_for_settled_tasks() {
        let mut t = task();
        assert!(t.outcome().is_none());
        t.start();
        assert!(t.outcome().is_none());
        t.fail(FailureKind::TimedOut);
        let outcome = t.outcome().unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("transfer failed"));
        assert!(outcome.url.is_none());
    }
}
