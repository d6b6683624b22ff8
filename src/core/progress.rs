//! Live task state for a batch run, and the summaries derived from it.
//!
//! The board holds exactly one cohort at a time: it is filled with one task
//! per selected destination when a file starts and emptied when that file's
//! cohort settles. Progress ticks land here at high frequency and are not
//! persisted; only the settled outcome goes to the record store.
//!
//! Only the batch coordinator writes to the board. Everything else reads
//! snapshots.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::FailureKind;
use super::models::Destination;
use super::task::{TaskStatus, TaskSummary, TransferTask};

#[derive(Default)]
struct BoardState {
    current_file: Option<String>,
    tasks: Vec<TransferTask>,
    files_total: usize,
    files_processed: usize,
}

/// Per-batch store of live transfer tasks, shared by handle.
#[derive(Clone, Default)]
pub struct TaskBoard {
    inner: Arc<RwLock<BoardState>>,
}

impl TaskBoard {
    pub fn new(files_total: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BoardState {
                files_total,
                ..Default::default()
            })),
        }
    }

    /// Replace the board contents with a fresh `Pending` task per destination.
    pub async fn begin_cohort(&self, file_name: &str, destinations: &[Destination]) {
        let mut state = self.inner.write().await;
        state.current_file = Some(file_name.to_string());
        state.tasks = destinations
            .iter()
            .map(|d| TransferTask::new(d.id.clone(), d.name.clone()))
            .collect();
    }

    /// Take the settled cohort off the board.
    pub async fn end_cohort(&self) -> Vec<TransferTask> {
        let mut state = self.inner.write().await;
        state.current_file = None;
        state.files_processed += 1;
        std::mem::take(&mut state.tasks)
    }

    async fn with_task(&self, index: usize, f: impl FnOnce(&mut TransferTask) -> bool) -> bool {
        let mut state = self.inner.write().await;
        state.tasks.get_mut(index).map(f).unwrap_or(false)
    }

    pub async fn start(&self, index: usize) -> bool {
        self.with_task(index, |t| t.start()).await
    }

    pub async fn progress(&self, index: usize, percentage: u8) -> bool {
        self.with_task(index, |t| t.record_progress(percentage)).await
    }

    pub async fn pause(&self, index: usize) -> bool {
        self.with_task(index, |t| t.pause()).await
    }

    pub async fn succeed(&self, index: usize, remote_url: String) -> bool {
        self.with_task(index, |t| t.succeed(remote_url)).await
    }

    pub async fn fail(&self, index: usize, kind: FailureKind) -> bool {
        self.with_task(index, |t| t.fail(kind)).await
    }

    /// Flip every `Paused` label back to `InProgress`. Returns how many changed.
    pub async fn relabel_resumed(&self) -> usize {
        let mut state = self.inner.write().await;
        state.tasks.iter_mut().map(|t| t.resume()).filter(|changed| *changed).count()
    }

    /// Number of tasks currently on the board.
    pub async fn live_count(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn snapshot(&self) -> BoardSnapshot {
        let state = self.inner.read().await;
        let tasks: Vec<TaskSummary> = state.tasks.iter().map(|t| t.summary()).collect();
        let summary = ProgressSummary::from_tasks(&tasks);

        BoardSnapshot {
            current_file: state.current_file.clone(),
            files_total: state.files_total,
            files_processed: state.files_processed,
            tasks,
            summary,
        }
    }
}

/// Point-in-time copy of the board for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub current_file: Option<String>,
    pub files_total: usize,
    pub files_processed: usize,
    pub tasks: Vec<TaskSummary>,
    pub summary: ProgressSummary,
}

/// Counts by status plus an overall percentage for one cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub paused: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Mean task progress; failed tasks count as zero.
    pub percentage: u8,
}

impl ProgressSummary {
    pub fn from_tasks(tasks: &[TaskSummary]) -> Self {
        let mut summary = Self {
            total: tasks.len(),
            ..Default::default()
        };

        let mut progress_sum: u32 = 0;
        for task in tasks {
            match task.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::InProgress => summary.in_progress += 1,
                TaskStatus::Paused => summary.paused += 1,
                TaskStatus::Succeeded => summary.succeeded += 1,
                TaskStatus::Failed => summary.failed += 1,
            }
            progress_sum += task.progress as u32;
        }

        if !tasks.is_empty() {
            summary.percentage = (progress_sum / tasks.len() as u32) as u8;
        }

        summary
    }

    /// All tasks have reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.total > 0 && self.succeeded + self.failed == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::DestinationId;

    fn destinations() -> Vec<Destination> {
        vec![
            Destination::builtin("Built-in store"),
            Destination {
                id: DestinationId::new("acc-2"),
                name: "Archive".into(),
                kind: crate::core::models::DestinationKind::BuiltIn,
                active: true,
                created_at: None,
            },
        ]
    }

    #[tokio::test]
    async fn cohort_lifecycle_fills_and_empties_board() {
        let board = TaskBoard::new(3);
        assert_eq!(board.live_count().await, 0);

        board.begin_cohort("a.txt", &destinations()).await;
        assert_eq!(board.live_count().await, 2);

        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.current_file.as_deref(), Some("a.txt"));
        assert_eq!(snapshot.summary.pending, 2);

        let drained = board.end_cohort().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(board.live_count().await, 0);

        let snapshot = board.snapshot().await;
        assert_eq!(snapshot.files_processed, 1);
        assert_eq!(snapshot.files_total, 3);
        assert!(snapshot.current_file.is_none());
    }

    #[tokio::test]
    async fn updates_respect_state_machine() {
        let board = TaskBoard::new(1);
        board.begin_cohort("a.txt", &destinations()).await;

        assert!(board.start(0).await);
        assert!(board.progress(0, 30).await);
        assert!(!board.progress(0, 10).await);
        assert!(board.pause(0).await);
        assert_eq!(board.relabel_resumed().await, 1);
        assert!(board.succeed(0, "u".into()).await);
        assert!(!board.fail(0, FailureKind::Cancelled).await);

        assert!(board.fail(1, FailureKind::Configuration).await);
        assert!(!board.start(7).await);

        let summary = board.snapshot().await.summary;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.percentage, 50);
        assert!(summary.is_settled());
    }

    #[tokio::test]
    async fn relabel_only_touches_paused_tasks() {
        let board = TaskBoard::new(1);
        board.begin_cohort("a.txt", &destinations()).await;

        board.start(0).await;
        board.start(1).await;
        board.pause(0).await;

        assert_eq!(board.relabel_resumed().await, 1);
        assert_eq!(board.relabel_resumed().await, 0);

        let tasks = board.snapshot().await.tasks;
        assert!(tasks.iter().all(|t| t.status == TaskStatus::InProgress));
    }

    #[test]
    fn summary_counts_each_status() {
        let mk = |status, progress| TaskSummary {
            destination: DestinationId::new("x"),
            destination_name: "x".into(),
            status,
            progress,
            error: None,
        };
        let tasks = vec![
            mk(TaskStatus::Pending, 0),
            mk(TaskStatus::InProgress, 50),
            mk(TaskStatus::Paused, 20),
            mk(TaskStatus::Succeeded, 100),
            mk(TaskStatus::Failed, 0),
        ];
        let s = ProgressSummary::from_tasks(&tasks);
        assert_eq!(
            (s.total, s.pending, s.in_progress, s.paused, s.succeeded, s.failed),
            (5, 1, 1, 1, 1, 1)
        );
        assert_eq!(s.percentage, 34);
        assert!(!s.is_settled());
        assert_eq!(ProgressSummary::from_tasks(&[]).percentage, 0);
    }
}
