//! Batch coordinator.
//!
//! A [`BatchRun`] walks its files strictly in order. For each file it puts one
//! task per destination on the [`TaskBoard`], runs them all concurrently, and
//! waits for every one of them to settle before touching the next file. The
//! run is driven from a single spawned future; callers interact with it only
//! through a [`BatchHandle`].

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::completion::CompletionEmitter;
use super::controller::PauseController;
use super::destination::{AdapterResolver, TransferRequest};
use super::error::FailureKind;
use super::models::{CompletedFileRecord, Destination, DestinationId, FileItem};
use super::notifications::{BatchEvent, Notifier};
use super::progress::{BoardSnapshot, TaskBoard};
use super::store::RecordStore;
use crate::config::AppConfig;

/// Timeouts applied inside a batch run.
#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    /// Upper bound for a single adapter call.
    pub transfer_timeout: Duration,
    /// How long a cancelled adapter gets to clean up before its call is dropped.
    pub abort_grace: Duration,
    pub record_write_timeout: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_secs(120),
            abort_grace: Duration::from_secs(5),
            record_write_timeout: Duration::from_secs(10),
        }
    }
}

impl BatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            transfer_timeout: Duration::from_secs(config.transfer_timeout_secs),
            abort_grace: Duration::from_secs(config.abort_grace_secs),
            record_write_timeout: Duration::from_secs(config.record_write_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Running,
    Paused,
    Finished,
    TornDown,
}

impl BatchState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Finished | Self::TornDown)
    }
}

/// Collaborators a batch run needs.
#[derive(Clone)]
pub struct BatchDeps {
    pub resolver: Arc<dyn AdapterResolver>,
    pub store: Arc<dyn RecordStore>,
    pub notifier: Notifier,
    pub settings: BatchSettings,
}

struct Shared {
    id: String,
    started_at: DateTime<Utc>,
    destinations: Vec<DestinationId>,
    board: TaskBoard,
    controller: PauseController,
    shutdown: CancellationToken,
    records: RwLock<Vec<CompletedFileRecord>>,
    state_tx: watch::Sender<BatchState>,
    notifier: Notifier,
}

/// One pass over a submitted file list. Never reused.
pub struct BatchRun {
    files: Vec<FileItem>,
    destinations: Vec<Destination>,
    deps: BatchDeps,
    emitter: CompletionEmitter,
    shared: Arc<Shared>,
}

/// Final tally of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub id: String,
    pub state: BatchState,
    pub files_total: usize,
    pub files_processed: usize,
    /// Files that reached at least one destination.
    pub files_uploaded: usize,
    pub records: Vec<CompletedFileRecord>,
}

impl BatchRun {
    pub fn new(files: Vec<FileItem>, destinations: Vec<Destination>, deps: BatchDeps) -> Self {
        let shutdown = CancellationToken::new();
        let (state_tx, _) = watch::channel(BatchState::Running);
        let emitter = CompletionEmitter::new(Arc::clone(&deps.store), deps.settings.record_write_timeout);

        let shared = Arc::new(Shared {
            id: Uuid::now_v7().to_string(),
            started_at: Utc::now(),
            destinations: destinations.iter().map(|d| d.id.clone()).collect(),
            board: TaskBoard::new(files.len()),
            controller: PauseController::new(shutdown.clone()),
            shutdown,
            records: RwLock::new(Vec::new()),
            state_tx,
            notifier: deps.notifier.clone(),
        });

        Self {
            files,
            destinations,
            deps,
            emitter,
            shared,
        }
    }

    pub fn handle(&self) -> BatchHandle {
        BatchHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> (BatchHandle, JoinHandle<BatchReport>) {
        let handle = self.handle();
        let span = info_span!("batch", id = %self.shared.id);
        let join = tokio::spawn(self.run().instrument(span));
        (handle, join)
    }

    pub async fn run(self) -> BatchReport {
        let shared = Arc::clone(&self.shared);
        let _guard = EndGuard(Arc::clone(&shared));
        let files_total = self.files.len();
        let mut files_processed = 0;
        let mut files_uploaded = 0;
        let mut last_stamp = None;

        info!(
            files = files_total,
            destinations = self.destinations.len(),
            "Batch started"
        );

        for (index, file) in self.files.iter().enumerate() {
            let Some(cohort) = self.next_cohort_token().await else {
                info!(remaining = files_total - index, "Batch torn down before all files were attempted");
                break;
            };

            let span = info_span!("file", name = %file.name, index);
            let started = Instant::now();
            let stamp = cohort_stamp(last_stamp, Utc::now());
            last_stamp = Some(stamp);

            self.run_cohort(file, stamp, cohort).instrument(span.clone()).await;

            let tasks = shared.board.end_cohort().await;
            let completion = self
                .emitter
                .emit(index, file, &tasks, started.elapsed())
                .instrument(span)
                .await;

            files_processed += 1;
            if !completion.records.is_empty() {
                files_uploaded += 1;
            }

            let succeeded = completion.entry.succeeded();
            let failed = completion.entry.failed();
            shared.records.write().await.extend(completion.records);

            info!(file = %file.name, succeeded, failed, "File processed");
            shared
                .notifier
                .dispatch(BatchEvent::FileSettled {
                    file_name: file.name.clone(),
                    succeeded,
                    failed,
                })
                .await;
        }

        let torn_down = shared.shutdown.is_cancelled();

        if !torn_down {
            self.remember_selection().await;
            shared
                .notifier
                .dispatch(BatchEvent::BatchFinished {
                    files: files_total,
                    files_uploaded,
                })
                .await;
        }

        let state = if torn_down {
            BatchState::TornDown
        } else {
            BatchState::Finished
        };
        shared.state_tx.send_replace(state);

        info!(
            files_processed,
            files_uploaded,
            state = ?state,
            "Batch ended"
        );

        BatchReport {
            id: shared.id.clone(),
            state,
            files_total,
            files_processed,
            files_uploaded,
            records: shared.records.read().await.clone(),
        }
    }

    /// Wait out a pause. `None` once the batch has been torn down.
    async fn next_cohort_token(&self) -> Option<CancellationToken> {
        let shared = &self.shared;
        loop {
            if shared.shutdown.is_cancelled() {
                return None;
            }
            if let Some(token) = shared.controller.cohort_token() {
                return Some(token);
            }

            debug!("Paused, waiting before next file");
            tokio::select! {
                _ = shared.controller.wait_until_resumed() => {}
                _ = shared.shutdown.cancelled() => {}
            }
        }
    }

    async fn run_cohort(&self, file: &FileItem, started_at: DateTime<Utc>, cohort: CancellationToken) {
        let board = &self.shared.board;
        board.begin_cohort(&file.name, &self.destinations).await;

        let mut tasks = JoinSet::new();
        for (index, destination) in self.destinations.iter().enumerate() {
            let runner = TaskRunner {
                index,
                board: board.clone(),
                resolver: Arc::clone(&self.deps.resolver),
                settings: self.deps.settings,
                cohort: cohort.clone(),
                request: TransferRequest {
                    file: file.clone(),
                    destination: destination.clone(),
                    started_at,
                },
            };
            let span = info_span!("task", destination = %destination.id);
            tasks.spawn(runner.run().instrument(span));
        }

        // A task that panics never reaches a terminal state on the board; the
        // completion emitter records it as failed.
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Transfer task aborted");
            }
        }
    }

    // Best-effort, like the upload log.
    async fn remember_selection(&self) {
        let save = self.deps.store.save_last_selection(&self.shared.destinations);
        match tokio::time::timeout(self.deps.settings.record_write_timeout, save).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to remember destination selection"),
            Err(_) => warn!("Saving destination selection timed out"),
        }
    }
}

/// Marks the batch torn down if the run ends without settling its state,
/// i.e. it panicked or its future was dropped.
struct EndGuard(Arc<Shared>);

impl Drop for EndGuard {
    fn drop(&mut self) {
        let shared = &self.0;
        let changed = shared.state_tx.send_if_modified(|state| {
            if state.is_done() {
                return false;
            }
            *state = BatchState::TornDown;
            true
        });

        if changed {
            shared.shutdown.cancel();
            error!(batch = %shared.id, "Batch run ended abnormally");
        }
    }
}

/// Start time for the next cohort, at least one millisecond after the previous one.
fn cohort_stamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now.timestamp_millis() <= prev.timestamp_millis() => prev + TimeDelta::milliseconds(1),
        _ => now,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    TimedOut,
    Interrupted,
}

/// Drives one (file, destination) transfer and records its fate on the board.
struct TaskRunner {
    index: usize,
    board: TaskBoard,
    resolver: Arc<dyn AdapterResolver>,
    settings: BatchSettings,
    cohort: CancellationToken,
    request: TransferRequest,
}

impl TaskRunner {
    async fn run(self) {
        let Self {
            index,
            board,
            resolver,
            settings,
            cohort,
            request,
        } = self;

        let adapter = match resolver.resolve(&request.destination) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(error = %e, "Destination rejected");
                board.fail(index, e.kind()).await;
                return;
            }
        };

        if cohort.is_cancelled() {
            board.fail(index, FailureKind::Cancelled).await;
            return;
        }
        board.start(index).await;

        let task_token = cohort.child_token();
        let (progress_tx, mut progress_rx) = mpsc::channel(32);
        let mut call = adapter.transfer(&request, progress_tx, task_token.clone());

        let deadline = tokio::time::sleep(settings.transfer_timeout);
        tokio::pin!(deadline);
        let mut phase = Phase::Running;

        let result = loop {
            tokio::select! {
                biased;

                result = &mut call => break Some(result),

                Some(progress) = progress_rx.recv() => {
                    board.progress(index, progress.percentage()).await;
                }

                _ = cohort.cancelled(), if phase == Phase::Running => {
                    phase = Phase::Interrupted;
                    board.pause(index).await;
                    deadline.as_mut().reset(tokio::time::Instant::now() + settings.abort_grace);
                }

                _ = &mut deadline => {
                    if phase != Phase::Running {
                        break None;
                    }
                    phase = Phase::TimedOut;
                    task_token.cancel();
                    deadline.as_mut().reset(tokio::time::Instant::now() + settings.abort_grace);
                }
            }
        };

        let kind = match result {
            Some(Ok(receipt)) => {
                info!("Transfer complete");
                board.succeed(index, receipt.remote_url).await;
                return;
            }
            Some(Err(e)) => {
                let kind = classify(phase, e.kind());
                warn!(error = %e, kind = ?kind, "Transfer failed");
                kind
            }
            None => {
                let kind = classify(phase, FailureKind::Transport);
                warn!(kind = ?kind, "Adapter did not stop within the abort grace period");
                kind
            }
        };

        board.fail(index, kind).await;
    }
}

/// Supervisor decisions win over whatever the adapter reported.
fn classify(phase: Phase, reported: FailureKind) -> FailureKind {
    match phase {
        Phase::TimedOut => FailureKind::TimedOut,
        Phase::Interrupted => FailureKind::Cancelled,
        Phase::Running => reported,
    }
}

/// Point-in-time view of a batch for the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub id: String,
    pub state: BatchState,
    pub started_at: DateTime<Utc>,
    pub board: BoardSnapshot,
    pub completed: usize,
    pub archive_ready: bool,
}

/// Caller-side control surface of a running batch.
#[derive(Clone)]
pub struct BatchHandle {
    shared: Arc<Shared>,
}

impl BatchHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> BatchState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchState> {
        self.shared.state_tx.subscribe()
    }

    /// Stop every in-flight transfer and hold the next file. Returns false if
    /// the batch was already paused or is over.
    pub async fn pause(&self) -> bool {
        if self.state().is_done() || !self.shared.controller.pause() {
            return false;
        }

        self.shared.state_tx.send_if_modified(|state| {
            if *state == BatchState::Running {
                *state = BatchState::Paused;
                true
            } else {
                false
            }
        });

        info!(batch = %self.shared.id, "Batch paused");
        self.shared.notifier.dispatch(BatchEvent::Paused).await;
        true
    }

    /// Let the coordinator move on to files not yet attempted.
    pub async fn resume(&self) -> bool {
        if !self.shared.controller.resume() {
            return false;
        }

        let relabelled = self.shared.board.relabel_resumed().await;
        self.shared.state_tx.send_if_modified(|state| {
            if *state == BatchState::Paused {
                *state = BatchState::Running;
                true
            } else {
                false
            }
        });

        info!(batch = %self.shared.id, relabelled, "Batch resumed");
        self.shared.notifier.dispatch(BatchEvent::Resumed).await;
        true
    }

    /// Cancel everything and stop after the current cohort settles.
    pub fn teardown(&self) {
        info!(batch = %self.shared.id, "Batch teardown requested");
        self.shared.shutdown.cancel();
    }

    /// Wait until the run has ended.
    pub async fn wait(&self) -> BatchState {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| state.is_done()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub async fn completed_records(&self) -> Vec<CompletedFileRecord> {
        self.shared.records.read().await.clone()
    }

    /// True once the run is over and at least one file reached a destination.
    pub async fn archive_ready(&self) -> bool {
        self.state().is_done() && !self.shared.records.read().await.is_empty()
    }

    pub async fn status(&self) -> BatchStatus {
        BatchStatus {
            id: self.shared.id.clone(),
            state: self.state(),
            started_at: self.shared.started_at,
            board: self.shared.board.snapshot().await,
            completed: self.shared.records.read().await.len(),
            archive_ready: self.archive_ready().await,
        }
    }

    pub async fn live_task_count(&self) -> usize {
        self.shared.board.live_count().await
    }
}
