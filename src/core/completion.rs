use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::TEXT_TRANSFER_FAILED;
use super::models::{
    CompletedFileRecord, DestinationOutcome, FileItem, OutcomeStatus, UploadLogEntry,
};
use super::store::RecordStore;
use super::task::TransferTask;

/// What a settled cohort leaves behind.
#[derive(Debug, Clone)]
pub struct CohortCompletion {
    pub entry: UploadLogEntry,
    pub records: Vec<CompletedFileRecord>,
}

/// Turns a settled cohort into an upload log entry and the records that feed
/// archive packaging.
pub struct CompletionEmitter {
    store: Arc<dyn RecordStore>,
    write_timeout: Duration,
}

impl CompletionEmitter {
    pub fn new(store: Arc<dyn RecordStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
        }
    }

    /// Build the completion for the `index`-th file and hand its log entry to the store.
    pub async fn emit(
        &self,
        index: usize,
        file: &FileItem,
        tasks: &[TransferTask],
        elapsed: Duration,
    ) -> CohortCompletion {
        let completion = build_completion(index, file, tasks, elapsed);

        // Best-effort; failures are only logged.
        match tokio::time::timeout(self.write_timeout, self.store.create_upload_log(&completion.entry)).await {
            Ok(Ok(stored)) => debug!(log_id = %stored.id, file = %file.name, "Upload log written"),
            Ok(Err(e)) => warn!(file = %file.name, error = %e, "Failed to write upload log"),
            Err(_) => warn!(file = %file.name, "Upload log write timed out"),
        }

        completion
    }
}

/// Pure part of the emitter: one outcome per task, one record per success.
pub fn build_completion(index: usize, file: &FileItem, tasks: &[TransferTask], elapsed: Duration) -> CohortCompletion {
    let results: Vec<DestinationOutcome> = tasks
        .iter()
        .map(|task| task.outcome().unwrap_or_else(|| unsettled(task)))
        .collect();

    let records = results
        .iter()
        .filter(|outcome| outcome.status == OutcomeStatus::Succeeded)
        .filter_map(|outcome| {
            outcome.url.as_ref().map(|url| CompletedFileRecord {
                file_index: index,
                file_name: file.name.clone(),
                remote_url: url.clone(),
                destination: outcome.destination.clone(),
            })
        })
        .collect();

    let entry = UploadLogEntry {
        file_name: file.name.clone(),
        file_size: file.size,
        file_type: file.content_type.clone(),
        destinations: tasks.iter().map(|t| t.destination.clone()).collect(),
        results,
        duration_ms: elapsed.as_millis() as u64,
    };

    CohortCompletion { entry, records }
}

// A task that never settled still has to appear in the log for its destination.
fn unsettled(task: &TransferTask) -> DestinationOutcome {
    DestinationOutcome {
        destination: task.destination.clone(),
        destination_name: task.destination_name.clone(),
        status: OutcomeStatus::Failed,
        url: None,
        error: Some(TEXT_TRANSFER_FAILED.to_string()),
    }
}
