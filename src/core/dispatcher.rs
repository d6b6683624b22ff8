use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::archive::{ArchiveBundle, ArchivePackager};
use super::destination::AdapterResolver;
use super::error::{ArchiveError, SubmitError};
use super::models::{Destination, DestinationId, FileItem};
use super::notifications::Notifier;
use super::orchestrator::{BatchDeps, BatchHandle, BatchRun, BatchSettings};
use super::store::RecordStore;
use super::validator::{Rejection, Validator};

/// An accepted submission.
pub struct Submission {
    pub handle: BatchHandle,
    pub accepted: usize,
    pub rejected: Vec<Rejection>,
}

/// Front door for batch runs: at most one runs at a time, and the archive
/// can only be built from the last run once it is over.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn AdapterResolver>,
    notifier: Notifier,
    validator: Validator,
    settings: BatchSettings,
    packager: ArchivePackager,
    builtin_name: String,
    current: Mutex<Option<BatchHandle>>,
}

impl Dispatcher {
    pub fn new(
        deps: BatchDeps,
        validator: Validator,
        packager: ArchivePackager,
        builtin_name: impl Into<String>,
    ) -> Self {
        Self {
            store: deps.store,
            resolver: deps.resolver,
            notifier: deps.notifier,
            validator,
            settings: deps.settings,
            packager,
            builtin_name: builtin_name.into(),
            current: Mutex::new(None),
        }
    }

    pub fn builtin_destination(&self) -> Destination {
        Destination::builtin(self.builtin_name.clone())
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// The running batch, or the last one if none is running.
    pub async fn current(&self) -> Option<BatchHandle> {
        self.current.lock().await.clone()
    }

    pub async fn submit(
        &self,
        files: Vec<FileItem>,
        destination_ids: Vec<DestinationId>,
    ) -> Result<Submission, SubmitError> {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|h| !h.state().is_done()) {
            return Err(SubmitError::BatchRunning);
        }

        let destinations = self.resolve_destinations(destination_ids).await?;

        let report = self.validator.validate_batch(files);
        if report.accepted.is_empty() {
            return Err(SubmitError::NoFiles(report.rejected));
        }

        let accepted = report.accepted.len();
        let deps = BatchDeps {
            resolver: Arc::clone(&self.resolver),
            store: Arc::clone(&self.store),
            notifier: self.notifier.clone(),
            settings: self.settings,
        };
        let (handle, join) = BatchRun::new(report.accepted, destinations, deps).spawn();
        let batch_id = handle.id().to_string();
        tokio::spawn(async move {
            if let Err(e) = join.await {
                error!(batch = %batch_id, error = %e, "Batch run task failed");
            }
        });

        info!(
            batch = %handle.id(),
            accepted,
            rejected = report.rejected.len(),
            "Batch submitted"
        );

        *current = Some(handle.clone());
        Ok(Submission {
            handle,
            accepted,
            rejected: report.rejected,
        })
    }

    /// Look up every selected destination. Duplicates are dropped, order is kept.
    pub async fn resolve_destinations(&self, ids: Vec<DestinationId>) -> Result<Vec<Destination>, SubmitError> {
        if ids.is_empty() {
            return Err(SubmitError::NoDestinations);
        }

        let mut destinations: Vec<Destination> = Vec::with_capacity(ids.len());
        for id in ids {
            if destinations.iter().any(|d| d.id == id) {
                continue;
            }

            if id.is_builtin() {
                destinations.push(self.builtin_destination());
                continue;
            }

            match self.store.get_destination(&id).await.map_err(SubmitError::Store)? {
                Some(destination) if destination.active => destinations.push(destination),
                _ => return Err(SubmitError::UnknownDestination(id)),
            }
        }

        Ok(destinations)
    }

    /// Build an archive from the last batch's successful uploads.
    pub async fn build_archive(&self) -> Result<ArchiveBundle, ArchiveError> {
        let Some(handle) = self.current().await else {
            return Err(ArchiveError::NothingToPackage);
        };
        if !handle.state().is_done() {
            return Err(ArchiveError::BatchRunning);
        }

        let records = handle.completed_records().await;
        self.packager.package(&records).await
    }
}
