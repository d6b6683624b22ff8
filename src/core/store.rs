use anyhow::Result;
use async_trait::async_trait;

use super::models::{Destination, DestinationId, NewDestination, StoredUploadLog, UploadLogEntry};

/// Persistent records kept outside the engine: destinations, upload logs and
/// the last destination selection.
///
/// The engine treats every write here as best-effort. A failing store never
/// changes a transfer outcome.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a validated external account and return it with its new id.
    async fn create_destination(&self, new: NewDestination) -> Result<Destination>;

    async fn get_destination(&self, id: &DestinationId) -> Result<Option<Destination>>;

    /// External accounts, newest first.
    async fn list_destinations(&self) -> Result<Vec<Destination>>;

    /// Overwrite a stored account. Returns false if it does not exist.
    async fn update_destination(&self, destination: &Destination) -> Result<bool>;

    async fn delete_destination(&self, id: &DestinationId) -> Result<bool>;

    async fn create_upload_log(&self, entry: &UploadLogEntry) -> Result<StoredUploadLog>;

    /// Upload logs, newest first.
    async fn list_upload_logs(&self, limit: usize) -> Result<Vec<StoredUploadLog>>;

    async fn delete_upload_log(&self, id: &str) -> Result<bool>;

    async fn save_last_selection(&self, ids: &[DestinationId]) -> Result<()>;

    /// Empty when nothing has been saved yet.
    async fn last_selection(&self) -> Result<Vec<DestinationId>>;
}
