pub mod archive;
pub mod completion;
pub mod controller;
pub mod destination;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod history;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod progress;
pub mod sanitize;
pub mod store;
pub mod task;
pub mod validator;

pub use archive::{ARCHIVE_NOT_ENCRYPTED_NOTICE, ArchiveBundle, ArchivePackager, ContentFetcher, HttpFetcher};
pub use controller::PauseController;
pub use destination::{AdapterResolver, DestinationAdapter, TransferProgress, TransferReceipt, TransferRequest};
pub use dispatcher::{Dispatcher, Submission};
pub use endpoint::EndpointPolicy;
pub use error::{ArchiveError, FailureKind, SubmitError, TransferError};
pub use models::{
    CompletedFileRecord, Destination, DestinationId, DestinationKind, ExternalAccount, FileItem, UploadLogEntry,
};
pub use orchestrator::{BatchDeps, BatchHandle, BatchReport, BatchRun, BatchSettings, BatchState, BatchStatus};
pub use progress::{BoardSnapshot, ProgressSummary, TaskBoard};
pub use store::RecordStore;
pub use task::{TaskStatus, TaskSummary, TransferTask};
pub use validator::{ValidationError, Validator};
