//! Error taxonomy for the upload engine.
//!
//! Every error that can end up in front of a user is reduced to a short,
//! fixed phrase. Raw provider/transport messages are carried only for local
//! logging and never cross into task state, notices or RPC responses.

use serde::{Deserialize, Serialize};

use super::models::DestinationId;
use super::validator::Rejection;

/// Display text for a failed transfer.
pub const TEXT_TRANSFER_FAILED: &str = "transfer failed";
/// Display text for a destination that could not be reached or is misconfigured.
pub const TEXT_DESTINATION_UNREACHABLE: &str = "destination unreachable";
/// Display text for a transfer stopped by pause or teardown.
pub const TEXT_CANCELLED: &str = "cancelled";

/// Classification of a failed transfer task.
///
/// Several kinds share the same display text; the distinction exists for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Unreachable,
    Transport,
    TimedOut,
    Cancelled,
}

impl FailureKind {
    /// The user-facing summary for this failure.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Configuration | Self::Unreachable => TEXT_DESTINATION_UNREACHABLE,
            Self::Transport | Self::TimedOut => TEXT_TRANSFER_FAILED,
            Self::Cancelled => TEXT_CANCELLED,
        }
    }
}

/// Errors raised by destination adapters and their construction.
///
/// The `String` payloads are diagnostic detail for logs only.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("destination configuration rejected: {0}")]
    Configuration(String),

    #[error("destination unreachable: {0}")]
    Unreachable(String),

    #[error("transfer failed: {0}")]
    Transport(String),

    #[error("transfer timed out")]
    TimedOut,

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Configuration(_) => FailureKind::Configuration,
            Self::Unreachable(_) => FailureKind::Unreachable,
            Self::Transport(_) => FailureKind::Transport,
            Self::TimedOut => FailureKind::TimedOut,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Errors from building a download archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("no uploaded files to package")]
    NothingToPackage,

    #[error("uploads are still running")]
    BatchRunning,

    #[error("could not fetch any of the {attempted} uploaded files")]
    AllFetchesFailed { attempted: usize },

    #[error("failed to build archive")]
    Build(String),
}

/// Reasons a batch submission is refused before any transfer starts.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("select at least one destination")]
    NoDestinations,

    /// Nothing left to upload; carries the validator's reasons, if any.
    #[error("no files to upload")]
    NoFiles(Vec<Rejection>),

    #[error("wait for the current upload to finish")]
    BatchRunning,

    #[error("unknown or inactive destination: {0}")]
    UnknownDestination(DestinationId),

    #[error("failed to load destinations")]
    Store(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinct_from_transport_failure() {
        assert_ne!(FailureKind::Cancelled, FailureKind::Transport);
        assert_eq!(TransferError::Cancelled.kind().summary(), "cancelled");
        assert_eq!(
            TransferError::Transport("socket closed by 10.0.0.4".into())
                .kind()
                .summary(),
            "transfer failed"
        );
    }

    #[test]
    fn summaries_never_include_diagnostics() {
        let err = TransferError::Unreachable("dns error for AKIA1234 at host".into());
        assert_eq!(err.kind().summary(), "destination unreachable");
        assert_eq!(TransferError::TimedOut.kind().summary(), "transfer failed");
        assert_eq!(
            TransferError::Configuration("bad endpoint".into())
                .kind()
                .summary(),
            "destination unreachable"
        );
    }
}
