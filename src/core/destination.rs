use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::TransferError;
use super::models::{Destination, FileItem};

/// Everything an adapter needs for one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub file: FileItem,
    pub destination: Destination,
    /// When this file's cohort started. Unique per file within a batch, so it
    /// keeps remote keys of same-named files apart.
    pub started_at: DateTime<Utc>,
}

/// Progress tick sent by an adapter while a transfer is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferProgress {
    /// Byte-accurate progress.
    Bytes { sent: u64, total: u64 },
    /// Coarse progress for destinations without byte callbacks.
    Percent(u8),
}

impl TransferProgress {
    pub fn percentage(&self) -> u8 {
        match *self {
            Self::Bytes { total: 0, .. } => 100,
            Self::Bytes { sent, total } => ((sent.min(total) as f64 / total as f64) * 100.0) as u8,
            Self::Percent(p) => p.min(100),
        }
    }
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub remote_url: String,
}

/// Uniform transfer primitive over every destination kind.
///
/// Implementations must observe `cancel`: once it fires, in-flight I/O is
/// aborted (not merely unobserved) and the call returns
/// [`TransferError::Cancelled`].
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    async fn transfer(
        &self,
        req: &TransferRequest,
        progress: mpsc::Sender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransferError>;
}

/// Picks the adapter for a destination.
///
/// Construction validates the destination; a rejected destination yields
/// [`TransferError::Configuration`] and no adapter is ever called.
pub trait AdapterResolver: Send + Sync {
    fn resolve(&self, destination: &Destination) -> Result<Arc<dyn DestinationAdapter>, TransferError>;
}
