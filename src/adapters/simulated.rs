use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::destination::{
    AdapterResolver, DestinationAdapter, TransferProgress, TransferReceipt, TransferRequest,
};
use crate::core::endpoint::{self, EndpointPolicy};
use crate::core::error::TransferError;
use crate::core::models::{Destination, DestinationId, DestinationKind};
use crate::core::sanitize::remote_key;

const PROGRESS_STEPS: u32 = 4;

/// How a simulated destination behaves.
#[derive(Debug, Clone)]
pub enum SimulatedBehavior {
    /// Report progress in steps and succeed after `duration`.
    Succeed { duration: Duration },
    /// Fail with a transport error after `after`.
    Fail { after: Duration },
    /// Report some progress, then wait until cancelled.
    Hang,
    /// Never return, even when cancelled.
    Unresponsive,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self::Succeed {
            duration: Duration::from_millis(800),
        }
    }
}

/// Adapter that talks to nothing. Used by `--simulation` and in tests.
pub struct SimulatedAdapter {
    behavior: SimulatedBehavior,
    calls: Arc<AtomicUsize>,
}

impl SimulatedAdapter {
    pub fn new(behavior: SimulatedBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl DestinationAdapter for SimulatedAdapter {
    async fn transfer(
        &self,
        req: &TransferRequest,
        progress: mpsc::Sender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total = req.file.size;

        match &self.behavior {
            SimulatedBehavior::Succeed { duration } => {
                let step = *duration / PROGRESS_STEPS;
                for i in 1..=PROGRESS_STEPS {
                    tokio::select! {
                        _ = sleep(step) => {}
                        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                    }
                    let sent = total * i as u64 / PROGRESS_STEPS as u64;
                    let _ = progress.send(TransferProgress::Bytes { sent, total }).await;
                }

                let key = remote_key(req.started_at, &req.file.name);
                debug!(key = %key, "Simulated transfer complete");
                Ok(TransferReceipt {
                    remote_url: format!("https://simulated.invalid/{}/{}", req.destination.id, key),
                })
            }
            SimulatedBehavior::Fail { after } => {
                tokio::select! {
                    _ = sleep(*after) => Err(TransferError::Transport("simulated failure".into())),
                    _ = cancel.cancelled() => Err(TransferError::Cancelled),
                }
            }
            SimulatedBehavior::Hang => {
                let _ = progress.send(TransferProgress::Bytes { sent: total / 2, total }).await;
                cancel.cancelled().await;
                Err(TransferError::Cancelled)
            }
            SimulatedBehavior::Unresponsive => std::future::pending().await,
        }
    }
}

/// Resolves every destination to a simulated adapter, after the same
/// endpoint checks the real adapters apply.
#[derive(Clone)]
pub struct SimulatedResolver {
    policy: EndpointPolicy,
    default: SimulatedBehavior,
    overrides: HashMap<DestinationId, SimulatedBehavior>,
    calls: Arc<AtomicUsize>,
}

impl SimulatedResolver {
    pub fn new(default: SimulatedBehavior) -> Self {
        Self {
            policy: EndpointPolicy::default(),
            default,
            overrides: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_policy(mut self, policy: EndpointPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_override(mut self, id: impl Into<DestinationId>, behavior: SimulatedBehavior) -> Self {
        self.overrides.insert(id.into(), behavior);
        self
    }

    /// Number of transfer calls made through adapters from this resolver.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AdapterResolver for SimulatedResolver {
    fn resolve(&self, destination: &Destination) -> Result<Arc<dyn DestinationAdapter>, TransferError> {
        if let DestinationKind::External(account) = &destination.kind {
            let endpoint = endpoint::normalize_endpoint(&account.endpoint);
            self.policy
                .check(&endpoint)
                .map_err(|e| TransferError::Configuration(e.to_string()))?;
            endpoint::check_bucket(&account.bucket).map_err(|e| TransferError::Configuration(e.to_string()))?;
        }

        let behavior = self
            .overrides
            .get(&destination.id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        Ok(Arc::new(SimulatedAdapter {
            behavior,
            calls: Arc::clone(&self.calls),
        }))
    }
}
