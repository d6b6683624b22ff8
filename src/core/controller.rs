//! Pause/resume control for one batch run.
//!
//! Pause is a hard stop: the cohort token is cancelled so every in-flight
//! transfer aborts, and no further file starts until `resume()`. Resume does
//! not retry anything that was cancelled; it only lets the coordinator move
//! on to files that have not been attempted yet.
//!
//! The controller only signals. It never touches task state.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

struct ControlState {
    paused: bool,
    cohort: CancellationToken,
}

struct Inner {
    batch: CancellationToken,
    state: Mutex<ControlState>,
    paused_tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct PauseController {
    inner: Arc<Inner>,
}

impl PauseController {
    /// Cohort tokens are children of `batch`, so tearing the batch down cancels them too.
    pub fn new(batch: CancellationToken) -> Self {
        let cohort = batch.child_token();
        let (paused_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                batch,
                state: Mutex::new(ControlState {
                    paused: false,
                    cohort,
                }),
                paused_tx,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControlState> {
        // A poisoned lock only means another holder panicked; the state itself is two fields.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pause the batch. Returns false if it was already paused.
    pub fn pause(&self) -> bool {
        let mut state = self.lock();
        if state.paused {
            return false;
        }

        state.paused = true;
        state.cohort.cancel();
        state.cohort = self.inner.batch.child_token();
        drop(state);

        self.inner.paused_tx.send_replace(true);
        true
    }

    /// Resume the batch. Returns false if it was not paused.
    pub fn resume(&self) -> bool {
        let mut state = self.lock();
        if !state.paused {
            return false;
        }
        state.paused = false;
        drop(state);

        self.inner.paused_tx.send_replace(false);
        true
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Token for the next cohort, or `None` while paused.
    ///
    /// Checking the flag and handing out the token happen under one lock, so
    /// a cohort can never start with a token that a concurrent `pause()`
    /// already retired.
    pub fn cohort_token(&self) -> Option<CancellationToken> {
        let state = self.lock();
        if state.paused {
            None
        } else {
            Some(state.cohort.clone())
        }
    }

    /// Wait until the batch is not paused.
    pub async fn wait_until_resumed(&self) {
        let mut rx = self.inner.paused_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}
