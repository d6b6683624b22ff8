use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use super::{BatchEvent, NotificationChannel, Toast, toasts_for};

/// In-process toast channel: live subscribers plus a short history for
/// clients that poll.
#[derive(Clone)]
pub struct ToastFeed {
    tx: broadcast::Sender<Toast>,
    recent: Arc<Mutex<VecDeque<Toast>>>,
    capacity: usize,
}

impl ToastFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }

    /// Oldest first.
    pub async fn recent(&self) -> Vec<Toast> {
        self.recent.lock().await.iter().cloned().collect()
    }

    async fn push(&self, toast: Toast) {
        let mut recent = self.recent.lock().await;
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(toast.clone());
        drop(recent);

        // No receivers is fine.
        let _ = self.tx.send(toast);
    }
}

#[async_trait]
impl NotificationChannel for ToastFeed {
    async fn notify(&self, event: &BatchEvent) -> Result<()> {
        for toast in toasts_for(event) {
            self.push(toast).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_bounded_history() {
        let feed = ToastFeed::new(2);
        feed.notify(&BatchEvent::Paused).await.unwrap();
        feed.notify(&BatchEvent::Resumed).await.unwrap();
        feed.notify(&BatchEvent::Paused).await.unwrap();

        let recent = feed.recent().await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "Uploads resumed");
        assert_eq!(recent[1].message, "Uploads paused");
    }

    #[tokio::test]
    async fn subscribers_receive_live_toasts() {
        let feed = ToastFeed::new(4);
        let mut rx = feed.subscribe();
        feed.notify(&BatchEvent::FileSettled {
            file_name: "a.txt".into(),
            succeeded: 1,
            failed: 0,
        })
        .await
        .unwrap();

        let toast = rx.recv().await.unwrap();
        assert_eq!(toast.message, "a.txt uploaded to 1 destination(s)");
    }
}
