mod feed;
mod slack;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::{NotificationChannelType, NotificationConfig};

pub use feed::ToastFeed;
pub use slack::SlackNotifier;

/// Events that trigger notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    FileSettled {
        file_name: String,
        succeeded: usize,
        failed: usize,
    },
    Paused,
    Resumed,
    BatchFinished {
        files: usize,
        files_uploaded: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastLevel {
    Success,
    Error,
    Info,
}

/// Short user-facing notice. Messages are built only from file names and counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Toast {
    fn new(level: ToastLevel, message: String) -> Self {
        Self {
            level,
            message,
            at: Utc::now(),
        }
    }
}

/// Map an event to the notices shown for it.
pub fn toasts_for(event: &BatchEvent) -> Vec<Toast> {
    match event {
        BatchEvent::FileSettled {
            file_name,
            succeeded,
            failed,
        } => {
            let mut toasts = Vec::new();
            if *succeeded > 0 {
                toasts.push(Toast::new(
                    ToastLevel::Success,
                    format!("{} uploaded to {} destination(s)", file_name, succeeded),
                ));
            }
            if *failed > 0 {
                toasts.push(Toast::new(
                    ToastLevel::Error,
                    format!("{}: {} destination(s) failed", file_name, failed),
                ));
            }
            toasts
        }
        BatchEvent::Paused => vec![Toast::new(ToastLevel::Info, "Uploads paused".into())],
        BatchEvent::Resumed => vec![Toast::new(ToastLevel::Info, "Uploads resumed".into())],
        BatchEvent::BatchFinished {
            files,
            files_uploaded,
        } => {
            if *files > 0 && *files_uploaded == 0 {
                vec![Toast::new(
                    ToastLevel::Error,
                    "Upload failed: no file reached any destination".into(),
                )]
            } else {
                Vec::new()
            }
        }
    }
}

/// Trait for notification channel implementations (Slack, in-process feed, etc.)
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, event: &BatchEvent) -> Result<()>;
}

/// Factory function to create an external notifier based on config
pub fn create_notifier(config: &NotificationConfig) -> Option<Arc<dyn NotificationChannel>> {
    match &config.channel {
        NotificationChannelType::None => None,
        NotificationChannelType::Slack => {
            let webhook = config.slack_webhook.as_ref()?;
            if webhook.is_empty() {
                return None;
            }
            Some(Arc::new(SlackNotifier::new(webhook.clone())))
        }
    }
}

/// Fans batch events out to the toast feed and any external channel.
#[derive(Clone)]
pub struct Notifier {
    feed: ToastFeed,
    external: Option<Arc<dyn NotificationChannel>>,
}

impl Notifier {
    pub fn new(feed: ToastFeed, external: Option<Arc<dyn NotificationChannel>>) -> Self {
        Self { feed, external }
    }

    pub fn feed(&self) -> &ToastFeed {
        &self.feed
    }

    /// Deliver an event. The feed is updated before this returns; external
    /// channels run in the background and their failures are only logged.
    pub async fn dispatch(&self, event: BatchEvent) {
        if let Err(e) = self.feed.notify(&event).await {
            warn!(error = %e, "Failed to publish notice");
        }

        if let Some(channel) = &self.external {
            let channel = Arc::clone(channel);
            tokio::spawn(async move {
                if let Err(e) = channel.notify(&event).await {
                    warn!(error = %e, "Failed to send notification");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_gets_both_notices() {
        let toasts = toasts_for(&BatchEvent::FileSettled {
            file_name: "a.txt".into(),
            succeeded: 2,
            failed: 1,
        });
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[0].level, ToastLevel::Success);
        assert_eq!(toasts[0].message, "a.txt uploaded to 2 destination(s)");
        assert_eq!(toasts[1].message, "a.txt: 1 destination(s) failed");
    }

    #[test]
    fn batch_error_only_when_nothing_uploaded() {
        let failed = toasts_for(&BatchEvent::BatchFinished {
            files: 2,
            files_uploaded: 0,
        });
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].level, ToastLevel::Error);

        assert!(
            toasts_for(&BatchEvent::BatchFinished {
                files: 2,
                files_uploaded: 1,
            })
            .is_empty()
        );
    }

    #[test]
    fn no_external_channel_by_default() {
        let config = NotificationConfig::default();
        assert!(create_notifier(&config).is_none());

        let empty = NotificationConfig {
            channel: NotificationChannelType::Slack,
            slack_webhook: Some(String::new()),
        };
        assert!(create_notifier(&empty).is_none());
    }

    #[tokio::test]
    async fn dispatch_updates_feed_before_returning() {
        let notifier = Notifier::new(ToastFeed::new(10), None);
        notifier.dispatch(BatchEvent::Paused).await;
        let recent = notifier.feed().recent().await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "Uploads paused");
    }
}
