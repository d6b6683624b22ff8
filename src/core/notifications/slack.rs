use super::{BatchEvent, NotificationChannel};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(&self, event: &BatchEvent) -> Option<serde_json::Value> {
        match event {
            BatchEvent::FileSettled {
                file_name,
                succeeded,
                failed,
            } => {
                let title = if *failed == 0 {
                    "Upload Complete"
                } else if *succeeded == 0 {
                    "Upload Failed"
                } else {
                    "Upload Partially Failed"
                };
                Some(json!({
                    "blocks": [
                        {
                            "type": "header",
                            "text": {
                                "type": "plain_text",
                                "text": title,
                                "emoji": true
                            }
                        },
                        {
                            "type": "section",
                            "fields": [
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*File:*\n`{}`", file_name)
                                },
                                {
                                    "type": "mrkdwn",
                                    "text": format!("*Destinations:*\n{} ok, {} failed", succeeded, failed)
                                }
                            ]
                        }
                    ]
                }))
            }
            BatchEvent::BatchFinished {
                files,
                files_uploaded,
            } => Some(json!({
                "blocks": [
                    {
                        "type": "header",
                        "text": {
                            "type": "plain_text",
                            "text": "Batch Finished",
                            "emoji": true
                        }
                    },
                    {
                        "type": "section",
                        "text": {
                            "type": "mrkdwn",
                            "text": format!("*{}* of *{}* files reached at least one destination", files_uploaded, files)
                        }
                    }
                ]
            })),
            // Not posted.
            BatchEvent::Paused | BatchEvent::Resumed => None,
        }
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: &BatchEvent) -> Result<()> {
        let Some(payload) = self.format_message(event) else {
            return Ok(());
        };
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
