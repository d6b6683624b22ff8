use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::destination::{DestinationAdapter, TransferProgress, TransferReceipt, TransferRequest};
use crate::core::error::TransferError;
use crate::core::sanitize::sanitize_file_name;

/// Progress reported once the single upload call is under way.
const STARTED_PERCENT: u8 = 50;

#[derive(Deserialize)]
struct UploadResponse {
    file_url: String,
}

/// The built-in object store: one opaque multipart POST, no byte progress.
pub struct BuiltinAdapter {
    client: reqwest::Client,
    upload_url: String,
    api_key: Option<String>,
}

impl BuiltinAdapter {
    pub fn new(upload_url: Option<&str>, api_key: Option<&str>) -> Result<Self, TransferError> {
        let upload_url = upload_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TransferError::Configuration("built-in store upload url is not set".into()))?;

        reqwest::Url::parse(upload_url).map_err(|e| TransferError::Configuration(e.to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            upload_url: upload_url.to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
        })
    }

    async fn upload(&self, req: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        let part = Part::bytes(req.file.content.to_vec())
            .file_name(sanitize_file_name(&req.file.name))
            .mime_str(&req.file.content_type)
            .map_err(|e| TransferError::Transport(e.to_string()))?;
        let form = Form::new().part("file", part);

        let mut request = self.client.post(&self.upload_url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let body: UploadResponse = response
            .error_for_status()
            .map_err(map_reqwest_error)?
            .json()
            .await
            .map_err(map_reqwest_error)?;

        Ok(TransferReceipt {
            remote_url: body.file_url,
        })
    }
}

#[async_trait]
impl DestinationAdapter for BuiltinAdapter {
    async fn transfer(
        &self,
        req: &TransferRequest,
        progress: mpsc::Sender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let _ = progress.send(TransferProgress::Percent(STARTED_PERCENT)).await;

        let receipt = tokio::select! {
            result = self.upload(req) => result?,
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        };

        let _ = progress.send(TransferProgress::Percent(100)).await;
        info!(file = %req.file.name, "Stored in built-in store");
        Ok(receipt)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransferError {
    if err.is_connect() || err.is_timeout() {
        TransferError::Unreachable(err.to_string())
    } else {
        TransferError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_upload_url_is_a_configuration_error() {
        assert!(matches!(
            BuiltinAdapter::new(None, None),
            Err(TransferError::Configuration(_))
        ));
        assert!(matches!(
            BuiltinAdapter::new(Some("  "), None),
            Err(TransferError::Configuration(_))
        ));
        assert!(matches!(
            BuiltinAdapter::new(Some("not a url"), None),
            Err(TransferError::Configuration(_))
        ));
    }

    #[test]
    fn accepts_valid_upload_url() {
        let adapter = BuiltinAdapter::new(Some("https://files.example.com/upload"), Some("")).unwrap();
        assert!(adapter.api_key.is_none());
    }
}
