use async_trait::async_trait;
use aws_sdk_s3::{
    Client as S3Client,
    config::{Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption},
};
use bytes::Bytes;
use reqwest::Url;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::destination::{DestinationAdapter, TransferProgress, TransferReceipt, TransferRequest};
use crate::core::endpoint::{self, EndpointPolicy};
use crate::core::error::TransferError;
use crate::core::models::ExternalAccount;
use crate::core::sanitize::remote_key;
use crate::logging::LogThrottle;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Uploads to an S3-compatible bucket with path-style addressing.
pub struct S3Adapter {
    client: S3Client,
    endpoint: Url,
    bucket: String,
    part_size: usize,
}

impl S3Adapter {
    /// Validate the account and build a client. No request is made here.
    pub fn new(account: &ExternalAccount, policy: &EndpointPolicy, part_size: usize) -> Result<Self, TransferError> {
        let endpoint_str = endpoint::normalize_endpoint(&account.endpoint);
        policy
            .check(&endpoint_str)
            .map_err(|e| TransferError::Configuration(e.to_string()))?;
        endpoint::check_bucket(&account.bucket).map_err(|e| TransferError::Configuration(e.to_string()))?;

        if account.access_key_id.is_empty() || account.secret_access_key.is_empty() {
            return Err(TransferError::Configuration("missing credentials".into()));
        }

        let endpoint = Url::parse(&endpoint_str).map_err(|e| TransferError::Configuration(e.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(TransferError::Configuration("endpoint cannot hold a path".into()));
        }

        let region = endpoint::region_for(&endpoint_str, account.region.as_deref());
        let credentials = Credentials::new(
            account.access_key_id.clone(),
            account.secret_access_key.clone(),
            None,
            None,
            "fanload",
        );

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version_latest()
            .region(Region::new(region))
            .credentials_provider(credentials)
            .endpoint_url(endpoint_str)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: S3Client::from_conf(config),
            endpoint,
            bucket: account.bucket.clone(),
            part_size: part_size.max(MIN_PART_SIZE),
        })
    }

    /// `<endpoint>/<bucket>/<key>` with each segment percent-encoded.
    pub fn object_url(&self, key: &str) -> String {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.bucket).push(key);
        }
        url.to_string()
    }

    /// Anything larger than one part goes multipart, so progress advances per part.
    fn uses_multipart(&self, len: usize) -> bool {
        len > self.part_size
    }

    async fn put_single(
        &self,
        key: &str,
        req: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let call = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&req.file.content_type)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .body(ByteStream::from(req.file.content.clone()))
            .send();

        cancellable(cancel, call).await?.map_err(map_sdk_error)?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        req: &TransferRequest,
        progress: &mpsc::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(&req.file.content_type)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .send();
        let created = cancellable(cancel, created).await?.map_err(map_sdk_error)?;
        let upload_id = created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| TransferError::Transport("missing multipart upload id".into()))?;

        let result = self.upload_parts(key, &upload_id, &req.file.content, progress, cancel).await;

        if result.is_err() {
            // Runs even after cancellation so the store does not keep orphaned parts.
            let abort = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await;
            if let Err(e) = abort {
                warn!(error = %DisplayErrorContext(&e), "Failed to abort multipart upload");
            }
        }

        result
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        content: &Bytes,
        progress: &mpsc::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let total = content.len() as u64;
        let throttle = LogThrottle::new(Duration::from_secs(2));
        let mut parts: Vec<CompletedPart> = Vec::new();
        let mut offset = 0usize;
        let mut part_number: i32 = 1;

        while offset < content.len() {
            let end = (offset + self.part_size).min(content.len());
            let call = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(content.slice(offset..end)))
                .send();
            let output = cancellable(cancel, call).await?.map_err(map_sdk_error)?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );

            offset = end;
            part_number += 1;

            let sent = offset as u64;
            let _ = progress.send(TransferProgress::Bytes { sent, total }).await;
            if throttle.should_log() {
                debug!(sent, total, part = part_number - 1, "Multipart upload progress");
            }
        }

        let completed = CompletedMultipartUpload::builder().set_parts(Some(parts)).build();
        let call = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send();
        cancellable(cancel, call).await?.map_err(map_sdk_error)?;

        Ok(())
    }
}

#[async_trait]
impl DestinationAdapter for S3Adapter {
    async fn transfer(
        &self,
        req: &TransferRequest,
        progress: mpsc::Sender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Result<TransferReceipt, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let key = remote_key(req.started_at, &req.file.name);
        let total = req.file.size;
        let _ = progress.send(TransferProgress::Bytes { sent: 0, total }).await;

        if !self.uses_multipart(req.file.content.len()) {
            self.put_single(&key, req, &cancel).await?;
            let _ = progress.send(TransferProgress::Bytes { sent: total, total }).await;
        } else {
            self.put_multipart(&key, req, &progress, &cancel).await?;
        }

        info!(bucket = %self.bucket, key = %key, bytes = total, "Object stored");
        Ok(TransferReceipt {
            remote_url: self.object_url(&key),
        })
    }
}

/// Race an SDK call against cancellation. Dropping the call aborts its request.
async fn cancellable<F: Future>(cancel: &CancellationToken, call: F) -> Result<F::Output, TransferError> {
    tokio::select! {
        output = call => Ok(output),
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
    }
}

fn map_sdk_error<E, R>(err: SdkError<E, R>) -> TransferError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => TransferError::Unreachable(detail),
        _ => TransferError::Transport(detail),
    }
}
