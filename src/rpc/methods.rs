//! RPC method handlers.
//!
//! Dispatches JSON-RPC method calls to the dispatcher and record store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, warn};

use crate::context::AppContext;
use crate::core::error::{ArchiveError, SubmitError};
use crate::core::history::{LogFilter, LogStats};
use crate::core::models::{DestinationId, DestinationPatch, DestinationView, FileItem, NewDestination};
use crate::core::orchestrator::BatchState;
use crate::core::validator::Rejection;

use super::protocol::{
    ARCHIVE_FAILED, BATCH_RUNNING, NO_BATCH, NOT_FOUND, Request, Response, VALIDATION_FAILED,
};

const DEFAULT_LOG_LIMIT: usize = 100;
/// Upper bound on rows scanned for `logs.stats`.
const STATS_WINDOW: usize = 10_000;

pub struct MethodHandler {
    ctx: AppContext,
    start_time: Instant,
}

fn parse<T: for<'de> Deserialize<'de>>(id: &Value, params: Value) -> Result<T, Response> {
    // Methods whose params are all optional accept a missing object.
    let params = if params.is_null() { Value::Object(Default::default()) } else { params };
    serde_json::from_value(params).map_err(|e| Response::invalid_params(id.clone(), e.to_string()))
}

fn store_failure(id: Value, err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "Record store operation failed");
    Response::internal_error(id)
}

#[derive(Serialize)]
struct SubmitResult {
    batch_id: String,
    accepted: usize,
    rejected: Vec<Rejection>,
    destinations: Vec<DestinationId>,
}

#[derive(Serialize)]
struct ArchiveResult {
    path: PathBuf,
    file_name: String,
    count: usize,
    entries: Vec<String>,
    failed: Vec<String>,
    encrypted: bool,
    notice: Option<&'static str>,
}

#[derive(Serialize)]
struct Changed {
    changed: bool,
}

impl MethodHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            start_time: Instant::now(),
        }
    }

    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone().unwrap_or(Value::Null);
        let params = request.params.unwrap_or(Value::Null);

        match request.method.as_str() {
            "daemon.status" => self.daemon_status(id).await,
            "batch.submit" => self.batch_submit(id, params).await,
            "batch.status" => self.batch_status(id).await,
            "batch.pause" => self.batch_pause(id).await,
            "batch.resume" => self.batch_resume(id).await,
            "batch.cancel" => self.batch_cancel(id).await,
            "archive.build" => self.archive_build(id, params).await,
            "destinations.list" => self.destinations_list(id).await,
            "destinations.create" => self.destinations_create(id, params).await,
            "destinations.update" => self.destinations_update(id, params).await,
            "destinations.delete" => self.destinations_delete(id, params).await,
            "logs.list" => self.logs_list(id, params).await,
            "logs.stats" => self.logs_stats(id).await,
            "logs.delete" => self.logs_delete(id, params).await,
            "toasts.recent" => self.toasts_recent(id).await,
            _ => Response::method_not_found(id, &request.method),
        }
    }

    async fn daemon_status(&self, id: Value) -> Response {
        #[derive(Serialize)]
        struct DaemonStatus {
            version: &'static str,
            uptime_secs: u64,
            rpc_bind: String,
            simulation: bool,
            batch_state: Option<BatchState>,
        }

        let batch_state = self.ctx.dispatcher.current().await.map(|h| h.state());

        Response::success(
            id,
            DaemonStatus {
                version: env!("CARGO_PKG_VERSION"),
                uptime_secs: self.start_time.elapsed().as_secs(),
                rpc_bind: self.ctx.config.rpc_bind.clone(),
                simulation: self.ctx.config.simulation,
                batch_state,
            },
        )
    }

    /// Read the files named by `paths` and start a batch. Without explicit
    /// destinations the last selection is reused, then the built-in store.
    async fn batch_submit(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            paths: Vec<PathBuf>,
            #[serde(default)]
            destinations: Vec<String>,
        }

        let params: Params = match parse(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let mut files = Vec::with_capacity(params.paths.len());
        for path in &params.paths {
            match FileItem::from_path(path).await {
                Ok(file) => files.push(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read file for upload");
                    return Response::invalid_params(id, format!("cannot read {}", path.display()));
                }
            }
        }

        let destination_ids = match self.selected_destinations(params.destinations).await {
            Ok(ids) => ids,
            Err(e) => return store_failure(id, e),
        };

        match self.ctx.dispatcher.submit(files, destination_ids.clone()).await {
            Ok(submission) => Response::success(
                id,
                SubmitResult {
                    batch_id: submission.handle.id().to_string(),
                    accepted: submission.accepted,
                    rejected: submission.rejected,
                    destinations: destination_ids,
                },
            ),
            Err(SubmitError::BatchRunning) => Response::error(id, BATCH_RUNNING, SubmitError::BatchRunning.to_string()),
            Err(SubmitError::NoFiles(rejected)) => Response::error_with_data(
                id,
                VALIDATION_FAILED,
                SubmitError::NoFiles(Vec::new()).to_string(),
                rejected,
            ),
            Err(SubmitError::Store(e)) => store_failure(id, e),
            Err(e) => Response::invalid_params(id, e.to_string()),
        }
    }

    async fn selected_destinations(&self, requested: Vec<String>) -> anyhow::Result<Vec<DestinationId>> {
        if !requested.is_empty() {
            return Ok(requested.into_iter().map(DestinationId::new).collect());
        }

        let remembered = self.ctx.store.last_selection().await?;
        if remembered.is_empty() {
            Ok(vec![DestinationId::builtin()])
        } else {
            Ok(remembered)
        }
    }

    async fn batch_status(&self, id: Value) -> Response {
        match self.ctx.dispatcher.current().await {
            Some(handle) => Response::success(id, handle.status().await),
            None => Response::error(id, NO_BATCH, "no batch has been submitted"),
        }
    }

    async fn batch_pause(&self, id: Value) -> Response {
        match self.ctx.dispatcher.current().await {
            Some(handle) => Response::success(id, Changed { changed: handle.pause().await }),
            None => Response::error(id, NO_BATCH, "no batch has been submitted"),
        }
    }

    async fn batch_resume(&self, id: Value) -> Response {
        match self.ctx.dispatcher.current().await {
            Some(handle) => Response::success(id, Changed { changed: handle.resume().await }),
            None => Response::error(id, NO_BATCH, "no batch has been submitted"),
        }
    }

    async fn batch_cancel(&self, id: Value) -> Response {
        let Some(handle) = self.ctx.dispatcher.current().await else {
            return Response::error(id, NO_BATCH, "no batch has been submitted");
        };

        let changed = !handle.state().is_done();
        if changed {
            handle.teardown();
        }
        Response::success(id, Changed { changed })
    }

    /// Package the last batch and write the zip into `output_dir`.
    async fn archive_build(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            #[serde(default)]
            output_dir: Option<PathBuf>,
        }

        let params: Params = match parse(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let bundle = match self.ctx.dispatcher.build_archive().await {
            Ok(bundle) => bundle,
            Err(e @ ArchiveError::Build(_)) => {
                error!(error = %e, "Archive build failed");
                return Response::error(id, ARCHIVE_FAILED, "failed to build archive");
            }
            Err(e) => return Response::error(id, ARCHIVE_FAILED, e.to_string()),
        };

        let path = params.output_dir.unwrap_or_else(|| PathBuf::from(".")).join(&bundle.file_name);
        if let Err(e) = tokio::fs::write(&path, &bundle.bytes).await {
            error!(path = %path.display(), error = %e, "Failed to write archive");
            return Response::error(id, ARCHIVE_FAILED, format!("cannot write {}", path.display()));
        }

        let notice = bundle.notice();
        let count = bundle.count();
        Response::success(
            id,
            ArchiveResult {
                path,
                file_name: bundle.file_name,
                count,
                entries: bundle.entries,
                failed: bundle.failed,
                encrypted: bundle.encrypted,
                notice,
            },
        )
    }

    /// Built-in store first, then external accounts newest first.
    async fn destinations_list(&self, id: Value) -> Response {
        match self.ctx.store.list_destinations().await {
            Ok(stored) => {
                let views: Vec<DestinationView> = std::iter::once(self.ctx.dispatcher.builtin_destination())
                    .chain(stored)
                    .map(|d| d.view())
                    .collect();
                Response::success(id, views)
            }
            Err(e) => store_failure(id, e),
        }
    }

    async fn destinations_create(&self, id: Value, params: Value) -> Response {
        let new: NewDestination = match parse(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let new = match new.validated(&self.ctx.policy) {
            Ok(new) => new,
            Err(e) => return Response::invalid_params(id, e.to_string()),
        };

        match self.ctx.store.create_destination(new).await {
            Ok(destination) => Response::success(id, destination.view()),
            Err(e) => store_failure(id, e),
        }
    }

    async fn destinations_update(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            id: String,
            #[serde(flatten)]
            patch: DestinationPatch,
        }

        let params: Params = match parse(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let destination_id = DestinationId::new(params.id);
        let current = match self.ctx.store.get_destination(&destination_id).await {
            Ok(Some(current)) => current,
            Ok(None) => return Response::error(id, NOT_FOUND, format!("unknown destination: {destination_id}")),
            Err(e) => return store_failure(id, e),
        };

        let updated = match params.patch.apply(&current, &self.ctx.policy) {
            Ok(updated) => updated,
            Err(e) => return Response::invalid_params(id, e.to_string()),
        };

        match self.ctx.store.update_destination(&updated).await {
            Ok(true) => Response::success(id, updated.view()),
            Ok(false) => Response::error(id, NOT_FOUND, format!("unknown destination: {destination_id}")),
            Err(e) => store_failure(id, e),
        }
    }

    async fn destinations_delete(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            id: String,
        }

        let params: Params = match parse(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let destination_id = DestinationId::new(params.id);
        if destination_id.is_builtin() {
            return Response::invalid_params(id, "the built-in store cannot be modified");
        }

        match self.ctx.store.delete_destination(&destination_id).await {
            Ok(true) => Response::success(id, Changed { changed: true }),
            Ok(false) => Response::error(id, NOT_FOUND, format!("unknown destination: {destination_id}")),
            Err(e) => store_failure(id, e),
        }
    }

    async fn logs_list(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            #[serde(default)]
            limit: Option<usize>,
            #[serde(flatten)]
            filter: LogFilter,
        }

        let params: Params = match parse(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);
        match self.ctx.store.list_upload_logs(limit).await {
            Ok(logs) => Response::success(id, params.filter.apply(logs)),
            Err(e) => store_failure(id, e),
        }
    }

    async fn logs_stats(&self, id: Value) -> Response {
        match self.ctx.store.list_upload_logs(STATS_WINDOW).await {
            Ok(logs) => Response::success(id, LogStats::from_logs(&logs)),
            Err(e) => store_failure(id, e),
        }
    }

    async fn logs_delete(&self, id: Value, params: Value) -> Response {
        #[derive(Deserialize)]
        struct Params {
            id: String,
        }

        let params: Params = match parse(&id, params) {
            Ok(p) => p,
            Err(resp) => return resp,
        };

        match self.ctx.store.delete_upload_log(&params.id).await {
            Ok(true) => Response::success(id, Changed { changed: true }),
            Ok(false) => Response::error(id, NOT_FOUND, format!("unknown log entry: {}", params.id)),
            Err(e) => store_failure(id, e),
        }
    }

    async fn toasts_recent(&self, id: Value) -> Response {
        Response::success(id, self.ctx.dispatcher.notifier().feed().recent().await)
    }
}
