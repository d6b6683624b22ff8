mod common;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use common::{WriteFault, broken_harness, fast_settings, harness, new_destination, text_file};
use fanload::adapters::{SimulatedBehavior, SimulatedResolver};
use fanload::core::archive::{ArchivePackager, ContentFetcher};
use fanload::core::dispatcher::Dispatcher;
use fanload::core::error::{ArchiveError, SubmitError};
use fanload::core::models::{CompletedFileRecord, DestinationId, FileItem};
use fanload::core::orchestrator::BatchState;
use fanload::core::store::RecordStore;
use fanload::core::validator::{ValidationError, Validator};
use fanload::db::SqliteStore;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

/// Serves the URL itself as content; URLs containing "slow" never answer,
/// URLs containing "gone" fail.
struct EchoFetcher;

#[async_trait]
impl ContentFetcher for EchoFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if url.contains("slow") {
            std::future::pending::<()>().await;
        }
        if url.contains("gone") {
            bail!("404");
        }
        Ok(Bytes::from(url.to_string()))
    }
}

fn record(file_index: usize, file_name: &str, remote_url: &str) -> CompletedFileRecord {
    CompletedFileRecord {
        file_index,
        file_name: file_name.to_string(),
        remote_url: remote_url.to_string(),
        destination: DestinationId::builtin(),
    }
}

fn zip_entries(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            (entry.name().to_string(), body)
        })
        .collect()
}

#[tokio::test]
async fn fetch_timeout_drops_only_that_entry() {
    let packager = ArchivePackager::new(Arc::new(EchoFetcher), Duration::from_millis(100));
    let records = vec![
        record(0, "a.txt", "https://cdn.invalid/a"),
        record(1, "b.txt", "https://cdn.invalid/slow/b"),
        record(2, "c.txt", "https://cdn.invalid/c"),
    ];

    let bundle = packager.package(&records).await.unwrap();

    assert_eq!(bundle.count(), 2);
    assert_eq!(bundle.entries, vec!["a.txt", "c.txt"]);
    assert_eq!(bundle.failed, vec!["b.txt"]);
    assert!(!bundle.encrypted);
    assert!(bundle.notice().is_some());
    assert!(bundle.file_name.starts_with("upload-files-") && bundle.file_name.ends_with(".zip"));

    let entries = zip_entries(&bundle.bytes);
    assert_eq!(
        entries,
        vec![
            ("a.txt".to_string(), "https://cdn.invalid/a".to_string()),
            ("c.txt".to_string(), "https://cdn.invalid/c".to_string()),
        ]
    );
}

#[tokio::test]
async fn same_file_falls_back_to_next_destination() {
    let packager = ArchivePackager::new(Arc::new(EchoFetcher), Duration::from_millis(100));
    let records = vec![
        record(0, "report.pdf", "https://cdn.invalid/gone/report.pdf"),
        record(0, "report.pdf", "https://mirror.invalid/report.pdf"),
    ];

    let bundle = packager.package(&records).await.unwrap();

    assert_eq!(bundle.entries, vec!["report.pdf"]);
    assert_eq!(
        zip_entries(&bundle.bytes),
        vec![("report.pdf".to_string(), "https://mirror.invalid/report.pdf".to_string())]
    );
}

#[tokio::test]
async fn every_fetch_failing_is_an_error() {
    let packager = ArchivePackager::new(Arc::new(EchoFetcher), Duration::from_millis(50));
    let records = vec![record(0, "x.txt", "https://cdn.invalid/gone/x")];

    let err = packager.package(&records).await.unwrap_err();
    assert!(matches!(err, ArchiveError::AllFetchesFailed { attempted: 1 }));
}

async fn dispatcher(resolver: SimulatedResolver) -> (Dispatcher, Arc<SqliteStore>) {
    let h = harness(resolver, fast_settings()).await;
    let packager = ArchivePackager::new(Arc::new(EchoFetcher), Duration::from_secs(1));
    let dispatcher = Dispatcher::new(h.deps, Validator::new(10, 1024 * 1024), packager, "Built-in");
    (dispatcher, h.store)
}

#[tokio::test]
async fn dispatcher_gates_batches_and_archive() {
    let resolver = SimulatedResolver::new(SimulatedBehavior::Succeed {
        duration: Duration::from_millis(150),
    });
    let (dispatcher, store) = dispatcher(resolver).await;

    assert!(matches!(
        dispatcher.build_archive().await,
        Err(ArchiveError::NothingToPackage)
    ));

    store.create_destination(new_destination()).await.unwrap();
    let account = store.list_destinations().await.unwrap().remove(0);

    let submission = dispatcher
        .submit(
            vec![text_file("notes.txt"), text_file("notes.exe")],
            vec![DestinationId::builtin(), account.id.clone(), DestinationId::builtin()],
        )
        .await
        .unwrap();

    assert_eq!(submission.accepted, 1);
    assert_eq!(submission.rejected.len(), 1);
    assert_eq!(submission.rejected[0].reason, ValidationError::UnsupportedType);

    let second = dispatcher
        .submit(vec![text_file("more.txt")], vec![DestinationId::builtin()])
        .await;
    assert!(matches!(second, Err(SubmitError::BatchRunning)));
    assert!(matches!(
        dispatcher.build_archive().await,
        Err(ArchiveError::BatchRunning)
    ));

    assert_eq!(submission.handle.wait().await, BatchState::Finished);
    assert_eq!(submission.handle.completed_records().await.len(), 2);

    let bundle = dispatcher.build_archive().await.unwrap();
    assert_eq!(bundle.entries, vec!["notes.txt"]);

    let logs = store.list_upload_logs(10).await.unwrap();
    assert_eq!(logs[0].entry.destinations, vec![DestinationId::builtin(), account.id]);
}

#[tokio::test]
async fn dispatcher_rejects_bad_selections() {
    let (dispatcher, store) = dispatcher(SimulatedResolver::new(SimulatedBehavior::default())).await;

    let none = dispatcher.submit(vec![text_file("a.txt")], Vec::new()).await;
    assert!(matches!(none, Err(SubmitError::NoDestinations)));

    let unknown = dispatcher
        .submit(vec![text_file("a.txt")], vec![DestinationId::new("missing")])
        .await;
    assert!(matches!(unknown, Err(SubmitError::UnknownDestination(_))));

    let mut inactive = new_destination();
    inactive.active = false;
    let inactive = store.create_destination(inactive).await.unwrap();
    let refused = dispatcher.submit(vec![text_file("a.txt")], vec![inactive.id]).await;
    assert!(matches!(refused, Err(SubmitError::UnknownDestination(_))));

    let empty = dispatcher
        .submit(
            vec![FileItem::new(".hidden.txt", "text/plain", b"x".to_vec())],
            vec![DestinationId::builtin()],
        )
        .await;
    match empty {
        Err(SubmitError::NoFiles(rejected)) => assert_eq!(rejected[0].reason, ValidationError::InvalidName),
        _ => panic!("expected NoFiles"),
    }

    // Nothing was spawned by the refused submissions.
    assert!(dispatcher.current().await.is_none());
}

#[tokio::test]
async fn same_named_uploads_become_separate_entries() {
    let resolver = SimulatedResolver::new(SimulatedBehavior::Succeed {
        duration: Duration::from_millis(5),
    });
    let (dispatcher, _store) = dispatcher(resolver).await;

    let submission = dispatcher
        .submit(
            vec![
                FileItem::new("report.txt", "text/plain", b"AAAA".to_vec()),
                FileItem::new("report.txt", "text/plain", b"BBBBBBBB".to_vec()),
            ],
            vec![DestinationId::builtin()],
        )
        .await
        .unwrap();
    assert_eq!(submission.handle.wait().await, BatchState::Finished);

    let bundle = dispatcher.build_archive().await.unwrap();
    assert_eq!(bundle.entries, vec!["report.txt", "report (1).txt"]);
    assert!(bundle.failed.is_empty());

    let entries = zip_entries(&bundle.bytes);
    assert_ne!(entries[0].1, entries[1].1);
}

#[tokio::test]
async fn crashed_batch_does_not_block_the_next_submit() {
    let resolver = SimulatedResolver::new(SimulatedBehavior::Succeed {
        duration: Duration::from_millis(5),
    });
    let h = broken_harness(resolver, WriteFault::Panic).await;
    let packager = ArchivePackager::new(Arc::new(EchoFetcher), Duration::from_secs(1));
    let dispatcher = Dispatcher::new(h.deps, Validator::new(10, 1024 * 1024), packager, "Built-in");

    let first = dispatcher
        .submit(vec![text_file("a.txt")], vec![DestinationId::builtin()])
        .await
        .unwrap();
    assert_eq!(first.handle.wait().await, BatchState::TornDown);

    let second = dispatcher
        .submit(vec![text_file("b.txt")], vec![DestinationId::builtin()])
        .await;
    assert!(second.is_ok());
}
