//! Bundles already-uploaded files into one downloadable zip.
//!
//! Content is fetched back from the destinations rather than kept in memory
//! during the batch. A file that was uploaded to several destinations is
//! fetched from the first one that answers, so it appears in the archive once.
//! Different files that share a name get numbered entries (`report (1).pdf`).

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use super::error::ArchiveError;
use super::models::CompletedFileRecord;
use super::sanitize::sanitize_file_name;

/// Shown with every archive: its contents are readable by anyone holding it.
pub const ARCHIVE_NOT_ENCRYPTED_NOTICE: &str =
    "This archive is not password protected; anyone with the file can open its contents.";

const COMPRESSION_LEVEL: i64 = 9;

/// Reads back the content behind a remote URL.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes)
    }
}

/// A built archive. Single-use; nothing is cached.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveBundle {
    #[serde(skip)]
    pub bytes: Bytes,
    pub file_name: String,
    /// Entry names, in the order they were first uploaded.
    pub entries: Vec<String>,
    /// Entry names that could not be fetched from any destination.
    pub failed: Vec<String>,
    pub encrypted: bool,
}

impl ArchiveBundle {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn notice(&self) -> Option<&'static str> {
        (!self.encrypted).then_some(ARCHIVE_NOT_ENCRYPTED_NOTICE)
    }
}

struct EntrySource {
    file_index: usize,
    name: String,
    urls: Vec<String>,
}

/// Group records by source file, keeping first-upload order, and give each
/// group an entry name no other group uses.
fn group_records(records: &[CompletedFileRecord]) -> Vec<EntrySource> {
    let mut groups: Vec<EntrySource> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|g| g.file_index == record.file_index) {
            Some(group) => group.urls.push(record.remote_url.clone()),
            None => groups.push(EntrySource {
                file_index: record.file_index,
                name: sanitize_file_name(&record.file_name),
                urls: vec![record.remote_url.clone()],
            }),
        }
    }

    let mut taken = HashSet::new();
    for group in &mut groups {
        group.name = unique_entry_name(&group.name, &mut taken);
    }
    groups
}

fn unique_entry_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };

    let mut n = 1;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

pub struct ArchivePackager {
    fetcher: Arc<dyn ContentFetcher>,
    fetch_timeout: Duration,
}

impl ArchivePackager {
    pub fn new(fetcher: Arc<dyn ContentFetcher>, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            fetch_timeout,
        }
    }

    pub async fn package(&self, records: &[CompletedFileRecord]) -> Result<ArchiveBundle, ArchiveError> {
        if records.is_empty() {
            return Err(ArchiveError::NothingToPackage);
        }

        let span = info_span!("archive", records = records.len());
        self.package_inner(records).instrument(span).await
    }

    async fn package_inner(&self, records: &[CompletedFileRecord]) -> Result<ArchiveBundle, ArchiveError> {
        let groups = group_records(records);
        let attempted = groups.len();

        let mut fetches = JoinSet::new();
        for (position, group) in groups.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let fetch_timeout = self.fetch_timeout;
            fetches.spawn(async move {
                let content = fetch_first(fetcher.as_ref(), &group, fetch_timeout).await;
                (position, group.name, content)
            });
        }

        let mut fetched: Vec<(usize, String, Bytes)> = Vec::new();
        let mut failed: Vec<(usize, String)> = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((position, name, Some(content))) => fetched.push((position, name, content)),
                Ok((position, name, None)) => failed.push((position, name)),
                Err(e) => warn!(error = %e, "Archive fetch task aborted"),
            }
        }

        if fetched.is_empty() {
            warn!(attempted, "No files could be fetched for the archive");
            return Err(ArchiveError::AllFetchesFailed { attempted });
        }

        fetched.sort_by_key(|(position, _, _)| *position);
        failed.sort_by_key(|(position, _)| *position);

        let entries: Vec<String> = fetched.iter().map(|(_, name, _)| name.clone()).collect();
        let contents: Vec<(String, Bytes)> = fetched
            .into_iter()
            .map(|(_, name, content)| (name, content))
            .collect();

        let bytes = tokio::task::spawn_blocking(move || build_zip(&contents))
            .await
            .map_err(|e| ArchiveError::Build(e.to_string()))?
            .map_err(|e| ArchiveError::Build(e.to_string()))?;

        info!(
            entries = entries.len(),
            failed = failed.len(),
            size = bytes.len(),
            "Archive built"
        );

        Ok(ArchiveBundle {
            bytes: Bytes::from(bytes),
            file_name: format!("upload-files-{}.zip", Utc::now().timestamp_millis()),
            entries,
            failed: failed.into_iter().map(|(_, name)| name).collect(),
            encrypted: false,
        })
    }
}

async fn fetch_first(fetcher: &dyn ContentFetcher, group: &EntrySource, fetch_timeout: Duration) -> Option<Bytes> {
    for url in &group.urls {
        match tokio::time::timeout(fetch_timeout, fetcher.fetch(url)).await {
            Ok(Ok(content)) => {
                debug!(entry = %group.name, bytes = content.len(), "Fetched archive entry");
                return Some(content);
            }
            Ok(Err(e)) => warn!(entry = %group.name, error = %e, "Archive fetch failed"),
            Err(_) => warn!(entry = %group.name, "Archive fetch timed out"),
        }
    }
    None
}

fn build_zip(contents: &[(String, Bytes)]) -> zip::result::ZipResult<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in contents {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(content)?;
    }

    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::DestinationId;
    use std::collections::HashMap;
    use std::io::Read;

    struct MapFetcher(HashMap<String, Bytes>);

    #[async_trait]
    impl ContentFetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<Bytes> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {url}"))
        }
    }

    fn record(index: usize, name: &str, url: &str, dest: &str) -> CompletedFileRecord {
        CompletedFileRecord {
            file_index: index,
            file_name: name.into(),
            remote_url: url.into(),
            destination: DestinationId::new(dest),
        }
    }

    fn packager(available: &[(&str, &str)]) -> ArchivePackager {
        let map = available
            .iter()
            .map(|(url, body)| (url.to_string(), Bytes::from(body.to_string())))
            .collect();
        ArchivePackager::new(Arc::new(MapFetcher(map)), Duration::from_secs(1))
    }

    fn read_entry(bytes: &Bytes, name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn empty_input_is_refused() {
        let err = packager(&[]).package(&[]).await.unwrap_err();
        assert!(matches!(err, ArchiveError::NothingToPackage));
    }

    #[tokio::test]
    async fn duplicate_uploads_fall_back_to_next_destination() {
        let records = vec![
            record(0, "a.txt", "https://one/a", "one"),
            record(0, "a.txt", "https://two/a", "two"),
            record(1, "b.txt", "https://one/b", "one"),
        ];
        let bundle = packager(&[("https://two/a", "alpha"), ("https://one/b", "beta")])
            .package(&records)
            .await
            .unwrap();

        assert_eq!(bundle.entries, vec!["a.txt", "b.txt"]);
        assert!(bundle.failed.is_empty());
        assert_eq!(read_entry(&bundle.bytes, "a.txt"), "alpha");
        assert_eq!(read_entry(&bundle.bytes, "b.txt"), "beta");
    }

    #[tokio::test]
    async fn entry_names_are_sanitized() {
        let records = vec![record(0, "../../etc/passwd", "https://one/p", "one")];
        let bundle = packager(&[("https://one/p", "x")]).package(&records).await.unwrap();
        assert_eq!(bundle.entries, vec!["_._etc_passwd"]);
        assert!(bundle.file_name.starts_with("upload-files-"));
        assert!(bundle.file_name.ends_with(".zip"));
    }

    #[tokio::test]
    async fn different_files_with_one_name_get_numbered_entries() {
        let records = vec![
            record(0, "report.pdf", "https://one/0-report.pdf", "one"),
            record(0, "report.pdf", "https://two/0-report.pdf", "two"),
            record(1, "report.pdf", "https://one/1-report.pdf", "one"),
            record(2, "report.pdf", "https://one/2-report.pdf", "one"),
            record(3, "README", "https://one/readme", "one"),
            record(4, "README", "https://one/readme-2", "one"),
        ];
        let bundle = packager(&[
            ("https://one/0-report.pdf", "first"),
            ("https://one/1-report.pdf", "second"),
            ("https://one/2-report.pdf", "third"),
            ("https://one/readme", "r1"),
            ("https://one/readme-2", "r2"),
        ])
        .package(&records)
        .await
        .unwrap();

        assert_eq!(
            bundle.entries,
            vec!["report.pdf", "report (1).pdf", "report (2).pdf", "README", "README (1)"]
        );
        assert_eq!(read_entry(&bundle.bytes, "report.pdf"), "first");
        assert_eq!(read_entry(&bundle.bytes, "report (1).pdf"), "second");
        assert_eq!(read_entry(&bundle.bytes, "report (2).pdf"), "third");
        assert_eq!(read_entry(&bundle.bytes, "README (1)"), "r2");
    }

    #[test]
    fn numbered_names_skip_taken_ones() {
        let mut taken = HashSet::new();
        assert_eq!(unique_entry_name("a.txt", &mut taken), "a.txt");
        taken.insert("a (1).txt".to_string());
        assert_eq!(unique_entry_name("a.txt", &mut taken), "a (2).txt");
        assert_eq!(unique_entry_name(".env", &mut taken), ".env");
        assert_eq!(unique_entry_name(".env", &mut taken), ".env (1)");
    }

    #[tokio::test]
    async fn all_failures_are_aggregated() {
        let records = vec![
            record(0, "a.txt", "https://one/a", "one"),
            record(1, "b.txt", "https://one/b", "one"),
        ];
        let err = packager(&[]).package(&records).await.unwrap_err();
        assert!(matches!(err, ArchiveError::AllFetchesFailed { attempted: 2 }));
    }

    #[tokio::test]
    async fn bundle_reports_missing_encryption() {
        let records = vec![record(0, "a.txt", "https://one/a", "one")];
        let bundle = packager(&[("https://one/a", "a")]).package(&records).await.unwrap();
        assert!(!bundle.encrypted);
        assert_eq!(bundle.notice(), Some(ARCHIVE_NOT_ENCRYPTED_NOTICE));
        assert_eq!(bundle.count(), 1);
    }
}
