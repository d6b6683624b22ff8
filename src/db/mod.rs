use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;
use tokio_rusqlite::{Connection, rusqlite};

use crate::core::models::{Destination, DestinationId, NewDestination, StoredUploadLog, UploadLogEntry};
use crate::core::store::RecordStore;

pub mod destinations;
pub mod preferences;
pub mod upload_logs;

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .await
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        init(&conn).await?;
        Ok(Self { conn })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        init(&conn).await?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

async fn init(conn: &Connection) -> Result<()> {
    conn.call(|conn| {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok::<(), rusqlite::Error>(())
    })
    .await
    .context("Failed to initialize schema")?;

    Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 so text order is time order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(column: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e)))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_destination(&self, new: NewDestination) -> Result<Destination> {
        destinations::create(&self.conn, new).await
    }

    async fn get_destination(&self, id: &DestinationId) -> Result<Option<Destination>> {
        destinations::get(&self.conn, id.to_string()).await
    }

    async fn list_destinations(&self) -> Result<Vec<Destination>> {
        destinations::list(&self.conn).await
    }

    async fn update_destination(&self, destination: &Destination) -> Result<bool> {
        destinations::update(&self.conn, destination.clone()).await
    }

    async fn delete_destination(&self, id: &DestinationId) -> Result<bool> {
        destinations::delete(&self.conn, id.to_string()).await
    }

    async fn create_upload_log(&self, entry: &UploadLogEntry) -> Result<StoredUploadLog> {
        upload_logs::create(&self.conn, entry.clone()).await
    }

    async fn list_upload_logs(&self, limit: usize) -> Result<Vec<StoredUploadLog>> {
        upload_logs::list(&self.conn, limit).await
    }

    async fn delete_upload_log(&self, id: &str) -> Result<bool> {
        upload_logs::delete(&self.conn, id.to_string()).await
    }

    async fn save_last_selection(&self, ids: &[DestinationId]) -> Result<()> {
        preferences::save_last_selection(&self.conn, ids).await
    }

    async fn last_selection(&self) -> Result<Vec<DestinationId>> {
        preferences::last_selection(&self.conn).await
    }
}
