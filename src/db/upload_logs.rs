use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio_rusqlite::{Connection, params, rusqlite};
use uuid::Uuid;

use super::{format_timestamp, parse_json, parse_timestamp};
use crate::core::models::{StoredUploadLog, UploadLogEntry};

pub async fn create(conn: &Connection, entry: UploadLogEntry) -> Result<StoredUploadLog> {
    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now();

    let destinations = serde_json::to_string(&entry.destinations).context("Failed to encode destinations")?;
    let results = serde_json::to_string(&entry.results).context("Failed to encode results")?;
    let stamp = format_timestamp(created_at);
    let row_id = id.clone();
    let file_name = entry.file_name.clone();
    let file_type = entry.file_type.clone();
    let file_size = entry.file_size as i64;
    let duration_ms = entry.duration_ms as i64;

    conn.call(move |c| {
        c.execute(
            "INSERT INTO upload_logs
             (id, file_name, file_size, file_type, destinations, results, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row_id,
                file_name,
                file_size,
                file_type,
                destinations,
                results,
                duration_ms,
                stamp
            ],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(StoredUploadLog {
        id,
        created_at,
        entry,
    })
}

/// Most recent entries first.
pub async fn list(conn: &Connection, limit: usize) -> Result<Vec<StoredUploadLog>> {
    let limit = limit as i64;
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, file_name, file_size, file_type, destinations, results, duration_ms, created_at
             FROM upload_logs
             ORDER BY created_at DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            let destinations: String = row.get(4)?;
            let results: String = row.get(5)?;
            let created_at: String = row.get(7)?;
            Ok(StoredUploadLog {
                id: row.get(0)?,
                created_at: parse_timestamp(7, &created_at)?,
                entry: UploadLogEntry {
                    file_name: row.get(1)?,
                    file_size: row.get::<_, i64>(2)? as u64,
                    file_type: row.get(3)?,
                    destinations: parse_json(4, &destinations)?,
                    results: parse_json(5, &results)?,
                    duration_ms: row.get::<_, i64>(6)? as u64,
                },
            })
        })?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
    })
    .await
    .map_err(|e| anyhow!("Failed to list upload logs: {}", e))
}

pub async fn delete(conn: &Connection, id: String) -> Result<bool> {
    let changed = conn
        .call(move |c| c.execute("DELETE FROM upload_logs WHERE id = ?1", params![id]))
        .await?;
    Ok(changed > 0)
}
