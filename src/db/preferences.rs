use anyhow::{Context, Result};
use chrono::Utc;
use tokio_rusqlite::{Connection, params, rusqlite};

use super::format_timestamp;
use crate::core::models::DestinationId;

const LAST_SELECTION_KEY: &str = "last_selection";

pub async fn save_last_selection(conn: &Connection, ids: &[DestinationId]) -> Result<()> {
    let value = serde_json::to_string(ids).context("Failed to encode selection")?;
    let stamp = format_timestamp(Utc::now());

    conn.call(move |c| {
        c.execute(
            "INSERT INTO preferences (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![LAST_SELECTION_KEY, value, stamp],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await?;

    Ok(())
}

pub async fn last_selection(conn: &Connection) -> Result<Vec<DestinationId>> {
    let raw = conn
        .call(|c| {
            let mut stmt = c.prepare("SELECT value FROM preferences WHERE key = ?1")?;
            let mut rows = stmt.query_map(params![LAST_SELECTION_KEY], |row| row.get::<_, String>(0))?;
            rows.next().transpose()
        })
        .await?;

    match raw {
        Some(raw) => serde_json::from_str(&raw).context("Stored selection is malformed"),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use crate::core::models::DestinationId;
    use crate::core::store::RecordStore;
    use crate::db::SqliteStore;

    #[tokio::test]
    async fn selection_is_overwritten() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(store.last_selection().await.unwrap().is_empty());

        store
            .save_last_selection(&[DestinationId::builtin(), DestinationId::new("acc-1")])
            .await
            .unwrap();
        store.save_last_selection(&[DestinationId::new("acc-2")]).await.unwrap();

        assert_eq!(store.last_selection().await.unwrap(), vec![DestinationId::new("acc-2")]);
    }
}
