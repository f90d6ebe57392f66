//! Job history tables. Each row keeps the full serialized record next to
//! the columns used for filtering.

use super::recovery_point::encode_time;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum HistoryTable {
    Backups,
    Recoveries,
    Drills,
}

impl HistoryTable {
    fn name(&self) -> &'static str {
        match self {
            HistoryTable::Backups => "backup_history",
            HistoryTable::Recoveries => "recovery_history",
            HistoryTable::Drills => "drill_history",
        }
    }
}

/// Insert or replace the record for `id`.
pub fn record<T: Serialize>(
    conn: &Connection,
    table: HistoryTable,
    id: &str,
    started_at: &DateTime<Utc>,
    status: &str,
    record: &T,
) -> rusqlite::Result<()> {
    let body = serde_json::to_string(record)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (id, started_at, status, record) VALUES (?1, ?2, ?3, ?4)",
            table.name()
        ),
        params![id, encode_time(started_at), status, body],
    )?;
    Ok(())
}

fn decode<T: DeserializeOwned>(raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

pub fn find_by_id<T: DeserializeOwned>(
    conn: &Connection,
    table: HistoryTable,
    id: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT record FROM {} WHERE id = ?1", table.name()),
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(decode).transpose()
}

/// Records started within `[from, to]`, oldest first.
pub fn find_between<T: DeserializeOwned>(
    conn: &Connection,
    table: HistoryTable,
    from: &DateTime<Utc>,
    to: &DateTime<Utc>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT record FROM {} WHERE started_at >= ?1 AND started_at <= ?2 ORDER BY started_at ASC",
        table.name()
    ))?;
    let rows = stmt.query_map(params![encode_time(from), encode_time(to)], |row| row.get::<_, String>(0))?;
    rows.map(|raw| raw.and_then(decode)).collect()
}
