use chrono::{DateTime, SecondsFormat, Utc};
use dr_engine::model::RecoveryPoint;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

// ── Encoding ──

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn row_to_point(row: &Row) -> rusqlite::Result<RecoveryPoint> {
    let created_at: String = row.get("created_at")?;
    let locations: String = row.get("locations")?;
    let domains: String = row.get("domains")?;
    Ok(RecoveryPoint {
        backup_id: row.get("backup_id")?,
        created_at: decode_time(1, &created_at)?,
        verified: row.get::<_, i64>("verified")? != 0,
        size: row.get::<_, i64>("size")?.max(0) as u64,
        locations: decode_json(4, &locations)?,
        domains: decode_json(5, &domains)?,
    })
}

// ── Queries ──

pub fn find_all(conn: &Connection) -> rusqlite::Result<Vec<RecoveryPoint>> {
    let mut stmt = conn.prepare("SELECT * FROM recovery_points ORDER BY created_at ASC, backup_id ASC")?;
    let rows = stmt.query_map([], row_to_point)?;
    rows.collect()
}

pub fn find_by_id(conn: &Connection, backup_id: &str) -> rusqlite::Result<Option<RecoveryPoint>> {
    conn.query_row(
        "SELECT * FROM recovery_points WHERE backup_id = ?1",
        params![backup_id],
        row_to_point,
    )
    .optional()
}

pub fn find_latest_verified(conn: &Connection) -> rusqlite::Result<Option<RecoveryPoint>> {
    conn.query_row(
        "SELECT * FROM recovery_points WHERE verified = 1 ORDER BY created_at DESC, backup_id DESC LIMIT 1",
        [],
        row_to_point,
    )
    .optional()
}

pub fn count_verified_except(conn: &Connection, backup_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM recovery_points WHERE verified = 1 AND backup_id != ?1",
        params![backup_id],
        |row| row.get(0),
    )
}

// ── Mutations ──

pub fn upsert(conn: &Connection, point: &RecoveryPoint) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO recovery_points (backup_id, created_at, verified, size, locations, domains)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(backup_id) DO UPDATE SET
           created_at = excluded.created_at,
           verified = excluded.verified,
           size = excluded.size,
           locations = excluded.locations,
           domains = excluded.domains",
        params![
            point.backup_id,
            encode_time(&point.created_at),
            point.verified as i64,
            point.size as i64,
            to_json(&point.locations)?,
            to_json(&point.domains)?,
        ],
    )?;
    Ok(())
}

pub fn set_verified(conn: &Connection, backup_id: &str, verified: bool) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE recovery_points SET verified = ?2 WHERE backup_id = ?1",
        params![backup_id, verified as i64],
    )?;
    Ok(changed > 0)
}

pub fn delete(conn: &Connection, backup_id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "DELETE FROM recovery_points WHERE backup_id = ?1",
        params![backup_id],
    )?;
    Ok(changed > 0)
}
