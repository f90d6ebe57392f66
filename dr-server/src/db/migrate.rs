use crate::db::connection::DbPool;
use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS recovery_points (
  backup_id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  verified INTEGER NOT NULL DEFAULT 0,
  size INTEGER NOT NULL DEFAULT 0,
  locations TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS backup_history (
  id TEXT PRIMARY KEY,
  started_at TEXT NOT NULL,
  status TEXT NOT NULL CHECK(status IN ('in_progress','completed','failed','cancelled')),
  record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recovery_history (
  id TEXT PRIMARY KEY,
  started_at TEXT NOT NULL,
  status TEXT NOT NULL CHECK(status IN ('in_progress','completed','failed','cancelled')),
  record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS drill_history (
  id TEXT PRIMARY KEY,
  started_at TEXT NOT NULL,
  status TEXT NOT NULL CHECK(status IN ('passed','failed')),
  record TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recovery_points_created ON recovery_points(created_at);
CREATE INDEX IF NOT EXISTS idx_backup_history_started ON backup_history(started_at);
CREATE INDEX IF NOT EXISTS idx_recovery_history_started ON recovery_history(started_at);
CREATE INDEX IF NOT EXISTS idx_drill_history_started ON drill_history(started_at);
"#;

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(columns.iter().any(|c| c == column))
}

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for existing databases
    if !has_column(&conn, "recovery_points", "domains")? {
        conn.execute_batch(
            "ALTER TABLE recovery_points ADD COLUMN domains TEXT NOT NULL DEFAULT '[]'",
        )?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
