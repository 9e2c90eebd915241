//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS run_log (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_run_log_started ON run_log(started_at);",
    )?;

    // Migration: run ids were added after the first release
    let has_run_id: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('run_log') WHERE name='run_id'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_run_id == 0 {
        conn.execute("ALTER TABLE run_log ADD COLUMN run_id TEXT", [])?;
    }

    Ok(())
}
