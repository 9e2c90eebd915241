//! SQLite storage layer -- schema, run log, and the sink handed to ingestion runs.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;

use crate::scheduler::history::RunRecord;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Open an existing database without creating, migrating, or writing to it.
pub fn open_pool_read_only(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path)
        .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        .with_init(|c| c.execute_batch("PRAGMA busy_timeout = 5000;"));
    Ok(R2D2Pool::new(manager)?)
}

/// Storage handle passed to each ingestion run.
#[derive(Clone)]
pub struct Store {
    location: String,
    pool: Pool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &crate::config::sanitize_location(&self.location))
            .finish()
    }
}

impl Store {
    pub fn open(location: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(location).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let pool = open_pool(location)
            .with_context(|| format!("failed to open database {location}"))?;
        Ok(Self {
            location: location.to_string(),
            pool,
        })
    }

    /// Open a database some earlier `open` created. Fails instead of creating
    /// anything when `location` does not exist.
    pub fn open_existing(location: &str) -> Result<Self> {
        if !std::path::Path::new(location).is_file() {
            anyhow::bail!("no run log database at {location}");
        }
        let pool = open_pool_read_only(location)
            .with_context(|| format!("failed to open database {location}"))?;
        Ok(Self {
            location: location.to_string(),
            pool,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Append-only store of completed runs.
#[async_trait::async_trait]
pub trait RunLogStore: Send + Sync {
    async fn insert(&self, record: &RunRecord) -> Result<()>;

    /// Most recent records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<RunRecord>>;
}

/// [`RunLogStore`] backed by the `run_log` table.
#[derive(Clone)]
pub struct SqliteRunLog {
    pool: Pool,
}

impl SqliteRunLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RunLogStore for SqliteRunLog {
    async fn insert(&self, record: &RunRecord) -> Result<()> {
        let pool = self.pool.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || save_run(&pool, &record))
            .await
            .context("run log writer task failed")?
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || load_recent(&pool, limit))
            .await
            .context("run log reader task failed")?
    }
}

/// Save a completed run to the database.
pub fn save_run(pool: &Pool, record: &RunRecord) -> Result<()> {
    let conn = pool.get()?;

    conn.execute(
        "INSERT INTO run_log (run_id, kind, started_at, finished_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            record.run_id.to_string(),
            record.kind,
            record.start.to_rfc3339_opts(SecondsFormat::Micros, true),
            record.end.to_rfc3339_opts(SecondsFormat::Micros, true)
        ],
    )?;

    Ok(())
}

pub fn load_recent(pool: &Pool, limit: usize) -> Result<Vec<RunRecord>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT run_id, kind, started_at, finished_at FROM run_log
         ORDER BY started_at DESC, id DESC LIMIT ?1",
    )?;

    let rows = stmt.query_map(rusqlite::params![limit as i64], |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut records = Vec::new();
    for r in rows {
        let (run_id, kind, start, end) = r?;
        let run_id = match run_id {
            Some(id) => uuid::Uuid::parse_str(&id).context("corrupt run_id in run_log")?,
            None => uuid::Uuid::nil(),
        };
        records.push(RunRecord {
            run_id,
            kind,
            start: parse_ts(&start)?,
            end: parse_ts(&end)?,
        });
    }
    Ok(records)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp in run_log: {raw}"))?
        .with_timezone(&Utc))
}
