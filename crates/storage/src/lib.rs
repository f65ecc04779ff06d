use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use shared::domain::{ItemId, ProductId, SessionCursor, SessionId, SessionItem, SessionSummary};

pub mod catalog;
pub mod cursor;
pub mod queue;
pub mod renumber;
pub mod sessions;

pub use catalog::ProductCatalog;

/// How long a statement waits on another connection's write lock before
/// SQLite gives up with `SQLITE_BUSY`.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub type StoreTx = Transaction<'static, Sqlite>;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_busy_timeout(database_url, DEFAULT_BUSY_TIMEOUT).await
    }

    pub async fn with_busy_timeout(database_url: &str, busy_timeout: Duration) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Opens a transaction. Queue and cursor mutations are expressed as
    /// functions over `&mut SqliteConnection` so they compose inside it.
    pub async fn begin(&self) -> Result<StoreTx> {
        self.pool.begin().await.context("failed to open transaction")
    }

    pub async fn create_session(&self, title: &str) -> Result<SessionId> {
        let mut conn = self.pool.acquire().await?;
        let summary = sessions::insert_session(&mut conn, title).await?;
        Ok(summary.session_id)
    }

    pub async fn load_session(&self, session_id: SessionId) -> Result<Option<SessionSummary>> {
        let row = sqlx::query("SELECT id, title, updated_at FROM sessions WHERE id = ?")
            .bind(session_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| SessionSummary {
            session_id: SessionId(r.get::<i64, _>(0)),
            title: r.get::<String, _>(1),
            updated_at: r.get::<DateTime<Utc>, _>(2),
        }))
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query("SELECT id, title, updated_at FROM sessions ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| SessionSummary {
                session_id: SessionId(r.get::<i64, _>(0)),
                title: r.get::<String, _>(1),
                updated_at: r.get::<DateTime<Utc>, _>(2),
            })
            .collect())
    }

    /// Removes the session; items and the cursor go with it.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn register_product(
        &self,
        product_id: ProductId,
        name: &str,
        image_count: Option<u32>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, name, image_count) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, image_count=excluded.image_count",
        )
        .bind(product_id.0)
        .bind(name)
        .bind(image_count.map(i64::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_items(&self, session_id: SessionId) -> Result<Vec<SessionItem>> {
        let mut conn = self.pool.acquire().await?;
        queue::list_items(&mut conn, session_id).await
    }

    pub async fn get_item(&self, item_id: ItemId) -> Result<Option<SessionItem>> {
        let mut conn = self.pool.acquire().await?;
        queue::get_item(&mut conn, item_id).await
    }

    /// Last committed cursor, without taking the session lock.
    pub async fn load_cursor(&self, session_id: SessionId) -> Result<Option<SessionCursor>> {
        let mut conn = self.pool.acquire().await?;
        cursor::get_cursor(&mut conn, session_id).await
    }
}

/// True when `err` came from SQLite giving up on a lock held elsewhere
/// (`SQLITE_BUSY` or `SQLITE_LOCKED`, extended codes included).
pub fn is_busy(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| match cause.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
            _ => false,
        })
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if !database_url.starts_with("sqlite:") || database_url.starts_with("sqlite::memory:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
