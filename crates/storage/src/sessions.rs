//! Session rows, as statements that compose inside a caller's transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use shared::domain::{SessionId, SessionSummary};

pub async fn insert_session(conn: &mut SqliteConnection, title: &str) -> Result<SessionSummary> {
    let now = Utc::now();
    let row = sqlx::query(
        "INSERT INTO sessions (title, created_at, updated_at) VALUES (?, ?, ?)
         RETURNING id, title, updated_at",
    )
    .bind(title)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .context("failed to insert session")?;
    Ok(SessionSummary {
        session_id: SessionId(row.get::<i64, _>(0)),
        title: row.get::<String, _>(1),
        updated_at: row.get::<DateTime<Utc>, _>(2),
    })
}

/// Takes the write lock and reports whether the session still exists.
///
/// Must be the first statement of a transaction: a deferred transaction that
/// reads before it writes can fail to upgrade once another writer commits.
pub async fn claim(conn: &mut SqliteConnection, session_id: SessionId) -> Result<bool> {
    let result = sqlx::query("UPDATE sessions SET title = title WHERE id = ?")
        .bind(session_id.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to claim session {session_id}"))?;
    Ok(result.rows_affected() > 0)
}
