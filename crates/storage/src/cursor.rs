//! Cursor store: one row per session, written only under the session lock.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use shared::domain::{ItemId, OverlayId, OverlayMessage, SessionCursor, SessionId};

const CURSOR_COLUMNS: &str = "session_id, current_item_id, current_image_index, overlay_id, \
     overlay_text, overlay_color, overlay_created_at, version, updated_at";

/// Ensures the cursor row exists and returns it.
///
/// The insert runs before the read so the transaction holds SQLite's write
/// lock by then; two first touches of the same session cannot both create
/// the row, and the subsequent read sees state no other writer can change
/// until commit.
pub async fn lock_and_get(
    conn: &mut SqliteConnection,
    session_id: SessionId,
) -> Result<SessionCursor> {
    sqlx::query(
        "INSERT INTO session_cursors (session_id, updated_at) VALUES (?, ?)
         ON CONFLICT(session_id) DO NOTHING",
    )
    .bind(session_id.0)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to lock cursor for session {session_id}"))?;

    get_cursor(conn, session_id)
        .await?
        .ok_or_else(|| anyhow!("cursor row for session {session_id} vanished inside transaction"))
}

pub async fn get_cursor(
    conn: &mut SqliteConnection,
    session_id: SessionId,
) -> Result<Option<SessionCursor>> {
    let row = sqlx::query(&format!(
        "SELECT {CURSOR_COLUMNS} FROM session_cursors WHERE session_id = ?"
    ))
    .bind(session_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(cursor_from_row).transpose()
}

/// Writes `cursor`, bumping its version and stamping `updated_at`. Returns the
/// row as stored.
pub async fn upsert(conn: &mut SqliteConnection, cursor: &SessionCursor) -> Result<SessionCursor> {
    let overlay = cursor.overlay_message.as_ref();
    let row = sqlx::query(&format!(
        "INSERT INTO session_cursors (
             session_id, current_item_id, current_image_index, overlay_id,
             overlay_text, overlay_color, overlay_created_at, version, updated_at
         )
         VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
         ON CONFLICT(session_id) DO UPDATE SET
             current_item_id = excluded.current_item_id,
             current_image_index = excluded.current_image_index,
             overlay_id = excluded.overlay_id,
             overlay_text = excluded.overlay_text,
             overlay_color = excluded.overlay_color,
             overlay_created_at = excluded.overlay_created_at,
             version = session_cursors.version + 1,
             updated_at = excluded.updated_at
         RETURNING {CURSOR_COLUMNS}"
    ))
    .bind(cursor.session_id.0)
    .bind(cursor.current_item_id.map(|id| id.0))
    .bind(i64::from(cursor.current_image_index))
    .bind(overlay.map(|m| m.id.0.to_string()))
    .bind(overlay.map(|m| m.text.as_str()))
    .bind(overlay.map(|m| m.color.as_str()))
    .bind(overlay.map(|m| m.created_at))
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to persist cursor for session {}", cursor.session_id))?;
    cursor_from_row(&row)
}

fn cursor_from_row(row: &SqliteRow) -> Result<SessionCursor> {
    let image_index: i64 = row.try_get("current_image_index")?;
    let overlay_id: Option<String> = row.try_get("overlay_id")?;
    let overlay_message = match overlay_id {
        Some(raw_id) => Some(OverlayMessage {
            id: OverlayId(
                Uuid::parse_str(&raw_id)
                    .with_context(|| format!("stored overlay id '{raw_id}' is not a uuid"))?,
            ),
            text: row.try_get::<Option<String>, _>("overlay_text")?.unwrap_or_default(),
            color: row.try_get::<Option<String>, _>("overlay_color")?.unwrap_or_default(),
            created_at: row
                .try_get::<Option<DateTime<Utc>>, _>("overlay_created_at")?
                .unwrap_or_else(Utc::now),
        }),
        None => None,
    };

    Ok(SessionCursor {
        session_id: SessionId(row.try_get("session_id")?),
        current_item_id: row.try_get::<Option<i64>, _>("current_item_id")?.map(ItemId),
        current_image_index: u32::try_from(image_index).unwrap_or(0),
        overlay_message,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}
