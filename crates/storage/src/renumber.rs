//! Keeps item positions contiguous (`1..=N`) and unique per session.
//!
//! Every function here assumes the caller holds the session lock and runs
//! inside one transaction; a failure part-way leaves nothing committed.

use anyhow::{bail, Result};
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

use shared::domain::{ItemOverrides, ProductId, SessionId, SessionItem};

use crate::queue;

/// Parking slot used while two items trade places. Far above any real
/// position so it never collides with `UNIQUE(session_id, position)`.
pub const PLACEHOLDER_POSITION: i64 = 1_000_000_000;

/// Adds an item after the current last position.
pub async fn append_item(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    product_id: ProductId,
    overrides: &ItemOverrides,
) -> Result<SessionItem> {
    let position = queue::max_position(conn, session_id).await? + 1;
    let item = queue::insert_item(conn, session_id, product_id, position, overrides).await?;
    touch_session(conn, session_id).await?;
    Ok(item)
}

/// Inserts an item at `position`, shifting later items down by one.
///
/// Positions outside `1..=N+1` are clamped into that range.
pub async fn insert_item_at(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    product_id: ProductId,
    position: i64,
    overrides: &ItemOverrides,
) -> Result<SessionItem> {
    let items = queue::list_items(conn, session_id).await?;
    let position = position.clamp(1, items.len() as i64 + 1);

    // Highest first, so each target slot has already been vacated.
    for item in items.iter().rev().filter(|item| item.position >= position) {
        queue::set_position(conn, item.id, item.position + 1).await?;
    }

    let mut item = queue::insert_item(conn, session_id, product_id, position, overrides).await?;
    renumber(conn, session_id).await?;
    if let Some(stored) = queue::get_item(conn, item.id).await? {
        item = stored;
    }
    touch_session(conn, session_id).await?;
    Ok(item)
}

/// Deletes an item and closes the gap it leaves. Returns the removed item.
pub async fn remove_item(
    conn: &mut SqliteConnection,
    item: &SessionItem,
) -> Result<Option<SessionItem>> {
    if !queue::delete_item(conn, item.id).await? {
        return Ok(None);
    }
    renumber(conn, item.session_id).await?;
    touch_session(conn, item.session_id).await?;
    Ok(Some(item.clone()))
}

/// Exchanges the positions of two items of the same session.
///
/// `a` parks at [`PLACEHOLDER_POSITION`], `b` takes `a`'s slot, `a` takes
/// `b`'s, then a full renumber pass repairs any gap left by earlier writes.
pub async fn swap_positions(
    conn: &mut SqliteConnection,
    a: &SessionItem,
    b: &SessionItem,
) -> Result<()> {
    if a.session_id != b.session_id {
        bail!(
            "items {} and {} belong to different sessions ({} vs {})",
            a.id,
            b.id,
            a.session_id,
            b.session_id
        );
    }
    if a.id == b.id {
        return Ok(());
    }

    queue::set_position(conn, a.id, PLACEHOLDER_POSITION).await?;
    queue::set_position(conn, b.id, a.position).await?;
    queue::set_position(conn, a.id, b.position).await?;
    renumber(conn, a.session_id).await?;
    touch_session(conn, a.session_id).await?;
    Ok(())
}

/// Reassigns positions `1..=N` in current order, writing only rows whose
/// position changes. Returns how many rows moved.
///
/// Positions are distinct and positive, so the k-th smallest is always at
/// least `k`; walking upward, every target slot is already free.
pub async fn renumber(conn: &mut SqliteConnection, session_id: SessionId) -> Result<usize> {
    let items = queue::list_items(conn, session_id).await?;
    let mut moved = 0;
    for (index, item) in items.iter().enumerate() {
        let expected = index as i64 + 1;
        if item.position != expected {
            queue::set_position(conn, item.id, expected).await?;
            moved += 1;
        }
    }
    if moved > 0 {
        debug!(session_id = session_id.0, moved, "renumbered session items");
    }
    Ok(moved)
}

/// Marks the session as recently modified.
pub async fn touch_session(conn: &mut SqliteConnection, session_id: SessionId) -> Result<()> {
    sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(session_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
