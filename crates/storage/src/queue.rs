//! Queue store primitives. Callers supply the connection, normally a
//! transaction already holding the session lock.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use shared::domain::{ItemId, ItemOverrides, ProductId, SessionId, SessionItem};

const ITEM_COLUMNS: &str =
    "id, session_id, product_id, position, display_name, price_cents, featured_text";

pub async fn list_items(
    conn: &mut SqliteConnection,
    session_id: SessionId,
) -> Result<Vec<SessionItem>> {
    let rows = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM session_items WHERE session_id = ? ORDER BY position ASC"
    ))
    .bind(session_id.0)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("failed to list items for session {session_id}"))?;
    rows.iter().map(item_from_row).collect()
}

pub async fn get_item(conn: &mut SqliteConnection, item_id: ItemId) -> Result<Option<SessionItem>> {
    let row = sqlx::query(&format!(
        "SELECT {ITEM_COLUMNS} FROM session_items WHERE id = ?"
    ))
    .bind(item_id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(item_from_row).transpose()
}

pub async fn max_position(conn: &mut SqliteConnection, session_id: SessionId) -> Result<i64> {
    let max: Option<i64> =
        sqlx::query_scalar("SELECT MAX(position) FROM session_items WHERE session_id = ?")
            .bind(session_id.0)
            .fetch_one(&mut *conn)
            .await?;
    Ok(max.unwrap_or(0))
}

pub async fn insert_item(
    conn: &mut SqliteConnection,
    session_id: SessionId,
    product_id: ProductId,
    position: i64,
    overrides: &ItemOverrides,
) -> Result<SessionItem> {
    let rec = sqlx::query(
        "INSERT INTO session_items (session_id, product_id, position, display_name, price_cents, featured_text)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(session_id.0)
    .bind(product_id.0)
    .bind(position)
    .bind(overrides.display_name.as_deref())
    .bind(overrides.price_cents)
    .bind(overrides.featured_text.as_deref())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| {
        format!("failed to insert product {product_id} at position {position} in session {session_id}")
    })?;

    Ok(SessionItem {
        id: ItemId(rec.get::<i64, _>(0)),
        session_id,
        product_id,
        position,
        overrides: overrides.clone(),
    })
}

pub async fn set_position(conn: &mut SqliteConnection, item_id: ItemId, position: i64) -> Result<()> {
    sqlx::query("UPDATE session_items SET position = ? WHERE id = ?")
        .bind(position)
        .bind(item_id.0)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("failed to move item {item_id} to position {position}"))?;
    Ok(())
}

pub async fn delete_item(conn: &mut SqliteConnection, item_id: ItemId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM session_items WHERE id = ?")
        .bind(item_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn item_from_row(row: &SqliteRow) -> Result<SessionItem> {
    Ok(SessionItem {
        id: ItemId(row.try_get("id")?),
        session_id: SessionId(row.try_get("session_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        position: row.try_get("position")?,
        overrides: ItemOverrides {
            display_name: row.try_get("display_name")?,
            price_cents: row.try_get("price_cents")?,
            featured_text: row.try_get("featured_text")?,
        },
    })
}
