//! Session coordinator: the only writer of playback cursors.
//!
//! Every mutating operation follows the same shape: take the session lock,
//! open one transaction, re-read cursor and queue inside it, compute the
//! change, commit, then publish the full new value. Nothing is published for
//! a request that fails, and a failed publish never undoes a commit.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use fanout::{Broadcaster, Topic};
use navigation::{compute_next_cursor, reconcile_removed_item, NavCommand};
use serde::Serialize;
use shared::{
    domain::{
        ImageDirection, ItemId, ItemOverrides, ProductId, SessionCursor, SessionId, SessionItem,
        SessionSummary,
    },
    protocol::{ProducerCommand, ServerEvent},
};
use storage::{cursor, queue, renumber, sessions, ProductCatalog, Storage, StoreTx};
use tracing::{debug, info};

mod error;
pub mod locks;

pub use error::CoordinatorError;
pub use locks::{SessionGuard, SessionLocks};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2_000);
pub const MAX_OVERLAY_TEXT_BYTES: usize = 280;
const MAX_TITLE_BYTES: usize = 200;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub lock_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// What a producer command produced, for callers that dispatch generically.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CommandOutcome {
    Cursor(SessionCursor),
    Item(SessionItem),
    Queue(Vec<SessionItem>),
}

#[derive(Clone)]
pub struct Coordinator {
    storage: Storage,
    catalog: Arc<dyn ProductCatalog>,
    broadcaster: Arc<dyn Broadcaster>,
    locks: Arc<SessionLocks>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        storage: Storage,
        catalog: Arc<dyn ProductCatalog>,
        broadcaster: Arc<dyn Broadcaster>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            storage,
            catalog,
            broadcaster,
            locks: Arc::new(SessionLocks::new()),
            config,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn broadcaster(&self) -> &Arc<dyn Broadcaster> {
        &self.broadcaster
    }

    /// Creates a session whose queue holds `products` at positions `1..=N`.
    pub async fn create_session(
        &self,
        title: &str,
        products: &[ProductId],
    ) -> CoordinatorResult<(SessionSummary, Vec<SessionItem>)> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CoordinatorError::Validation(
                "session title cannot be empty".into(),
            ));
        }
        if title.len() > MAX_TITLE_BYTES {
            return Err(CoordinatorError::Validation(
                "session title is too long".into(),
            ));
        }

        // No lock: the id is not visible to anyone until the commit.
        let mut tx = self.storage.begin().await?;
        let summary = sessions::insert_session(&mut tx, title).await?;
        let session_id = summary.session_id;
        cursor::lock_and_get(&mut tx, session_id).await?;
        for product_id in products {
            renumber::append_item(&mut tx, session_id, *product_id, &ItemOverrides::default())
                .await?;
        }
        let items = queue::list_items(&mut tx, session_id).await?;
        tx.commit()
            .await
            .context("failed to commit session creation")?;

        info!(
            session_id = session_id.0,
            items = items.len(),
            "session created"
        );
        Ok((summary, items))
    }

    pub async fn delete_session(&self, session_id: SessionId) -> CoordinatorResult<()> {
        let _guard = self.lock(session_id).await?;
        if !self.storage.delete_session(session_id).await? {
            return Err(CoordinatorError::session_not_found(session_id));
        }
        info!(session_id = session_id.0, "session deleted");
        Ok(())
    }

    /// Latest committed cursor. Consumers call this after (re)connecting
    /// instead of relying on having seen every notification.
    pub async fn current_cursor(&self, session_id: SessionId) -> CoordinatorResult<SessionCursor> {
        if let Some(cursor) = self.storage.load_cursor(session_id).await? {
            return Ok(cursor);
        }
        self.ensure_session(session_id).await?;

        let (tx, cursor) = self.begin_claimed(session_id).await?;
        tx.commit().await.context("failed to commit cursor creation")?;
        Ok(cursor)
    }

    pub async fn list_items(&self, session_id: SessionId) -> CoordinatorResult<Vec<SessionItem>> {
        self.ensure_session(session_id).await?;
        Ok(self.storage.list_items(session_id).await?)
    }

    /// Points the cursor at position 1. Calling it again reaffirms the first
    /// item.
    pub async fn initialize_cursor(&self, session_id: SessionId) -> CoordinatorResult<SessionCursor> {
        self.navigate(session_id, NavCommand::Initialize).await
    }

    pub async fn jump_to_product(
        &self,
        session_id: SessionId,
        position: i64,
    ) -> CoordinatorResult<SessionCursor> {
        self.navigate(session_id, NavCommand::JumpTo(position)).await
    }

    pub async fn advance_to_next(&self, session_id: SessionId) -> CoordinatorResult<SessionCursor> {
        self.navigate(session_id, NavCommand::Next).await
    }

    pub async fn go_to_previous(&self, session_id: SessionId) -> CoordinatorResult<SessionCursor> {
        self.navigate(session_id, NavCommand::Previous).await
    }

    pub async fn cycle_image(
        &self,
        session_id: SessionId,
        direction: ImageDirection,
    ) -> CoordinatorResult<SessionCursor> {
        self.ensure_session(session_id).await?;
        let _guard = self.lock(session_id).await?;
        // The lock pins the current item, so the count resolved here is still
        // the right one when the transaction runs.
        let image_count = self.current_image_count(session_id).await?;
        let cursor = self
            .commit_transition(
                session_id,
                NavCommand::CycleImage {
                    direction,
                    image_count,
                },
            )
            .await?;
        self.publish_cursor(&cursor, "cycle_image");
        Ok(cursor)
    }

    pub async fn set_overlay_message(
        &self,
        session_id: SessionId,
        text: &str,
        color: &str,
    ) -> CoordinatorResult<SessionCursor> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoordinatorError::Validation(
                "overlay text cannot be empty".into(),
            ));
        }
        if text.len() > MAX_OVERLAY_TEXT_BYTES {
            return Err(CoordinatorError::Validation(format!(
                "overlay text exceeds {MAX_OVERLAY_TEXT_BYTES} bytes"
            )));
        }
        let color = color.trim();
        if color.is_empty() {
            return Err(CoordinatorError::Validation(
                "overlay color cannot be empty".into(),
            ));
        }
        self.navigate(session_id, NavCommand::set_overlay(text, color))
            .await
    }

    pub async fn clear_overlay_message(
        &self,
        session_id: SessionId,
    ) -> CoordinatorResult<SessionCursor> {
        self.navigate(session_id, NavCommand::ClearOverlayMessage)
            .await
    }

    /// Adds a product to the session. Without a position it is appended;
    /// with one it is inserted there and later items shift down.
    pub async fn add_item(
        &self,
        session_id: SessionId,
        product_id: ProductId,
        position: Option<i64>,
        overrides: ItemOverrides,
    ) -> CoordinatorResult<SessionItem> {
        self.ensure_session(session_id).await?;
        let _guard = self.lock(session_id).await?;

        let (mut tx, _) = self.begin_claimed(session_id).await?;
        let item = match position {
            Some(position) => {
                renumber::insert_item_at(&mut tx, session_id, product_id, position, &overrides)
                    .await?
            }
            None => renumber::append_item(&mut tx, session_id, product_id, &overrides).await?,
        };
        let items = queue::list_items(&mut tx, session_id).await?;
        tx.commit().await.context("failed to commit item insert")?;

        info!(
            session_id = session_id.0,
            item_id = item.id.0,
            position = item.position,
            "item added"
        );
        self.publish_queue(session_id, items);
        Ok(item)
    }

    /// Removes an item and closes the gap. If the cursor pointed at it, the
    /// cursor moves to the item that took its place (or the new last item).
    pub async fn remove_item(&self, item_id: ItemId) -> CoordinatorResult<Vec<SessionItem>> {
        let session_id = self.session_of(item_id).await?;
        let _guard = self.lock(session_id).await?;

        let (mut tx, current) = self.begin_claimed(session_id).await?;
        let item = queue::get_item(&mut tx, item_id)
            .await?
            .filter(|item| item.session_id == session_id)
            .ok_or_else(|| CoordinatorError::item_not_found(item_id))?;
        renumber::remove_item(&mut tx, &item)
            .await?
            .ok_or_else(|| CoordinatorError::item_not_found(item_id))?;
        let items = queue::list_items(&mut tx, session_id).await?;
        let moved = match reconcile_removed_item(&items, &current, item.id, item.position) {
            Some(next) => Some(cursor::upsert(&mut tx, &next).await?),
            None => None,
        };
        tx.commit().await.context("failed to commit item removal")?;

        info!(
            session_id = session_id.0,
            item_id = item_id.0,
            remaining = items.len(),
            "item removed"
        );
        self.publish_queue(session_id, items.clone());
        if let Some(cursor) = moved {
            self.publish_cursor(&cursor, "remove_item");
        }
        Ok(items)
    }

    /// Exchanges the positions of two items in the same session.
    pub async fn swap_positions(
        &self,
        item_a: ItemId,
        item_b: ItemId,
    ) -> CoordinatorResult<Vec<SessionItem>> {
        let session_a = self.session_of(item_a).await?;
        let session_b = self.session_of(item_b).await?;
        if session_a != session_b {
            return Err(CoordinatorError::DifferentSessions(item_a, item_b));
        }
        let session_id = session_a;
        let _guard = self.lock(session_id).await?;

        let (mut tx, _) = self.begin_claimed(session_id).await?;
        let a = queue::get_item(&mut tx, item_a)
            .await?
            .ok_or_else(|| CoordinatorError::item_not_found(item_a))?;
        let b = queue::get_item(&mut tx, item_b)
            .await?
            .ok_or_else(|| CoordinatorError::item_not_found(item_b))?;
        if a.session_id != b.session_id {
            return Err(CoordinatorError::DifferentSessions(item_a, item_b));
        }
        renumber::swap_positions(&mut tx, &a, &b).await?;
        let items = queue::list_items(&mut tx, session_id).await?;
        tx.commit().await.context("failed to commit swap")?;

        info!(
            session_id = session_id.0,
            item_a = item_a.0,
            item_b = item_b.0,
            "positions swapped"
        );
        self.publish_queue(session_id, items.clone());
        Ok(items)
    }

    /// Applies a producer command addressed to `session_id`.
    pub async fn apply(
        &self,
        session_id: SessionId,
        command: ProducerCommand,
    ) -> CoordinatorResult<CommandOutcome> {
        let outcome = match command {
            ProducerCommand::Initialize => {
                CommandOutcome::Cursor(self.initialize_cursor(session_id).await?)
            }
            ProducerCommand::JumpTo { position } => {
                CommandOutcome::Cursor(self.jump_to_product(session_id, position).await?)
            }
            ProducerCommand::Next => CommandOutcome::Cursor(self.advance_to_next(session_id).await?),
            ProducerCommand::Previous => {
                CommandOutcome::Cursor(self.go_to_previous(session_id).await?)
            }
            ProducerCommand::CycleImage { direction } => {
                CommandOutcome::Cursor(self.cycle_image(session_id, direction).await?)
            }
            ProducerCommand::SetOverlayMessage { text, color } => {
                CommandOutcome::Cursor(self.set_overlay_message(session_id, &text, &color).await?)
            }
            ProducerCommand::ClearOverlayMessage => {
                CommandOutcome::Cursor(self.clear_overlay_message(session_id).await?)
            }
            ProducerCommand::AddItem {
                product_id,
                position,
                overrides,
            } => CommandOutcome::Item(
                self.add_item(session_id, product_id, position, overrides)
                    .await?,
            ),
            ProducerCommand::RemoveItem { item_id } => {
                self.ensure_item_in_session(session_id, item_id).await?;
                CommandOutcome::Queue(self.remove_item(item_id).await?)
            }
            ProducerCommand::SwapPositions { item_a, item_b } => {
                self.ensure_item_in_session(session_id, item_a).await?;
                CommandOutcome::Queue(self.swap_positions(item_a, item_b).await?)
            }
        };
        Ok(outcome)
    }

    async fn navigate(
        &self,
        session_id: SessionId,
        command: NavCommand,
    ) -> CoordinatorResult<SessionCursor> {
        self.ensure_session(session_id).await?;
        let _guard = self.lock(session_id).await?;
        let cursor = self.commit_transition(session_id, command.clone()).await?;
        self.publish_cursor(&cursor, command.name());
        Ok(cursor)
    }

    /// One transaction: claim the session, re-read, compute, persist.
    /// Dropping `tx` on any error rolls back, including a freshly created row.
    async fn commit_transition(
        &self,
        session_id: SessionId,
        command: NavCommand,
    ) -> CoordinatorResult<SessionCursor> {
        let (mut tx, current) = self.begin_claimed(session_id).await?;
        let queue = queue::list_items(&mut tx, session_id).await?;
        let next = compute_next_cursor(&queue, &current, &command)?;
        let stored = cursor::upsert(&mut tx, &next).await?;
        tx.commit().await.context("failed to commit cursor")?;
        Ok(stored)
    }

    /// Opens the transaction every session mutation runs in. The session row
    /// is claimed first, so a session deleted after the pre-lock check is
    /// reported as not found instead of failing a foreign key.
    async fn begin_claimed(
        &self,
        session_id: SessionId,
    ) -> CoordinatorResult<(StoreTx, SessionCursor)> {
        let mut tx = self.storage.begin().await?;
        if !sessions::claim(&mut tx, session_id).await? {
            return Err(CoordinatorError::session_not_found(session_id));
        }
        let cursor = cursor::lock_and_get(&mut tx, session_id).await?;
        Ok((tx, cursor))
    }

    async fn current_image_count(&self, session_id: SessionId) -> CoordinatorResult<u32> {
        let item_id = self
            .storage
            .load_cursor(session_id)
            .await?
            .and_then(|cursor| cursor.current_item_id)
            .ok_or_else(|| {
                CoordinatorError::NotFound("current item (cursor not initialized)".into())
            })?;
        let item = self
            .storage
            .get_item(item_id)
            .await?
            .ok_or_else(|| CoordinatorError::item_not_found(item_id))?;
        Ok(self.catalog.image_count(item.product_id).await?.unwrap_or(0))
    }

    async fn lock(&self, session_id: SessionId) -> CoordinatorResult<SessionGuard> {
        self.locks
            .acquire(session_id, self.config.lock_timeout)
            .await
    }

    async fn ensure_session(&self, session_id: SessionId) -> CoordinatorResult<()> {
        self.storage
            .load_session(session_id)
            .await?
            .map(|_| ())
            .ok_or_else(|| CoordinatorError::session_not_found(session_id))
    }

    async fn session_of(&self, item_id: ItemId) -> CoordinatorResult<SessionId> {
        self.storage
            .get_item(item_id)
            .await?
            .map(|item| item.session_id)
            .ok_or_else(|| CoordinatorError::item_not_found(item_id))
    }

    async fn ensure_item_in_session(
        &self,
        session_id: SessionId,
        item_id: ItemId,
    ) -> CoordinatorResult<()> {
        if self.session_of(item_id).await? != session_id {
            return Err(CoordinatorError::NotFound(format!(
                "item {item_id} in session {session_id}"
            )));
        }
        Ok(())
    }

    fn publish_cursor(&self, cursor: &SessionCursor, cause: &str) {
        let receivers = self.broadcaster.publish(
            Topic::Cursor(cursor.session_id),
            ServerEvent::CursorChanged {
                cursor: cursor.clone(),
            },
        );
        info!(
            session_id = cursor.session_id.0,
            version = cursor.version,
            cause,
            receivers,
            "cursor committed"
        );
    }

    fn publish_queue(&self, session_id: SessionId, items: Vec<SessionItem>) {
        let receivers = self.broadcaster.publish(
            Topic::Queue(session_id),
            ServerEvent::QueueChanged { session_id, items },
        );
        debug!(session_id = session_id.0, receivers, "queue published");
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
