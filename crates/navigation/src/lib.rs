//! Cursor transitions for a live session.
//!
//! Everything here is a pure function of the queue, the current cursor and the
//! requested command. Persistence, locking and notification live in the
//! coordinator; this crate only decides what the next cursor should be.

use chrono::{DateTime, Utc};
use shared::domain::{
    ImageDirection, ItemId, OverlayId, OverlayMessage, SessionCursor, SessionItem,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationError {
    #[error("no item occupies position {0}")]
    InvalidPosition(i64),
    #[error("already at the last item of the session")]
    EndOfSession,
    #[error("already at the first item of the session")]
    StartOfSession,
    #[error("current item has no images")]
    NoImages,
    #[error("session has no products")]
    NoProducts,
    #[error("cursor has no current item")]
    NoCurrentItem,
    #[error("current item {0} is not in the session queue")]
    CurrentItemMissing(ItemId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavCommand {
    /// Point at the item in position 1.
    Initialize,
    JumpTo(i64),
    Next,
    Previous,
    CycleImage {
        direction: ImageDirection,
        image_count: u32,
    },
    SetOverlayMessage(OverlayMessage),
    ClearOverlayMessage,
}

impl NavCommand {
    /// Builds an overlay command with a fresh id stamped at the current time.
    pub fn set_overlay(text: impl Into<String>, color: impl Into<String>) -> Self {
        Self::set_overlay_at(text, color, OverlayId::generate(), Utc::now())
    }

    pub fn set_overlay_at(
        text: impl Into<String>,
        color: impl Into<String>,
        id: OverlayId,
        created_at: DateTime<Utc>,
    ) -> Self {
        NavCommand::SetOverlayMessage(OverlayMessage {
            id,
            text: text.into(),
            color: color.into(),
            created_at,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            NavCommand::Initialize => "initialize",
            NavCommand::JumpTo(_) => "jump_to",
            NavCommand::Next => "next",
            NavCommand::Previous => "previous",
            NavCommand::CycleImage { .. } => "cycle_image",
            NavCommand::SetOverlayMessage(_) => "set_overlay_message",
            NavCommand::ClearOverlayMessage => "clear_overlay_message",
        }
    }
}

/// Computes the cursor that results from applying `command`.
///
/// The queue need not be sorted. The returned cursor keeps the input's
/// `version` and `updated_at`; stamping those is the store's job.
pub fn compute_next_cursor(
    queue: &[SessionItem],
    cursor: &SessionCursor,
    command: &NavCommand,
) -> Result<SessionCursor, NavigationError> {
    let mut next = cursor.clone();
    match command {
        NavCommand::Initialize => {
            let first = item_at(queue, 1).ok_or(NavigationError::NoProducts)?;
            point_at(&mut next, first);
        }
        NavCommand::JumpTo(position) => {
            let target =
                item_at(queue, *position).ok_or(NavigationError::InvalidPosition(*position))?;
            point_at(&mut next, target);
        }
        NavCommand::Next => {
            let current = current_item(queue, cursor)?;
            let target = queue
                .iter()
                .filter(|item| item.position > current.position)
                .min_by_key(|item| item.position)
                .ok_or(NavigationError::EndOfSession)?;
            point_at(&mut next, target);
        }
        NavCommand::Previous => {
            let current = current_item(queue, cursor)?;
            let target = queue
                .iter()
                .filter(|item| item.position < current.position)
                .max_by_key(|item| item.position)
                .ok_or(NavigationError::StartOfSession)?;
            point_at(&mut next, target);
        }
        NavCommand::CycleImage {
            direction,
            image_count,
        } => {
            current_item(queue, cursor)?;
            next.current_image_index =
                cycle_index(cursor.current_image_index, *direction, *image_count)?;
        }
        NavCommand::SetOverlayMessage(message) => {
            next.overlay_message = Some(message.clone());
        }
        NavCommand::ClearOverlayMessage => {
            next.overlay_message = None;
        }
    }
    Ok(next)
}

/// Modular image step. `count == 0` has no valid index.
pub fn cycle_index(
    index: u32,
    direction: ImageDirection,
    count: u32,
) -> Result<u32, NavigationError> {
    if count == 0 {
        return Err(NavigationError::NoImages);
    }
    let index = index % count;
    Ok(match direction {
        ImageDirection::Forward if index + 1 == count => 0,
        ImageDirection::Forward => index + 1,
        ImageDirection::Backward if index == 0 => count - 1,
        ImageDirection::Backward => index - 1,
    })
}

/// Relocates a cursor whose current item was just removed from the queue.
///
/// `queue` is the already renumbered queue. The cursor moves to the item that
/// took over `removed_position`, or to the new last item when the removed one
/// was last, or to nothing when the queue is now empty. Returns `None` when the
/// cursor did not reference the removed item and needs no change.
pub fn reconcile_removed_item(
    queue: &[SessionItem],
    cursor: &SessionCursor,
    removed_item: ItemId,
    removed_position: i64,
) -> Option<SessionCursor> {
    if cursor.current_item_id != Some(removed_item) {
        return None;
    }
    let mut next = cursor.clone();
    let successor = item_at(queue, removed_position).or_else(|| {
        queue
            .iter()
            .filter(|item| item.position < removed_position)
            .max_by_key(|item| item.position)
    });
    match successor {
        Some(item) => point_at(&mut next, item),
        None => {
            next.current_item_id = None;
            next.current_image_index = 0;
        }
    }
    Some(next)
}

fn item_at(queue: &[SessionItem], position: i64) -> Option<&SessionItem> {
    queue.iter().find(|item| item.position == position)
}

fn current_item<'a>(
    queue: &'a [SessionItem],
    cursor: &SessionCursor,
) -> Result<&'a SessionItem, NavigationError> {
    let current_id = cursor
        .current_item_id
        .ok_or(NavigationError::NoCurrentItem)?;
    queue
        .iter()
        .find(|item| item.id == current_id)
        .ok_or(NavigationError::CurrentItemMissing(current_id))
}

fn point_at(cursor: &mut SessionCursor, item: &SessionItem) {
    cursor.current_item_id = Some(item.id);
    cursor.current_image_index = 0;
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
