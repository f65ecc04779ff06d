use serde::{Deserialize, Serialize};

use crate::{
    domain::{ImageDirection, ItemId, ItemOverrides, ProductId, SessionCursor, SessionId, SessionItem},
    error::ApiError,
};

/// Commands a producer console may issue for the session it is attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProducerCommand {
    Initialize,
    JumpTo {
        position: i64,
    },
    Next,
    Previous,
    CycleImage {
        direction: ImageDirection,
    },
    SetOverlayMessage {
        text: String,
        color: String,
    },
    ClearOverlayMessage,
    AddItem {
        product_id: ProductId,
        #[serde(default)]
        position: Option<i64>,
        #[serde(default)]
        overrides: ItemOverrides,
    },
    RemoveItem {
        item_id: ItemId,
    },
    SwapPositions {
        item_a: ItemId,
        item_b: ItemId,
    },
}

/// Frames pushed to every consumer attached to a session.
///
/// Payloads are always complete values; consumers replace their view rather
/// than diffing against an earlier frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Snapshot {
        cursor: SessionCursor,
        items: Vec<SessionItem>,
    },
    CursorChanged {
        cursor: SessionCursor,
    },
    QueueChanged {
        session_id: SessionId,
        items: Vec<SessionItem>,
    },
    Error(ApiError),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
