use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(SessionId);
id_newtype!(ItemId);
id_newtype!(ProductId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayId(pub Uuid);

impl OverlayId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageDirection {
    Forward,
    Backward,
}

/// Per-session presentation overrides layered over the catalog record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_text: Option<String>,
}

/// One slot in a session's queue. Positions within a session are always `1..=N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionItem {
    pub id: ItemId,
    pub session_id: SessionId,
    pub product_id: ProductId,
    pub position: i64,
    #[serde(default)]
    pub overrides: ItemOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayMessage {
    pub id: OverlayId,
    pub text: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

/// The "now playing" pointer. Exactly one exists per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCursor {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<ItemId>,
    pub current_image_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_message: Option<OverlayMessage>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl SessionCursor {
    pub fn empty(session_id: SessionId, updated_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            current_item_id: None,
            current_image_index: 0,
            overlay_message: None,
            version: 0,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

/// Positions are valid when they are exactly `1..=items.len()` in order.
pub fn positions_are_contiguous(items: &[SessionItem]) -> bool {
    let mut positions: Vec<i64> = items.iter().map(|item| item.position).collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(index, position)| *position == index as i64 + 1)
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
