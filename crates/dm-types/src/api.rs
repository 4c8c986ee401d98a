use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Single message --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageParams {
    pub chat_id: String,
    pub message_id: String,
}

// -- Message feed --

/// Page request for a chat's feed. Both time bounds are exclusive; an
/// inverted window is valid and yields an empty page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagesAndReactionsParams {
    pub user_id: i32,
    pub chat_id: String,
    pub limit: NonZeroU32,
    pub before: DateTime<Utc>,
    pub after: DateTime<Utc>,
}

impl ChatMessagesAndReactionsParams {
    /// The stricter of `after` and the member's history-clear time.
    pub fn lower_bound(&self, cleared_history_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match cleared_history_at {
            Some(cleared) if cleared > self.after => cleared,
            _ => self.after,
        }
    }

    /// Copy of these params with the limit capped at `max`.
    pub fn clamped(&self, max: NonZeroU32) -> Self {
        Self {
            limit: self.limit.min(max),
            ..self.clone()
        }
    }
}

// -- Counts --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumChatMessagesSinceParams {
    pub user_id: i32,
    pub cursor: DateTime<Utc>,
}

/// Messages a user authored after a cursor, summed over all chats and
/// maximised per chat. Both are zero when nothing qualifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumChatMessagesSince {
    pub total_count: u64,
    pub max_count_per_chat: u64,
}
