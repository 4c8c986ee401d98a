use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

/// A stored direct message. The ciphertext is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub chat_id: String,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub ciphertext: String,
}

/// A user's membership in a chat. Messages created at or before
/// `cleared_history_at` are hidden from this member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub chat_id: String,
    pub user_id: i32,
    pub cleared_history_at: Option<DateTime<Utc>>,
}

/// One user's reaction to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageReaction {
    pub user_id: i32,
    pub message_id: String,
    pub reaction: String,
    #[serde(with = "timestamp::serde_text")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp::serde_text")]
    pub updated_at: DateTime<Utc>,
}

/// A feed entry: the message plus every reaction on it (possibly none).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageAndReactions {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub reactions: Vec<ChatMessageReaction>,
}
