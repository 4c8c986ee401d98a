//! Database row types. Timestamps stay as raw TEXT here and are decoded
//! into `dm-types` records in one place, so a corrupt value becomes a
//! `DbError::Decoding` naming the column it came from.

use chrono::{DateTime, Utc};
use dm_types::models::{ChatMember, ChatMessage, ChatMessageReaction};
use dm_types::timestamp;
use rusqlite::Row;

use crate::{DbError, Result};

pub struct MessageRow {
    pub message_id: String,
    pub chat_id: String,
    pub user_id: i32,
    pub created_at: String,
    pub ciphertext: String,
}

pub struct MemberRow {
    pub chat_id: String,
    pub user_id: i32,
    pub cleared_history_at: Option<String>,
}

pub struct ReactionRow {
    pub user_id: i32,
    pub message_id: String,
    pub reaction: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MessageRow {
    /// Expects `message_id, chat_id, user_id, created_at, ciphertext`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            message_id: row.get(0)?,
            chat_id: row.get(1)?,
            user_id: row.get(2)?,
            created_at: row.get(3)?,
            ciphertext: row.get(4)?,
        })
    }

    pub fn into_message(self) -> Result<ChatMessage> {
        Ok(ChatMessage {
            created_at: decode_column("chat_message.created_at", &self.created_at)?,
            message_id: self.message_id,
            chat_id: self.chat_id,
            user_id: self.user_id,
            ciphertext: self.ciphertext,
        })
    }
}

impl MemberRow {
    /// Expects `chat_id, user_id, cleared_history_at`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chat_id: row.get(0)?,
            user_id: row.get(1)?,
            cleared_history_at: row.get(2)?,
        })
    }

    pub fn into_member(self) -> Result<ChatMember> {
        let cleared_history_at = self
            .cleared_history_at
            .as_deref()
            .map(|raw| decode_column("chat_member.cleared_history_at", raw))
            .transpose()?;

        Ok(ChatMember {
            chat_id: self.chat_id,
            user_id: self.user_id,
            cleared_history_at,
        })
    }
}

impl ReactionRow {
    /// Expects `user_id, message_id, reaction, created_at, updated_at`.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            message_id: row.get(1)?,
            reaction: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    pub fn into_reaction(self) -> Result<ChatMessageReaction> {
        Ok(ChatMessageReaction {
            created_at: decode_column("chat_message_reactions.created_at", &self.created_at)?,
            updated_at: decode_column("chat_message_reactions.updated_at", &self.updated_at)?,
            user_id: self.user_id,
            message_id: self.message_id,
            reaction: self.reaction,
        })
    }
}

fn decode_column(column: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    timestamp::decode(raw).map_err(|source| DbError::Decoding { column, source })
}
