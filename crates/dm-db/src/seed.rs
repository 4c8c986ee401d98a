//! Row seeding for tests. Production writes belong to the message write
//! path; these helpers only exist so read queries have data to run on.

use chrono::{DateTime, Utc};
use dm_types::models::{ChatMessage, ChatMessageReaction};
use dm_types::timestamp;

use crate::{Database, Result};

impl Database {
    pub fn seed_chat(&self, chat_id: &str, created_at: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat (chat_id, created_at) VALUES (?1, ?2)",
                (chat_id, timestamp::encode(&created_at)),
            )?;
            Ok(())
        })
    }

    pub fn seed_member(
        &self,
        chat_id: &str,
        user_id: i32,
        cleared_history_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_member (chat_id, user_id, cleared_history_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    chat_id,
                    user_id,
                    cleared_history_at.as_ref().map(timestamp::encode),
                    timestamp::encode(&Utc::now()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn seed_message(&self, message: &ChatMessage) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_message (message_id, chat_id, user_id, created_at, ciphertext)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.message_id,
                    message.chat_id,
                    message.user_id,
                    timestamp::encode(&message.created_at),
                    message.ciphertext,
                ],
            )?;
            Ok(())
        })
    }

    pub fn seed_reaction(&self, reaction: &ChatMessageReaction) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_message_reactions (user_id, message_id, reaction, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    reaction.user_id,
                    reaction.message_id,
                    reaction.reaction,
                    timestamp::encode(&reaction.created_at),
                    timestamp::encode(&reaction.updated_at),
                ],
            )?;
            Ok(())
        })
    }
}
