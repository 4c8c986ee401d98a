use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dm_types::api::{
    ChatMessageParams, ChatMessagesAndReactionsParams, NumChatMessagesSince,
    NumChatMessagesSinceParams,
};
use dm_types::models::{ChatMember, ChatMessage, ChatMessageAndReactions, ChatMessageReaction};
use dm_types::timestamp;
use rusqlite::Connection;
use tracing::debug;

use crate::models::{MemberRow, MessageRow, ReactionRow};
use crate::{Database, DbError, Result};

/// Upper bound on bound parameters per reaction lookup statement.
const REACTION_BATCH_SIZE: usize = 500;

impl Database {
    // -- Messages --

    pub fn get_chat_message(&self, params: &ChatMessageParams) -> Result<ChatMessage> {
        self.with_conn(|conn| query_chat_message(conn, params))
    }

    pub fn get_chat_messages_and_reactions(
        &self,
        params: &ChatMessagesAndReactionsParams,
    ) -> Result<Vec<ChatMessageAndReactions>> {
        self.with_conn(|conn| query_chat_messages_and_reactions(conn, params))
    }

    // -- Members --

    pub fn get_chat_member(&self, chat_id: &str, user_id: i32) -> Result<Option<ChatMember>> {
        self.with_conn(|conn| query_chat_member(conn, chat_id, user_id))
    }

    // -- Counts --

    pub fn num_chat_messages_since(
        &self,
        params: &NumChatMessagesSinceParams,
    ) -> Result<NumChatMessagesSince> {
        self.with_conn(|conn| query_num_chat_messages_since(conn, params))
    }
}

/// Point lookup with no visibility filtering; callers authorize first.
pub fn query_chat_message(conn: &Connection, params: &ChatMessageParams) -> Result<ChatMessage> {
    let row = conn
        .query_row(
            "SELECT message_id, chat_id, user_id, created_at, ciphertext
             FROM chat_message
             WHERE chat_id = ?1 AND message_id = ?2",
            (&params.chat_id, &params.message_id),
            MessageRow::from_row,
        )
        .optional()?;

    match row {
        Some(row) => row.into_message(),
        None => Err(DbError::NotFound {
            chat_id: params.chat_id.clone(),
            message_id: params.message_id.clone(),
        }),
    }
}

pub fn query_chat_member(conn: &Connection, chat_id: &str, user_id: i32) -> Result<Option<ChatMember>> {
    conn.query_row(
        "SELECT chat_id, user_id, cleared_history_at
         FROM chat_member
         WHERE chat_id = ?1 AND user_id = ?2",
        (chat_id, user_id),
        MemberRow::from_row,
    )
    .optional()?
    .map(MemberRow::into_member)
    .transpose()
}

/// Newest-first page of a chat as seen by one member, each message merged
/// with its reactions. Non-members get an empty page.
///
/// The page and its reactions are read in one transaction so both come from
/// the same snapshot.
pub fn query_chat_messages_and_reactions(
    conn: &Connection,
    params: &ChatMessagesAndReactionsParams,
) -> Result<Vec<ChatMessageAndReactions>> {
    let tx = conn.unchecked_transaction()?;

    let Some(member) = query_chat_member(&tx, &params.chat_id, params.user_id)? else {
        debug!(
            "User {} is not a member of chat {}; returning empty page",
            params.user_id, params.chat_id
        );
        return Ok(vec![]);
    };

    let lower_bound = params.lower_bound(member.cleared_history_at);
    let messages = query_message_page(&tx, params, &lower_bound)?;

    let message_ids: Vec<&str> = messages.iter().map(|m| m.message_id.as_str()).collect();
    let reactions = query_reactions_for_messages(&tx, &message_ids)?;
    tx.commit()?;

    debug!(
        "Chat {} page for user {}: {} messages, {} reactions",
        params.chat_id,
        params.user_id,
        messages.len(),
        reactions.len()
    );

    let mut by_message: HashMap<String, Vec<ChatMessageReaction>> = HashMap::new();
    for reaction in reactions {
        by_message
            .entry(reaction.message_id.clone())
            .or_default()
            .push(reaction);
    }

    Ok(messages
        .into_iter()
        .map(|message| {
            let reactions = by_message.remove(&message.message_id).unwrap_or_default();
            ChatMessageAndReactions { message, reactions }
        })
        .collect())
}

fn query_message_page(
    conn: &Connection,
    params: &ChatMessagesAndReactionsParams,
    lower_bound: &DateTime<Utc>,
) -> Result<Vec<ChatMessage>> {
    // Membership is re-checked at row level even though the caller already
    // resolved it.
    let mut stmt = conn.prepare(
        "SELECT m.message_id, m.chat_id, m.user_id, m.created_at, m.ciphertext
         FROM chat_message m
         JOIN chat_member cm ON cm.chat_id = m.chat_id AND cm.user_id = ?1
         WHERE m.chat_id = ?2
           AND (?3 IS NULL OR m.created_at < ?3)
           AND (?4 IS NULL OR m.created_at > ?4)
         ORDER BY m.created_at DESC, m.message_id ASC
         LIMIT ?5",
    )?;

    let rows = stmt
        .query_map(
            rusqlite::params![
                params.user_id,
                params.chat_id,
                timestamp::encode_upper_bound(&params.before),
                timestamp::encode_lower_bound(lower_bound),
                params.limit.get(),
            ],
            MessageRow::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(MessageRow::into_message).collect()
}

/// Batch-fetch reactions for a set of message IDs.
pub fn query_reactions_for_messages(
    conn: &Connection,
    message_ids: &[&str],
) -> Result<Vec<ChatMessageReaction>> {
    let mut reactions = Vec::new();

    for chunk in message_ids.chunks(REACTION_BATCH_SIZE) {
        let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "SELECT user_id, message_id, reaction, created_at, updated_at
             FROM chat_message_reactions
             WHERE message_id IN ({})
             ORDER BY message_id, created_at, user_id",
            placeholders.join(", ")
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(chunk), ReactionRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for row in rows {
            reactions.push(row.into_reaction()?);
        }
    }

    Ok(reactions)
}

/// Messages *authored by* the user after the cursor, counted per chat.
pub fn query_num_chat_messages_since(
    conn: &Connection,
    params: &NumChatMessagesSinceParams,
) -> Result<NumChatMessagesSince> {
    let counts = conn.query_row(
        "WITH counts_per_chat AS (
             SELECT COUNT(*) AS count
             FROM chat_message
             WHERE user_id = ?1 AND (?2 IS NULL OR created_at > ?2)
             GROUP BY chat_id
         )
         SELECT COALESCE(SUM(count), 0), COALESCE(MAX(count), 0) FROM counts_per_chat",
        (params.user_id, timestamp::encode_lower_bound(&params.cursor)),
        |row| {
            Ok(NumChatMessagesSince {
                total_count: row.get(0)?,
                max_count_per_chat: row.get(1)?,
            })
        },
    )?;

    debug!(
        "User {} authored {} messages since {} (max {} in one chat)",
        params.user_id, counts.total_count, params.cursor, counts.max_count_per_chat
    );
    Ok(counts)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
