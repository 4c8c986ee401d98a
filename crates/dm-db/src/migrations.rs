use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Canonical `YYYY-MM-DDTHH:MM:SS.ffffff` shape. GLOB matches the whole
/// value, so shorter or longer text fails too.
const CANONICAL_TIMESTAMP_GLOB: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9][0-9][0-9][0-9]";

/// All timestamp columns hold the canonical text form from
/// `dm_types::timestamp::encode`, so range predicates compare lexically.
/// CHECK constraints keep any other shape out of the table.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Chat DB: running migration v1 (initial schema)");
        let ts = CANONICAL_TIMESTAMP_GLOB;
        conn.execute_batch(&format!(
            "
            CREATE TABLE chat (
                chat_id     TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL CHECK (created_at GLOB '{ts}')
            );

            CREATE TABLE chat_member (
                chat_id             TEXT NOT NULL REFERENCES chat(chat_id) ON DELETE CASCADE,
                user_id             INTEGER NOT NULL,
                cleared_history_at  TEXT CHECK (cleared_history_at GLOB '{ts}'),
                created_at          TEXT NOT NULL CHECK (created_at GLOB '{ts}'),
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX idx_chat_member_user ON chat_member(user_id);

            CREATE TABLE chat_message (
                message_id  TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL REFERENCES chat(chat_id) ON DELETE CASCADE,
                user_id     INTEGER NOT NULL,
                created_at  TEXT NOT NULL CHECK (created_at GLOB '{ts}'),
                ciphertext  TEXT NOT NULL
            );

            CREATE INDEX idx_chat_message_feed
                ON chat_message(chat_id, created_at DESC, message_id);

            CREATE INDEX idx_chat_message_author
                ON chat_message(user_id, created_at);

            CREATE TABLE chat_message_reactions (
                user_id     INTEGER NOT NULL,
                message_id  TEXT NOT NULL REFERENCES chat_message(message_id) ON DELETE CASCADE,
                reaction    TEXT NOT NULL,
                created_at  TEXT NOT NULL CHECK (created_at GLOB '{ts}'),
                updated_at  TEXT NOT NULL CHECK (updated_at GLOB '{ts}'),
                PRIMARY KEY (message_id, user_id)
            );

            INSERT INTO schema_version (version) VALUES (1);
            "
        ))?;
    }

    info!("Chat DB migrations complete");
    Ok(())
}
