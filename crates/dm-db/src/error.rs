use dm_types::timestamp::TimestampError;
use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("chat message not found: chat {chat_id}, message {message_id}")]
    NotFound { chat_id: String, message_id: String },

    #[error("SQLite error: {0}")]
    Storage(#[source] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Undecodable {column}: {source}")]
    Decoding {
        column: &'static str,
        #[source]
        source: TimestampError,
    },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Query deadline exceeded")]
    DeadlineExceeded,
}

impl DbError {
    /// Backend faults a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        // sqlite3_interrupt() surfaces as SQLITE_INTERRUPT
        if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
            return Self::Cancelled;
        }
        Self::Storage(err)
    }
}
