use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use dm_reader::{ChatReader, ReaderConfig};
use dm_types::api::{ChatMessageParams, ChatMessagesAndReactionsParams, NumChatMessagesSinceParams};
use dm_types::timestamp::{self, TimestampError};

/// Run read-path queries against a chat database and print JSON.
///
/// Timestamps use the `YYYY-MM-DDTHH:MM:SS[.ffffff]` form and are UTC.
#[derive(Parser)]
#[command(name = "dm")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one message (no membership check)
    Message { chat_id: String, message_id: String },

    /// Newest-first page of a chat as seen by one member
    Feed {
        user_id: i32,
        chat_id: String,
        /// Defaults to DM_DEFAULT_PAGE_SIZE
        #[arg(long)]
        limit: Option<NonZeroU32>,
        /// Exclusive upper bound, defaults to now
        #[arg(long, value_parser = parse_timestamp)]
        before: Option<DateTime<Utc>>,
        /// Exclusive lower bound, defaults to the epoch
        #[arg(long, value_parser = parse_timestamp)]
        after: Option<DateTime<Utc>>,
    },

    /// Messages a user authored after a cursor, total and per-chat max
    Counts {
        user_id: i32,
        #[arg(value_parser = parse_timestamp)]
        cursor: DateTime<Utc>,
    },
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    timestamp::decode(raw)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging; stdout is reserved for results
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dm=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Config
    let config = ReaderConfig::from_env()?;
    info!(
        "Using chat DB {} ({} readers, {:?} query timeout)",
        config.db_path.display(),
        config.reader_pool_size,
        config.query_timeout
    );
    let reader = ChatReader::open(config)?;

    // Ctrl-C interrupts the in-flight query
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let output = match cli.command {
        Command::Message { chat_id, message_id } => {
            let message = reader
                .chat_message(ChatMessageParams { chat_id, message_id }, &cancel)
                .await?;
            serde_json::to_value(message)?
        }
        Command::Feed { user_id, chat_id, limit, before, after } => {
            let params = ChatMessagesAndReactionsParams {
                user_id,
                chat_id,
                limit: limit.unwrap_or(reader.config().default_page_size),
                before: before.unwrap_or_else(Utc::now),
                after: after.unwrap_or(DateTime::UNIX_EPOCH),
            };
            let page = reader.chat_messages_and_reactions(params, &cancel).await?;
            serde_json::to_value(page)?
        }
        Command::Counts { user_id, cursor } => {
            let counts = reader
                .num_chat_messages_since(NumChatMessagesSinceParams { user_id, cursor }, &cancel)
                .await?;
            serde_json::to_value(counts)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
