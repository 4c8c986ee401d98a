use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use dm_db::{Database, DbError, Result, queries};
use dm_types::api::{
    ChatMessageParams, ChatMessagesAndReactionsParams, NumChatMessagesSince,
    NumChatMessagesSinceParams,
};
use dm_types::models::{ChatMessage, ChatMessageAndReactions};
use rusqlite::{Connection, InterruptHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ReaderConfig;

/// Async front for the chat read queries.
///
/// Each call runs on the blocking pool and is bounded by the configured
/// query timeout and by the caller's cancellation token. Whichever fires
/// first interrupts the running SQLite statement and the call returns
/// `DbError::DeadlineExceeded` or `DbError::Cancelled` right away.
#[derive(Clone)]
pub struct ChatReader {
    db: Arc<Database>,
    config: ReaderConfig,
}

impl ChatReader {
    pub fn new(db: Arc<Database>, config: ReaderConfig) -> Self {
        Self { db, config }
    }

    pub fn open(config: ReaderConfig) -> Result<Self> {
        let db = Database::open_with_readers(&config.db_path, config.reader_pool_size)?;
        Ok(Self::new(Arc::new(db), config))
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub async fn chat_message(
        &self,
        params: ChatMessageParams,
        cancel: &CancellationToken,
    ) -> Result<ChatMessage> {
        self.run("chat_message", cancel, move |conn| {
            queries::query_chat_message(conn, &params)
        })
        .await
    }

    /// Feed page; the requested limit is capped at `max_page_size`.
    pub async fn chat_messages_and_reactions(
        &self,
        params: ChatMessagesAndReactionsParams,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChatMessageAndReactions>> {
        let params = params.clamped(self.config.max_page_size);
        self.run("chat_messages_and_reactions", cancel, move |conn| {
            queries::query_chat_messages_and_reactions(conn, &params)
        })
        .await
    }

    pub async fn num_chat_messages_since(
        &self,
        params: NumChatMessagesSinceParams,
        cancel: &CancellationToken,
    ) -> Result<NumChatMessagesSince> {
        self.run("num_chat_messages_since", cancel, move |conn| {
            queries::query_num_chat_messages_since(conn, &params)
        })
        .await
    }

    async fn run<F, T>(&self, op: &'static str, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_in_flight(op, cancel, Arc::default(), f).await
    }

    async fn run_in_flight<F, T>(
        &self,
        op: &'static str,
        cancel: &CancellationToken,
        in_flight: Arc<Mutex<InFlight>>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + self.config.query_timeout;

        // Run blocking DB query off the async runtime
        let db = self.db.clone();
        let slot = in_flight.clone();
        let mut task = tokio::task::spawn_blocking(move || {
            db.with_conn(|conn| {
                {
                    let mut state = lock_in_flight(&slot)?;
                    if state.aborted {
                        return Err(DbError::Cancelled);
                    }
                    state.handle = Some(conn.get_interrupt_handle());
                }

                let result = if Instant::now() >= deadline {
                    Err(DbError::DeadlineExceeded)
                } else {
                    f(conn)
                };

                // Withdraw the handle while this call still holds the connection.
                lock_in_flight(&slot)?.handle = None;
                result
            })
        });

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(abort(op, &in_flight, DbError::Cancelled));
            }
            _ = tokio::time::sleep_until(deadline.into()) => {
                return Err(abort(op, &in_flight, DbError::DeadlineExceeded));
            }
            joined = &mut task => joined,
        };

        let result = joined.map_err(|e| {
            error!("spawn_blocking join error in {}: {}", op, e);
            DbError::Unavailable(format!("query task failed: {}", e))
        })?;

        match &result {
            Ok(_) => debug!("{} completed in {:?}", op, started.elapsed()),
            Err(DbError::NotFound { .. }) => debug!("{} found no row", op),
            Err(e) => warn!("{} failed after {:?}: {}", op, started.elapsed(), e),
        }
        result
    }
}

/// Abort state shared between a call and its blocking task. `handle` is
/// only set while the task holds a pooled connection.
#[derive(Default)]
struct InFlight {
    aborted: bool,
    handle: Option<InterruptHandle>,
}

fn lock_in_flight(slot: &Mutex<InFlight>) -> Result<MutexGuard<'_, InFlight>> {
    slot.lock()
        .map_err(|_| DbError::Unavailable("query abort state poisoned".into()))
}

/// Mark the call aborted and interrupt its statement if one is running.
fn abort(op: &'static str, in_flight: &Mutex<InFlight>, err: DbError) -> DbError {
    let interrupted = match in_flight.lock() {
        Ok(mut state) => {
            state.aborted = true;
            match state.handle.take() {
                Some(handle) => {
                    handle.interrupt();
                    true
                }
                None => false,
            }
        }
        Err(_) => false,
    };
    warn!("{} aborted (statement interrupted: {}): {}", op, interrupted, err);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use dm_types::models::ChatMessageReaction;
    use std::num::NonZeroU32;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn seeded_reader(config: ReaderConfig) -> (TempDir, ChatReader) {
        seeded_reader_with_pool(config, 2)
    }

    fn seeded_reader_with_pool(config: ReaderConfig, readers: usize) -> (TempDir, ChatReader) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with_readers(&dir.path().join("chat.db"), readers).unwrap();

        db.seed_chat("c", t(0)).unwrap();
        db.seed_member("c", 1, Some(t(15))).unwrap();
        for (id, secs) in [("m1", 10), ("m2", 20), ("m3", 30)] {
            db.seed_message(&ChatMessage {
                message_id: id.to_string(),
                chat_id: "c".to_string(),
                user_id: 1,
                created_at: t(secs),
                ciphertext: format!("ct-{}", id),
            })
            .unwrap();
        }
        db.seed_reaction(&ChatMessageReaction {
            user_id: 1,
            message_id: "m2".to_string(),
            reaction: "heart".to_string(),
            created_at: t(21),
            updated_at: t(22),
        })
        .unwrap();

        (dir, ChatReader::new(Arc::new(db), config))
    }

    /// Recursive CTE that takes a while to step through `n` rows.
    fn count_to(conn: &Connection, n: i64) -> Result<i64> {
        Ok(conn.query_row(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < ?1)
             SELECT count(*) FROM c",
            [n],
            |r| r.get(0),
        )?)
    }

    fn all_counts() -> NumChatMessagesSinceParams {
        NumChatMessagesSinceParams { user_id: 1, cursor: t(0) }
    }

    fn feed_params(limit: u32) -> ChatMessagesAndReactionsParams {
        ChatMessagesAndReactionsParams {
            user_id: 1,
            chat_id: "c".to_string(),
            limit: NonZeroU32::new(limit).unwrap(),
            before: t(100),
            after: t(0),
        }
    }

    #[tokio::test]
    async fn runs_all_three_operations() {
        let (_dir, reader) = seeded_reader(ReaderConfig::default());
        let cancel = CancellationToken::new();

        let msg = reader
            .chat_message(
                ChatMessageParams { chat_id: "c".into(), message_id: "m1".into() },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(msg.created_at, t(10));

        let page = reader.chat_messages_and_reactions(feed_params(50), &cancel).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|m| m.message.message_id.as_str()).collect();
        assert_eq!(ids, ["m3", "m2"]);
        assert!(page[0].reactions.is_empty());
        assert_eq!(page[1].reactions.len(), 1);

        let counts = reader
            .num_chat_messages_since(NumChatMessagesSinceParams { user_id: 1, cursor: t(15) }, &cancel)
            .await
            .unwrap();
        assert_eq!(counts, NumChatMessagesSince { total_count: 2, max_count_per_chat: 2 });
    }

    #[tokio::test]
    async fn not_found_passes_through() {
        let (_dir, reader) = seeded_reader(ReaderConfig::default());

        let err = reader
            .chat_message(
                ChatMessageParams { chat_id: "c".into(), message_id: "missing".into() },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn page_size_is_capped() {
        let config = ReaderConfig {
            max_page_size: NonZeroU32::new(1).unwrap(),
            default_page_size: NonZeroU32::new(1).unwrap(),
            ..ReaderConfig::default()
        };
        let (_dir, reader) = seeded_reader(config);

        let page = reader
            .chat_messages_and_reactions(feed_params(50), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].message.message_id, "m3");
    }

    #[tokio::test]
    async fn cancelled_token_aborts_the_query() {
        let (_dir, reader) = seeded_reader(ReaderConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = reader
            .num_chat_messages_since(NumChatMessagesSinceParams { user_id: 1, cursor: t(0) }, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Cancelled));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn expired_deadline_is_reported_distinctly() {
        let config = ReaderConfig {
            query_timeout: Duration::ZERO,
            ..ReaderConfig::default()
        };
        let (_dir, reader) = seeded_reader(config);

        let err = reader
            .chat_messages_and_reactions(feed_params(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn concurrent_reads_do_not_interfere() {
        let (_dir, reader) = seeded_reader(ReaderConfig::default());
        let cancel = CancellationToken::new();

        let (a, b, c) = tokio::join!(
            reader.chat_messages_and_reactions(feed_params(50), &cancel),
            reader.chat_messages_and_reactions(feed_params(1), &cancel),
            reader.num_chat_messages_since(NumChatMessagesSinceParams { user_id: 1, cursor: t(0) }, &cancel),
        );
        assert_eq!(a.unwrap().len(), 2);
        assert_eq!(b.unwrap().len(), 1);
        assert_eq!(c.unwrap().total_count, 3);
    }

    #[tokio::test]
    async fn cancelling_interrupts_a_running_statement() {
        let config = ReaderConfig { query_timeout: Duration::from_secs(60), ..ReaderConfig::default() };
        let (_dir, reader) = seeded_reader_with_pool(config, 1);
        let cancel = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let slow = reader.run("slow", &cancel, move |conn| {
            let _ = started_tx.send(());
            let result = count_to(conn, 200_000_000);
            let _ = outcome_tx.send(matches!(result, Err(DbError::Cancelled)));
            result
        });
        let canceller = async {
            started_rx.await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(slow, canceller);
        assert!(matches!(result, Err(DbError::Cancelled)), "got {result:?}");

        // The statement itself stopped with SQLITE_INTERRUPT.
        let interrupted = tokio::time::timeout(Duration::from_secs(10), outcome_rx)
            .await
            .expect("statement kept running after cancel")
            .unwrap();
        assert!(interrupted);

        // The only reader connection is free and healthy again.
        let counts = reader
            .num_chat_messages_since(all_counts(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(counts.total_count, 3);
    }

    #[tokio::test]
    async fn deadline_interrupts_a_running_statement() {
        let config = ReaderConfig { query_timeout: Duration::from_millis(100), ..ReaderConfig::default() };
        let (_dir, reader) = seeded_reader_with_pool(config, 1);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let result = reader
            .run("slow", &CancellationToken::new(), move |conn| {
                let result = count_to(conn, 200_000_000);
                let _ = outcome_tx.send(matches!(result, Err(DbError::Cancelled)));
                result
            })
            .await;
        assert!(matches!(result, Err(DbError::DeadlineExceeded)), "got {result:?}");

        let interrupted = tokio::time::timeout(Duration::from_secs(10), outcome_rx)
            .await
            .expect("statement kept running past the deadline")
            .unwrap();
        assert!(interrupted);

        let patient = ChatReader::new(reader.db.clone(), ReaderConfig::default());
        let counts = patient
            .num_chat_messages_since(all_counts(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(counts.total_count, 3);
    }

    #[tokio::test]
    async fn late_abort_does_not_touch_the_next_call() {
        let config = ReaderConfig { query_timeout: Duration::from_secs(60), ..ReaderConfig::default() };
        let (_dir, reader) = seeded_reader_with_pool(config, 1);
        let cancel = CancellationToken::new();

        let first = Arc::new(Mutex::new(InFlight::default()));
        let counts = reader
            .run_in_flight("first", &cancel, first.clone(), |conn| {
                queries::query_num_chat_messages_since(conn, &all_counts())
            })
            .await
            .unwrap();
        assert_eq!(counts.total_count, 3);
        assert!(first.lock().unwrap().handle.is_none());

        // A second call takes over the single connection; the first call's
        // abort fires while it runs.
        let (started_tx, started_rx) = oneshot::channel();
        let second = reader.run("second", &cancel, move |conn| {
            let _ = started_tx.send(());
            count_to(conn, 5_000_000)
        });
        let late_abort = async {
            started_rx.await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            abort("first", &first, DbError::DeadlineExceeded);
        };
        let (result, ()) = tokio::join!(second, late_abort);
        assert_eq!(result.unwrap(), 5_000_000);
    }
}
