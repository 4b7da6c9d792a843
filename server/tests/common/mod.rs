//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use parley_server::chat::scope::{ChatId, ChatRef, ChatScope, MessageId, UserId};
use parley_server::config::PresenceConfig;
use parley_server::db::{open_in_memory, DataAccess, SqliteStore};
use parley_server::error::{StoreError, StoreResult};
use parley_server::presence::visibility::VisibilitySettings;
use parley_server::presence;
use parley_server::presence::registry::ConnectionId;
use parley_server::state::AppState;

/// Users 1 alice, 2 bob, 3 carol, 4 dave.
/// Private chat 10 between 1 and 2; group 20 with 1, 2, 3; channel 30 with
/// 1 as creator, 2 as member and 3 as admin. Messages 100-102 in chat 10
/// (100 and 101 from alice, 102 from bob) and 200 in group 20 from carol.
pub const SEED: &str = "
INSERT INTO users (id, username) VALUES (1, 'alice'), (2, 'bob'), (3, 'carol'), (4, 'dave');
INSERT INTO private_chats (id, participant1, participant2) VALUES (10, 1, 2);
INSERT INTO chat_groups (id, name) VALUES (20, 'team');
INSERT INTO group_members (group_id, user_id) VALUES (20, 1), (20, 2), (20, 3);
INSERT INTO channels (id, name) VALUES (30, 'news');
INSERT INTO channel_members (channel_id, user_id, role) VALUES
    (30, 1, 'creator'), (30, 2, 'member'), (30, 3, 'admin');
INSERT INTO messages (id, chat_type, chat_id, sender_id, created_at) VALUES
    (100, 'private', 10, 1, '2024-01-01T00:00:00Z'),
    (101, 'private', 10, 1, '2024-01-01T00:00:01Z'),
    (102, 'private', 10, 2, '2024-01-01T00:00:02Z'),
    (200, 'group', 20, 3, '2024-01-01T00:00:03Z');
";

/// A `DataAccess` that delegates to SQLite but can be told to fail or
/// stall individual operations.
#[derive(Default)]
pub struct Faults {
    pub fail_online: AtomicBool,
    pub fail_offline: AtomicBool,
    pub fail_receipts: AtomicBool,
    pub fail_settings: AtomicBool,
    pub offline_delay_ms: AtomicU64,
    pub offline_calls: AtomicU64,
}

pub struct FaultyStore {
    inner: SqliteStore,
    pub faults: Arc<Faults>,
}

fn injected(what: &str) -> StoreError {
    StoreError::Decode(format!("injected failure: {what}"))
}

impl DataAccess for FaultyStore {
    fn load_scope(&self, chat: ChatRef) -> StoreResult<Option<ChatScope>> {
        self.inner.load_scope(chat)
    }

    fn get_visibility_settings(&self, user_id: UserId) -> StoreResult<VisibilitySettings> {
        if self.faults.fail_settings.load(Ordering::SeqCst) {
            return Err(injected("get_visibility_settings"));
        }
        self.inner.get_visibility_settings(user_id)
    }

    fn upsert_read_receipts(
        &self,
        message_ids: &[MessageId],
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<MessageId>> {
        if self.faults.fail_receipts.load(Ordering::SeqCst) {
            return Err(injected("upsert_read_receipts"));
        }
        self.inner.upsert_read_receipts(message_ids, user_id, at)
    }

    fn get_unread_message_ids(&self, chat: ChatRef, user_id: UserId) -> StoreResult<Vec<MessageId>> {
        self.inner.get_unread_message_ids(chat, user_id)
    }

    fn set_user_online(
        &self,
        user_id: UserId,
        location: Option<&str>,
        session_id: Option<&str>,
    ) -> StoreResult<()> {
        if self.faults.fail_online.load(Ordering::SeqCst) {
            return Err(injected("set_user_online"));
        }
        self.inner.set_user_online(user_id, location, session_id)
    }

    fn set_user_offline(&self, user_id: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.faults.offline_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.faults.offline_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.faults.fail_offline.load(Ordering::SeqCst) {
            return Err(injected("set_user_offline"));
        }
        self.inner.set_user_offline(user_id, at)
    }

    fn get_username(&self, user_id: UserId) -> StoreResult<Option<String>> {
        self.inner.get_username(user_id)
    }

    fn get_last_seen(&self, user_id: UserId) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.get_last_seen(user_id)
    }

    fn get_message_senders(
        &self,
        chat: ChatRef,
        message_ids: &[MessageId],
    ) -> StoreResult<Vec<(MessageId, UserId)>> {
        self.inner.get_message_senders(chat, message_ids)
    }

    fn get_user_group_ids(&self, user_id: UserId) -> StoreResult<Vec<ChatId>> {
        self.inner.get_user_group_ids(user_id)
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub store: Arc<SqliteStore>,
    pub faults: Arc<Faults>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_presence(PresenceConfig::default())
    }

    pub fn with_presence(presence: PresenceConfig) -> Self {
        let store = Arc::new(SqliteStore::new(open_in_memory().unwrap()));
        let faults = Arc::new(Faults::default());
        let faulty = FaultyStore {
            inner: store.as_ref().clone(),
            faults: faults.clone(),
        };
        let env = Self {
            state: AppState::new(Arc::new(faulty), presence),
            store,
            faults,
        };
        env.exec(SEED);
        env
    }

    pub fn exec(&self, sql: &str) {
        self.store.pool().lock().unwrap().execute_batch(sql).unwrap();
    }

    pub fn scalar(&self, sql: &str) -> i64 {
        self.store
            .pool()
            .lock()
            .unwrap()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }
}

/// A fake socket: the receiving end of the connection's outbound queue.
pub struct TestClient {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub rx: mpsc::Receiver<Message>,
}

impl TestClient {
    /// Everything queued so far, text frames decoded as JSON. Close frames
    /// show up as `{"close": code}`.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                Message::Text(text) => frames.push(serde_json::from_str(text.as_str()).unwrap()),
                Message::Close(Some(frame)) => {
                    frames.push(serde_json::json!({ "close": frame.code }))
                }
                _ => {}
            }
        }
        frames
    }

    /// Drained frames of one event type.
    pub fn events(&mut self, event_type: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|frame| frame["type"] == event_type)
            .collect()
    }
}

/// A queue whose receiving side the test keeps, for sockets that are
/// expected to be refused.
pub fn socket() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
    mpsc::channel(64)
}

pub async fn connect(env: &TestEnv, user_id: UserId) -> TestClient {
    connect_at(env, user_id, None).await
}

pub async fn connect_at(env: &TestEnv, user_id: UserId, location: Option<&str>) -> TestClient {
    let (tx, rx) = mpsc::channel(64);
    let connection_id = presence::connect(
        &env.state,
        user_id,
        location.map(str::to_string),
        None,
        tx,
    )
    .await
    .unwrap();
    TestClient {
        user_id,
        connection_id,
        rx,
    }
}
