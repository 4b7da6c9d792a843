//! Integration tests for data-access failures: nothing half-applied, nothing
//! broadcast for a write that did not land.

mod common;

use common::{connect, connect_at, socket, TestEnv};
use parley_server::chat::receipts;
use parley_server::chat::scope::ChatRef;
use parley_server::error::CoreError;
use parley_server::presence;
use parley_server::presence::registry::HeartbeatOutcome;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn failed_online_write_rejects_admission() {
    let env = TestEnv::new();
    let mut bob = connect(&env, 2).await;
    bob.drain();

    env.faults.fail_online.store(true, Ordering::SeqCst);
    let (tx, mut rx) = socket();
    let err = presence::connect(&env.state, 1, None, None, tx).await.unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));
    assert_eq!(err.status(), 500);

    assert!(!env.state.connections.is_online(1));
    assert!(rx.try_recv().is_err(), "no snapshot for a refused socket");
    assert!(bob.drain().is_empty(), "no broadcast for a refused socket");
}

#[tokio::test]
async fn failed_location_write_keeps_old_location() {
    let env = TestEnv::new();
    let mut bob = connect(&env, 2).await;
    let alice = connect_at(&env, 1, Some("web")).await;
    bob.drain();

    env.faults.fail_online.store(true, Ordering::SeqCst);
    let outcome =
        presence::heartbeat(&env.state, 1, alice.connection_id, Some("mobile".into())).await;
    assert_eq!(outcome, HeartbeatOutcome::Refreshed, "heartbeat still counts");
    assert_eq!(env.state.connections.get(1).unwrap().location, "web");
    assert!(bob.drain().is_empty());

    env.faults.fail_online.store(false, Ordering::SeqCst);
    let outcome =
        presence::heartbeat(&env.state, 1, alice.connection_id, Some("mobile".into())).await;
    assert_eq!(
        outcome,
        HeartbeatOutcome::LocationChanged {
            previous: "web".into()
        }
    );
    assert_eq!(env.state.connections.get(1).unwrap().location, "mobile");
    assert_eq!(bob.events("userStatusUpdate")[0]["location"], "mobile");
}

#[tokio::test]
async fn failed_offline_write_is_retried_then_not_broadcast() {
    let env = TestEnv::new();
    let mut bob = connect(&env, 2).await;
    let alice = connect(&env, 1).await;
    bob.drain();

    env.faults.fail_offline.store(true, Ordering::SeqCst);
    assert!(!presence::disconnect(&env.state, 1, alice.connection_id).await);

    assert!(!env.state.connections.is_online(1));
    assert_eq!(env.faults.offline_calls.load(Ordering::SeqCst), 3);
    assert!(bob.events("userStatusUpdate").is_empty());
    assert!(bob.events("groupOnlineCountUpdate").is_empty());
}

#[tokio::test]
async fn offline_write_recovering_on_retry_broadcasts_once() {
    let env = TestEnv::new();
    let mut bob = connect(&env, 2).await;
    let alice = connect(&env, 1).await;
    bob.drain();

    env.faults.fail_offline.store(true, Ordering::SeqCst);
    let state = env.state.clone();
    let id = alice.connection_id;
    let teardown = tokio::spawn(async move { presence::disconnect(&state, 1, id).await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    env.faults.fail_offline.store(false, Ordering::SeqCst);

    assert!(teardown.await.unwrap());
    let updates = bob.events("userStatusUpdate");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["isOnline"], false);
    assert_eq!(env.scalar("SELECT is_online FROM users WHERE id = 1"), 0);
}

#[tokio::test]
async fn failed_receipt_write_sends_nothing() {
    let env = TestEnv::new();
    let mut alice = connect(&env, 1).await;
    alice.drain();

    env.faults.fail_receipts.store(true, Ordering::SeqCst);
    let err = receipts::mark_read(&env.state, 2, ChatRef::private(10), vec![100])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));
    assert!(alice.events("messageReadReceipt").is_empty());
    assert_eq!(env.scalar("SELECT COUNT(*) FROM message_reads"), 0);

    let err = receipts::mark_chat_read(&env.state, 2, ChatRef::private(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn unreadable_settings_skip_presence_broadcast() {
    let env = TestEnv::new();
    let mut bob = connect(&env, 2).await;
    bob.drain();

    env.faults.fail_settings.store(true, Ordering::SeqCst);
    let alice = connect(&env, 1).await;

    // Admission itself stands; only the transition's events are withheld
    assert!(env.state.connections.is_current(1, alice.connection_id));
    assert!(bob.events("userStatusUpdate").is_empty());
}
