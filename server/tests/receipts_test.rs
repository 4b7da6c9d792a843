//! Integration tests for read receipts.

mod common;

use common::{connect, TestEnv};
use parley_server::chat::receipts;
use parley_server::chat::scope::ChatRef;
use parley_server::error::CoreError;

#[tokio::test]
async fn marking_twice_is_idempotent() {
    let env = TestEnv::new();
    let mut alice = connect(&env, 1).await;
    alice.drain();

    let first = receipts::mark_read(&env.state, 2, ChatRef::private(10), vec![100])
        .await
        .unwrap();
    assert_eq!(first.newly_marked, vec![100]);
    assert_eq!(first.notified_senders, vec![1]);

    let receipts = alice.events("messageReadReceipt");
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0]["messageIds"], serde_json::json!([100]));
    assert_eq!(receipts[0]["chatType"], "private");
    assert_eq!(receipts[0]["chatId"], 10);
    assert_eq!(receipts[0]["reader"]["id"], 2);
    assert_eq!(receipts[0]["reader"]["username"], "bob");
    assert_eq!(receipts[0]["readStatus"], "read");
    assert_eq!(receipts[0]["icon"], "double-check");
    assert!(receipts[0].get("isChatRead").is_none());

    let second = receipts::mark_read(&env.state, 2, ChatRef::private(10), vec![100])
        .await
        .unwrap();
    assert!(second.newly_marked.is_empty());
    assert!(alice.drain().is_empty(), "no second notification");

    assert_eq!(
        env.scalar("SELECT COUNT(*) FROM message_reads WHERE message_id = 100 AND user_id = 2"),
        1
    );
}

#[tokio::test]
async fn own_messages_and_foreign_ids_are_ignored() {
    let env = TestEnv::new();
    // 102 is bob's own message, 200 belongs to the group
    let outcome = receipts::mark_read(&env.state, 2, ChatRef::private(10), vec![102, 200, 101])
        .await
        .unwrap();
    assert_eq!(outcome.newly_marked, vec![101]);
    assert_eq!(env.scalar("SELECT COUNT(*) FROM message_reads"), 1);
}

#[tokio::test]
async fn chat_read_marks_everything_unread_once() {
    let env = TestEnv::new();
    let mut alice = connect(&env, 1).await;
    alice.drain();

    let first = receipts::mark_chat_read(&env.state, 2, ChatRef::private(10))
        .await
        .unwrap();
    assert_eq!(first.newly_marked, vec![100, 101]);

    let events = alice.events("messageReadReceipt");
    assert_eq!(events.len(), 1, "one batched receipt per sender");
    assert_eq!(events[0]["messageIds"], serde_json::json!([100, 101]));
    assert_eq!(events[0]["isChatRead"], true);

    let second = receipts::mark_chat_read(&env.state, 2, ChatRef::private(10))
        .await
        .unwrap();
    assert!(second.newly_marked.is_empty());
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn receipts_go_to_each_sender_only() {
    let env = TestEnv::new();
    env.exec(
        "INSERT INTO messages (id, chat_type, chat_id, sender_id, created_at) VALUES
            (201, 'group', 20, 1, '2024-01-01T00:00:04Z');",
    );
    let mut alice = connect(&env, 1).await;
    let mut carol = connect(&env, 3).await;
    let mut bob = connect(&env, 2).await;
    alice.drain();
    carol.drain();

    let outcome = receipts::mark_chat_read(&env.state, 2, ChatRef::group(20))
        .await
        .unwrap();
    assert_eq!(outcome.newly_marked, vec![200, 201]);
    assert_eq!(outcome.notified_senders, vec![1, 3]);

    // Each sender hears about the whole batch
    assert_eq!(alice.events("messageReadReceipt").len(), 1);
    assert_eq!(carol.events("messageReadReceipt").len(), 1);
    assert!(bob.events("messageReadReceipt").is_empty());
}

#[tokio::test]
async fn offline_sender_still_gets_receipt_persisted() {
    let env = TestEnv::new();
    let outcome = receipts::mark_read(&env.state, 2, ChatRef::private(10), vec![100, 101])
        .await
        .unwrap();
    assert_eq!(outcome.newly_marked, vec![100, 101]);
    assert_eq!(env.scalar("SELECT COUNT(*) FROM message_reads WHERE user_id = 2"), 2);
}

#[tokio::test]
async fn non_members_cannot_mark_read() {
    let env = TestEnv::new();
    let err = receipts::mark_chat_read(&env.state, 3, ChatRef::private(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotAMember { user_id: 3, .. }));

    let err = receipts::mark_read(&env.state, 1, ChatRef::group(99), vec![1])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ChatNotFound(_)));
    assert_eq!(env.scalar("SELECT COUNT(*) FROM message_reads"), 0);
}
