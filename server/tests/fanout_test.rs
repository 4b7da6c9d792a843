//! Integration tests for membership-scoped fanout, typing indicators and
//! message views.

mod common;

use common::{connect, TestEnv};
use parley_server::chat::scope::{ChatRef, ChatScope};
use parley_server::chat::{activity, fanout};
use parley_server::error::CoreError;
use parley_server::presence;
use parley_server::ws::events::ServerEvent;

fn deleted(chat: ChatRef) -> ServerEvent {
    ServerEvent::MessageDeleted {
        chat_type: chat.chat_type,
        chat_id: chat.chat_id,
        message_id: 200,
    }
}

#[tokio::test]
async fn group_broadcast_reaches_live_members_except_actor() {
    let env = TestEnv::new();
    let mut alice = connect(&env, 1).await;
    let mut bob = connect(&env, 2).await;
    let mut dave = connect(&env, 4).await;
    alice.drain();
    bob.drain();
    dave.drain();

    // carol (3) is a member but offline
    let scope = ChatScope::Group {
        group_id: 20,
        member_ids: [1, 2, 3].into_iter().collect(),
    };
    let delivered = fanout::broadcast(&env.state.connections, &scope, &deleted(ChatRef::group(20)), Some(1));
    assert_eq!(delivered, 1);

    assert!(alice.drain().is_empty());
    assert_eq!(bob.events("messageDeleted").len(), 1);
    assert!(dave.drain().is_empty(), "non-member never receives");
}

#[tokio::test]
async fn broadcast_to_chat_resolves_membership_fresh() {
    let env = TestEnv::new();
    let mut bob = connect(&env, 2).await;
    bob.drain();

    let chat = ChatRef::group(20);
    assert_eq!(
        fanout::broadcast_to_chat(&env.state, chat, &deleted(chat), None).await.unwrap(),
        1
    );

    env.exec("UPDATE group_members SET is_active = 0 WHERE user_id = 2;");
    assert_eq!(
        fanout::broadcast_to_chat(&env.state, chat, &deleted(chat), None).await.unwrap(),
        0
    );
    assert_eq!(bob.events("messageDeleted").len(), 1);
}

#[tokio::test]
async fn typing_is_scoped_and_excludes_typist() {
    let env = TestEnv::new();
    let mut alice = connect(&env, 1).await;
    let mut bob = connect(&env, 2).await;
    let mut carol = connect(&env, 3).await;
    alice.drain();
    bob.drain();
    carol.drain();

    let delivered = activity::typing(&env.state, 1, ChatRef::private(10), true)
        .await
        .unwrap();
    assert_eq!(delivered, 1);

    let started = bob.events("typingStart");
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["user"]["id"], 1);
    assert_eq!(started[0]["user"]["username"], "alice");
    assert_eq!(started[0]["chatType"], "private");
    assert!(alice.drain().is_empty());
    assert!(carol.drain().is_empty());

    activity::typing(&env.state, 1, ChatRef::private(10), false)
        .await
        .unwrap();
    assert_eq!(bob.events("typingStop").len(), 1);
}

#[tokio::test]
async fn typing_in_foreign_chat_is_rejected() {
    let env = TestEnv::new();
    let err = activity::typing(&env.state, 4, ChatRef::group(20), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotAMember { user_id: 4, .. }));
}

#[tokio::test]
async fn message_views_are_tracked_and_announced_once() {
    let env = TestEnv::new();
    let mut alice = connect(&env, 1).await;
    let mut carol = connect(&env, 3).await;
    alice.drain();
    carol.drain();

    let chat = Some(ChatRef::group(20));
    assert_eq!(activity::message_viewed(&env.state, 1, 200, chat).await.unwrap(), 1);
    assert_eq!(activity::message_viewed(&env.state, 1, 200, chat).await.unwrap(), 0);
    assert!(env.state.viewers.viewers(200).contains(&1));

    let viewed = carol.events("messageViewed");
    assert_eq!(viewed.len(), 1);
    assert_eq!(viewed[0]["messageId"], 200);
    assert_eq!(viewed[0]["viewerId"], 1);

    assert_eq!(activity::message_view_ended(&env.state, 1, 200, chat).await.unwrap(), 1);
    assert_eq!(carol.events("messageViewEnded").len(), 1);
    assert!(!env.state.viewers.is_tracked(200));

    // Ending an unknown view is a no-op
    assert_eq!(activity::message_view_ended(&env.state, 1, 200, chat).await.unwrap(), 0);
}

#[tokio::test]
async fn views_without_chat_are_tracked_silently() {
    let env = TestEnv::new();
    let mut carol = connect(&env, 3).await;
    carol.drain();

    assert_eq!(activity::message_viewed(&env.state, 1, 200, None).await.unwrap(), 0);
    assert!(env.state.viewers.viewers(200).contains(&1));
    assert!(carol.drain().is_empty());
}

#[tokio::test]
async fn going_offline_clears_views() {
    let env = TestEnv::new();
    let alice = connect(&env, 1).await;
    activity::message_viewed(&env.state, 1, 200, None).await.unwrap();
    activity::message_viewed(&env.state, 1, 100, None).await.unwrap();

    presence::disconnect(&env.state, 1, alice.connection_id).await;
    assert!(!env.state.viewers.is_tracked(200));
    assert!(!env.state.viewers.is_tracked(100));
}
