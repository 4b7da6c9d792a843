use rusqlite_migration::{Migrations, M};

/// Schema migrations, tracked through SQLite's user_version pragma.
///
/// The chat tables are owned by the CRUD side of the service; this core
/// only reads them, and writes presence columns and read receipts.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: users, privacy and chats

CREATE TABLE users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    is_online INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT,
    location TEXT,
    session_id TEXT
);

CREATE TABLE privacy_settings (
    user_id INTEGER PRIMARY KEY,
    mode TEXT NOT NULL DEFAULT 'everyone'
        CHECK (mode IN ('everyone', 'contacts', 'nobody', 'custom')),
    show_online_status INTEGER NOT NULL DEFAULT 1,
    hidden_from_users TEXT NOT NULL DEFAULT '[]',
    visible_to_users TEXT NOT NULL DEFAULT '[]',
    allowed_locations TEXT NOT NULL DEFAULT '[]',
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE TABLE private_chats (
    id INTEGER PRIMARY KEY,
    participant1 INTEGER NOT NULL,
    participant2 INTEGER NOT NULL,
    FOREIGN KEY (participant1) REFERENCES users(id),
    FOREIGN KEY (participant2) REFERENCES users(id)
);

CREATE TABLE chat_groups (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE group_members (
    group_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    role TEXT NOT NULL DEFAULT 'member',
    is_active INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES chat_groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX idx_group_members_user ON group_members(user_id);

CREATE TABLE channels (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE channel_members (
    channel_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    role TEXT NOT NULL DEFAULT 'member'
        CHECK (role IN ('creator', 'admin', 'member')),
    is_active INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (channel_id, user_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
",
        ),
        M::up(
            "-- Migration 2: messages and read receipts

CREATE TABLE messages (
    id INTEGER PRIMARY KEY,
    chat_type TEXT NOT NULL CHECK (chat_type IN ('private', 'group', 'channel')),
    chat_id INTEGER NOT NULL,
    sender_id INTEGER NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX idx_messages_chat ON messages(chat_type, chat_id);

CREATE TABLE message_reads (
    message_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    read_at TEXT NOT NULL,
    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
",
        ),
    ])
}
