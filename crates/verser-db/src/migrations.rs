use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            email           TEXT,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            avatar          TEXT,
            status          TEXT NOT NULL DEFAULT 'offline'
                            CHECK (status IN ('online', 'offline', 'away')),
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS communities (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            description     TEXT,
            creator_id      INTEGER NOT NULL REFERENCES users(id),
            created_at      TEXT NOT NULL
        );

        -- No UNIQUE(user_id, community_id): callers check is_member first.
        CREATE TABLE IF NOT EXISTS community_members (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users(id),
            community_id    INTEGER NOT NULL REFERENCES communities(id) ON DELETE CASCADE,
            role            TEXT NOT NULL DEFAULT 'member'
                            CHECK (role IN ('admin', 'maintainer', 'member')),
            joined_at       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_members_community
            ON community_members(community_id, user_id);

        CREATE INDEX IF NOT EXISTS idx_members_user
            ON community_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL,
            user_id         INTEGER NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            type            TEXT NOT NULL DEFAULT 'text'
                            CHECK (type IN ('text', 'image', 'file')),
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
