use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                is_active   INTEGER NOT NULL DEFAULT 1,
                is_blocked  INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE images (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id        INTEGER NOT NULL REFERENCES users(id),
                path            TEXT NOT NULL,
                compact_path    TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE devices (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL REFERENCES users(id),
                device_token    TEXT NOT NULL UNIQUE,
                is_active       INTEGER NOT NULL DEFAULT 1,
                is_verified     INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_devices_user ON devices(user_id);

            CREATE TABLE chats (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                last_message_id INTEGER REFERENCES messages(id),
                created_at      TEXT NOT NULL
            );

            CREATE TABLE chat_users (
                chat_id                 INTEGER NOT NULL REFERENCES chats(id),
                user_id                 INTEGER NOT NULL REFERENCES users(id),
                is_active               INTEGER NOT NULL DEFAULT 1,
                last_read_message_id    INTEGER NOT NULL DEFAULT 0,
                joined_at               TEXT NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            );

            CREATE INDEX idx_chat_users_user ON chat_users(user_id, is_active);

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id         INTEGER NOT NULL REFERENCES chats(id),
                creator_id      INTEGER NOT NULL REFERENCES users(id),
                created_at      TEXT NOT NULL,
                message_type    TEXT NOT NULL,
                text            TEXT,
                image_id        INTEGER REFERENCES images(id),
                status          TEXT NOT NULL DEFAULT 'Sent',
                is_active       INTEGER NOT NULL DEFAULT 1,
                CHECK (
                    (message_type = 'Text' AND text IS NOT NULL AND image_id IS NULL)
                    OR (message_type = 'Image' AND image_id IS NOT NULL AND text IS NULL)
                )
            );

            CREATE INDEX idx_messages_chat_id ON messages(chat_id, id);
            CREATE INDEX idx_messages_chat_created ON messages(chat_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
