use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE user_profiles (
                user_id             TEXT PRIMARY KEY,
                display_name        TEXT,
                mother_type         TEXT,
                pregnancy_week      INTEGER,
                baby_name           TEXT,
                subscription_tier   TEXT NOT NULL DEFAULT 'free',
                risk_level          INTEGER NOT NULL DEFAULT 0,
                updated_at          INTEGER NOT NULL
            );

            -- Timestamps are unix milliseconds so window counts compare integers.
            CREATE TABLE chat_messages (
                id                      TEXT PRIMARY KEY,
                user_id                 TEXT NOT NULL,
                message                 TEXT NOT NULL,
                response                TEXT NOT NULL,
                risk_level              INTEGER NOT NULL,
                risk_flags              TEXT NOT NULL,
                requires_intervention   INTEGER NOT NULL,
                moderation              TEXT NOT NULL,
                reply_source            TEXT NOT NULL,
                created_at              INTEGER NOT NULL
            );

            CREATE INDEX idx_chat_messages_user
                ON chat_messages(user_id, created_at);

            CREATE TABLE rate_limit_events (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL,
                endpoint    TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX idx_rate_limit_events_window
                ON rate_limit_events(user_id, endpoint, created_at);

            CREATE TABLE risk_alerts (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                message_id  TEXT NOT NULL REFERENCES chat_messages(id),
                risk_level  INTEGER NOT NULL,
                risk_flags  TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE moderation_queue (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                message     TEXT NOT NULL,
                category    TEXT NOT NULL,
                severity    INTEGER NOT NULL,
                reviewed    INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
