use rusqlite::{Connection, Result};

use crate::types::Subscriber;

pub(crate) const SUBSCRIBER_SELECT_SQL: &str =
    "SELECT id, chat_id, active, message_text, interval_secs, created_at, updated_at
     FROM subscribers";

/// Map a SELECT row (column order from SUBSCRIBER_SELECT_SQL) to a Subscriber.
pub(crate) fn row_to_subscriber(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscriber> {
    Ok(Subscriber {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        active: row.get::<_, i32>(2)? != 0,
        message_text: row.get(3)?,
        interval_secs: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Initialise the subscribers table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    // UNIQUE(chat_id) is what makes create_subscriber idempotent under races.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS subscribers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id         TEXT    NOT NULL UNIQUE,
            active          INTEGER NOT NULL DEFAULT 1,
            message_text    TEXT    NOT NULL DEFAULT 'Hello from DB',
            interval_secs   INTEGER NOT NULL DEFAULT 5 CHECK (interval_secs >= 1),
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        );",
    )
}
