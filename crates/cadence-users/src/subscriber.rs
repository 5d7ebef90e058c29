use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::db::{row_to_subscriber, SUBSCRIBER_SELECT_SQL};
use crate::error::{Result, UserError};
use crate::types::{Subscriber, SubscriberUpdate};

/// Load a subscriber by chat id. Returns None instead of an error when absent
/// so callers decide whether missing is exceptional in their context.
pub fn find_by_chat_id(conn: &Connection, chat_id: &str) -> Result<Option<Subscriber>> {
    let sql = format!("{SUBSCRIBER_SELECT_SQL} WHERE chat_id = ?1");
    Ok(conn
        .query_row(&sql, params![chat_id], row_to_subscriber)
        .optional()?)
}

/// Insert a subscriber unless one already exists for `chat_id`.
///
/// Returns the stored row and whether this call created it. An existing row
/// is returned untouched.
pub fn create_subscriber(
    conn: &Connection,
    chat_id: &str,
    message_text: &str,
    interval_secs: u32,
) -> Result<(Subscriber, bool)> {
    let now = Utc::now().to_rfc3339();
    let inserted = conn.execute(
        "INSERT INTO subscribers
            (chat_id, active, message_text, interval_secs, created_at, updated_at)
         VALUES (?1, 1, ?2, ?3, ?4, ?4)
         ON CONFLICT(chat_id) DO NOTHING",
        params![chat_id, message_text, interval_secs, now],
    )?;
    let subscriber = find_by_chat_id(conn, chat_id)?
        .ok_or_else(|| UserError::NotFound(chat_id.to_string()))?;
    if inserted > 0 {
        info!(chat_id, "subscriber created");
    }
    Ok((subscriber, inserted > 0))
}

/// Flip the active flag. Returns false when no subscriber matches.
pub fn set_active(conn: &Connection, chat_id: &str, active: bool) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn.execute(
        "UPDATE subscribers SET active = ?2, updated_at = ?3 WHERE chat_id = ?1",
        params![chat_id, active as i32, now],
    )?;
    Ok(n > 0)
}

/// Apply the provided fields of `update`. Fields left as `None` keep their
/// stored value. Always bumps updated_at.
pub fn update_subscriber(
    conn: &Connection,
    chat_id: &str,
    update: &SubscriberUpdate,
) -> Result<Subscriber> {
    let now = Utc::now().to_rfc3339();
    let n = conn.execute(
        "UPDATE subscribers SET
            message_text  = COALESCE(?2, message_text),
            interval_secs = COALESCE(?3, interval_secs),
            updated_at    = ?4
         WHERE chat_id = ?1",
        params![chat_id, update.message_text, update.interval_secs, now],
    )?;
    if n == 0 {
        return Err(UserError::NotFound(chat_id.to_string()));
    }
    find_by_chat_id(conn, chat_id)?.ok_or_else(|| UserError::NotFound(chat_id.to_string()))
}

pub fn list_subscribers(conn: &Connection) -> Result<Vec<Subscriber>> {
    let sql = format!("{SUBSCRIBER_SELECT_SQL} ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_subscriber)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn create_is_idempotent_on_chat_id() {
        let conn = conn();
        let (first, created) = create_subscriber(&conn, "42", "hi", 5).unwrap();
        assert!(created);
        let (second, created_again) = create_subscriber(&conn, "42", "other", 9).unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(second.message_text, "hi");
        assert_eq!(list_subscribers(&conn).unwrap().len(), 1);
    }

    #[test]
    fn update_only_touches_provided_fields() {
        let conn = conn();
        create_subscriber(&conn, "7", "hello", 5).unwrap();
        let updated = update_subscriber(
            &conn,
            "7",
            &SubscriberUpdate {
                message_text: None,
                interval_secs: Some(60),
            },
        )
        .unwrap();
        assert_eq!(updated.message_text, "hello");
        assert_eq!(updated.interval_secs, 60);
    }

    #[test]
    fn update_missing_subscriber_is_not_found() {
        let conn = conn();
        let err = update_subscriber(&conn, "nope", &SubscriberUpdate::default()).unwrap_err();
        assert!(matches!(err, UserError::NotFound(id) if id == "nope"));
    }

    #[test]
    fn set_active_reports_missing_rows() {
        let conn = conn();
        assert!(!set_active(&conn, "ghost", false).unwrap());
        create_subscriber(&conn, "1", "x", 5).unwrap();
        assert!(set_active(&conn, "1", false).unwrap());
        assert!(!find_by_chat_id(&conn, "1").unwrap().unwrap().active);
    }
}
