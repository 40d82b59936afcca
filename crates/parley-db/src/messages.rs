use crate::Database;
use crate::conversations::query_is_member;
use crate::models::{AttachmentRow, MessageRow, MessageWindow, NewAttachment};
use crate::queries::OptionalExt;
use anyhow::Result;
use rusqlite::{Connection, Row};

// JOIN users to fetch sender display columns in a single query (eliminates N+1)
const MESSAGE_SELECT: &str = "SELECT m.id, m.conversation_id, m.sender_id, u.username, u.first_name, u.last_name, m.text, m.created_at
     FROM messages m
     JOIN users u ON m.sender_id = u.id";

impl Database {
    /// A window of a conversation's messages, ordered by id ascending, plus
    /// the number of messages the window's filter and cap select.
    ///
    /// Non-members (and unknown conversations) get an empty result.
    pub fn list_messages_for_member(
        &self,
        conversation_id: i64,
        user_id: i64,
        window: MessageWindow,
    ) -> Result<(usize, Vec<MessageRow>)> {
        self.with_conn(|conn| {
            if !query_is_member(conn, conversation_id, user_id)? {
                return Ok((0, vec![]));
            }

            // SQLite treats a negative LIMIT as unbounded.
            let after_id = window.after_id.unwrap_or(i64::MIN);
            let cap = window.cap.unwrap_or(-1);

            let filtered = format!(
                "{MESSAGE_SELECT}
                 WHERE m.conversation_id = ?1 AND m.id > ?2
                 ORDER BY m.id
                 LIMIT ?3"
            );

            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM ({filtered})"),
                (conversation_id, after_id, cap),
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM ({filtered}) ORDER BY id LIMIT ?4 OFFSET ?5"
            ))?;
            let rows = stmt
                .query_map(
                    (conversation_id, after_id, cap, window.limit, window.offset),
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((count as usize, rows))
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{MESSAGE_SELECT} WHERE m.id = ?1"), [id], map_message)
                .optional()
        })
    }

    /// Insert a message and its attachment rows in one transaction.
    ///
    /// Membership is checked inside the same transaction; `None` means the
    /// conversation does not exist or `sender_id` is not a member of it.
    pub fn insert_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        text: &str,
        attachments: &[NewAttachment],
    ) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !query_is_member(&tx, conversation_id, sender_id)? {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO messages (conversation_id, sender_id, text) VALUES (?1, ?2, ?3)",
                (conversation_id, sender_id, text),
            )?;
            let message_id = tx.last_insert_rowid();

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO message_attachments (message_id, file, content_type, size)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for attachment in attachments {
                    stmt.execute((
                        message_id,
                        &attachment.file,
                        &attachment.content_type,
                        attachment.size,
                    ))?;
                }
            }

            tx.commit()?;
            Ok(Some(message_id))
        })
    }

    /// Batch-fetch attachments for a set of message IDs, ordered by id.
    pub fn get_attachments_for_messages(&self, message_ids: &[i64]) -> Result<Vec<AttachmentRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| query_attachments(conn, message_ids))
    }
}

fn query_attachments(conn: &Connection, message_ids: &[i64]) -> Result<Vec<AttachmentRow>> {
    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT id, message_id, file, content_type, size, uploaded_at
         FROM message_attachments
         WHERE message_id IN ({})
         ORDER BY id",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(message_ids), |row| {
            Ok(AttachmentRow {
                id: row.get(0)?,
                message_id: row.get(1)?,
                file: row.get(2)?,
                content_type: row.get(3)?,
                size: row.get(4)?,
                uploaded_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row.get(3)?,
        sender_first_name: row.get(4)?,
        sender_last_name: row.get(5)?,
        text: row.get(6)?,
        created_at: row.get(7)?,
    })
}
