use crate::Database;
use crate::models::{ConversationRow, MemberRow};
use crate::queries::OptionalExt;
use anyhow::{Result, bail};
use rusqlite::{Connection, Row};
use tracing::debug;

impl Database {
    /// Conversations `user_id` belongs to, newest first, with the total count
    /// for pagination.
    pub fn list_conversations_for_user(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<(usize, Vec<ConversationRow>)> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversation_members WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT c.id, c.name, c.is_group, c.created_at
                 FROM conversations c
                 JOIN conversation_members m ON m.conversation_id = c.id
                 WHERE m.user_id = ?1
                 ORDER BY c.created_at DESC, c.id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map((user_id, limit, offset), map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((count as usize, rows))
        })
    }

    /// Batch-fetch members (with display columns) for a set of conversations,
    /// ordered by conversation then user id.
    pub fn get_members_for_conversations(&self, conversation_ids: &[i64]) -> Result<Vec<MemberRow>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=conversation_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT m.conversation_id, u.id, u.username, u.first_name, u.last_name
                 FROM conversation_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.conversation_id IN ({})
                 ORDER BY m.conversation_id, u.id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(conversation_ids), |row| {
                    Ok(MemberRow {
                        conversation_id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row.get(2)?,
                        first_name: row.get(3)?,
                        last_name: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn is_member(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| query_is_member(conn, conversation_id, user_id))
    }

    /// Create a conversation with the given member set, or return the existing
    /// direct conversation between the same two users.
    ///
    /// Returns the conversation and whether it was newly created. Membership
    /// is expected to be normalized already: deduplicated, including the
    /// requester, and exactly two ids when `is_group` is false.
    pub fn find_or_create_conversation(
        &self,
        name: &str,
        is_group: bool,
        members: &[i64],
    ) -> Result<(ConversationRow, bool)> {
        if !is_group && members.len() != 2 {
            bail!("direct conversation needs exactly 2 members, got {}", members.len());
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !is_group {
                let (low, high) = if members[0] <= members[1] {
                    (members[0], members[1])
                } else {
                    (members[1], members[0])
                };
                if let Some(existing) = query_direct_conversation(&tx, low, high)? {
                    debug!("Reusing direct conversation {} for users {} and {}", existing.id, low, high);
                    return Ok((existing, false));
                }
            }

            tx.execute(
                "INSERT INTO conversations (name, is_group) VALUES (?1, ?2)",
                (name, is_group),
            )?;
            let id = tx.last_insert_rowid();

            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO conversation_members (conversation_id, user_id) VALUES (?1, ?2)",
                )?;
                for user_id in members {
                    stmt.execute((id, user_id))?;
                }
            }

            let created = query_conversation(&tx, id)?
                .ok_or_else(|| anyhow::anyhow!("conversation {} vanished after insert", id))?;
            tx.commit()?;

            debug!("Created conversation {} with {} members", id, members.len());
            Ok((created, true))
        })
    }
}

fn query_conversation(conn: &Connection, id: i64) -> Result<Option<ConversationRow>> {
    conn.query_row(
        "SELECT id, name, is_group, created_at FROM conversations WHERE id = ?1",
        [id],
        map_conversation,
    )
    .optional()
}

/// The newest non-group conversation whose member set is exactly `{low, high}`.
fn query_direct_conversation(conn: &Connection, low: i64, high: i64) -> Result<Option<ConversationRow>> {
    conn.query_row(
        "SELECT c.id, c.name, c.is_group, c.created_at
         FROM conversations c
         WHERE c.is_group = 0
           AND EXISTS (SELECT 1 FROM conversation_members WHERE conversation_id = c.id AND user_id = ?1)
           AND EXISTS (SELECT 1 FROM conversation_members WHERE conversation_id = c.id AND user_id = ?2)
           AND (SELECT COUNT(*) FROM conversation_members WHERE conversation_id = c.id) = 2
         ORDER BY c.created_at DESC, c.id DESC
         LIMIT 1",
        (low, high),
        map_conversation,
    )
    .optional()
}

pub(crate) fn query_is_member(conn: &Connection, conversation_id: i64, user_id: i64) -> Result<bool> {
    let member = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM conversation_members WHERE conversation_id = ?1 AND user_id = ?2)",
        (conversation_id, user_id),
        |row| row.get(0),
    )?;
    Ok(member)
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        name: row.get(1)?,
        is_group: row.get(2)?,
        created_at: row.get(3)?,
    })
}
