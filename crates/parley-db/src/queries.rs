use crate::Database;
use crate::models::{NewUser, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str =
    "u.id, u.username, u.email, u.first_name, u.last_name, u.password, u.is_active, u.date_joined";

impl Database {
    // -- Users --

    /// Insert a user and return its id.
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, first_name, last_name, password)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (user.username, user.email, user.first_name, user.last_name, user.password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?1");
            conn.query_row(&sql, [username], map_user).optional()
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
            conn.query_row(&sql, [id], map_user).optional()
        })
    }

    pub fn email_taken(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let taken = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
                [email],
                |row| row.get(0),
            )?;
            Ok(taken)
        })
    }

    /// Active users ordered by id.
    pub fn list_active_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.is_active = 1 ORDER BY u.id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Which of `ids` belong to existing users.
    pub fn existing_user_ids(&self, ids: &[i64]) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!("SELECT id FROM users WHERE id IN ({})", placeholders.join(", "));

            let mut stmt = conn.prepare(&sql)?;
            let found = stmt
                .query_map(rusqlite::params_from_iter(ids), |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(found)
        })
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET is_active = ?1 WHERE id = ?2", (active, id))?;
            Ok(())
        })
    }

    // -- Tokens --

    pub fn insert_token(&self, jti: &str, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO auth_tokens (jti, user_id) VALUES (?1, ?2)", (jti, user_id))?;
            Ok(())
        })
    }

    /// The active user owning a registered token, if any.
    pub fn get_token_user(&self, jti: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_token_user(conn, jti))
    }

    /// Revoke every token of a user. Returns how many were removed.
    pub fn delete_tokens_for_user(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM auth_tokens WHERE user_id = ?1", [user_id])?;
            Ok(removed)
        })
    }
}

fn query_token_user(conn: &Connection, jti: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT {USER_COLUMNS}
         FROM auth_tokens t
         JOIN users u ON u.id = t.user_id
         WHERE t.jti = ?1 AND u.is_active = 1"
    );
    conn.query_row(&sql, [jti], map_user).optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        password: row.get(5)?,
        is_active: row.get(6)?,
        date_joined: row.get(7)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
