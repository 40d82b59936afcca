/// Database row types. These map directly to SQLite rows.
/// Distinct from parley-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub is_active: bool,
    pub date_joined: String,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password_hash: &'a str,
}

pub struct ConversationRow {
    pub id: i64,
    pub name: String,
    pub is_group: bool,
    pub created_at: String,
}

/// A conversation member joined with the user columns needed for display.
pub struct MemberRow {
    pub conversation_id: i64,
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub sender_username: String,
    pub sender_first_name: String,
    pub sender_last_name: String,
    pub text: String,
    pub created_at: String,
}

pub struct AttachmentRow {
    pub id: i64,
    pub message_id: i64,
    pub file: String,
    pub content_type: String,
    pub size: i64,
    pub uploaded_at: String,
}

pub struct NewAttachment {
    pub file: String,
    pub content_type: String,
    pub size: i64,
}

/// Which slice of a conversation's message stream to read.
///
/// `after_id` is an exclusive lower bound on message ids. `cap` truncates the
/// filtered stream to its first N messages before `offset`/`limit` paging is
/// applied on top, so combining both narrows to their intersection.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageWindow {
    pub after_id: Option<i64>,
    pub cap: Option<i64>,
    pub offset: i64,
    pub limit: i64,
}
