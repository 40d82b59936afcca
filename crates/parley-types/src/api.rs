use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// An integer that clients may send either as a JSON number or as a numeric
/// string (form-style clients do the latter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i64),
    Text(String),
}

impl IntOrString {
    /// `None` when the text form is not an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            IntOrString::Int(n) => Some(*n),
            IntOrString::Text(s) => s.trim().parse().ok(),
        }
    }
}

// -- Token Claims --

/// Bearer token claims. `jti` is registered server-side when the token is
/// issued so that logout can revoke it before `exp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub jti: String,
    pub exp: usize,
}

// -- Auth --

/// Every field is optional on the wire so that missing fields surface as
/// per-field validation errors rather than a blanket decode failure.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(
        required(message = "This field is required."),
        length(max = 150, message = "Ensure this field has no more than 150 characters."),
        custom(function = "validate_username")
    )]
    pub username: Option<String>,
    #[serde(default)]
    #[validate(required(message = "This field is required."))]
    pub password: Option<String>,
    #[serde(default)]
    #[validate(required(message = "This field is required."))]
    pub password2: Option<String>,
    #[serde(default)]
    #[validate(
        required(message = "This field is required."),
        length(max = 254, message = "Ensure this field has no more than 254 characters."),
        email(message = "Enter a valid email address.")
    )]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub first_name: Option<String>,
    #[serde(default)]
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    pub last_name: Option<String>,
}

/// Letters, digits and `@ . + - _` only.
fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
    {
        return Ok(());
    }
    Err(ValidationError::new("invalid_username").with_message(Cow::Borrowed(
        "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
    )))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub success: String,
}

// -- Users --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleUser {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

// -- Conversations --

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateConversationRequest {
    #[serde(default)]
    #[validate(length(max = 200, message = "Ensure this field has no more than 200 characters."))]
    pub name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    #[validate(
        required(message = "This field is required."),
        length(min = 1, message = "This list may not be empty."),
        custom(function = "validate_member_ids")
    )]
    pub members: Option<Vec<IntOrString>>,
}

impl CreateConversationRequest {
    /// Member ids as integers. Only meaningful once `validate` has passed.
    pub fn member_ids(&self) -> Vec<i64> {
        self.members
            .iter()
            .flatten()
            .filter_map(IntOrString::as_i64)
            .collect()
    }
}

fn validate_member_ids(ids: &[IntOrString]) -> Result<(), ValidationError> {
    for id in ids {
        match id.as_i64() {
            None => {
                return Err(ValidationError::new("invalid")
                    .with_message(Cow::Borrowed("A valid integer is required.")));
            }
            Some(n) if n < 1 => {
                return Err(ValidationError::new("min_value")
                    .with_message(Cow::Borrowed("Ensure this value is greater than or equal to 1.")));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub id: i64,
    pub name: String,
    pub is_group: bool,
    pub members: Vec<i64>,
    pub members_detail: Vec<SimpleUser>,
    pub created_at: DateTime<Utc>,
}

// -- Messages --

/// JSON form of a send. Multipart sends carry the same fields as form parts
/// plus any number of `file`/`files` parts.
#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub conversation_id: Option<IntOrString>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentResponse {
    pub id: i64,
    /// Retrieval URL; absolute when the request named a host.
    pub file: String,
    pub content_type: String,
    pub size: i64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: i64,
    pub conversation: i64,
    pub sender: i64,
    pub sender_detail: SimpleUser,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<AttachmentResponse>,
}

// -- Pagination --

/// Limit/offset page envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}
