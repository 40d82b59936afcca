use std::collections::HashMap;

use axum::{
    Json,
    extract::{FromRequest, Multipart, OriginalUri, Path, Query, Request, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use parley_db::models::{AttachmentRow, MessageRow, MessageWindow, NewAttachment};
use parley_types::api::{AttachmentResponse, IntOrString, MessageResponse, Page, SendMessageRequest, SimpleUser};

use crate::error::{ApiError, ApiResult, ValidationErrors};
use crate::links::{RequestBase, media_path};
use crate::middleware::AuthUser;
use crate::pagination::{PageParams, paginate, parse_int};
use crate::{AppState, parse_timestamp, run_db};

const NOT_A_MEMBER: &str = "Conversation not found or you are not a member.";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const CONTENT_TYPE_MAX_LEN: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    /// Exclusive cursor: only messages with a larger id are returned.
    pub after_id: Option<String>,
    /// Caps the stream to its first N messages and doubles as the page size.
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl MessageQuery {
    /// Unparseable values are ignored rather than rejected.
    pub fn window(&self) -> (MessageWindow, PageParams) {
        let params = PageParams::from_raw(self.limit.as_deref(), self.offset.as_deref());
        let window = MessageWindow {
            after_id: self.after_id.as_deref().and_then(parse_int),
            cap: self.limit.as_deref().and_then(parse_int).filter(|n| *n >= 0),
            offset: params.offset,
            limit: params.limit,
        };
        (window, params)
    }
}

/// GET /messages/{conversation_id}: incremental pull of a conversation.
///
/// Callers outside the conversation get an empty page, not an error.
pub async fn list_messages(
    State(state): State<AppState>,
    user: AuthUser,
    base: RequestBase,
    OriginalUri(uri): OriginalUri,
    WithRejection(Path(conversation_id), _): WithRejection<Path<i64>, ApiError>,
    WithRejection(Query(query), _): WithRejection<Query<MessageQuery>, ApiError>,
) -> ApiResult<Json<Page<MessageResponse>>> {
    let (window, params) = query.window();
    let user_id = user.id;

    let (count, rows, attachments) = run_db(&state, move |db| {
        let (count, rows) = db.list_messages_for_member(conversation_id, user_id, window)?;
        let ids: Vec<i64> = rows.iter().map(|m| m.id).collect();
        let attachments = db.get_attachments_for_messages(&ids)?;
        Ok((count, rows, attachments))
    })
    .await?;

    let results = message_responses(rows, attachments, &state.media_url, &base);
    Ok(Json(paginate(results, count, params, &uri, &base)))
}

/// One uploaded file part, buffered in memory.
struct UploadedFile {
    name: String,
    content_type: String,
    data: Bytes,
}

/// A send request after decoding, before validation.
#[derive(Default)]
struct SendDraft {
    conversation_id: Option<String>,
    text: Option<String>,
    files: Vec<UploadedFile>,
}

/// POST /messages/send: accepts JSON or multipart with any number of
/// `file`/`files` parts.
pub async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    base: RequestBase,
    req: Request,
) -> ApiResult<impl IntoResponse> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"));

    let draft = if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let WithRejection(Json(body), _) =
            WithRejection::<Json<SendMessageRequest>, ApiError>::from_request(req, &state).await?;
        SendDraft {
            conversation_id: body.conversation_id.map(|id| match id {
                IntOrString::Int(n) => n.to_string(),
                IntOrString::Text(raw) => raw,
            }),
            text: body.text,
            files: Vec::new(),
        }
    };

    let conversation_id = match draft.conversation_id.as_deref() {
        None => return Err(ApiError::invalid("conversation_id", "This field is required.")),
        Some(raw) => parse_int(raw).ok_or_else(|| ApiError::invalid("conversation_id", "A valid integer is required."))?,
    };
    let text = draft.text.unwrap_or_default();

    let user_id = user.id;
    let member = run_db(&state, move |db| db.is_member(conversation_id, user_id)).await?;
    if !member {
        return Err(ApiError::Validation(ValidationErrors::non_field(NOT_A_MEMBER)));
    }

    // Bytes go to storage first; the rows then land in one transaction.
    let now = chrono::Utc::now();
    let mut stored: Vec<NewAttachment> = Vec::with_capacity(draft.files.len());
    for file in &draft.files {
        match state.storage.save(&file.name, &file.data, now).await {
            Ok(path) => stored.push(NewAttachment {
                file: path,
                content_type: file.content_type.clone(),
                size: file.data.len() as i64,
            }),
            Err(e) => {
                discard_files(&state, &stored).await;
                return Err(ApiError::Internal(e.context("failed to store attachment")));
            }
        }
    }

    let paths: Vec<String> = stored.iter().map(|a| a.file.clone()).collect();
    let inserted = run_db(&state, move |db| {
        let Some(message_id) = db.insert_message(conversation_id, user_id, &text, &stored)? else {
            return Ok(None);
        };
        let row = db
            .get_message(message_id)?
            .ok_or_else(|| anyhow::anyhow!("message {} vanished after insert", message_id))?;
        let attachments = db.get_attachments_for_messages(&[message_id])?;
        Ok(Some((row, attachments)))
    })
    .await;

    let (row, attachments) = match inserted {
        Ok(Some(found)) => found,
        Ok(None) => {
            remove_paths(&state, &paths).await;
            return Err(ApiError::Validation(ValidationErrors::non_field(NOT_A_MEMBER)));
        }
        Err(e) => {
            remove_paths(&state, &paths).await;
            return Err(e);
        }
    };

    info!(
        "User {} sent message {} to conversation {} ({} attachments)",
        user.username,
        row.id,
        conversation_id,
        attachments.len()
    );

    let mut responses = message_responses(vec![row], attachments, &state.media_url, &base);
    let response = responses
        .pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("sent message missing from response")))?;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn read_multipart(mut multipart: Multipart) -> ApiResult<SendDraft> {
    let mut draft = SendDraft::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("conversation_id") => {
                draft.conversation_id = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?);
            }
            Some("text") => {
                draft.text = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.body_text()))?);
            }
            Some("file") | Some("files") => {
                let name = field.file_name().unwrap_or("").to_string();
                let content_type = normalize_content_type(field.content_type());
                let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
                draft.files.push(UploadedFile {
                    name,
                    content_type,
                    data,
                });
            }
            other => {
                warn!("Ignoring unexpected multipart field {:?}", other);
            }
        }
    }

    Ok(draft)
}

fn normalize_content_type(declared: Option<&str>) -> String {
    let declared = declared.map(str::trim).filter(|ct| !ct.is_empty()).unwrap_or(DEFAULT_CONTENT_TYPE);
    declared.chars().take(CONTENT_TYPE_MAX_LEN).collect()
}

async fn discard_files(state: &AppState, stored: &[NewAttachment]) {
    let paths: Vec<String> = stored.iter().map(|a| a.file.clone()).collect();
    remove_paths(state, &paths).await;
}

async fn remove_paths(state: &AppState, paths: &[String]) {
    for path in paths {
        if let Err(e) = state.storage.delete(path).await {
            warn!("Failed to remove orphaned attachment {}: {}", path, e);
        }
    }
}

/// Assemble API messages from rows, attaching each message's files with
/// their retrieval URLs.
fn message_responses(
    rows: Vec<MessageRow>,
    attachments: Vec<AttachmentRow>,
    media_url: &str,
    base: &RequestBase,
) -> Vec<MessageResponse> {
    let mut by_message: HashMap<i64, Vec<AttachmentResponse>> = HashMap::new();
    for attachment in attachments {
        let context = format!("attachment {}", attachment.id);
        by_message
            .entry(attachment.message_id)
            .or_default()
            .push(AttachmentResponse {
                id: attachment.id,
                file: base.absolute(&media_path(media_url, &attachment.file)),
                content_type: attachment.content_type,
                size: attachment.size,
                uploaded_at: parse_timestamp(&attachment.uploaded_at, &context),
            });
    }

    rows.into_iter()
        .map(|row| {
            let context = format!("message {}", row.id);
            MessageResponse {
                id: row.id,
                conversation: row.conversation_id,
                sender: row.sender_id,
                sender_detail: SimpleUser {
                    id: row.sender_id,
                    username: row.sender_username,
                    first_name: row.sender_first_name,
                    last_name: row.sender_last_name,
                },
                created_at: parse_timestamp(&row.created_at, &context),
                text: row.text,
                attachments: by_message.remove(&row.id).unwrap_or_default(),
            }
        })
        .collect()
}
