use std::collections::HashMap;

use axum::{
    Json,
    extract::{OriginalUri, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use validator::Validate;

use parley_db::models::{ConversationRow, MemberRow};
use parley_types::api::{ConversationResponse, CreateConversationRequest, Page, SimpleUser};

use crate::error::{ApiError, ApiResult, ValidationErrors};
use crate::links::RequestBase;
use crate::middleware::AuthUser;
use crate::pagination::{PageParams, PageQuery, paginate};
use crate::users::simple_member;
use crate::{AppState, parse_timestamp, run_db};

/// GET /conversations: the caller's conversations, newest first.
pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
    base: RequestBase,
    OriginalUri(uri): OriginalUri,
    WithRejection(Query(query), _): WithRejection<Query<PageQuery>, ApiError>,
) -> ApiResult<Json<Page<ConversationResponse>>> {
    let params = PageParams::from(&query);
    let user_id = user.id;

    let (count, rows, members) = run_db(&state, move |db| {
        let (count, rows) = db.list_conversations_for_user(user_id, params.offset, params.limit)?;
        let ids: Vec<i64> = rows.iter().map(|c| c.id).collect();
        let members = db.get_members_for_conversations(&ids)?;
        Ok((count, rows, members))
    })
    .await?;

    let results = conversation_responses(rows, &members);
    Ok(Json(paginate(results, count, params, &uri, &base)))
}

/// POST /conversations: create a group, or create/reuse a direct conversation.
///
/// Responds 201 for a new conversation and 200 when an existing direct
/// conversation between the same two users is returned.
pub async fn create_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    WithRejection(Json(req), _): WithRejection<Json<CreateConversationRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    if let Err(e) = req.validate() {
        return Err(ApiError::Validation(e.into()));
    }
    let requested = req.member_ids();
    let name = req.name.unwrap_or_default();

    let members = normalize_members(user.id, &requested, req.is_group)?;
    let is_group = req.is_group;

    let (row, created, member_rows) = run_db(&state, move |db| {
        let found = db.existing_user_ids(&members)?;
        let missing: Vec<i64> = members.iter().copied().filter(|id| !found.contains(id)).collect();
        if !missing.is_empty() {
            return Ok(Err(missing));
        }

        let (row, created) = db.find_or_create_conversation(&name, is_group, &members)?;
        let member_rows = db.get_members_for_conversations(&[row.id])?;
        Ok(Ok((row, created, member_rows)))
    })
    .await?
    .map_err(|missing| ApiError::Validation(ValidationErrors::non_field(missing_users_message(&missing))))?;

    let status = if created {
        info!(
            "User {} created {} conversation {}",
            user.username,
            if row.is_group { "group" } else { "direct" },
            row.id
        );
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let response = conversation_response(row, &member_rows);
    Ok((status, Json(response)))
}

/// Deduplicate the requested ids (keeping first-seen order), add the
/// requester, and enforce the member count for the conversation kind.
pub fn normalize_members(requester: i64, requested: &[i64], is_group: bool) -> ApiResult<Vec<i64>> {
    let mut members: Vec<i64> = Vec::with_capacity(requested.len() + 1);
    for id in requested {
        if !members.contains(id) {
            members.push(*id);
        }
    }
    if !members.contains(&requester) {
        members.push(requester);
    }

    if !is_group && members.len() != 2 {
        return Err(ApiError::Validation(ValidationErrors::non_field(
            "For DM, members must be exactly 1 other user.",
        )));
    }
    if is_group && members.len() < 2 {
        return Err(ApiError::Validation(ValidationErrors::non_field(
            "Group must include at least you and one more user.",
        )));
    }

    Ok(members)
}

fn missing_users_message(missing: &[i64]) -> String {
    let ids: Vec<String> = missing.iter().map(i64::to_string).collect();
    format!("User IDs not found: [{}]", ids.join(", "))
}

fn conversation_responses(rows: Vec<ConversationRow>, members: &[MemberRow]) -> Vec<ConversationResponse> {
    let mut by_conversation: HashMap<i64, Vec<SimpleUser>> = HashMap::new();
    for member in members {
        by_conversation
            .entry(member.conversation_id)
            .or_default()
            .push(simple_member(member));
    }

    rows.into_iter()
        .map(|row| {
            let members_detail = by_conversation.remove(&row.id).unwrap_or_default();
            build_response(row, members_detail)
        })
        .collect()
}

fn conversation_response(row: ConversationRow, members: &[MemberRow]) -> ConversationResponse {
    let members_detail = members
        .iter()
        .filter(|m| m.conversation_id == row.id)
        .map(simple_member)
        .collect();
    build_response(row, members_detail)
}

fn build_response(row: ConversationRow, members_detail: Vec<SimpleUser>) -> ConversationResponse {
    let context = format!("conversation {}", row.id);
    ConversationResponse {
        id: row.id,
        created_at: parse_timestamp(&row.created_at, &context),
        name: row.name,
        is_group: row.is_group,
        members: members_detail.iter().map(|m| m.id).collect(),
        members_detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_field(err: ApiError) -> Vec<String> {
        match err {
            ApiError::Validation(errors) => errors.get(crate::error::NON_FIELD_ERRORS).unwrap().to_vec(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn requester_is_added_to_direct_members() {
        assert_eq!(normalize_members(1, &[2], false).unwrap(), vec![2, 1]);
        assert_eq!(normalize_members(1, &[2, 2, 1], false).unwrap(), vec![2, 1]);
    }

    #[test]
    fn direct_needs_exactly_one_other_user() {
        let err = normalize_members(1, &[1], false).unwrap_err();
        assert_eq!(non_field(err), vec!["For DM, members must be exactly 1 other user."]);
        assert!(normalize_members(1, &[2, 3], false).is_err());
    }

    #[test]
    fn group_always_includes_requester() {
        assert_eq!(normalize_members(1, &[2, 3], true).unwrap(), vec![2, 3, 1]);
        assert_eq!(normalize_members(1, &[2], true).unwrap(), vec![2, 1]);

        let err = normalize_members(1, &[1, 1], true).unwrap_err();
        assert_eq!(non_field(err), vec!["Group must include at least you and one more user."]);
    }

    #[test]
    fn missing_ids_are_listed() {
        assert_eq!(missing_users_message(&[7, 9]), "User IDs not found: [7, 9]");
    }
}
