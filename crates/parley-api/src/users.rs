use axum::{Json, extract::State};

use parley_db::models::{MemberRow, UserRow};
use parley_types::api::SimpleUser;

use crate::error::ApiResult;
use crate::middleware::AuthUser;
use crate::{AppState, run_db};

/// GET /users: every active account, ordered by id.
pub async fn list_users(State(state): State<AppState>, _user: AuthUser) -> ApiResult<Json<Vec<SimpleUser>>> {
    let rows = run_db(&state, |db| db.list_active_users()).await?;
    Ok(Json(rows.iter().map(simple_user).collect()))
}

pub fn simple_user(row: &UserRow) -> SimpleUser {
    SimpleUser {
        id: row.id,
        username: row.username.clone(),
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
    }
}

pub fn simple_member(row: &MemberRow) -> SimpleUser {
    SimpleUser {
        id: row.user_id,
        username: row.username.clone(),
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
    }
}
