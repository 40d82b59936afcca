use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use parley_db::models::NewUser;
use parley_types::api::{
    Claims, LoginRequest, LoginResponse, LogoutResponse, RegisterRequest, RegisterResponse,
};

use crate::error::{ApiError, ApiResult, ValidationErrors};
use crate::middleware::AuthUser;
use crate::{AppState, run_db};

const PASSWORD_MIN_LEN: usize = 8;

const BLANK: &str = "This field may not be blank.";

/// A short list of passwords that are always rejected.
const COMMON_PASSWORDS: &[&str] = &[
    "password", "password1", "password123", "12345678", "123456789", "1234567890",
    "qwerty123", "qwertyuiop", "iloveyou", "sunshine", "princess", "football",
    "baseball", "welcome1", "letmein1", "trustno1", "superman", "starwars",
    "passw0rd", "abc12345", "11111111", "00000000", "dragon12", "monkey123",
];

pub async fn register(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    // Shape rules come from the request's derive; blank and strength checks
    // are layered on top.
    let mut errors: ValidationErrors = match req.validate() {
        Ok(()) => ValidationErrors::new(),
        Err(e) => e.into(),
    };

    let username = present(&mut errors, "username", req.username.as_deref());
    let email = present(&mut errors, "email", req.email.as_deref());
    let password = present(&mut errors, "password", req.password.as_deref());
    let password2 = present(&mut errors, "password2", req.password2.as_deref());
    let first_name = req.first_name.unwrap_or_default();
    let last_name = req.last_name.unwrap_or_default();

    if let Some(password) = password {
        for message in password_problems(password, username.unwrap_or(""), email.unwrap_or(""), &first_name, &last_name) {
            errors.add("password", message);
        }
    }

    // Uniqueness only matters for values that are otherwise well formed.
    let check_username = username.filter(|_| !errors.has("username")).map(str::to_string);
    let check_email = email.filter(|_| !errors.has("email")).map(str::to_string);
    let (username_taken, email_taken) = run_db(&state, move |db| {
        let username_taken = match &check_username {
            Some(u) => db.get_user_by_username(u)?.is_some(),
            None => false,
        };
        let email_taken = match &check_email {
            Some(e) => db.email_taken(e)?,
            None => false,
        };
        Ok((username_taken, email_taken))
    })
    .await?;
    if username_taken {
        errors.add("username", "A user with that username already exists.");
    }
    if email_taken {
        errors.add("email", "This field must be unique.");
    }

    errors.into_result()?;

    // All four are present once field validation passed.
    let (username, email, password, password2) = match (username, email, password, password2) {
        (Some(u), Some(e), Some(p), Some(p2)) => (u.to_string(), e.to_string(), p.to_string(), p2),
        _ => return Err(ApiError::Validation(ValidationErrors::non_field("Missing required fields."))),
    };
    if password != password2 {
        return Err(ApiError::invalid("password", "Passwords didn't match."));
    }

    // Hash password with Argon2id
    let password_hash = hash_password(&password)?;

    let user_id = {
        let (username, email, first_name, last_name) =
            (username.clone(), email.clone(), first_name.clone(), last_name.clone());
        run_db(&state, move |db| {
            db.create_user(&NewUser {
                username: &username,
                email: &email,
                first_name: &first_name,
                last_name: &last_name,
                password_hash: &password_hash,
            })
        })
        .await?
    };
    info!("Registered user {} ({})", username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            username,
            email,
            first_name,
            last_name,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(ApiError::InvalidCredentials);
    };

    let user = run_db(&state, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash for user {}: {}", user.id, e)))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::InvalidCredentials)?;

    if !user.is_active {
        return Err(ApiError::InvalidCredentials);
    }

    let token = issue_token(&state, user.id, &user.username).await?;
    info!("User {} logged in", user.username);

    Ok(Json(LoginResponse { token }))
}

pub async fn logout(State(state): State<AppState>, user: AuthUser) -> ApiResult<impl IntoResponse> {
    let user_id = user.id;
    let removed = run_db(&state, move |db| db.delete_tokens_for_user(user_id)).await?;
    info!("User {} logged out ({} tokens revoked)", user.username, removed);

    Ok(Json(LogoutResponse {
        success: "Logged out".to_string(),
    }))
}

/// Sign a token for `user_id` and register its id so it can be revoked.
pub async fn issue_token(state: &AppState, user_id: i64, username: &str) -> ApiResult<String> {
    let jti = Uuid::new_v4().to_string();
    let token = create_token(&state.jwt_secret, state.token_ttl, user_id, username, &jti)?;

    run_db(state, move |db| db.insert_token(&jti, user_id)).await?;
    Ok(token)
}

fn create_token(
    secret: &str,
    ttl: chrono::Duration,
    user_id: i64,
    username: &str,
    jti: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        jti: jti.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// A required text field that passed its declared rules and is not blank.
/// Blank input replaces any other message for the field.
fn present<'a>(errors: &mut ValidationErrors, field: &str, value: Option<&'a str>) -> Option<&'a str> {
    let value = value?;
    if value.trim().is_empty() {
        errors.set(field, BLANK);
        return None;
    }
    (!errors.has(field)).then_some(value)
}

/// Password strength rules: minimum length, not entirely numeric, not a
/// well-known password, and not too close to the user's own attributes.
pub fn password_problems(
    password: &str,
    username: &str,
    email: &str,
    first_name: &str,
    last_name: &str,
) -> Vec<String> {
    let mut problems = Vec::new();
    let lowered = password.to_lowercase();

    let email_local = email.split('@').next().unwrap_or("");
    for (attribute, label) in [
        (username, "username"),
        (email_local, "email address"),
        (first_name, "first name"),
        (last_name, "last name"),
    ] {
        let attribute = attribute.to_lowercase();
        if attribute.chars().count() >= 3 && (lowered.contains(&attribute) || attribute.contains(&lowered)) {
            problems.push(format!("The password is too similar to the {label}."));
            break;
        }
    }

    if password.chars().count() < PASSWORD_MIN_LEN {
        problems.push(format!(
            "This password is too short. It must contain at least {PASSWORD_MIN_LEN} characters."
        ));
    }
    if COMMON_PASSWORDS.contains(&lowered.as_str()) {
        problems.push("This password is too common.".to_string());
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }

    problems
}
