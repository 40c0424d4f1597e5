use std::sync::{Arc, LazyLock};

use axum::{Json, extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use tracing::info;

use railyard_crypto::keys::random_secret;
use railyard_crypto::password::{hash_password, verify_password};
use railyard_crypto::token::{access_claims, issue_token};
use railyard_db::Database;
use railyard_db::models::UserRow;
use railyard_types::api::{LoginRequest, LoginResponse, RegisterRequest, UserEnvelope};

use crate::agent::{ReplyQueue, SYSTEM_EMAIL};
use crate::convert::user_response;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::middleware::{SESSION_COOKIE, resolve_session};

pub const MAX_NAME_CHARS: usize = 50;
const SESSION_DAYS: i64 = 7;

/// Checked against when the email is unknown, so a miss costs as much as a
/// wrong password.
static DUMMY_CREDENTIAL: LazyLock<String> = LazyLock::new(|| hash_password(&random_secret()));

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub cookie_secure: bool,
    pub replies: ReplyQueue,
}

/// Run a blocking store operation off the async runtime.
pub async fn with_db<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("email and password are required"));
    }
    if !email.contains('@') {
        return Err(ApiError::validation("invalid email"));
    }
    if email == SYSTEM_EMAIL {
        return Err(ApiError::Conflict("email already registered".into()));
    }

    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    if name.as_ref().is_some_and(|n| n.chars().count() > MAX_NAME_CHARS) {
        return Err(ApiError::validation("name is too long"));
    }

    // Hashing runs on the blocking pool together with the insert.
    let password = req.password;
    let row = with_db(&state, move |db| {
        let password_hash = hash_password(&password);
        db.create_user(&email, &password_hash, name.as_deref())
    })
    .await?
    .ok_or_else(|| ApiError::Conflict("email already registered".into()))?;

    info!("Registered user {}", row.id);

    Ok((
        StatusCode::CREATED,
        Json(UserEnvelope {
            user: Some(user_response(row)),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim().to_lowercase();
    let password = req.password;

    let user = with_db(&state, move |db| {
        Ok(authenticate(db.get_user_by_email(&email)?, &password))
    })
    .await?
    .ok_or(ApiError::Unauthorized)?;

    let claims = access_claims(user.id, &user.email, user.display_name.as_deref());
    let token = issue_token(&claims, &state.jwt_secret)?;

    // Last write wins: every token issued earlier for this user stops working.
    let stored = token.clone();
    with_db(&state, move |db| db.set_current_token(user.id, &stored)).await?;

    info!("User {} logged in", user.id);

    let cookie = Cookie::build((SESSION_COOKIE, token.clone()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(state.cookie_secure)
        .max_age(time::Duration::days(SESSION_DAYS));

    Ok((jar.add(cookie), Json(LoginResponse { token })))
}

/// GET /auth/me. 401 without a valid session, `{user: null}` if the account
/// behind a valid session has gone.
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let claims = resolve_session(&state, &headers).await?;
    let user = with_db(&state, move |db| db.get_user_by_id(claims.sub)).await?;

    Ok(Json(UserEnvelope {
        user: user.map(user_response),
    }))
}

/// Clears the cookie only. `current_token` is left in place so the old token
/// cannot be revived by a null comparison.
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let expired = Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::ZERO);
    (jar.add(expired), Json(json!({ "ok": true })))
}

/// Every call runs one full credential check, whether or not the account exists.
fn authenticate(user: Option<UserRow>, password: &str) -> Option<UserRow> {
    match user {
        Some(user) if verify_password(password, &user.password) => Some(user),
        Some(_) => None,
        None => {
            verify_password(password, &DUMMY_CREDENTIAL);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use railyard_crypto::password::ITERATIONS;

    fn row(password: &str) -> UserRow {
        UserRow {
            id: 1,
            email: "a@example.com".into(),
            password: hash_password(password),
            display_name: None,
            handle: None,
            bio: None,
            avatar_url: None,
            banner_url: None,
            current_token: None,
            created_at: "2024-01-01 00:00:00".into(),
            updated_at: "2024-01-01 00:00:00".into(),
        }
    }

    #[test]
    fn unknown_account_pays_full_hash_cost() {
        assert!(DUMMY_CREDENTIAL.starts_with(&format!("pbkdf2${ITERATIONS}$")));
        assert!(authenticate(None, "").is_none());
        assert!(authenticate(None, "hunter22").is_none());
    }

    #[test]
    fn known_account_needs_matching_password() {
        assert_eq!(authenticate(Some(row("hunter22")), "hunter22").map(|u| u.id), Some(1));
        assert!(authenticate(Some(row("hunter22")), "hunter23").is_none());
    }
}
