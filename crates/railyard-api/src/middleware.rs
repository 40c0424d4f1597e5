use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use railyard_crypto::token::verify_token;
use railyard_types::api::Claims;

use crate::auth::{AppState, with_db};
use crate::error::{ApiError, ApiResult};

pub const SESSION_COOKIE: &str = "auth";

/// Identity bound by `require_auth` for downstream handlers.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: i64,
}

/// Session token from the `auth` cookie, falling back to a bearer header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = CookieJar::from_headers(headers).get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Resolve the caller's session: the token must verify and must match the
/// user's stored `current_token` (a null stored token accepts any valid one).
pub async fn resolve_session(state: &AppState, headers: &HeaderMap) -> ApiResult<Claims> {
    let token = session_token(headers).ok_or(ApiError::Unauthorized)?;
    let claims = verify_token(&token, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;

    let user_id = claims.sub;
    let stored = with_db(state, move |db| db.get_current_token(user_id)).await?;

    match stored {
        Some(None) => Ok(claims),
        Some(Some(current)) if current == token => Ok(claims),
        Some(Some(_)) => {
            debug!("Rejected superseded token for user {}", user_id);
            Err(ApiError::Unauthorized)
        }
        None => Err(ApiError::Unauthorized),
    }
}

/// Gate for mutating routes. Any failure ends the request with 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = resolve_session(&state, req.headers()).await?;

    req.extensions_mut().insert(AuthUser { id: claims.sub });
    Ok(next.run(req).await)
}

/// Optional identity for read routes. A missing or bad session means
/// "anonymous", never an error.
#[derive(Debug, Clone, Copy)]
pub struct Viewer(pub Option<i64>);

impl FromRequestParts<AppState> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if session_token(&parts.headers).is_none() {
            return Ok(Viewer(None));
        }

        match resolve_session(state, &parts.headers).await {
            Ok(claims) => Ok(Viewer(Some(claims.sub))),
            Err(ApiError::Store(e)) => {
                warn!("Session lookup failed, serving anonymously: {:#}", e);
                Ok(Viewer(None))
            }
            Err(_) => Ok(Viewer(None)),
        }
    }
}
