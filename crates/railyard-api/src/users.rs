use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;

use railyard_db::queries::ProfileFields;
use railyard_db::{FeedScope, ProfileUpdate};
use railyard_types::api::{Items, UpdateProfileRequest, UserEnvelope};

use crate::agent::SYSTEM_HANDLE;
use crate::auth::{AppState, MAX_NAME_CHARS, with_db};
use crate::convert::{public_profile, suggestion, user_response};
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::middleware::{AuthUser, Viewer};
use crate::posts::{FeedQuery, feed_page};

const MAX_BIO_CHARS: usize = 160;
const MAX_URL_CHARS: usize = 500;
const MIN_HANDLE_CHARS: usize = 2;
const MAX_HANDLE_CHARS: usize = 30;
const SUGGESTION_LIMIT: u32 = 5;

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row = with_db(&state, move |db| db.get_profile(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    Ok(Json(UserEnvelope {
        user: Some(public_profile(row)),
    }))
}

pub async fn user_posts(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Viewer(viewer): Viewer,
    Query(query): Query<FeedQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = feed_page(&state, FeedScope::Author(user_id), viewer, &query).await?;
    Ok(Json(page))
}

pub async fn follow(
    State(state): State<AppState>,
    Path(target): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    if target == user.id {
        return Err(ApiError::validation("cannot follow yourself"));
    }

    let found = with_db(&state, move |db| db.follow(user.id, target)).await?;
    if !found {
        return Err(ApiError::NotFound("user not found".into()));
    }

    Ok(Json(json!({ "ok": true })))
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(target): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    with_db(&state, move |db| db.unfollow(user.id, target)).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let current = with_db(&state, move |db| db.get_user_by_id(user.id))
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    let fields = ProfileFields {
        handle: match req.handle {
            Some(raw) => normalize_handle(&raw)?,
            None => current.handle,
        },
        display_name: merge_text(req.display_name, current.display_name, MAX_NAME_CHARS, "display_name")?,
        bio: merge_text(req.bio, current.bio, MAX_BIO_CHARS, "bio")?,
        avatar_url: merge_text(req.avatar_url, current.avatar_url, MAX_URL_CHARS, "avatar_url")?,
        banner_url: merge_text(req.banner_url, current.banner_url, MAX_URL_CHARS, "banner_url")?,
    };

    let outcome = with_db(&state, move |db| db.update_profile(user.id, &fields)).await?;

    match outcome {
        ProfileUpdate::Updated(row) => {
            info!("User {} updated profile", user.id);
            Ok(Json(UserEnvelope {
                user: Some(user_response(row)),
            }))
        }
        ProfileUpdate::HandleTaken => Err(ApiError::Conflict("handle already taken".into())),
        ProfileUpdate::NotFound => Err(ApiError::NotFound("user not found".into())),
    }
}

pub async fn who_to_follow(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
) -> ApiResult<impl IntoResponse> {
    let rows =
        with_db(&state, move |db| db.who_to_follow(viewer, SYSTEM_HANDLE, SUGGESTION_LIMIT)).await?;

    Ok(Json(Items {
        items: rows.into_iter().map(suggestion).collect::<Vec<_>>(),
    }))
}

/// `@Steam_Fan` → `steam_fan`. Empty clears the handle.
fn normalize_handle(raw: &str) -> ApiResult<Option<String>> {
    let handle = raw.trim().trim_start_matches('@').to_lowercase();
    if handle.is_empty() {
        return Ok(None);
    }

    let len = handle.chars().count();
    let well_formed = (MIN_HANDLE_CHARS..=MAX_HANDLE_CHARS).contains(&len)
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed {
        return Err(ApiError::validation(
            "handle must be 2-30 letters, digits or underscores",
        ));
    }
    if handle == SYSTEM_HANDLE {
        return Err(ApiError::Conflict("handle already taken".into()));
    }

    Ok(Some(handle))
}

/// Absent keeps the stored value, blank clears it, anything else replaces it.
fn merge_text(
    incoming: Option<String>,
    current: Option<String>,
    max_chars: usize,
    what: &str,
) -> ApiResult<Option<String>> {
    let Some(raw) = incoming else {
        return Ok(current);
    };

    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if text.chars().count() > max_chars {
        return Err(ApiError::validation(format!(
            "{what} must be at most {max_chars} characters"
        )));
    }
    Ok(Some(text.to_string()))
}
