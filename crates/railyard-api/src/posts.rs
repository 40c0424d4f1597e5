use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use railyard_db::FeedScope;
use railyard_types::api::{
    CommentEnvelope, CreateCommentRequest, CreatePostRequest, FeedPage, Items, PostEnvelope,
};

use crate::agent::{ReplyJob, mentions_ai};
use crate::auth::{AppState, with_db};
use crate::convert::{comment_item, post_item};
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::middleware::{AuthUser, Viewer};

pub const MAX_POST_CHARS: usize = 500;
pub const MAX_COMMENT_CHARS: usize = 400;
pub const PAGE_SIZE: u32 = 20;
const COMMENT_PAGE: u32 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub cursor: Option<i64>,
    pub limit: Option<u32>,
}

impl FeedQuery {
    fn page_size(&self) -> u32 {
        self.limit.unwrap_or(PAGE_SIZE).clamp(1, PAGE_SIZE)
    }
}

/// Trim and bound user-written text. Length is counted in characters.
pub fn validate_text(raw: &str, max_chars: usize, what: &str) -> ApiResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ApiError::validation(format!("{what} must not be empty")));
    }
    if text.chars().count() > max_chars {
        return Err(ApiError::validation(format!(
            "{what} must be at most {max_chars} characters"
        )));
    }
    Ok(text.to_string())
}

/// Shared page assembly for timeline, explore and author listings.
/// `nextCursor` is only handed out when the page came back full.
pub async fn feed_page(
    state: &AppState,
    scope: FeedScope,
    viewer: Option<i64>,
    query: &FeedQuery,
) -> ApiResult<FeedPage> {
    let limit = query.page_size();
    let cursor = query.cursor;

    let rows = with_db(state, move |db| db.feed_page(scope, viewer, cursor, limit)).await?;

    let next_cursor = if rows.len() == limit as usize {
        rows.last().map(|row| row.id)
    } else {
        None
    };

    Ok(FeedPage {
        items: rows.into_iter().map(post_item).collect(),
        next_cursor,
    })
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = validate_text(&req.content, MAX_POST_CHARS, "content")?;

    let stored = content.clone();
    let row = with_db(&state, move |db| db.insert_post(user.id, &stored)).await?;

    info!("User {} created post {}", user.id, row.id);

    if mentions_ai(&content) {
        state.replies.enqueue(ReplyJob {
            post_id: row.id,
            content,
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(PostEnvelope {
            post: post_item(row),
        }),
    ))
}

pub async fn timeline(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = feed_page(&state, FeedScope::Timeline(user.id), Some(user.id), &query).await?;
    Ok(Json(page))
}

pub async fn explore(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(query): Query<FeedQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = feed_page(&state, FeedScope::Explore, viewer, &query).await?;
    Ok(Json(page))
}

pub async fn like_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let found = with_db(&state, move |db| db.like_post(user.id, post_id)).await?;
    if !found {
        return Err(ApiError::NotFound("post not found".into()));
    }

    Ok(Json(json!({ "ok": true })))
}

pub async fn unlike_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    with_db(&state, move |db| db.unlike_post(user.id, post_id)).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(user): Extension<AuthUser>,
    JsonBody(req): JsonBody<CreateCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let content = validate_text(&req.content, MAX_COMMENT_CHARS, "content")?;

    let row = with_db(&state, move |db| db.insert_comment(post_id, user.id, &content))
        .await?
        .ok_or_else(|| ApiError::NotFound("post not found".into()))?;

    Ok((
        StatusCode::CREATED,
        Json(CommentEnvelope {
            comment: comment_item(row),
        }),
    ))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let rows = with_db(&state, move |db| db.list_comments(post_id, COMMENT_PAGE)).await?;

    Ok(Json(Items {
        items: rows.into_iter().map(comment_item).collect::<Vec<_>>(),
    }))
}
