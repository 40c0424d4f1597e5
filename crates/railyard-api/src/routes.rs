use axum::{
    Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState, with_db};
use crate::error::ApiResult;
use crate::middleware::require_auth;
use crate::{posts, trending, users};

/// The full HTTP surface.
///
/// Three groups: open routes, read routes that personalise for a signed-in
/// viewer, and mutating routes behind `require_auth`.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/posts/{id}/comments", get(posts::list_comments))
        .route("/users/{id}", get(users::get_user))
        .route("/trending", get(trending::trending))
        .route("/health", get(health));

    let viewer_routes = Router::new()
        .route("/posts/explore", get(posts::explore))
        .route("/users/{id}/posts", get(users::user_posts))
        .route("/who-to-follow", get(users::who_to_follow));

    let protected_routes = Router::new()
        .route("/posts", post(posts::create_post))
        .route("/posts/timeline", get(posts::timeline))
        .route("/posts/{id}/like", post(posts::like_post).delete(posts::unlike_post))
        .route("/posts/{id}/comments", post(posts::create_comment))
        .route("/users/{id}/follow", post(users::follow).delete(users::unfollow))
        .route("/me/profile", patch(users::update_profile))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(viewer_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    with_db(&state, |db| db.ping()).await?;
    Ok(Json(json!({ "ok": true })))
}
