//! Row types, one per query shape.
//! Distinct from railyard-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
    pub current_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub user: UserRow,
    pub followers: i64,
    pub following: i64,
    pub posts: i64,
}

/// A post joined with its author and read-time aggregates.
#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: String,
    pub author_name: Option<String>,
    pub author_handle: Option<String>,
    pub author_avatar_url: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked: bool,
}

#[derive(Debug, Clone)]
pub struct CommentRow {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_name: Option<String>,
    pub author_handle: Option<String>,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct SuggestionRow {
    pub id: i64,
    pub display_name: Option<String>,
    pub handle: Option<String>,
    pub followers: i64,
}
