//! Row-to-wire conversions.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use railyard_db::models::{CommentRow, PostRow, ProfileRow, SuggestionRow, UserRow};
use railyard_types::api::{CommentItem, PostItem, PublicProfile, Suggestion, UserResponse};

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without a timezone.
/// Parse as naive UTC; anything unreadable is logged and zeroed.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub fn user_response(row: UserRow) -> UserResponse {
    UserResponse {
        id: row.id,
        email: row.email,
        display_name: row.display_name,
        handle: row.handle,
        bio: row.bio,
        avatar_url: row.avatar_url,
        banner_url: row.banner_url,
        created_at: parse_timestamp(&row.created_at),
    }
}

pub fn public_profile(row: ProfileRow) -> PublicProfile {
    let user = row.user;
    PublicProfile {
        id: user.id,
        display_name: user.display_name,
        handle: user.handle,
        bio: user.bio,
        avatar_url: user.avatar_url,
        banner_url: user.banner_url,
        created_at: parse_timestamp(&user.created_at),
        followers: row.followers,
        following: row.following,
        posts: row.posts,
    }
}

pub fn post_item(row: PostRow) -> PostItem {
    PostItem {
        id: row.id,
        author_id: row.author_id,
        created_at: parse_timestamp(&row.created_at),
        content: row.content,
        author_name: row.author_name,
        handle: row.author_handle,
        avatar_url: row.author_avatar_url,
        like_count: row.like_count,
        comment_count: row.comment_count,
        liked: row.liked,
    }
}

pub fn comment_item(row: CommentRow) -> CommentItem {
    CommentItem {
        id: row.id,
        post_id: row.post_id,
        author_id: row.author_id,
        author_name: row.author_name,
        handle: row.author_handle,
        created_at: parse_timestamp(&row.created_at),
        content: row.content,
    }
}

pub fn suggestion(row: SuggestionRow) -> Suggestion {
    Suggestion {
        id: row.id,
        name: row.display_name,
        handle: row.handle,
        followers: row.followers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_sqlite_and_rfc3339() {
        let ts = parse_timestamp("2024-03-09 14:05:30");
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 3, 9));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (14, 5, 30));

        let ts = parse_timestamp("2024-03-09T14:05:30Z");
        assert_eq!(ts.hour(), 14);
    }

    #[test]
    fn garbage_becomes_epoch() {
        assert_eq!(parse_timestamp("yesterday-ish"), DateTime::<Utc>::default());
    }
}
