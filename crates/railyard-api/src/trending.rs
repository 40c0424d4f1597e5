//! Hashtag trends over the most recent posts.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use regex::Regex;
use serde::Deserialize;

use railyard_types::api::{Items, TrendingTag};

use crate::auth::{AppState, with_db};
use crate::error::ApiResult;

/// How many recent posts are scanned.
pub const SCAN_WINDOW: u32 = 200;
const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 10;
const MIN_TAG_CHARS: usize = 2;
const MAX_TAG_CHARS: usize = 30;

/// `#` at the start of the text or after whitespace, then a run of Unicode
/// letters, digits or underscores. Run length is checked separately so an
/// over-long run is dropped rather than cut short.
static HASHTAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)#([\p{L}\p{N}_]+)").expect("Invalid hashtag regex")
});

/// Distinct lowercase tags in one post, in order of first appearance.
pub fn extract_tags(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    HASHTAG_REGEX
        .captures_iter(content)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str())
        .filter(|tag| (MIN_TAG_CHARS..=MAX_TAG_CHARS).contains(&tag.chars().count()))
        .map(str::to_lowercase)
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Count each tag once per post, then rank by count descending. Ties keep the
/// order in which tags were first discovered (posts are newest first).
pub fn rank_tags<'a, I>(posts: I, limit: usize) -> Vec<TrendingTag>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ranked: Vec<TrendingTag> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for content in posts {
        for tag in extract_tags(content) {
            match index.get(&tag) {
                Some(&i) => ranked[i].count += 1,
                None => {
                    index.insert(tag.clone(), ranked.len());
                    ranked.push(TrendingTag { tag, count: 1 });
                }
            }
        }
    }

    // Stable sort: equal counts stay in discovery order.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(limit);
    ranked
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    pub limit: Option<usize>,
}

pub async fn trending(
    State(state): State<AppState>,
    Query(query): Query<TrendingQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let contents = with_db(&state, |db| db.recent_post_contents(SCAN_WINDOW)).await?;
    let items = rank_tags(contents.iter().map(String::as_str), limit);

    Ok(Json(Items { items }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(tag: &str, count: u32) -> TrendingTag {
        TrendingTag {
            tag: tag.into(),
            count,
        }
    }

    #[test]
    fn repeated_tag_in_one_post_counts_once() {
        assert_eq!(extract_tags("#Rail #rail #RAIL"), vec!["rail"]);
        assert_eq!(rank_tags(["#Rail #rail #RAIL"], 5), vec![tag("rail", 1)]);
    }

    #[test]
    fn separate_posts_add_up() {
        assert_eq!(rank_tags(["#rail", "#Rail"], 5), vec![tag("rail", 2)]);
    }

    #[test]
    fn tag_must_start_text_or_follow_whitespace() {
        assert_eq!(extract_tags("#start mid#dle\tend #tab\n#line"), vec!["start", "tab", "line"]);
        assert!(extract_tags("email me at a#b").is_empty());
    }

    #[test]
    fn tag_length_bounds() {
        assert!(extract_tags("#a").is_empty());
        assert_eq!(extract_tags("#ab"), vec!["ab"]);
        assert_eq!(extract_tags(&format!("#{}", "x".repeat(30))), vec!["x".repeat(30)]);
        assert!(extract_tags(&format!("#{}", "x".repeat(31))).is_empty());
    }

    #[test]
    fn unicode_tags_and_punctuation_boundary() {
        assert_eq!(extract_tags("#Zürich! #東京駅 #ΤΡΕΝΟ"), vec!["zürich", "東京駅", "τρενο"]);
        assert_eq!(extract_tags("#steam_age, nice"), vec!["steam_age"]);
    }

    #[test]
    fn ranking_breaks_ties_by_discovery_order() {
        let posts = ["#diesel #steam", "#electric #steam", "#diesel", "#maglev"];
        assert_eq!(
            rank_tags(posts, 10),
            vec![tag("diesel", 2), tag("steam", 2), tag("electric", 1), tag("maglev", 1)]
        );
        assert_eq!(rank_tags(posts, 1), vec![tag("diesel", 2)]);
    }

    #[test]
    fn no_tags_no_trends() {
        assert!(rank_tags(["plain words", ""], 5).is_empty());
    }
}
