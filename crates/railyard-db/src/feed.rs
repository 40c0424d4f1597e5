use crate::Database;
use crate::models::PostRow;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row};

/// Which posts a feed page draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedScope {
    /// The user's own posts plus everyone they follow.
    Timeline(i64),
    /// Every post.
    Explore,
    /// One author's posts.
    Author(i64),
}

// ?1 = viewer (nullable), ?2 = cursor (nullable), ?3 = limit, ?4 = scope user
const POST_SELECT: &str = "
    SELECT p.id, p.author_id, p.content, p.created_at,
           u.display_name, u.handle, u.avatar_url,
           (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS like_count,
           (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count,
           EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1) AS liked
    FROM posts p
    JOIN users u ON u.id = p.author_id";

impl Database {
    // -- Posts --

    pub fn insert_post(&self, author_id: i64, content: &str) -> Result<PostRow> {
        self.with_conn(|conn| {
            let id: i64 = conn.query_row(
                "INSERT INTO posts (author_id, content) VALUES (?1, ?2) RETURNING id",
                (author_id, content),
                |row| row.get(0),
            )?;
            query_post(conn, id, Some(author_id))?
                .ok_or_else(|| anyhow!("Post {} missing after insert", id))
        })
    }

    pub fn get_post(&self, id: i64, viewer: Option<i64>) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id, viewer))
    }

    /// One page of posts, newest first. With a cursor, only posts whose id is
    /// strictly below it are returned. `viewer` only drives the `liked` flag.
    pub fn feed_page(
        &self,
        scope: FeedScope,
        viewer: Option<i64>,
        cursor: Option<i64>,
        limit: u32,
    ) -> Result<Vec<PostRow>> {
        let (filter, scope_user) = match scope {
            FeedScope::Timeline(user_id) => (
                "(p.author_id = ?4
                  OR p.author_id IN (SELECT followee_id FROM follows WHERE follower_id = ?4))",
                Some(user_id),
            ),
            FeedScope::Explore => ("?4 IS NULL", None),
            FeedScope::Author(user_id) => ("p.author_id = ?4", Some(user_id)),
        };

        self.with_conn(|conn| {
            let sql = format!(
                "{POST_SELECT}
                 WHERE (?2 IS NULL OR p.id < ?2) AND {filter}
                 ORDER BY p.id DESC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;

            let rows = stmt
                .query_map(
                    rusqlite::params![viewer, cursor, limit, scope_user],
                    post_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Raw content of the most recent posts, newest first.
    pub fn recent_post_contents(&self, limit: u32) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT content FROM posts ORDER BY id DESC LIMIT ?1")?;
            let rows = stmt
                .query_map([limit], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_post(conn: &Connection, id: i64, viewer: Option<i64>) -> Result<Option<PostRow>> {
    let sql = format!("{POST_SELECT} WHERE p.id = ?2");
    let row = conn
        .query_row(&sql, rusqlite::params![viewer, id], post_from_row)
        .optional()?;
    Ok(row)
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        author_name: row.get(4)?,
        author_handle: row.get(5)?,
        author_avatar_url: row.get(6)?,
        like_count: row.get(7)?,
        comment_count: row.get(8)?,
        liked: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(db: &Database, email: &str) -> i64 {
        db.create_user(email, "hash", None).unwrap().unwrap().id
    }

    fn ids(rows: &[PostRow]) -> Vec<i64> {
        rows.iter().map(|r| r.id).collect()
    }

    #[test]
    fn timeline_covers_self_and_followees_only() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        let c = user(&db, "c@example.com");
        db.follow(b, a).unwrap();

        let pa = db.insert_post(a, "from a").unwrap().id;
        let pb = db.insert_post(b, "from b").unwrap().id;
        db.insert_post(c, "from c").unwrap();

        let page = db.feed_page(FeedScope::Timeline(b), Some(b), None, 20).unwrap();
        assert_eq!(ids(&page), vec![pb, pa]);

        let page = db.feed_page(FeedScope::Timeline(a), Some(a), None, 20).unwrap();
        assert_eq!(ids(&page), vec![pa]);
    }

    #[test]
    fn cursor_chain_matches_full_scan() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.com");
        for i in 0..47 {
            db.insert_post(a, &format!("post {i}")).unwrap();
        }

        let full = ids(&db.feed_page(FeedScope::Explore, None, None, 1000).unwrap());
        assert_eq!(full.len(), 47);

        let mut walked = Vec::new();
        let mut cursor = None;
        loop {
            let page = db.feed_page(FeedScope::Explore, None, cursor, 20).unwrap();
            walked.extend(ids(&page));
            if page.len() < 20 {
                break;
            }
            cursor = page.last().map(|p| p.id);
        }

        assert_eq!(walked, full);
        assert!(walked.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn aggregates_and_liked_flag() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        let post = db.insert_post(a, "hello").unwrap();
        assert_eq!((post.like_count, post.comment_count, post.liked), (0, 0, false));

        db.like_post(b, post.id).unwrap();
        db.like_post(b, post.id).unwrap();
        db.insert_comment(post.id, a, "first").unwrap();

        let seen_by_b = db.get_post(post.id, Some(b)).unwrap().unwrap();
        assert_eq!(seen_by_b.like_count, 1);
        assert_eq!(seen_by_b.comment_count, 1);
        assert!(seen_by_b.liked);

        let seen_by_a = db.get_post(post.id, Some(a)).unwrap().unwrap();
        assert!(!seen_by_a.liked);

        let anonymous = db.get_post(post.id, None).unwrap().unwrap();
        assert!(!anonymous.liked);
    }

    #[test]
    fn author_scope_and_recent_contents() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@example.com");
        let b = user(&db, "b@example.com");
        db.insert_post(a, "one").unwrap();
        db.insert_post(b, "two").unwrap();
        db.insert_post(a, "three").unwrap();

        let page = db.feed_page(FeedScope::Author(a), None, None, 20).unwrap();
        assert!(page.iter().all(|p| p.author_id == a));
        assert_eq!(page.len(), 2);

        assert_eq!(db.recent_post_contents(2).unwrap(), vec!["three", "two"]);
    }
}
