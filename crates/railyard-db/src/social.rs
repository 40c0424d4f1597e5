use crate::models::CommentRow;
use crate::{Database, is_foreign_key_violation};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row};

const COMMENT_SELECT: &str = "
    SELECT c.id, c.post_id, c.author_id, u.display_name, u.handle, c.content, c.created_at
    FROM comments c
    JOIN users u ON u.id = c.author_id";

impl Database {
    // -- Likes --

    /// Idempotent like. Returns `false` if the post does not exist.
    pub fn like_post(&self, user_id: i64, post_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            match conn.execute(
                "INSERT OR IGNORE INTO likes (user_id, post_id) VALUES (?1, ?2)",
                (user_id, post_id),
            ) {
                Ok(_) => Ok(true),
                Err(e) if is_foreign_key_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Removing a like that was never there is a no-op.
    pub fn unlike_post(&self, user_id: i64, post_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND post_id = ?2",
                (user_id, post_id),
            )?;
            Ok(())
        })
    }

    // -- Follows --

    /// Idempotent follow. Returns `false` if the followee does not exist.
    pub fn follow(&self, follower_id: i64, followee_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            match conn.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
                (follower_id, followee_id),
            ) {
                Ok(_) => Ok(true),
                Err(e) if is_foreign_key_violation(&e) => Ok(false),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn unfollow(&self, follower_id: i64, followee_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                (follower_id, followee_id),
            )?;
            Ok(())
        })
    }

    // -- Comments --

    /// Returns `None` if the post does not exist.
    pub fn insert_comment(
        &self,
        post_id: i64,
        author_id: i64,
        content: &str,
    ) -> Result<Option<CommentRow>> {
        self.with_conn(|conn| {
            let inserted = conn.query_row(
                "INSERT INTO comments (post_id, author_id, content) VALUES (?1, ?2, ?3)
                 RETURNING id",
                (post_id, author_id, content),
                |row| row.get::<_, i64>(0),
            );
            let id = match inserted {
                Ok(id) => id,
                Err(e) if is_foreign_key_violation(&e) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            query_comment(conn, id)?
                .map(Some)
                .ok_or_else(|| anyhow!("Comment {} missing after insert", id))
        })
    }

    /// Latest comments on a post, newest first.
    pub fn list_comments(&self, post_id: i64, limit: u32) -> Result<Vec<CommentRow>> {
        self.with_conn(|conn| {
            let sql = format!("{COMMENT_SELECT} WHERE c.post_id = ?1 ORDER BY c.id DESC LIMIT ?2");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map((post_id, limit), comment_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_comment(conn: &Connection, id: i64) -> Result<Option<CommentRow>> {
    let sql = format!("{COMMENT_SELECT} WHERE c.id = ?1");
    let row = conn.query_row(&sql, [id], comment_from_row).optional()?;
    Ok(row)
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRow> {
    Ok(CommentRow {
        id: row.get(0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        author_handle: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user("a@example.com", "h", Some("A")).unwrap().unwrap().id;
        let b = db.create_user("b@example.com", "h", Some("B")).unwrap().unwrap().id;
        (db, a, b)
    }

    #[test]
    fn likes_are_idempotent_both_ways() {
        let (db, a, b) = setup();
        let post = db.insert_post(a, "hi").unwrap().id;

        assert!(db.like_post(b, post).unwrap());
        assert!(db.like_post(b, post).unwrap());
        assert_eq!(db.get_post(post, None).unwrap().unwrap().like_count, 1);

        db.unlike_post(b, post).unwrap();
        db.unlike_post(b, post).unwrap();
        assert_eq!(db.get_post(post, None).unwrap().unwrap().like_count, 0);
    }

    #[test]
    fn liking_missing_post_is_reported() {
        let (db, _a, b) = setup();
        assert!(!db.like_post(b, 12345).unwrap());
    }

    #[test]
    fn follows_are_idempotent_and_checked() {
        let (db, a, b) = setup();
        assert!(db.follow(a, b).unwrap());
        assert!(db.follow(a, b).unwrap());
        assert_eq!(db.get_profile(b).unwrap().unwrap().followers, 1);
        assert_eq!(db.get_profile(a).unwrap().unwrap().following, 1);

        assert!(!db.follow(a, 999).unwrap());

        db.unfollow(a, b).unwrap();
        db.unfollow(a, b).unwrap();
        assert_eq!(db.get_profile(b).unwrap().unwrap().followers, 0);
    }

    #[test]
    fn comments_carry_author_and_list_newest_first() {
        let (db, a, b) = setup();
        let post = db.insert_post(a, "hi").unwrap().id;

        let first = db.insert_comment(post, b, "nice").unwrap().unwrap();
        assert_eq!(first.author_name.as_deref(), Some("B"));
        let second = db.insert_comment(post, a, "thanks").unwrap().unwrap();

        let listed: Vec<i64> = db.list_comments(post, 50).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(listed, vec![second.id, first.id]);

        assert!(db.insert_comment(777, a, "void").unwrap().is_none());
    }
}
