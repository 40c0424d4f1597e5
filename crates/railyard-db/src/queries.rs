use crate::models::{ProfileRow, SuggestionRow, UserRow};
use crate::{Database, is_unique_violation};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row};

const USER_COLUMNS: &str = "id, email, password, display_name, handle, bio, avatar_url, \
                            banner_url, current_token, created_at, updated_at";

/// Editable profile columns, already validated and merged with the stored row.
#[derive(Debug, Clone, Default)]
pub struct ProfileFields {
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub banner_url: Option<String>,
}

#[derive(Debug)]
pub enum ProfileUpdate {
    Updated(UserRow),
    HandleTaken,
    NotFound,
}

impl Database {
    // -- Users --

    /// Insert a new account. Returns `None` when the email is already registered.
    pub fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        display_name: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "INSERT INTO users (email, password, display_name) VALUES (?1, ?2, ?3)
                 RETURNING {USER_COLUMNS}"
            );
            match conn.query_row(&sql, (email, password_hash, display_name), user_from_row) {
                Ok(row) => Ok(Some(row)),
                Err(e) if is_unique_violation(&e) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", &email))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id))
    }

    pub fn get_user_by_handle(&self, handle: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "handle", &handle))
    }

    /// The stored session token for a user. Outer `None` means no such user;
    /// inner `None` means no token has been recorded.
    pub fn get_current_token(&self, user_id: i64) -> Result<Option<Option<String>>> {
        self.with_conn(|conn| {
            let token = conn
                .query_row(
                    "SELECT current_token FROM users WHERE id = ?1",
                    [user_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok(token)
        })
    }

    /// Record the latest issued token, revoking whatever was there before.
    pub fn set_current_token(&self, user_id: i64, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET current_token = ?1 WHERE id = ?2",
                (token, user_id),
            )?;
            Ok(())
        })
    }

    /// Overwrite the editable profile columns. Handle collisions are detected
    /// from the UNIQUE constraint on write.
    pub fn update_profile(&self, user_id: i64, fields: &ProfileFields) -> Result<ProfileUpdate> {
        self.with_conn(|conn| {
            let sql = format!(
                "UPDATE users
                 SET handle = ?1, display_name = ?2, bio = ?3, avatar_url = ?4, banner_url = ?5,
                     updated_at = datetime('now')
                 WHERE id = ?6
                 RETURNING {USER_COLUMNS}"
            );
            let result = conn
                .query_row(
                    &sql,
                    rusqlite::params![
                        fields.handle,
                        fields.display_name,
                        fields.bio,
                        fields.avatar_url,
                        fields.banner_url,
                        user_id,
                    ],
                    user_from_row,
                )
                .optional();

            match result {
                Ok(Some(row)) => Ok(ProfileUpdate::Updated(row)),
                Ok(None) => Ok(ProfileUpdate::NotFound),
                Err(e) if is_unique_violation(&e) => Ok(ProfileUpdate::HandleTaken),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_profile(&self, user_id: i64) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS},
                    (SELECT COUNT(*) FROM follows f WHERE f.followee_id = users.id),
                    (SELECT COUNT(*) FROM follows f WHERE f.follower_id = users.id),
                    (SELECT COUNT(*) FROM posts p WHERE p.author_id = users.id)
                 FROM users WHERE id = ?1"
            );
            let row = conn
                .query_row(&sql, [user_id], |row| {
                    Ok(ProfileRow {
                        user: user_from_row(row)?,
                        followers: row.get(11)?,
                        following: row.get(12)?,
                        posts: row.get(13)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// Find-or-create an account that never logs in interactively.
    /// Safe to race: the insert is a no-op when the row already exists.
    pub fn ensure_system_user(
        &self,
        email: &str,
        handle: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (email, password, display_name, handle)
                 VALUES (?1, ?2, ?3, ?4)",
                (email, password_hash, display_name, handle),
            )?;
            query_user(conn, "handle", &handle)?
                .ok_or_else(|| anyhow!("System account '{}' missing after insert", handle))
        })
    }

    // -- Recommendations --

    /// Accounts worth following, most-followed first, newer accounts winning
    /// ties. With a viewer, the viewer and accounts they already follow are
    /// left out.
    pub fn who_to_follow(
        &self,
        viewer: Option<i64>,
        reserved_handle: &str,
        limit: u32,
    ) -> Result<Vec<SuggestionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.display_name, u.handle,
                        (SELECT COUNT(*) FROM follows f WHERE f.followee_id = u.id) AS followers
                 FROM users u
                 WHERE (u.handle IS NULL OR u.handle <> ?1)
                   AND (?2 IS NULL OR (
                        u.id <> ?2
                        AND u.id NOT IN (SELECT followee_id FROM follows WHERE follower_id = ?2)))
                 ORDER BY followers DESC, u.id DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![reserved_handle, viewer, limit], |row| {
                    Ok(SuggestionRow {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        handle: row.get(2)?,
                        followers: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(
    conn: &Connection,
    column: &str,
    value: &dyn rusqlite::types::ToSql,
) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], user_from_row).optional()?;

    Ok(row)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        display_name: row.get(3)?,
        handle: row.get(4)?,
        bio: row.get(5)?,
        avatar_url: row.get(6)?,
        banner_url: row.get(7)?,
        current_token: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn duplicate_email_is_reported_not_raised() {
        let db = db();
        let first = db.create_user("a@example.com", "hash", Some("A")).unwrap();
        assert!(first.is_some());
        let second = db.create_user("a@example.com", "hash", None).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn current_token_round_trip() {
        let db = db();
        let user = db.create_user("a@example.com", "hash", None).unwrap().unwrap();
        assert_eq!(db.get_current_token(user.id).unwrap(), Some(None));

        db.set_current_token(user.id, "t1").unwrap();
        db.set_current_token(user.id, "t2").unwrap();
        assert_eq!(db.get_current_token(user.id).unwrap(), Some(Some("t2".into())));

        assert_eq!(db.get_current_token(999).unwrap(), None);
    }

    #[test]
    fn handle_collision_detected_on_write() {
        let db = db();
        let a = db.create_user("a@example.com", "hash", None).unwrap().unwrap();
        let b = db.create_user("b@example.com", "hash", None).unwrap().unwrap();

        let fields = ProfileFields {
            handle: Some("steam".into()),
            ..Default::default()
        };
        assert!(matches!(db.update_profile(a.id, &fields).unwrap(), ProfileUpdate::Updated(_)));
        assert!(matches!(db.update_profile(b.id, &fields).unwrap(), ProfileUpdate::HandleTaken));
        assert!(matches!(db.update_profile(404, &fields).unwrap(), ProfileUpdate::NotFound));
    }

    #[test]
    fn system_user_is_a_singleton() {
        let db = db();
        let first = db.ensure_system_user("ai@railyard.local", "ai", "AI", "h1").unwrap();
        let second = db.ensure_system_user("ai@railyard.local", "ai", "AI", "h2").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.password, "h1");
    }

    #[test]
    fn who_to_follow_orders_and_filters() {
        let db = db();
        let viewer = db.create_user("v@example.com", "h", None).unwrap().unwrap();
        let popular = db.create_user("p@example.com", "h", None).unwrap().unwrap();
        let quiet_old = db.create_user("q@example.com", "h", None).unwrap().unwrap();
        let quiet_new = db.create_user("n@example.com", "h", None).unwrap().unwrap();
        let followed = db.create_user("f@example.com", "h", None).unwrap().unwrap();
        db.ensure_system_user("ai@railyard.local", "ai", "AI", "h").unwrap();

        db.follow(quiet_old.id, popular.id).unwrap();
        db.follow(viewer.id, followed.id).unwrap();

        let ids: Vec<i64> = db
            .who_to_follow(Some(viewer.id), "ai", 5)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![popular.id, quiet_new.id, quiet_old.id]);

        let anonymous: Vec<i64> = db
            .who_to_follow(None, "ai", 5)
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(
            anonymous,
            vec![followed.id, popular.id, quiet_new.id, quiet_old.id, viewer.id]
        );
    }
}
