use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use verser_types::models::{ChatMessage, Community, Membership, Role, UserStatus};

use crate::Database;
use crate::models::{NewCommunity, NewMessage, NewUser, UserRecord, parse_timestamp};
use crate::store::{CommunityStore, MembershipStore, MessageStore, UserStore, UsernameTaken};

const USER_COLUMNS: &str =
    "id, username, email, password, display_name, avatar, status, created_at";
const COMMUNITY_COLUMNS: &str = "id, name, description, creator_id, created_at";
const MEMBERSHIP_COLUMNS: &str = "id, user_id, community_id, role, joined_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, user_id, content, type, created_at";

// -- Users --

impl UserStore for Database {
    fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let created_at = Utc::now();
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (username, email, password, display_name, avatar, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.username,
                    user.email,
                    user.password,
                    user.display_name,
                    user.avatar,
                    UserStatus::Offline.as_str(),
                    created_at.to_rfc3339(),
                ],
            );
            match inserted {
                // Lost a race with a concurrent registration of the same name
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    return Err(UsernameTaken(user.username).into());
                }
                other => other?,
            };

            Ok(UserRecord {
                id: conn.last_insert_rowid(),
                username: user.username,
                email: user.email,
                password: user.password,
                display_name: user.display_name,
                avatar: user.avatar,
                status: UserStatus::Offline,
                created_at,
            })
        })
    }

    fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    fn update_user_status(&self, id: i64, status: UserStatus) -> Result<Option<UserRecord>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, "id = ?1", id)
        })
    }
}

// -- Messages --

impl MessageStore for Database {
    fn create_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let created_at = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, user_id, content, type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.conversation_id,
                    message.user_id,
                    message.content,
                    message.kind.as_str(),
                    created_at.to_rfc3339(),
                ],
            )?;

            Ok(ChatMessage {
                id: conn.last_insert_rowid(),
                conversation_id: message.conversation_id,
                user_id: message.user_id,
                content: message.content,
                kind: message.kind,
                created_at,
            })
        })
    }

    fn list_messages(
        &self,
        conversation_id: i64,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1 AND (?2 IS NULL OR id < ?2)
                 ORDER BY id DESC
                 LIMIT ?3"
            ))?;

            let mut rows = stmt
                .query_map(rusqlite::params![conversation_id, before, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Newest page first from SQL, oldest first to callers
            rows.reverse();
            Ok(rows)
        })
    }
}

// -- Communities --

impl CommunityStore for Database {
    fn create_community(&self, community: NewCommunity) -> Result<Community> {
        let created_at = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO communities (name, description, creator_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    community.name,
                    community.description,
                    community.creator_id,
                    created_at.to_rfc3339(),
                ],
            )?;

            Ok(Community {
                id: conn.last_insert_rowid(),
                name: community.name,
                description: community.description,
                creator_id: community.creator_id,
                created_at,
            })
        })
    }

    fn get_community(&self, id: i64) -> Result<Option<Community>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COMMUNITY_COLUMNS} FROM communities WHERE id = ?1"),
                [id],
                community_from_row,
            )
            .optional()
        })
    }

    fn list_communities(&self) -> Result<Vec<Community>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COMMUNITY_COLUMNS} FROM communities ORDER BY id"))?;
            let rows = stmt
                .query_map([], community_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn delete_community(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM community_members WHERE community_id = ?1", [id])?;
            let deleted = tx.execute("DELETE FROM communities WHERE id = ?1", [id])?;
            tx.commit()?;
            Ok(deleted > 0)
        })
    }
}

// -- Memberships --

impl MembershipStore for Database {
    fn join(&self, user_id: i64, community_id: i64, role: Role) -> Result<Membership> {
        let joined_at = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO community_members (user_id, community_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, community_id, role.as_str(), joined_at.to_rfc3339()],
            )?;

            Ok(Membership {
                id: conn.last_insert_rowid(),
                user_id,
                community_id,
                role,
                joined_at,
            })
        })
    }

    fn leave(&self, user_id: i64, community_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM community_members WHERE user_id = ?1 AND community_id = ?2",
                [user_id, community_id],
            )?;
            Ok(deleted > 0)
        })
    }

    fn is_member(&self, user_id: i64, community_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM community_members WHERE user_id = ?1 AND community_id = ?2)",
                [user_id, community_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    fn get_role(&self, user_id: i64, community_id: i64) -> Result<Option<Role>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM community_members
                 WHERE user_id = ?1 AND community_id = ?2
                 ORDER BY id LIMIT 1",
                [user_id, community_id],
                |row| parse_column::<Role>(row, 0),
            )
            .optional()
        })
    }

    fn list_members(&self, community_id: i64) -> Result<Vec<UserRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id IN (SELECT user_id FROM community_members WHERE community_id = ?1)
                 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([community_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn list_memberships(&self, community_id: i64) -> Result<Vec<Membership>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MEMBERSHIP_COLUMNS} FROM community_members WHERE community_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([community_id], membership_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn list_communities_for_user(&self, user_id: i64) -> Result<Vec<Community>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COMMUNITY_COLUMNS} FROM communities
                 WHERE id IN (SELECT community_id FROM community_members WHERE user_id = ?1)
                 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([user_id], community_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn update_role(
        &self,
        user_id: i64,
        community_id: i64,
        role: Role,
    ) -> Result<Option<Membership>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE community_members SET role = ?1 WHERE user_id = ?2 AND community_id = ?3",
                rusqlite::params![role.as_str(), user_id, community_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            conn.query_row(
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM community_members
                     WHERE user_id = ?1 AND community_id = ?2
                     ORDER BY id LIMIT 1"
                ),
                [user_id, community_id],
                membership_from_row,
            )
            .optional()
        })
    }
}

fn query_user<P: rusqlite::ToSql>(
    conn: &Connection,
    predicate: &str,
    value: P,
) -> Result<Option<UserRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}"))?;
    stmt.query_row([value], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        display_name: row.get(4)?,
        avatar: row.get(5)?,
        status: parse_column(row, 6)?,
        created_at: parse_timestamp(&row.get::<_, String>(7)?),
    })
}

fn community_from_row(row: &Row<'_>) -> rusqlite::Result<Community> {
    Ok(Community {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        creator_id: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
    })
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: row.get(0)?,
        user_id: row.get(1)?,
        community_id: row.get(2)?,
        role: parse_column(row, 3)?,
        joined_at: parse_timestamp(&row.get::<_, String>(4)?),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        kind: parse_column(row, 4)?,
        created_at: parse_timestamp(&row.get::<_, String>(5)?),
    })
}

/// Read a TEXT column into one of the verser-types enums.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
