//! Storage row types. `UserRecord` is the only one that differs from the
//! public verser-types model: it still carries the password hash.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use verser_types::models::{MessageKind, User, UserStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Strip sensitive fields before the record leaves the server.
    pub fn into_public(self) -> User {
        User {
            id: self.id,
            username: self.username,
            email: self.email,
            display_name: self.display_name,
            avatar: self.avatar,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        record.into_public()
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: Option<String>,
    /// Already hashed.
    pub password: String,
    pub display_name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCommunity {
    pub name: String,
    pub description: Option<String>,
    pub creator_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: i64,
    pub conversation_id: i64,
    pub content: String,
    pub kind: MessageKind,
}

/// Parse a stored timestamp. Rows written by this crate are RFC 3339; rows
/// written by SQLite's `datetime('now')` are naive UTC.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_timestamps() {
        let a = parse_timestamp("2024-03-01T12:30:00+00:00");
        let b = parse_timestamp("2024-03-01 12:30:00");
        assert_eq!(a, b);
    }

    #[test]
    fn corrupt_timestamp_falls_back_to_epoch() {
        assert_eq!(parse_timestamp("yesterday"), DateTime::<Utc>::default());
    }

    #[test]
    fn public_projection_drops_password() {
        let record = UserRecord {
            id: 1,
            username: "ana".into(),
            email: None,
            password: "$argon2id$secret".into(),
            display_name: "Ana".into(),
            avatar: None,
            status: UserStatus::Offline,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(record.into_public()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "ana");
    }
}
