use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::FromRow;

/// One persisted chat message.
///
/// `id` and `timestamp` are assigned by the store in the same statement, so a
/// lower `id` never carries a later `timestamp`. Records are never updated.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Message {
    pub id: i64,
    pub username: String,
    #[sqlx(rename = "message")]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Session the message was sent in, `None` for the global scope
    pub session_id: Option<String>,
}

impl Message {
    /// Timestamp as RFC 3339 with millisecond precision and a `Z` suffix.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Transcript line used in prompts.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.username, self.text)
    }
}
