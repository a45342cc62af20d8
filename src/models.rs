use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated username driving a session.
pub type Identity = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub username: String,
}

// Variant order is the delivery chain; statuses only move forward
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,      // Stored by the server
    Delivered, // Delivered to recipient's device
    Seen,      // Read by recipient
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub from: Identity,
    pub to: Identity,
    pub content: String,
    pub status: DeliveryStatus,
    pub timestamp: String,
}

impl Message {
    /// Parse the backend timestamp.
    ///
    /// The server emits `datetime.isoformat()` of a naive UTC value
    /// (`2024-05-01T10:00:00.123456`), so both that and RFC 3339 with an
    /// explicit offset are accepted.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// True when `{from, to}` equals `{a, b}` as an unordered pair.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }

    /// The other side of the conversation as seen from `identity`.
    pub fn peer_of<'a>(&'a self, identity: &str) -> &'a str {
        if self.from == identity {
            &self.to
        } else {
            &self.from
        }
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// The only frame the client writes to the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingFrame {
    pub to: Identity,
    pub content: String,
}

/// Token pair issued by the backend on login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}
