use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod status;

pub use status::Status;

/// Identity and validity window of a seismic network, as declared by the
/// `Network` element of a StationXML document.
///
/// A network is identified by its `(code, start)` pair: the same two-letter
/// code is reused across epochs, and the start date disambiguates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkKey {
    pub code: String,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl NetworkKey {
    /// True when `other` names the same network epoch, ignoring `end`.
    pub fn same_identity(&self, other: &NetworkKey) -> bool {
        self.code == other.code && self.start == other.start
    }
}

impl std::fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code, self.start.format("%Y-%m-%d"))
    }
}

/// One submission of one station's metadata, as tracked by the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub network: NetworkKey,
    pub station: String,
    /// Hex SHA-256 of the canonicalized `Network` element.
    pub hash: String,
    /// Content-addressed path prefix within the blob store. Extensions
    /// (`.xml`, `.converted`) are implicit.
    pub path: String,
    pub channel_count: u32,
    pub size_bytes: u64,
    pub submitter: Uuid,
    pub status: Status,
    /// Textual reason, set when `status` is `Rejected`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Operational annotation, e.g. why a record was sent back to `Pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Set when the availability checker confirms publication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn new(
        network: NetworkKey,
        station: String,
        hash: String,
        path: String,
        channel_count: u32,
        size_bytes: u64,
        submitter: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            network,
            station,
            hash,
            path,
            channel_count,
            size_bytes,
            submitter,
            status: Status::Pending,
            error: None,
            note: None,
            created: now,
            modified: now,
            available: None,
        }
    }
}

/// The authoritative header-level definition of a network.
///
/// Submissions are checked against the active prototype of their network:
/// the declared validity window end and the restricted-access flag must
/// agree, or the submission is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prototype {
    pub network: NetworkKey,
    pub restricted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hex SHA-256 of the canonicalized `Network` element.
    pub hash: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
}

/// A registered submitter. Operators are bound to a single network epoch;
/// administrators may submit and retire metadata for any network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Hex SHA-256 of `salt + password`.
    pub digest: String,
    pub salt: String,
    pub role: Role,
    /// `(code, start)` of the bound network epoch, for operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype: Option<(String, DateTime<Utc>)>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub created: DateTime<Utc>,
}

/// An internal inbox message, used to notify administrators of submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub recipient: Uuid,
    pub sender: Uuid,
    pub subject: String,
    pub body: String,
    pub created: DateTime<Utc>,
    pub read: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn network_identity_ignores_end() {
        let start = "2020-01-01T00:00:00Z".parse().unwrap();
        let a = NetworkKey {
            code: "XX".to_string(),
            start,
            end: None,
        };
        let b = NetworkKey {
            code: "XX".to_string(),
            start,
            end: Some("2030-01-01T00:00:00Z".parse().unwrap()),
        };
        assert!(a.same_identity(&b));

        let c = NetworkKey {
            code: "YY".to_string(),
            start,
            end: None,
        };
        assert!(!a.same_identity(&c));
    }

    #[test]
    fn file_record_serde_round_trip() {
        let record = FileRecord::new(
            NetworkKey {
                code: "XX".to_string(),
                start: "2020-01-01T00:00:00Z".parse().unwrap(),
                end: None,
            },
            "STA01".to_string(),
            "ab".repeat(32),
            "XX/STA01/abab".to_string(),
            3,
            1024,
            Uuid::new_v4(),
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.status, Status::Pending);
        assert!(json.contains("\"status\":1"));
    }
}
