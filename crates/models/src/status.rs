use serde::{Deserialize, Serialize};

/// Lifecycle status of a submitted metadata document.
///
/// The integer codes are stable: they are persisted in the index and exposed
/// on the wire to UI clients, so they must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Status {
    /// Retired after a newer document for the same station was published.
    /// Kept for provenance because this document was itself public once.
    Superseded,
    /// Retired without ever having been published. Eligible for purge.
    Deleted,
    /// Failed validation, conversion, or merging. Terminal, with a reason.
    Rejected,
    /// Wire-only marker for "no change"; never stored in the index.
    Unchanged,
    /// Staged by the submission API, awaiting validation.
    Pending,
    /// Passed schema and business-rule validation.
    Validated,
    /// Converted to the external tool's internal form.
    Converted,
    /// Merged into the inventory; eligible to appear in the published set.
    Accepted,
    /// Confirmed visible on the public query webservice.
    Completed,
}

impl Status {
    pub fn code(self) -> i8 {
        match self {
            Status::Superseded => -3,
            Status::Deleted => -2,
            Status::Rejected => -1,
            Status::Unchanged => 0,
            Status::Pending => 1,
            Status::Validated => 2,
            Status::Converted => 3,
            Status::Accepted => 4,
            Status::Completed => 5,
        }
    }

    /// Statuses on the forward path which the lifecycle daemon dispatches on.
    pub const WORKABLE: [Status; 3] = [Status::Pending, Status::Validated, Status::Converted];

    /// A record is live while it still occupies its station's in-flight or
    /// published slot. Superseded and Deleted records are historical.
    pub fn is_live(self) -> bool {
        !matches!(self, Status::Superseded | Status::Deleted)
    }

    /// True when no further forward transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Superseded | Status::Deleted | Status::Rejected | Status::Completed
        )
    }

    /// True for records which count toward the published inventory.
    pub fn is_published(self) -> bool {
        matches!(self, Status::Accepted | Status::Completed)
    }
}

impl TryFrom<i8> for Status {
    type Error = String;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            -3 => Ok(Status::Superseded),
            -2 => Ok(Status::Deleted),
            -1 => Ok(Status::Rejected),
            0 => Ok(Status::Unchanged),
            1 => Ok(Status::Pending),
            2 => Ok(Status::Validated),
            3 => Ok(Status::Converted),
            4 => Ok(Status::Accepted),
            5 => Ok(Status::Completed),
            code => Err(format!("invalid status code {code}")),
        }
    }
}

impl From<Status> for i8 {
    fn from(status: Status) -> i8 {
        status.code()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Superseded => "SUPERSEDED",
            Status::Deleted => "DELETED",
            Status::Rejected => "REJECTED",
            Status::Unchanged => "UNCHANGED",
            Status::Pending => "PENDING",
            Status::Validated => "VALIDATED",
            Status::Converted => "CONVERTED",
            Status::Accepted => "ACCEPTED",
            Status::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn codes_round_trip() {
        for code in -3i8..=5 {
            let status = Status::try_from(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(Status::try_from(6).is_err());
        assert!(Status::try_from(-4).is_err());
    }

    #[test]
    fn serializes_as_integer() {
        assert_eq!(serde_json::to_string(&Status::Superseded).unwrap(), "-3");
        assert_eq!(serde_json::to_string(&Status::Completed).unwrap(), "5");
        assert_eq!(
            serde_json::from_str::<Status>("4").unwrap(),
            Status::Accepted
        );
    }

    #[test]
    fn liveness() {
        assert!(Status::Pending.is_live());
        assert!(Status::Rejected.is_live());
        assert!(!Status::Superseded.is_live());
        assert!(!Status::Deleted.is_live());
        assert!(Status::Completed.is_terminal());
        assert!(!Status::Accepted.is_terminal());
    }
}
