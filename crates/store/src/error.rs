use models::Status;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage I/O failure")]
    Io(#[from] std::io::Error),
    #[error("index database failure")]
    Db(#[from] sled::Error),
    #[error("stored document is not valid JSON")]
    Json(#[from] serde_json::Error),
    /// The optimistic status check failed: the record moved underneath us.
    #[error("record {id} is not {expected}, found {actual}")]
    Conflict {
        id: Uuid,
        expected: Status,
        actual: Status,
    },
    /// An equal-hash record already occupies the station's live slot.
    #[error("an active record with hash {hash} already exists")]
    DuplicateActive { hash: String },
    #[error("no record with id {0}")]
    NotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, Error>;
