//! Durable state of the curation pipeline: a content-addressed blob store
//! on disk, and an embedded document database holding the metadata index,
//! the prototype registry, and account collections.

mod accounts;
mod blobs;
mod error;
mod index;
mod prototypes;

pub use accounts::Accounts;
pub use blobs::{write_atomic, BlobStore, CONVERTED_EXT, SOURCE_EXT};
pub use error::{Error, Result};
pub use index::{Claim, FileIndex, TransitionFields};
pub use prototypes::{Ingest, PrototypeRegistry};

use std::path::Path;

/// All collections, opened over one embedded database.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    pub files: FileIndex,
    pub prototypes: PrototypeRegistry,
    pub accounts: Accounts,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// An in-memory store for tests; dropped with the process.
    pub fn ephemeral() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let files = FileIndex::new(db.open_tree("files")?);
        let prototypes = PrototypeRegistry::new(db.open_tree("prototypes")?);
        let accounts = Accounts::new(
            db.open_tree("users")?,
            db.open_tree("sessions")?,
            db.open_tree("messages")?,
        );
        Ok(Self {
            db,
            files,
            prototypes,
            accounts,
        })
    }

    /// Flush dirty pages to disk. Called on shutdown.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
