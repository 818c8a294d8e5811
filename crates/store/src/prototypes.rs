//! The network prototype registry. At most one prototype is *active* per
//! `(code, start)` epoch; older ones stay queryable for audit.

use chrono::{DateTime, Utc};
use models::{NetworkKey, Prototype};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::index::{FileIndex, TransitionFields};
use models::Status;

#[derive(Clone)]
pub struct PrototypeRegistry {
    tree: sled::Tree,
}

/// Outcome of an ingest: the stored prototype, and whether this call
/// created it. Re-ingesting a known hash is a no-op.
#[derive(Debug)]
pub struct Ingest {
    pub prototype: Prototype,
    pub created: bool,
}

impl PrototypeRegistry {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    pub fn ingest(
        &self,
        network: NetworkKey,
        restricted: bool,
        description: Option<String>,
        hash: String,
    ) -> Result<Ingest> {
        if let Some(raw) = self.tree.get(hash.as_bytes())? {
            return Ok(Ingest {
                prototype: serde_json::from_slice(&raw)?,
                created: false,
            });
        }
        let prototype = Prototype {
            network,
            restricted,
            description,
            hash: hash.clone(),
            created: Utc::now(),
        };
        self.tree
            .insert(hash.as_bytes(), serde_json::to_vec(&prototype)?)?;
        tracing::info!(network = %prototype.network, %hash, "registered network prototype");
        Ok(Ingest {
            prototype,
            created: true,
        })
    }

    pub fn all(&self) -> Result<Vec<Prototype>> {
        let mut prototypes = Vec::new();
        for entry in self.tree.iter() {
            let (_, raw) = entry?;
            prototypes.push(serde_json::from_slice::<Prototype>(&raw)?);
        }
        Ok(prototypes)
    }

    /// The newest prototype for the given network epoch.
    pub fn active(&self, code: &str, start: DateTime<Utc>) -> Result<Option<Prototype>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|p| p.network.code == code && p.network.start == start)
            .max_by_key(|p| p.created))
    }

    /// A new prototype supersedes the compatibility assumptions of already
    /// published records: every station of `network` whose latest record is
    /// Accepted or Completed is sent back to Pending for re-validation.
    /// Returns the ids of the records that were reset.
    pub fn reconcile(&self, network: &NetworkKey, index: &FileIndex) -> Result<Vec<Uuid>> {
        let mut reset = Vec::new();
        for record in index.latest_per_station(Some(network))? {
            if !record.status.is_published() {
                continue;
            }
            let fields = TransitionFields {
                note: Some("re-validation forced by new network prototype".to_string()),
                ..Default::default()
            };
            match index.transition(record.id, record.status, Status::Pending, fields) {
                Ok(_) => reset.push(record.id),
                // Someone else moved it; the daemon will deal with it.
                Err(Error::Conflict { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(reset)
    }
}
