//! The metadata index: one durable JSON document per submission, keyed by
//! record id. Status never changes except through [`FileIndex::transition`],
//! which performs a compare-and-swap over the serialized document so that
//! concurrent workers cannot apply out-of-order mutations.

use chrono::{DateTime, Utc};
use models::{FileRecord, NetworkKey, Status};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Fields that may be rewritten alongside a status transition. `error` and
/// `note` are replaced on every transition (None clears them); `available`
/// is only written when set, so completion provenance survives supersession.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub error: Option<String>,
    pub note: Option<String>,
    pub available: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct FileIndex {
    tree: sled::Tree,
    /// Advisory claims held by in-process workers, so that concurrently
    /// polling daemons never dispatch the same record twice.
    claims: Arc<Mutex<HashSet<Uuid>>>,
    /// Serializes the duplicate-hash check in `insert`.
    insert_lock: Arc<Mutex<()>>,
}

/// A claimed work item. The advisory claim is released when dropped.
pub struct Claim {
    pub record: FileRecord,
    claims: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.claims.lock().unwrap().remove(&self.record.id);
    }
}

impl FileIndex {
    pub fn new(tree: sled::Tree) -> Self {
        Self {
            tree,
            claims: Arc::new(Mutex::new(HashSet::new())),
            insert_lock: Arc::new(Mutex::new(())),
        }
    }

    fn key(id: Uuid) -> [u8; 16] {
        *id.as_bytes()
    }

    fn decode(raw: &[u8]) -> Result<FileRecord> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Insert a freshly staged record. Fails with `DuplicateActive` if an
    /// equal-hash record exists whose status is not Superseded, Deleted, or
    /// Rejected.
    pub fn insert(&self, record: &FileRecord) -> Result<()> {
        let _guard = self.insert_lock.lock().unwrap();
        let duplicate = self
            .records_by_hash(&record.hash)?
            .into_iter()
            .any(|other| other.status.is_live() && other.status != Status::Rejected);
        if duplicate {
            return Err(Error::DuplicateActive {
                hash: record.hash.clone(),
            });
        }
        self.tree
            .insert(Self::key(record.id), serde_json::to_vec(record)?)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<FileRecord> {
        let raw = self.tree.get(Self::key(id))?.ok_or(Error::NotFound(id))?;
        Self::decode(&raw)
    }

    pub fn all(&self) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        for entry in self.tree.iter() {
            let (_, raw) = entry?;
            records.push(Self::decode(&raw)?);
        }
        Ok(records)
    }

    pub fn records_by_hash(&self, hash: &str) -> Result<Vec<FileRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|record| record.hash == hash)
            .collect())
    }

    /// Most recently created record for the station, any status.
    pub fn find_latest(&self, network: &NetworkKey, station: &str) -> Result<Option<FileRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| r.network.same_identity(network) && r.station == station)
            .max_by_key(|r| r.created))
    }

    /// Full history of a station, newest first.
    pub fn list_station(&self, network: &NetworkKey, station: &str) -> Result<Vec<FileRecord>> {
        let mut records: Vec<FileRecord> = self
            .all()?
            .into_iter()
            .filter(|r| r.network.same_identity(network) && r.station == station)
            .collect();
        records.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(records)
    }

    /// All live records that share a station with `record`, excluding the
    /// record itself. Input to the supersession resolver.
    pub fn siblings_of(&self, record: &FileRecord) -> Result<Vec<FileRecord>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| {
                r.id != record.id
                    && r.network.same_identity(&record.network)
                    && r.station == record.station
                    && r.status.is_live()
            })
            .collect())
    }

    /// The most recently created record per station, optionally restricted
    /// to one network epoch.
    pub fn latest_per_station(&self, network: Option<&NetworkKey>) -> Result<Vec<FileRecord>> {
        let mut latest: HashMap<(String, DateTime<Utc>, String), FileRecord> = HashMap::new();
        for record in self.all()? {
            if let Some(network) = network {
                if !record.network.same_identity(network) {
                    continue;
                }
            }
            let key = (
                record.network.code.clone(),
                record.network.start,
                record.station.clone(),
            );
            match latest.get(&key) {
                Some(existing) if existing.created >= record.created => {}
                _ => {
                    latest.insert(key, record);
                }
            }
        }
        let mut records: Vec<FileRecord> = latest.into_values().collect();
        records.sort_by(|a, b| (&a.network.code, &a.station).cmp(&(&b.network.code, &b.station)));
        Ok(records)
    }

    /// For each station, the latest record that counts toward the published
    /// inventory. Input to the full merge pass.
    pub fn accepted_set(&self) -> Result<Vec<FileRecord>> {
        let mut latest: HashMap<(String, DateTime<Utc>, String), FileRecord> = HashMap::new();
        for record in self.all()? {
            if !record.status.is_published() {
                continue;
            }
            let key = (
                record.network.code.clone(),
                record.network.start,
                record.station.clone(),
            );
            match latest.get(&key) {
                Some(existing) if existing.created >= record.created => {}
                _ => {
                    latest.insert(key, record);
                }
            }
        }
        let mut records: Vec<FileRecord> = latest.into_values().collect();
        records.sort_by(|a, b| (&a.network.code, &a.station).cmp(&(&b.network.code, &b.station)));
        Ok(records)
    }

    /// Claim one record whose status is among `statuses`, preferring the
    /// oldest `modified`. The claim is advisory: it prevents other
    /// in-process workers from dispatching the same record until the
    /// returned guard drops.
    pub fn claim_next(&self, statuses: &[Status]) -> Result<Option<Claim>> {
        let mut candidates: Vec<FileRecord> = self
            .all()?
            .into_iter()
            .filter(|r| statuses.contains(&r.status))
            .collect();
        candidates.sort_by_key(|r| r.modified);

        let mut claims = self.claims.lock().unwrap();
        for record in candidates {
            if claims.insert(record.id) {
                return Ok(Some(Claim {
                    record,
                    claims: self.claims.clone(),
                }));
            }
        }
        Ok(None)
    }

    /// Conditionally move a record from `from` to `to`. Fails with
    /// `Conflict` when the record's current status is not `from`; the
    /// caller re-reads and re-dispatches.
    pub fn transition(
        &self,
        id: Uuid,
        from: Status,
        to: Status,
        fields: TransitionFields,
    ) -> Result<FileRecord> {
        loop {
            let raw = self.tree.get(Self::key(id))?.ok_or(Error::NotFound(id))?;
            let record = Self::decode(&raw)?;
            if record.status != from {
                return Err(Error::Conflict {
                    id,
                    expected: from,
                    actual: record.status,
                });
            }

            let mut next = record;
            next.status = to;
            next.modified = Utc::now();
            next.error = fields.error.clone();
            next.note = fields.note.clone();
            if let Some(available) = fields.available {
                next.available = Some(available);
            }

            let proposed = serde_json::to_vec(&next)?;
            match self
                .tree
                .compare_and_swap(Self::key(id), Some(&raw), Some(proposed))?
            {
                Ok(()) => {
                    tracing::debug!(%id, %from, %to, "transitioned record");
                    return Ok(next);
                }
                // Lost a write race; re-read and re-check the status.
                Err(_) => continue,
            }
        }
    }

    /// Remove the row entirely. Only records already in Deleted may be
    /// removed; purge transitions them there first.
    pub fn delete(&self, id: Uuid) -> Result<FileRecord> {
        let record = self.get(id)?;
        if record.status != Status::Deleted {
            return Err(Error::Conflict {
                id,
                expected: Status::Deleted,
                actual: record.status,
            });
        }
        self.tree.remove(Self::key(id))?;
        Ok(record)
    }
}
