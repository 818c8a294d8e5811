//! Retirement of prior submissions once a newer one reaches Accepted.
//!
//! Records that were never public carry no provenance debt and are moved to
//! Deleted; a Completed record was served by the public webservice and is
//! kept as Superseded history instead.

use models::{FileRecord, Status};
use store::FileIndex;
use uuid::Uuid;

/// Retire every live sibling of `record` (same network epoch and station).
/// Returns what was retired to which state. Each step is an independent
/// conditional transition, so partial progress under a crash or a racing
/// resolver is safe to re-run.
pub fn supersede_station(
    index: &FileIndex,
    record: &FileRecord,
) -> store::Result<Vec<(Uuid, Status)>> {
    let mut retired = Vec::new();
    for sibling in index.siblings_of(record)? {
        if let Some(target) = retire(index, &sibling)? {
            retired.push((sibling.id, target));
        }
    }
    if !retired.is_empty() {
        tracing::info!(
            network = %record.network,
            station = %record.station,
            count = retired.len(),
            "retired prior submissions"
        );
    }
    Ok(retired)
}

/// Classify and retire a single record. Returns the state it was moved to,
/// or None when it needed no action (already historical, or a concurrent
/// resolver got there first).
pub fn retire(index: &FileIndex, record: &FileRecord) -> store::Result<Option<Status>> {
    let target = match record.status {
        Status::Completed => Status::Superseded,
        Status::Rejected
        | Status::Pending
        | Status::Validated
        | Status::Converted
        | Status::Accepted => Status::Deleted,
        Status::Superseded | Status::Deleted | Status::Unchanged => return Ok(None),
    };
    match index.transition(record.id, record.status, target, Default::default()) {
        Ok(_) => Ok(Some(target)),
        Err(store::Error::Conflict { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::NetworkKey;

    fn index() -> FileIndex {
        store::Store::ephemeral().unwrap().files
    }

    fn record(station: &str, hash: &str, status: Status) -> FileRecord {
        let mut record = FileRecord::new(
            NetworkKey {
                code: "XX".to_string(),
                start: "2020-01-01T00:00:00Z".parse().unwrap(),
                end: None,
            },
            station.to_string(),
            hash.to_string(),
            format!("XX/{station}/{hash}"),
            3,
            10,
            Uuid::new_v4(),
        );
        record.status = status;
        record
    }

    #[test]
    fn completed_records_become_superseded_others_deleted() {
        let index = index();
        let completed = record("STA01", "h1", Status::Completed);
        let rejected = record("STA01", "h2", Status::Rejected);
        let winner = record("STA01", "h3", Status::Accepted);
        let unrelated = record("STA02", "h4", Status::Completed);
        for r in [&completed, &rejected, &winner, &unrelated] {
            index.insert(r).unwrap();
        }

        let retired = supersede_station(&index, &winner).unwrap();
        assert_eq!(retired.len(), 2);

        assert_eq!(index.get(completed.id).unwrap().status, Status::Superseded);
        assert_eq!(index.get(rejected.id).unwrap().status, Status::Deleted);
        assert_eq!(index.get(winner.id).unwrap().status, Status::Accepted);
        assert_eq!(index.get(unrelated.id).unwrap().status, Status::Completed);
    }

    #[test]
    fn retirement_is_idempotent() {
        let index = index();
        let completed = record("STA01", "h1", Status::Completed);
        let winner = record("STA01", "h2", Status::Accepted);
        index.insert(&completed).unwrap();
        index.insert(&winner).unwrap();

        supersede_station(&index, &winner).unwrap();
        // A second pass finds nothing live to retire.
        assert!(supersede_station(&index, &winner).unwrap().is_empty());
        assert_eq!(index.get(completed.id).unwrap().status, Status::Superseded);
    }
}
