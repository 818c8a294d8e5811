//! The lifecycle daemon: claims staged records one at a time and moves each
//! through validate → convert → merge → accept, plus purging of retired
//! rows. Heavy work (subprocess invocation, derived-artifact writes) is
//! serialized through this single logical worker; all status mutation goes
//! through the index's conditional transition, so additional workers are
//! safe but never required.

use futures::FutureExt;
use models::{FileRecord, Prototype, Status};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use store::{BlobStore, Store, TransitionFields, CONVERTED_EXT, SOURCE_EXT};
use tracing::Instrument;

use crate::authz::AuthError;
use crate::executor::{Error as ExecError, Executor};
use crate::supersede;
use crate::Config;

#[derive(Debug, PartialEq)]
pub enum Step {
    Worked,
    Idle,
}

pub struct Daemon {
    store: Store,
    blobs: BlobStore,
    executor: Option<Executor>,
    config: Config,
    /// Fingerprint of the accepted set behind the last successful full
    /// merge, so idle cycles do not rebuild an unchanged inventory.
    last_inventory: Option<u64>,
}

impl Daemon {
    pub fn new(store: Store, blobs: BlobStore, config: Config) -> Self {
        Self {
            store,
            blobs,
            executor: config.executor(),
            config,
            last_inventory: None,
        }
    }

    /// The cooperative loop: work until idle, then run a full merge pass
    /// and sleep one poll interval. Transient failures are logged and
    /// retried on the next cycle; they never stop the daemon.
    pub async fn run<E>(mut self, exit: E) -> anyhow::Result<()>
    where
        E: std::future::Future<Output = ()> + Send,
    {
        tokio::pin!(exit);
        loop {
            if (&mut exit).now_or_never().is_some() {
                tracing::info!("caught signal; exiting...");
                return Ok(());
            }

            match self.step().await {
                Ok(Step::Worked) => continue,
                Ok(Step::Idle) => {
                    if let Err(err) = self.full_merge().await {
                        tracing::error!(error = ?err, "full merge pass failed");
                    }
                }
                Err(err) => {
                    tracing::error!(error = ?err, "daemon step failed; record left for retry");
                }
            }

            tokio::select! {
                _ = &mut exit => {
                    tracing::info!("caught signal; exiting...");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Claim and process one record. Returns Idle when nothing is claimable.
    pub async fn step(&self) -> anyhow::Result<Step> {
        let mut statuses = Status::WORKABLE.to_vec();
        if self.config.purge_deleted {
            statuses.push(Status::Deleted);
        }
        let Some(claim) = self.store.files.claim_next(&statuses)? else {
            return Ok(Step::Idle);
        };
        let record = claim.record.clone();

        let span = tracing::info_span!(
            "record",
            id = %record.id,
            station = %record.station,
            status = %record.status,
        );
        async {
            match record.status {
                Status::Pending => self.validate(&record).await,
                Status::Validated => self.convert(&record).await,
                Status::Converted => self.merge(&record).await,
                Status::Deleted => self.purge(&record).await,
                other => {
                    tracing::warn!(status = %other, "claimed record in unexpected status");
                    Ok(())
                }
            }
        }
        .instrument(span)
        .await?;
        Ok(Step::Worked)
    }

    /// Apply a conditional transition, treating a lost race as a skip: the
    /// record is re-read and re-dispatched on a later cycle.
    fn apply(
        &self,
        record: &FileRecord,
        from: Status,
        to: Status,
        fields: TransitionFields,
    ) -> anyhow::Result<Option<FileRecord>> {
        match self.store.files.transition(record.id, from, to, fields) {
            Ok(next) => Ok(Some(next)),
            Err(store::Error::Conflict { actual, .. }) => {
                tracing::debug!(%from, %to, %actual, "transition conflict; re-dispatching");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn validate(&self, record: &FileRecord) -> anyhow::Result<()> {
        let bytes = self.blobs.read(&record.path, SOURCE_EXT).await?;
        let active = self
            .store
            .prototypes
            .active(&record.network.code, record.network.start)?;

        match validate_document(record, &bytes, active.as_ref()) {
            Ok(()) => {
                self.apply(record, Status::Pending, Status::Validated, Default::default())?;
            }
            Err(rejection) => {
                tracing::warn!(error = %rejection.error, detail = %rejection.detail, "rejecting record");
                self.apply(
                    record,
                    Status::Pending,
                    Status::Rejected,
                    TransitionFields {
                        error: Some(rejection.error),
                        ..Default::default()
                    },
                )?;
            }
        }
        Ok(())
    }

    async fn convert(&self, record: &FileRecord) -> anyhow::Result<()> {
        let Some(executor) = &self.executor else {
            return Ok(());
        };
        let source = self.blobs.path_for(&record.path, SOURCE_EXT);
        let target = self.blobs.path_for(&record.path, CONVERTED_EXT);

        let invocation = match executor.convert(&source, &target).await {
            Ok(invocation) => invocation,
            Err(ExecError::TimedOut(_)) => {
                // Transient: the record stays Validated and is retried.
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        if invocation.success() {
            self.apply(record, Status::Validated, Status::Converted, Default::default())?;
        } else {
            self.apply(
                record,
                Status::Validated,
                Status::Rejected,
                TransitionFields {
                    error: Some(invocation.stderr_text()),
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    async fn merge(&self, record: &FileRecord) -> anyhow::Result<()> {
        let Some(executor) = &self.executor else {
            return Ok(());
        };

        let active = self
            .store
            .prototypes
            .active(&record.network.code, record.network.start)?;
        let Some(prototype) = active else {
            self.apply(
                record,
                Status::Converted,
                Status::Rejected,
                TransitionFields {
                    error: Some(format!(
                        "no active prototype for network {}",
                        record.network
                    )),
                    ..Default::default()
                },
            )?;
            return Ok(());
        };

        let prototype_converted = match self.prototype_converted(executor, &prototype).await? {
            Ok(path) => path,
            Err(stderr) => {
                self.apply(
                    record,
                    Status::Converted,
                    Status::Rejected,
                    TransitionFields {
                        error: Some(format!("Could not merge metadata: {stderr}")),
                        ..Default::default()
                    },
                )?;
                return Ok(());
            }
        };

        let artifact_converted = self.blobs.path_for(&record.path, CONVERTED_EXT);
        let invocation = match executor
            .merge_check(&[artifact_converted, prototype_converted])
            .await
        {
            Ok(invocation) => invocation,
            Err(ExecError::TimedOut(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        if !invocation.success() {
            self.apply(
                record,
                Status::Converted,
                Status::Rejected,
                TransitionFields {
                    error: Some(format!(
                        "Could not merge metadata: {}",
                        invocation.stderr_text()
                    )),
                    ..Default::default()
                },
            )?;
            return Ok(());
        }

        match self
            .store
            .files
            .transition(record.id, Status::Converted, Status::Accepted, Default::default())
        {
            Ok(accepted) => {
                supersede::supersede_station(&self.store.files, &accepted)?;
            }
            Err(store::Error::Conflict { actual, .. }) => {
                // A parallel submission won the accepted slot for this
                // station while we were merging.
                let _ = self.store.files.transition(
                    record.id,
                    actual,
                    Status::Rejected,
                    TransitionFields {
                        error: Some("lost race; newer submission present".to_string()),
                        ..Default::default()
                    },
                );
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// The prototype's converted form, deriving it on demand when the
    /// eager conversion at ingest did not happen. An inner Err carries the
    /// converter's stderr.
    async fn prototype_converted(
        &self,
        executor: &Executor,
        prototype: &Prototype,
    ) -> anyhow::Result<Result<std::path::PathBuf, String>> {
        let path = self.blobs.prototype_converted_path(&prototype.hash);
        if tokio::fs::try_exists(&path).await? {
            return Ok(Ok(path));
        }
        let invocation = executor
            .convert(&self.blobs.prototype_path(&prototype.hash), &path)
            .await?;
        if invocation.success() {
            Ok(Ok(path))
        } else {
            Ok(Err(invocation.stderr_text()))
        }
    }

    async fn purge(&self, record: &FileRecord) -> anyhow::Result<()> {
        match self.store.files.delete(record.id) {
            Ok(_) => {}
            // Someone revived or already removed it; nothing to purge.
            Err(store::Error::Conflict { .. }) | Err(store::Error::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        let still_referenced = self
            .store
            .files
            .records_by_hash(&record.hash)?
            .iter()
            .any(|other| other.path == record.path);
        if !still_referenced {
            self.blobs.remove_all(&record.path).await?;
            tracing::info!(path = %record.path, "purged unreferenced blobs");
        }
        Ok(())
    }

    /// On idle, rebuild the merged inventory over the accepted set, then
    /// optionally nudge the downstream webservice stack.
    pub async fn full_merge(&mut self) -> anyhow::Result<()> {
        let Some(executor) = &self.executor else {
            return Ok(());
        };
        let set = self.store.files.accepted_set()?;
        if set.is_empty() {
            return Ok(());
        }

        let mut hasher = DefaultHasher::new();
        for record in &set {
            record.hash.hash(&mut hasher);
        }
        let fingerprint = hasher.finish();
        if self.last_inventory == Some(fingerprint) {
            return Ok(());
        }

        let inputs = inventory_inputs(&self.store, &self.blobs).await?;
        if inputs.is_empty() {
            return Ok(());
        }

        let target = self.blobs.inventory_path(&self.config.node_id);
        let invocation = match executor.merge_to_path(&inputs, &target).await {
            Ok(invocation) => invocation,
            Err(ExecError::TimedOut(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if !invocation.success() {
            tracing::warn!(stderr = %invocation.stderr_text(), "full inventory merge failed");
            return Ok(());
        }

        self.last_inventory = Some(fingerprint);
        tracing::info!(inputs = inputs.len(), target = %target.display(), "rebuilt merged inventory");

        if self.config.restart_on_merge {
            if let Err(err) = executor.reconfigure().await {
                tracing::warn!(error = ?err, "reconfigure failed");
            }
            if let Err(err) = executor.restart_query_service().await {
                tracing::warn!(error = ?err, "query service restart failed");
            }
        }
        Ok(())
    }
}

/// Converted inputs of a full inventory merge: the accepted set plus one
/// active prototype per network epoch present in it. Records without a
/// converted form yet are skipped with a warning.
pub(crate) async fn inventory_inputs(
    store: &Store,
    blobs: &BlobStore,
) -> anyhow::Result<Vec<std::path::PathBuf>> {
    let set = store.files.accepted_set()?;

    let mut inputs = Vec::new();
    for record in &set {
        let converted = blobs.path_for(&record.path, CONVERTED_EXT);
        if tokio::fs::try_exists(&converted).await? {
            inputs.push(converted);
        } else {
            tracing::warn!(path = %record.path, "accepted record has no converted form; skipping");
        }
    }
    let mut seen = HashSet::new();
    for record in &set {
        if !seen.insert((record.network.code.clone(), record.network.start)) {
            continue;
        }
        if let Some(prototype) = store
            .prototypes
            .active(&record.network.code, record.network.start)?
        {
            let converted = blobs.prototype_converted_path(&prototype.hash);
            if tokio::fs::try_exists(&converted).await? {
                inputs.push(converted);
            }
        }
    }
    Ok(inputs)
}

/// Why a staged record failed validation: the bare error kind recorded on
/// the rejected record, plus the descriptive detail for logs.
#[derive(Debug, PartialEq)]
struct Rejection {
    error: String,
    detail: String,
}

impl Rejection {
    fn new(error: &str, detail: impl ToString) -> Self {
        Self {
            error: error.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl From<&AuthError> for Rejection {
    fn from(err: &AuthError) -> Self {
        Self::new(err.kind(), err)
    }
}

/// Business validation of a staged record against its stored bytes and the
/// network's active prototype.
fn validate_document(
    record: &FileRecord,
    bytes: &[u8],
    active: Option<&Prototype>,
) -> Result<(), Rejection> {
    let artifacts =
        stationxml::split(bytes).map_err(|err| Rejection::new(err.kind(), &err))?;
    let artifact = artifacts
        .iter()
        .find(|artifact| artifact.hash == record.hash)
        .ok_or_else(|| {
            Rejection::new(
                "HashMismatch",
                "stored document does not match its recorded hash",
            )
        })?;

    let Some(prototype) = active else {
        return Err((&AuthError::PrototypeMissing(record.network.to_string())).into());
    };
    if artifact.network.end != prototype.network.end {
        return Err((&AuthError::PrototypeConflictEnd).into());
    }
    if artifact.restricted != prototype.restricted {
        return Err((&AuthError::PrototypeConflictRestricted).into());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use models::NetworkKey;
    use uuid::Uuid;

    fn network() -> NetworkKey {
        NetworkKey {
            code: "XX".to_string(),
            start: "2020-01-01T00:00:00Z".parse().unwrap(),
            end: None,
        }
    }

    fn prototype(restricted: bool) -> Prototype {
        Prototype {
            network: network(),
            restricted,
            description: None,
            hash: "p".to_string(),
            created: Utc::now(),
        }
    }

    fn doc(restricted_status: &str) -> Vec<u8> {
        format!(
            r#"<FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.0">
                 <Source>Test</Source>
                 <Network code="XX" startDate="2020-01-01T00:00:00" restrictedStatus="{restricted_status}">
                   <Station code="STA01" startDate="2020-01-01T00:00:00">
                     <Channel code="HHZ" locationCode="">
                       <SampleRate>100.0</SampleRate>
                       <Response>
                         <InstrumentSensitivity><Value>1000.0</Value></InstrumentSensitivity>
                         <Stage number="1"><StageGain><Value>1000.0</Value></StageGain></Stage>
                       </Response>
                     </Channel>
                   </Station>
                 </Network>
               </FDSNStationXML>"#
        )
        .into_bytes()
    }

    fn record_for(bytes: &[u8]) -> FileRecord {
        let artifact = &stationxml::split(bytes).unwrap()[0];
        FileRecord::new(
            artifact.network.clone(),
            artifact.station.clone(),
            artifact.hash.clone(),
            "XX/STA01/hash".to_string(),
            artifact.channel_count,
            bytes.len() as u64,
            Uuid::new_v4(),
        )
    }

    #[test]
    fn validate_document_accepts_a_matching_record() {
        let bytes = doc("open");
        let record = record_for(&bytes);
        assert_eq!(
            validate_document(&record, &bytes, Some(&prototype(false))),
            Ok(())
        );
    }

    #[test]
    fn validate_document_requires_an_active_prototype() {
        let bytes = doc("open");
        let record = record_for(&bytes);
        let rejection = validate_document(&record, &bytes, None).unwrap_err();
        assert_eq!(rejection.error, "PrototypeMissing");
        assert!(rejection.detail.contains("no active prototype"));
    }

    #[test]
    fn validate_document_rejects_prototype_conflicts() {
        let bytes = doc("open");
        let record = record_for(&bytes);
        let rejection =
            validate_document(&record, &bytes, Some(&prototype(true))).unwrap_err();
        assert_eq!(rejection.error, "PrototypeConflictRestricted");
    }

    #[test]
    fn validate_document_records_the_bare_error_kind() {
        // Sensitivity 1000 against a stage-gain product of 950.
        let good = doc("open");
        let bad = String::from_utf8(good.clone())
            .unwrap()
            .replace("<Value>1000.0</Value></InstrumentSensitivity>", "<Value>950.0</Value></InstrumentSensitivity>")
            .into_bytes();
        let record = record_for(&good);
        let rejection =
            validate_document(&record, &bad, Some(&prototype(false))).unwrap_err();
        assert_eq!(rejection.error, "GainMismatch");
        assert!(rejection.detail.contains("instrument sensitivity"));
    }

    #[test]
    fn validate_document_detects_hash_drift() {
        let bytes = doc("open");
        let mut record = record_for(&bytes);
        record.hash = "0".repeat(64);
        let rejection =
            validate_document(&record, &bytes, Some(&prototype(false))).unwrap_err();
        assert_eq!(rejection.error, "HashMismatch");
        assert!(rejection.detail.contains("does not match"));
    }
}
