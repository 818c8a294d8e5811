//! The submission intake: split, authorize, stage. Shared by the HTTP
//! upload handler and exercised directly by tests.

use bytes::Bytes;
use models::{FileRecord, User};
use store::{BlobStore, Store};

use crate::authz::{authorize_artifact, AuthError};
use crate::notify::notify_admins;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("request exceeds the configured upload limit")]
    PayloadTooLarge,
    #[error("malformed multipart request: {0}")]
    MultipartInvalid(String),
    #[error("submission contains no files")]
    EmptySubmission,
    #[error(transparent)]
    Validation(#[from] stationxml::ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] store::Error),
}

/// The decoded parts of one upload request.
#[derive(Debug, Default)]
pub struct Submission {
    pub files: Vec<(Option<String>, Bytes)>,
}

#[derive(Debug, Default)]
pub struct SubmitOutcome {
    /// `NET.STA` labels staged by this submission.
    pub submitted: Vec<String>,
    /// Labels skipped because an equal-hash record is already live.
    pub skipped: Vec<String>,
    /// Number of administrators notified.
    pub notified: usize,
}

/// Reject oversized requests before the body is read.
pub fn check_content_length(declared: Option<u64>, max: u64) -> Result<(), IntakeError> {
    match declared {
        Some(length) if length > max => Err(IntakeError::PayloadTooLarge),
        _ => Ok(()),
    }
}

/// Run a submission through split → authorize → stage.
///
/// Validation and authorization failures abort the whole submission before
/// any blob or index write. Staging is per-artifact and idempotent: a
/// same-hash artifact whose record is still live is skipped silently.
pub async fn submit(
    store: &Store,
    blobs: &BlobStore,
    user: &User,
    submission: Submission,
) -> Result<SubmitOutcome, IntakeError> {
    let mut artifacts = Vec::new();
    for (filename, data) in &submission.files {
        if data.is_empty() {
            continue;
        }
        let split = stationxml::split(data).map_err(|err| {
            tracing::info!(?filename, %err, "rejecting submission");
            err
        })?;
        artifacts.extend(split);
    }
    if artifacts.is_empty() {
        return Err(IntakeError::EmptySubmission);
    }

    // Authorize every artifact before staging any of them.
    for artifact in &artifacts {
        let active = store
            .prototypes
            .active(&artifact.network.code, artifact.network.start)?;
        authorize_artifact(user, artifact, active.as_ref())?;
    }

    let mut outcome = SubmitOutcome::default();
    for artifact in &artifacts {
        let label = format!("{}.{}", artifact.network.code, artifact.station);
        let prefix = blobs
            .put(
                &artifact.network.code,
                &artifact.station,
                &artifact.hash,
                &artifact.document,
            )
            .await?;

        let record = FileRecord::new(
            artifact.network.clone(),
            artifact.station.clone(),
            artifact.hash.clone(),
            prefix,
            artifact.channel_count,
            artifact.document.len() as u64,
            user.id,
        );
        match store.files.insert(&record) {
            Ok(()) => outcome.submitted.push(label),
            Err(store::Error::DuplicateActive { .. }) => {
                tracing::debug!(%label, hash = %artifact.hash, "unchanged submission, skipping");
                outcome.skipped.push(label);
            }
            Err(err) => return Err(err.into()),
        }
    }

    if !outcome.submitted.is_empty() {
        outcome.notified = notify_admins(&store.accounts, user, &outcome.submitted)?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Role, Status};

    fn valid_doc(station: &str, sensitivity: &str) -> Bytes {
        Bytes::from(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.0">
              <Source>Test</Source>
              <Network code="XX" startDate="2020-01-01T00:00:00">
                <Station code="{station}" startDate="2020-01-01T00:00:00">
                  <Channel code="HHZ" locationCode="">
                    <SampleRate>100.0</SampleRate>
                    <Response>
                      <InstrumentSensitivity><Value>{sensitivity}</Value></InstrumentSensitivity>
                      <Stage number="1"><StageGain><Value>1000.0</Value></StageGain></Stage>
                    </Response>
                  </Channel>
                </Station>
              </Network>
            </FDSNStationXML>"#
        ))
    }

    struct Fixture {
        store: Store,
        blobs: BlobStore,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            store: Store::ephemeral().unwrap(),
            blobs: BlobStore::new(dir.path()),
            _dir: dir,
        }
    }

    fn submission(files: &[Bytes]) -> Submission {
        Submission {
            files: files
                .iter()
                .map(|data| (Some("upload.xml".to_string()), data.clone()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn stages_a_pending_record_and_notifies_admins() {
        let fx = fixture();
        let admin = fx
            .store
            .accounts
            .create_user("admin", "pw", Role::Admin, None)
            .unwrap();

        let outcome = submit(
            &fx.store,
            &fx.blobs,
            &admin,
            submission(&[valid_doc("STA01", "1000.0")]),
        )
        .await
        .unwrap();

        assert_eq!(outcome.submitted, vec!["XX.STA01".to_string()]);
        assert_eq!(outcome.notified, 1);

        let records = fx.store.files.all().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status, Status::Pending);
        assert_eq!(record.channel_count, 1);
        assert!(fx
            .blobs
            .exists(&record.path, store::SOURCE_EXT)
            .await
            .unwrap());
        assert_eq!(fx.store.accounts.messages_for(admin.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn identical_re_upload_is_skipped_silently() {
        let fx = fixture();
        let admin = fx
            .store
            .accounts
            .create_user("admin", "pw", Role::Admin, None)
            .unwrap();

        let doc = valid_doc("STA01", "1000.0");
        submit(&fx.store, &fx.blobs, &admin, submission(&[doc.clone()]))
            .await
            .unwrap();
        let second = submit(&fx.store, &fx.blobs, &admin, submission(&[doc]))
            .await
            .unwrap();

        assert!(second.submitted.is_empty());
        assert_eq!(second.skipped, vec!["XX.STA01".to_string()]);
        assert_eq!(second.notified, 0);
        assert_eq!(fx.store.files.all().unwrap().len(), 1);
        // Still exactly one notification from the first pass.
        assert_eq!(fx.store.accounts.messages_for(admin.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn validation_failure_aborts_before_any_write() {
        let fx = fixture();
        let admin = fx
            .store
            .accounts
            .create_user("admin", "pw", Role::Admin, None)
            .unwrap();

        // Product of gains 1000 against sensitivity 950: relative deviation
        // far above tolerance.
        let err = submit(
            &fx.store,
            &fx.blobs,
            &admin,
            submission(&[valid_doc("STA01", "950.0")]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IntakeError::Validation(_)));
        assert!(fx.store.files.all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn operator_denial_aborts_the_whole_submission() {
        let fx = fixture();
        let operator = fx
            .store
            .accounts
            .create_user(
                "op",
                "pw",
                Role::Operator,
                Some(("YY".to_string(), "2020-01-01T00:00:00Z".parse().unwrap())),
            )
            .unwrap();

        let err = submit(
            &fx.store,
            &fx.blobs,
            &operator,
            submission(&[valid_doc("STA01", "1000.0")]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IntakeError::Auth(AuthError::Forbidden(_))));
        assert!(fx.store.files.all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_submissions_are_rejected() {
        let fx = fixture();
        let admin = fx
            .store
            .accounts
            .create_user("admin", "pw", Role::Admin, None)
            .unwrap();

        let err = submit(&fx.store, &fx.blobs, &admin, Submission::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::EmptySubmission));

        let err = submit(
            &fx.store,
            &fx.blobs,
            &admin,
            submission(&[Bytes::new()]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IntakeError::EmptySubmission));
    }

    #[test]
    fn content_length_boundary() {
        assert!(check_content_length(Some(1024), 1024).is_ok());
        assert!(matches!(
            check_content_length(Some(1025), 1024),
            Err(IntakeError::PayloadTooLarge)
        ));
        assert!(check_content_length(None, 1024).is_ok());
    }
}
