//! Ingest of network prototype documents: parse, stage the blob, register,
//! and kick off the follow-up work a new prototype implies.

use std::path::Path;
use store::{BlobStore, Ingest, Store};

use crate::executor::Executor;

/// Ingest one prototype document. Idempotent per content hash. A newly
/// registered prototype forces re-validation of the network's published
/// stations, and its converted form is derived eagerly when a converter is
/// configured.
pub async fn ingest_prototype(
    store: &Store,
    blobs: &BlobStore,
    executor: Option<&Executor>,
    bytes: &[u8],
) -> anyhow::Result<Ingest> {
    let header = stationxml::network_header(bytes)?;
    blobs.put_prototype(&header.hash, bytes).await?;

    let ingest = store.prototypes.ingest(
        header.network.clone(),
        header.restricted,
        header.description.clone(),
        header.hash.clone(),
    )?;
    if !ingest.created {
        return Ok(ingest);
    }

    let reset = store.prototypes.reconcile(&header.network, &store.files)?;
    if !reset.is_empty() {
        tracing::info!(
            network = %header.network,
            count = reset.len(),
            "sent published records back for re-validation"
        );
    }

    if let Some(executor) = executor {
        let invocation = executor
            .convert(
                &blobs.prototype_path(&header.hash),
                &blobs.prototype_converted_path(&header.hash),
            )
            .await?;
        if !invocation.success() {
            // Merging will retry the conversion on demand.
            tracing::warn!(
                hash = %header.hash,
                stderr = %invocation.stderr_text(),
                "could not derive converted prototype form"
            );
        }
    }
    Ok(ingest)
}

/// Per-file outcome of a directory ingest, reported by the admin RPC.
#[derive(Debug, serde::Serialize)]
pub struct IngestReport {
    pub file: String,
    pub outcome: IngestOutcome,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Created,
    Unchanged,
    Error(String),
}

/// Ingest every StationXML file in the configured prototype directory.
pub async fn ingest_prototype_dir(
    store: &Store,
    blobs: &BlobStore,
    executor: Option<&Executor>,
    dir: &Path,
) -> anyhow::Result<Vec<IngestReport>> {
    let mut reports = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str());
        if !matches!(ext, Some("xml") | Some("stationxml")) {
            continue;
        }
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let bytes = tokio::fs::read(&path).await?;
        let outcome = match ingest_prototype(store, blobs, executor, &bytes).await {
            Ok(Ingest { created: true, .. }) => IngestOutcome::Created,
            Ok(Ingest { created: false, .. }) => IngestOutcome::Unchanged,
            Err(err) => {
                tracing::warn!(%file, error = %format!("{err:#}"), "prototype ingest failed");
                IngestOutcome::Error(format!("{err:#}"))
            }
        };
        reports.push(IngestReport { file, outcome });
    }
    Ok(reports)
}

#[cfg(test)]
mod test {
    use super::*;

    fn prototype_doc(end_attr: &str) -> Vec<u8> {
        format!(
            r#"<FDSNStationXML xmlns="http://www.fdsn.org/xml/station/1" schemaVersion="1.0">
                 <Source>Test</Source>
                 <Network code="XX" startDate="2020-01-01T00:00:00" {end_attr}>
                   <Description>Prototype</Description>
                 </Network>
               </FDSNStationXML>"#
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn ingest_registers_once_per_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::ephemeral().unwrap();
        let blobs = BlobStore::new(dir.path());

        let doc = prototype_doc("");
        let first = ingest_prototype(&store, &blobs, None, &doc).await.unwrap();
        assert!(first.created);
        assert!(blobs.prototype_path(&first.prototype.hash).exists());

        let again = ingest_prototype(&store, &blobs, None, &doc).await.unwrap();
        assert!(!again.created);
        assert_eq!(store.prototypes.all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn directory_ingest_reports_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let protos = tempfile::tempdir().unwrap();
        let store = Store::ephemeral().unwrap();
        let blobs = BlobStore::new(dir.path());

        std::fs::write(protos.path().join("xx.xml"), prototype_doc("")).unwrap();
        std::fs::write(protos.path().join("bad.xml"), b"not xml").unwrap();
        std::fs::write(protos.path().join("notes.txt"), b"ignored").unwrap();

        let mut reports = ingest_prototype_dir(&store, &blobs, None, protos.path())
            .await
            .unwrap();
        reports.sort_by(|a, b| a.file.cmp(&b.file));

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].file, "bad.xml");
        assert!(matches!(reports[0].outcome, IngestOutcome::Error(_)));
        assert_eq!(reports[1].file, "xx.xml");
        assert!(matches!(reports[1].outcome, IngestOutcome::Created));
    }
}
