//! Content-addressed storage of submitted and derived artifacts.
//!
//! Every blob lives at `<root>/<network>/<station>/<hash>.<ext>`; prototypes
//! at `<root>/prototypes/<hash>.stationxml`. Writes stream to a temporary
//! sibling and rename into place, so concurrent writers of the same hash are
//! safe and readers never observe partial files.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;

/// Extension of the stored source StationXML document.
pub const SOURCE_EXT: &str = "xml";
/// Extension of the converter's derived binary form.
pub const CONVERTED_EXT: &str = "converted";

const EXTENSIONS: [&str; 2] = [SOURCE_EXT, CONVERTED_EXT];

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Content-addressed path prefix for a submission, relative to the root.
    pub fn prefix(network_code: &str, station: &str, hash: &str) -> String {
        format!("{network_code}/{station}/{hash}")
    }

    pub fn path_for(&self, prefix: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{prefix}.{ext}"))
    }

    /// Store source bytes under their content address. Re-putting an
    /// existing hash is a no-op.
    pub async fn put(
        &self,
        network_code: &str,
        station: &str,
        hash: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let prefix = Self::prefix(network_code, station, hash);
        let path = self.path_for(&prefix, SOURCE_EXT);
        if !tokio::fs::try_exists(&path).await? {
            write_atomic(&path, bytes).await?;
        }
        Ok(prefix)
    }

    pub async fn read(&self, prefix: &str, ext: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(prefix, ext)).await?)
    }

    pub async fn exists(&self, prefix: &str, ext: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(prefix, ext)).await?)
    }

    /// Remove every known extension of a prefix. Missing files are fine:
    /// the prefix may never have been converted.
    pub async fn remove_all(&self, prefix: &str) -> Result<()> {
        for ext in EXTENSIONS {
            match tokio::fs::remove_file(self.path_for(prefix, ext)).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub fn prototype_path(&self, hash: &str) -> PathBuf {
        self.root.join("prototypes").join(format!("{hash}.stationxml"))
    }

    /// Path of the prototype's converted form, produced eagerly at ingest.
    pub fn prototype_converted_path(&self, hash: &str) -> PathBuf {
        self.root.join("prototypes").join(format!("{hash}.converted"))
    }

    pub async fn put_prototype(&self, hash: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.prototype_path(hash);
        if !tokio::fs::try_exists(&path).await? {
            write_atomic(&path, bytes).await?;
        }
        Ok(path)
    }

    /// Well-known output path of the full merged inventory.
    pub fn inventory_path(&self, node_id: &str) -> PathBuf {
        self.root.join("inventory").join(format!("{node_id}-inventory"))
    }
}

/// Write to a uniquely-named temporary sibling, then rename into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("blob path has no parent directory"))?;
    tokio::fs::create_dir_all(parent).await?;

    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().unwrap_or_default().to_string_lossy(),
        Uuid::new_v4().simple()
    ));
    if let Err(err) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}
