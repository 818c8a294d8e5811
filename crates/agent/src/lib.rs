pub mod api;
mod authz;
mod availability;
mod daemon;
mod executor;
mod intake;
mod notify;
mod prototypes;
mod supersede;

pub use authz::AuthError;
pub use availability::AvailabilityChecker;
pub use daemon::{Daemon, Step};
pub use executor::{Executor, Invocation};
pub use intake::{submit, IntakeError, Submission, SubmitOutcome};
pub use prototypes::{ingest_prototype, ingest_prototype_dir};
pub use supersede::{retire, supersede_station};

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration of the agent, resolved from flags and environment
/// by `main`. Tests construct it directly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the content-addressed blob store.
    pub metadata_path: PathBuf,
    /// Request body cap of the upload endpoint.
    pub max_post_bytes: u64,
    /// Daemon sleep between polls when no work is claimable.
    pub poll_interval: Duration,
    /// Cadence of the availability checker; a lower cadence than the daemon.
    pub availability_interval: Duration,
    /// Directory of network prototype documents to ingest on demand.
    pub prototype_dir: Option<PathBuf>,
    /// The external converter/merger executable. Conversion and merging are
    /// skipped entirely when absent.
    pub converter: Option<PathBuf>,
    pub converter_timeout: Duration,
    /// Public FDSN station webservice the availability checker polls.
    pub fdsnws_url: Option<url::Url>,
    /// Identifier of this data-center node, used in inventory artifacts.
    pub node_id: String,
    /// Whether the daemon purges Deleted records and their blobs.
    pub purge_deleted: bool,
    /// Whether a successful full merge triggers reconfigure + restart of
    /// the downstream query service.
    pub restart_on_merge: bool,
    pub session_max_age: chrono::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("./metadata"),
            max_post_bytes: 100 << 20,
            poll_interval: Duration::from_secs(2),
            availability_interval: Duration::from_secs(60),
            prototype_dir: None,
            converter: None,
            converter_timeout: Duration::from_secs(120),
            fdsnws_url: None,
            node_id: "local".to_string(),
            purge_deleted: false,
            restart_on_merge: false,
            session_max_age: chrono::Duration::hours(12),
        }
    }
}

impl Config {
    pub fn executor(&self) -> Option<Executor> {
        self.converter
            .as_ref()
            .map(|program| Executor::new(program.clone(), self.converter_timeout))
    }
}
