//! Confirmation that accepted metadata is actually served by the public
//! FDSN station webservice. Runs on its own, lower cadence: for every
//! Accepted record it fetches the station at response level, canonicalizes
//! the returned Network element, and promotes the record to Completed when
//! the hashes agree. Mismatches and outages leave the record untouched.

use chrono::Utc;
use futures::FutureExt;
use models::Status;
use store::{Store, TransitionFields};

use crate::Config;

pub struct AvailabilityChecker {
    store: Store,
    client: reqwest::Client,
    config: Config,
}

impl AvailabilityChecker {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            config,
        }
    }

    pub async fn run<E>(self, exit: E) -> anyhow::Result<()>
    where
        E: std::future::Future<Output = ()> + Send,
    {
        if self.config.fdsnws_url.is_none() {
            tracing::info!("no query webservice configured; availability checker not running");
            return Ok(());
        }
        tokio::pin!(exit);
        loop {
            if (&mut exit).now_or_never().is_some() {
                return Ok(());
            }
            match self.check_once().await {
                Ok(0) => {}
                Ok(completed) => tracing::info!(completed, "availability pass finished"),
                Err(err) => tracing::warn!(error = ?err, "availability pass failed"),
            }
            tokio::select! {
                _ = &mut exit => return Ok(()),
                _ = tokio::time::sleep(self.config.availability_interval) => {}
            }
        }
    }

    /// One pass over every Accepted record. Returns how many were promoted
    /// to Completed.
    pub async fn check_once(&self) -> anyhow::Result<usize> {
        let Some(base) = &self.config.fdsnws_url else {
            return Ok(0);
        };

        let accepted: Vec<_> = self
            .store
            .files
            .all()?
            .into_iter()
            .filter(|record| record.status == Status::Accepted)
            .collect();

        let mut completed = 0;
        for record in accepted {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("network", &record.network.code)
                .append_pair("station", &record.station)
                .append_pair("level", "response");

            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(err) => {
                    // The webservice being down is transient; try again on
                    // the next pass.
                    tracing::warn!(error = %err, "query webservice unreachable");
                    continue;
                }
            };
            if !response.status().is_success() {
                tracing::debug!(
                    station = %record.station,
                    status = %response.status(),
                    "station not yet served"
                );
                continue;
            }
            let body = match response.bytes().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read webservice response");
                    continue;
                }
            };

            match stationxml::canonical_network_hash(&body) {
                Ok(hash) if hash == record.hash => {
                    let fields = TransitionFields {
                        available: Some(Utc::now()),
                        ..Default::default()
                    };
                    match self.store.files.transition(
                        record.id,
                        Status::Accepted,
                        Status::Completed,
                        fields,
                    ) {
                        Ok(_) => {
                            tracing::info!(
                                network = %record.network,
                                station = %record.station,
                                "record is publicly available"
                            );
                            completed += 1;
                        }
                        Err(store::Error::Conflict { .. }) => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                Ok(_) => {
                    // The service still serves older metadata for this
                    // station; leave the record Accepted.
                    tracing::debug!(station = %record.station, "served metadata differs");
                }
                Err(err) => {
                    tracing::warn!(station = %record.station, error = %err, "unparseable webservice response");
                }
            }
        }
        Ok(completed)
    }
}
