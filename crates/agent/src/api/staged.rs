use axum::extract::State;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{ApiError, App};
use models::{NetworkKey, Status, User};

/// Latest status of one station within the caller's view.
#[derive(Debug, serde::Serialize)]
pub struct StagedEntry {
    pub network: String,
    pub station: String,
    pub status: Status,
    pub modified: DateTime<Utc>,
    pub hash: String,
    pub channel_count: u32,
}

/// Per-station projection of the latest record: the operator's bound
/// network, or everything for an admin.
pub async fn staged(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<StagedEntry>>, ApiError> {
    let scope = user.prototype.as_ref().map(|(code, start)| NetworkKey {
        code: code.clone(),
        start: *start,
        end: None,
    });

    let entries = app
        .store
        .files
        .latest_per_station(scope.as_ref())?
        .into_iter()
        .map(|record| StagedEntry {
            network: record.network.code,
            station: record.station,
            status: record.status,
            modified: record.modified,
            hash: record.hash,
            channel_count: record.channel_count,
        })
        .collect();
    Ok(Json(entries))
}
