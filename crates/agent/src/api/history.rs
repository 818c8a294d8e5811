use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::{may_access, ApiError, App};
use crate::supersede;
use models::{FileRecord, Status, User};
use store::SOURCE_EXT;

#[derive(Debug, serde::Deserialize)]
pub struct HistoryQuery {
    pub network: Option<String>,
    pub station: Option<String>,
    /// A record hash: selects blob download (GET) or retirement (DELETE).
    pub id: Option<String>,
}

/// One row of a station's submission history.
#[derive(Debug, serde::Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub status: Status,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hash: String,
    pub channel_count: u32,
    pub size_bytes: u64,
}

impl From<FileRecord> for HistoryEntry {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            created: record.created,
            modified: record.modified,
            error: record.error,
            hash: record.hash,
            channel_count: record.channel_count,
            size_bytes: record.size_bytes,
        }
    }
}

/// `?network=..&station=..` returns the full history as JSON, newest
/// first. `?id=<hash>` streams the stored blob instead.
pub async fn history(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    if let Some(hash) = &query.id {
        let record = find_by_hash(&app, &user, hash)?;
        return stream_blob(&app, &record).await;
    }

    let (Some(network), Some(station)) = (&query.network, &query.station) else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            anyhow::anyhow!("expected network and station, or id"),
        ));
    };

    let mut records: Vec<FileRecord> = app
        .store
        .files
        .all()?
        .into_iter()
        .filter(|r| {
            r.network.code == *network && r.station == *station && may_access(&user, &r.network)
        })
        .collect();
    records.sort_by(|a, b| b.created.cmp(&a.created));

    let entries: Vec<HistoryEntry> = records.into_iter().map(Into::into).collect();
    Ok(Json(entries).into_response())
}

/// Operator-initiated retirement of a single record by hash: the same
/// classification the supersession resolver applies after an acceptance.
pub async fn retire(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let Some(hash) = &query.id else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            anyhow::anyhow!("expected an id"),
        ));
    };
    let record = find_by_hash(&app, &user, hash)?;
    let retired = supersede::retire(&app.store.files, &record)?;
    tracing::info!(user = %user.username, %hash, ?retired, "operator retired record");
    Ok(Json(serde_json::json!({ "retired": retired })).into_response())
}

/// The newest record carrying `hash` that the caller may access.
fn find_by_hash(app: &App, user: &User, hash: &str) -> Result<FileRecord, ApiError> {
    let record = app
        .store
        .files
        .records_by_hash(hash)?
        .into_iter()
        .max_by_key(|r| r.created)
        .ok_or_else(|| ApiError::not_found("record"))?;
    if !may_access(user, &record.network) {
        return Err(ApiError::forbidden("access this network"));
    }
    Ok(record)
}

async fn stream_blob(app: &App, record: &FileRecord) -> Result<Response, ApiError> {
    let path = app.blobs.path_for(&record.path, SOURCE_EXT);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|err| ApiError::from(anyhow::Error::from(err).context("opening blob")))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        body,
    )
        .into_response())
}
