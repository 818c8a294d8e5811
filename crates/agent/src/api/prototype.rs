use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use super::{ApiError, App};
use models::User;

#[derive(Debug, serde::Deserialize)]
pub struct PrototypeQuery {
    pub code: Option<String>,
    pub start: Option<DateTime<Utc>>,
}

/// Stream the active prototype document of the caller's network. Admins
/// select a network explicitly.
pub async fn prototype(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
    Query(query): Query<PrototypeQuery>,
) -> Result<Response, ApiError> {
    let (code, start) = match &user.prototype {
        Some((code, start)) => (code.clone(), *start),
        None => match (&query.code, query.start) {
            (Some(code), Some(start)) => (code.clone(), start),
            _ => {
                return Err(ApiError::new(
                    StatusCode::BAD_REQUEST,
                    anyhow::anyhow!("expected code and start"),
                ))
            }
        },
    };

    let prototype = app
        .store
        .prototypes
        .active(&code, start)?
        .ok_or_else(|| ApiError::not_found("active prototype"))?;

    let path = app.blobs.prototype_path(&prototype.hash);
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|err| ApiError::from(anyhow::Error::from(err).context("opening prototype blob")))?;

    Ok((
        [(header::CONTENT_TYPE, "application/xml")],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
