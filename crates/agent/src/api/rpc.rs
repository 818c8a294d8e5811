//! Admin RPCs: prototype ingest, inventory export, and webservice nudges.
//! Each is idempotent and safe to re-issue.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use std::sync::Arc;

use super::{ApiError, App};
use crate::daemon::inventory_inputs;
use crate::prototypes::{ingest_prototype_dir, IngestReport};
use models::User;

fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("issue admin RPCs"))
    }
}

/// Re-ingest every prototype document from the configured directory.
pub async fn prototypes(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<IngestReport>>, ApiError> {
    require_admin(&user)?;
    let Some(dir) = &app.config.prototype_dir else {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            anyhow::anyhow!("no prototype directory configured"),
        ));
    };
    let reports = ingest_prototype_dir(&app.store, &app.blobs, app.executor.as_ref(), dir)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(reports))
}

/// Merge the full accepted inventory, streaming the converter's stdout
/// back as an attachment.
pub async fn inventory(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
) -> Result<Response, ApiError> {
    require_admin(&user)?;
    let Some(executor) = &app.executor else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            anyhow::anyhow!("no converter configured"),
        ));
    };

    let inputs = inventory_inputs(&app.store, &app.blobs)
        .await
        .map_err(ApiError::from)?;
    if inputs.is_empty() {
        return Err(ApiError::not_found("accepted inventory"));
    }

    let mut merged = Vec::new();
    let invocation = executor
        .merge_to_writer(&inputs, &mut merged)
        .await
        .map_err(|err| ApiError::from(anyhow::Error::from(err)))?;
    if !invocation.success() {
        return Err(ApiError::new(
            StatusCode::BAD_GATEWAY,
            anyhow::anyhow!("inventory merge failed: {}", invocation.stderr_text()),
        ));
    }

    let filename = format!("{}-full-inventory", app.config.node_id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        merged,
    )
        .into_response())
}

/// Re-issue reconfigure + restart against the downstream webservice stack.
pub async fn reconfigure(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
) -> Result<Response, ApiError> {
    require_admin(&user)?;
    let Some(executor) = &app.executor else {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            anyhow::anyhow!("no converter configured"),
        ));
    };

    let check = |what: &str, invocation: crate::Invocation| {
        if invocation.success() {
            Ok(())
        } else {
            Err(ApiError::new(
                StatusCode::BAD_GATEWAY,
                anyhow::anyhow!("{what} failed: {}", invocation.stderr_text()),
            ))
        }
    };
    let reconfigure = executor
        .reconfigure()
        .await
        .map_err(|err| ApiError::from(anyhow::Error::from(err)))?;
    check("reconfigure", reconfigure)?;
    let restart = executor
        .restart_query_service()
        .await
        .map_err(|err| ApiError::from(anyhow::Error::from(err)))?;
    check("restart", restart)?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
