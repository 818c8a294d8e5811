//! The HTTP surface: the submission intake plus the JSON read APIs and the
//! admin RPCs. Handlers stay thin; the lifecycle logic lives in the rest of
//! the crate.

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::sync::Arc;

mod authenticate;
mod history;
mod prototype;
mod rpc;
mod staged;
mod upload;

use crate::executor::Executor;
use crate::intake::IntakeError;
use crate::Config;
use models::{NetworkKey, User};
use store::{BlobStore, Store};

pub struct App {
    pub store: Store,
    pub blobs: BlobStore,
    pub executor: Option<Executor>,
    pub config: Config,
}

impl App {
    pub fn new(store: Store, blobs: BlobStore, config: Config) -> Arc<Self> {
        Arc::new(Self {
            store,
            blobs,
            executor: config.executor(),
            config,
        })
    }
}

/// Build the agent's API router.
pub fn build_router(app: Arc<App>) -> axum::Router<()> {
    let session_routes = axum::Router::new()
        .route("/upload", post(upload::upload))
        .route(
            "/api/history",
            get(history::history).delete(history::retire),
        )
        .route("/api/staged", get(staged::staged))
        .route("/api/prototype", get(prototype::prototype))
        .route("/rpc/prototypes", get(rpc::prototypes))
        .route("/rpc/inventory", get(rpc::inventory))
        .route("/rpc/reconfigure", get(rpc::reconfigure))
        .layer(axum::middleware::from_fn_with_state(
            app.clone(),
            authenticate_session,
        ))
        .layer(DefaultBodyLimit::max(app.config.max_post_bytes as usize));

    axum::Router::new()
        .route("/authenticate", post(authenticate::authenticate))
        .merge(session_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app)
}

/// Middleware which resolves the bearer token to a user before proceeding,
/// and attaches the user to the request.
async fn authenticate_session(
    State(app): State<Arc<App>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return (StatusCode::UNAUTHORIZED, "authentication required").into_response();
    };

    match app
        .store
        .accounts
        .session_user(token, app.config.session_max_age)
    {
        Ok(Some(user)) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Ok(None) => (StatusCode::UNAUTHORIZED, "invalid or expired session").into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

/// True when the user may read or retire records of the given network.
pub(crate) fn may_access(user: &User, network: &NetworkKey) -> bool {
    if user.is_admin() {
        return true;
    }
    matches!(
        &user.prototype,
        Some((code, start)) if *code == network.code && *start == network.start
    )
}

/// An error response: an HTTP status wrapping the underlying failure.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn forbidden(what: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            anyhow::anyhow!("user is not permitted to {what}"),
        )
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, anyhow::anyhow!("{what} not found"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<store::Error> for ApiError {
    fn from(error: store::Error) -> Self {
        let status = match &error {
            store::Error::NotFound(_) => StatusCode::NOT_FOUND,
            store::Error::Conflict { .. } | store::Error::DuplicateActive { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.into())
    }
}

impl From<IntakeError> for ApiError {
    fn from(error: IntakeError) -> Self {
        let status = match &error {
            IntakeError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            IntakeError::MultipartInvalid(_)
            | IntakeError::EmptySubmission
            | IntakeError::Validation(_) => StatusCode::BAD_REQUEST,
            // An unauthorized artifact fails the whole request as a server
            // error, matching the UI contract.
            IntakeError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IntakeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = ?self.error, "API request failed");
        }
        (self.status, format!("{:#}", self.error)).into_response()
    }
}
