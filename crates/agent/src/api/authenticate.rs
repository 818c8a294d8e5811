use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use super::{ApiError, App};

#[derive(Debug, serde::Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, serde::Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Exchange credentials for a bearer token.
pub async fn authenticate(
    State(app): State<Arc<App>>,
    Json(credentials): Json<Credentials>,
) -> Result<Json<TokenResponse>, ApiError> {
    match app
        .store
        .accounts
        .authenticate(&credentials.username, &credentials.password)?
    {
        Some(session) => Ok(Json(TokenResponse {
            token: session.token,
        })),
        None => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            anyhow::anyhow!("invalid credentials"),
        )),
    }
}
