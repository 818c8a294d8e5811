use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Extension;
use std::sync::Arc;

use super::{ApiError, App};
use crate::intake::{check_content_length, submit, IntakeError, Submission};
use models::User;

/// The multipart intake endpoint. Successful and rejected submissions both
/// answer with a redirect carrying the outcome token; oversized requests
/// are refused before the body is read, and an unauthorized artifact fails
/// the whole request.
pub async fn upload(
    State(app): State<Arc<App>>,
    Extension(user): Extension<User>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    check_content_length(declared, app.config.max_post_bytes).map_err(ApiError::from)?;

    let submission = read_multipart(multipart).await.map_err(ApiError::from)?;

    match submit(&app.store, &app.blobs, &user, submission).await {
        Ok(outcome) => {
            tracing::info!(
                user = %user.username,
                submitted = outcome.submitted.len(),
                skipped = outcome.skipped.len(),
                "accepted submission"
            );
            Ok(Redirect::to("/home?S_METADATA_SUCCESS").into_response())
        }
        Err(err @ (IntakeError::Validation(_) | IntakeError::EmptySubmission)) => {
            let reason: String =
                url::form_urlencoded::byte_serialize(err.to_string().as_bytes()).collect();
            Ok(Redirect::to(&format!("/home?S_METADATA_FAILURE&reason={reason}"))
                .into_response())
        }
        Err(err) => Err(ApiError::from(err)),
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<Submission, IntakeError> {
    let mut submission = Submission::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| IntakeError::MultipartInvalid(err.to_string()))?
    {
        let filename = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|err| IntakeError::MultipartInvalid(err.to_string()))?;
        submission.files.push((filename, data));
    }
    Ok(submission)
}
