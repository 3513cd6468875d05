use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use crate::errors::RotationError;
use crate::models::request::RotationRequest;
use crate::rotation::RotationHandler;

/// POST /rotate
///
/// Runs exactly one phase for the `{SecretId, Token, Step}` payload.
/// `204` on success; failures use the error JSON body with the taxonomy
/// name in `code` and `retryable_error`/`fatal_error` in `type`.
pub async fn rotate(
    State(handler): State<Arc<RotationHandler>>,
    Json(request): Json<RotationRequest>,
) -> Result<StatusCode, RotationError> {
    handler.handle(&request).await?;
    Ok(StatusCode::NO_CONTENT)
}
