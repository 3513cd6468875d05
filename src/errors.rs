use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Every failure a rotation phase can surface to the invoking platform.
///
/// Phases never recover from these locally; the caller owns retry.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("invalid rotation step: {0}")]
    InvalidStep(String),

    #[error("secret {secret_id} has no CURRENT version to use as a template")]
    TemplateMissing { secret_id: String },

    #[error("secret {secret_id} has no version matching {selector}")]
    SecretVersionNotFound { secret_id: String, selector: String },

    #[error("secret {secret_id} version {selector} is not a valid credential record: {reason}")]
    MalformedCredential {
        secret_id: String,
        selector: String,
        reason: String,
    },

    #[error("failed to set pending password in database: {0}")]
    DatabaseUpdate(String),

    #[error("pending credentials failed verification: {0}")]
    CredentialVerification(String),

    #[error("cannot promote {token} to CURRENT for secret {secret_id}: {reason}")]
    StagePromotionConflict {
        secret_id: String,
        token: String,
        reason: String,
    },

    #[error("version {token} of secret {secret_id} already exists with different content")]
    VersionConflict { secret_id: String, token: String },

    #[error("secret store error: {0}")]
    Store(String),

    #[error("rotation step {step} exceeded its {millis}ms deadline")]
    PhaseTimeout { step: String, millis: u64 },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RotationError {
    /// Stable error kind reported to the platform's rotation-status view.
    pub fn kind(&self) -> &'static str {
        match self {
            RotationError::InvalidStep(_) => "InvalidStepError",
            RotationError::TemplateMissing { .. } => "TemplateMissingError",
            RotationError::SecretVersionNotFound { .. } => "SecretVersionNotFoundError",
            RotationError::MalformedCredential { .. } => "MalformedCredentialError",
            RotationError::DatabaseUpdate(_) => "DatabaseUpdateError",
            RotationError::CredentialVerification(_) => "CredentialVerificationError",
            RotationError::StagePromotionConflict { .. } => "StagePromotionConflictError",
            RotationError::VersionConflict { .. } => "VersionConflictError",
            RotationError::Store(_) => "SecretStoreError",
            RotationError::PhaseTimeout { .. } => "PhaseTimeoutError",
            RotationError::Internal(_) => "InternalError",
        }
    }

    /// Whether re-invoking the same phase can succeed without outside intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RotationError::DatabaseUpdate(_)
                | RotationError::CredentialVerification(_)
                | RotationError::StagePromotionConflict { .. }
                | RotationError::Store(_)
                | RotationError::PhaseTimeout { .. }
        )
    }

    pub(crate) fn not_found(secret_id: &str, selector: impl ToString) -> Self {
        RotationError::SecretVersionNotFound {
            secret_id: secret_id.to_string(),
            selector: selector.to_string(),
        }
    }

    pub(crate) fn promotion_conflict(secret_id: &str, token: &str, reason: impl Into<String>) -> Self {
        RotationError::StagePromotionConflict {
            secret_id: secret_id.to_string(),
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}

impl IntoResponse for RotationError {
    fn into_response(self) -> Response {
        let status = match &self {
            RotationError::InvalidStep(_) => StatusCode::BAD_REQUEST,
            RotationError::TemplateMissing { .. }
            | RotationError::SecretVersionNotFound { .. } => StatusCode::NOT_FOUND,
            RotationError::MalformedCredential { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RotationError::StagePromotionConflict { .. }
            | RotationError::VersionConflict { .. } => StatusCode::CONFLICT,
            RotationError::DatabaseUpdate(_)
            | RotationError::CredentialVerification(_)
            | RotationError::Store(_) => StatusCode::BAD_GATEWAY,
            RotationError::PhaseTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RotationError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let error_type = if self.is_retryable() {
            "retryable_error"
        } else {
            "fatal_error"
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": self.kind(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_match_taxonomy() {
        assert_eq!(RotationError::InvalidStep("x".into()).kind(), "InvalidStepError");
        assert_eq!(
            RotationError::promotion_conflict("s1", "v2", "moved").kind(),
            "StagePromotionConflictError"
        );
        assert_eq!(RotationError::not_found("s1", "PENDING").kind(), "SecretVersionNotFoundError");
    }

    #[test]
    fn test_fatal_errors_are_not_retryable() {
        assert!(!RotationError::InvalidStep("x".into()).is_retryable());
        assert!(!RotationError::VersionConflict {
            secret_id: "s1".into(),
            token: "v2".into()
        }
        .is_retryable());
        assert!(RotationError::DatabaseUpdate("boom".into()).is_retryable());
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let resp = RotationError::promotion_conflict("s1", "v2", "moved").into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
