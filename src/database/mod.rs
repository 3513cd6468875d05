pub mod postgres;
pub mod sql;

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::postgres::PgSslMode;

use crate::errors::RotationError;
use crate::models::credential::CredentialRecord;

/// The target database whose login is being rotated.
///
/// Every call opens its own connection and releases it before returning;
/// nothing is pooled across phases.
#[async_trait]
pub trait CredentialDatabase: Send + Sync {
    /// Log in as `login` and set `username`'s password to `new_password`.
    /// Failures surface as `DatabaseUpdate`.
    async fn set_password(
        &self,
        login: &CredentialRecord,
        username: &str,
        new_password: &str,
    ) -> Result<(), RotationError>;

    /// Log in with `credentials` and run the liveness probe.
    /// Failures surface as `CredentialVerification`.
    async fn verify(&self, credentials: &CredentialRecord) -> Result<(), RotationError>;
}

/// Connection settings that are not part of the credential record.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// `Require` encrypts without verifying the server certificate.
    pub ssl_mode: PgSslMode,
    pub ssl_root_cert: Option<PathBuf>,
    pub application_name: String,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            ssl_mode: PgSslMode::Require,
            ssl_root_cert: None,
            application_name: "rotator".to_string(),
        }
    }
}
