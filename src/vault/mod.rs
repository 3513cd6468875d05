pub mod aws;
pub mod builtin;
pub mod client;
pub mod memory;
pub mod sigv4;

use async_trait::async_trait;

use crate::errors::RotationError;
use crate::models::stage::{SecretDescription, StageLabel, StoredVersion, VersionSelector};

/// Abstraction over versioned secret storage backends.
/// Implementations: BuiltinStore (AES-256-GCM in PG), AWS Secrets Manager, in-memory.
///
/// Stage labels are exclusive: attaching a label to a version moves it off
/// whichever version held it. Moving `CURRENT` demotes the old holder to
/// `PREVIOUS`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a version. `Ok(None)` when nothing matches the selector.
    async fn get_version(
        &self,
        secret_id: &str,
        selector: &VersionSelector,
    ) -> Result<Option<StoredVersion>, RotationError>;

    /// Create an immutable version labelled with `stages`.
    ///
    /// Writing the same payload under an existing `version_id` is a no-op;
    /// a different payload fails with `VersionConflict`.
    async fn put_version(
        &self,
        secret_id: &str,
        version_id: &str,
        payload: &str,
        stages: &[StageLabel],
    ) -> Result<(), RotationError>;

    /// Version id → labels for every labelled version of the secret.
    async fn describe(&self, secret_id: &str) -> Result<SecretDescription, RotationError>;

    /// Atomically move `CURRENT` from `expected_current` to `version_id`,
    /// demoting the former to `PREVIOUS` and clearing `PENDING` from the
    /// latter. Fails with `StagePromotionConflict` if `CURRENT` has moved.
    async fn move_current(
        &self,
        secret_id: &str,
        version_id: &str,
        expected_current: &str,
    ) -> Result<(), RotationError>;
}

pub(crate) fn store_error(e: impl std::fmt::Display) -> RotationError {
    RotationError::Store(e.to_string())
}
