use std::sync::Arc;

use super::SecretStore;
use crate::errors::RotationError;
use crate::models::credential::CredentialRecord;
use crate::models::stage::{SecretDescription, StageLabel, VersionSelector};

/// Typed view of a [`SecretStore`] that speaks credential records.
#[derive(Clone)]
pub struct SecretStoreClient {
    store: Arc<dyn SecretStore>,
}

impl SecretStoreClient {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Read and parse a version. Absence is `SecretVersionNotFound`.
    pub async fn read_version(
        &self,
        secret_id: &str,
        selector: &VersionSelector,
    ) -> Result<CredentialRecord, RotationError> {
        let version = self
            .store
            .get_version(secret_id, selector)
            .await?
            .ok_or_else(|| RotationError::not_found(secret_id, selector))?;

        CredentialRecord::from_json(&version.payload).map_err(|reason| {
            RotationError::MalformedCredential {
                secret_id: secret_id.to_string(),
                selector: selector.to_string(),
                reason,
            }
        })
    }

    /// Whether `token` exists and carries `stage`. Never fails on absence.
    pub async fn exists(
        &self,
        secret_id: &str,
        stage: StageLabel,
        token: &str,
    ) -> Result<bool, RotationError> {
        Ok(self
            .store
            .get_version(secret_id, &VersionSelector::staged(stage, token))
            .await?
            .is_some())
    }

    pub async fn write_version(
        &self,
        secret_id: &str,
        token: &str,
        record: &CredentialRecord,
        stages: &[StageLabel],
    ) -> Result<(), RotationError> {
        let payload = record
            .to_json()
            .map_err(|e| RotationError::Internal(e.into()))?;
        self.store.put_version(secret_id, token, &payload, stages).await
    }

    pub async fn describe(&self, secret_id: &str) -> Result<SecretDescription, RotationError> {
        self.store.describe(secret_id).await
    }
}
