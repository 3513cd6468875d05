//! Four-phase rotation of a database credential held in a secret store.
//!
//! The handler keeps no state between invocations: every fact it relies on
//! lives in the secret store (stage labels) or the database (the role's
//! password). Each phase is idempotent because the platform delivers
//! at-least-once and may run duplicates concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::database::CredentialDatabase;
use crate::errors::RotationError;
use crate::models::request::{RotationRequest, RotationStep};
use crate::models::stage::{StageLabel, VersionSelector};
use crate::password::PasswordGenerator;
use crate::stages::{PromotionOutcome, PromotionPlan, StageManager};
use crate::vault::client::SecretStoreClient;
use crate::vault::SecretStore;

#[derive(Debug, Clone)]
pub struct RotationSettings {
    /// Re-run the liveness probe on the pending credentials right before
    /// promotion, so `CURRENT` never lands on credentials that do not log in.
    pub verify_before_promote: bool,
    /// Optional deadline per phase. Expiry drops the phase future, which
    /// closes any open database connection.
    pub phase_timeout: Option<Duration>,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            verify_before_promote: true,
            phase_timeout: None,
        }
    }
}

/// Dispatches rotation requests to the phase handlers.
pub struct RotationHandler {
    secrets: SecretStoreClient,
    stages: StageManager,
    database: Arc<dyn CredentialDatabase>,
    passwords: PasswordGenerator,
    settings: RotationSettings,
}

impl RotationHandler {
    pub fn new(
        store: Arc<dyn SecretStore>,
        database: Arc<dyn CredentialDatabase>,
        passwords: PasswordGenerator,
        settings: RotationSettings,
    ) -> Self {
        let secrets = SecretStoreClient::new(store);
        Self {
            stages: StageManager::new(secrets.clone()),
            secrets,
            database,
            passwords,
            settings,
        }
    }

    pub fn secrets(&self) -> &SecretStoreClient {
        &self.secrets
    }

    /// Run exactly one phase. Collaborator errors are returned unchanged.
    pub async fn handle(&self, request: &RotationRequest) -> Result<(), RotationError> {
        let secret_id = request.secret_id.as_str();
        let token = request.token.as_str();
        let step = match request.parsed_step() {
            Ok(step) => step,
            Err(e) => {
                error!(secret_id, token, step = %request.step, kind = e.kind(), "rejected rotation request");
                return Err(e);
            }
        };

        info!(secret_id, token, step = %step, "rotation step started");
        let started = Instant::now();

        let result = match self.settings.phase_timeout {
            Some(limit) => tokio::time::timeout(limit, self.dispatch(step, secret_id, token))
                .await
                .unwrap_or_else(|_| {
                    Err(RotationError::PhaseTimeout {
                        step: step.to_string(),
                        millis: limit.as_millis() as u64,
                    })
                }),
            None => self.dispatch(step, secret_id, token).await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(secret_id, token, step = %step, elapsed_ms, "rotation step completed"),
            Err(e) => error!(
                secret_id,
                token,
                step = %step,
                elapsed_ms,
                kind = e.kind(),
                retryable = e.is_retryable(),
                error = %e,
                "rotation step failed"
            ),
        }
        result
    }

    async fn dispatch(
        &self,
        step: RotationStep,
        secret_id: &str,
        token: &str,
    ) -> Result<(), RotationError> {
        match step {
            RotationStep::CreateSecret => self.create_secret(secret_id, token).await,
            RotationStep::SetSecret => self.set_secret(secret_id, token).await,
            RotationStep::TestSecret => self.test_secret(secret_id, token).await,
            RotationStep::FinishSecret => self.finish_secret(secret_id, token).await,
        }
    }

    /// Phase 1: store a PENDING version with a fresh password.
    pub async fn create_secret(&self, secret_id: &str, token: &str) -> Result<(), RotationError> {
        let current = self
            .secrets
            .read_version(secret_id, &VersionSelector::stage(StageLabel::Current))
            .await
            .map_err(|e| match e {
                RotationError::SecretVersionNotFound { .. } => RotationError::TemplateMissing {
                    secret_id: secret_id.to_string(),
                },
                other => other,
            })?;

        if self.secrets.exists(secret_id, StageLabel::Pending, token).await? {
            info!(secret_id, token, "pending version already exists, skipping creation");
            return Ok(());
        }

        let pending = current.with_password(self.passwords.generate());
        match self
            .secrets
            .write_version(secret_id, token, &pending, &[StageLabel::Pending])
            .await
        {
            Ok(()) => {
                info!(secret_id, token, "created pending version");
                Ok(())
            }
            Err(conflict @ RotationError::VersionConflict { .. }) => {
                // a duplicate invocation may have written this token first
                if self.secrets.exists(secret_id, StageLabel::Pending, token).await? {
                    info!(secret_id, token, "pending version created concurrently, keeping it");
                    Ok(())
                } else {
                    Err(conflict)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Phase 2: log in with CURRENT and set the role's password to PENDING's.
    pub async fn set_secret(&self, secret_id: &str, token: &str) -> Result<(), RotationError> {
        let current = self
            .secrets
            .read_version(secret_id, &VersionSelector::stage(StageLabel::Current))
            .await?;
        let pending = self
            .secrets
            .read_version(secret_id, &VersionSelector::staged(StageLabel::Pending, token))
            .await?;

        // a retry after a successful ALTER finds the pending login already live
        if self.database.verify(&pending).await.is_ok() {
            info!(secret_id, token, "pending credentials already active, nothing to set");
            return Ok(());
        }

        self.database
            .set_password(&current, &current.username, &pending.password)
            .await?;
        info!(secret_id, token, username = %current.username, "set pending password in database");
        Ok(())
    }

    /// Phase 3: log in with PENDING and run the liveness probe.
    pub async fn test_secret(&self, secret_id: &str, token: &str) -> Result<(), RotationError> {
        let pending = self
            .secrets
            .read_version(secret_id, &VersionSelector::staged(StageLabel::Pending, token))
            .await?;
        self.database.verify(&pending).await?;
        info!(secret_id, token, "pending credentials verified");
        Ok(())
    }

    /// Phase 4: promote PENDING to CURRENT, demoting the old CURRENT to PREVIOUS.
    pub async fn finish_secret(&self, secret_id: &str, token: &str) -> Result<(), RotationError> {
        let from = match self.stages.plan(secret_id, token).await? {
            PromotionPlan::AlreadyCurrent => {
                info!(secret_id, token, "version already CURRENT, nothing to finish");
                return Ok(());
            }
            PromotionPlan::Move { from } => from,
        };

        if self.settings.verify_before_promote {
            let pending = self
                .secrets
                .read_version(secret_id, &VersionSelector::staged(StageLabel::Pending, token))
                .await?;
            self.database.verify(&pending).await?;
            debug!(secret_id, token, "pending credentials re-verified before promotion");
        }

        match self.stages.promote(secret_id, token, &from).await? {
            PromotionOutcome::Promoted { previous } => {
                info!(secret_id, token, previous = %previous, "rotation finished");
            }
            PromotionOutcome::AlreadyCurrent => {
                info!(secret_id, token, "rotation finished by a concurrent invocation");
            }
        }
        Ok(())
    }

    /// Run all four phases in order for one token.
    pub async fn rotate(&self, secret_id: &str, token: &str) -> Result<(), RotationError> {
        for step in RotationStep::ALL {
            self.handle(&RotationRequest::new(secret_id, token, step)).await?;
        }
        Ok(())
    }
}
