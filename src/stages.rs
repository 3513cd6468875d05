//! Promotion of a verified pending version to `CURRENT`.

use crate::errors::RotationError;
use crate::models::stage::{StageLabel, VersionSelector};
use crate::vault::client::SecretStoreClient;

/// What finishing a rotation has to do for a given token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionPlan {
    /// `token` already holds `CURRENT`; nothing to do.
    AlreadyCurrent,
    /// Move `CURRENT` from `from` to the token.
    Move { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    Promoted { previous: String },
    AlreadyCurrent,
}

#[derive(Clone)]
pub struct StageManager {
    client: SecretStoreClient,
}

impl StageManager {
    pub fn new(client: SecretStoreClient) -> Self {
        Self { client }
    }

    /// Resolve the current holder and check that `token` is promotable.
    pub async fn plan(&self, secret_id: &str, token: &str) -> Result<PromotionPlan, RotationError> {
        let description = self.client.describe(secret_id).await?;
        let current = description
            .holder_of(StageLabel::Current)
            .ok_or_else(|| RotationError::not_found(secret_id, VersionSelector::stage(StageLabel::Current)))?;

        if current == token {
            return Ok(PromotionPlan::AlreadyCurrent);
        }

        match description.stages_of(token) {
            Some(labels) if labels.contains(&StageLabel::Pending) => Ok(PromotionPlan::Move {
                from: current.to_string(),
            }),
            Some(labels) => Err(RotationError::promotion_conflict(
                secret_id,
                token,
                format!(
                    "version is labelled {:?}, not PENDING; CURRENT is {}",
                    labels, current
                ),
            )),
            None => Err(RotationError::not_found(
                secret_id,
                VersionSelector::staged(StageLabel::Pending, token),
            )),
        }
    }

    /// Conditionally move `CURRENT` from `from` to `token`.
    ///
    /// Losing a race to an identical promotion is reported as
    /// `AlreadyCurrent`; losing to anything else stays a conflict.
    pub async fn promote(
        &self,
        secret_id: &str,
        token: &str,
        from: &str,
    ) -> Result<PromotionOutcome, RotationError> {
        match self.client.store().move_current(secret_id, token, from).await {
            Ok(()) => {
                tracing::info!(secret_id, token, previous = from, "moved CURRENT to new version");
                Ok(PromotionOutcome::Promoted {
                    previous: from.to_string(),
                })
            }
            Err(conflict @ RotationError::StagePromotionConflict { .. }) => {
                let description = self.client.describe(secret_id).await?;
                if description.holder_of(StageLabel::Current) == Some(token) {
                    tracing::info!(secret_id, token, "CURRENT already moved by a concurrent invocation");
                    Ok(PromotionOutcome::AlreadyCurrent)
                } else {
                    Err(conflict)
                }
            }
            Err(e) => Err(e),
        }
    }
}
