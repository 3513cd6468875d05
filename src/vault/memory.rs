//! In-memory secret store for testing and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::SecretStore;
use crate::errors::RotationError;
use crate::models::stage::{SecretDescription, StageLabel, StoredVersion, VersionSelector};

#[derive(Debug, Clone, Default)]
struct SecretEntry {
    versions: HashMap<String, String>,
    stages: BTreeMap<StageLabel, String>,
}

impl SecretEntry {
    fn labels_of(&self, version_id: &str) -> Vec<StageLabel> {
        self.stages
            .iter()
            .filter(|(_, holder)| holder.as_str() == version_id)
            .map(|(stage, _)| *stage)
            .collect()
    }

    fn attach(&mut self, stage: StageLabel, version_id: &str) {
        let old = self.stages.insert(stage, version_id.to_string());
        if stage == StageLabel::Current {
            if let Some(old) = old.filter(|old| old != version_id) {
                self.stages.insert(StageLabel::Previous, old);
            }
        }
    }

    fn lookup(&self, selector: &VersionSelector) -> Option<&str> {
        match selector {
            VersionSelector::Stage(stage) => self.stages.get(stage).map(String::as_str),
            VersionSelector::Version(v) => self.versions.get_key_value(v).map(|(k, _)| k.as_str()),
            VersionSelector::StagedVersion(stage, v) => self
                .stages
                .get(stage)
                .filter(|holder| *holder == v)
                .map(String::as_str),
        }
    }
}

/// Versioned secrets held in process memory. Not persisted across restarts.
#[derive(Debug, Clone, Default)]
pub struct MemorySecretStore {
    data: Arc<RwLock<HashMap<String, SecretEntry>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_version(
        &self,
        secret_id: &str,
        selector: &VersionSelector,
    ) -> Result<Option<StoredVersion>, RotationError> {
        let data = self.data.read().await;
        let Some(entry) = data.get(secret_id) else {
            return Ok(None);
        };
        let Some(version_id) = entry.lookup(selector) else {
            return Ok(None);
        };
        Ok(entry.versions.get(version_id).map(|payload| StoredVersion {
            version_id: version_id.to_string(),
            payload: payload.clone(),
            stages: entry.labels_of(version_id),
        }))
    }

    async fn put_version(
        &self,
        secret_id: &str,
        version_id: &str,
        payload: &str,
        stages: &[StageLabel],
    ) -> Result<(), RotationError> {
        let mut data = self.data.write().await;
        let entry = data.entry(secret_id.to_string()).or_default();

        if let Some(existing) = entry.versions.get(version_id) {
            return if existing == payload {
                Ok(())
            } else {
                Err(RotationError::VersionConflict {
                    secret_id: secret_id.to_string(),
                    token: version_id.to_string(),
                })
            };
        }

        entry
            .versions
            .insert(version_id.to_string(), payload.to_string());
        for stage in stages {
            entry.attach(*stage, version_id);
        }
        Ok(())
    }

    async fn describe(&self, secret_id: &str) -> Result<SecretDescription, RotationError> {
        let data = self.data.read().await;
        let mut description = SecretDescription::default();
        if let Some(entry) = data.get(secret_id) {
            for (stage, holder) in &entry.stages {
                description
                    .versions
                    .entry(holder.clone())
                    .or_default()
                    .push(*stage);
            }
        }
        Ok(description)
    }

    async fn move_current(
        &self,
        secret_id: &str,
        version_id: &str,
        expected_current: &str,
    ) -> Result<(), RotationError> {
        let mut data = self.data.write().await;
        let entry = data
            .get_mut(secret_id)
            .filter(|entry| entry.versions.contains_key(version_id))
            .ok_or_else(|| RotationError::not_found(secret_id, VersionSelector::version(version_id)))?;

        match entry.stages.get(&StageLabel::Current) {
            Some(current) if current == expected_current => {}
            Some(current) => {
                return Err(RotationError::promotion_conflict(
                    secret_id,
                    version_id,
                    format!("CURRENT is held by {}, expected {}", current, expected_current),
                ))
            }
            None => {
                return Err(RotationError::promotion_conflict(
                    secret_id,
                    version_id,
                    "no version holds CURRENT",
                ))
            }
        }

        entry.attach(StageLabel::Current, version_id);
        if entry.stages.get(&StageLabel::Pending).map(String::as_str) == Some(version_id) {
            entry.stages.remove(&StageLabel::Pending);
        }
        Ok(())
    }
}
