//! Shared doubles for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rotator::database::CredentialDatabase;
use rotator::errors::RotationError;
use rotator::models::credential::CredentialRecord;
use rotator::models::stage::StageLabel;
use rotator::password::PasswordGenerator;
use rotator::rotation::{RotationHandler, RotationSettings};
use rotator::vault::memory::MemorySecretStore;
use rotator::vault::SecretStore;

/// Database double: one password per role, checked on every login.
#[derive(Default)]
pub struct FakeDatabase {
    roles: Mutex<HashMap<String, String>>,
    pub set_calls: AtomicUsize,
    pub verify_calls: AtomicUsize,
}

impl FakeDatabase {
    pub fn with_role(username: &str, password: &str) -> Self {
        let db = Self::default();
        db.roles
            .lock()
            .unwrap()
            .insert(username.to_string(), password.to_string());
        db
    }

    pub fn password_of(&self, username: &str) -> Option<String> {
        self.roles.lock().unwrap().get(username).cloned()
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    fn login(&self, credentials: &CredentialRecord) -> Result<(), String> {
        match self.roles.lock().unwrap().get(&credentials.username) {
            Some(pw) if *pw == credentials.password => Ok(()),
            _ => Err(format!(
                "password authentication failed for user \"{}\"",
                credentials.username
            )),
        }
    }
}

#[async_trait]
impl CredentialDatabase for FakeDatabase {
    async fn set_password(
        &self,
        login: &CredentialRecord,
        username: &str,
        new_password: &str,
    ) -> Result<(), RotationError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.login(login).map_err(RotationError::DatabaseUpdate)?;
        self.roles
            .lock()
            .unwrap()
            .insert(username.to_string(), new_password.to_string());
        Ok(())
    }

    async fn verify(&self, credentials: &CredentialRecord) -> Result<(), RotationError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.login(credentials)
            .map_err(RotationError::CredentialVerification)
    }
}

/// Database that never answers; for deadline tests.
pub struct HangingDatabase;

#[async_trait]
impl CredentialDatabase for HangingDatabase {
    async fn set_password(
        &self,
        _login: &CredentialRecord,
        _username: &str,
        _new_password: &str,
    ) -> Result<(), RotationError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn verify(&self, _credentials: &CredentialRecord) -> Result<(), RotationError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

pub fn initial_record() -> CredentialRecord {
    let mut record = CredentialRecord::new("db.internal", 5432, "app", "svc", "p1");
    record
        .extra
        .insert("engine".into(), serde_json::Value::String("postgres".into()));
    record
}

/// Store with `s1` holding version `v1` as CURRENT.
pub async fn seeded_store() -> Arc<MemorySecretStore> {
    let store = Arc::new(MemorySecretStore::new());
    store
        .put_version(
            "s1",
            "v1",
            &initial_record().to_json().unwrap(),
            &[StageLabel::Current],
        )
        .await
        .unwrap();
    store
}

pub fn handler(
    store: Arc<MemorySecretStore>,
    database: Arc<dyn CredentialDatabase>,
    settings: RotationSettings,
) -> RotationHandler {
    RotationHandler::new(store, database, PasswordGenerator::default(), settings)
}
