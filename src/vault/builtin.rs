use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use rand::RngCore;
use sqlx::{PgPool, Postgres, Transaction};
use zeroize::Zeroize;

use super::{store_error, SecretStore};
use crate::errors::RotationError;
use crate::models::stage::{SecretDescription, StageLabel, StoredVersion, VersionSelector};

/// A secret payload sealed with envelope encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub encrypted_dek: Vec<u8>,
    pub dek_nonce: Vec<u8>,
    pub encrypted_secret: Vec<u8>,
    pub secret_nonce: Vec<u8>,
}

/// Built-in versioned secret store: AES-256-GCM envelope encryption in PostgreSQL.
pub struct BuiltinStore {
    crypto: VaultCrypto,
    pool: PgPool,
}

impl BuiltinStore {
    pub fn new(master_key_hex: &str, pool: PgPool) -> anyhow::Result<Self> {
        let crypto = VaultCrypto::new(master_key_hex)?;
        Ok(Self { crypto, pool })
    }

    pub async fn connect(database_url: &str, master_key_hex: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Self::new(master_key_hex, pool)
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn open(&self, row: &VersionRow) -> Result<String, RotationError> {
        self.crypto
            .decrypt_string(&EncryptedPayload {
                encrypted_dek: row.encrypted_dek.clone(),
                dek_nonce: row.dek_nonce.clone(),
                encrypted_secret: row.encrypted_secret.clone(),
                secret_nonce: row.secret_nonce.clone(),
            })
            .map_err(RotationError::Internal)
    }

    async fn labels_of(
        &self,
        secret_id: &str,
        version_id: &str,
    ) -> Result<Vec<StageLabel>, RotationError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT stage FROM secret_version_stages WHERE secret_id = $1 AND version_id = $2 ORDER BY stage",
        )
        .bind(secret_id)
        .bind(version_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.iter()
            .map(|s| s.parse::<StageLabel>().map_err(store_error))
            .collect()
    }

    /// Compare a write against the version already stored under the same id.
    async fn check_existing(
        &self,
        secret_id: &str,
        version_id: &str,
        payload: &str,
    ) -> Result<(), RotationError> {
        let existing = self
            .get_version(secret_id, &VersionSelector::version(version_id))
            .await?
            .ok_or_else(|| store_error(format!("version {} vanished during write", version_id)))?;
        if existing.payload == payload {
            tracing::debug!(secret_id, version_id, "version already stored with identical payload");
            Ok(())
        } else {
            Err(RotationError::VersionConflict {
                secret_id: secret_id.to_string(),
                token: version_id.to_string(),
            })
        }
    }
}

/// Point `stage` at `version_id`. Moving CURRENT demotes the old holder.
async fn attach_stage(
    tx: &mut Transaction<'_, Postgres>,
    secret_id: &str,
    stage: StageLabel,
    version_id: &str,
) -> Result<(), RotationError> {
    if stage == StageLabel::Current {
        let old = sqlx::query_scalar::<_, String>(
            "SELECT version_id FROM secret_version_stages WHERE secret_id = $1 AND stage = 'CURRENT' FOR UPDATE",
        )
        .bind(secret_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(store_error)?;

        if let Some(old) = old.filter(|old| old != version_id) {
            upsert_stage(tx, secret_id, StageLabel::Previous, &old).await?;
        }
    }
    upsert_stage(tx, secret_id, stage, version_id).await
}

async fn upsert_stage(
    tx: &mut Transaction<'_, Postgres>,
    secret_id: &str,
    stage: StageLabel,
    version_id: &str,
) -> Result<(), RotationError> {
    sqlx::query(
        r#"INSERT INTO secret_version_stages (secret_id, stage, version_id)
           VALUES ($1, $2, $3)
           ON CONFLICT (secret_id, stage)
           DO UPDATE SET version_id = EXCLUDED.version_id, updated_at = NOW()"#,
    )
    .bind(secret_id)
    .bind(stage.as_str())
    .bind(version_id)
    .execute(&mut **tx)
    .await
    .map_err(store_error)?;
    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .map(|code| code == "23505")
        .unwrap_or(false)
}

#[async_trait]
impl SecretStore for BuiltinStore {
    async fn get_version(
        &self,
        secret_id: &str,
        selector: &VersionSelector,
    ) -> Result<Option<StoredVersion>, RotationError> {
        let row = sqlx::query_as::<_, VersionRow>(
            r#"SELECT v.version_id, v.encrypted_dek, v.dek_nonce, v.encrypted_secret, v.secret_nonce
               FROM secret_versions v
               WHERE v.secret_id = $1
                 AND ($2::TEXT IS NULL OR v.version_id = $2)
                 AND ($3::TEXT IS NULL OR EXISTS (
                       SELECT 1 FROM secret_version_stages s
                       WHERE s.secret_id = v.secret_id
                         AND s.version_id = v.version_id
                         AND s.stage = $3))"#,
        )
        .bind(secret_id)
        .bind(selector.version_id())
        .bind(selector.stage_label().map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload = self.open(&row)?;
        let stages = self.labels_of(secret_id, &row.version_id).await?;
        Ok(Some(StoredVersion {
            version_id: row.version_id,
            payload,
            stages,
        }))
    }

    async fn put_version(
        &self,
        secret_id: &str,
        version_id: &str,
        payload: &str,
        stages: &[StageLabel],
    ) -> Result<(), RotationError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM secret_versions WHERE secret_id = $1 AND version_id = $2)",
        )
        .bind(secret_id)
        .bind(version_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        if exists {
            return self.check_existing(secret_id, version_id, payload).await;
        }

        let sealed = self.crypto.encrypt_string(payload)?;
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let inserted = sqlx::query(
            r#"INSERT INTO secret_versions (secret_id, version_id, encrypted_dek, dek_nonce, encrypted_secret, secret_nonce)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(secret_id)
        .bind(version_id)
        .bind(&sealed.encrypted_dek)
        .bind(&sealed.dek_nonce)
        .bind(&sealed.encrypted_secret)
        .bind(&sealed.secret_nonce)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                // a concurrent writer committed the same version id first
                tx.rollback().await.map_err(store_error)?;
                return self.check_existing(secret_id, version_id, payload).await;
            }
            Err(e) => return Err(store_error(e)),
        }

        for stage in stages {
            attach_stage(&mut tx, secret_id, *stage, version_id).await?;
        }
        tx.commit().await.map_err(store_error)?;

        tracing::debug!(secret_id, version_id, ?stages, "stored new secret version");
        Ok(())
    }

    async fn describe(&self, secret_id: &str) -> Result<SecretDescription, RotationError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT version_id, stage FROM secret_version_stages WHERE secret_id = $1",
        )
        .bind(secret_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut description = SecretDescription::default();
        for (version_id, stage) in rows {
            let stage = stage.parse::<StageLabel>().map_err(store_error)?;
            let labels = description.versions.entry(version_id).or_default();
            labels.push(stage);
            labels.sort();
        }
        Ok(description)
    }

    async fn move_current(
        &self,
        secret_id: &str,
        version_id: &str,
        expected_current: &str,
    ) -> Result<(), RotationError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM secret_versions WHERE secret_id = $1 AND version_id = $2)",
        )
        .bind(secret_id)
        .bind(version_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;
        if !exists {
            return Err(RotationError::not_found(
                secret_id,
                VersionSelector::version(version_id),
            ));
        }

        let current = sqlx::query_scalar::<_, String>(
            "SELECT version_id FROM secret_version_stages WHERE secret_id = $1 AND stage = 'CURRENT' FOR UPDATE",
        )
        .bind(secret_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error)?;

        match current.as_deref() {
            Some(c) if c == expected_current => {}
            Some(c) => {
                return Err(RotationError::promotion_conflict(
                    secret_id,
                    version_id,
                    format!("CURRENT is held by {}, expected {}", c, expected_current),
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

        attach_stage(&mut tx, secret_id, StageLabel::Current, version_id).await?;
        sqlx::query(
            "DELETE FROM secret_version_stages WHERE secret_id = $1 AND stage = 'PENDING' AND version_id = $2",
        )
        .bind(secret_id)
        .bind(version_id)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        tx.commit().await.map_err(store_error)?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    version_id: String,
    encrypted_dek: Vec<u8>,
    dek_nonce: Vec<u8>,
    encrypted_secret: Vec<u8>,
    secret_nonce: Vec<u8>,
}

pub struct VaultCrypto {
    kek: [u8; 32],
}

impl VaultCrypto {
    pub fn new(master_key_hex: &str) -> anyhow::Result<Self> {
        let kek = parse_master_key(master_key_hex)?;
        Ok(Self { kek })
    }

    /// Encrypts a secret payload under a fresh DEK, itself wrapped by the KEK.
    pub fn encrypt_string(&self, plaintext: &str) -> anyhow::Result<EncryptedPayload> {
        let mut dek = [0u8; 32];
        OsRng.fill_bytes(&mut dek);

        let secret_cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let secret_nonce = generate_nonce();
        let encrypted_secret = secret_cipher
            .encrypt(Nonce::from_slice(&secret_nonce), plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("secret encryption failed: {}", e))?;

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let dek_nonce = generate_nonce();
        let encrypted_dek = kek_cipher
            .encrypt(Nonce::from_slice(&dek_nonce), dek.as_ref())
            .map_err(|e| anyhow::anyhow!("DEK encryption failed: {}", e))?;

        dek.zeroize();

        Ok(EncryptedPayload {
            encrypted_dek,
            dek_nonce: dek_nonce.to_vec(),
            encrypted_secret,
            secret_nonce: secret_nonce.to_vec(),
        })
    }

    pub fn decrypt_string(&self, sealed: &EncryptedPayload) -> anyhow::Result<String> {
        if sealed.dek_nonce.len() != 12 || sealed.secret_nonce.len() != 12 {
            anyhow::bail!("stored nonce has wrong length");
        }

        let kek_cipher = Aes256Gcm::new_from_slice(&self.kek)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e))?;
        let mut dek_bytes = kek_cipher
            .decrypt(Nonce::from_slice(&sealed.dek_nonce), sealed.encrypted_dek.as_slice())
            .map_err(|e| anyhow::anyhow!("DEK decryption failed: {}", e))?;

        let secret_cipher = Aes256Gcm::new_from_slice(&dek_bytes)
            .map_err(|e| anyhow::anyhow!("invalid key length: {:?}", e));
        dek_bytes.zeroize();
        let plaintext_bytes = secret_cipher?
            .decrypt(Nonce::from_slice(&sealed.secret_nonce), sealed.encrypted_secret.as_slice())
            .map_err(|e| anyhow::anyhow!("secret decryption failed: {}", e))?;

        Ok(String::from_utf8(plaintext_bytes)?)
    }
}

impl Drop for VaultCrypto {
    fn drop(&mut self) {
        self.kek.zeroize();
    }
}

fn generate_nonce() -> [u8; 12] {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn parse_master_key(hex: &str) -> anyhow::Result<[u8; 32]> {
    if hex.len() != 64 {
        anyhow::bail!(
            "ROTATOR_MASTER_KEY must be 64 hex chars (32 bytes), got {} chars",
            hex.len()
        );
    }
    let bytes = hex::decode(hex)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
