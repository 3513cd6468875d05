use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgSslMode;

use crate::database::DatabaseOptions;
use crate::rotation::RotationSettings;
use crate::vault::aws::AwsSecretsManager;
use crate::vault::builtin::BuiltinStore;
use crate::vault::sigv4::AwsCredentials;
use crate::vault::SecretStore;

const PLACEHOLDER_MASTER_KEY: &str = "CHANGE_ME_32_BYTE_HEX_KEY";

/// Which secret store backend holds the versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Builtin,
    Aws,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "builtin" => Ok(StoreKind::Builtin),
            "aws" => Ok(StoreKind::Aws),
            other => anyhow::bail!("ROTATOR_STORE must be 'builtin' or 'aws', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub database_url: String,
    pub master_key: String,
    pub aws_region: String,
    pub aws_credentials: Option<AwsCredentials>,
    /// Overrides the regional Secrets Manager endpoint (LocalStack, VPC endpoints).
    pub secrets_endpoint: Option<String>,
    pub db_ssl_mode: PgSslMode,
    pub db_ssl_root_cert: Option<PathBuf>,
    pub verify_before_promote: bool,
    /// Per-phase deadline. `None` = unbounded.
    pub phase_timeout: Option<Duration>,
}

impl Config {
    pub fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            ssl_mode: self.db_ssl_mode,
            ssl_root_cert: self.db_ssl_root_cert.clone(),
            ..DatabaseOptions::default()
        }
    }

    pub fn rotation_settings(&self) -> RotationSettings {
        RotationSettings {
            verify_before_promote: self.verify_before_promote,
            phase_timeout: self.phase_timeout,
        }
    }

    /// Connect the configured secret store backend.
    pub async fn secret_store(&self) -> anyhow::Result<Arc<dyn SecretStore>> {
        match self.store {
            StoreKind::Builtin => {
                tracing::info!("Connecting to builtin secret store...");
                let store = BuiltinStore::connect(&self.database_url, &self.master_key)
                    .await
                    .context("failed to connect builtin secret store")?;
                store.migrate().await.context("failed to run migrations")?;
                Ok(Arc::new(store))
            }
            StoreKind::Aws => {
                let credentials = self.aws_credentials.clone().context(
                    "ROTATOR_STORE=aws requires AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
                )?;
                tracing::info!(region = %self.aws_region, "Using AWS Secrets Manager");
                let store = AwsSecretsManager::new(
                    &self.aws_region,
                    credentials,
                    self.secrets_endpoint.clone(),
                )?;
                Ok(Arc::new(store))
            }
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let store: StoreKind = std::env::var("ROTATOR_STORE")
        .unwrap_or_else(|_| "builtin".into())
        .parse()?;

    let master_key =
        std::env::var("ROTATOR_MASTER_KEY").unwrap_or_else(|_| PLACEHOLDER_MASTER_KEY.into());

    if store == StoreKind::Builtin && master_key == PLACEHOLDER_MASTER_KEY {
        let env_mode = std::env::var("ROTATOR_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "ROTATOR_MASTER_KEY is still the insecure placeholder. \
                 Set a proper 64-char hex key before running in production."
            );
        }
        tracing::warn!("ROTATOR_MASTER_KEY is not set, using insecure placeholder");
    }

    let aws_credentials = match (
        std::env::var("AWS_ACCESS_KEY_ID"),
        std::env::var("AWS_SECRET_ACCESS_KEY"),
    ) {
        (Ok(access_key_id), Ok(secret_access_key)) => Some(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        }),
        _ => None,
    };

    let db_ssl_mode = match std::env::var("ROTATOR_DB_SSL_MODE") {
        Ok(mode) => PgSslMode::from_str(&mode)
            .with_context(|| format!("invalid ROTATOR_DB_SSL_MODE '{}'", mode))?,
        Err(_) => PgSslMode::Require,
    };

    let phase_timeout_secs: u64 = parse_or(
        "ROTATOR_PHASE_TIMEOUT_SECS",
        std::env::var("ROTATOR_PHASE_TIMEOUT_SECS").ok().as_deref(),
        0,
    )?;
    let port: u16 = parse_or("ROTATOR_PORT", std::env::var("ROTATOR_PORT").ok().as_deref(), 8080)?;

    Ok(Config {
        port,
        store,
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/rotator".into()),
        master_key,
        aws_region: std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| "us-east-1".into()),
        aws_credentials,
        secrets_endpoint: std::env::var("ROTATOR_SECRETS_ENDPOINT").ok(),
        db_ssl_mode,
        db_ssl_root_cert: std::env::var("ROTATOR_DB_SSL_ROOT_CERT").ok().map(PathBuf::from),
        verify_before_promote: std::env::var("ROTATOR_VERIFY_BEFORE_PROMOTE")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true),
        phase_timeout: (phase_timeout_secs > 0).then(|| Duration::from_secs(phase_timeout_secs)),
    })
}

/// Parse an optional variable; unset falls back to `default`, malformed is an error.
fn parse_or<T>(name: &str, raw: Option<&str>, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {} '{}'", name, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_kind_parse() {
        assert_eq!("builtin".parse::<StoreKind>().unwrap(), StoreKind::Builtin);
        assert_eq!(" AWS ".parse::<StoreKind>().unwrap(), StoreKind::Aws);
        assert!("vault".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_numeric_vars_reject_malformed_values() {
        assert_eq!(parse_or::<u16>("ROTATOR_PORT", None, 8080).unwrap(), 8080);
        assert_eq!(parse_or::<u16>("ROTATOR_PORT", Some(" 9090 "), 8080).unwrap(), 9090);

        let err = parse_or::<u16>("ROTATOR_PORT", Some("80a"), 8080).unwrap_err();
        assert!(err.to_string().contains("ROTATOR_PORT"), "{}", err);
        assert!(parse_or::<u16>("ROTATOR_PORT", Some("70000"), 8080).is_err());

        let err = parse_or::<u64>("ROTATOR_PHASE_TIMEOUT_SECS", Some("30s"), 0).unwrap_err();
        assert!(err.to_string().contains("ROTATOR_PHASE_TIMEOUT_SECS"), "{}", err);
    }

    #[test]
    fn test_database_options_carry_ssl_settings() {
        let cfg = Config {
            port: 8080,
            store: StoreKind::Builtin,
            database_url: "postgres://localhost/rotator".into(),
            master_key: PLACEHOLDER_MASTER_KEY.into(),
            aws_region: "us-east-1".into(),
            aws_credentials: None,
            secrets_endpoint: None,
            db_ssl_mode: PgSslMode::VerifyFull,
            db_ssl_root_cert: Some(PathBuf::from("/etc/ssl/rds.pem")),
            verify_before_promote: false,
            phase_timeout: Some(Duration::from_secs(30)),
        };
        let opts = cfg.database_options();
        assert!(matches!(opts.ssl_mode, PgSslMode::VerifyFull));
        assert_eq!(opts.ssl_root_cert.as_deref(), Some(std::path::Path::new("/etc/ssl/rds.pem")));
        assert_eq!(opts.application_name, "rotator");

        let settings = cfg.rotation_settings();
        assert!(!settings.verify_before_promote);
        assert_eq!(settings.phase_timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_aws_store_requires_credentials() {
        let cfg = Config {
            port: 8080,
            store: StoreKind::Aws,
            database_url: String::new(),
            master_key: String::new(),
            aws_region: "eu-west-1".into(),
            aws_credentials: None,
            secrets_endpoint: None,
            db_ssl_mode: PgSslMode::Require,
            db_ssl_root_cert: None,
            verify_before_promote: true,
            phase_timeout: None,
        };
        let err = cfg.secret_store().await.err().unwrap();
        assert!(err.to_string().contains("AWS_ACCESS_KEY_ID"));
    }
}
