use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};

use super::{sql, CredentialDatabase, DatabaseOptions};
use crate::errors::RotationError;
use crate::models::credential::CredentialRecord;

/// PostgreSQL target reached with one short-lived connection per call.
pub struct PgCredentialDatabase {
    options: DatabaseOptions,
}

impl PgCredentialDatabase {
    pub fn new(options: DatabaseOptions) -> Self {
        Self { options }
    }

    /// Statement logging is off: the ALTER ROLE text carries the new
    /// password, and sqlx logs statements at DEBUG and slow ones at WARN.
    pub fn connect_options(&self, credentials: &CredentialRecord) -> PgConnectOptions {
        let opts = PgConnectOptions::new()
            .host(&credentials.host)
            .port(credentials.port)
            .database(&credentials.dbname)
            .username(&credentials.username)
            .password(&credentials.password)
            .ssl_mode(self.options.ssl_mode)
            .application_name(&self.options.application_name)
            .disable_statement_logging();
        match &self.options.ssl_root_cert {
            Some(ca) => opts.ssl_root_cert(ca),
            None => opts,
        }
    }

    async fn open(&self, credentials: &CredentialRecord) -> Result<PgConnection, String> {
        PgConnection::connect_with(&self.connect_options(credentials))
            .await
            .map_err(|e| {
                format!(
                    "connect as {} to {}:{}/{}: {}",
                    credentials.username, credentials.host, credentials.port, credentials.dbname, e
                )
            })
    }
}

/// Close explicitly so the server sees a clean Terminate; if the phase is
/// cancelled before this runs, dropping the connection closes the socket.
async fn release(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "database connection did not close cleanly");
    }
}

#[async_trait]
impl CredentialDatabase for PgCredentialDatabase {
    async fn set_password(
        &self,
        login: &CredentialRecord,
        username: &str,
        new_password: &str,
    ) -> Result<(), RotationError> {
        let mut conn = self.open(login).await.map_err(RotationError::DatabaseUpdate)?;

        let statement = sql::alter_password_statement(username, new_password);
        let result = sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&statement)).await;
        release(conn).await;

        result
            .map(|_| ())
            .map_err(|e| RotationError::DatabaseUpdate(format!("ALTER ROLE failed: {}", e)))
    }

    async fn verify(&self, credentials: &CredentialRecord) -> Result<(), RotationError> {
        let mut conn = self
            .open(credentials)
            .await
            .map_err(RotationError::CredentialVerification)?;

        let result = sqlx::query_scalar::<_, i32>("SELECT 1 AS test")
            .fetch_one(&mut conn)
            .await;
        release(conn).await;

        match result {
            Ok(1) => Ok(()),
            Ok(other) => Err(RotationError::CredentialVerification(format!(
                "liveness probe returned {} instead of 1",
                other
            ))),
            Err(e) => Err(RotationError::CredentialVerification(format!(
                "liveness probe failed: {}",
                e
            ))),
        }
    }
}
