use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroize;

/// Database credential stored as the JSON body of a secret version.
///
/// Field names are the wire contract with the connection layer and must
/// not be renamed. Any extra keys the secret carries (engine, cluster id,
/// ...) are preserved and copied forward on rotation.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CredentialRecord {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        dbname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            dbname: dbname.into(),
            username: username.into(),
            password: password.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Parse and validate a secret body.
    pub fn from_json(payload: &str) -> Result<Self, String> {
        let record: CredentialRecord =
            serde_json::from_str(payload).map_err(|e| e.to_string())?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// All fields required; strings non-empty, port positive.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("host", &self.host),
            ("dbname", &self.dbname),
            ("username", &self.username),
            ("password", &self.password),
        ] {
            if value.is_empty() {
                return Err(format!("field '{}' must not be empty", name));
            }
        }
        if self.port == 0 {
            return Err("field 'port' must be a positive integer".to_string());
        }
        Ok(())
    }

    /// Copy of this record with a different password; every other field is
    /// carried over unchanged.
    pub fn with_password(&self, password: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.password.zeroize();
        next.password = password.into();
        next
    }
}

impl Drop for CredentialRecord {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Accepts `5432` or `"5432"`; RDS-style secrets use both.
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    let raw = match Port::deserialize(deserializer)? {
        Port::Number(n) => n,
        Port::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", s)))?,
    };
    u16::try_from(raw).map_err(|_| serde::de::Error::custom(format!("port {} out of range", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_wire_format() {
        let record = CredentialRecord::from_json(
            r#"{"host":"db","port":5432,"dbname":"app","username":"svc","password":"old"}"#,
        )
        .unwrap();
        assert_eq!(record.host, "db");
        assert_eq!(record.port, 5432);
        assert_eq!(record.dbname, "app");
        assert_eq!(record.username, "svc");
        assert_eq!(record.password, "old");
    }

    #[test]
    fn test_port_as_string_is_accepted() {
        let record = CredentialRecord::from_json(
            r#"{"host":"db","port":"6543","dbname":"app","username":"svc","password":"p"}"#,
        )
        .unwrap();
        assert_eq!(record.port, 6543);
    }

    #[test]
    fn test_rejects_missing_and_empty_fields() {
        assert!(CredentialRecord::from_json(r#"{"host":"db","port":5432}"#).is_err());
        let err = CredentialRecord::from_json(
            r#"{"host":"","port":5432,"dbname":"app","username":"svc","password":"p"}"#,
        )
        .unwrap_err();
        assert!(err.contains("host"), "unexpected error: {}", err);
        assert!(CredentialRecord::from_json(
            r#"{"host":"db","port":0,"dbname":"app","username":"svc","password":"p"}"#,
        )
        .is_err());
    }

    #[test]
    fn test_with_password_keeps_extra_fields() {
        let record = CredentialRecord::from_json(
            r#"{"host":"db","port":5432,"dbname":"app","username":"svc","password":"old","engine":"postgres"}"#,
        )
        .unwrap();
        let next = record.with_password("new");
        assert_eq!(next.password, "new");
        assert_eq!(next.username, "svc");
        assert_eq!(next.extra["engine"], "postgres");

        let json: serde_json::Value = serde_json::from_str(&next.to_json().unwrap()).unwrap();
        assert_eq!(json["engine"], "postgres");
        assert_eq!(json["dbname"], "app");
    }

    #[test]
    fn test_debug_redacts_password() {
        let record = CredentialRecord::new("db", 5432, "app", "svc", "hunter2");
        let printed = format!("{:?}", record);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
    }
}
