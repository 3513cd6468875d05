//! AWS Secrets Manager backend over the JSON-1.1 HTTP API.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::sigv4::{self, AwsCredentials};
use super::{store_error, SecretStore};
use crate::errors::RotationError;
use crate::models::stage::{SecretDescription, StageLabel, StoredVersion, VersionSelector};

const SERVICE: &str = "secretsmanager";

/// Failure from a single Secrets Manager call, before mapping to the
/// rotation taxonomy (the right mapping depends on the operation).
#[derive(Debug)]
enum AwsCallError {
    Service { code: String, message: String },
    Transport(String),
}

impl AwsCallError {
    fn code(&self) -> Option<&str> {
        match self {
            AwsCallError::Service { code, .. } => Some(code),
            AwsCallError::Transport(_) => None,
        }
    }
}

impl std::fmt::Display for AwsCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AwsCallError::Service { code, message } => write!(f, "{}: {}", code, message),
            AwsCallError::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueResponse {
    version_id: String,
    secret_string: Option<String>,
    #[serde(default)]
    version_stages: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSecretResponse {
    #[serde(default)]
    version_ids_to_stages: HashMap<String, Vec<String>>,
}

/// Known rotation labels only; custom labels are ignored.
fn known_labels(raw: &[String]) -> Vec<StageLabel> {
    let mut labels: Vec<StageLabel> = raw.iter().filter_map(|s| s.parse().ok()).collect();
    labels.sort();
    labels
}

pub struct AwsSecretsManager {
    client: reqwest::Client,
    endpoint: String,
    region: String,
    credentials: AwsCredentials,
}

impl AwsSecretsManager {
    pub fn new(
        region: &str,
        credentials: AwsCredentials,
        endpoint: Option<String>,
    ) -> anyhow::Result<Self> {
        let endpoint = endpoint
            .unwrap_or_else(|| format!("https://{}.{}.amazonaws.com", SERVICE, region))
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .user_agent("rotator/0.1")
            .build()?;
        Ok(Self {
            client,
            endpoint,
            region: region.to_string(),
            credentials,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<T, AwsCallError> {
        let url = format!("{}/", self.endpoint);
        let payload = serde_json::to_vec(&body).map_err(|e| AwsCallError::Transport(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-amz-json-1.1"));
        let target = HeaderValue::from_str(&format!("secretsmanager.{}", operation))
            .map_err(|e| AwsCallError::Transport(e.to_string()))?;
        headers.insert("x-amz-target", target);
        sigv4::sign_request(
            "POST",
            &url,
            &mut headers,
            &payload,
            &self.credentials,
            &self.region,
            SERVICE,
            chrono::Utc::now(),
        )
        .map_err(|e| AwsCallError::Transport(e.to_string()))?;

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .body(payload)
            .send()
            .await
            .map_err(|e| AwsCallError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AwsCallError::Transport(e.to_string()))?;

        if !status.is_success() {
            let parsed: ServiceErrorBody =
                serde_json::from_str(&text).unwrap_or(ServiceErrorBody {
                    error_type: String::new(),
                    message: text.clone(),
                });
            let code = parsed
                .error_type
                .rsplit('#')
                .next()
                .filter(|c| !c.is_empty())
                .unwrap_or("UnknownError")
                .to_string();
            debug!(operation, %status, code = %code, "secrets manager call failed");
            return Err(AwsCallError::Service {
                code,
                message: parsed.message,
            });
        }

        // PutSecretValue and friends may answer with an empty body
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| AwsCallError::Transport(e.to_string()))
    }
}

#[async_trait]
impl SecretStore for AwsSecretsManager {
    async fn get_version(
        &self,
        secret_id: &str,
        selector: &VersionSelector,
    ) -> Result<Option<StoredVersion>, RotationError> {
        let mut body = json!({ "SecretId": secret_id });
        if let Some(stage) = selector.stage_label() {
            body["VersionStage"] = json!(stage.as_aws_str());
        }
        if let Some(version_id) = selector.version_id() {
            body["VersionId"] = json!(version_id);
        }

        match self.call::<GetSecretValueResponse>("GetSecretValue", body).await {
            Ok(resp) => {
                let payload = resp.secret_string.ok_or_else(|| {
                    store_error(format!("secret {} version {} has no SecretString", secret_id, resp.version_id))
                })?;
                Ok(Some(StoredVersion {
                    stages: known_labels(&resp.version_stages),
                    version_id: resp.version_id,
                    payload,
                }))
            }
            Err(e) if e.code() == Some("ResourceNotFoundException") => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn put_version(
        &self,
        secret_id: &str,
        version_id: &str,
        payload: &str,
        stages: &[StageLabel],
    ) -> Result<(), RotationError> {
        let labels: Vec<&str> = stages.iter().map(StageLabel::as_aws_str).collect();
        let body = json!({
            "SecretId": secret_id,
            "ClientRequestToken": version_id,
            "SecretString": payload,
            "VersionStages": labels,
        });

        match self.call::<serde_json::Value>("PutSecretValue", body).await {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("ResourceExistsException") => {
                Err(RotationError::VersionConflict {
                    secret_id: secret_id.to_string(),
                    token: version_id.to_string(),
                })
            }
            Err(e) => Err(store_error(e)),
        }
    }

    async fn describe(&self, secret_id: &str) -> Result<SecretDescription, RotationError> {
        let body = json!({ "SecretId": secret_id });
        match self.call::<DescribeSecretResponse>("DescribeSecret", body).await {
            Ok(resp) => {
                let mut description = SecretDescription::default();
                for (version_id, raw) in resp.version_ids_to_stages {
                    let labels = known_labels(&raw);
                    if !labels.is_empty() {
                        description.versions.insert(version_id, labels);
                    }
                }
                Ok(description)
            }
            Err(e) if e.code() == Some("ResourceNotFoundException") => {
                Ok(SecretDescription::default())
            }
            Err(e) => Err(store_error(e)),
        }
    }

    async fn move_current(
        &self,
        secret_id: &str,
        version_id: &str,
        expected_current: &str,
    ) -> Result<(), RotationError> {
        let body = json!({
            "SecretId": secret_id,
            "VersionStage": StageLabel::Current.as_aws_str(),
            "MoveToVersionId": version_id,
            "RemoveFromVersionId": expected_current,
        });

        match self.call::<serde_json::Value>("UpdateSecretVersionStage", body).await {
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.code(),
                    Some("InvalidParameterException") | Some("InvalidRequestException")
                ) =>
            {
                return Err(RotationError::promotion_conflict(secret_id, version_id, e.to_string()));
            }
            Err(e) if e.code() == Some("ResourceNotFoundException") => {
                return Err(RotationError::not_found(
                    secret_id,
                    VersionSelector::version(version_id),
                ));
            }
            Err(e) => return Err(store_error(e)),
        }

        // CURRENT has moved; the PENDING label on the promoted version is
        // cosmetic from here on, so a failure to clear it is only logged.
        let clear_pending = json!({
            "SecretId": secret_id,
            "VersionStage": StageLabel::Pending.as_aws_str(),
            "RemoveFromVersionId": version_id,
        });
        if let Err(e) = self
            .call::<serde_json::Value>("UpdateSecretVersionStage", clear_pending)
            .await
        {
            warn!(secret_id, version_id, error = %e, "failed to clear AWSPENDING after promotion");
        }
        Ok(())
    }
}
