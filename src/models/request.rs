use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::RotationError;

/// Invocation payload sent by the orchestrating platform.
///
/// `step` stays a raw string so an unknown value surfaces as
/// `InvalidStepError` instead of a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationRequest {
    #[serde(rename = "SecretId")]
    pub secret_id: String,
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "Step")]
    pub step: String,
}

impl RotationRequest {
    pub fn new(secret_id: impl Into<String>, token: impl Into<String>, step: RotationStep) -> Self {
        Self {
            secret_id: secret_id.into(),
            token: token.into(),
            step: step.as_str().to_string(),
        }
    }

    pub fn parsed_step(&self) -> Result<RotationStep, RotationError> {
        self.step.parse()
    }
}

/// The four ordered phases of a rotation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationStep {
    CreateSecret,
    SetSecret,
    TestSecret,
    FinishSecret,
}

impl RotationStep {
    pub const ALL: [RotationStep; 4] = [
        RotationStep::CreateSecret,
        RotationStep::SetSecret,
        RotationStep::TestSecret,
        RotationStep::FinishSecret,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStep::CreateSecret => "createSecret",
            RotationStep::SetSecret => "setSecret",
            RotationStep::TestSecret => "testSecret",
            RotationStep::FinishSecret => "finishSecret",
        }
    }
}

impl fmt::Display for RotationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RotationStep {
    type Err = RotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RotationStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| RotationError::InvalidStep(s.to_string()))
    }
}
