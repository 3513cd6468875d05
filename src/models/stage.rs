use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of a secret version in the rotation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageLabel {
    Current,
    Pending,
    Previous,
}

impl StageLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageLabel::Current => "CURRENT",
            StageLabel::Pending => "PENDING",
            StageLabel::Previous => "PREVIOUS",
        }
    }

    /// Label name as used by AWS Secrets Manager.
    pub fn as_aws_str(&self) -> &'static str {
        match self {
            StageLabel::Current => "AWSCURRENT",
            StageLabel::Pending => "AWSPENDING",
            StageLabel::Previous => "AWSPREVIOUS",
        }
    }
}

impl fmt::Display for StageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageLabel {
    type Err = String;

    /// Accepts both the plain and the `AWS`-prefixed spelling. Custom
    /// labels are not part of the rotation protocol and are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        match upper.strip_prefix("AWS").unwrap_or(&upper) {
            "CURRENT" => Ok(StageLabel::Current),
            "PENDING" => Ok(StageLabel::Pending),
            "PREVIOUS" => Ok(StageLabel::Previous),
            _ => Err(format!("unknown stage label '{}'", s)),
        }
    }
}

/// How a caller addresses a secret version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// Whichever version currently holds the label.
    Stage(StageLabel),
    /// An exact version id, regardless of labels.
    Version(String),
    /// An exact version id that must also hold the label.
    StagedVersion(StageLabel, String),
}

impl VersionSelector {
    pub fn stage(stage: StageLabel) -> Self {
        VersionSelector::Stage(stage)
    }

    pub fn staged(stage: StageLabel, token: impl Into<String>) -> Self {
        VersionSelector::StagedVersion(stage, token.into())
    }

    pub fn version(token: impl Into<String>) -> Self {
        VersionSelector::Version(token.into())
    }

    pub fn stage_label(&self) -> Option<StageLabel> {
        match self {
            VersionSelector::Stage(s) | VersionSelector::StagedVersion(s, _) => Some(*s),
            VersionSelector::Version(_) => None,
        }
    }

    pub fn version_id(&self) -> Option<&str> {
        match self {
            VersionSelector::Version(v) | VersionSelector::StagedVersion(_, v) => Some(v),
            VersionSelector::Stage(_) => None,
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Stage(s) => write!(f, "stage {}", s),
            VersionSelector::Version(v) => write!(f, "version {}", v),
            VersionSelector::StagedVersion(s, v) => write!(f, "version {} at stage {}", v, s),
        }
    }
}

/// A version as returned by a store read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    pub version_id: String,
    pub payload: String,
    pub stages: Vec<StageLabel>,
}

/// Version id → stage labels for one secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecretDescription {
    pub versions: BTreeMap<String, Vec<StageLabel>>,
}

impl SecretDescription {
    /// The version holding `stage`, if any.
    pub fn holder_of(&self, stage: StageLabel) -> Option<&str> {
        self.versions
            .iter()
            .find(|(_, stages)| stages.contains(&stage))
            .map(|(id, _)| id.as_str())
    }

    pub fn stages_of(&self, version_id: &str) -> Option<&[StageLabel]> {
        self.versions.get(version_id).map(Vec::as_slice)
    }

    /// Number of versions carrying `stage`. Used to check exclusivity.
    pub fn count_with(&self, stage: StageLabel) -> usize {
        self.versions
            .values()
            .filter(|stages| stages.contains(&stage))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_aws_labels() {
        assert_eq!("CURRENT".parse::<StageLabel>().unwrap(), StageLabel::Current);
        assert_eq!("AWSPENDING".parse::<StageLabel>().unwrap(), StageLabel::Pending);
        assert_eq!("awsprevious".parse::<StageLabel>().unwrap(), StageLabel::Previous);
        assert!("STAGING".parse::<StageLabel>().is_err());
    }

    #[test]
    fn test_description_lookup() {
        let mut desc = SecretDescription::default();
        desc.versions.insert("v1".into(), vec![StageLabel::Previous]);
        desc.versions.insert("v2".into(), vec![StageLabel::Current]);
        desc.versions.insert("v3".into(), vec![StageLabel::Pending]);

        assert_eq!(desc.holder_of(StageLabel::Current), Some("v2"));
        assert_eq!(desc.holder_of(StageLabel::Pending), Some("v3"));
        assert_eq!(desc.stages_of("v1"), Some(&[StageLabel::Previous][..]));
        assert_eq!(desc.count_with(StageLabel::Current), 1);
        assert!(desc.stages_of("v9").is_none());
    }
}
