//! Remote build/template statuses and build-log severities.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Status reported for a build. Unknown strings are preserved so new
/// server-side states keep polling instead of failing to decode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildStatus {
    Waiting,
    Building,
    Publishing,
    Active,
    Completed,
    Success,
    Failed,
    Other(String),
}

impl BuildStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "waiting" => Self::Waiting,
            "building" => Self::Building,
            "publishing" => Self::Publishing,
            "active" => Self::Active,
            "completed" => Self::Completed,
            "success" => Self::Success,
            "failed" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Waiting => "waiting",
            Self::Building => "building",
            Self::Publishing => "publishing",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Other(raw) => raw.as_str(),
        }
    }

    /// States that end build-status polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::Completed | Self::Success | Self::Failed
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BuildStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BuildStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Status of the published template, observed after the build finished.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TemplateStatus {
    pub status: BuildStatus,
    pub is_active: bool,
}

impl TemplateStatus {
    /// Exactly `active` with the readiness flag set.
    pub fn is_confirmed_active(&self) -> bool {
        self.status == BuildStatus::Active && self.is_active
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Severity from substring markers: error wins over warn, default info.
    pub fn classify(line: &str) -> Self {
        let lowered = line.to_ascii_lowercase();
        if lowered.contains("error") {
            Self::Error
        } else if lowered.contains("warn") {
            Self::Warn
        } else {
            Self::Info
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}
