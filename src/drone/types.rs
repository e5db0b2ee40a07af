use serde::{Deserialize, Serialize};
use std::fmt;

/// Build status as reported by the Drone API.
///
/// Only the statuses the evaluation wait reacts to get their own variant;
/// everything else is carried verbatim in [`BuildStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BuildStatus {
    #[default]
    Pending,
    Running,
    Success,
    Other(String),
}

impl BuildStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Other(status) => status,
        }
    }

    /// Returns `true` while the build has not reached a terminal state.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, BuildStatus::Pending | BuildStatus::Running)
    }
}

impl From<&str> for BuildStatus {
    fn from(value: &str) -> Self {
        match value {
            "pending" => BuildStatus::Pending,
            "running" => BuildStatus::Running,
            "success" => BuildStatus::Success,
            other => BuildStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for BuildStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BuildStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(BuildStatus::from(raw.as_str()))
    }
}

/// Build record returned by the create and get endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub id: i64,
    pub number: i64,
    #[serde(default)]
    pub status: BuildStatus,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

/// A stage of a build; steps are listed in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub number: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub number: i64,
    #[serde(default)]
    pub name: String,
}

/// One line of step output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    #[serde(rename = "pos", alias = "number", default)]
    pub number: i64,
    #[serde(rename = "out", alias = "message", default)]
    pub message: String,
    #[serde(rename = "time", default)]
    pub timestamp: i64,
}

impl LogLine {
    pub fn new(number: i64, message: impl Into<String>) -> Self {
        LogLine {
            number,
            message: message.into(),
            timestamp: 0,
        }
    }
}
