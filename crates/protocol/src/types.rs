use serde::{Deserialize, Serialize};

/// Status of a Prism asynchronous task.
///
/// Prism may introduce new transient states; anything unrecognised is kept
/// verbatim in [`TaskStatus::Other`] rather than failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl TaskStatus {
    /// Returns `true` for `SUCCEEDED` and `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "QUEUED" => Self::Queued,
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(s: TaskStatus) -> Self {
        s.as_str().to_string()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to another Prism entity (`{kind, uuid, name}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityReference {
    pub fn new(kind: &str, uuid: &str) -> Self {
        Self {
            kind: kind.to_string(),
            uuid: uuid.to_string(),
            name: None,
        }
    }
}

/// Checksum block used when registering an OVA upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub checksum_algorithm: String,
    pub checksum_value: String,
}

impl Checksum {
    /// SHA-1 checksum with the given hex value.
    pub fn sha1(value: &str) -> Self {
        Self {
            checksum_algorithm: crate::constants::CHECKSUM_ALGORITHM.to_string(),
            checksum_value: value.to_string(),
        }
    }
}
