use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Submission state of a match.
///
/// `Created → Submitting → Submitted | Failed`. `Submitted` is terminal;
/// `Failed` can be retried by submitting again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingStatus {
    #[default]
    Created,
    Submitting,
    Submitted,
    Failed,
}

impl MappingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingStatus::Created => "created",
            MappingStatus::Submitting => "submitting",
            MappingStatus::Submitted => "submitted",
            MappingStatus::Failed => "failed",
        }
    }

    /// Whether a new submission may start from this state. An in-flight
    /// submission blocks a second one for the same match.
    pub fn accepts_submission(self) -> bool {
        match self {
            MappingStatus::Created | MappingStatus::Failed => true,
            MappingStatus::Submitting | MappingStatus::Submitted => false,
        }
    }
}

impl std::fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The chain/application pair allocated for a match plus its submission record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMapping {
    pub chain_id: String,
    pub app_id: String,
    #[serde(default)]
    pub status: MappingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_op_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

impl MatchMapping {
    pub fn created(chain_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            app_id: app_id.into(),
            status: MappingStatus::Created,
            submitted_op_id: None,
            submitted_at: None,
        }
    }
}
