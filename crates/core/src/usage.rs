use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    Upload,
    Restore,
    Reroll,
    Download,
}

impl UsageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Restore => "restore",
            Self::Reroll => "reroll",
            Self::Download => "download",
        }
    }

    /// Action recorded for a completed job with the given reroll number
    pub fn for_reroll_number(reroll_number: i32) -> Self {
        if reroll_number > 0 {
            Self::Reroll
        } else {
            Self::Restore
        }
    }
}

impl std::fmt::Display for UsageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UsageAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "restore" => Ok(Self::Restore),
            "reroll" => Ok(Self::Reroll),
            "download" => Ok(Self::Download),
            other => Err(format!("unknown usage action: {other}")),
        }
    }
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub action: UsageAction,
    pub credits_consumed: i32,
    pub job_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert payload. Entries with a `job_id` are unique per (job_id, action).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUsageEntry {
    pub user_id: String,
    pub action: UsageAction,
    pub credits_consumed: i32,
    pub job_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

impl NewUsageEntry {
    pub fn into_entry(self, id: Uuid, created_at: DateTime<Utc>) -> UsageLogEntry {
        UsageLogEntry {
            id,
            user_id: self.user_id,
            action: self.action,
            credits_consumed: self.credits_consumed,
            job_id: self.job_id,
            metadata: self.metadata,
            created_at,
        }
    }
}
