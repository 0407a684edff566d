// Restoration job record and its status machine
//
// Decision: transitions are checked here once and reused by every store
// implementation, so in-memory and Postgres behave the same on replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Job lifecycle: pending → processing → {completed | failed}
///
/// A job may also go straight from pending to failed: when the first step
/// never manages to mark it processing, compensation fails it from pending.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses a job may move to `self` from
    pub fn allowed_from(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[],
            Self::Processing => &[Self::Pending],
            Self::Completed => &[Self::Processing],
            Self::Failed => &[Self::Pending, Self::Processing],
        }
    }

    /// Check a transition from `self` to `next`.
    ///
    /// Returns `Ok(true)` when the status changes, `Ok(false)` when the job is
    /// already in `next` (a replayed step), and an error for anything that
    /// would move backwards or out of a terminal state.
    pub fn transition_to(&self, next: JobStatus) -> Result<bool, StoreError> {
        if *self == next {
            return Ok(false);
        }
        if next.allowed_from().contains(self) {
            return Ok(true);
        }
        Err(StoreError::InvalidTransition {
            from: *self,
            to: next,
        })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::Serialization(format!("unknown job status: {other}"))),
        }
    }
}

/// One restoration attempt for a single uploaded image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestorationJob {
    pub id: Uuid,
    pub image_id: String,
    pub user_id: String,
    pub preset_id: String,
    pub status: JobStatus,
    /// Number of results the image already had when this job was dispatched
    pub reroll_number: i32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl RestorationJob {
    pub fn is_reroll(&self) -> bool {
        self.reroll_number > 0
    }
}

/// Fields supplied by the dispatcher when a job is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub id: Uuid,
    pub image_id: String,
    pub user_id: String,
    pub preset_id: String,
    pub reroll_number: i32,
}

impl NewJob {
    pub fn into_job(self, created_at: DateTime<Utc>) -> RestorationJob {
        RestorationJob {
            id: self.id,
            image_id: self.image_id,
            user_id: self.user_id,
            preset_id: self.preset_id,
            status: JobStatus::Pending,
            reroll_number: self.reroll_number,
            created_at,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(JobStatus::Pending.transition_to(JobStatus::Processing).unwrap());
        assert!(JobStatus::Processing.transition_to(JobStatus::Completed).unwrap());
        assert!(JobStatus::Processing.transition_to(JobStatus::Failed).unwrap());
    }

    #[test]
    fn test_pending_job_can_fail_without_processing() {
        assert!(JobStatus::Pending.transition_to(JobStatus::Failed).unwrap());
        assert_eq!(
            JobStatus::Failed.allowed_from(),
            &[JobStatus::Pending, JobStatus::Processing]
        );
        assert!(JobStatus::Failed.transition_to(JobStatus::Pending).is_err());
    }

    #[test]
    fn test_replayed_transition_is_noop() {
        assert!(!JobStatus::Processing.transition_to(JobStatus::Processing).unwrap());
        assert!(!JobStatus::Completed.transition_to(JobStatus::Completed).unwrap());
        assert!(!JobStatus::Failed.transition_to(JobStatus::Failed).unwrap());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for target in [JobStatus::Pending, JobStatus::Processing, JobStatus::Failed] {
            assert!(JobStatus::Completed.transition_to(target).is_err());
        }
        for target in [JobStatus::Pending, JobStatus::Processing, JobStatus::Completed] {
            assert!(JobStatus::Failed.transition_to(target).is_err());
        }
    }

    #[test]
    fn test_no_skipping_processing() {
        let err = JobStatus::Pending
            .transition_to(JobStatus::Completed)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        ));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("processing".parse::<JobStatus>().unwrap(), JobStatus::Processing);
        assert!("done".parse::<JobStatus>().is_err());
    }
}
