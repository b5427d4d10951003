use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::{DocumentId, DocumentMetadata};
use crate::extract::FileType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    InProgress,
    RetryWait,
    Dead,
}

impl JobState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RetryWait => "retry_wait",
            Self::Dead => "dead",
        }
    }

    /// States that count toward the one-job-per-document limit.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "retry_wait" => Ok(Self::RetryWait),
            "dead" => Ok(Self::Dead),
            _ => Err(crate::Error::InvalidJobState(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationJob {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub file_path: PathBuf,
    /// Resolved from the declared type; `None` when the declared type is not supported
    pub file_type: Option<FileType>,
    pub metadata: DocumentMetadata,
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far
    pub attempt: u32,
    pub state: JobState,
    pub last_error: Option<String>,
}

impl ModerationJob {
    #[must_use]
    pub fn new(document_id: DocumentId, file_path: PathBuf, metadata: DocumentMetadata) -> Self {
        let metadata = metadata.or_file_name_from(&file_path);
        Self {
            id: Uuid::now_v7(),
            document_id,
            file_type: FileType::from_declared(&metadata.file_type),
            file_path,
            metadata,
            enqueued_at: Utc::now(),
            attempt: 0,
            state: JobState::Queued,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(Uuid),
    /// The document already has an active job; the request was ignored
    Duplicate(Uuid),
}

impl EnqueueOutcome {
    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        match self {
            Self::Enqueued(id) | Self::Duplicate(id) => *id,
        }
    }

    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: u64,
    pub in_progress: u64,
    pub retry_wait: u64,
    pub dead: u64,
}

impl QueueStats {
    /// Jobs that have not yet reached a terminal state.
    #[must_use]
    pub const fn active(&self) -> u64 {
        self.queued + self.in_progress + self.retry_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_parse() {
        for state in [
            JobState::Queued,
            JobState::InProgress,
            JobState::RetryWait,
            JobState::Dead,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("completed".parse::<JobState>().is_err());
    }

    #[test]
    fn test_only_dead_jobs_release_the_document() {
        assert!(JobState::Queued.is_active());
        assert!(JobState::InProgress.is_active());
        assert!(JobState::RetryWait.is_active());
        assert!(!JobState::Dead.is_active());
    }

    #[test]
    fn test_new_job_resolves_type_and_name() {
        let job = ModerationJob::new(
            "doc-1".into(),
            PathBuf::from("/uploads/abc.pdf"),
            DocumentMetadata::new("application/pdf"),
        );
        assert_eq!(job.file_type, Some(FileType::Pdf));
        assert_eq!(job.metadata.file_name.as_deref(), Some("abc.pdf"));
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempt, 0);

        let job = ModerationJob::new(
            "doc-2".into(),
            PathBuf::from("/uploads/setup.exe"),
            DocumentMetadata::new("exe"),
        );
        assert_eq!(job.file_type, None);
    }
}
