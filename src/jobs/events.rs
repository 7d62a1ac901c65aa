use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::address::{Address, Provider};
use crate::jobs::types::{JobId, JobStatus, VerificationJob};
use crate::outcome::{Category, CategoryCounts, VerificationOutcome};

/// One record of a job's progress stream (one JSON object per line).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Started(StartedEvent),
    Outcome(OutcomeEvent),
    Finished(FinishedEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_emails: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeEvent {
    pub job_id: JobId,
    pub email: Address,
    pub status: Category,
    pub reason: String,
    pub provider: Provider,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedEvent {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_emails: usize,
    pub verified_emails: usize,
    pub results_by_category: CategoryCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn started(job: &VerificationJob) -> Self {
        Self::Started(StartedEvent {
            job_id: job.id.clone(),
            status: JobStatus::Started,
            total_emails: job.total(),
        })
    }

    pub fn outcome(job_id: &str, outcome: &VerificationOutcome) -> Self {
        Self::Outcome(OutcomeEvent {
            job_id: job_id.to_string(),
            email: outcome.email.clone(),
            status: outcome.category,
            reason: outcome.reason.clone(),
            provider: outcome.provider,
            timestamp: outcome.timestamp,
        })
    }

    pub fn finished(job: &VerificationJob) -> Self {
        Self::Finished(FinishedEvent {
            job_id: job.id.clone(),
            status: job.status,
            total_emails: job.total(),
            verified_emails: job.processed(),
            results_by_category: job.counts,
            error: job.error.clone(),
        })
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::Started(e) => &e.job_id,
            Self::Outcome(e) => &e.job_id,
            Self::Finished(e) => &e.job_id,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}
