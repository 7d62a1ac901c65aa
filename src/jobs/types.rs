use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::outcome::{Category, CategoryCounts, VerificationOutcome};

pub type JobId = String;

/// `job_<unix>_<8 hex>`.
pub fn new_job_id(now: DateTime<Utc>) -> JobId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("job_{}_{}", now.timestamp(), &suffix[..8])
}

/// Lifecycle of a job. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Started => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationJob {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Distinct addresses, in submission order.
    pub addresses: Vec<Address>,
    /// Worker partition sizes.
    #[serde(default)]
    pub partitions: Vec<usize>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub counts: CategoryCounts,
    pub outcomes: BTreeMap<Address, VerificationOutcome>,
    /// Bounce batch holding this job's deferred addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounce_batch: Option<String>,
}

impl VerificationJob {
    pub fn new(id: impl Into<JobId>, addresses: Vec<Address>, started: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            label: None,
            addresses,
            partitions: Vec::new(),
            status: JobStatus::Started,
            error: None,
            started,
            finished: None,
            counts: CategoryCounts::default(),
            outcomes: BTreeMap::new(),
            bounce_batch: None,
        }
    }

    pub fn total(&self) -> usize {
        self.addresses.len()
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Submitted addresses that have no outcome yet.
    pub fn unresolved(&self) -> impl Iterator<Item = &Address> {
        self.addresses
            .iter()
            .filter(|address| !self.outcomes.contains_key(*address))
    }

    /// Records `outcome` unless the address already has one or the job is
    /// over. Returns whether anything changed.
    pub fn merge(&mut self, outcome: VerificationOutcome) -> bool {
        if self.is_terminal() || self.outcomes.contains_key(&outcome.email) {
            return false;
        }
        if self.bounce_batch.is_none() {
            self.bounce_batch = outcome.bounce_batch.clone();
        }
        self.counts.increment(outcome.category);
        self.outcomes.insert(outcome.email.clone(), outcome);
        true
    }

    /// Moves to `next` when that is a forward step. Terminal states also set
    /// `finished`.
    pub fn advance(&mut self, next: JobStatus, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished = Some(now);
        }
        true
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> bool {
        let moved = self.advance(JobStatus::Failed, now);
        if moved {
            self.error = Some(message.into());
        }
        moved
    }

    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &VerificationOutcome> {
        self.outcomes
            .values()
            .filter(move |outcome| outcome.category == category)
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            label: self.label.clone(),
            status: self.status,
            total_emails: self.total(),
            verified_emails: self.processed(),
            results_by_category: self.counts,
            started: self.started,
            finished: self.finished,
        }
    }
}

/// One line of the job catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: JobStatus,
    pub total_emails: usize,
    pub verified_emails: usize,
    pub results_by_category: CategoryCounts,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
}
