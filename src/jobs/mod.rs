//! Batch verification jobs: partitioning, workers, supervision, persisted
//! status and the progress stream.

mod error;
mod events;
mod orchestrator;
mod partition;
mod stats;
mod store;
mod types;
pub(crate) mod worker;

pub use error::OrchestratorError;
pub use events::{FinishedEvent, OutcomeEvent, ProgressEvent, StartedEvent};
pub use orchestrator::{JobOrchestrator, JobStream};
pub use partition::{ScalingPolicy, ScalingTier};
pub use stats::{GlobalStats, HistoryEntry, history};
pub use store::JobStatusStore;
pub use types::{JobId, JobStatus, JobSummary, VerificationJob, new_job_id};
