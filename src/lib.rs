#![forbid(unsafe_code)]
//! mailcheck_batch: vérification d'adresses e-mail en masse
//!
//! A [`JobOrchestrator`] splits a batch into partitions, runs every address
//! through the verification [`Pipeline`] and hands the undecided ones to the
//! [`BounceProbeEngine`]. Outcomes are merged into a persisted
//! [`VerificationJob`] and streamed as [`ProgressEvent`]s.

pub mod address;
pub mod bounce;
pub mod config;
pub mod jobs;
pub mod outcome;
pub mod pipeline;
pub mod store;

#[cfg(feature = "with-csv")]
pub mod export;
#[cfg(feature = "with-smtp-verify")]
pub mod imap;
#[cfg(feature = "with-mx")]
pub mod mx;
#[cfg(feature = "with-smtp-verify")]
pub mod smtp;

pub use address::{Address, AddressError, Provider, ValidationMode};
pub use bounce::{BatchReport, BounceBatch, BounceError, BounceProbeEngine, SendReport};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use jobs::{
    GlobalStats, JobId, JobOrchestrator, JobStatus, JobStream, OrchestratorError, ProgressEvent,
    VerificationJob,
};
pub use outcome::{Category, CategoryCounts, VerificationOutcome};
pub use pipeline::{Pipeline, Verdict, VerificationStrategy};

#[cfg(feature = "with-mx")]
pub use mx::{Error as MxError, MxRecord, MxStatus, check_mx};
