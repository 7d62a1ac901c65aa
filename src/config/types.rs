use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::ValidationMode;
use crate::jobs::ScalingPolicy;
#[cfg(feature = "with-smtp-verify")]
use crate::smtp::SmtpProbeOptions;

/// Outbound/inbound mail account used for bounce probes.
///
/// `credential` never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Account {
    pub address: String,
    pub credential: String,
    pub outbound_host: String,
    #[serde(default = "default_outbound_port")]
    pub outbound_port: u16,
    pub inbound_host: String,
    #[serde(default = "default_inbound_port")]
    pub inbound_port: u16,
}

fn default_outbound_port() -> u16 {
    587
}

fn default_inbound_port() -> u16 {
    993
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("credential", &"<redacted>")
            .field("outbound_host", &self.outbound_host)
            .field("outbound_port", &self.outbound_port)
            .field("inbound_host", &self.inbound_host)
            .field("inbound_port", &self.inbound_port)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    pub data_dir: PathBuf,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Supervisor timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Sleep between two drains of the outcome channel.
    pub poll_interval: Duration,
    /// Hard limit for a whole job.
    pub max_wait: Duration,
    /// Force-resolve when no outcome arrived for this long.
    pub inactivity: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(30 * 60),
            inactivity: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceOptions {
    /// Persisted checks after which unmatched pending addresses become valid.
    pub escalation_attempts: u32,
    /// Time since the first check after which the same happens.
    pub escalation_window: Duration,
    pub max_concurrent_sends: usize,
    /// Per-connection timeout for SMTP submission and IMAP scans.
    pub connect_timeout: Duration,
    pub subject_prefix: String,
}

impl Default for BounceOptions {
    fn default() -> Self {
        Self {
            escalation_attempts: 3,
            escalation_window: Duration::from_secs(24 * 60 * 60),
            max_concurrent_sends: 4,
            connect_timeout: Duration::from_secs(30),
            subject_prefix: "Email Verification".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeuristicOptions {
    pub role_locals: Vec<String>,
    pub disposable_domains: Vec<String>,
    pub flag_confusables: bool,
}

impl Default for HeuristicOptions {
    fn default() -> Self {
        let role_locals = [
            "admin",
            "administrator",
            "contact",
            "hello",
            "help",
            "info",
            "marketing",
            "noreply",
            "no-reply",
            "office",
            "sales",
            "support",
            "webmaster",
        ];
        let disposable_domains = [
            "10minutemail.com",
            "guerrillamail.com",
            "mailinator.com",
            "maildrop.cc",
            "sharklasers.com",
            "tempmail.com",
            "temp-mail.org",
            "throwawaymail.com",
            "trashmail.com",
            "yopmail.com",
        ];
        Self {
            role_locals: role_locals.iter().map(|s| s.to_string()).collect(),
            disposable_domains: disposable_domains.iter().map(|s| s.to_string()).collect(),
            flag_confusables: true,
        }
    }
}

/// Which stages run, and how strict the syntax stage is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub validation_mode: ValidationMode,
    pub mx: bool,
    pub handshake: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            validation_mode: ValidationMode::Strict,
            mx: true,
            handshake: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub storage: StorageOptions,
    pub scaling: ScalingPolicy,
    pub orchestrator: OrchestratorOptions,
    pub bounce: BounceOptions,
    pub heuristics: HeuristicOptions,
    pub pipeline: PipelineOptions,
    #[cfg(feature = "with-smtp-verify")]
    pub handshake: SmtpProbeOptions,
    pub accounts: Vec<Account>,
}
