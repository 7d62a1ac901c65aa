//! TOML file format and the builder that merges it over the defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::{Account, Config, ConfigError};
use crate::address::ValidationMode;
use crate::jobs::{ScalingPolicy, ScalingTier};
#[cfg(feature = "with-smtp-verify")]
use crate::smtp::SmtpProbeOptions;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ConfigFile {
    storage: StorageSection,
    scaling: ScalingSection,
    timeouts: TimeoutsSection,
    bounce: BounceSection,
    heuristics: HeuristicsSection,
    pipeline: PipelineSection,
    #[cfg(feature = "with-smtp-verify")]
    handshake: Option<SmtpProbeOptions>,
    accounts: Vec<Account>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StorageSection {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ScalingSection {
    tiers: Option<Vec<ScalingTier>>,
    overflow_partitions: Option<usize>,
    max_partitions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TimeoutsSection {
    poll_interval_ms: Option<u64>,
    max_job_wait_secs: Option<u64>,
    inactivity_secs: Option<u64>,
    connect_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BounceSection {
    escalation_attempts: Option<u32>,
    escalation_window_hours: Option<u64>,
    max_concurrent_sends: Option<usize>,
    subject_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HeuristicsSection {
    role_locals: Option<Vec<String>>,
    disposable_domains: Option<Vec<String>>,
    flag_confusables: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PipelineSection {
    validation_mode: Option<ValidationMode>,
    mx: Option<bool>,
    handshake: Option<bool>,
}

pub(crate) fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    debug!(path = %path.display(), "reading configuration file");
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn parse_config(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

pub(crate) fn apply_file_config(config: &mut Config, file: ConfigFile) -> Result<(), ConfigError> {
    if let Some(dir) = file.storage.data_dir {
        config.storage.data_dir = dir;
    }

    let scaling = file.scaling;
    if scaling.tiers.is_some()
        || scaling.overflow_partitions.is_some()
        || scaling.max_partitions.is_some()
    {
        let current = &config.scaling;
        config.scaling = ScalingPolicy::new(
            scaling.tiers.unwrap_or_else(|| current.tiers().to_vec()),
            scaling
                .overflow_partitions
                .unwrap_or(current.overflow_partitions()),
            scaling.max_partitions.unwrap_or(current.max_partitions()),
        )?;
    }

    let timeouts = file.timeouts;
    if let Some(ms) = timeouts.poll_interval_ms {
        config.orchestrator.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = timeouts.max_job_wait_secs {
        config.orchestrator.max_wait = Duration::from_secs(secs);
    }
    if let Some(secs) = timeouts.inactivity_secs {
        config.orchestrator.inactivity = Duration::from_secs(secs);
    }
    if let Some(secs) = timeouts.connect_secs {
        config.bounce.connect_timeout = Duration::from_secs(secs);
    }

    let bounce = file.bounce;
    if let Some(attempts) = bounce.escalation_attempts {
        config.bounce.escalation_attempts = attempts;
    }
    if let Some(hours) = bounce.escalation_window_hours {
        config.bounce.escalation_window = Duration::from_secs(hours * 3600);
    }
    if let Some(sends) = bounce.max_concurrent_sends {
        config.bounce.max_concurrent_sends = sends;
    }
    if let Some(prefix) = bounce.subject_prefix {
        config.bounce.subject_prefix = prefix;
    }

    let heuristics = file.heuristics;
    if let Some(roles) = heuristics.role_locals {
        config.heuristics.role_locals = roles.iter().map(|r| r.to_lowercase()).collect();
    }
    if let Some(domains) = heuristics.disposable_domains {
        config.heuristics.disposable_domains =
            domains.iter().map(|d| d.to_lowercase()).collect();
    }
    if let Some(flag) = heuristics.flag_confusables {
        config.heuristics.flag_confusables = flag;
    }

    let pipeline = file.pipeline;
    if let Some(mode) = pipeline.validation_mode {
        config.pipeline.validation_mode = mode;
    }
    if let Some(mx) = pipeline.mx {
        config.pipeline.mx = mx;
    }
    if let Some(handshake) = pipeline.handshake {
        config.pipeline.handshake = handshake;
    }

    #[cfg(feature = "with-smtp-verify")]
    {
        if let Some(handshake) = file.handshake {
            config.handshake = handshake;
        }
    }

    if !file.accounts.is_empty() {
        config.accounts = file.accounts;
    }
    Ok(())
}

pub(crate) fn validate(config: &Config) -> Result<(), ConfigError> {
    let orchestrator = &config.orchestrator;
    if orchestrator.poll_interval.is_zero() {
        return Err(ConfigError::invalid("poll interval must be non-zero"));
    }
    if orchestrator.max_wait.is_zero() || orchestrator.inactivity.is_zero() {
        return Err(ConfigError::invalid(
            "max job wait and inactivity window must be non-zero",
        ));
    }
    if config.bounce.escalation_attempts == 0 {
        return Err(ConfigError::invalid("escalation attempts must be at least 1"));
    }
    if config.bounce.max_concurrent_sends == 0 {
        return Err(ConfigError::invalid("max concurrent sends must be at least 1"));
    }
    if config.bounce.connect_timeout.is_zero() {
        return Err(ConfigError::invalid("connect timeout must be non-zero"));
    }

    for (idx, account) in config.accounts.iter().enumerate() {
        let missing = [
            ("address", account.address.as_str()),
            ("credential", account.credential.as_str()),
            ("outbound_host", account.outbound_host.as_str()),
            ("inbound_host", account.inbound_host.as_str()),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());
        if let Some((field, _)) = missing {
            return Err(ConfigError::invalid(format!(
                "account #{} is missing '{field}'",
                idx + 1
            )));
        }
        if !account.address.contains('@') {
            return Err(ConfigError::invalid(format!(
                "account #{} address '{}' is not an email address",
                idx + 1,
                account.address
            )));
        }
    }
    Ok(())
}

/// Defaults, then the optional TOML file, then explicit overrides.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    file: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    accounts: Option<Vec<Account>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn accounts(mut self, accounts: Vec<Account>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        if let Some(path) = &self.file {
            let file = load_config_file(path)?;
            apply_file_config(&mut config, file)?;
        }
        if let Some(dir) = self.data_dir {
            config.storage.data_dir = dir;
        }
        if let Some(accounts) = self.accounts {
            config.accounts = accounts;
        }
        validate(&config)?;
        debug!(
            accounts = config.accounts.len(),
            data_dir = %config.storage.data_dir.display(),
            "configuration loaded"
        );
        Ok(config)
    }
}
