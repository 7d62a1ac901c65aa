//! Classification categories and the per-address outcome record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{Address, Provider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Valid,
    Invalid,
    Risky,
    Custom,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Valid,
        Category::Invalid,
        Category::Risky,
        Category::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Risky => "risky",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            "risky" => Ok(Self::Risky),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

/// Per-category counters. The sum always equals the number of processed
/// addresses of the owning job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub valid: usize,
    pub invalid: usize,
    pub risky: usize,
    pub custom: usize,
}

impl CategoryCounts {
    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::Valid => self.valid,
            Category::Invalid => self.invalid,
            Category::Risky => self.risky,
            Category::Custom => self.custom,
        }
    }

    pub fn increment(&mut self, category: Category) {
        match category {
            Category::Valid => self.valid += 1,
            Category::Invalid => self.invalid += 1,
            Category::Risky => self.risky += 1,
            Category::Custom => self.custom += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.valid + self.invalid + self.risky + self.custom
    }
}

/// Name of the stage that produced an outcome.
pub type StrategyName = String;

pub const STRATEGY_ORCHESTRATOR: &str = "orchestrator";
pub const STRATEGY_BOUNCE: &str = "bounce";

pub const REASON_TIMED_OUT: &str = "verification timed out or incomplete";
pub const REASON_WORKER_FAILED: &str = "verification worker failed";
pub const REASON_NO_ACCOUNTS: &str = "no accounts available";
pub const REASON_SEND_FAILED: &str = "failed to send probe";
pub const REASON_PENDING_BOUNCE: &str = "probe sent, awaiting bounce check";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub email: Address,
    pub category: Category,
    pub reason: String,
    pub provider: Provider,
    pub timestamp: DateTime<Utc>,
    pub strategy: StrategyName,
    /// Bounce batch the address was handed to, when it was deferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounce_batch: Option<String>,
}

impl VerificationOutcome {
    pub fn new(
        email: Address,
        category: Category,
        reason: impl Into<String>,
        strategy: impl Into<StrategyName>,
    ) -> Self {
        let provider = email.provider();
        Self {
            email,
            category,
            reason: reason.into(),
            provider,
            timestamp: Utc::now(),
            strategy: strategy.into(),
            bounce_batch: None,
        }
    }

    pub fn risky(email: Address, reason: impl Into<String>, strategy: &str) -> Self {
        Self::new(email, Category::Risky, reason, strategy)
    }

    pub fn with_bounce_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.bounce_batch = Some(batch_id.into());
        self
    }
}
