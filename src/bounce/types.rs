use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Per-address state inside a batch. `Valid` and `Invalid` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressState {
    Pending,
    Valid,
    Invalid,
}

impl AddressState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for AddressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AddressState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            other => Err(format!("unknown address state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Probes sent, never checked with `persist`.
    Sent,
    Checked,
    /// Nothing left pending.
    Complete,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Checked => "checked",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BounceBatch {
    pub id: String,
    pub created: DateTime<Utc>,
    pub states: BTreeMap<Address, AddressState>,
    /// Addresses whose probe could not be sent, with the transport error.
    #[serde(default)]
    pub send_failures: BTreeMap<Address, String>,
    /// Why an address was marked invalid (subject of the matching bounce).
    #[serde(default)]
    pub evidence: BTreeMap<Address, String>,
    pub checking_attempts: u32,
    pub first_checked: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl BounceBatch {
    pub fn new(id: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created,
            states: BTreeMap::new(),
            send_failures: BTreeMap::new(),
            evidence: BTreeMap::new(),
            checking_attempts: 0,
            first_checked: None,
            last_checked: None,
        }
    }

    pub fn state_of(&self, address: &Address) -> Option<AddressState> {
        self.states.get(address).copied()
    }

    pub fn count(&self, state: AddressState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    pub fn in_state(&self, state: AddressState) -> impl Iterator<Item = &Address> {
        self.states
            .iter()
            .filter(move |(_, s)| **s == state)
            .map(|(address, _)| address)
    }

    pub fn total(&self) -> usize {
        self.states.len() + self.send_failures.len()
    }

    pub fn status(&self) -> BatchStatus {
        if self.send_failures.is_empty() && self.count(AddressState::Pending) == 0 {
            BatchStatus::Complete
        } else if self.checking_attempts == 0 {
            BatchStatus::Sent
        } else {
            BatchStatus::Checked
        }
    }

    pub fn report(&self) -> BatchReport {
        let valid = self.count(AddressState::Valid);
        let invalid = self.count(AddressState::Invalid);
        let pending = self.count(AddressState::Pending);
        let total = self.total();
        let status = self.status();
        let progress = if total == 0 {
            0.0
        } else {
            (valid + invalid) as f64 * 100.0 / total as f64
        };
        let remaining = match (status, self.checking_attempts) {
            (BatchStatus::Complete, _) => None,
            (_, 0) => Some("~30 minutes"),
            (_, 1) => Some("~20 minutes"),
            (_, 2) => Some("~10 minutes"),
            _ => None,
        };
        BatchReport {
            batch_id: self.id.clone(),
            status,
            total_emails: total,
            valid,
            invalid,
            risky: pending + self.send_failures.len(),
            custom: 0,
            pending,
            progress_percentage: (progress * 10.0).round() / 10.0,
            checking_attempts: self.checking_attempts,
            last_checked: self.last_checked,
            first_checked: self.first_checked,
            remaining_time_estimate: remaining.map(str::to_string),
        }
    }
}

/// Status document of a batch, as served to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total_emails: usize,
    pub valid: usize,
    pub invalid: usize,
    pub risky: usize,
    pub custom: usize,
    pub pending: usize,
    pub progress_percentage: f64,
    pub checking_attempts: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub first_checked: Option<DateTime<Utc>>,
    pub remaining_time_estimate: Option<String>,
}

/// Result of one `check_responses` call: addresses that changed state in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub invalid: Vec<Address>,
    pub valid: Vec<Address>,
    /// Accounts whose mailbox could not be scanned.
    pub skipped_accounts: Vec<String>,
}
