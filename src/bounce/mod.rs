//! Bounce probing: send one low-cost message per undecided address, then
//! watch the sending accounts' inboxes for delivery failures.
//!
//! Per address: `pending` → `invalid` as soon as a bounce names it, or
//! `pending` → `valid` once enough persisted checks (or enough time) passed
//! without one. Batches live on disk under `<data>/bounce/`.

mod classifier;
mod error;
mod message;
mod store;
mod transport;
mod types;

pub use classifier::{BounceClassifier, FAILURE_SUBJECTS, PatternClassifier};
pub use error::{BounceError, TransportError};
pub use message::{BATCH_HEADER, ProbeMessage, ScannedMessage, VERIFICATION_HEADER};
pub use store::BatchStore;
pub use transport::{MailboxScanner, ProbeSender};
#[cfg(feature = "with-smtp-verify")]
pub use transport::{ImapMailboxScanner, SmtpProbeSender};
pub use types::{AddressState, BatchReport, BatchStatus, BounceBatch, CheckSummary};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rand::seq::SliceRandom;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::{Account, BounceOptions, Config};

/// `bounce_<unix>_<8 hex>`.
pub fn new_batch_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("bounce_{}_{}", now.timestamp(), &suffix[..8])
}

/// What happened to each address handed to [`BounceProbeEngine::send_probes`].
#[derive(Debug, Clone)]
pub struct SendReport {
    pub batch_id: String,
    pub sent: Vec<Address>,
    /// Address and transport error.
    pub failed: Vec<(Address, String)>,
    /// Already terminal in a reused batch; not probed again.
    pub already_resolved: Vec<(Address, AddressState)>,
}

pub struct BounceProbeEngine {
    accounts: Arc<[Account]>,
    sender: Arc<dyn ProbeSender>,
    scanner: Arc<dyn MailboxScanner>,
    classifier: Arc<dyn BounceClassifier>,
    store: BatchStore,
    options: BounceOptions,
}

impl BounceProbeEngine {
    pub fn new(
        accounts: Vec<Account>,
        sender: Arc<dyn ProbeSender>,
        scanner: Arc<dyn MailboxScanner>,
        store: BatchStore,
        options: BounceOptions,
    ) -> Self {
        Self {
            accounts: accounts.into(),
            sender,
            scanner,
            classifier: Arc::new(PatternClassifier::new()),
            store,
            options,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn BounceClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Engine over the configured accounts with the SMTP/IMAP transports.
    #[cfg(feature = "with-smtp-verify")]
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let timeout = config.bounce.connect_timeout;
        Ok(Self::new(
            config.accounts.clone(),
            Arc::new(SmtpProbeSender::new(timeout)?),
            Arc::new(ImapMailboxScanner::new(timeout)?),
            BatchStore::new(config.storage.data_dir.join("bounce")),
            config.bounce.clone(),
        ))
    }

    /// Without network transports every account operation fails, which
    /// leaves probed addresses risky.
    #[cfg(not(feature = "with-smtp-verify"))]
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let transport = Arc::new(transport::Unsupported);
        Ok(Self::new(
            config.accounts.clone(),
            transport.clone(),
            transport,
            BatchStore::new(config.storage.data_dir.join("bounce")),
            config.bounce.clone(),
        ))
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn has_accounts(&self) -> bool {
        !self.accounts.is_empty()
    }

    fn pick_account(&self) -> Option<Account> {
        self.accounts.choose(&mut rand::thread_rng()).cloned()
    }

    /// Returns the id of `existing` once it is known to exist, or saves a
    /// fresh empty batch.
    pub fn open_batch(&self, existing: Option<&str>) -> Result<String, BounceError> {
        if self.accounts.is_empty() {
            return Err(BounceError::NoAccounts);
        }
        if let Some(id) = existing {
            self.store.require(id)?;
            return Ok(id.to_string());
        }
        let now = Utc::now();
        let batch = BounceBatch::new(new_batch_id(now), now);
        let lock = self.store.lock_for(&batch.id);
        let _guard = lock.lock();
        self.store.save(&batch)?;
        debug!(batch = %batch.id, "bounce batch opened");
        Ok(batch.id)
    }

    /// Sends one probe per address (duplicates and terminal addresses are
    /// skipped) and records successful sends as pending.
    pub async fn send_probes(
        &self,
        addresses: &[Address],
        existing_batch: Option<&str>,
    ) -> Result<SendReport, BounceError> {
        if self.accounts.is_empty() {
            return Err(BounceError::NoAccounts);
        }
        let now = Utc::now();
        let batch_id = existing_batch.map_or_else(|| new_batch_id(now), str::to_string);

        let mut already_resolved = Vec::new();
        let to_send: Vec<Address> = {
            let lock = self.store.lock_for(&batch_id);
            let _guard = lock.lock();
            let batch = match existing_batch {
                Some(id) => self.store.require(id)?,
                None => BounceBatch::new(&batch_id, now),
            };

            let unique: BTreeSet<&Address> = addresses.iter().collect();
            let mut to_send = Vec::with_capacity(unique.len());
            for address in unique {
                match batch.state_of(address) {
                    Some(state) if state.is_terminal() => {
                        already_resolved.push((address.clone(), state));
                    }
                    _ => to_send.push(address.clone()),
                }
            }
            self.store.save(&batch)?;
            to_send
        };

        let limit = self.options.max_concurrent_sends.max(1);
        let mut in_flight = FuturesUnordered::new();
        let mut results = Vec::with_capacity(to_send.len());

        for address in to_send {
            while in_flight.len() >= limit {
                if let Some(result) = in_flight.next().await {
                    results.push(result);
                }
            }

            let Some(account) = self.pick_account() else {
                return Err(BounceError::NoAccounts);
            };
            let message = ProbeMessage::new(
                &batch_id,
                &account.address,
                &address,
                &self.options.subject_prefix,
                Utc::now(),
            );
            let sender = Arc::clone(&self.sender);
            let handle = tokio::task::spawn_blocking(move || sender.send(&account, &message));
            in_flight.push(async move {
                let outcome = match handle.await {
                    Ok(sent) => sent.map_err(|err| err.to_string()),
                    Err(err) => Err(format!("send task failed: {err}")),
                };
                (address, outcome)
            });
        }
        while let Some(result) = in_flight.next().await {
            results.push(result);
        }

        let mut report = SendReport {
            batch_id: batch_id.clone(),
            sent: Vec::new(),
            failed: Vec::new(),
            already_resolved,
        };
        {
            let lock = self.store.lock_for(&batch_id);
            let _guard = lock.lock();
            let mut batch = self
                .store
                .load(&batch_id)?
                .unwrap_or_else(|| BounceBatch::new(&batch_id, now));

            for (address, outcome) in results {
                match outcome {
                    Ok(()) => {
                        debug!(batch = %batch_id, %address, "probe sent");
                        batch.send_failures.remove(&address);
                        batch
                            .states
                            .entry(address.clone())
                            .or_insert(AddressState::Pending);
                        report.sent.push(address);
                    }
                    Err(err) => {
                        warn!(batch = %batch_id, %address, error = %err, "failed to send probe");
                        if !batch.states.contains_key(&address) {
                            batch.send_failures.insert(address.clone(), err.clone());
                        }
                        report.failed.push((address, err));
                    }
                }
            }
            self.store.save(&batch)?;
        }

        info!(
            batch = %batch_id,
            sent = report.sent.len(),
            failed = report.failed.len(),
            "bounce probes dispatched"
        );
        Ok(report)
    }

    /// Scans every account's inbox for bounces of this batch. With `persist`
    /// the attempt counts towards escalation and the batch is saved;
    /// without it the result is a preview and nothing changes.
    pub async fn check_responses(
        &self,
        batch_id: &str,
        persist: bool,
    ) -> Result<CheckSummary, BounceError> {
        self.check_responses_at(batch_id, persist, Utc::now()).await
    }

    pub(crate) async fn check_responses_at(
        &self,
        batch_id: &str,
        persist: bool,
        now: DateTime<Utc>,
    ) -> Result<CheckSummary, BounceError> {
        let since = self.store.require(batch_id)?.created;

        let mut scans = JoinSet::new();
        for account in self.accounts.iter().cloned() {
            let scanner = Arc::clone(&self.scanner);
            let id = batch_id.to_string();
            scans.spawn_blocking(move || {
                let found = scanner.scan(&account, &id, since);
                (account.address, found)
            });
        }

        let mut bounced: BTreeMap<Address, String> = BTreeMap::new();
        let mut skipped = Vec::new();
        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok((account, Ok(messages))) => {
                    debug!(%account, messages = messages.len(), "mailbox scanned");
                    for message in &messages {
                        for address in self.classifier.bounced_addresses(message) {
                            bounced
                                .entry(address)
                                .or_insert_with(|| message.subject().to_string());
                        }
                    }
                }
                Ok((account, Err(err))) => {
                    warn!(%account, error = %err, "mailbox scan failed, skipping account");
                    skipped.push(account);
                }
                Err(err) => {
                    warn!(error = %err, "mailbox scan task failed");
                    skipped.push("<scan task>".to_string());
                }
            }
        }

        let lock = self.store.lock_for(batch_id);
        let _guard = lock.lock();
        let mut batch = self.store.require(batch_id)?;
        let mut summary = apply_check(&mut batch, &bounced, now, &self.options, persist);
        summary.skipped_accounts = skipped;
        if persist {
            self.store.save(&batch)?;
            info!(
                batch = %batch_id,
                attempt = batch.checking_attempts,
                invalid = summary.invalid.len(),
                valid = summary.valid.len(),
                "bounce check recorded"
            );
        }
        Ok(summary)
    }

    pub fn batch(&self, batch_id: &str) -> Result<BounceBatch, BounceError> {
        Ok(self.store.require(batch_id)?)
    }

    pub fn status(&self, batch_id: &str) -> Result<BatchReport, BounceError> {
        Ok(self.batch(batch_id)?.report())
    }

    /// Newest first.
    pub fn list_batches(&self) -> Result<Vec<BatchReport>, BounceError> {
        Ok(self.store.list()?.iter().map(BounceBatch::report).collect())
    }

    pub fn addresses_in_state(
        &self,
        batch_id: &str,
        state: AddressState,
    ) -> Result<Vec<Address>, BounceError> {
        Ok(self.batch(batch_id)?.in_state(state).cloned().collect())
    }
}

/// One check against `batch`: bounced pending addresses become invalid, then
/// escalation may turn the remaining pending ones valid.
///
/// A check that is not recorded only reports bounces. It never counts as an
/// attempt and never escalates.
fn apply_check(
    batch: &mut BounceBatch,
    bounced: &BTreeMap<Address, String>,
    now: DateTime<Utc>,
    options: &BounceOptions,
    record: bool,
) -> CheckSummary {
    let mut summary = CheckSummary::default();
    for (address, subject) in bounced {
        if batch.state_of(address) == Some(AddressState::Pending) {
            batch.states.insert(address.clone(), AddressState::Invalid);
            batch
                .evidence
                .insert(address.clone(), format!("bounce received: {subject}"));
            summary.invalid.push(address.clone());
        }
    }
    if !record {
        return summary;
    }

    batch.checking_attempts += 1;
    let first_checked = *batch.first_checked.get_or_insert(now);
    batch.last_checked = Some(now);
    let elapsed = (now - first_checked).to_std().unwrap_or_default();
    let escalate =
        batch.checking_attempts >= options.escalation_attempts || elapsed >= options.escalation_window;
    if escalate {
        for (address, state) in batch.states.iter_mut() {
            if *state == AddressState::Pending {
                *state = AddressState::Valid;
                summary.valid.push(address.clone());
            }
        }
    }
    summary
}

#[cfg(test)]
pub(crate) mod tests;
