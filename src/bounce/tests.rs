use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use super::*;

/// Records every probe; addresses in `failing` are refused.
#[derive(Default)]
pub(crate) struct FakeSender {
    pub failing: Mutex<BTreeSet<String>>,
    pub sent: Mutex<Vec<ProbeMessage>>,
}

impl FakeSender {
    pub(crate) fn fail_for(&self, address: &str) {
        self.failing.lock().insert(address.to_string());
    }

    pub(crate) fn sent_to(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.to.to_string()).collect()
    }
}

impl ProbeSender for FakeSender {
    fn send(&self, account: &Account, message: &ProbeMessage) -> Result<(), TransportError> {
        if self.failing.lock().contains(message.to.as_str()) {
            return Err(TransportError::Rejected(format!(
                "550 relay denied for {} via {}",
                message.to, account.address
            )));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// In-memory inboxes keyed by account address.
#[derive(Default)]
pub(crate) struct FakeMailbox {
    pub inboxes: Mutex<HashMap<String, Vec<ScannedMessage>>>,
    pub unreachable: Mutex<BTreeSet<String>>,
}

impl FakeMailbox {
    pub(crate) fn deliver(&self, account: &str, message: ScannedMessage) {
        self.inboxes
            .lock()
            .entry(account.to_string())
            .or_default()
            .push(message);
    }

    pub(crate) fn deliver_bounce(&self, account: &str, batch_id: &str, recipient: &str) {
        self.deliver(account, bounce_message(batch_id, recipient));
    }
}

impl MailboxScanner for FakeMailbox {
    fn scan(
        &self,
        account: &Account,
        _batch_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<ScannedMessage>, TransportError> {
        if self.unreachable.lock().contains(&account.address) {
            return Err(TransportError::unavailable(&account.address, "login refused"));
        }
        Ok(self
            .inboxes
            .lock()
            .get(&account.address)
            .cloned()
            .unwrap_or_default())
    }
}

pub(crate) fn bounce_message(batch_id: &str, recipient: &str) -> ScannedMessage {
    let raw = format!(
        "From: Mail Delivery System <MAILER-DAEMON@mx.example>\r\n\
         Subject: Undeliverable: Email Verification - {batch_id}\r\n\r\n\
         Reporting-MTA: dns; mx.example\r\n\
         Final-Recipient: rfc822; {recipient}\r\n\
         Action: failed\r\n"
    );
    ScannedMessage::parse(raw.as_bytes())
}

pub(crate) fn account(n: usize) -> Account {
    Account {
        address: format!("probe{n}@sender.test"),
        credential: "secret".to_string(),
        outbound_host: "smtp.sender.test".to_string(),
        outbound_port: 587,
        inbound_host: "imap.sender.test".to_string(),
        inbound_port: 993,
    }
}

pub(crate) struct Harness {
    pub engine: BounceProbeEngine,
    pub sender: Arc<FakeSender>,
    pub mailbox: Arc<FakeMailbox>,
}

pub(crate) fn harness(data_dir: &Path, accounts: usize) -> Harness {
    let sender = Arc::new(FakeSender::default());
    let mailbox = Arc::new(FakeMailbox::default());
    let engine = BounceProbeEngine::new(
        (1..=accounts).map(account).collect(),
        sender.clone(),
        mailbox.clone(),
        BatchStore::new(data_dir.join("bounce")),
        BounceOptions::default(),
    );
    Harness {
        engine,
        sender,
        mailbox,
    }
}

fn addr(raw: &str) -> Address {
    Address::normalize(raw)
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
}

#[tokio::test]
async fn send_records_pending_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 2);

    let report = h
        .engine
        .send_probes(&[addr("a@example.org"), addr("b@example.org"), addr("a@example.org")], None)
        .await
        .expect("send succeeds");

    assert!(report.batch_id.starts_with("bounce_"));
    assert_eq!(report.sent.len(), 2);
    assert!(report.failed.is_empty());

    let mut sent = h.sender.sent_to();
    sent.sort();
    assert_eq!(sent, vec!["a@example.org", "b@example.org"]);
    assert!(
        h.sender.sent.lock()[0]
            .payload
            .contains(&format!("X-Batch-ID: {}", report.batch_id))
    );

    let status = h.engine.status(&report.batch_id).unwrap();
    assert_eq!(status.status, BatchStatus::Sent);
    assert_eq!(status.pending, 2);
    assert_eq!(status.risky, 2);
    assert_eq!(status.remaining_time_estimate.as_deref(), Some("~30 minutes"));
}

#[tokio::test]
async fn first_check_marks_bounced_address_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let report = h
        .engine
        .send_probes(&[addr("gone@example.org"), addr("here@example.org")], None)
        .await
        .unwrap();
    h.mailbox
        .deliver_bounce("probe1@sender.test", &report.batch_id, "gone@example.org");

    let summary = h
        .engine
        .check_responses_at(&report.batch_id, true, at(10))
        .await
        .unwrap();
    assert_eq!(summary.invalid, vec![addr("gone@example.org")]);
    assert!(summary.valid.is_empty());

    let status = h.engine.status(&report.batch_id).unwrap();
    assert_eq!((status.invalid, status.valid, status.risky), (1, 0, 1));
    assert_eq!(status.checking_attempts, 1);
    assert_eq!(status.status, BatchStatus::Checked);
    assert_eq!(status.progress_percentage, 50.0);

    let batch = h.engine.batch(&report.batch_id).unwrap();
    assert!(
        batch.evidence[&addr("gone@example.org")].starts_with("bounce received: Undeliverable")
    );
}

/// Treats any message whose subject names a recipient as a bounce for it.
struct SubjectNamesRecipient;

impl BounceClassifier for SubjectNamesRecipient {
    fn bounced_addresses(&self, message: &ScannedMessage) -> BTreeSet<Address> {
        message
            .subject()
            .split_whitespace()
            .filter(|word| word.contains('@'))
            .map(Address::normalize)
            .collect()
    }
}

#[tokio::test]
async fn custom_classifier_replaces_pattern_rules() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let engine = h.engine.with_classifier(Arc::new(SubjectNamesRecipient));
    let report = engine
        .send_probes(&[addr("gone@example.org"), addr("here@example.org")], None)
        .await
        .unwrap();
    h.mailbox.deliver(
        "probe1@sender.test",
        ScannedMessage::parse(b"From: someone@else.test\r\nSubject: lost gone@example.org\r\n\r\n"),
    );

    let summary = engine
        .check_responses_at(&report.batch_id, true, at(10))
        .await
        .unwrap();
    assert_eq!(summary.invalid, vec![addr("gone@example.org")]);
}

#[tokio::test]
async fn third_quiet_check_escalates_pending_to_valid() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let report = h
        .engine
        .send_probes(&[addr("gone@example.org"), addr("here@example.org")], None)
        .await
        .unwrap();
    h.mailbox
        .deliver_bounce("probe1@sender.test", &report.batch_id, "gone@example.org");

    let id = report.batch_id.as_str();
    h.engine.check_responses_at(id, true, at(10)).await.unwrap();
    let second = h.engine.check_responses_at(id, true, at(11)).await.unwrap();
    assert!(second.invalid.is_empty() && second.valid.is_empty());

    let third = h.engine.check_responses_at(id, true, at(12)).await.unwrap();
    assert_eq!(third.valid, vec![addr("here@example.org")]);

    let status = h.engine.status(id).unwrap();
    assert_eq!((status.invalid, status.valid, status.risky), (1, 1, 0));
    assert_eq!(status.checking_attempts, 3);
    assert_eq!(status.status, BatchStatus::Complete);
    assert_eq!(status.remaining_time_estimate, None);
    assert_eq!(status.progress_percentage, 100.0);
}

#[tokio::test]
async fn window_since_first_check_escalates_early() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let report = h
        .engine
        .send_probes(&[addr("quiet@example.org")], None)
        .await
        .unwrap();
    let id = report.batch_id.as_str();

    h.engine.check_responses_at(id, true, at(0)).await.unwrap();
    let later = at(0) + chrono::Duration::hours(25);
    let summary = h.engine.check_responses_at(id, true, later).await.unwrap();

    assert_eq!(summary.valid, vec![addr("quiet@example.org")]);
    let batch = h.engine.batch(id).unwrap();
    assert_eq!(batch.checking_attempts, 2);
    assert_eq!(batch.first_checked, Some(at(0)));
    assert_eq!(batch.last_checked, Some(later));
}

#[tokio::test]
async fn late_bounce_does_not_reopen_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let report = h
        .engine
        .send_probes(&[addr("late@example.org")], None)
        .await
        .unwrap();
    let id = report.batch_id.as_str();
    for hour in 1..=3 {
        h.engine.check_responses_at(id, true, at(hour)).await.unwrap();
    }
    assert_eq!(
        h.engine.addresses_in_state(id, AddressState::Valid).unwrap(),
        vec![addr("late@example.org")]
    );

    h.mailbox
        .deliver_bounce("probe1@sender.test", id, "late@example.org");
    let summary = h.engine.check_responses_at(id, true, at(4)).await.unwrap();
    assert!(summary.invalid.is_empty());
    assert_eq!(
        h.engine.batch(id).unwrap().state_of(&addr("late@example.org")),
        Some(AddressState::Valid)
    );
}

#[tokio::test]
async fn dry_run_check_leaves_batch_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let report = h
        .engine
        .send_probes(&[addr("gone@example.org")], None)
        .await
        .unwrap();
    h.mailbox
        .deliver_bounce("probe1@sender.test", &report.batch_id, "gone@example.org");

    let preview = h
        .engine
        .check_responses(&report.batch_id, false)
        .await
        .unwrap();
    assert_eq!(preview.invalid, vec![addr("gone@example.org")]);

    let batch = h.engine.batch(&report.batch_id).unwrap();
    assert_eq!(batch.checking_attempts, 0);
    assert_eq!(batch.first_checked, None);
    assert_eq!(
        batch.state_of(&addr("gone@example.org")),
        Some(AddressState::Pending)
    );
}

#[tokio::test]
async fn dry_run_check_never_escalates() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let report = h
        .engine
        .send_probes(&[addr("quiet@example.org")], None)
        .await
        .unwrap();
    let id = report.batch_id.as_str();
    h.engine.check_responses_at(id, true, at(1)).await.unwrap();
    h.engine.check_responses_at(id, true, at(2)).await.unwrap();

    let late = at(2) + chrono::Duration::hours(48);
    let preview = h.engine.check_responses_at(id, false, late).await.unwrap();
    assert!(preview.valid.is_empty());
    assert!(preview.invalid.is_empty());

    let batch = h.engine.batch(id).unwrap();
    assert_eq!(batch.checking_attempts, 2);
    assert_eq!(batch.last_checked, Some(at(2)));
    assert_eq!(
        batch.state_of(&addr("quiet@example.org")),
        Some(AddressState::Pending)
    );

    // le troisième passage enregistré escalade normalement
    let third = h.engine.check_responses_at(id, true, at(3)).await.unwrap();
    assert_eq!(third.valid, vec![addr("quiet@example.org")]);
}

#[tokio::test]
async fn failed_send_counts_as_risky() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    h.sender.fail_for("blocked@example.org");

    let report = h
        .engine
        .send_probes(&[addr("blocked@example.org"), addr("ok@example.org")], None)
        .await
        .unwrap();
    assert_eq!(report.sent, vec![addr("ok@example.org")]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("relay denied"));

    let status = h.engine.status(&report.batch_id).unwrap();
    assert_eq!(status.total_emails, 2);
    assert_eq!(status.risky, 2);
    assert_eq!(status.pending, 1);

    // escalation only promotes addresses that were actually probed
    let id = report.batch_id.as_str();
    for hour in 1..=3 {
        h.engine.check_responses_at(id, true, at(hour)).await.unwrap();
    }
    let status = h.engine.status(id).unwrap();
    assert_eq!((status.valid, status.risky), (1, 1));
    assert_eq!(status.status, BatchStatus::Checked);
}

#[tokio::test]
async fn sending_without_accounts_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 0);
    assert!(!h.engine.has_accounts());

    let err = h
        .engine
        .send_probes(&[addr("a@example.org")], None)
        .await
        .expect_err("no accounts");
    assert!(matches!(err, BounceError::NoAccounts));
    assert!(h.engine.list_batches().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_account_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 2);
    h.mailbox
        .unreachable
        .lock()
        .insert("probe1@sender.test".to_string());

    let report = h
        .engine
        .send_probes(&[addr("gone@example.org")], None)
        .await
        .unwrap();
    h.mailbox
        .deliver_bounce("probe2@sender.test", &report.batch_id, "gone@example.org");

    let summary = h
        .engine
        .check_responses_at(&report.batch_id, true, at(9))
        .await
        .unwrap();
    assert_eq!(summary.skipped_accounts, vec!["probe1@sender.test".to_string()]);
    assert_eq!(summary.invalid, vec![addr("gone@example.org")]);
}

#[tokio::test]
async fn bounce_for_foreign_address_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let report = h
        .engine
        .send_probes(&[addr("mine@example.org")], None)
        .await
        .unwrap();
    h.mailbox
        .deliver_bounce("probe1@sender.test", "bounce_0_other", "stranger@example.org");

    let summary = h
        .engine
        .check_responses_at(&report.batch_id, true, at(9))
        .await
        .unwrap();
    assert!(summary.invalid.is_empty());
    let batch = h.engine.batch(&report.batch_id).unwrap();
    assert_eq!(batch.states.len(), 1);
    assert!(batch.state_of(&addr("stranger@example.org")).is_none());
}

#[tokio::test]
async fn reusing_a_batch_skips_resolved_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let first = h
        .engine
        .send_probes(&[addr("gone@example.org")], None)
        .await
        .unwrap();
    let id = first.batch_id.clone();
    h.mailbox
        .deliver_bounce("probe1@sender.test", &id, "gone@example.org");
    h.engine.check_responses_at(&id, true, at(9)).await.unwrap();

    let second = h
        .engine
        .send_probes(&[addr("gone@example.org"), addr("new@example.org")], Some(&id))
        .await
        .unwrap();
    assert_eq!(second.batch_id, id);
    assert_eq!(second.sent, vec![addr("new@example.org")]);
    assert_eq!(
        second.already_resolved,
        vec![(addr("gone@example.org"), AddressState::Invalid)]
    );
    assert_eq!(h.sender.sent.lock().len(), 2);

    let missing = h
        .engine
        .send_probes(&[addr("x@example.org")], Some("bounce_0_missing"))
        .await
        .expect_err("unknown batch");
    assert!(matches!(missing, BounceError::Store(ref e) if e.is_not_found()));
}

#[tokio::test]
async fn opened_batch_collects_later_sends() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path(), 1);
    let id = h.engine.open_batch(None).unwrap();
    assert_eq!(h.engine.status(&id).unwrap().total_emails, 0);
    assert_eq!(h.engine.open_batch(Some(&id)).unwrap(), id);

    h.engine
        .send_probes(&[addr("a@example.org")], Some(&id))
        .await
        .unwrap();
    h.engine
        .send_probes(&[addr("b@example.org")], Some(&id))
        .await
        .unwrap();
    assert_eq!(h.engine.status(&id).unwrap().pending, 2);
    assert_eq!(h.engine.list_batches().unwrap().len(), 1);

    assert!(matches!(
        harness(dir.path(), 0).engine.open_batch(None),
        Err(BounceError::NoAccounts)
    ));
}

#[tokio::test]
async fn batches_list_newest_first_and_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = BatchStore::new(dir.path().join("bounce"));
    let mut older = BounceBatch::new("bounce_100_aaaaaaaa", at(1));
    older.states.insert(addr("a@example.org"), AddressState::Pending);
    let mut newer = BounceBatch::new("bounce_200_bbbbbbbb", at(2));
    newer.states.insert(addr("b@example.org"), AddressState::Valid);
    newer.states.insert(addr("c@example.org"), AddressState::Pending);
    store.save(&older).unwrap();
    store.save(&newer).unwrap();

    // fresh engine over the same directory
    let h = harness(dir.path(), 1);
    let listed: Vec<String> = h
        .engine
        .list_batches()
        .unwrap()
        .into_iter()
        .map(|r| r.batch_id)
        .collect();
    assert_eq!(listed, vec!["bounce_200_bbbbbbbb", "bounce_100_aaaaaaaa"]);
    assert_eq!(
        h.engine
            .addresses_in_state("bounce_200_bbbbbbbb", AddressState::Pending)
            .unwrap(),
        vec![addr("c@example.org")]
    );
    assert_eq!(h.engine.batch("bounce_100_aaaaaaaa").unwrap(), older);
}

#[test]
fn escalation_counts_only_persisted_attempts() {
    let options = BounceOptions {
        escalation_window: Duration::from_secs(3600),
        ..BounceOptions::default()
    };
    let mut batch = BounceBatch::new("bounce_1_x", at(0));
    batch.states.insert(addr("a@example.org"), AddressState::Pending);

    let quiet = BTreeMap::new();
    assert!(apply_check(&mut batch, &quiet, at(0), &options, true).valid.is_empty());
    assert!(apply_check(&mut batch, &quiet, at(5), &options, false).valid.is_empty());
    assert_eq!(batch.checking_attempts, 1);
    assert_eq!(batch.last_checked, Some(at(0)));

    let summary = apply_check(&mut batch, &quiet, at(1), &options, true);
    assert_eq!(summary.valid, vec![addr("a@example.org")]);
    assert_eq!(batch.checking_attempts, 2);
}

#[test]
fn batch_id_shape() {
    let id = new_batch_id(at(0));
    let (prefix, rest) = id.split_at("bounce_1709251200_".len());
    assert_eq!(prefix, "bounce_1709251200_");
    assert_eq!(rest.len(), 8);
    assert!(rest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn report_json_shape() {
    let mut batch = BounceBatch::new("bounce_1_x", at(0));
    batch.states.insert(addr("a@example.org"), AddressState::Valid);
    batch.states.insert(addr("b@example.org"), AddressState::Invalid);
    batch.states.insert(addr("c@example.org"), AddressState::Pending);
    batch
        .send_failures
        .insert(addr("d@example.org"), "timeout".to_string());
    batch.checking_attempts = 1;
    batch.first_checked = Some(at(12));
    batch.last_checked = Some(at(12));

    let json = serde_json::to_string(&batch.report()).unwrap();
    insta::assert_snapshot!(json, @r#"{"batchId":"bounce_1_x","status":"checked","totalEmails":4,"valid":1,"invalid":1,"risky":2,"custom":0,"pending":1,"progressPercentage":50.0,"checkingAttempts":1,"lastChecked":"2024-03-01T12:00:00Z","firstChecked":"2024-03-01T12:00:00Z","remainingTimeEstimate":"~20 minutes"}"#);
}
