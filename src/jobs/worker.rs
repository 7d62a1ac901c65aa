//! One worker per partition: run the pipeline, hand deferred addresses to
//! the bounce prober, report through the job channel, then send the
//! `Completed` sentinel.

use std::sync::Arc;

use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, warn};

use crate::address::Address;
use crate::bounce::{AddressState, BounceError, BounceProbeEngine};
use crate::outcome::{
    Category, REASON_NO_ACCOUNTS, REASON_PENDING_BOUNCE, REASON_SEND_FAILED, STRATEGY_BOUNCE,
    VerificationOutcome,
};
use crate::pipeline::{Pipeline, Resolution};

#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Outcome(VerificationOutcome),
    /// The partition is done; every address has been reported.
    Completed { partition: usize },
    /// The partition stopped early; unreported addresses are lost.
    Failed { partition: usize, error: String },
}

#[derive(Debug, Clone)]
pub(crate) struct Partition {
    pub id: usize,
    pub addresses: Vec<Address>,
}

/// Bounce batch shared by all partitions of a job, opened on first use.
#[derive(Clone)]
pub(crate) struct BounceHandoff {
    engine: Arc<BounceProbeEngine>,
    existing: Option<String>,
    batch: Arc<OnceCell<String>>,
}

impl BounceHandoff {
    pub(crate) fn new(engine: Arc<BounceProbeEngine>, existing: Option<String>) -> Self {
        Self {
            engine,
            existing,
            batch: Arc::new(OnceCell::new()),
        }
    }

    async fn batch_id(&self) -> Result<String, BounceError> {
        let id = self
            .batch
            .get_or_try_init(|| async {
                let engine = Arc::clone(&self.engine);
                let existing = self.existing.clone();
                tokio::task::spawn_blocking(move || engine.open_batch(existing.as_deref()))
                    .await
                    .map_err(|err| BounceError::Task(err.to_string()))?
            })
            .await?;
        Ok(id.clone())
    }

    /// Sends probes for `deferred` and turns the send report into outcomes.
    /// Never fails: every error becomes a risky outcome.
    pub(crate) async fn defer(&self, deferred: Vec<Address>) -> Vec<VerificationOutcome> {
        let risky_all = |addresses: Vec<Address>, reason: &str| -> Vec<VerificationOutcome> {
            addresses
                .into_iter()
                .map(|address| VerificationOutcome::risky(address, reason, STRATEGY_BOUNCE))
                .collect()
        };

        let batch_id = match self.batch_id().await {
            Ok(id) => id,
            Err(BounceError::NoAccounts) => return risky_all(deferred, REASON_NO_ACCOUNTS),
            Err(err) => {
                warn!(error = %err, "cannot open bounce batch");
                return risky_all(deferred, &err.to_string());
            }
        };

        let report = match self.engine.send_probes(&deferred, Some(&batch_id)).await {
            Ok(report) => report,
            Err(BounceError::NoAccounts) => return risky_all(deferred, REASON_NO_ACCOUNTS),
            Err(err) => {
                warn!(batch = %batch_id, error = %err, "bounce probes not sent");
                return risky_all(deferred, &err.to_string());
            }
        };

        let mut outcomes = Vec::with_capacity(deferred.len());
        for address in report.sent {
            outcomes.push(
                VerificationOutcome::risky(address, REASON_PENDING_BOUNCE, STRATEGY_BOUNCE)
                    .with_bounce_batch(&batch_id),
            );
        }
        for (address, error) in report.failed {
            debug!(%address, %error, "probe send failed");
            outcomes.push(
                VerificationOutcome::risky(address, REASON_SEND_FAILED, STRATEGY_BOUNCE)
                    .with_bounce_batch(&batch_id),
            );
        }
        for (address, state) in report.already_resolved {
            let (category, reason) = match state {
                AddressState::Invalid => (Category::Invalid, "bounce received"),
                AddressState::Valid => (Category::Valid, "no bounce received"),
                AddressState::Pending => (Category::Risky, REASON_PENDING_BOUNCE),
            };
            outcomes.push(
                VerificationOutcome::new(address, category, reason, STRATEGY_BOUNCE)
                    .with_bounce_batch(&batch_id),
            );
        }
        outcomes
    }
}

pub(crate) async fn run_partition(
    partition: Partition,
    pipeline: Arc<Pipeline>,
    handoff: BounceHandoff,
    tx: mpsc::UnboundedSender<WorkerMessage>,
) {
    let id = partition.id;
    let size = partition.addresses.len();
    debug!(partition = id, size, "worker started");

    let classify_tx = tx.clone();
    let addresses = partition.addresses;
    let classified = tokio::task::spawn_blocking(move || {
        let mut deferred = Vec::new();
        for address in addresses {
            match pipeline.classify(&address) {
                Resolution::Decided(outcome) => {
                    // receiver gone means the job already finished
                    let _ = classify_tx.send(WorkerMessage::Outcome(outcome));
                }
                Resolution::Deferred => deferred.push(address),
            }
        }
        deferred
    })
    .await;

    let deferred = match classified {
        Ok(deferred) => deferred,
        Err(err) => {
            warn!(partition = id, error = %err, "verification worker failed");
            let _ = tx.send(WorkerMessage::Failed {
                partition: id,
                error: err.to_string(),
            });
            return;
        }
    };

    if !deferred.is_empty() {
        debug!(partition = id, deferred = deferred.len(), "handing over to bounce prober");
        for outcome in handoff.defer(deferred).await {
            let _ = tx.send(WorkerMessage::Outcome(outcome));
        }
    }

    debug!(partition = id, size, "worker finished");
    let _ = tx.send(WorkerMessage::Completed { partition: id });
}
