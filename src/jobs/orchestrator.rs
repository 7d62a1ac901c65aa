use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::address::Address;
use crate::bounce::BounceProbeEngine;
use crate::config::{Config, OrchestratorOptions};
use crate::jobs::error::OrchestratorError;
use crate::jobs::events::ProgressEvent;
use crate::jobs::partition::ScalingPolicy;
use crate::jobs::store::JobStatusStore;
use crate::jobs::types::{JobId, JobStatus, VerificationJob, new_job_id};
use crate::jobs::worker::{BounceHandoff, Partition, WorkerMessage, run_partition};
use crate::outcome::{
    REASON_NO_ACCOUNTS, REASON_TIMED_OUT, REASON_WORKER_FAILED, STRATEGY_ORCHESTRATOR,
    VerificationOutcome,
};
use crate::pipeline::Pipeline;

/// Progress events of one job, ending after the `Finished` event.
pub struct JobStream {
    job_id: JobId,
    rx: UnboundedReceiver<ProgressEvent>,
}

impl JobStream {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl Stream for JobStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Splits submitted batches into partitions, runs one worker per partition
/// and one supervisor per job.
pub struct JobOrchestrator {
    store: Arc<JobStatusStore>,
    pipeline: Arc<Pipeline>,
    bounce: Arc<BounceProbeEngine>,
    scaling: ScalingPolicy,
    options: OrchestratorOptions,
    streams: Mutex<HashMap<JobId, UnboundedReceiver<ProgressEvent>>>,
    supervisors: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<JobStatusStore>,
        pipeline: Arc<Pipeline>,
        bounce: Arc<BounceProbeEngine>,
        scaling: ScalingPolicy,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            pipeline,
            bounce,
            scaling,
            options,
            streams: Mutex::new(HashMap::new()),
            supervisors: Mutex::new(HashMap::new()),
        }
    }

    /// Store, pipeline and bounce engine as described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        let store = JobStatusStore::new(config.storage.data_dir.join("jobs"));
        let pipeline = Pipeline::from_config(config)?;
        let bounce = BounceProbeEngine::from_config(config)?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(pipeline),
            Arc::new(bounce),
            config.scaling.clone(),
            config.orchestrator,
        ))
    }

    pub fn store(&self) -> &Arc<JobStatusStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn bounce(&self) -> &Arc<BounceProbeEngine> {
        &self.bounce
    }

    /// Creates the job, persists it and starts its workers. Addresses are
    /// normalised and deduplicated. Must be called inside a Tokio runtime.
    pub async fn submit<S: AsRef<str>>(
        &self,
        addresses: &[S],
        existing_batch: Option<&str>,
    ) -> Result<JobId, OrchestratorError> {
        if let Some(batch_id) = existing_batch {
            self.bounce.batch(batch_id)?;
        }

        let now = Utc::now();
        let mut seen = HashSet::new();
        let addresses: Vec<Address> = addresses
            .iter()
            .map(|raw| Address::normalize(raw.as_ref()))
            .filter(|address| seen.insert(address.clone()))
            .collect();

        let id = new_job_id(now);
        let partitions = self.scaling.split(addresses.clone());
        let mut job = VerificationJob::new(&id, addresses, now);
        job.partitions = partitions.iter().map(Vec::len).collect();
        info!(
            job = %id,
            total = job.total(),
            partitions = partitions.len(),
            "job submitted"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.streams.lock().insert(id.clone(), events_rx);
        let started = ProgressEvent::started(&job);

        if let Err(err) = self.store.insert(job) {
            error!(job = %id, error = %err, "job record could not be created");
            self.store
                .mark_failed(&id, format!("job setup failed: {err}"), Utc::now())?;
            let failed = self.store.load(&id)?;
            let _ = events_tx.send(started);
            let _ = events_tx.send(ProgressEvent::finished(&failed));
            return Ok(id);
        }
        let _ = events_tx.send(started);

        let no_accounts = !self.bounce.has_accounts();
        if no_accounts {
            warn!(job = %id, "no accounts configured, every address resolves risky");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut outstanding = BTreeMap::new();
        let mut workers = Vec::new();
        if !no_accounts {
            let handoff = BounceHandoff::new(self.bounce.clone(), existing_batch.map(str::to_string));
            for (index, addresses) in partitions.into_iter().enumerate() {
                outstanding.insert(index, addresses.clone());
                let partition = Partition {
                    id: index,
                    addresses,
                };
                let handle = tokio::spawn(run_partition(
                    partition,
                    self.pipeline.clone(),
                    handoff.clone(),
                    tx.clone(),
                ));
                workers.push((index, handle));
            }
        }
        drop(tx);

        let supervisor = Supervisor {
            job_id: id.clone(),
            store: self.store.clone(),
            options: self.options,
            rx,
            workers,
            outstanding,
            no_accounts,
            events: events_tx,
        };
        let handle = tokio::spawn(supervisor.run());
        let mut supervisors = self.supervisors.lock();
        supervisors.retain(|_, running| !running.is_finished());
        supervisors.insert(id.clone(), handle);
        Ok(id)
    }

    /// Takes the progress stream of a job submitted by this orchestrator.
    /// Each stream can be taken once.
    pub fn stream(&self, job_id: &str) -> Result<JobStream, OrchestratorError> {
        let rx = self
            .streams
            .lock()
            .remove(job_id)
            .ok_or_else(|| OrchestratorError::StreamUnavailable(job_id.to_string()))?;
        Ok(JobStream {
            job_id: job_id.to_string(),
            rx,
        })
    }

    pub fn status(&self, job_id: &str) -> Result<VerificationJob, OrchestratorError> {
        Ok(self.store.load(job_id)?)
    }

    /// Waits until the job is terminal, or until nothing in this process is
    /// working on it any more (e.g. a job left unfinished by a crash).
    pub async fn wait(&self, job_id: &str) -> Result<VerificationJob, OrchestratorError> {
        if let Ok(mut stream) = self.stream(job_id) {
            while let Some(event) = stream.next().await {
                if event.is_final() {
                    break;
                }
            }
        }
        loop {
            let job = self.status(job_id)?;
            let supervised = self
                .supervisors
                .lock()
                .get(job_id)
                .is_some_and(|handle| !handle.is_finished());
            if job.is_terminal() || !supervised {
                return Ok(job);
            }
            time::sleep(self.options.poll_interval).await;
        }
    }

    pub fn list(&self) -> Result<Vec<VerificationJob>, OrchestratorError> {
        Ok(self.store.list()?)
    }

    pub fn set_label(&self, job_id: &str, label: Option<String>) -> Result<(), OrchestratorError> {
        Ok(self.store.set_label(job_id, label)?)
    }

    pub fn delete(&self, job_id: &str) -> Result<(), OrchestratorError> {
        self.streams.lock().remove(job_id);
        Ok(self.store.delete(job_id)?)
    }
}

#[derive(Default)]
struct Drained {
    outcomes: Vec<VerificationOutcome>,
    failed: Vec<(usize, String)>,
}

/// Drains one job's worker channel on a fixed tick and owns its lifecycle.
struct Supervisor {
    job_id: JobId,
    store: Arc<JobStatusStore>,
    options: OrchestratorOptions,
    rx: UnboundedReceiver<WorkerMessage>,
    workers: Vec<(usize, JoinHandle<()>)>,
    /// Partitions that have not sent their `Completed` sentinel yet.
    outstanding: BTreeMap<usize, Vec<Address>>,
    no_accounts: bool,
    events: UnboundedSender<ProgressEvent>,
}

impl Supervisor {
    async fn run(mut self) {
        let started = Instant::now();
        let mut last_activity = started;
        let mut ticker = time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut held_back: Vec<ProgressEvent> = Vec::new();

        loop {
            ticker.tick().await;
            let id = self.job_id.clone();

            // workers that exited before this drain have all their messages queued
            let exited: Vec<usize> = self
                .workers
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(index, _)| *index)
                .collect();
            let drained = self.drain();
            let mut fresh = drained.outcomes;

            for (partition, error) in drained.failed {
                warn!(job = %id, partition, %error, "verification worker failed");
                fresh.extend(self.abandon(partition));
            }
            for &partition in &exited {
                if self.outstanding.contains_key(&partition) {
                    warn!(job = %id, partition, "worker exited without completing");
                    fresh.extend(self.abandon(partition));
                }
            }
            self.workers.retain(|(index, _)| !exited.contains(index));

            if self.no_accounts {
                match self.store.with_job(&id, |job| job.unresolved().cloned().collect::<Vec<_>>()) {
                    Ok(unresolved) => fresh.extend(unresolved.into_iter().map(|address| {
                        VerificationOutcome::risky(address, REASON_NO_ACCOUNTS, STRATEGY_ORCHESTRATOR)
                    })),
                    Err(err) => error!(job = %id, error = %err, "job record vanished"),
                }
            }

            let accepted = match self.store.merge_all(&id, fresh) {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(job = %id, error = %err, "job record vanished, supervisor stops");
                    return;
                }
            };
            if !accepted.is_empty() {
                last_activity = Instant::now();
            }

            let timed_out = started.elapsed() >= self.options.max_wait;
            let idle = last_activity.elapsed() >= self.options.inactivity;
            let finished = self.outstanding.is_empty() || timed_out || idle;
            if !self.outstanding.is_empty() && finished {
                warn!(
                    job = %id,
                    partitions = self.outstanding.len(),
                    timed_out,
                    idle,
                    "force-resolving unfinished job"
                );
            }

            let now = Utc::now();
            let forced = self
                .store
                .with_job(&id, |job| {
                    job.advance(JobStatus::Running, now);
                    let mut forced = Vec::new();
                    if finished {
                        let pending: Vec<Address> = job.unresolved().cloned().collect();
                        for address in pending {
                            let outcome = VerificationOutcome::risky(
                                address,
                                REASON_TIMED_OUT,
                                STRATEGY_ORCHESTRATOR,
                            );
                            if job.merge(outcome.clone()) {
                                forced.push(outcome);
                            }
                        }
                        job.advance(JobStatus::Completed, now);
                    }
                    forced
                })
                .unwrap_or_default();

            held_back.extend(
                accepted
                    .iter()
                    .chain(forced.iter())
                    .map(|outcome| ProgressEvent::outcome(&id, outcome)),
            );

            let persisted = match self.store.persist(&id) {
                Ok(()) => {
                    self.emit(&mut held_back);
                    true
                }
                Err(err) if finished => {
                    error!(job = %id, error = %err, "final job snapshot not persisted");
                    self.emit(&mut held_back);
                    false
                }
                Err(err) => {
                    warn!(job = %id, error = %err, "job snapshot not persisted, holding events back");
                    false
                }
            };

            if finished {
                match self.store.load(&id) {
                    Ok(job) => {
                        info!(
                            job = %id,
                            status = %job.status,
                            valid = job.counts.valid,
                            invalid = job.counts.invalid,
                            risky = job.counts.risky,
                            custom = job.counts.custom,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "job finished"
                        );
                        let _ = self.events.send(ProgressEvent::finished(&job));
                    }
                    Err(err) => error!(job = %id, error = %err, "job record vanished"),
                }
                // sans snapshot final, la mémoire reste la seule copie
                if persisted {
                    self.store.release(&id);
                }
                return;
            }
        }
    }

    fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.rx.try_recv() {
                Ok(WorkerMessage::Outcome(outcome)) => drained.outcomes.push(outcome),
                Ok(WorkerMessage::Completed { partition }) => {
                    self.outstanding.remove(&partition);
                }
                Ok(WorkerMessage::Failed { partition, error }) => {
                    drained.failed.push((partition, error));
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        drained
    }

    /// Risky outcomes for a dead partition; addresses it already reported
    /// are dropped again by the merge.
    fn abandon(&mut self, partition: usize) -> Vec<VerificationOutcome> {
        self.outstanding
            .remove(&partition)
            .unwrap_or_default()
            .into_iter()
            .map(|address| {
                VerificationOutcome::risky(address, REASON_WORKER_FAILED, STRATEGY_ORCHESTRATOR)
            })
            .collect()
    }

    fn emit(&self, events: &mut Vec<ProgressEvent>) {
        for event in events.drain(..) {
            // nobody listening is fine, the store has everything
            let _ = self.events.send(event);
        }
    }
}
