use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::jobs::types::{JobId, JobStatus, VerificationJob};
use crate::outcome::VerificationOutcome;
use crate::store::{StoreError, is_plain_id, read_json, write_json_atomic};

const SNAPSHOT: &str = "status.json";

type JobCell = Arc<Mutex<VerificationJob>>;

/// Job records: one mutex per job in memory, one JSON snapshot per job on
/// disk (`<dir>/<job_id>/status.json`).
///
/// Every mutation goes through the job's own mutex; the registry lock is only
/// held long enough to find or insert that mutex. Finished jobs leave memory
/// once their final snapshot is written (see [`JobStatusStore::release`]) and
/// plain reads never bring them back.
pub struct JobStatusStore {
    dir: PathBuf,
    jobs: Mutex<HashMap<JobId, JobCell>>,
}

impl JobStatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(id).join(SNAPSHOT)
    }

    fn cached(&self, id: &str) -> Option<JobCell> {
        self.jobs.lock().get(id).cloned()
    }

    fn cell(&self, id: &str) -> Result<JobCell, StoreError> {
        if let Some(cell) = self.cached(id) {
            return Ok(cell);
        }
        let job = self
            .read_snapshot(id)?
            .ok_or_else(|| StoreError::not_found("job", id))?;
        let mut jobs = self.jobs.lock();
        Ok(jobs
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(job)))
            .clone())
    }

    fn read_snapshot(&self, id: &str) -> Result<Option<VerificationJob>, StoreError> {
        if !is_plain_id(id) {
            return Ok(None);
        }
        read_json(&self.path(id))
    }

    /// Registers a new job. The record is kept in memory even if the first
    /// snapshot cannot be written, so the caller can still mark it failed.
    pub fn insert(&self, job: VerificationJob) -> Result<(), StoreError> {
        let id = job.id.clone();
        let cell = Arc::new(Mutex::new(job));
        self.jobs.lock().insert(id.clone(), cell.clone());
        let guard = cell.lock();
        write_json_atomic(&self.path(&id), &*guard)
    }

    /// Applies one outcome; replaying it has no further effect.
    pub fn merge(&self, id: &str, outcome: VerificationOutcome) -> Result<bool, StoreError> {
        Ok(self.cell(id)?.lock().merge(outcome))
    }

    /// Applies a batch of outcomes and returns the ones that were new, in
    /// arrival order.
    pub fn merge_all(
        &self,
        id: &str,
        outcomes: Vec<VerificationOutcome>,
    ) -> Result<Vec<VerificationOutcome>, StoreError> {
        let cell = self.cell(id)?;
        let mut job = cell.lock();
        let mut accepted = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if job.merge(outcome.clone()) {
                accepted.push(outcome);
            }
        }
        Ok(accepted)
    }

    /// Runs `f` on the job under its lock; nothing is written.
    pub fn with_job<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut VerificationJob) -> R,
    ) -> Result<R, StoreError> {
        let cell = self.cell(id)?;
        let mut job = cell.lock();
        Ok(f(&mut job))
    }

    /// Writes the current snapshot atomically.
    pub fn persist(&self, id: &str) -> Result<(), StoreError> {
        let cell = self.cell(id)?;
        let job = cell.lock();
        write_json_atomic(&self.path(id), &*job)?;
        debug!(job = %id, processed = job.processed(), status = %job.status, "job persisted");
        Ok(())
    }

    /// `with_job` followed by `persist`, under one lock.
    pub fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut VerificationJob) -> R,
    ) -> Result<R, StoreError> {
        let cell = self.cell(id)?;
        let mut job = cell.lock();
        let result = f(&mut job);
        write_json_atomic(&self.path(id), &*job)?;
        Ok(result)
    }

    pub fn load(&self, id: &str) -> Result<VerificationJob, StoreError> {
        match self.cached(id) {
            Some(cell) => Ok(cell.lock().clone()),
            None => self
                .read_snapshot(id)?
                .ok_or_else(|| StoreError::not_found("job", id)),
        }
    }

    /// Drops a finished job from memory; later reads go to its snapshot.
    /// Call it only once the final snapshot is on disk. Returns `false` while
    /// the job is still running or some caller holds its record.
    pub fn release(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock();
        let Some(cell) = jobs.get(id) else {
            return false;
        };
        // la table elle-même garde une référence
        if Arc::strong_count(cell) > 1 || !cell.lock().is_terminal() {
            return false;
        }
        jobs.remove(id);
        debug!(job = %id, "finished job released from memory");
        true
    }

    #[cfg(test)]
    pub(crate) fn resident(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Every known job, newest first. Unreadable snapshots are skipped.
    pub fn list(&self) -> Result<Vec<VerificationJob>, StoreError> {
        let cells: Vec<JobCell> = self.jobs.lock().values().cloned().collect();
        let mut jobs: HashMap<JobId, VerificationJob> = cells
            .iter()
            .map(|cell| {
                let job = cell.lock().clone();
                (job.id.clone(), job)
            })
            .collect();

        match fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry.map_err(|err| StoreError::io(&self.dir, err))?;
                    let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                        continue;
                    };
                    if jobs.contains_key(&id) || !entry.path().is_dir() {
                        continue;
                    }
                    if let Some(job) = self.read_snapshot(&id)? {
                        jobs.insert(id, job);
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::io(&self.dir, err)),
        }

        let mut jobs: Vec<VerificationJob> = jobs.into_values().collect();
        jobs.sort_by(|a, b| b.started.cmp(&a.started).then_with(|| b.id.cmp(&a.id)));
        Ok(jobs)
    }

    pub fn set_label(&self, id: &str, label: Option<String>) -> Result<(), StoreError> {
        self.update(id, |job| job.label = label)?;
        self.release(id);
        Ok(())
    }

    /// Forgets a job and removes its directory.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let status = self.status(id)?;
        if !status.is_terminal() {
            warn!(job = %id, %status, "deleting a job that is still running");
        }
        self.jobs.lock().remove(id);
        let dir = self.dir.join(id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::io(dir, err)),
        }
    }

    /// Marks a job failed and persists it; used when setup goes wrong.
    pub fn mark_failed(
        &self,
        id: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let message = message.into();
        let moved = self.with_job(id, |job| job.fail(message, now))?;
        if let Err(err) = self.persist(id) {
            warn!(job = %id, error = %err, "failed job could not be persisted");
        }
        Ok(moved)
    }

    pub fn status(&self, id: &str) -> Result<JobStatus, StoreError> {
        match self.cached(id) {
            Some(cell) => Ok(cell.lock().status),
            None => Ok(self.load(id)?.status),
        }
    }
}
