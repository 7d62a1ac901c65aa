use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bounce::types::BounceBatch;
use crate::store::{StoreError, is_plain_id, read_json, write_json_atomic};

/// Bounce batches on disk (`<dir>/<batch_id>.json`), with one lock per batch.
///
/// Every read-modify-write of a batch must hold that batch's lock; the
/// snapshot is always re-read under the lock so concurrent send and check
/// calls never lose each other's updates. A batch's lock only lives in the
/// table while some caller holds a [`BatchLock`] for it.
pub struct BatchStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_for(&self, batch_id: &str) -> BatchLock<'_> {
        let lock = self
            .locks
            .lock()
            .entry(batch_id.to_string())
            .or_default()
            .clone();
        BatchLock {
            store: self,
            batch_id: batch_id.to_string(),
            lock,
        }
    }

    fn path(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{batch_id}.json"))
    }

    /// `Ok(None)` for unknown batches and for ids that do not name a file
    /// in the store's directory.
    pub fn load(&self, batch_id: &str) -> Result<Option<BounceBatch>, StoreError> {
        if !is_plain_id(batch_id) {
            return Ok(None);
        }
        read_json(&self.path(batch_id))
    }

    pub fn require(&self, batch_id: &str) -> Result<BounceBatch, StoreError> {
        self.load(batch_id)?
            .ok_or_else(|| StoreError::not_found("bounce batch", batch_id))
    }

    pub fn save(&self, batch: &BounceBatch) -> Result<(), StoreError> {
        if !is_plain_id(&batch.id) {
            return Err(StoreError::InvalidId {
                kind: "bounce batch",
                id: batch.id.clone(),
            });
        }
        write_json_atomic(&self.path(&batch.id), batch)
    }

    /// All readable batches, newest first.
    pub fn list(&self) -> Result<Vec<BounceBatch>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.dir, err)),
        };

        let mut batches = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| StoreError::io(&self.dir, err))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(batch) = read_json::<BounceBatch>(&path)? {
                batches.push(batch);
            }
        }
        batches.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));
        Ok(batches)
    }
}

/// Handle on one batch's lock. Dropping the last handle removes the lock
/// from the store's table.
pub struct BatchLock<'a> {
    store: &'a BatchStore,
    batch_id: String,
    lock: Arc<Mutex<()>>,
}

impl Deref for BatchLock<'_> {
    type Target = Mutex<()>;

    fn deref(&self) -> &Mutex<()> {
        &self.lock
    }
}

impl Drop for BatchLock<'_> {
    fn drop(&mut self) {
        let mut locks = self.store.locks.lock();
        // handles are only cloned under the table lock: 2 = table + self
        let unused = Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.batch_id)
                .is_some_and(|held| Arc::ptr_eq(held, &self.lock));
        if unused {
            locks.remove(&self.batch_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn ids_outside_the_store_are_never_read() {
        let root = tempfile::tempdir().unwrap();
        let store = BatchStore::new(root.path().join("bounce"));
        let outside = BounceBatch::new("outside", Utc.timestamp_opt(1, 0).unwrap());
        write_json_atomic(&root.path().join("jobs/x/status.json"), &outside).unwrap();

        assert_eq!(store.load("../jobs/x/status").unwrap(), None);
        assert!(store.require("../jobs/x/status").unwrap_err().is_not_found());
        assert!(store.require(".hidden").unwrap_err().is_not_found());

        let escaping = BounceBatch::new("../escape", Utc.timestamp_opt(1, 0).unwrap());
        assert!(matches!(
            store.save(&escaping),
            Err(StoreError::InvalidId { .. })
        ));
        assert!(!root.path().join("escape.json").exists());
    }

    #[test]
    fn locks_leave_the_table_with_their_last_holder() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path());

        let first = store.lock_for("bounce_1_aaaaaaaa");
        let second = store.lock_for("bounce_1_aaaaaaaa");
        assert!(Arc::ptr_eq(&first.lock, &second.lock));
        {
            let _guard = first.lock();
            assert!(second.try_lock().is_none());
        }

        drop(first);
        assert_eq!(store.locks.lock().len(), 1);
        drop(second);
        assert!(store.locks.lock().is_empty());

        for _ in 0..3 {
            let lock = store.lock_for("bounce_2_bbbbbbbb");
            let _guard = lock.lock();
        }
        assert!(store.locks.lock().is_empty());
    }
}
