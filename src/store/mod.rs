//! JSON snapshot files.
//!
//! Writes go to a temporary file in the destination directory which is then
//! renamed over the target, so readers only ever see a complete snapshot.

mod error;

pub use error::StoreError;

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::warn;

/// Whether `id` can name a file or directory directly under a store's root.
/// Ids come from users on the CLI.
pub fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['/', '\\']) && !id.starts_with('.')
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|err| StoreError::io(dir, err))?;

    let bytes =
        serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize { source })?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
    tmp.write_all(&bytes)
        .map_err(|err| StoreError::io(tmp.path(), err))?;
    tmp.as_file()
        .sync_all()
        .map_err(|err| StoreError::io(tmp.path(), err))?;
    tmp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

/// `Ok(None)` when the file is missing or does not parse; the latter is
/// logged and otherwise treated as if nothing had been stored.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::io(path, err)),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring corrupt snapshot");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn plain_ids() {
        assert!(is_plain_id("job_1700000000_0a1b2c3d"));
        assert!(is_plain_id("bounce_1700000000_0a1b2c3d"));
        for id in ["", ".", "..", ".hidden", "../jobs/x/status", "a/b", "a\\b"] {
            assert!(!is_plain_id(id), "{id:?}");
        }
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/snapshot.json");
        let value = BTreeMap::from([("a".to_string(), 1u32), ("b".to_string(), 2)]);

        write_json_atomic(&path, &value).expect("write");
        let back: Option<BTreeMap<String, u32>> = read_json(&path).expect("read");
        assert_eq!(back, Some(value));
    }

    #[test]
    fn overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.json");
        write_json_atomic(&path, &1u32).expect("first write");
        write_json_atomic(&path, &2u32).expect("second write");

        let entries = fs::read_dir(dir.path()).expect("list").count();
        assert_eq!(entries, 1);
        assert_eq!(read_json::<u32>(&path).expect("read"), Some(2));
    }

    #[test]
    fn missing_and_corrupt_read_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.json");
        assert_eq!(read_json::<u32>(&path).expect("missing"), None);

        fs::write(&path, b"{ not json").expect("write garbage");
        assert_eq!(read_json::<u32>(&path).expect("corrupt"), None);
    }
}
