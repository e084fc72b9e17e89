//! Append-only face store persisted as a single JSON array.
//!
//! Reads are forgiving: a missing, empty or corrupt file is an empty store.
//! Writes replace the file atomically via a sibling temp file and rename.

use crate::types::FaceRecord;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing face store: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Face records for one store path.
#[derive(Debug, Clone)]
pub struct FaceStore {
    path: PathBuf,
}

impl FaceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read every stored record. Never fails.
    pub fn load(&self) -> Vec<FaceRecord> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "face store unreadable; treating as empty");
                return Vec::new();
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Vec<FaceRecord>>(trimmed) {
            Ok(records) => {
                tracing::debug!(path = %self.path.display(), records = records.len(), "face store loaded");
                records
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "face store corrupt; treating as empty");
                Vec::new()
            }
        }
    }

    /// Append `new_records` after the existing ones and persist the result.
    ///
    /// Returns the total number of records now stored.
    pub fn append(&self, new_records: &[FaceRecord]) -> Result<usize, StoreError> {
        let mut records = self.load();
        records.extend_from_slice(new_records);
        self.write_all(&records)?;

        tracing::info!(
            path = %self.path.display(),
            appended = new_records.len(),
            total = records.len(),
            "face store updated"
        );
        Ok(records.len())
    }

    fn write_all(&self, records: &[FaceRecord]) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| StoreError::io("creating store directory", &parent, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "faces.json".to_string());
        let tmp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let payload = serde_json::to_vec(records)?;

        let result = write_synced(&tmp_path, &payload)
            .and_then(|()| {
                fs::rename(&tmp_path, &self.path)
                    .map_err(|e| StoreError::io("replacing face store", &self.path, e))
            })
            .and_then(|()| sync_dir(&parent));

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

fn write_synced(path: &Path, payload: &[u8]) -> Result<(), StoreError> {
    let mut file =
        File::create(path).map_err(|e| StoreError::io("creating temp store file", path, e))?;
    file.write_all(payload)
        .map_err(|e| StoreError::io("writing temp store file", path, e))?;
    file.sync_all()
        .map_err(|e| StoreError::io("syncing temp store file", path, e))
}

fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| StoreError::io("syncing store directory", dir, e))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(name: &str, values: Vec<f32>) -> FaceRecord {
        FaceRecord {
            filename: name.into(),
            embedding: values,
        }
    }

    #[test]
    fn test_load_missing_store_is_empty() {
        let dir = tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));
        assert!(!store.exists());
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_load_empty_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.json");
        fs::write(&path, "  \n").unwrap();
        assert!(FaceStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_load_malformed_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.json");
        fs::write(&path, "{not json").unwrap();
        assert!(FaceStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_load_non_array_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.json");
        fs::write(&path, r#"{"filename":"a.jpg","embedding":[1.0]}"#).unwrap();
        assert!(FaceStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_load_reads_existing_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.json");
        fs::write(
            &path,
            r#"[{"filename": "a.jpg", "embedding": [0.1, 0.2]}, {"filename": "b.jpg", "embedding": [0.3, 0.4]}]"#,
        )
        .unwrap();

        let records = FaceStore::new(&path).load();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].filename, "a.jpg");
        assert_eq!(records[1].embedding, vec![0.3, 0.4]);
    }

    #[test]
    fn test_append_preserves_order() {
        let dir = tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));

        let existing = vec![record("old1.jpg", vec![1.0, 0.0]), record("old2.jpg", vec![0.0, 1.0])];
        assert_eq!(store.append(&existing).unwrap(), 2);

        let r1 = record("new.jpg", vec![0.5, 0.5]);
        let r2 = record("new.jpg", vec![-0.5, 0.5]);
        assert_eq!(store.append(&[r1.clone(), r2.clone()]).unwrap(), 4);

        let loaded = store.load();
        assert_eq!(loaded, vec![existing[0].clone(), existing[1].clone(), r1, r2]);
    }

    #[test]
    fn test_append_over_corrupt_store_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faces.json");
        fs::write(&path, "garbage").unwrap();

        let store = FaceStore::new(&path);
        store.append(&[record("a.jpg", vec![1.0])]).unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn test_append_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("events/42/faces.json"));
        store.append(&[record("a.jpg", vec![1.0])]).unwrap();
        assert!(store.exists());
    }

    #[test]
    fn test_append_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("faces.json"));
        store.append(&[record("a.jpg", vec![1.0])]).unwrap();
        store.append(&[record("b.jpg", vec![1.0])]).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["faces.json".to_string()]);
    }

    #[test]
    fn test_failed_replace_keeps_previous_content() {
        let dir = tempdir().unwrap();
        // A non-empty directory at the store path cannot be renamed over.
        let path = dir.path().join("faces.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep.txt"), b"previous").unwrap();

        let store = FaceStore::new(&path);
        let err = store.append(&[record("a.jpg", vec![1.0])]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Io { context: "replacing face store", .. }
        ));

        assert_eq!(fs::read(path.join("keep.txt")).unwrap(), b"previous");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["faces.json".to_string()]);
    }
}
