//! One JSON file per task under the pool's tasks directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use spm_core::{SpmError, SpmResult, TaskId, TaskRecord};
use tracing::warn;

/// Extension of persisted task files
pub const TASK_FILE_EXTENSION: &str = "task";

/// Directory-backed task record store
#[derive(Debug, Clone)]
pub struct TaskStore {
    dir: PathBuf,
}

impl TaskStore {
    /// Open (creating if needed) the store at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> SpmResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            SpmError::persistence(format!("Failed to create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{id}.{TASK_FILE_EXTENSION}"))
    }

    /// Write a record atomically (temp file, fsync, rename)
    pub fn save(&self, record: &TaskRecord) -> SpmResult<()> {
        let path = self.path_for(record.id);
        let tmp = path.with_extension(format!("{TASK_FILE_EXTENSION}.tmp"));
        let bytes = serde_json::to_vec_pretty(record)?;
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            SpmError::persistence(format!("Failed to write task {}: {e}", record.id))
        })
    }

    /// Delete a record; missing files are not an error
    pub fn remove(&self, id: TaskId) -> SpmResult<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SpmError::persistence(format!(
                "Failed to remove task {id}: {e}"
            ))),
        }
    }

    /// Load every readable record; unreadable files are logged and skipped
    pub fn load_all(&self) -> SpmResult<Vec<TaskRecord>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            SpmError::persistence(format!("Failed to list {}: {e}", self.dir.display()))
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    warn!(error = %e, "Failed to read task directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some(TASK_FILE_EXTENSION) {
                continue;
            }
            match fs::read(&path)
                .map_err(|e| SpmError::persistence(e.to_string()))
                .and_then(|bytes| Ok(serde_json::from_slice::<TaskRecord>(&bytes)?))
            {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable task record"),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spm_core::{DomainId, ImageId, JobSpec, PoolId, TaskStatus, VolumeId};

    fn record() -> TaskRecord {
        TaskRecord::new(
            "delete",
            "spm",
            PoolId::new(),
            1,
            JobSpec::DeleteVolume {
                domain: DomainId::new(),
                image: ImageId::new(),
                volumes: vec![VolumeId::new()],
                post_zero: false,
            },
        )
    }

    #[test]
    fn test_save_overwrites_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("tasks")).unwrap();
        let mut task = record();
        store.save(&task).unwrap();
        task.status = TaskStatus::Done;
        store.save(&task).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![task]);
        let files: Vec<_> = fs::read_dir(store.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_corrupt_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let task = record();
        store.save(&task).unwrap();
        fs::write(dir.path().join("garbage.task"), b"{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.load_all().unwrap(), vec![task]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path()).unwrap();
        let task = record();
        store.save(&task).unwrap();
        store.remove(task.id).unwrap();
        store.remove(task.id).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }
}
