//! Task scheduler: persisted records executed by a fixed worker pool.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use spm_core::effects::{JobRunner, PoolHandle, ResourceManager};
use spm_core::{JobSpec, SpmError, SpmResult, StorageError, TaskId, TaskRecord, TaskStatus};
use tracing::{debug, info, warn};

use super::run_job_locked;
use super::store::TaskStore;
use crate::lver::{Epoch, VersionCounter};

/// Outcome of reloading persisted tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    /// Non-terminal tasks resubmitted to the workers
    pub resumed: usize,
    /// Terminal tasks loaded for queries only
    pub finished: usize,
}

struct TaskEntry {
    record: TaskRecord,
    abort_requested: bool,
}

struct SchedulerInner {
    pool: Arc<dyn PoolHandle>,
    store: TaskStore,
    runner: Arc<dyn JobRunner>,
    resources: Arc<dyn ResourceManager>,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    closed: AtomicBool,
}

/// Accepts jobs as tasks, persists them and runs them on worker threads.
///
/// Closing the scheduler unloads tasks from memory without cancelling the
/// ones already running; their records stay on disk for the next recovery.
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
    sender: Mutex<Option<Sender<TaskId>>>,
}

impl TaskScheduler {
    /// Open the pool's task store and spawn `workers` threads
    pub fn open(
        pool: Arc<dyn PoolHandle>,
        runner: Arc<dyn JobRunner>,
        resources: Arc<dyn ResourceManager>,
        workers: usize,
    ) -> SpmResult<Self> {
        let store = TaskStore::open(pool.tasks_dir())?;
        let inner = Arc::new(SchedulerInner {
            pool,
            store,
            runner,
            resources,
            tasks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let (sender, receiver) = crossbeam_channel::unbounded();
        for index in 0..workers {
            let worker = Arc::clone(&inner);
            let receiver: Receiver<TaskId> = receiver.clone();
            thread::Builder::new()
                .name(format!("spm-task-{index}"))
                .spawn(move || worker.worker_loop(&receiver))
                .map_err(|e| StorageError::failed(format!("Failed to spawn task worker: {e}")))?;
        }
        debug!(pool = %inner.pool.id(), workers, "Task scheduler opened");

        Ok(Self {
            inner,
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Reload persisted records, resubmitting the unfinished ones
    pub fn recover(&self) -> SpmResult<RecoverySummary> {
        let mut summary = RecoverySummary::default();
        for mut record in self.inner.store.load_all()? {
            if record.status.is_terminal() {
                summary.finished += 1;
                self.inner.tasks.lock().insert(
                    record.id,
                    TaskEntry {
                        record,
                        abort_requested: false,
                    },
                );
                continue;
            }
            record.status = TaskStatus::Pending;
            self.inner.store.save(&record)?;
            self.enqueue(record)?;
            summary.resumed += 1;
        }
        info!(
            pool = %self.inner.pool.id(),
            resumed = summary.resumed,
            finished = summary.finished,
            "Recovered persisted tasks"
        );
        Ok(summary)
    }

    /// Register, persist and queue a new task
    pub fn submit(
        &self,
        name: impl Into<String>,
        tag: impl Into<String>,
        lver: i64,
        job: JobSpec,
    ) -> SpmResult<TaskId> {
        let record = TaskRecord::new(name, tag, self.inner.pool.id(), lver, job);
        let id = record.id;
        self.inner.store.save(&record)?;
        debug!(task = %id, name = %record.name, op = record.job.kind(), "Task scheduled");
        self.enqueue(record)?;
        Ok(id)
    }

    fn enqueue(&self, record: TaskRecord) -> SpmResult<()> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(SpmError::persistence("Task scheduler is closed"));
        };
        let id = record.id;
        self.inner.tasks.lock().insert(
            id,
            TaskEntry {
                record,
                abort_requested: false,
            },
        );
        sender
            .send(id)
            .map_err(|_| SpmError::persistence("Task workers have exited"))
    }

    /// Ids of non-terminal tasks carrying `tag`
    pub fn outstanding(&self, tag: &str) -> Vec<TaskId> {
        let tasks = self.inner.tasks.lock();
        let mut ids: Vec<TaskId> = tasks
            .values()
            .filter(|e| e.record.tag == tag && !e.record.status.is_terminal())
            .map(|e| e.record.id)
            .collect();
        ids.sort();
        ids
    }

    /// Current record of a task
    pub fn record(&self, id: TaskId) -> SpmResult<TaskRecord> {
        self.inner
            .tasks
            .lock()
            .get(&id)
            .map(|e| e.record.clone())
            .ok_or(SpmError::UnknownTask { task: id })
    }

    /// All loaded records, optionally filtered by tag
    pub fn list(&self, tag: Option<&str>) -> Vec<TaskRecord> {
        let tasks = self.inner.tasks.lock();
        let mut records: Vec<TaskRecord> = tasks
            .values()
            .filter(|e| tag.map_or(true, |t| e.record.tag == t))
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Request an abort; only pending tasks are affected
    pub fn abort(&self, id: TaskId) -> SpmResult<TaskStatus> {
        let mut tasks = self.inner.tasks.lock();
        let entry = tasks.get_mut(&id).ok_or(SpmError::UnknownTask { task: id })?;
        if entry.record.status == TaskStatus::Pending {
            entry.abort_requested = true;
            info!(task = %id, "Abort requested for pending task");
        } else {
            debug!(task = %id, status = %entry.record.status, "Abort ignored");
        }
        Ok(entry.record.status)
    }

    /// Forget a terminal task and delete its record
    pub fn clear(&self, id: TaskId) -> SpmResult<()> {
        let mut tasks = self.inner.tasks.lock();
        let entry = tasks.get(&id).ok_or(SpmError::UnknownTask { task: id })?;
        if !entry.record.status.is_terminal() {
            return Err(SpmError::TaskNotFinished { task: id });
        }
        self.inner.store.remove(id)?;
        tasks.remove(&id);
        Ok(())
    }

    /// Stop accepting work and unload all tasks; returns how many were loaded
    pub fn close(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.sender.lock().take();
        let unloaded = self.inner.tasks.lock().drain().count();
        if unloaded > 0 {
            debug!(pool = %self.inner.pool.id(), unloaded, "Tasks unloaded");
        }
        unloaded
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

impl SchedulerInner {
    fn worker_loop(&self, receiver: &Receiver<TaskId>) {
        for id in receiver.iter() {
            if self.closed.load(Ordering::SeqCst) {
                continue;
            }
            self.execute(id);
        }
    }

    fn execute(&self, id: TaskId) {
        let mut record = {
            let mut tasks = self.tasks.lock();
            let Some(entry) = tasks.get_mut(&id) else {
                return;
            };
            if entry.record.status != TaskStatus::Pending {
                return;
            }
            if entry.abort_requested {
                entry.record.status = TaskStatus::Aborted;
                self.persist(&entry.record);
                info!(task = %id, "Task aborted before execution");
                return;
            }
            entry.record.status = TaskStatus::Running;
            if let Err(e) = self.store.save(&entry.record) {
                warn!(task = %id, error = %e, "Failed to persist running state, task not run");
                entry.record.status = TaskStatus::Failed;
                entry.record.error = Some(e.to_string());
                return;
            }
            entry.record.clone()
        };

        match self.pool.read_metadata() {
            Ok(metadata) => {
                if let Epoch::Stale { recorded, live } =
                    VersionCounter::check(record.lver, metadata.lver)
                {
                    warn!(task = %id, recorded, live, "Running task scheduled under a stale epoch");
                }
            }
            Err(e) => debug!(task = %id, error = %e, "Could not read pool epoch"),
        }

        let result = run_job_locked(self.resources.as_ref(), self.runner.as_ref(), &record.job);
        match result {
            Ok(()) => {
                record.status = TaskStatus::Done;
                info!(task = %id, op = record.job.kind(), "Task finished");
            }
            Err(e) => {
                record.status = TaskStatus::Failed;
                record.error = Some(e.to_string());
                warn!(task = %id, op = record.job.kind(), error = %e, "Task failed");
            }
        }

        self.persist(&record);
        if let Some(entry) = self.tasks.lock().get_mut(&id) {
            entry.record = record;
        }
    }

    fn persist(&self, record: &TaskRecord) {
        if let Err(e) = self.store.save(record) {
            warn!(task = %record.id, error = %e, "Failed to persist task state");
        }
    }
}
