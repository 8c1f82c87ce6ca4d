//! Per-pool SPM coordinator
//!
//! Owns the role state machine for one pool and composes the cluster lock,
//! the version counter, the upgrade campaign, the task scheduler and the
//! mailbox behind a role-gated surface.
//!
//! # Locking
//!
//! Role, cached `lver`, the pool handle and the running subsystems live behind
//! one instance mutex. `start` holds it only for its checks and transitions;
//! the blocking lease acquisition and bootstrap steps run outside it, so a
//! concurrent `start` observes `CONTEND` and fails fast. Task submission
//! happens under the mutex, which makes scheduling atomic with the role.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use spm_core::effects::PoolHandle;
use spm_core::types::{LockMode, SPM_ID_FREE, STORAGE_NAMESPACE};
use spm_core::{
    DomainId, DomainVersion, HostId, ImageId, JobSpec, PoolId, PoolMetadata, Role, SpmContext,
    SpmError, SpmResult, SpmStatus, TaskId, TaskRecord, TaskStatus, VolumeId,
};
use tracing::{debug, error, info, warn};

use crate::guard::{RoleGuard, SpmOperation};
use crate::lver::VersionCounter;
use crate::mailbox::{MailboxMonitor, MailboxSettings};
use crate::role::transition;
use crate::tasks::TaskScheduler;
use crate::teardown::{TeardownReport, TeardownStep};
use crate::upgrade::{MasterDomainUpgrader, UpgradeStarted, UpgradeStatus};

/// Default number of hosts whose mailboxes are polled
pub const DEFAULT_MAX_HOST_ID: u32 = 250;

/// Arguments of [`SpmCoordinator::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    /// `spmId` the caller believes is stored in pool metadata
    pub prev_holder: i64,
    /// `lver` the caller believes is stored in pool metadata
    pub prev_lver: i64,
    /// Recovery mode requested by the management layer (logged only)
    pub recovery_mode: u32,
    /// Highest host id in the cluster
    pub max_host_id: u32,
    /// Version the master domain is expected to be at after election
    pub expected_domain_version: Option<DomainVersion>,
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            prev_holder: SPM_ID_FREE,
            prev_lver: 0,
            recovery_mode: 0,
            max_host_id: DEFAULT_MAX_HOST_ID,
            expected_domain_version: None,
        }
    }
}

struct InstanceState {
    role: Role,
    /// Set for the whole duration of a `start`, including its rollback
    acquiring: bool,
    lver: VersionCounter,
    pool: Option<Arc<dyn PoolHandle>>,
    scheduler: Option<Arc<TaskScheduler>>,
    mailbox: Option<MailboxMonitor>,
    master_mounted: bool,
}

/// What a start has set up, so release undoes exactly that.
#[derive(Default)]
struct Held {
    lease: bool,
    /// `lver` this attempt wrote into pool metadata
    stamped: Option<i64>,
    campaign: bool,
    master_mounted: bool,
    scheduler: Option<Arc<TaskScheduler>>,
    mailbox: Option<MailboxMonitor>,
}

/// SPM coordinator for one pool on this host.
pub struct SpmCoordinator {
    pool_id: PoolId,
    ctx: SpmContext,
    upgrader: MasterDomainUpgrader,
    state: Mutex<InstanceState>,
}

impl SpmCoordinator {
    /// Create a coordinator in the `FREE` role
    pub fn new(pool_id: PoolId, ctx: SpmContext) -> Self {
        let upgrader = MasterDomainUpgrader::new(pool_id, &ctx);
        Self {
            pool_id,
            ctx,
            upgrader,
            state: Mutex::new(InstanceState {
                role: Role::Free,
                acquiring: false,
                lver: VersionCounter::default(),
                pool: None,
                scheduler: None,
                mailbox: None,
                master_mounted: false,
            }),
        }
    }

    /// Pool this coordinator manages
    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    /// Current role
    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    /// Epoch of the election this host won, `-1` when not SPM
    pub fn lver(&self) -> i64 {
        self.state.lock().lver.current()
    }

    /// Whether the extension mailbox is being served
    pub fn mailbox_running(&self) -> bool {
        self.state.lock().mailbox.is_some()
    }

    fn cached_pool(&self, state: &mut InstanceState) -> SpmResult<Arc<dyn PoolHandle>> {
        if let Some(pool) = &state.pool {
            return Ok(Arc::clone(pool));
        }
        let pool = self.ctx.pools.get_pool(self.pool_id)?;
        state.pool = Some(Arc::clone(&pool));
        Ok(pool)
    }

    fn authorize(&self, state: &InstanceState, operation: SpmOperation) -> SpmResult<()> {
        RoleGuard::authorize(self.pool_id, operation, state.role)
    }

    // =========================================================================
    // Election
    // =========================================================================

    /// Become SPM for the pool.
    ///
    /// Succeeds immediately if already SPM. Any failure after `CONTEND` rolls
    /// back everything the attempt set up and returns the original error.
    pub fn start(&self, request: &StartRequest) -> SpmResult<()> {
        let pool = {
            let mut state = self.state.lock();
            match state.role {
                Role::Acquired => {
                    debug!(pool = %self.pool_id, "Already SPM, start is a no-op");
                    return Ok(());
                }
                Role::Contend => {
                    return Err(SpmError::ConcurrentAcquisition { pool: self.pool_id })
                }
                Role::Free if state.acquiring => {
                    return Err(SpmError::ConcurrentAcquisition { pool: self.pool_id })
                }
                Role::Free => {}
            }
            let pool = self.cached_pool(&mut state)?;
            state.role = transition(state.role, Role::Contend)?;
            state.acquiring = true;
            pool
        };

        info!(
            pool = %self.pool_id,
            host = %self.ctx.config.host(),
            recovery_mode = request.recovery_mode,
            max_host_id = request.max_host_id,
            "Contending for SPM role"
        );

        let mut held = Held::default();
        match self.acquire(&pool, request, &mut held) {
            Ok(lver) => {
                info!(pool = %self.pool_id, lver, "Acquired SPM role");
                Ok(())
            }
            Err(err) => {
                error!(pool = %self.pool_id, error = %err, "SPM acquisition failed, rolling back");
                if !matches!(err, SpmError::AcquisitionInterrupted { .. }) {
                    held.stamped = None;
                }
                let report = self.release(&pool, held);
                {
                    let mut state = self.state.lock();
                    if state.role == Role::Contend {
                        state.role = transition(Role::Contend, Role::Free)?;
                    }
                    state.acquiring = false;
                }
                match report.into_result(self.ctx.terminator.as_ref()) {
                    Err(fatal @ SpmError::Fatal { .. }) => Err(fatal),
                    Err(degraded) => {
                        warn!(pool = %self.pool_id, error = %degraded, "Rollback incomplete");
                        Err(err)
                    }
                    Ok(()) => Err(err),
                }
            }
        }
    }

    fn acquire(
        &self,
        pool: &Arc<dyn PoolHandle>,
        request: &StartRequest,
        held: &mut Held,
    ) -> SpmResult<i64> {
        let host = self.ctx.config.host();
        self.ctx.cluster_lock.acquire(self.pool_id, host)?;
        held.lease = true;
        self.ensure_contending()?;

        let lver = self.stamp_metadata(pool.as_ref(), host, request)?;
        held.stamped = Some(lver);

        held.campaign = true;
        {
            let state = self.state.lock();
            if state.role != Role::Contend {
                return Err(SpmError::AcquisitionInterrupted { pool: self.pool_id });
            }
            self.upgrader.open();
        }
        self.upgrader
            .run_campaign(pool.as_ref(), request.expected_domain_version)
            .map_err(|err| match self.ensure_contending() {
                Ok(()) => err,
                Err(interrupted) => interrupted,
            })?;

        pool.mount_master()?;
        held.master_mounted = true;
        pool.prepare_links()?;

        let scheduler = Arc::new(TaskScheduler::open(
            Arc::clone(pool),
            Arc::clone(&self.ctx.jobs),
            Arc::clone(&self.ctx.resources),
            self.ctx.config.task_workers,
        )?);
        held.scheduler = Some(Arc::clone(&scheduler));
        scheduler.recover()?;

        if pool.is_block_backed() && self.ctx.config.mailbox.extend_on_demand {
            match pool.mailbox() {
                Some(store) => {
                    held.mailbox = Some(MailboxMonitor::start(
                        self.pool_id,
                        store,
                        Arc::clone(&self.ctx.resources),
                        Arc::clone(&self.ctx.jobs),
                        MailboxSettings {
                            max_host_id: request.max_host_id,
                            poll_interval: Duration::from_millis(
                                self.ctx.config.mailbox.poll_interval_ms,
                            ),
                            workers: self.ctx.config.mailbox.workers,
                        },
                    )?);
                }
                None => warn!(pool = %self.pool_id, "Block-backed pool has no mailbox area"),
            }
        }

        let mut state = self.state.lock();
        if state.role != Role::Contend {
            return Err(SpmError::AcquisitionInterrupted { pool: self.pool_id });
        }
        state.role = transition(Role::Contend, Role::Acquired)?;
        state.acquiring = false;
        state.lver.commit(lver);
        state.scheduler = held.scheduler.take();
        state.mailbox = held.mailbox.take();
        state.master_mounted = true;
        *held = Held::default();
        Ok(lver)
    }

    fn ensure_contending(&self) -> SpmResult<()> {
        if self.state.lock().role == Role::Contend {
            Ok(())
        } else {
            Err(SpmError::AcquisitionInterrupted { pool: self.pool_id })
        }
    }

    /// Write `{lver + 1, host}` into pool metadata under the pool resource.
    ///
    /// The role is checked again once the resource is granted: a fence that
    /// wrote its metadata while this call waited must not be overwritten.
    fn stamp_metadata(
        &self,
        pool: &dyn PoolHandle,
        host: HostId,
        request: &StartRequest,
    ) -> SpmResult<i64> {
        let _pool_lock = self.ctx.resources.acquire(
            STORAGE_NAMESPACE,
            &self.pool_id.to_string(),
            LockMode::Exclusive,
        )?;
        self.ensure_contending()?;
        pool.invalidate_metadata();
        let stored = pool.read_metadata()?;
        if stored.spm_id != request.prev_holder || stored.lver != request.prev_lver {
            warn!(
                pool = %self.pool_id,
                stored_spm_id = stored.spm_id,
                stored_lver = stored.lver,
                expected_spm_id = request.prev_holder,
                expected_lver = request.prev_lver,
                "Pool metadata does not match expected previous SPM"
            );
        }

        let lver = VersionCounter::next(stored.lver);
        if let Some(expected) = request.expected_domain_version {
            let master = pool.master_domain();
            let current = self.ctx.domains.produce(master)?.version()?;
            if current > expected {
                return Err(SpmError::VersionTooAdvanced {
                    domain: master,
                    current,
                    requested: expected,
                });
            }
        }

        pool.write_spm_status(PoolMetadata {
            lver,
            spm_id: host.as_spm_id(),
        })?;
        debug!(pool = %self.pool_id, lver, "Pool metadata stamped");
        Ok(lver)
    }

    fn write_fenced(&self, pool: &dyn PoolHandle) -> SpmResult<()> {
        let _pool_lock = self.ctx.resources.acquire(
            STORAGE_NAMESPACE,
            &self.pool_id.to_string(),
            LockMode::Exclusive,
        )?;
        pool.write_spm_status(PoolMetadata::fenced())?;
        Ok(())
    }

    /// Fence pool metadata if it still carries this host's stamp of `lver`
    fn reset_stamp(&self, pool: &dyn PoolHandle, lver: i64) -> SpmResult<()> {
        let _pool_lock = self.ctx.resources.acquire(
            STORAGE_NAMESPACE,
            &self.pool_id.to_string(),
            LockMode::Exclusive,
        )?;
        pool.invalidate_metadata();
        let stored = pool.read_metadata()?;
        if stored.lver != lver || stored.spm_id != self.ctx.config.host().as_spm_id() {
            debug!(pool = %self.pool_id, stored_lver = stored.lver, "Metadata already replaced");
            return Ok(());
        }
        pool.write_spm_status(PoolMetadata::fenced())?;
        info!(pool = %self.pool_id, lver, "Interrupted election stamp reset to fenced");
        Ok(())
    }

    // =========================================================================
    // Release
    // =========================================================================

    fn take_held(state: &mut InstanceState) -> Held {
        state.lver.reset();
        Held {
            lease: true,
            stamped: None,
            campaign: true,
            master_mounted: std::mem::take(&mut state.master_mounted),
            scheduler: state.scheduler.take(),
            mailbox: state.mailbox.take(),
        }
    }

    fn release(&self, pool: &Arc<dyn PoolHandle>, held: Held) -> TeardownReport {
        let mut report = TeardownReport::new(self.pool_id);
        if held.campaign {
            report.record(TeardownStep::ShutdownUpgrade, self.upgrader.shutdown());
        }
        if let Some(mailbox) = held.mailbox {
            report.record(TeardownStep::StopMailbox, mailbox.stop());
        }
        if let Some(scheduler) = held.scheduler {
            let unloaded = scheduler.close();
            debug!(pool = %self.pool_id, unloaded, "Task scheduler closed");
            report.record::<SpmError>(TeardownStep::UnloadTasks, Ok(()));
        }
        if held.master_mounted {
            report.record(TeardownStep::UnmountMaster, pool.unmount_master());
        }
        if let Some(lver) = held.stamped {
            report.record(TeardownStep::ResetMetadata, self.reset_stamp(pool.as_ref(), lver));
        }
        if held.lease {
            report.record(
                TeardownStep::ReleaseClusterLock,
                self.ctx.cluster_lock.release(self.pool_id),
            );
        }
        report
    }

    /// Give up the SPM role.
    ///
    /// A no-op when `FREE`. Fails with [`SpmError::TaskInProgress`] while any
    /// task carrying the SPM tag is unfinished, leaving the role untouched.
    pub fn stop(&self) -> SpmResult<()> {
        let (pool, held) = {
            let mut state = self.state.lock();
            match state.role {
                Role::Free => {
                    debug!(pool = %self.pool_id, "Not SPM, nothing to stop");
                    return Ok(());
                }
                Role::Contend => {
                    return Err(SpmError::ConcurrentAcquisition { pool: self.pool_id })
                }
                Role::Acquired => {}
            }
            if let Some(scheduler) = &state.scheduler {
                let tasks = scheduler.outstanding(&self.ctx.config.tasks_tag);
                if !tasks.is_empty() {
                    debug!(pool = %self.pool_id, tasks = tasks.len(), "Stop refused, tasks running");
                    return Err(SpmError::TaskInProgress {
                        pool: self.pool_id,
                        tasks,
                    });
                }
            }
            let pool = self.cached_pool(&mut state)?;
            state.role = transition(Role::Acquired, Role::Free)?;
            (pool, Self::take_held(&mut state))
        };

        info!(pool = %self.pool_id, "Releasing SPM role");
        self.release(&pool, held)
            .into_result(self.ctx.terminator.as_ref())?;
        info!(pool = %self.pool_id, "Released SPM role");
        Ok(())
    }

    /// Declare the previous SPM dead and reset pool metadata.
    ///
    /// Allowed in any role. A local election in progress is interrupted; a
    /// local SPM role is released without cancelling tasks.
    pub fn fence(&self, last_owner: Option<HostId>, last_lver: i64) -> SpmResult<SpmStatus> {
        let (pool, previous, held) = {
            let mut state = self.state.lock();
            let pool = self.cached_pool(&mut state)?;
            let previous = state.role;
            let held = match previous {
                Role::Acquired => {
                    state.role = transition(previous, Role::Free)?;
                    Some(Self::take_held(&mut state))
                }
                Role::Contend => {
                    state.role = transition(previous, Role::Free)?;
                    self.upgrader.close();
                    None
                }
                Role::Free => None,
            };
            (pool, previous, held)
        };

        info!(
            pool = %self.pool_id,
            last_owner = ?last_owner,
            last_lver,
            previous_role = %previous,
            "Fencing SPM"
        );

        if let Some(held) = held {
            match self
                .release(&pool, held)
                .into_result(self.ctx.terminator.as_ref())
            {
                Err(fatal @ SpmError::Fatal { .. }) => return Err(fatal),
                Err(degraded) => warn!(pool = %self.pool_id, error = %degraded, "Forced release incomplete"),
                Ok(()) => {}
            }
        }

        pool.invalidate_metadata();
        self.ctx.cluster_lock.fence(self.pool_id, last_owner)?;
        self.write_fenced(pool.as_ref())?;

        Ok(SpmStatus::new(self.role(), pool.read_metadata()?))
    }

    /// Unmount a master mount left behind by an earlier SPM term.
    ///
    /// Only acts while `FREE` and not contending.
    pub fn cleanup_master_mount(&self) -> SpmResult<()> {
        let pool = {
            let mut state = self.state.lock();
            if state.role != Role::Free || state.acquiring {
                debug!(pool = %self.pool_id, role = %state.role, "Skipping master mount cleanup");
                return Ok(());
            }
            self.cached_pool(&mut state)?
        };
        pool.unmount_master()?;
        info!(pool = %self.pool_id, "Cleaned up master mount");
        Ok(())
    }

    /// Role plus `lver`/`spmId` as stored in pool metadata
    pub fn get_status(&self) -> SpmResult<SpmStatus> {
        let (role, pool) = {
            let mut state = self.state.lock();
            (state.role, self.cached_pool(&mut state)?)
        };
        Ok(SpmStatus::new(role, pool.read_metadata()?))
    }

    // =========================================================================
    // Upgrades
    // =========================================================================

    /// Start an upgrade campaign to `target`
    pub fn upgrade_pool(&self, target: DomainVersion) -> SpmResult<UpgradeStarted> {
        let pool = {
            let mut state = self.state.lock();
            self.authorize(&state, SpmOperation::UpgradePool)?;
            self.cached_pool(&mut state)?
        };
        info!(pool = %self.pool_id, target, "Pool upgrade requested");
        self.upgrader.run_campaign(pool.as_ref(), Some(target))
    }

    /// Target and pending domains of the running campaign
    pub fn upgrade_status(&self) -> SpmResult<UpgradeStatus> {
        self.authorize(&self.state.lock(), SpmOperation::UpgradeStatus)?;
        Ok(self.upgrader.status())
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    fn with_scheduler<T>(
        &self,
        operation: SpmOperation,
        f: impl FnOnce(&TaskScheduler, &InstanceState) -> SpmResult<T>,
    ) -> SpmResult<T> {
        let state = self.state.lock();
        self.authorize(&state, operation)?;
        let scheduler = state.scheduler.as_ref().ok_or_else(|| {
            SpmError::authorization(self.pool_id, operation.name(), state.role)
        })?;
        f(scheduler, &state)
    }

    fn submit(&self, operation: SpmOperation, name: String, job: JobSpec) -> SpmResult<TaskId> {
        self.with_scheduler(operation, |scheduler, state| {
            scheduler.submit(
                name,
                self.ctx.config.tasks_tag.clone(),
                state.lver.current(),
                job,
            )
        })
    }

    /// Schedule an arbitrary job as a named task
    pub fn schedule(&self, name: impl Into<String>, job: JobSpec) -> SpmResult<TaskId> {
        self.submit(SpmOperation::Schedule, name.into(), job)
    }

    /// Record of one task
    pub fn task_status(&self, task: TaskId) -> SpmResult<TaskRecord> {
        self.with_scheduler(SpmOperation::TaskStatus, |scheduler, _| scheduler.record(task))
    }

    /// Loaded tasks, optionally filtered by tag
    pub fn list_tasks(&self, tag: Option<&str>) -> SpmResult<Vec<TaskRecord>> {
        self.with_scheduler(SpmOperation::ListTasks, |scheduler, _| Ok(scheduler.list(tag)))
    }

    /// Abort a pending task
    pub fn abort_task(&self, task: TaskId) -> SpmResult<TaskStatus> {
        self.with_scheduler(SpmOperation::AbortTask, |scheduler, _| scheduler.abort(task))
    }

    /// Forget a finished task
    pub fn clear_task(&self, task: TaskId) -> SpmResult<()> {
        self.with_scheduler(SpmOperation::ClearTask, |scheduler, _| scheduler.clear(task))
    }

    // =========================================================================
    // Pool mutation
    // =========================================================================

    fn submit_job(&self, operation: SpmOperation, job: JobSpec) -> SpmResult<TaskId> {
        self.submit(operation, job.kind().to_string(), job)
    }

    /// Create a volume (or a snapshot of `parent`)
    pub fn create_volume(
        &self,
        domain: DomainId,
        image: ImageId,
        volume: VolumeId,
        size: u64,
        parent: Option<VolumeId>,
        description: &str,
    ) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::CreateVolume,
            JobSpec::CreateVolume {
                domain,
                image,
                volume,
                size,
                parent,
                description: description.to_string(),
            },
        )
    }

    /// Delete volumes of an image
    pub fn delete_volume(
        &self,
        domain: DomainId,
        image: ImageId,
        volumes: Vec<VolumeId>,
        post_zero: bool,
    ) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::DeleteVolume,
            JobSpec::DeleteVolume {
                domain,
                image,
                volumes,
                post_zero,
            },
        )
    }

    /// Copy a volume into a new image
    pub fn copy_image(
        &self,
        src_domain: DomainId,
        src_image: ImageId,
        src_volume: VolumeId,
        dst_domain: DomainId,
        dst_image: ImageId,
        dst_volume: VolumeId,
    ) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::CopyImage,
            JobSpec::CopyImage {
                src_domain,
                src_image,
                src_volume,
                dst_domain,
                dst_image,
                dst_volume,
            },
        )
    }

    /// Move (or copy, with `keep_source`) an image between domains
    pub fn move_image(
        &self,
        src_domain: DomainId,
        dst_domain: DomainId,
        image: ImageId,
        keep_source: bool,
    ) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::MoveImage,
            JobSpec::MoveImage {
                src_domain,
                dst_domain,
                image,
                keep_source,
            },
        )
    }

    /// Merge a range of snapshots
    pub fn merge_snapshots(
        &self,
        domain: DomainId,
        image: ImageId,
        ancestor: VolumeId,
        successor: VolumeId,
    ) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::MergeSnapshots,
            JobSpec::MergeSnapshots {
                domain,
                image,
                ancestor,
                successor,
            },
        )
    }

    /// Grow a volume
    pub fn extend_volume(
        &self,
        domain: DomainId,
        image: ImageId,
        volume: VolumeId,
        new_size: u64,
    ) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::ExtendVolume,
            JobSpec::ExtendVolume {
                domain,
                image,
                volume,
                new_size,
            },
        )
    }

    /// Attach a domain to the pool
    pub fn attach_domain(&self, domain: DomainId) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::AttachDomain,
            JobSpec::AttachDomain {
                pool: self.pool_id,
                domain,
            },
        )
    }

    /// Detach a domain from the pool
    pub fn detach_domain(&self, domain: DomainId) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::DetachDomain,
            JobSpec::DetachDomain {
                pool: self.pool_id,
                domain,
            },
        )
    }

    /// Activate an attached domain
    pub fn activate_domain(&self, domain: DomainId) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::ActivateDomain,
            JobSpec::ActivateDomain {
                pool: self.pool_id,
                domain,
            },
        )
    }

    /// Deactivate an active domain
    pub fn deactivate_domain(&self, domain: DomainId) -> SpmResult<TaskId> {
        self.submit_job(
            SpmOperation::DeactivateDomain,
            JobSpec::DeactivateDomain {
                pool: self.pool_id,
                domain,
            },
        )
    }
}
