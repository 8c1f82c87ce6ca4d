//! One-pool test harness
//!
//! Wires every in-memory collaborator into an [`SpmContext`] for a single pool
//! whose master domain and member domains are described through
//! [`SpmTestHarnessBuilder`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use spm_coordinator::{SpmCoordinator, SpmService, StartRequest};
use spm_core::effects::{
    ClusterLock, ConnectivityMonitor, DomainHandle, DomainRegistry, JobRunner, PoolHandle,
    PoolRegistry, ResourceManager, Terminator,
};
use spm_core::{
    DomainClass, DomainId, DomainVersion, HostId, MailboxConfig, PoolId, SpmConfig, SpmContext,
};
use tempfile::TempDir;

use crate::cluster_lock::MemoryClusterLock;
use crate::connectivity::ManualConnectivityMonitor;
use crate::domain::{MemoryDomain, MemoryDomainRegistry};
use crate::jobs::RecordingJobRunner;
use crate::mailbox::MemoryMailbox;
use crate::pool::{MemoryPool, MemoryPoolRegistry};
use crate::resources::LocalResourceManager;
use crate::terminator::RecordingTerminator;

/// Mailbox poll interval used by harness pools
pub const TEST_POLL_INTERVAL_MS: u64 = 10;

/// Hosts polled by [`SpmTestHarness::start_request`]
pub const TEST_MAX_HOST_ID: u32 = 4;

/// Default bound for `wait_until` in tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-friendly subscriber once; later calls are ignored.
///
/// Honours `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy)]
struct DomainSpec {
    class: DomainClass,
    version: DomainVersion,
    reachable: bool,
}

/// Builder for [`SpmTestHarness`]
#[derive(Debug, Clone)]
pub struct SpmTestHarnessBuilder {
    config: SpmConfig,
    master_version: DomainVersion,
    members: Vec<DomainSpec>,
    block_backed: bool,
}

impl Default for SpmTestHarnessBuilder {
    fn default() -> Self {
        let config = SpmConfig {
            task_workers: 2,
            mailbox: MailboxConfig {
                poll_interval_ms: TEST_POLL_INTERVAL_MS,
                ..MailboxConfig::default()
            },
            ..SpmConfig::default()
        };
        Self {
            config,
            master_version: 3,
            members: Vec::new(),
            block_backed: false,
        }
    }
}

impl SpmTestHarnessBuilder {
    /// Host id the harness runs as
    pub fn host_id(mut self, host_id: u32) -> Self {
        self.config.host_id = host_id;
        self
    }

    /// Version of the master domain
    pub fn master_version(mut self, version: DomainVersion) -> Self {
        self.master_version = version;
        self
    }

    /// Add a DATA member domain
    pub fn data_domain(self, version: DomainVersion, reachable: bool) -> Self {
        self.domain(DomainClass::Data, version, reachable)
    }

    /// Add a member domain of any class
    pub fn domain(mut self, class: DomainClass, version: DomainVersion, reachable: bool) -> Self {
        self.members.push(DomainSpec {
            class,
            version,
            reachable,
        });
        self
    }

    /// Give the pool a mailbox area
    pub fn block_backed(mut self, block_backed: bool) -> Self {
        self.block_backed = block_backed;
        self
    }

    /// Number of task worker threads
    pub fn task_workers(mut self, workers: usize) -> Self {
        self.config.task_workers = workers;
        self
    }

    /// Restrict the versions accepted by `upgrade_pool`
    pub fn supported_versions(mut self, versions: Vec<DomainVersion>) -> Self {
        self.config.upgrade.supported_domain_versions = versions;
        self
    }

    /// Toggle the extend-on-demand mailbox
    pub fn extend_on_demand(mut self, enabled: bool) -> Self {
        self.config.mailbox.extend_on_demand = enabled;
        self
    }

    /// Build the harness
    pub fn build(self) -> SpmTestHarness {
        let pool_id = PoolId::new();
        let tasks_dir = TempDir::new().expect("create task directory");

        let domains = Arc::new(MemoryDomainRegistry::new());
        let connectivity = Arc::new(ManualConnectivityMonitor::new());

        let master = domains.create(
            DomainId::new(),
            DomainClass::Data,
            self.master_version,
            vec![pool_id],
        );
        connectivity.mark(master.id(), true);

        let mailbox = self.block_backed.then(|| Arc::new(MemoryMailbox::new()));
        let mut pool = MemoryPool::new(pool_id, master.id(), tasks_dir.path().join("tasks"));
        if let Some(mailbox) = &mailbox {
            pool = pool.with_mailbox(Arc::clone(mailbox));
        }
        let pool = Arc::new(pool);

        let mut members = Vec::with_capacity(self.members.len());
        for spec in &self.members {
            let domain = domains.create(DomainId::new(), spec.class, spec.version, vec![pool_id]);
            pool.add_domain(domain.id());
            connectivity.mark(domain.id(), spec.reachable);
            members.push(domain);
        }

        let pools = Arc::new(MemoryPoolRegistry::new());
        pools.insert(Arc::clone(&pool));

        let cluster_lock = Arc::new(MemoryClusterLock::new());
        let resources = LocalResourceManager::new();
        let jobs = Arc::new(RecordingJobRunner::new());
        let terminator = Arc::new(RecordingTerminator::new());

        let ctx = SpmContext::new(
            self.config,
            Arc::clone(&cluster_lock) as Arc<dyn ClusterLock>,
            Arc::new(resources.clone()) as Arc<dyn ResourceManager>,
            Arc::clone(&pools) as Arc<dyn PoolRegistry>,
            Arc::clone(&domains) as Arc<dyn DomainRegistry>,
            Arc::clone(&connectivity) as Arc<dyn ConnectivityMonitor>,
            Arc::clone(&jobs) as Arc<dyn JobRunner>,
        )
        .expect("valid harness config")
        .with_terminator(Arc::clone(&terminator) as Arc<dyn Terminator>);

        SpmTestHarness {
            pool_id,
            pool,
            master,
            members,
            domains,
            connectivity,
            cluster_lock,
            resources,
            jobs,
            terminator,
            mailbox,
            ctx,
            _tasks_dir: tasks_dir,
        }
    }
}

/// A pool with in-memory collaborators and a real task directory.
pub struct SpmTestHarness {
    /// Pool under test
    pub pool_id: PoolId,
    /// Pool handle
    pub pool: Arc<MemoryPool>,
    /// Master domain
    pub master: Arc<MemoryDomain>,
    /// Member domains other than the master, in builder order
    pub members: Vec<Arc<MemoryDomain>>,
    /// Domain registry and upgrade log
    pub domains: Arc<MemoryDomainRegistry>,
    /// Connectivity reports
    pub connectivity: Arc<ManualConnectivityMonitor>,
    /// Pool lease
    pub cluster_lock: Arc<MemoryClusterLock>,
    /// Resource locks
    pub resources: LocalResourceManager,
    /// Job runner
    pub jobs: Arc<RecordingJobRunner>,
    /// Terminator
    pub terminator: Arc<RecordingTerminator>,
    /// Mailbox area, for block-backed pools
    pub mailbox: Option<Arc<MemoryMailbox>>,
    ctx: SpmContext,
    _tasks_dir: TempDir,
}

impl SpmTestHarness {
    /// Start building a harness
    pub fn builder() -> SpmTestHarnessBuilder {
        SpmTestHarnessBuilder::default()
    }

    /// Harness with a DATA master at version 3 and no other domains
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Shared context
    pub fn context(&self) -> &SpmContext {
        &self.ctx
    }

    /// Host the harness runs as
    pub fn host(&self) -> HostId {
        self.ctx.config.host()
    }

    /// Fresh coordinator for the pool, sharing all collaborators
    pub fn coordinator(&self) -> SpmCoordinator {
        SpmCoordinator::new(self.pool_id, self.ctx.clone())
    }

    /// Fresh host-wide service sharing all collaborators
    pub fn service(&self) -> SpmService {
        SpmService::new(self.ctx.clone())
    }

    /// Start request polling [`TEST_MAX_HOST_ID`] mailboxes
    pub fn start_request(&self) -> StartRequest {
        StartRequest {
            max_host_id: TEST_MAX_HOST_ID,
            ..StartRequest::default()
        }
    }

    /// Directory holding persisted task records
    pub fn tasks_dir(&self) -> PathBuf {
        self.pool.tasks_dir()
    }

    /// Mailbox area; panics for file-backed pools
    pub fn mailbox(&self) -> &MemoryMailbox {
        self.mailbox.as_deref().expect("pool is block-backed")
    }
}

impl Default for SpmTestHarness {
    fn default() -> Self {
        Self::new()
    }
}
