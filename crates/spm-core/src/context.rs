//! Injected collaborators for one host's SPM service.

use std::fmt;
use std::sync::Arc;

use crate::config::SpmConfig;
use crate::effects::{
    ClusterLock, ConnectivityMonitor, DomainRegistry, JobRunner, PoolRegistry, ProcessAbort,
    ResourceManager, Terminator,
};
use crate::errors::SpmResult;

/// Everything a coordinator needs from the outside world.
///
/// Cloning is cheap; all collaborators are shared.
#[derive(Clone)]
pub struct SpmContext {
    /// Validated configuration
    pub config: SpmConfig,
    /// Pool lease service
    pub cluster_lock: Arc<dyn ClusterLock>,
    /// Host-local resource locks
    pub resources: Arc<dyn ResourceManager>,
    /// Pool lookup
    pub pools: Arc<dyn PoolRegistry>,
    /// Domain lookup
    pub domains: Arc<dyn DomainRegistry>,
    /// Domain reachability events
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    /// Executes pool-mutating jobs
    pub jobs: Arc<dyn JobRunner>,
    /// Called on unrecoverable release failures
    pub terminator: Arc<dyn Terminator>,
}

impl SpmContext {
    /// Bundle collaborators, validating the configuration.
    ///
    /// The terminator defaults to [`ProcessAbort`].
    pub fn new(
        config: SpmConfig,
        cluster_lock: Arc<dyn ClusterLock>,
        resources: Arc<dyn ResourceManager>,
        pools: Arc<dyn PoolRegistry>,
        domains: Arc<dyn DomainRegistry>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        jobs: Arc<dyn JobRunner>,
    ) -> SpmResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cluster_lock,
            resources,
            pools,
            domains,
            connectivity,
            jobs,
            terminator: Arc::new(ProcessAbort),
        })
    }

    /// Replace the terminator
    pub fn with_terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }
}

impl fmt::Debug for SpmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpmContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
