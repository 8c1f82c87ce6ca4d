//! Mailbox polling thread and extension workers.
//!
//! One thread scans every host's inbox and hands changed slots to a small
//! worker pool over a channel, so a slow extension never delays the scan.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spm_core::effects::{JobRunner, MailboxMessageBytes, MailboxStore, ResourceManager};
use spm_core::{HostId, PoolId, SpmResult, StorageError};
use tracing::{debug, info, warn};

use super::codec::ExtendRequest;
use crate::tasks::run_job_locked;

/// Polling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxSettings {
    /// Highest host id whose inbox is polled
    pub max_host_id: u32,
    /// Delay between scans
    pub poll_interval: Duration,
    /// Threads serving extension requests
    pub workers: usize,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    fn is_raised(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleep for `interval`; returns true once stop was raised
    fn wait(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, interval);
        }
        *stopped
    }
}

/// A decoded request and the slot it came from
struct Delivery {
    host: HostId,
    slot: usize,
    message: MailboxMessageBytes,
    request: ExtendRequest,
}

struct MailboxLoop {
    pool: PoolId,
    store: Arc<dyn MailboxStore>,
    max_host_id: u32,
    seen: HashMap<(HostId, usize), MailboxMessageBytes>,
    deliveries: Sender<Delivery>,
}

impl MailboxLoop {
    fn poll_once(&mut self) {
        for host in (1..=self.max_host_id).map(HostId::new) {
            let inbox = match self.store.read_inbox(host) {
                Ok(inbox) => inbox,
                Err(e) => {
                    debug!(pool = %self.pool, host = %host, error = %e, "Failed to read inbox");
                    continue;
                }
            };
            for (slot, message) in inbox.iter().enumerate() {
                if self.seen.get(&(host, slot)) == Some(message) {
                    continue;
                }
                self.seen.insert((host, slot), *message);
                self.dispatch(host, slot, message);
            }
        }
    }

    fn dispatch(&self, host: HostId, slot: usize, message: &MailboxMessageBytes) {
        let request = match ExtendRequest::decode(message) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(e) => {
                warn!(pool = %self.pool, host = %host, slot, error = %e, "Malformed mailbox message");
                return;
            }
        };
        debug!(
            pool = %self.pool,
            host = %host,
            slot,
            volume = %request.volume,
            new_size = request.new_size,
            "Extension requested"
        );
        let delivery = Delivery {
            host,
            slot,
            message: *message,
            request,
        };
        if self.deliveries.send(delivery).is_err() {
            warn!(pool = %self.pool, host = %host, slot, "Extension workers have exited");
        }
    }
}

struct ExtensionWorker {
    pool: PoolId,
    store: Arc<dyn MailboxStore>,
    resources: Arc<dyn ResourceManager>,
    runner: Arc<dyn JobRunner>,
    signal: Arc<StopSignal>,
}

impl ExtensionWorker {
    fn run(&self, deliveries: &Receiver<Delivery>) {
        for delivery in deliveries.iter() {
            if self.signal.is_raised() {
                debug!(pool = %self.pool, host = %delivery.host, "Dropping extension, mailbox stopping");
                continue;
            }
            self.serve(&delivery);
        }
    }

    fn serve(&self, delivery: &Delivery) {
        let Delivery {
            host,
            slot,
            message,
            request,
        } = delivery;
        let result = run_job_locked(self.resources.as_ref(), self.runner.as_ref(), &request.to_job())
            .and_then(|()| self.store.write_ack(*host, *slot, message));
        match result {
            Ok(()) => debug!(pool = %self.pool, host = %host, slot, "Extension acknowledged"),
            Err(e) => warn!(
                pool = %self.pool,
                host = %host,
                volume = %request.volume,
                error = %e,
                "Extension request failed"
            ),
        }
    }
}

/// Background thread serving extension requests for one pool.
pub struct MailboxMonitor {
    pool: PoolId,
    signal: Arc<StopSignal>,
    poller: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl MailboxMonitor {
    /// Spawn the extension workers and the polling thread
    pub fn start(
        pool: PoolId,
        store: Arc<dyn MailboxStore>,
        resources: Arc<dyn ResourceManager>,
        runner: Arc<dyn JobRunner>,
        settings: MailboxSettings,
    ) -> SpmResult<Self> {
        let signal = Arc::new(StopSignal::default());
        let (sender, receiver) = crossbeam_channel::unbounded();

        let mut monitor = Self {
            pool,
            signal: Arc::clone(&signal),
            poller: None,
            workers: Vec::with_capacity(settings.workers),
        };
        for index in 0..settings.workers {
            let worker = ExtensionWorker {
                pool,
                store: Arc::clone(&store),
                resources: Arc::clone(&resources),
                runner: Arc::clone(&runner),
                signal: Arc::clone(&signal),
            };
            let receiver: Receiver<Delivery> = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("spm-extend-{index}"))
                .spawn(move || worker.run(&receiver))
                .map_err(|e| StorageError::failed(format!("Failed to spawn extension worker: {e}")))?;
            monitor.workers.push(handle);
        }

        let mut poller = MailboxLoop {
            pool,
            store,
            max_host_id: settings.max_host_id,
            seen: HashMap::new(),
            deliveries: sender,
        };
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name(format!("spm-mailbox-{pool}"))
            .spawn(move || loop {
                poller.poll_once();
                if thread_signal.wait(settings.poll_interval) {
                    break;
                }
            })
            .map_err(|e| StorageError::failed(format!("Failed to spawn mailbox monitor: {e}")))?;
        monitor.poller = Some(handle);

        info!(
            pool = %pool,
            max_host_id = settings.max_host_id,
            workers = settings.workers,
            "Mailbox monitor started"
        );
        Ok(monitor)
    }

    /// Signal the threads and wait for them to exit.
    ///
    /// Requests already queued are dropped; a running extension finishes.
    pub fn stop(mut self) -> SpmResult<()> {
        self.signal.raise();
        let mut panicked = false;
        if let Some(poller) = self.poller.take() {
            panicked |= poller.join().is_err();
        }
        for worker in self.workers.drain(..) {
            panicked |= worker.join().is_err();
        }
        if panicked {
            return Err(StorageError::failed("Mailbox monitor thread panicked").into());
        }
        info!(pool = %self.pool, "Mailbox monitor stopped");
        Ok(())
    }
}

impl Drop for MailboxMonitor {
    fn drop(&mut self) {
        self.signal.raise();
    }
}
