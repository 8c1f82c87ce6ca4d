//! In-memory mailbox area.

use parking_lot::Mutex;
use std::collections::HashMap;

use spm_core::effects::{MailboxMessageBytes, MailboxStore, MAILBOX_MESSAGE_SIZE};
use spm_core::{HostId, StorageError};

/// Inboxes and acknowledgements per host
#[derive(Default)]
pub struct MemoryMailbox {
    inboxes: Mutex<HashMap<HostId, Vec<MailboxMessageBytes>>>,
    acks: Mutex<HashMap<(HostId, usize), MailboxMessageBytes>>,
}

impl MemoryMailbox {
    /// Empty mailbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a message in `host`'s inbox at `slot`
    pub fn post(&self, host: HostId, slot: usize, message: MailboxMessageBytes) {
        let mut inboxes = self.inboxes.lock();
        let inbox = inboxes.entry(host).or_default();
        if inbox.len() <= slot {
            inbox.resize(slot + 1, [0u8; MAILBOX_MESSAGE_SIZE]);
        }
        inbox[slot] = message;
    }

    /// Acknowledgement written for `host` at `slot`
    pub fn ack(&self, host: HostId, slot: usize) -> Option<MailboxMessageBytes> {
        self.acks.lock().get(&(host, slot)).copied()
    }

    /// Number of acknowledgements written
    pub fn ack_count(&self) -> usize {
        self.acks.lock().len()
    }
}

impl MailboxStore for MemoryMailbox {
    fn read_inbox(&self, host: HostId) -> Result<Vec<MailboxMessageBytes>, StorageError> {
        Ok(self.inboxes.lock().get(&host).cloned().unwrap_or_default())
    }

    fn write_ack(
        &self,
        host: HostId,
        slot: usize,
        message: &MailboxMessageBytes,
    ) -> Result<(), StorageError> {
        self.acks.lock().insert((host, slot), *message);
        Ok(())
    }
}
