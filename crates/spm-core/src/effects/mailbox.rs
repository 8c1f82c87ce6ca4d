//! Storage-resident mailbox used by non-SPM hosts to request extensions.

use crate::errors::StorageError;
use crate::identifiers::HostId;

/// Size of one mailbox slot in bytes
pub const MAILBOX_MESSAGE_SIZE: usize = 64;

/// Raw contents of one mailbox slot
pub type MailboxMessageBytes = [u8; MAILBOX_MESSAGE_SIZE];

/// Per-host inbox and acknowledgement areas on shared storage.
pub trait MailboxStore: Send + Sync {
    /// Read every slot of `host`'s inbox
    fn read_inbox(&self, host: HostId) -> Result<Vec<MailboxMessageBytes>, StorageError>;

    /// Write an acknowledgement into `host`'s ack area at `slot`
    fn write_ack(
        &self,
        host: HostId,
        slot: usize,
        message: &MailboxMessageBytes,
    ) -> Result<(), StorageError>;
}
