//! Extension mailbox served by the SPM on block-backed pools.

mod codec;
mod monitor;

pub use codec::{ExtendRequest, MailboxDecodeError, EXTEND_MAGIC};
pub use monitor::{MailboxMonitor, MailboxSettings};
