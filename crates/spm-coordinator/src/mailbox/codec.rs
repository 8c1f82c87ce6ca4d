//! Fixed 64-byte extension request format.
//!
//! ```text
//! offset  size  field
//!      0     5  magic "1xtnd"
//!      5    16  domain uuid
//!     21    16  image uuid
//!     37    16  volume uuid
//!     53     8  new size in bytes, big-endian
//!     61     3  reserved, zero
//! ```
//!
//! A slot of all zero bytes is empty.

use spm_core::effects::{MailboxMessageBytes, MAILBOX_MESSAGE_SIZE};
use spm_core::{DomainId, ImageId, JobSpec, VolumeId};

/// Magic prefix of an extension request
pub const EXTEND_MAGIC: &[u8; 5] = b"1xtnd";

const DOMAIN_OFFSET: usize = 5;
const IMAGE_OFFSET: usize = 21;
const VOLUME_OFFSET: usize = 37;
const SIZE_OFFSET: usize = 53;
const RESERVED_OFFSET: usize = 61;

/// Malformed mailbox slot contents
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MailboxDecodeError {
    /// The slot does not start with the extension magic
    #[error("Unknown mailbox message magic {found:02x?}")]
    BadMagic {
        /// First bytes of the slot
        found: [u8; 5],
    },
    /// Reserved trailing bytes are not zero
    #[error("Reserved mailbox bytes are not zero")]
    ReservedNotZero,
}

/// Request from a non-SPM host to grow a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendRequest {
    /// Domain holding the volume
    pub domain: DomainId,
    /// Image holding the volume
    pub image: ImageId,
    /// Volume to extend
    pub volume: VolumeId,
    /// Requested size in bytes
    pub new_size: u64,
}

fn uuid_at(bytes: &MailboxMessageBytes, offset: usize) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[offset..offset + 16]);
    out
}

impl ExtendRequest {
    /// Decode a slot; `Ok(None)` for an empty slot
    pub fn decode(bytes: &MailboxMessageBytes) -> Result<Option<Self>, MailboxDecodeError> {
        if bytes.iter().all(|b| *b == 0) {
            return Ok(None);
        }
        if &bytes[..DOMAIN_OFFSET] != EXTEND_MAGIC {
            let mut found = [0u8; 5];
            found.copy_from_slice(&bytes[..DOMAIN_OFFSET]);
            return Err(MailboxDecodeError::BadMagic { found });
        }
        if bytes[RESERVED_OFFSET..].iter().any(|b| *b != 0) {
            return Err(MailboxDecodeError::ReservedNotZero);
        }
        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[SIZE_OFFSET..RESERVED_OFFSET]);
        Ok(Some(Self {
            domain: DomainId::from_bytes(uuid_at(bytes, DOMAIN_OFFSET)),
            image: ImageId::from_bytes(uuid_at(bytes, IMAGE_OFFSET)),
            volume: VolumeId::from_bytes(uuid_at(bytes, VOLUME_OFFSET)),
            new_size: u64::from_be_bytes(size),
        }))
    }

    /// Encode into a slot
    pub fn encode(&self) -> MailboxMessageBytes {
        let mut bytes = [0u8; MAILBOX_MESSAGE_SIZE];
        bytes[..DOMAIN_OFFSET].copy_from_slice(EXTEND_MAGIC);
        bytes[DOMAIN_OFFSET..IMAGE_OFFSET].copy_from_slice(self.domain.as_bytes());
        bytes[IMAGE_OFFSET..VOLUME_OFFSET].copy_from_slice(self.image.as_bytes());
        bytes[VOLUME_OFFSET..SIZE_OFFSET].copy_from_slice(self.volume.as_bytes());
        bytes[SIZE_OFFSET..RESERVED_OFFSET].copy_from_slice(&self.new_size.to_be_bytes());
        bytes
    }

    /// Job performing the extension
    pub fn to_job(&self) -> JobSpec {
        JobSpec::ExtendVolume {
            domain: self.domain,
            image: self.image,
            volume: self.volume,
            new_size: self.new_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    #[test]
    fn test_decode_hand_built_message() {
        let domain = Uuid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10);
        let mut bytes = [0u8; MAILBOX_MESSAGE_SIZE];
        bytes[..5].copy_from_slice(b"1xtnd");
        bytes[5..21].copy_from_slice(domain.as_bytes());
        bytes[60] = 0x40; // 64 bytes, big-endian

        let request = ExtendRequest::decode(&bytes).unwrap().unwrap();
        assert_eq!(request.domain.uuid(), domain);
        assert_eq!(request.image.uuid(), Uuid::nil());
        assert_eq!(request.new_size, 64);
    }

    #[test]
    fn test_encoded_size_is_big_endian() {
        let request = ExtendRequest {
            domain: DomainId::new(),
            image: ImageId::new(),
            volume: VolumeId::new(),
            new_size: 0x0102_0304_0506_0708,
        };
        let bytes = request.encode();
        assert_eq!(&bytes[53..61], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[61..], &[0, 0, 0]);
        assert_eq!(ExtendRequest::decode(&bytes).unwrap(), Some(request));
    }

    #[test]
    fn test_empty_slot() {
        assert_eq!(ExtendRequest::decode(&[0u8; MAILBOX_MESSAGE_SIZE]).unwrap(), None);
    }

    #[test]
    fn test_rejects_unknown_magic() {
        let mut bytes = [0u8; MAILBOX_MESSAGE_SIZE];
        bytes[..5].copy_from_slice(b"2xtnd");
        assert_matches!(
            ExtendRequest::decode(&bytes),
            Err(MailboxDecodeError::BadMagic { found }) if &found == b"2xtnd"
        );
    }

    #[test]
    fn test_rejects_dirty_reserved_bytes() {
        let mut bytes = ExtendRequest {
            domain: DomainId::new(),
            image: ImageId::new(),
            volume: VolumeId::new(),
            new_size: 1,
        }
        .encode();
        bytes[63] = 1;
        assert_eq!(
            ExtendRequest::decode(&bytes),
            Err(MailboxDecodeError::ReservedNotZero)
        );
    }
}
