//! usbcomm wire format: the fixed-size records that cross the driver boundary.
//!
//! These types ARE the protocol. Every field and every size is part of the
//! wire format and must stay in sync with the driver's own declarations.
//! No structure may grow past `DATA_STRUCT_SIZE_MAX` without a protocol
//! version bump; the size guards below fail the build if one does.
//!
//! All types are #[repr(C, packed)] for deterministic layout and use
//! zerocopy derives for allocation-free serialization. Declared lengths are
//! never trusted: every accessor checks `length` against the field capacity.

use static_assertions::{assert_eq_size, const_assert};
use crate::selector::ActionType;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Ceiling for any structure crossing the boundary.
pub const DATA_STRUCT_SIZE_MAX: usize = 127;

/// Payload capacity of one write chunk.
pub const DATA_STRUCT_SIZE_WRITE: usize = 120;

/// Payload capacity of one read chunk.
pub const DATA_STRUCT_SIZE_READ: usize = 120;

/// Maximum packet size of the control endpoint.
pub const PACKET_SIZE_CONTROL_EP: usize = 129;

/// Maximum packet size of the interrupt endpoint.
pub const PACKET_SIZE_INTERRUPT_EP: usize = 128;

/// Size of the capability probe exchange, both directions.
pub const PACKET_SIZE_CHECK_EP_SUPPORTIVENESS: usize = 100;

/// `block_index` and `total_blocks` are single bytes.
pub const MAX_TRANSFER_BLOCKS: usize = u8::MAX as usize;

/// Largest buffer a single write transfer can carry.
pub const MAX_WRITE_TRANSFER_BYTES: usize = MAX_TRANSFER_BLOCKS * DATA_STRUCT_SIZE_WRITE;

/// Largest buffer a single read transfer can carry.
pub const MAX_READ_TRANSFER_BYTES: usize = MAX_TRANSFER_BLOCKS * DATA_STRUCT_SIZE_READ;

// ── Endpoints ─────────────────────────────────────────────────────────────────

/// The two endpoints the chunk protocol runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Control,
    Interrupt,
}

impl Endpoint {
    /// Maximum packet size of this endpoint.
    pub fn max_packet_size(self) -> usize {
        match self {
            Endpoint::Control => PACKET_SIZE_CONTROL_EP,
            Endpoint::Interrupt => PACKET_SIZE_INTERRUPT_EP,
        }
    }

    /// Endpoint address byte carried in the capability probe.
    pub fn address(self) -> u8 {
        match self {
            Endpoint::Control => 0x00,
            Endpoint::Interrupt => 0x81,
        }
    }

    pub fn from_address(address: u8) -> Option<Self> {
        match address {
            0x00 => Some(Endpoint::Control),
            0x81 => Some(Endpoint::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Control => f.write_str("control"),
            Endpoint::Interrupt => f.write_str("interrupt"),
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Terminal record for every action.
///
/// `status_code` carries a [`crate::status::StatusCode`]; `result_value` is
/// action-specific (a handle, a byte count, or 0).
///
/// Wire size: 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct Status {
    pub status_code: u64,
    pub result_value: u64,
}

assert_eq_size!(Status, [u8; 16]);

// ── Action Record ─────────────────────────────────────────────────────────────

/// Payload of actions that need nothing but a tag, e.g. releasing a callback.
///
/// Wire size: 1 byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ActionRecord {
    pub action_type: u8,
}

assert_eq_size!(ActionRecord, [u8; 1]);

// ── Text / byte arrays ────────────────────────────────────────────────────────

macro_rules! byte_array_struct {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// Wire size: 127 bytes. Text is NUL-padded.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
        #[repr(C, packed)]
        pub struct $name {
            pub byte_array: [u8; DATA_STRUCT_SIZE_MAX],
        }

        assert_eq_size!($name, [u8; DATA_STRUCT_SIZE_MAX]);

        impl $name {
            /// Copy `bytes` in, truncating at the structure capacity.
            pub fn from_bytes_truncated(bytes: &[u8]) -> Self {
                let mut out = Self::new_zeroed();
                let n = bytes.len().min(DATA_STRUCT_SIZE_MAX);
                out.byte_array[..n].copy_from_slice(&bytes[..n]);
                out
            }

            /// Bytes up to (not including) the first NUL.
            pub fn text_bytes(&self) -> &[u8] {
                let end = self
                    .byte_array
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(DATA_STRUCT_SIZE_MAX);
                &self.byte_array[..end]
            }

            pub fn text(&self) -> String {
                String::from_utf8_lossy(self.text_bytes()).into_owned()
            }
        }
    };
}

byte_array_struct!(
    /// Compact driver/connection status document.
    DriverStatus
);

byte_array_struct!(
    /// Driver version string.
    DriverVersion
);

byte_array_struct!(
    /// General-purpose byte payload (debug log excerpts, opaque data).
    ByteArray
);

// ── Capability probe ──────────────────────────────────────────────────────────

/// Two info bytes returned by the endpoint capability probe.
///
///   info_1: USB transfer type the device reports for the endpoint
///   info_2: chunk protocol revision the endpoint speaks
///
/// Wire size: 2 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct EpSupportiveness {
    pub info_1: u8,
    pub info_2: u8,
}

assert_eq_size!(EpSupportiveness, [u8; 2]);

// ── Write path ────────────────────────────────────────────────────────────────

/// One fragment of an outbound transfer (`FillWriteBuffer` payload).
///
/// Wire size: 123 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct WriteChunk {
    /// Logical transfer this fragment belongs to. Constant across a transfer.
    pub index: u8,
    /// Number of valid bytes in `byte_array`.
    pub length: u8,
    /// Position of this fragment within the transfer, from 0.
    pub block_index: u8,
    pub byte_array: [u8; DATA_STRUCT_SIZE_WRITE],
}

assert_eq_size!(WriteChunk, [u8; 123]);

impl WriteChunk {
    pub fn new(index: u8, block_index: u8, payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() > DATA_STRUCT_SIZE_WRITE {
            return Err(WireError::LengthExceedsCapacity {
                length: payload.len(),
                capacity: DATA_STRUCT_SIZE_WRITE,
            });
        }
        let mut chunk = Self::new_zeroed();
        chunk.index = index;
        chunk.length = payload.len() as u8;
        chunk.block_index = block_index;
        chunk.byte_array[..payload.len()].copy_from_slice(payload);
        Ok(chunk)
    }

    /// The valid bytes of this chunk.
    pub fn payload(&self) -> Result<&[u8], WireError> {
        checked_payload(&self.byte_array, self.length)
    }

    /// Parse and validate a chunk received from the boundary.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let chunk: Self = decode_exact(bytes)?;
        chunk.payload()?;
        Ok(chunk)
    }
}

/// Explicit end-of-transfer marker for the write path.
///
/// A final fragment of exactly `DATA_STRUCT_SIZE_WRITE` bytes is otherwise
/// indistinguishable from "more to come", so a write is only complete once
/// the commit naming its block count has been seen.
///
/// Wire size: 2 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct WriteCommit {
    pub index: u8,
    pub total_blocks: u8,
}

assert_eq_size!(WriteCommit, [u8; 2]);

// ── Read path ─────────────────────────────────────────────────────────────────

/// One fragment of an inbound transfer.
///
/// Carries `total_blocks` because the device, not the caller, decides how
/// large a reply is.
///
/// Wire size: 124 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ReadChunk {
    pub index: u8,
    pub length: u8,
    pub block_index: u8,
    pub total_blocks: u8,
    pub byte_array: [u8; DATA_STRUCT_SIZE_READ],
}

assert_eq_size!(ReadChunk, [u8; 124]);

impl ReadChunk {
    pub fn new(
        index: u8,
        block_index: u8,
        total_blocks: u8,
        payload: &[u8],
    ) -> Result<Self, WireError> {
        if payload.len() > DATA_STRUCT_SIZE_READ {
            return Err(WireError::LengthExceedsCapacity {
                length: payload.len(),
                capacity: DATA_STRUCT_SIZE_READ,
            });
        }
        let mut chunk = Self::new_zeroed();
        chunk.index = index;
        chunk.length = payload.len() as u8;
        chunk.block_index = block_index;
        chunk.total_blocks = total_blocks;
        chunk.byte_array[..payload.len()].copy_from_slice(payload);
        chunk.validate()?;
        Ok(chunk)
    }

    pub fn payload(&self) -> Result<&[u8], WireError> {
        checked_payload(&self.byte_array, self.length)
    }

    /// Check the length and the sequence fields.
    pub fn validate(&self) -> Result<(), WireError> {
        self.payload()?;
        if self.total_blocks == 0 {
            return Err(WireError::ZeroTotalBlocks);
        }
        if self.block_index >= self.total_blocks {
            return Err(WireError::BlockOutOfRange {
                block_index: self.block_index,
                total_blocks: self.total_blocks,
            });
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let chunk: Self = decode_exact(bytes)?;
        chunk.validate()?;
        Ok(chunk)
    }
}

/// Request for the next fragment of read transfer `index`.
///
/// `action_type` is always the Read action type so a poll is never mistaken
/// for a one-byte action record on the same endpoint.
///
/// Wire size: 2 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ReadPoll {
    pub action_type: u8,
    pub index: u8,
}

assert_eq_size!(ReadPoll, [u8; 2]);

impl ReadPoll {
    pub fn new(index: u8) -> Self {
        Self {
            action_type: ActionType::Read as u8,
            index,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let poll: Self = decode_exact(bytes)?;
        if poll.action_type != ActionType::Read as u8 {
            return Err(WireError::UnexpectedTag(poll.action_type));
        }
        Ok(poll)
    }
}

// Boundary ceiling and endpoint fit.
const_assert!(std::mem::size_of::<WriteChunk>() <= DATA_STRUCT_SIZE_MAX);
const_assert!(std::mem::size_of::<ReadChunk>() <= DATA_STRUCT_SIZE_MAX);
const_assert!(std::mem::size_of::<WriteChunk>() <= PACKET_SIZE_CONTROL_EP);
const_assert!(std::mem::size_of::<ReadChunk>() <= PACKET_SIZE_INTERRUPT_EP);
const_assert!(std::mem::size_of::<Status>() <= DATA_STRUCT_SIZE_MAX);
const_assert!(DATA_STRUCT_SIZE_WRITE <= DATA_STRUCT_SIZE_MAX - 3);
const_assert!(DATA_STRUCT_SIZE_READ <= DATA_STRUCT_SIZE_MAX - 4);

// ── Helpers ───────────────────────────────────────────────────────────────────

fn checked_payload(array: &[u8], length: u8) -> Result<&[u8], WireError> {
    let length = length as usize;
    if length > array.len() {
        return Err(WireError::LengthExceedsCapacity {
            length,
            capacity: array.len(),
        });
    }
    Ok(&array[..length])
}

/// Parse a structure that must occupy exactly `bytes`.
pub fn decode_exact<T: FromBytes>(bytes: &[u8]) -> Result<T, WireError> {
    T::read_from(bytes).ok_or(WireError::SizeMismatch {
        expected: std::mem::size_of::<T>(),
        actual: bytes.len(),
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("structure size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("declared length {length} exceeds capacity {capacity}")]
    LengthExceedsCapacity { length: usize, capacity: usize },

    #[error("read chunk declares zero total blocks")]
    ZeroTotalBlocks,

    #[error("block index {block_index} outside transfer of {total_blocks} blocks")]
    BlockOutOfRange { block_index: u8, total_blocks: u8 },

    #[error("unexpected action tag {0}")]
    UnexpectedTag(u8),

    #[error("payload of {0} bytes exceeds the {} byte transfer limit", MAX_WRITE_TRANSFER_BYTES)]
    PayloadTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
