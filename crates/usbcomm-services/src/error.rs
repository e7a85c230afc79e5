//! Protocol-layer errors and their mapping onto the status taxonomy.

use usbcomm_core::status::StatusCode;
use usbcomm_core::wire::{Endpoint, WireError};

use crate::connection::ConnState;
use crate::transport::TransportError;

/// Chunk bookkeeping failures, shared by the read-side assembler and the
/// write-side staging area.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("transfer {index}: reported {actual} total blocks, first chunk said {expected}")]
    InconsistentTotal { index: u8, expected: u8, actual: u8 },

    #[error("transfer {index}: commit names {total} blocks but {received} are staged")]
    IncompleteCommit { index: u8, total: u8, received: usize },

    #[error("transfer {index}: delivery ended with {received} of {total} blocks")]
    IncompleteRead { index: u8, total: u8, received: usize },

    #[error("transfer {index}: block {block_index} repeated with different payload")]
    DuplicateMismatch { index: u8, block_index: u8 },

    #[error("transfer {0} is not open")]
    UnknownTransfer(u8),

    #[error("transfer {0} timed out before all blocks arrived")]
    AssemblyTimeout(u8),

    #[error("transfer {0} is already in progress")]
    AlreadyInProgress(u8),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl AssemblyError {
    /// Whether the transfer's partial state is dropped on this error.
    ///
    /// A conflicting duplicate is rejected but the original block is kept.
    pub fn discards_state(&self) -> bool {
        matches!(
            self,
            AssemblyError::InconsistentTotal { .. } | AssemblyError::AssemblyTimeout(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AssemblyError::InconsistentTotal { .. } | AssemblyError::IncompleteCommit { .. } => {
                StatusCode::InconsistentTotal
            }
            AssemblyError::DuplicateMismatch { .. } => StatusCode::DuplicateMismatch,
            AssemblyError::UnknownTransfer(_) => StatusCode::UnknownTransfer,
            AssemblyError::AssemblyTimeout(_) | AssemblyError::IncompleteRead { .. } => {
                StatusCode::AssemblyTimeout
            }
            AssemblyError::AlreadyInProgress(_) => StatusCode::InvalidState,
            AssemblyError::Wire(e) => StatusCode::from(e),
        }
    }
}

/// Everything an action can fail with. Each variant maps to one status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("{action} not valid in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: ConnState,
    },

    #[error("{action}: {reason}")]
    Precondition {
        action: &'static str,
        reason: &'static str,
    },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("{0} endpoint did not respond in time")]
    DeviceTimeout(Endpoint),

    #[error("{0} endpoint not found")]
    EndpointNotFound(Endpoint),

    #[error("no such connection: {0}")]
    UnknownConnection(u64),

    #[error("released while pending")]
    Cancelled,

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<TransportError> for ProtocolError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::EndpointNotFound(ep) => ProtocolError::EndpointNotFound(ep),
            other => ProtocolError::Transport(other),
        }
    }
}

impl ProtocolError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProtocolError::InvalidState { .. }
            | ProtocolError::Precondition { .. }
            | ProtocolError::UnknownConnection(_) => StatusCode::InvalidState,
            ProtocolError::UnsupportedOperation(_) => StatusCode::UnsupportedOperation,
            ProtocolError::DeviceTimeout(_) => StatusCode::DeviceTimeout,
            ProtocolError::EndpointNotFound(_) => StatusCode::EndpointNotFound,
            ProtocolError::Cancelled => StatusCode::Cancelled,
            ProtocolError::Assembly(e) => e.status_code(),
            ProtocolError::Transport(_) => StatusCode::TransportError,
            ProtocolError::Wire(e) => StatusCode::from(e),
        }
    }
}
