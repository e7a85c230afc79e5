//! Outcome taxonomy carried in `Status::status_code`.
//!
//! Every action ends in a status. Nothing in the protocol layer is fatal:
//! failures are reported here so the caller can retry or abort.

use crate::wire::{Status, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum StatusCode {
    Success = 0,
    InvalidState = 1,
    UnsupportedOperation = 2,
    DeviceTimeout = 3,
    EndpointNotFound = 4,
    InconsistentTotal = 5,
    DuplicateMismatch = 6,
    UnknownTransfer = 7,
    AssemblyTimeout = 8,
    TransportError = 9,
    /// A structure failed boundary validation.
    InvalidStructure = 10,
    PayloadTooLarge = 11,
    /// A pending read or write was released before it finished.
    Cancelled = 12,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    pub fn name(self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::InvalidState => "invalid_state",
            StatusCode::UnsupportedOperation => "unsupported_operation",
            StatusCode::DeviceTimeout => "device_timeout",
            StatusCode::EndpointNotFound => "endpoint_not_found",
            StatusCode::InconsistentTotal => "inconsistent_total",
            StatusCode::DuplicateMismatch => "duplicate_mismatch",
            StatusCode::UnknownTransfer => "unknown_transfer",
            StatusCode::AssemblyTimeout => "assembly_timeout",
            StatusCode::TransportError => "transport_error",
            StatusCode::InvalidStructure => "invalid_structure",
            StatusCode::PayloadTooLarge => "payload_too_large",
            StatusCode::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u64> for StatusCode {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusCode::Success),
            1 => Ok(StatusCode::InvalidState),
            2 => Ok(StatusCode::UnsupportedOperation),
            3 => Ok(StatusCode::DeviceTimeout),
            4 => Ok(StatusCode::EndpointNotFound),
            5 => Ok(StatusCode::InconsistentTotal),
            6 => Ok(StatusCode::DuplicateMismatch),
            7 => Ok(StatusCode::UnknownTransfer),
            8 => Ok(StatusCode::AssemblyTimeout),
            9 => Ok(StatusCode::TransportError),
            10 => Ok(StatusCode::InvalidStructure),
            11 => Ok(StatusCode::PayloadTooLarge),
            12 => Ok(StatusCode::Cancelled),
            other => Err(other),
        }
    }
}

impl From<StatusCode> for u64 {
    fn from(c: StatusCode) -> u64 {
        c as u64
    }
}

impl From<&WireError> for StatusCode {
    fn from(e: &WireError) -> Self {
        match e {
            WireError::PayloadTooLarge(_) => StatusCode::PayloadTooLarge,
            _ => StatusCode::InvalidStructure,
        }
    }
}

impl Status {
    pub fn new(code: StatusCode, result_value: u64) -> Self {
        Self {
            status_code: code.into(),
            result_value,
        }
    }

    pub fn success(result_value: u64) -> Self {
        Self::new(StatusCode::Success, result_value)
    }

    pub fn failure(code: StatusCode) -> Self {
        Self::new(code, 0)
    }

    /// Decoded status code. Unknown values come back as `Err(raw)`.
    pub fn code(&self) -> Result<StatusCode, u64> {
        StatusCode::try_from(self.status_code)
    }

    pub fn result(&self) -> u64 {
        self.result_value
    }
}
