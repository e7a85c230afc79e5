//! Typed requests and responses at the driver boundary.

use bytes::Bytes;

use usbcomm_core::selector::{ActionType, Phase, Selector};
use usbcomm_core::status::StatusCode;
use usbcomm_core::wire::{
    decode_exact, ActionRecord, ByteArray, DriverStatus, DriverVersion, Endpoint,
    EpSupportiveness, Status, WireError, WriteChunk, WriteCommit,
};

use crate::connection::ClientKind;
use crate::error::ProtocolError;

/// How a request names its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Selector(u32),
    Action(u8),
}

impl Inbound {
    /// The action type this routes to, if the code is known.
    pub fn action_type(self) -> Option<ActionType> {
        match self {
            Inbound::Selector(raw) => Selector::try_from(raw).ok().map(Selector::action_type),
            Inbound::Action(raw) => ActionType::try_from(raw).ok(),
        }
    }

    pub fn phase(self) -> Option<Phase> {
        match self {
            Inbound::Selector(raw) => Selector::try_from(raw).ok().map(Selector::phase),
            Inbound::Action(raw) => ActionType::try_from(raw).ok().map(ActionType::phase),
        }
    }

    pub fn is_release(self) -> bool {
        self.action_type().is_some_and(ActionType::is_release)
    }
}

/// A decoded action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect(ClientKind),
    OpenUsbInterface,
    CloseUsbInterface,
    CheckEpSupportiveness(Endpoint),
    DriverStatus,
    GetDriverVersion,
    ReturnDriverDebugLog,
    ReleaseCallbackGeneral(ActionRecord),
    FillWriteBuffer(WriteChunk),
    Write(WriteCommit),
    Read,
    ReleaseReadCallback,
    InterruptEpClearBufferRead,
}

impl Request {
    /// Decode an inbound request, validating its payload structure.
    pub fn decode(inbound: Inbound, payload: &[u8]) -> Result<Request, ProtocolError> {
        match inbound {
            Inbound::Selector(raw) => {
                let selector = Selector::try_from(raw).map_err(|_| {
                    ProtocolError::UnsupportedOperation(format!("selector {raw}"))
                })?;
                Self::from_selector(selector, payload)
            }
            Inbound::Action(raw) => {
                let action = ActionType::try_from(raw).map_err(|_| {
                    ProtocolError::UnsupportedOperation(format!("action type {raw}"))
                })?;
                Self::from_action(action, payload)
            }
        }
    }

    fn from_selector(selector: Selector, payload: &[u8]) -> Result<Request, ProtocolError> {
        match selector {
            Selector::GetDriverVersion => {
                expect_empty(payload)?;
                Ok(Request::GetDriverVersion)
            }
            Selector::ReturnDriverDebugLog => {
                expect_empty(payload)?;
                Ok(Request::ReturnDriverDebugLog)
            }
            Selector::OpenUsbInterface
            | Selector::CloseUsbInterface
            | Selector::CheckEpSupportiveness
            | Selector::ReleaseCallbackActionGeneral
            | Selector::FillWriteBuffer
            | Selector::Write
            | Selector::Read
            | Selector::ReleaseReadCallbackAction
            | Selector::InterruptEpClearBufferRead => {
                Self::from_action(selector.action_type(), payload)
            }
        }
    }

    fn from_action(action: ActionType, payload: &[u8]) -> Result<Request, ProtocolError> {
        let request = match action {
            ActionType::ConnectDriverDetection => {
                expect_empty(payload)?;
                Request::Connect(ClientKind::DriverDetection)
            }
            ActionType::ConnectUsbClient => {
                expect_empty(payload)?;
                Request::Connect(ClientKind::UsbClient)
            }
            ActionType::OpenUsbInterface => {
                expect_empty(payload)?;
                Request::OpenUsbInterface
            }
            ActionType::CloseUsbInterface => {
                expect_empty(payload)?;
                Request::CloseUsbInterface
            }
            ActionType::CheckEpSupportiveness => {
                let [address] = payload else {
                    return Err(WireError::SizeMismatch {
                        expected: 1,
                        actual: payload.len(),
                    }
                    .into());
                };
                let endpoint = Endpoint::from_address(*address).ok_or_else(|| {
                    tracing::debug!(address = *address, "probe for unknown endpoint address");
                    ProtocolError::EndpointNotFound(Endpoint::Control)
                })?;
                Request::CheckEpSupportiveness(endpoint)
            }
            ActionType::DriverStatus => {
                expect_empty(payload)?;
                Request::DriverStatus
            }
            ActionType::General => Request::ReleaseCallbackGeneral(decode_exact(payload)?),
            ActionType::FillWriteBuffer => Request::FillWriteBuffer(WriteChunk::decode(payload)?),
            ActionType::Write => Request::Write(decode_exact(payload)?),
            ActionType::Read => {
                expect_empty(payload)?;
                Request::Read
            }
            ActionType::ReleaseReadCallbackAction => {
                expect_empty(payload)?;
                Request::ReleaseReadCallback
            }
            ActionType::InterruptEpClearBufferRead => {
                expect_empty(payload)?;
                Request::InterruptEpClearBufferRead
            }
        };
        Ok(request)
    }

    /// Action type this request routes on.
    pub fn action_type(&self) -> ActionType {
        match self {
            Request::Connect(ClientKind::DriverDetection) => ActionType::ConnectDriverDetection,
            Request::Connect(ClientKind::UsbClient) => ActionType::ConnectUsbClient,
            Request::OpenUsbInterface => ActionType::OpenUsbInterface,
            Request::CloseUsbInterface => ActionType::CloseUsbInterface,
            Request::CheckEpSupportiveness(_) => ActionType::CheckEpSupportiveness,
            Request::DriverStatus | Request::GetDriverVersion | Request::ReturnDriverDebugLog => {
                ActionType::DriverStatus
            }
            Request::ReleaseCallbackGeneral(_) => ActionType::General,
            Request::FillWriteBuffer(_) => ActionType::FillWriteBuffer,
            Request::Write(_) => ActionType::Write,
            Request::Read => ActionType::Read,
            Request::ReleaseReadCallback => ActionType::ReleaseReadCallbackAction,
            Request::InterruptEpClearBufferRead => ActionType::InterruptEpClearBufferRead,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Request::GetDriverVersion | Request::ReturnDriverDebugLog => Phase::Diagnostics,
            other => other.action_type().phase(),
        }
    }

    /// Release actions run outside the per-connection ordering and in any state.
    pub fn is_release(&self) -> bool {
        self.action_type().is_release()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect(_) => "connect",
            Request::OpenUsbInterface => "open_usb_interface",
            Request::CloseUsbInterface => "close_usb_interface",
            Request::CheckEpSupportiveness(_) => "check_ep_supportiveness",
            Request::DriverStatus => "driver_status",
            Request::GetDriverVersion => "get_driver_version",
            Request::ReturnDriverDebugLog => "return_driver_debug_log",
            Request::ReleaseCallbackGeneral(_) => "release_callback_general",
            Request::FillWriteBuffer(_) => "fill_write_buffer",
            Request::Write(_) => "write",
            Request::Read => "read",
            Request::ReleaseReadCallback => "release_read_callback",
            Request::InterruptEpClearBufferRead => "interrupt_ep_clear_buffer_read",
        }
    }
}

fn expect_empty(payload: &[u8]) -> Result<(), WireError> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(WireError::SizeMismatch {
            expected: 0,
            actual: payload.len(),
        })
    }
}

/// Data returned alongside the status by data-bearing actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    DriverStatus(DriverStatus),
    DriverVersion(DriverVersion),
    ByteArray(ByteArray),
    EpSupportiveness(EpSupportiveness),
    /// A fully assembled read transfer.
    Message(Bytes),
}

/// Outcome of one action: always a status, sometimes data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Option<Payload>,
}

impl Response {
    pub fn ok(result_value: u64) -> Self {
        Self {
            status: Status::success(result_value),
            payload: None,
        }
    }

    pub fn with_payload(result_value: u64, payload: Payload) -> Self {
        Self {
            status: Status::success(result_value),
            payload: Some(payload),
        }
    }

    pub fn failure(code: StatusCode) -> Self {
        Self {
            status: Status::failure(code),
            payload: None,
        }
    }

    pub fn from_error(e: &ProtocolError) -> Self {
        Self::failure(e.status_code())
    }

    /// Decoded status code; an unknown value reads as a transport error.
    pub fn code(&self) -> StatusCode {
        self.status.code().unwrap_or(StatusCode::TransportError)
    }

    pub fn result(&self) -> u64 {
        self.status.result()
    }
}
