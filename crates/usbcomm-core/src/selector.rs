//! External method selectors and internal action types.
//!
//! Two numeric spaces exist. Selectors (u32, 4 digits) form the outward API
//! surface; action types (u8) are what the driver routes on once a client is
//! connected. Every selector maps to exactly one action type, and the mapping
//! is an exhaustive match so adding a selector without routing it fails to
//! compile. Numeric grouping encodes the protocol phase.

use crate::status::StatusCode;

/// Outward-facing external method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Selector {
    OpenUsbInterface = 1000,
    CloseUsbInterface = 1001,
    CheckEpSupportiveness = 1005,
    ReleaseCallbackActionGeneral = 1102,
    FillWriteBuffer = 1500,
    Write = 1501,
    Read = 1601,
    ReleaseReadCallbackAction = 1602,
    InterruptEpClearBufferRead = 1603,
    GetDriverVersion = 1700,
    ReturnDriverDebugLog = 1701,
}

/// Internal routing tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionType {
    ConnectDriverDetection = 100,
    ConnectUsbClient = 101,
    OpenUsbInterface = 102,
    CheckEpSupportiveness = 105,
    DriverStatus = 111,
    General = 112,
    FillWriteBuffer = 150,
    Write = 151,
    Read = 160,
    ReleaseReadCallbackAction = 161,
    InterruptEpClearBufferRead = 163,
    CloseUsbInterface = 200,
}

/// Protocol phase an action belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Interface,
    Capability,
    General,
    WritePath,
    ReadPath,
    Diagnostics,
}

impl Selector {
    pub const ALL: [Selector; 11] = [
        Selector::OpenUsbInterface,
        Selector::CloseUsbInterface,
        Selector::CheckEpSupportiveness,
        Selector::ReleaseCallbackActionGeneral,
        Selector::FillWriteBuffer,
        Selector::Write,
        Selector::Read,
        Selector::ReleaseReadCallbackAction,
        Selector::InterruptEpClearBufferRead,
        Selector::GetDriverVersion,
        Selector::ReturnDriverDebugLog,
    ];

    /// Action type this selector routes to.
    pub fn action_type(self) -> ActionType {
        match self {
            Selector::OpenUsbInterface => ActionType::OpenUsbInterface,
            Selector::CloseUsbInterface => ActionType::CloseUsbInterface,
            Selector::CheckEpSupportiveness => ActionType::CheckEpSupportiveness,
            Selector::ReleaseCallbackActionGeneral => ActionType::General,
            Selector::FillWriteBuffer => ActionType::FillWriteBuffer,
            Selector::Write => ActionType::Write,
            Selector::Read => ActionType::Read,
            Selector::ReleaseReadCallbackAction => ActionType::ReleaseReadCallbackAction,
            Selector::InterruptEpClearBufferRead => ActionType::InterruptEpClearBufferRead,
            Selector::GetDriverVersion => ActionType::DriverStatus,
            Selector::ReturnDriverDebugLog => ActionType::DriverStatus,
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            Selector::GetDriverVersion | Selector::ReturnDriverDebugLog => Phase::Diagnostics,
            other => other.action_type().phase(),
        }
    }
}

impl ActionType {
    pub fn phase(self) -> Phase {
        match self {
            ActionType::ConnectDriverDetection | ActionType::ConnectUsbClient => Phase::Setup,
            ActionType::OpenUsbInterface | ActionType::CloseUsbInterface => Phase::Interface,
            ActionType::CheckEpSupportiveness => Phase::Capability,
            ActionType::DriverStatus | ActionType::General => Phase::General,
            ActionType::FillWriteBuffer | ActionType::Write => Phase::WritePath,
            ActionType::Read
            | ActionType::ReleaseReadCallbackAction
            | ActionType::InterruptEpClearBufferRead => Phase::ReadPath,
        }
    }

    /// Releases clean up pending state. They are valid in any state and are
    /// not ordered behind other actions on the connection.
    pub fn is_release(self) -> bool {
        matches!(self, ActionType::General | ActionType::ReleaseReadCallbackAction)
    }
}

impl TryFrom<u32> for Selector {
    type Error = StatusCode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1000 => Ok(Selector::OpenUsbInterface),
            1001 => Ok(Selector::CloseUsbInterface),
            1005 => Ok(Selector::CheckEpSupportiveness),
            1102 => Ok(Selector::ReleaseCallbackActionGeneral),
            1500 => Ok(Selector::FillWriteBuffer),
            1501 => Ok(Selector::Write),
            1601 => Ok(Selector::Read),
            1602 => Ok(Selector::ReleaseReadCallbackAction),
            1603 => Ok(Selector::InterruptEpClearBufferRead),
            1700 => Ok(Selector::GetDriverVersion),
            1701 => Ok(Selector::ReturnDriverDebugLog),
            _ => Err(StatusCode::UnsupportedOperation),
        }
    }
}

impl TryFrom<u8> for ActionType {
    type Error = StatusCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(ActionType::ConnectDriverDetection),
            101 => Ok(ActionType::ConnectUsbClient),
            102 => Ok(ActionType::OpenUsbInterface),
            105 => Ok(ActionType::CheckEpSupportiveness),
            111 => Ok(ActionType::DriverStatus),
            112 => Ok(ActionType::General),
            150 => Ok(ActionType::FillWriteBuffer),
            151 => Ok(ActionType::Write),
            160 => Ok(ActionType::Read),
            161 => Ok(ActionType::ReleaseReadCallbackAction),
            163 => Ok(ActionType::InterruptEpClearBufferRead),
            200 => Ok(ActionType::CloseUsbInterface),
            _ => Err(StatusCode::UnsupportedOperation),
        }
    }
}

impl From<Selector> for u32 {
    fn from(s: Selector) -> u32 {
        s as u32
    }
}

impl From<ActionType> for u8 {
    fn from(a: ActionType) -> u8 {
        a as u8
    }
}
