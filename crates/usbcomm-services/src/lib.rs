//! usbcomm-services: the protocol layer above the wire structures.
//!
//! Capability probing, chunk disassembly and assembly, write staging, the
//! per-connection state machine and the action dispatcher, plus the
//! transport boundary and an in-memory loopback device.

pub mod assemble;
pub mod capability;
pub mod connection;
pub mod context;
pub mod disassemble;
pub mod dispatch;
pub mod error;
pub mod loopback;
pub mod request;
pub mod staging;
pub mod transport;

pub use assemble::{Assembler, Assembly};
pub use capability::{probe_endpoint, Capability, Supportiveness};
pub use connection::{new_connection_table, ClientKind, ConnState, Connection, ConnectionId, ConnectionTable};
pub use context::{DebugLog, DriverContext};
pub use disassemble::{split, split_read, WriteChunks};
pub use dispatch::Dispatcher;
pub use error::{AssemblyError, ProtocolError};
pub use loopback::LoopbackDevice;
pub use request::{Inbound, Payload, Request, Response};
pub use staging::WriteStaging;
pub use transport::{exchange, Transport, TransportError};
