//! usbcomm-core: wire structures, selector table, status taxonomy and config
//! for the USB driver boundary. All other usbcomm crates depend on this one.

pub mod config;
pub mod selector;
pub mod status;
pub mod wire;

pub use selector::{ActionType, Phase, Selector};
pub use status::StatusCode;
pub use wire::{Endpoint, ReadChunk, Status, WireError, WriteChunk, WriteCommit};
