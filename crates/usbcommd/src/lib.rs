//! usbcommd: the usbcomm driver boundary served over a Unix socket.

pub mod frame;
pub mod listener;
