//! usbcomm integration test harness.
//!
//! Drives the dispatcher end to end against the loopback device, both
//! in-process and through the daemon's Unix socket framing.
//!
//!   cargo test --test integration

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use bytes::Bytes;
use zerocopy::AsBytes;

use usbcomm_core::config::UsbCommConfig;
use usbcomm_core::status::StatusCode;
use usbcomm_core::wire::Endpoint;
use usbcomm_services::{
    split, ClientKind, ConnectionId, Dispatcher, DriverContext, LoopbackDevice, Request, Response,
};

mod faults;
mod session;
mod socket;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Config with timeouts short enough for tests.
pub fn test_config() -> UsbCommConfig {
    let mut config = UsbCommConfig::default();
    config.driver.version = "usbcomm 0.1.0-test".into();
    config.transfer.probe_timeout_ms = 100;
    config.transfer.exchange_timeout_ms = 100;
    config.transfer.read_timeout_ms = 500;
    config.transfer.poll_interval_ms = 5;
    config.transfer.write_retries = 2;
    config
}

pub struct Rig {
    pub dispatcher: Arc<Dispatcher<LoopbackDevice>>,
    pub device: Arc<LoopbackDevice>,
}

pub fn rig(device: LoopbackDevice) -> Rig {
    let device = Arc::new(device);
    let context = Arc::new(DriverContext::from_config(&test_config()));
    Rig {
        dispatcher: Arc::new(Dispatcher::new(device.clone(), context)),
        device,
    }
}

pub fn expect(response: &Response, code: StatusCode) -> Result<()> {
    if response.code() != code {
        bail!("expected {code}, got {} ({response:?})", response.code());
    }
    Ok(())
}

/// Attach, connect, open and probe both endpoints.
pub async fn open_session(d: &Dispatcher<LoopbackDevice>) -> Result<ConnectionId> {
    let id = d.attach();
    expect(&d.dispatch(id, Request::Connect(ClientKind::UsbClient)).await, StatusCode::Success)?;
    expect(&d.dispatch(id, Request::OpenUsbInterface).await, StatusCode::Success)?;
    for endpoint in [Endpoint::Control, Endpoint::Interrupt] {
        let response = d.dispatch(id, Request::CheckEpSupportiveness(endpoint)).await;
        expect(&response, StatusCode::Success)?;
        if response.result() != 1 {
            bail!("{endpoint} endpoint reported unsupported");
        }
    }
    Ok(id)
}

/// Stage `data` chunk by chunk and commit it.
pub async fn write_message(
    d: &Dispatcher<LoopbackDevice>,
    id: ConnectionId,
    data: &[u8],
    index: u8,
) -> Result<Response> {
    let chunks = split(Bytes::copy_from_slice(data), index)?;
    let commit = chunks.commit();
    for chunk in chunks {
        expect(&d.dispatch(id, Request::FillWriteBuffer(chunk)).await, StatusCode::Success)?;
    }
    Ok(d.dispatch(id, Request::Write(commit)).await)
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed))
        .collect()
}

/// Unique socket path per test in this process.
pub fn socket_path(tag: &str) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("usbcomm-it-{tag}-{}-{n}.sock", std::process::id()))
}

/// Raw bytes of any wire structure.
pub fn raw<T: AsBytes>(value: &T) -> Vec<u8> {
    value.as_bytes().to_vec()
}
