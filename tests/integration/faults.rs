use std::time::Duration;

use crate::*;

use usbcomm_core::wire::{ActionRecord, WriteChunk};
use usbcomm_services::ConnState;

// ══════════════════════════════════════════════════════════════════════════════
//  Device faults, cancellation and timeouts
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_probe_against_missing_endpoint() -> Result<()> {
    let rig = rig(LoopbackDevice::new().without_endpoint(Endpoint::Control));
    let d = &rig.dispatcher;
    let id = d.attach();
    d.dispatch(id, Request::Connect(ClientKind::UsbClient)).await;
    d.dispatch(id, Request::OpenUsbInterface).await;

    let response = d.dispatch(id, Request::CheckEpSupportiveness(Endpoint::Control)).await;
    expect(&response, StatusCode::EndpointNotFound)?;
    // Write still refuses: the endpoint was never successfully probed.
    let chunk = WriteChunk::new(0, 0, b"x")?;
    d.dispatch(id, Request::FillWriteBuffer(chunk)).await;
    let commit = split(Bytes::from_static(b"x"), 0)?.commit();
    expect(&d.dispatch(id, Request::Write(commit)).await, StatusCode::InvalidState)?;
    Ok(())
}

#[tokio::test]
async fn test_silent_device_times_out_probe() -> Result<()> {
    let rig = rig(LoopbackDevice::new().unresponsive(Endpoint::Interrupt));
    let d = &rig.dispatcher;
    let id = d.attach();
    d.dispatch(id, Request::Connect(ClientKind::UsbClient)).await;
    d.dispatch(id, Request::OpenUsbInterface).await;

    let response = d.dispatch(id, Request::CheckEpSupportiveness(Endpoint::Interrupt)).await;
    expect(&response, StatusCode::DeviceTimeout)?;
    assert_eq!(d.state(id), Some(ConnState::InterfaceOpen));
    Ok(())
}

#[tokio::test]
async fn test_unknown_probe_values_are_unsupported() -> Result<()> {
    for reply in [&[0x00u8, 0x02][..], &[0x01, 0x01][..], &[0xFF, 0xFF][..], &[0x00][..]] {
        let rig = rig(LoopbackDevice::new().with_probe_reply(Endpoint::Control, reply));
        let d = &rig.dispatcher;
        let id = d.attach();
        d.dispatch(id, Request::Connect(ClientKind::UsbClient)).await;
        d.dispatch(id, Request::OpenUsbInterface).await;

        let response = d.dispatch(id, Request::CheckEpSupportiveness(Endpoint::Control)).await;
        expect(&response, StatusCode::Success)?;
        assert_eq!(response.result(), 0, "reply {reply:?}");

        let chunk = WriteChunk::new(0, 0, b"x")?;
        d.dispatch(id, Request::FillWriteBuffer(chunk)).await;
        let commit = split(Bytes::from_static(b"x"), 0)?.commit();
        expect(&d.dispatch(id, Request::Write(commit)).await, StatusCode::UnsupportedOperation)?;
    }
    Ok(())
}

#[tokio::test]
async fn test_write_survives_transient_timeouts() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = open_session(d).await?;

    let data = pattern(600, 3);
    rig.device.hang_next(2);
    let response = write_message(d, id, &data, 1).await?;
    expect(&response, StatusCode::Success)?;
    assert_eq!(rig.device.written(), vec![Bytes::from(data)]);
    Ok(())
}

#[tokio::test]
async fn test_write_reports_timeout_after_retries() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = open_session(d).await?;

    rig.device.hang_next(10);
    let response = write_message(d, id, b"never lands", 1).await?;
    expect(&response, StatusCode::DeviceTimeout)?;
    assert!(rig.device.written().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_read_times_out_and_discards() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = open_session(d).await?;

    let response = d.dispatch(id, Request::Read).await;
    expect(&response, StatusCode::AssemblyTimeout)?;
    assert_eq!(d.connection(id).map(|c| c.pending_reads()), Some(0));

    // The connection is still usable.
    expect(&write_message(d, id, b"after", 0).await?, StatusCode::Success)?;
    let response = d.dispatch(id, Request::Read).await;
    expect(&response, StatusCode::Success)?;
    Ok(())
}

#[tokio::test]
async fn test_release_cancels_pending_read() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = rig.dispatcher.clone();
    let id = open_session(&d).await?;

    let reader = {
        let d = d.clone();
        tokio::spawn(async move { d.dispatch(id, Request::Read).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let release = Request::ReleaseCallbackGeneral(ActionRecord { action_type: 160 });
    expect(&d.dispatch(id, release).await, StatusCode::Success)?;

    let response = reader.await?;
    expect(&response, StatusCode::Cancelled)?;
    assert_eq!(d.state(id), Some(ConnState::InterfaceOpen));
    Ok(())
}

#[tokio::test]
async fn test_release_cancels_pending_write() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = rig.dispatcher.clone();
    let id = open_session(&d).await?;

    let chunks = split(Bytes::from(pattern(500, 8)), 2)?;
    let commit = chunks.commit();
    for chunk in chunks {
        expect(&d.dispatch(id, Request::FillWriteBuffer(chunk)).await, StatusCode::Success)?;
    }
    rig.device.hang_next(100);
    let writer = {
        let d = d.clone();
        tokio::spawn(async move { d.dispatch(id, Request::Write(commit)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let release = Request::ReleaseCallbackGeneral(ActionRecord { action_type: 151 });
    let response = d.dispatch(id, release).await;
    expect(&response, StatusCode::Success)?;
    assert_eq!(response.result(), 1);

    expect(&writer.await?, StatusCode::Cancelled)?;
    assert_eq!(d.state(id), Some(ConnState::InterfaceOpen));
    assert_eq!(d.connection(id).map(|c| c.pending_writes()), Some(0));
    assert!(rig.device.written().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_detach_cancels_pending_read() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = rig.dispatcher.clone();
    let id = open_session(&d).await?;

    let reader = {
        let d = d.clone();
        tokio::spawn(async move { d.dispatch(id, Request::Read).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(d.detach(id));

    let response = reader.await?;
    expect(&response, StatusCode::Cancelled)?;
    assert_eq!(d.state(id), None);
    Ok(())
}

#[tokio::test]
async fn test_clear_buffer_discards_queued_data() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = open_session(d).await?;

    expect(&write_message(d, id, b"stale", 0).await?, StatusCode::Success)?;
    assert_eq!(rig.device.queued(), 1);
    expect(&d.dispatch(id, Request::InterruptEpClearBufferRead).await, StatusCode::Success)?;
    assert_eq!(rig.device.queued(), 0);

    expect(&d.dispatch(id, Request::Read).await, StatusCode::AssemblyTimeout)?;
    Ok(())
}
