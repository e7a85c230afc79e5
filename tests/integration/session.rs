use crate::*;

use usbcomm_core::wire::{WriteChunk, WriteCommit};
use usbcomm_services::{ConnState, Inbound, Payload};

// ══════════════════════════════════════════════════════════════════════════════
//  Session lifecycle and data path
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_session_echo() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = open_session(d).await?;

    for (len, index) in [(0usize, 0u8), (1, 1), (120, 2), (240, 3), (4000, 4)] {
        let data = pattern(len, index);
        let response = write_message(d, id, &data, index).await?;
        expect(&response, StatusCode::Success)?;
        assert_eq!(response.result(), len as u64);

        let response = d.dispatch(id, Request::Read).await;
        expect(&response, StatusCode::Success)?;
        assert_eq!(response.result(), len as u64);
        assert_eq!(response.payload, Some(Payload::Message(Bytes::from(data))));
    }
    assert_eq!(rig.device.written().len(), 5);

    expect(&d.dispatch(id, Request::CloseUsbInterface).await, StatusCode::Success)?;
    assert_eq!(d.state(id), Some(ConnState::Connected));
    assert!(d.detach(id));
    Ok(())
}

#[tokio::test]
async fn test_reverse_delivery_reassembles() -> Result<()> {
    let rig = rig(LoopbackDevice::new().reverse_delivery());
    let d = &rig.dispatcher;
    let id = open_session(d).await?;

    let data = pattern(30_600, 77);
    expect(&write_message(d, id, &data, 9).await?, StatusCode::Success)?;
    let response = d.dispatch(id, Request::Read).await;
    expect(&response, StatusCode::Success)?;
    assert_eq!(response.payload, Some(Payload::Message(Bytes::from(data))));
    Ok(())
}

#[tokio::test]
async fn test_oversized_write_is_rejected_at_the_boundary() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    assert!(split(Bytes::from(vec![0u8; 30_601]), 0).is_err());

    let d = &rig.dispatcher;
    let id = open_session(d).await?;
    let commit = WriteCommit {
        index: 0,
        total_blocks: 0,
    };
    expect(&d.dispatch(id, Request::Write(commit)).await, StatusCode::UnknownTransfer)?;
    Ok(())
}

#[tokio::test]
async fn test_data_path_before_open_leaves_state_unchanged() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = d.attach();

    let chunk = WriteChunk::new(0, 0, b"too early")?;
    for state in [ConnState::Disconnected, ConnState::Connected] {
        if state == ConnState::Connected {
            expect(&d.dispatch(id, Request::Connect(ClientKind::UsbClient)).await, StatusCode::Success)?;
        }
        for request in [
            Request::FillWriteBuffer(chunk),
            Request::Write(WriteCommit {
                index: 0,
                total_blocks: 1,
            }),
            Request::Read,
            Request::InterruptEpClearBufferRead,
        ] {
            expect(&d.dispatch(id, request).await, StatusCode::InvalidState)?;
            assert_eq!(d.state(id), Some(state));
        }
    }
    assert!(rig.device.written().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_selectors_drive_the_same_session() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = d.attach();

    expect(&d.dispatch_raw(id, Inbound::Action(101), &[]).await, StatusCode::Success)?;
    let response = d.dispatch_raw(id, Inbound::Selector(1000), &[]).await;
    expect(&response, StatusCode::Success)?;
    assert_eq!(response.result(), id);

    for address in [0x00u8, 0x81] {
        let response = d.dispatch_raw(id, Inbound::Selector(1005), &[address]).await;
        expect(&response, StatusCode::Success)?;
        assert_eq!(response.result(), 1);
    }

    let chunk = WriteChunk::new(5, 0, b"via selectors")?;
    expect(&d.dispatch_raw(id, Inbound::Selector(1500), &raw(&chunk)).await, StatusCode::Success)?;
    let commit = WriteCommit {
        index: 5,
        total_blocks: 1,
    };
    expect(&d.dispatch_raw(id, Inbound::Selector(1501), &raw(&commit)).await, StatusCode::Success)?;

    let response = d.dispatch_raw(id, Inbound::Selector(1601), &[]).await;
    assert_eq!(
        response.payload,
        Some(Payload::Message(Bytes::from_static(b"via selectors")))
    );

    let response = d.dispatch_raw(id, Inbound::Selector(1700), &[]).await;
    match response.payload {
        Some(Payload::DriverVersion(version)) => assert_eq!(version.text(), "usbcomm 0.1.0-test"),
        other => bail!("unexpected payload {other:?}"),
    }

    let response = d.dispatch_raw(id, Inbound::Selector(1701), &[]).await;
    match response.payload {
        Some(Payload::ByteArray(log)) => assert!(log.text().contains("read -> success")),
        other => bail!("unexpected payload {other:?}"),
    }

    expect(&d.dispatch_raw(id, Inbound::Selector(1001), &[]).await, StatusCode::Success)?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_selector_is_unsupported() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let id = open_session(d).await?;
    expect(&d.dispatch_raw(id, Inbound::Selector(4242), &[]).await, StatusCode::UnsupportedOperation)?;
    expect(&d.dispatch_raw(id, Inbound::Selector(1500), &[0u8; 3]).await, StatusCode::InvalidStructure)?;
    assert_eq!(d.state(id), Some(ConnState::InterfaceOpen));
    Ok(())
}

#[tokio::test]
async fn test_connections_are_independent() -> Result<()> {
    let rig = rig(LoopbackDevice::new());
    let d = &rig.dispatcher;
    let a = open_session(d).await?;
    let b = d.attach();

    expect(&d.dispatch(a, Request::FillWriteBuffer(WriteChunk::new(1, 0, b"a")?)).await, StatusCode::Success)?;
    expect(&d.dispatch(b, Request::FillWriteBuffer(WriteChunk::new(1, 0, b"b")?)).await, StatusCode::InvalidState)?;

    assert_eq!(d.connection(a).map(|c| c.pending_writes()), Some(1));
    assert_eq!(d.connection(b).map(|c| c.pending_writes()), Some(0));
    assert!(d.detach(a));
    assert_eq!(d.connection_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_driver_status_document() -> Result<()> {
    let rig = rig(LoopbackDevice::new().with_probe_reply(Endpoint::Interrupt, &[0x03u8, 0x02][..]));
    let d = &rig.dispatcher;
    let id = d.attach();
    expect(&d.dispatch(id, Request::Connect(ClientKind::UsbClient)).await, StatusCode::Success)?;
    expect(&d.dispatch(id, Request::OpenUsbInterface).await, StatusCode::Success)?;
    let response = d.dispatch(id, Request::CheckEpSupportiveness(Endpoint::Interrupt)).await;
    expect(&response, StatusCode::Success)?;
    assert_eq!(response.result(), 0);

    let response = d.dispatch(id, Request::DriverStatus).await;
    let Some(Payload::DriverStatus(document)) = response.payload else {
        bail!("no status document");
    };
    let json: serde_json::Value = serde_json::from_str(&document.text())?;
    assert_eq!(json["state"], "interface_open");
    assert_eq!(json["ctrl"], "unprobed");
    assert_eq!(json["intr"], "unsupported");
    Ok(())
}
