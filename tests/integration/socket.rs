use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::*;

use usbcomm_core::wire::{EpSupportiveness, Status};
use usbcomm_services::Inbound;
use usbcommd::frame::{encode_request, read_response, reassemble};
use usbcommd::listener;

// ══════════════════════════════════════════════════════════════════════════════
//  Daemon socket framing
// ══════════════════════════════════════════════════════════════════════════════

struct Client {
    stream: UnixStream,
}

impl Client {
    async fn call(&mut self, inbound: Inbound, payload: &[u8]) -> Result<(Status, Vec<Bytes>)> {
        self.stream.write_all(&encode_request(inbound, payload)?).await?;
        Ok(read_response(&mut self.stream).await?)
    }
}

async fn start(tag: &str) -> Result<(Client, broadcast::Sender<()>, PathBuf)> {
    let path = socket_path(tag);
    let _ = std::fs::remove_file(&path);
    let unix_listener = UnixListener::bind(&path)?;
    let rig = rig(LoopbackDevice::new().reverse_delivery());
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(listener::serve(
        unix_listener,
        rig.dispatcher.clone(),
        shutdown_tx.subscribe(),
    ));
    let stream = UnixStream::connect(&path).await?;
    Ok((Client { stream }, shutdown_tx, path))
}

#[tokio::test]
async fn test_socket_session_round_trip() -> Result<()> {
    let (mut client, shutdown, path) = start("roundtrip").await?;

    let (status, _) = client.call(Inbound::Action(101), &[]).await?;
    assert_eq!(status.code(), Ok(StatusCode::Success));
    let (status, _) = client.call(Inbound::Selector(1000), &[]).await?;
    assert_eq!(status.code(), Ok(StatusCode::Success));

    let (status, structures) = client.call(Inbound::Selector(1005), &[0x00]).await?;
    assert_eq!(status.result(), 1);
    assert_eq!(
        structures,
        vec![Bytes::copy_from_slice(
            EpSupportiveness {
                info_1: 0x00,
                info_2: 0x01
            }
            .as_bytes()
        )]
    );
    let (status, _) = client.call(Inbound::Selector(1005), &[0x81]).await?;
    assert_eq!(status.result(), 1);

    let data = pattern(1000, 41);
    let chunks = split(Bytes::from(data.clone()), 2)?;
    let commit = chunks.commit();
    for chunk in chunks {
        let (status, _) = client.call(Inbound::Selector(1500), &raw(&chunk)).await?;
        assert_eq!(status.code(), Ok(StatusCode::Success));
    }
    let (status, _) = client.call(Inbound::Selector(1501), &raw(&commit)).await?;
    assert_eq!(status.code(), Ok(StatusCode::Success));
    assert_eq!(status.result(), 1000);

    let (status, structures) = client.call(Inbound::Selector(1601), &[]).await?;
    assert_eq!(status.code(), Ok(StatusCode::Success));
    assert_eq!(status.result(), 1000);
    assert_eq!(structures.len(), 9);
    assert_eq!(reassemble(&structures)?.as_ref(), data.as_slice());

    shutdown.send(())?;
    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[tokio::test]
async fn test_socket_reports_errors_as_status() -> Result<()> {
    let (mut client, shutdown, path) = start("errors").await?;

    let (status, structures) = client.call(Inbound::Selector(1601), &[]).await?;
    assert_eq!(status.code(), Ok(StatusCode::InvalidState));
    assert!(structures.is_empty());

    let (status, _) = client.call(Inbound::Selector(4242), &[]).await?;
    assert_eq!(status.code(), Ok(StatusCode::UnsupportedOperation));

    // Action type numbers are not valid selectors.
    let (status, _) = client.call(Inbound::Selector(101), &[]).await?;
    assert_eq!(status.code(), Ok(StatusCode::UnsupportedOperation));

    shutdown.send(())?;
    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[tokio::test]
async fn test_socket_release_reaches_pending_read() -> Result<()> {
    let (mut client, shutdown, path) = start("release").await?;
    client.call(Inbound::Action(101), &[]).await?;
    client.call(Inbound::Selector(1000), &[]).await?;
    let (status, _) = client.call(Inbound::Selector(1005), &[0x81]).await?;
    assert_eq!(status.result(), 1);

    let started = Instant::now();
    client.stream.write_all(&encode_request(Inbound::Selector(1601), &[])?).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.stream.write_all(&encode_request(Inbound::Selector(1602), &[])?).await?;

    // Answers keep request order: the read first, then the release.
    let (status, structures) = read_response(&mut client.stream).await?;
    assert_eq!(status.code(), Ok(StatusCode::Cancelled));
    assert!(structures.is_empty());
    let (status, _) = read_response(&mut client.stream).await?;
    assert_eq!(status.code(), Ok(StatusCode::Success));
    assert_eq!(status.result(), 1);
    assert!(started.elapsed() < Duration::from_millis(450));

    // Pipelined ordinary requests are answered in order.
    client.stream.write_all(&encode_request(Inbound::Selector(1700), &[])?).await?;
    client.stream.write_all(&encode_request(Inbound::Selector(4242), &[])?).await?;
    let (status, _) = read_response(&mut client.stream).await?;
    assert_eq!(status.code(), Ok(StatusCode::Success));
    let (status, _) = read_response(&mut client.stream).await?;
    assert_eq!(status.code(), Ok(StatusCode::UnsupportedOperation));

    shutdown.send(())?;
    let _ = std::fs::remove_file(&path);
    Ok(())
}
