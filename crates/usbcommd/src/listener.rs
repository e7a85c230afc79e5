//! Unix socket front end.
//!
//! Each accepted stream is one driver connection: attached on accept,
//! detached when the stream ends. Ordinary requests run one after another
//! on a per-stream worker. Release requests are dispatched as soon as their
//! frame is read, so they reach a read or write that is still waiting.
//! Responses are written in request order either way.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use usbcomm_services::{ConnectionId, Dispatcher, Inbound, Response, Transport};

use crate::frame::{encode_response, read_request, FrameError};

/// Accept clients until `shutdown` fires.
pub async fn serve<T: Transport>(
    listener: UnixListener,
    dispatcher: Arc<Dispatcher<T>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(connections = dispatcher.connection_count(), "listener stopping");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, dispatcher).await {
                            tracing::warn!(error = %e, "client stream failed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Requests a stream may have outstanding before its frames stop being read.
const PIPELINE_DEPTH: usize = 32;

type Job = (Inbound, Vec<u8>, oneshot::Sender<Response>);

async fn handle_client<T: Transport>(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher<T>>,
) -> Result<(), FrameError> {
    let id = dispatcher.attach();
    tracing::info!(connection = id, "client attached");
    let (mut reader, writer) = stream.into_split();

    let (reply_tx, reply_rx) = mpsc::channel::<oneshot::Receiver<Response>>(PIPELINE_DEPTH);
    let (job_tx, job_rx) = mpsc::channel::<Job>(PIPELINE_DEPTH);
    let worker = tokio::spawn(run_in_order(dispatcher.clone(), id, job_rx));
    let responder = tokio::spawn(write_responses(writer, reply_rx));

    let result = async {
        while let Some((inbound, payload)) = read_request(&mut reader).await? {
            let (response_tx, response_rx) = oneshot::channel();
            if reply_tx.send(response_rx).await.is_err() {
                break;
            }
            if inbound.is_release() {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let response = dispatcher.dispatch_raw(id, inbound, &payload).await;
                    let _ = response_tx.send(response);
                });
            } else if job_tx.send((inbound, payload, response_tx)).await.is_err() {
                break;
            }
        }
        Ok::<(), FrameError>(())
    }
    .await;

    // Closing the stream abandons whatever is still pending on it.
    dispatcher.detach(id);
    drop(job_tx);
    drop(reply_tx);
    let _ = worker.await;
    if let Ok(Err(e)) = responder.await {
        tracing::debug!(connection = id, error = %e, "response stream closed early");
    }
    result
}

async fn run_in_order<T: Transport>(
    dispatcher: Arc<Dispatcher<T>>,
    id: ConnectionId,
    mut jobs: mpsc::Receiver<Job>,
) {
    while let Some((inbound, payload, response_tx)) = jobs.recv().await {
        let response = dispatcher.dispatch_raw(id, inbound, &payload).await;
        let _ = response_tx.send(response);
    }
}

async fn write_responses(
    mut writer: OwnedWriteHalf,
    mut replies: mpsc::Receiver<oneshot::Receiver<Response>>,
) -> Result<(), FrameError> {
    while let Some(reply) = replies.recv().await {
        let Ok(response) = reply.await else {
            break;
        };
        writer.write_all(&encode_response(&response)?).await?;
    }
    Ok(())
}

/// Periodically drop read assemblies that outlived their timeout.
///
/// Runs forever; cancel by dropping the task handle.
pub async fn expiry_loop<T: Transport>(dispatcher: Arc<Dispatcher<T>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let expired = dispatcher.expire_stale();
        if expired > 0 {
            tracing::debug!(expired, "stale read assemblies dropped");
        }
    }
}
