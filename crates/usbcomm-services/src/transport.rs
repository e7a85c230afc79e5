//! Transport boundary: the one call the protocol layer makes into real USB I/O.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use usbcomm_core::wire::Endpoint;

use crate::error::ProtocolError;

/// Executes one request/response exchange on an endpoint.
///
/// Implementations own the physical transfer. They must not apply their own
/// protocol-level timeouts; the caller bounds every exchange.
pub trait Transport: Send + Sync + 'static {
    fn send_receive(
        &self,
        endpoint: Endpoint,
        request: Bytes,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

/// Failures reported by the transport. Propagated to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{0} endpoint not present on device")]
    EndpointNotFound(Endpoint),

    #[error("{0} endpoint stalled")]
    Stalled(Endpoint),

    #[error("device disconnected")]
    Disconnected,

    #[error("transfer failed: {0}")]
    Io(String),
}

/// Run one exchange under `timeout`.
pub async fn exchange<T: Transport>(
    transport: &T,
    endpoint: Endpoint,
    request: Bytes,
    timeout: Duration,
) -> Result<Bytes, ProtocolError> {
    let request_len = request.len();
    match tokio::time::timeout(timeout, transport.send_receive(endpoint, request)).await {
        Ok(Ok(reply)) => {
            tracing::trace!(%endpoint, request_len, reply_len = reply.len(), "exchange complete");
            Ok(reply)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ProtocolError::DeviceTimeout(endpoint)),
    }
}
