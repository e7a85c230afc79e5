//! Routes decoded actions to the connection state machine and data paths.
//!
//! Every action yields a [`Response`]; nothing here panics or propagates.
//! Ordinary actions on one connection run one at a time under its `serial`
//! lock. Release actions skip that lock so they can cancel an in-flight read
//! or write.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use zerocopy::AsBytes;

use usbcomm_core::selector::{ActionType, Phase};
use usbcomm_core::wire::{
    ActionRecord, ByteArray, DriverStatus, Endpoint, ReadChunk, ReadPoll, WriteCommit,
};

use crate::assemble::Assembly;
use crate::capability::probe_endpoint;
use crate::connection::{
    new_connection_table, ClientKind, ConnState, Connection, ConnectionId, ConnectionIds,
    ConnectionInner, ConnectionTable,
};
use crate::context::DriverContext;
use crate::disassemble::{split, WriteChunks};
use crate::error::{AssemblyError, ProtocolError};
use crate::request::{Inbound, Payload, Request, Response};
use crate::transport::{exchange, Transport};

/// Owns every connection and the transport they share.
pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    connections: ConnectionTable,
    context: Arc<DriverContext>,
    ids: ConnectionIds,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: Arc<T>, context: Arc<DriverContext>) -> Self {
        Self {
            transport,
            connections: new_connection_table(),
            context,
            ids: ConnectionIds::default(),
        }
    }

    pub fn context(&self) -> &DriverContext {
        &self.context
    }

    /// Create a connection in `Disconnected`.
    pub fn attach(&self) -> ConnectionId {
        let id = self.ids.next();
        self.connections.insert(id, Arc::new(Connection::new(id)));
        tracing::debug!(connection = id, "connection attached");
        id
    }

    /// Close and remove a connection, cancelling anything it has in flight.
    pub fn detach(&self, id: ConnectionId) -> bool {
        let Some((_, conn)) = self.connections.remove(&id) else {
            return false;
        };
        conn.lock().state = ConnState::Closed;
        let writes = conn.release_writes();
        let reads = conn.release_reads();
        tracing::info!(
            connection = id,
            writes,
            reads,
            age_ms = conn.attached_at.elapsed().as_millis() as u64,
            "connection detached"
        );
        self.context.debug_log.record(format!("conn={id} detached"));
        true
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnState> {
        self.connection(id).map(|conn| conn.state())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drop read assemblies past their timeout on every connection.
    pub fn expire_stale(&self) -> usize {
        let connections: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        connections
            .iter()
            .map(|conn| conn.assembler.expire().len())
            .sum()
    }

    /// Decode and dispatch one inbound action.
    ///
    /// A known action invoked in the wrong state fails with `InvalidState`
    /// before its payload is looked at.
    pub async fn dispatch_raw(&self, id: ConnectionId, inbound: Inbound, payload: &[u8]) -> Response {
        let decoded = self
            .check_phase(id, inbound)
            .and_then(|()| Request::decode(inbound, payload));
        match decoded {
            Ok(request) => self.dispatch(id, request).await,
            Err(e) => {
                tracing::warn!(
                    connection = id,
                    ?inbound,
                    len = payload.len(),
                    head = %hex::encode(&payload[..payload.len().min(16)]),
                    error = %e,
                    "rejected request"
                );
                self.context
                    .debug_log
                    .record(format!("conn={id} {inbound:?} -> {}", e.status_code()));
                Response::from_error(&e)
            }
        }
    }

    fn check_phase(&self, id: ConnectionId, inbound: Inbound) -> Result<(), ProtocolError> {
        let (Some(action), Some(phase), Some(conn)) =
            (inbound.action_type(), inbound.phase(), self.connection(id))
        else {
            return Ok(());
        };
        match allowed_states(action, phase) {
            Some(allowed) => require_state(&conn.lock(), phase_name(phase), allowed),
            None => Ok(()),
        }
    }

    pub async fn dispatch(&self, id: ConnectionId, request: Request) -> Response {
        let name = request.name();
        let outcome = match self.connection(id) {
            None => Err(ProtocolError::UnknownConnection(id)),
            Some(conn) if request.is_release() => self.handle(&conn, request).await,
            Some(conn) => {
                let _serial = conn.serial.lock().await;
                self.handle(&conn, request).await
            }
        };

        match outcome {
            Ok(response) => {
                tracing::debug!(connection = id, action = name, result = response.result(), "action complete");
                self.context
                    .debug_log
                    .record(format!("conn={id} {name} -> success"));
                response
            }
            Err(e) => {
                tracing::warn!(connection = id, action = name, error = %e, "action failed");
                self.context
                    .debug_log
                    .record(format!("conn={id} {name} -> {}", e.status_code()));
                Response::from_error(&e)
            }
        }
    }

    async fn handle(&self, conn: &Connection, request: Request) -> Result<Response, ProtocolError> {
        let name = request.name();
        // Handlers that change state check again under the lock they mutate with.
        if let Some(allowed) = allowed_states(request.action_type(), request.phase()) {
            require_state(&conn.lock(), name, allowed)?;
        }
        match request {
            Request::Connect(kind) => {
                let mut inner = conn.lock();
                require_state(&inner, name, &[ConnState::Disconnected])?;
                inner.state = ConnState::Connected;
                inner.kind = Some(kind);
                tracing::info!(connection = conn.id, ?kind, "client connected");
                Ok(Response::ok(0))
            }

            Request::OpenUsbInterface => {
                let mut inner = conn.lock();
                require_state(&inner, name, &[ConnState::Connected])?;
                if inner.kind != Some(ClientKind::UsbClient) {
                    return Err(ProtocolError::Precondition {
                        action: name,
                        reason: "driver detection clients cannot open the interface",
                    });
                }
                inner.state = ConnState::InterfaceOpen;
                tracing::info!(connection = conn.id, "interface opened");
                Ok(Response::ok(conn.id))
            }

            Request::CloseUsbInterface => {
                {
                    let mut inner = conn.lock();
                    require_state(&inner, name, &[ConnState::InterfaceOpen])?;
                    inner.state = ConnState::Connected;
                    inner.control = None;
                    inner.interrupt = None;
                    inner.staging.clear();
                }
                let dropped = conn.assembler.clear();
                tracing::info!(connection = conn.id, dropped, "interface closed");
                Ok(Response::ok(0))
            }

            Request::CheckEpSupportiveness(endpoint) => {
                let capability = probe_endpoint(
                    self.transport.as_ref(),
                    endpoint,
                    self.context.transfer.probe_timeout(),
                )
                .await?;
                conn.lock().set_capability(capability);
                Ok(Response::with_payload(
                    u64::from(capability.is_supported()),
                    Payload::EpSupportiveness(capability.info),
                ))
            }

            Request::DriverStatus => {
                let document = status_document(conn);
                Ok(Response::with_payload(
                    document.len() as u64,
                    Payload::DriverStatus(DriverStatus::from_bytes_truncated(&document)),
                ))
            }

            Request::GetDriverVersion => {
                let version = self.context.version;
                Ok(Response::with_payload(
                    version.text_bytes().len() as u64,
                    Payload::DriverVersion(version),
                ))
            }

            Request::ReturnDriverDebugLog => {
                let excerpt = self.context.debug_log.excerpt();
                Ok(Response::with_payload(
                    excerpt.len() as u64,
                    Payload::ByteArray(ByteArray::from_bytes_truncated(&excerpt)),
                ))
            }

            Request::ReleaseCallbackGeneral(record) => release(conn, record),

            Request::ReleaseReadCallback => {
                let dropped = conn.release_reads();
                Ok(Response::ok(dropped as u64))
            }

            Request::FillWriteBuffer(chunk) => {
                let mut inner = conn.lock();
                require_state(&inner, name, &[ConnState::InterfaceOpen])?;
                let staged = inner.staging.fill(&chunk)?;
                Ok(Response::ok(staged as u64))
            }

            Request::Write(commit) => self.write(conn, commit).await,

            Request::Read => self.read(conn).await,

            Request::InterruptEpClearBufferRead => {
                {
                    let inner = conn.lock();
                    require_state(&inner, name, &[ConnState::InterfaceOpen])?;
                    require_supported(&inner, name, Endpoint::Interrupt)?;
                }
                let clear = ActionRecord {
                    action_type: ActionType::InterruptEpClearBufferRead as u8,
                };
                exchange(
                    self.transport.as_ref(),
                    Endpoint::Interrupt,
                    Bytes::copy_from_slice(clear.as_bytes()),
                    self.context.transfer.exchange_timeout(),
                )
                .await?;
                let dropped = conn.assembler.clear();
                Ok(Response::ok(dropped as u64))
            }
        }
    }

    async fn write(&self, conn: &Connection, commit: WriteCommit) -> Result<Response, ProtocolError> {
        // Registered before staging is read so a release in between is not lost.
        let cancelled = conn.write_cancel.notified();
        tokio::pin!(cancelled);

        let buffer = {
            let inner = conn.lock();
            require_state(&inner, "write", &[ConnState::InterfaceOpen])?;
            require_supported(&inner, "write", Endpoint::Control)?;
            inner.staging.assemble(&commit)?
        };
        let index = commit.index;
        let chunks = split(buffer, index)?;

        let written = tokio::select! {
            _ = &mut cancelled => return Err(ProtocolError::Cancelled),
            result = self.send_with_retries(&chunks) => result?,
        };
        conn.lock().staging.release(index);
        tracing::info!(connection = conn.id, index, bytes = written, "write complete");
        Ok(Response::ok(written as u64))
    }

    async fn send_with_retries(&self, chunks: &WriteChunks) -> Result<usize, ProtocolError> {
        let retries = self.context.transfer.write_retries;
        let mut attempt = 0;
        loop {
            match self.send_once(chunks.clone()).await {
                Ok(()) => return Ok(chunks.byte_len()),
                Err(ProtocolError::DeviceTimeout(endpoint)) if attempt < retries => {
                    attempt += 1;
                    tracing::warn!(
                        index = chunks.index(),
                        %endpoint,
                        attempt,
                        retries,
                        "write timed out, restarting transfer"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, chunks: WriteChunks) -> Result<(), ProtocolError> {
        let timeout = self.context.transfer.exchange_timeout();
        let commit = chunks.commit();
        for chunk in chunks {
            let request = Bytes::copy_from_slice(chunk.as_bytes());
            exchange(self.transport.as_ref(), Endpoint::Control, request, timeout).await?;
        }
        let request = Bytes::copy_from_slice(commit.as_bytes());
        exchange(self.transport.as_ref(), Endpoint::Control, request, timeout).await?;
        Ok(())
    }

    async fn read(&self, conn: &Connection) -> Result<Response, ProtocolError> {
        let cancelled = conn.read_cancel.notified();
        tokio::pin!(cancelled);

        let index = {
            let mut inner = conn.lock();
            require_state(&inner, "read", &[ConnState::InterfaceOpen])?;
            require_supported(&inner, "read", Endpoint::Interrupt)?;
            inner.allocate_read_index()
        };
        let read_timeout = self.context.transfer.read_timeout();
        conn.assembler.open(index, read_timeout)?;

        let outcome = tokio::select! {
            _ = &mut cancelled => Err(ProtocolError::Cancelled),
            result = tokio::time::timeout(read_timeout, self.poll_until_complete(conn, index)) => {
                result.unwrap_or(Err(AssemblyError::AssemblyTimeout(index).into()))
            }
        };

        match outcome {
            Ok(message) => {
                tracing::info!(connection = conn.id, index, bytes = message.len(), "read complete");
                Ok(Response::with_payload(
                    message.len() as u64,
                    Payload::Message(message),
                ))
            }
            Err(e) => {
                conn.assembler.discard(index);
                Err(e)
            }
        }
    }

    async fn poll_until_complete(&self, conn: &Connection, index: u8) -> Result<Bytes, ProtocolError> {
        let poll = Bytes::copy_from_slice(ReadPoll::new(index).as_bytes());
        let timeout = self.context.transfer.exchange_timeout();
        let interval = self.context.transfer.poll_interval();
        loop {
            let reply = exchange(self.transport.as_ref(), Endpoint::Interrupt, poll.clone(), timeout).await?;
            if reply.is_empty() {
                tokio::time::sleep(interval).await;
                continue;
            }
            let chunk = ReadChunk::decode(&reply)?;
            match conn.assembler.accept(&chunk) {
                Ok(Assembly::Complete(message)) => return Ok(message),
                Ok(Assembly::Incomplete { .. }) => {}
                Err(e) if e.discards_state() => return Err(e.into()),
                // Rejected chunks leave this read's blocks intact.
                Err(e @ AssemblyError::UnknownTransfer(stray)) if stray != index => {
                    self.reject_chunk(conn, index, &chunk, &e);
                }
                Err(e @ AssemblyError::DuplicateMismatch { .. }) => {
                    self.reject_chunk(conn, index, &chunk, &e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn reject_chunk(&self, conn: &Connection, index: u8, chunk: &ReadChunk, error: &AssemblyError) {
        let (chunk_index, block_index) = (chunk.index, chunk.block_index);
        tracing::warn!(
            connection = conn.id,
            index,
            chunk_index,
            block_index,
            error = %error,
            "read chunk dropped"
        );
        self.context.debug_log.record(format!(
            "conn={} read {index} dropped chunk {chunk_index}/{block_index}: {}",
            conn.id,
            error.status_code()
        ));
    }
}

/// States an action's phase admits. `None` for releases, which run anywhere.
///
/// The interface phase admits both open and close; each handler narrows it.
fn allowed_states(action: ActionType, phase: Phase) -> Option<&'static [ConnState]> {
    if action.is_release() {
        return None;
    }
    Some(match phase {
        Phase::Setup => &[ConnState::Disconnected],
        Phase::Interface => &[ConnState::Connected, ConnState::InterfaceOpen],
        Phase::Capability | Phase::WritePath | Phase::ReadPath => &[ConnState::InterfaceOpen],
        Phase::General | Phase::Diagnostics => &[ConnState::Connected, ConnState::InterfaceOpen],
    })
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Setup => "setup",
        Phase::Interface => "interface",
        Phase::Capability => "capability",
        Phase::General => "general",
        Phase::WritePath => "write path",
        Phase::ReadPath => "read path",
        Phase::Diagnostics => "diagnostics",
    }
}

fn require_state(
    inner: &ConnectionInner,
    action: &'static str,
    allowed: &[ConnState],
) -> Result<(), ProtocolError> {
    if allowed.contains(&inner.state) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidState {
            action,
            state: inner.state,
        })
    }
}

/// The data path on `endpoint` needs a probe that found chunk support.
fn require_supported(
    inner: &ConnectionInner,
    action: &'static str,
    endpoint: Endpoint,
) -> Result<(), ProtocolError> {
    match inner.capability(endpoint) {
        None => Err(ProtocolError::Precondition {
            action,
            reason: "endpoint has not been probed",
        }),
        Some(capability) if !capability.is_supported() => Err(ProtocolError::UnsupportedOperation(
            format!("{action} on {endpoint} endpoint without chunk support"),
        )),
        Some(_) => Ok(()),
    }
}

fn release(conn: &Connection, record: ActionRecord) -> Result<Response, ProtocolError> {
    let raw = record.action_type;
    let dropped = match ActionType::try_from(raw) {
        Ok(ActionType::FillWriteBuffer | ActionType::Write) => conn.release_writes(),
        Ok(
            ActionType::Read
            | ActionType::ReleaseReadCallbackAction
            | ActionType::InterruptEpClearBufferRead,
        ) => conn.release_reads(),
        Ok(ActionType::General) => conn.release_writes() + conn.release_reads(),
        _ => {
            return Err(ProtocolError::UnsupportedOperation(format!(
                "release of action type {raw}"
            )))
        }
    };
    tracing::debug!(connection = conn.id, action_type = raw, dropped, "pending state released");
    Ok(Response::ok(dropped as u64))
}

#[derive(Serialize)]
struct StatusDocument {
    state: ConnState,
    client: Option<ClientKind>,
    ctrl: &'static str,
    intr: &'static str,
    staged: usize,
    reading: usize,
}

fn support_label(inner: &ConnectionInner, endpoint: Endpoint) -> &'static str {
    match inner.capability(endpoint) {
        None => "unprobed",
        Some(c) if c.is_supported() => "supported",
        Some(_) => "unsupported",
    }
}

/// Compact JSON description of a connection. Always under 127 bytes.
fn status_document(conn: &Connection) -> Vec<u8> {
    let document = {
        let inner = conn.lock();
        StatusDocument {
            state: inner.state,
            client: inner.kind,
            ctrl: support_label(&inner, Endpoint::Control),
            intr: support_label(&inner, Endpoint::Interrupt),
            staged: inner.staging.pending(),
            reading: conn.pending_reads(),
        }
    };
    serde_json::to_vec(&document).unwrap_or_default()
}
