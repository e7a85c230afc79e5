//! In-memory device behind the [`Transport`] trait.
//!
//! Answers capability probes, collects write chunks on the control endpoint
//! until a commit arrives, and echoes every committed message back through
//! read polls on the interrupt endpoint. Fault knobs let tests make an
//! endpoint vanish, go silent, or answer probes with arbitrary bytes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use zerocopy::AsBytes;

use usbcomm_core::selector::ActionType;
use usbcomm_core::wire::{
    decode_exact, ActionRecord, Endpoint, ReadChunk, ReadPoll, WriteChunk, WriteCommit,
};

use crate::capability::{known_good, parse_probe_request};
use crate::disassemble::split_read;
use crate::staging::WriteStaging;
use crate::transport::{Transport, TransportError};

#[derive(Default)]
struct DeviceState {
    probe_replies: HashMap<Endpoint, Bytes>,
    missing: HashSet<Endpoint>,
    unresponsive: HashSet<Endpoint>,
    reverse: bool,
    staging: WriteStaging,
    written: Vec<Bytes>,
    outbox: VecDeque<Bytes>,
    /// Chunks still owed for the read index currently being served.
    serving: Option<(u8, VecDeque<ReadChunk>)>,
    clears: usize,
}

#[derive(Default)]
pub struct LoopbackDevice {
    state: Mutex<DeviceState>,
    hang_control: AtomicUsize,
}

impl LoopbackDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer probes on `endpoint` with `reply` instead of the known-good pair.
    pub fn with_probe_reply(self, endpoint: Endpoint, reply: impl Into<Bytes>) -> Self {
        self.lock().probe_replies.insert(endpoint, reply.into());
        self
    }

    pub fn without_endpoint(self, endpoint: Endpoint) -> Self {
        self.lock().missing.insert(endpoint);
        self
    }

    /// Never answer anything on `endpoint`.
    pub fn unresponsive(self, endpoint: Endpoint) -> Self {
        self.lock().unresponsive.insert(endpoint);
        self
    }

    /// Deliver read chunks last block first.
    pub fn reverse_delivery(self) -> Self {
        self.lock().reverse = true;
        self
    }

    /// Swallow the next `n` control exchanges without answering.
    pub fn hang_next(&self, n: usize) {
        self.hang_control.store(n, Ordering::SeqCst);
    }

    /// Queue a device-originated message for the read path.
    pub fn queue_message(&self, message: impl Into<Bytes>) {
        self.lock().outbox.push_back(message.into());
    }

    /// Messages committed on the control endpoint, in order.
    pub fn written(&self) -> Vec<Bytes> {
        self.lock().written.clone()
    }

    /// Messages waiting to be read.
    pub fn queued(&self) -> usize {
        self.lock().outbox.len()
    }

    /// How many clear-buffer records arrived.
    pub fn clears(&self) -> usize {
        self.lock().clears
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn should_hang(&self, endpoint: Endpoint) -> bool {
        if self.lock().unresponsive.contains(&endpoint) {
            return true;
        }
        endpoint == Endpoint::Control
            && self
                .hang_control
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
    }

    fn answer(&self, endpoint: Endpoint, request: &[u8]) -> Result<Bytes, TransportError> {
        let mut state = self.lock();
        if state.missing.contains(&endpoint) {
            return Err(TransportError::EndpointNotFound(endpoint));
        }
        if parse_probe_request(request).is_some() {
            let reply = state
                .probe_replies
                .get(&endpoint)
                .cloned()
                .unwrap_or_else(|| Bytes::copy_from_slice(known_good(endpoint).as_bytes()));
            return Ok(reply);
        }
        match endpoint {
            Endpoint::Control => state.control(request),
            Endpoint::Interrupt => state.interrupt(request),
        }
    }
}

impl DeviceState {
    fn control(&mut self, request: &[u8]) -> Result<Bytes, TransportError> {
        if request.len() == std::mem::size_of::<WriteChunk>() {
            let chunk = WriteChunk::decode(request).map_err(|e| TransportError::Io(e.to_string()))?;
            self.staging
                .fill(&chunk)
                .map_err(|e| TransportError::Io(e.to_string()))?;
            return Ok(Bytes::new());
        }
        if request.len() == std::mem::size_of::<WriteCommit>() {
            let commit: WriteCommit =
                decode_exact(request).map_err(|e| TransportError::Io(e.to_string()))?;
            let message = self
                .staging
                .assemble(&commit)
                .map_err(|e| TransportError::Io(e.to_string()))?;
            self.staging.release(commit.index);
            tracing::debug!(index = commit.index, bytes = message.len(), "loopback: message committed");
            self.written.push(message.clone());
            self.outbox.push_back(message);
            return Ok(Bytes::new());
        }
        Err(TransportError::Stalled(Endpoint::Control))
    }

    fn interrupt(&mut self, request: &[u8]) -> Result<Bytes, TransportError> {
        if request.len() == std::mem::size_of::<ActionRecord>() {
            if request[0] != ActionType::InterruptEpClearBufferRead as u8 {
                return Err(TransportError::Stalled(Endpoint::Interrupt));
            }
            self.outbox.clear();
            self.serving = None;
            self.clears += 1;
            return Ok(Bytes::new());
        }

        let poll = ReadPoll::decode(request).map_err(|_| TransportError::Stalled(Endpoint::Interrupt))?;
        let index = poll.index;
        if !matches!(&self.serving, Some((serving, _)) if *serving == index) {
            let Some(message) = self.outbox.pop_front() else {
                self.serving = None;
                return Ok(Bytes::new());
            };
            let mut chunks: VecDeque<ReadChunk> = split_read(&message, index)
                .map_err(|e| TransportError::Io(e.to_string()))?
                .into();
            if self.reverse {
                chunks.make_contiguous().reverse();
            }
            self.serving = Some((index, chunks));
        }

        let Some((_, chunks)) = self.serving.as_mut() else {
            return Ok(Bytes::new());
        };
        let reply = chunks
            .pop_front()
            .map(|chunk| Bytes::copy_from_slice(chunk.as_bytes()))
            .unwrap_or_default();
        if chunks.is_empty() {
            self.serving = None;
        }
        Ok(reply)
    }
}

impl Transport for LoopbackDevice {
    async fn send_receive(&self, endpoint: Endpoint, request: Bytes) -> Result<Bytes, TransportError> {
        if self.should_hang(endpoint) {
            tracing::trace!(%endpoint, "loopback: exchange swallowed");
            return std::future::pending().await;
        }
        self.answer(endpoint, &request)
    }
}
