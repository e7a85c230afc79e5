//! Chunk assembly: rebuilding inbound transfers from read chunks.
//!
//! Each in-flight transfer is keyed by its `index`. The table is a DashMap so
//! access to one index is serialized by its shard lock while distinct indices
//! proceed independently. Chunks may arrive in any order; the buffer is
//! rebuilt in `block_index` order.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use usbcomm_core::wire::ReadChunk;

use crate::error::AssemblyError;

/// Result of feeding one chunk to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    /// Every block arrived. The transfer is closed.
    Complete(Bytes),
    Incomplete { received: usize, total: u8 },
}

struct PartialTransfer {
    /// Fixed by the first chunk seen.
    total: Option<u8>,
    blocks: BTreeMap<u8, Bytes>,
    opened_at: Instant,
    timeout: Duration,
}

impl PartialTransfer {
    fn new(timeout: Duration) -> Self {
        Self {
            total: None,
            blocks: BTreeMap::new(),
            opened_at: Instant::now(),
            timeout,
        }
    }

    fn is_expired(&self) -> bool {
        self.opened_at.elapsed() > self.timeout
    }

    fn accept(&mut self, chunk: &ReadChunk) -> Result<Assembly, AssemblyError> {
        let index = chunk.index;
        if self.is_expired() {
            return Err(AssemblyError::AssemblyTimeout(index));
        }

        let total = match self.total {
            None => {
                self.total = Some(chunk.total_blocks);
                chunk.total_blocks
            }
            Some(expected) if expected != chunk.total_blocks => {
                return Err(AssemblyError::InconsistentTotal {
                    index,
                    expected,
                    actual: chunk.total_blocks,
                });
            }
            Some(expected) => expected,
        };

        let payload = chunk.payload()?;
        let block_index = chunk.block_index;
        if let Some(existing) = self.blocks.get(&block_index) {
            if existing.as_ref() != payload {
                return Err(AssemblyError::DuplicateMismatch { index, block_index });
            }
            tracing::trace!(index, block_index, "identical duplicate chunk ignored");
        } else {
            self.blocks
                .insert(block_index, Bytes::copy_from_slice(payload));
        }

        if self.blocks.len() == total as usize {
            let size = self.blocks.values().map(Bytes::len).sum();
            let mut buffer = BytesMut::with_capacity(size);
            for block in self.blocks.values() {
                buffer.extend_from_slice(block);
            }
            Ok(Assembly::Complete(buffer.freeze()))
        } else {
            Ok(Assembly::Incomplete {
                received: self.blocks.len(),
                total,
            })
        }
    }
}

/// Per-index reassembly table for the read path.
#[derive(Default)]
pub struct Assembler {
    transfers: DashMap<u8, PartialTransfer>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start expecting transfer `index`, giving up on it after `timeout`.
    ///
    /// Only one assembly per index may be in progress. An expired leftover
    /// for the same index is replaced.
    pub fn open(&self, index: u8, timeout: Duration) -> Result<(), AssemblyError> {
        match self.transfers.entry(index) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired() {
                    return Err(AssemblyError::AlreadyInProgress(index));
                }
                tracing::warn!(index, "replacing expired read assembly");
                occupied.insert(PartialTransfer::new(timeout));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PartialTransfer::new(timeout));
            }
        }
        tracing::debug!(index, timeout_ms = timeout.as_millis() as u64, "read assembly opened");
        Ok(())
    }

    /// Feed one chunk.
    ///
    /// On completion, timeout or an inconsistent total the transfer's state is
    /// dropped; a conflicting duplicate is rejected and the original kept.
    pub fn accept(&self, chunk: &ReadChunk) -> Result<Assembly, AssemblyError> {
        chunk.validate()?;
        let index = chunk.index;

        let mut occupied = match self.transfers.entry(index) {
            Entry::Occupied(occupied) => occupied,
            Entry::Vacant(_) => return Err(AssemblyError::UnknownTransfer(index)),
        };

        let outcome = occupied.get_mut().accept(chunk);
        match &outcome {
            Ok(Assembly::Complete(buffer)) => {
                occupied.remove();
                tracing::debug!(index, bytes = buffer.len(), "read assembly complete");
            }
            Ok(Assembly::Incomplete { received, total }) => {
                tracing::trace!(
                    index,
                    block_index = chunk.block_index,
                    received,
                    total,
                    "read chunk accepted"
                );
            }
            Err(e) if e.discards_state() => {
                occupied.remove();
                tracing::warn!(index, error = %e, "read assembly discarded");
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "read chunk rejected");
            }
        }
        outcome
    }

    /// Drop every transfer past its timeout. Returns the expired indices.
    pub fn expire(&self) -> Vec<u8> {
        let mut expired = Vec::new();
        self.transfers.retain(|index, transfer| {
            if transfer.is_expired() {
                expired.push(*index);
                false
            } else {
                true
            }
        });
        for index in &expired {
            tracing::warn!(index, "read assembly timed out");
        }
        expired.sort_unstable();
        expired
    }

    /// Release the partial state of one transfer.
    pub fn discard(&self, index: u8) -> bool {
        self.transfers.remove(&index).is_some()
    }

    /// Release every in-flight transfer. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let count = self.transfers.len();
        self.transfers.clear();
        count
    }

    /// Indices currently being assembled, ascending.
    pub fn in_progress(&self) -> Vec<u8> {
        let mut indices: Vec<u8> = self.transfers.iter().map(|e| *e.key()).collect();
        indices.sort_unstable();
        indices
    }

    /// `(received, total)` for an open transfer. Total is 0 until the first
    /// chunk arrives.
    pub fn progress(&self, index: u8) -> Option<(usize, u8)> {
        self.transfers
            .get(&index)
            .map(|t| (t.blocks.len(), t.total.unwrap_or(0)))
    }
}
