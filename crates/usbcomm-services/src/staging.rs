//! Write staging: the receiving end of `FillWriteBuffer`.
//!
//! Chunks are collected per transfer index until a `WriteCommit` names the
//! block count. Only then is the transfer known to be complete, even when
//! its last fragment is exactly full.

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};

use usbcomm_core::wire::{WriteChunk, WriteCommit};

use crate::error::AssemblyError;

#[derive(Debug, Default)]
pub struct WriteStaging {
    transfers: HashMap<u8, BTreeMap<u8, Bytes>>,
}

impl WriteStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one chunk. Returns the number of bytes now staged for its index.
    ///
    /// Re-sending an identical chunk is harmless; a different payload for a
    /// staged block is rejected and the original kept.
    pub fn fill(&mut self, chunk: &WriteChunk) -> Result<usize, AssemblyError> {
        let payload = chunk.payload()?;
        let index = chunk.index;
        let block_index = chunk.block_index;

        let blocks = self.transfers.entry(index).or_default();
        match blocks.get(&block_index) {
            Some(existing) if existing.as_ref() != payload => {
                return Err(AssemblyError::DuplicateMismatch { index, block_index });
            }
            Some(_) => {}
            None => {
                blocks.insert(block_index, Bytes::copy_from_slice(payload));
            }
        }
        Ok(blocks.values().map(Bytes::len).sum())
    }

    /// Concatenate a staged transfer named by `commit`.
    ///
    /// The staged blocks must be exactly `0..total_blocks`. The transfer stays
    /// staged until [`WriteStaging::release`], so a failed device write can be
    /// retried without refilling.
    pub fn assemble(&self, commit: &WriteCommit) -> Result<Bytes, AssemblyError> {
        let index = commit.index;
        let total = commit.total_blocks;
        let blocks = self
            .transfers
            .get(&index)
            .filter(|blocks| !blocks.is_empty())
            .ok_or(AssemblyError::UnknownTransfer(index))?;

        // Keys are sorted and unique: len == total and max == total - 1 means 0..total.
        let contiguous = total > 0
            && blocks.len() == total as usize
            && blocks.keys().next_back() == Some(&(total - 1));
        if !contiguous {
            return Err(AssemblyError::IncompleteCommit {
                index,
                total,
                received: blocks.len(),
            });
        }

        let mut buffer = BytesMut::with_capacity(blocks.values().map(Bytes::len).sum());
        for block in blocks.values() {
            buffer.extend_from_slice(block);
        }
        Ok(buffer.freeze())
    }

    /// Drop a staged transfer.
    pub fn release(&mut self, index: u8) -> bool {
        self.transfers.remove(&index).is_some()
    }

    /// Drop everything. Returns how many transfers were staged.
    pub fn clear(&mut self) -> usize {
        let count = self.transfers.len();
        self.transfers.clear();
        count
    }

    pub fn pending(&self) -> usize {
        self.transfers.len()
    }
}
