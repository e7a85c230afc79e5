//! Chunk disassembly: splitting a buffer into bounded, ordered fragments.

use bytes::Bytes;
use zerocopy::FromZeroes;

use usbcomm_core::wire::{
    ReadChunk, WireError, WriteChunk, WriteCommit, DATA_STRUCT_SIZE_READ, DATA_STRUCT_SIZE_WRITE,
    MAX_READ_TRANSFER_BYTES, MAX_WRITE_TRANSFER_BYTES,
};

/// Number of blocks needed for `len` bytes. An empty buffer still takes one
/// zero-length block so the receiver sees the transfer finish.
fn block_count(len: usize, block_size: usize) -> usize {
    len.div_ceil(block_size).max(1)
}

/// Lazy sequence of write fragments for one transfer.
///
/// Cloning restarts the sequence from the beginning, and re-splitting the
/// same buffer yields identical chunks, which is what retries rely on.
#[derive(Debug, Clone)]
pub struct WriteChunks {
    buffer: Bytes,
    index: u8,
    next_block: usize,
    total: usize,
}

/// Split `buffer` into write chunks tagged with `index`.
pub fn split(buffer: impl Into<Bytes>, index: u8) -> Result<WriteChunks, WireError> {
    let buffer = buffer.into();
    if buffer.len() > MAX_WRITE_TRANSFER_BYTES {
        return Err(WireError::PayloadTooLarge(buffer.len()));
    }
    let total = block_count(buffer.len(), DATA_STRUCT_SIZE_WRITE);
    Ok(WriteChunks {
        buffer,
        index,
        next_block: 0,
        total,
    })
}

impl WriteChunks {
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn total_blocks(&self) -> u8 {
        // split() bounds the buffer so this never truncates.
        self.total as u8
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// End-of-transfer marker sent after the last chunk.
    pub fn commit(&self) -> WriteCommit {
        WriteCommit {
            index: self.index,
            total_blocks: self.total_blocks(),
        }
    }
}

impl Iterator for WriteChunks {
    type Item = WriteChunk;

    fn next(&mut self) -> Option<WriteChunk> {
        if self.next_block >= self.total {
            return None;
        }
        let start = self.next_block * DATA_STRUCT_SIZE_WRITE;
        let end = (start + DATA_STRUCT_SIZE_WRITE).min(self.buffer.len());
        let fragment = &self.buffer[start..end];

        let mut chunk = WriteChunk::new_zeroed();
        chunk.index = self.index;
        chunk.length = fragment.len() as u8;
        chunk.block_index = self.next_block as u8;
        chunk.byte_array[..fragment.len()].copy_from_slice(fragment);

        self.next_block += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next_block;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WriteChunks {}

/// Split `buffer` into read chunks carrying the transfer's total block count.
///
/// Used by the device side of the read path and when framing an assembled
/// reply back across the boundary.
pub fn split_read(buffer: &[u8], index: u8) -> Result<Vec<ReadChunk>, WireError> {
    if buffer.len() > MAX_READ_TRANSFER_BYTES {
        return Err(WireError::PayloadTooLarge(buffer.len()));
    }
    let total = block_count(buffer.len(), DATA_STRUCT_SIZE_READ);
    let mut chunks = Vec::with_capacity(total);
    for block in 0..total {
        let start = block * DATA_STRUCT_SIZE_READ;
        let end = (start + DATA_STRUCT_SIZE_READ).min(buffer.len());
        chunks.push(ReadChunk::new(
            index,
            block as u8,
            total as u8,
            &buffer[start..end],
        )?);
    }
    Ok(chunks)
}
