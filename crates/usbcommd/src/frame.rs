//! Socket framing.
//!
//!   request:  [kind u8][code u32 LE][len u8][payload; len]
//!   response: [Status; 16][count u8] then count × [len u8][structure; len]
//!
//! `kind` is 0 for a selector and 1 for a raw action type. An assembled read
//! goes back as the `ReadChunk`s of transfer 0, so no structure on the socket
//! is larger than the boundary ceiling.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use zerocopy::{AsBytes, FromBytes};

use usbcomm_core::wire::{ReadChunk, Status, WireError, DATA_STRUCT_SIZE_MAX};
use usbcomm_services::{split_read, Assembler, Assembly, AssemblyError, Inbound, Payload, Response};

pub const KIND_SELECTOR: u8 = 0;
pub const KIND_ACTION: u8 = 1;

const STATUS_LEN: usize = std::mem::size_of::<Status>();

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown request kind {0}")]
    UnknownKind(u8),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("socket: {0}")]
    Io(#[from] std::io::Error),
}

pub fn encode_request(inbound: Inbound, payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u8::try_from(payload.len()).map_err(|_| WireError::LengthExceedsCapacity {
        length: payload.len(),
        capacity: u8::MAX as usize,
    })?;
    let (kind, code) = match inbound {
        Inbound::Selector(code) => (KIND_SELECTOR, code),
        Inbound::Action(code) => (KIND_ACTION, u32::from(code)),
    };
    let mut buf = BytesMut::with_capacity(6 + payload.len());
    buf.put_u8(kind);
    buf.put_u32_le(code);
    buf.put_u8(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Read one request. `None` on a clean end of stream.
pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<(Inbound, Vec<u8>)>, FrameError> {
    let mut kind = [0u8; 1];
    if reader.read(&mut kind).await? == 0 {
        return Ok(None);
    }
    let code = reader.read_u32_le().await?;
    let len = reader.read_u8().await?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    let inbound = match kind[0] {
        KIND_SELECTOR => Inbound::Selector(code),
        // Action types are one byte wide; anything larger can never match.
        KIND_ACTION => Inbound::Action(u8::try_from(code).unwrap_or(u8::MAX)),
        other => return Err(FrameError::UnknownKind(other)),
    };
    Ok(Some((inbound, payload)))
}

pub fn encode_response(response: &Response) -> Result<Bytes, FrameError> {
    let structures: Vec<Bytes> = match &response.payload {
        None => Vec::new(),
        Some(Payload::DriverStatus(s)) => vec![Bytes::copy_from_slice(s.as_bytes())],
        Some(Payload::DriverVersion(v)) => vec![Bytes::copy_from_slice(v.as_bytes())],
        Some(Payload::ByteArray(a)) => vec![Bytes::copy_from_slice(a.as_bytes())],
        Some(Payload::EpSupportiveness(e)) => vec![Bytes::copy_from_slice(e.as_bytes())],
        Some(Payload::Message(message)) => split_read(message, 0)?
            .iter()
            .map(|chunk| Bytes::copy_from_slice(chunk.as_bytes()))
            .collect(),
    };

    let mut buf = BytesMut::with_capacity(
        STATUS_LEN + 1 + structures.iter().map(|s| s.len() + 1).sum::<usize>(),
    );
    buf.put_slice(response.status.as_bytes());
    // split_read caps a message at 255 chunks.
    buf.put_u8(structures.len() as u8);
    for structure in &structures {
        debug_assert!(structure.len() <= DATA_STRUCT_SIZE_MAX);
        buf.put_u8(structure.len() as u8);
        buf.put_slice(structure);
    }
    Ok(buf.freeze())
}

/// Read one response: the status and the raw structures that followed it.
pub async fn read_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(Status, Vec<Bytes>), FrameError> {
    let mut status = [0u8; STATUS_LEN];
    reader.read_exact(&mut status).await?;
    let status = Status::read_from(&status[..]).ok_or(WireError::SizeMismatch {
        expected: STATUS_LEN,
        actual: status.len(),
    })?;

    let count = reader.read_u8().await?;
    let mut structures = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.read_u8().await?;
        let mut structure = vec![0u8; len as usize];
        reader.read_exact(&mut structure).await?;
        structures.push(Bytes::from(structure));
    }
    Ok((status, structures))
}

/// Rebuild a read message from the `ReadChunk` structures of a response.
pub fn reassemble(structures: &[Bytes]) -> Result<Bytes, FrameError> {
    let assembler = Assembler::new();
    assembler.open(0, std::time::Duration::from_secs(60))?;
    for structure in structures {
        let chunk = ReadChunk::decode(structure)?;
        if let Assembly::Complete(message) = assembler.accept(&chunk)? {
            return Ok(message);
        }
    }
    let (received, total) = assembler.progress(0).unwrap_or((0, 0));
    Err(AssemblyError::IncompleteRead {
        index: 0,
        total,
        received,
    }
    .into())
}
