//! Capability negotiation: may the chunk protocol run on this endpoint?
//!
//! A bounded diagnostic request goes to the endpoint and the two info bytes
//! of the reply are checked against a fixed table. Anything outside the
//! table is "unsupported", never an error; only a missing endpoint, a silent
//! device or a transport failure fail the probe itself.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use usbcomm_core::wire::{Endpoint, EpSupportiveness, PACKET_SIZE_CHECK_EP_SUPPORTIVENESS};

use crate::error::ProtocolError;
use crate::transport::{exchange, Transport};

/// First byte of every probe request.
pub const PROBE_MAGIC: u8 = 0xCE;

/// Chunk protocol revision this driver speaks.
pub const CHUNK_PROTOCOL_REVISION: u8 = 0x01;

/// USB transfer type codes as reported in `info_1`.
pub const TRANSFER_TYPE_CONTROL: u8 = 0x00;
pub const TRANSFER_TYPE_INTERRUPT: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supportiveness {
    Supported,
    Unsupported,
}

/// Outcome of one probe. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub endpoint: Endpoint,
    pub info: EpSupportiveness,
    pub support: Supportiveness,
}

impl Capability {
    pub fn is_supported(&self) -> bool {
        self.support == Supportiveness::Supported
    }
}

/// The only info pair accepted for `endpoint`.
pub fn known_good(endpoint: Endpoint) -> EpSupportiveness {
    let info_1 = match endpoint {
        Endpoint::Control => TRANSFER_TYPE_CONTROL,
        Endpoint::Interrupt => TRANSFER_TYPE_INTERRUPT,
    };
    EpSupportiveness {
        info_1,
        info_2: CHUNK_PROTOCOL_REVISION,
    }
}

/// Diagnostic request for `endpoint`, padded to the probe packet size.
pub fn probe_request(endpoint: Endpoint) -> Bytes {
    let mut buf = BytesMut::zeroed(PACKET_SIZE_CHECK_EP_SUPPORTIVENESS);
    buf[0] = PROBE_MAGIC;
    buf[1] = endpoint.address();
    buf.freeze()
}

/// Whether `bytes` is a probe request, and for which endpoint address.
pub fn parse_probe_request(bytes: &[u8]) -> Option<u8> {
    if bytes.len() == PACKET_SIZE_CHECK_EP_SUPPORTIVENESS && bytes[0] == PROBE_MAGIC {
        Some(bytes[1])
    } else {
        None
    }
}

/// Interpret a probe reply. Total over all inputs.
pub fn interpret(endpoint: Endpoint, reply: &[u8]) -> Capability {
    let info = EpSupportiveness {
        info_1: reply.first().copied().unwrap_or(0xFF),
        info_2: reply.get(1).copied().unwrap_or(0xFF),
    };
    let well_formed = (2..=PACKET_SIZE_CHECK_EP_SUPPORTIVENESS).contains(&reply.len());
    let support = if well_formed && info == known_good(endpoint) {
        Supportiveness::Supported
    } else {
        Supportiveness::Unsupported
    };
    Capability {
        endpoint,
        info,
        support,
    }
}

/// Probe `endpoint` through `transport`, bounded by `timeout`.
pub async fn probe_endpoint<T: Transport>(
    transport: &T,
    endpoint: Endpoint,
    timeout: Duration,
) -> Result<Capability, ProtocolError> {
    let reply = exchange(transport, endpoint, probe_request(endpoint), timeout).await?;
    let capability = interpret(endpoint, &reply);
    tracing::info!(
        %endpoint,
        info_1 = capability.info.info_1,
        info_2 = capability.info.info_2,
        supported = capability.is_supported(),
        "endpoint probed"
    );
    Ok(capability)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_good_pairs_are_supported() {
        assert!(interpret(Endpoint::Control, &[0x00, 0x01]).is_supported());
        assert!(interpret(Endpoint::Interrupt, &[0x03, 0x01]).is_supported());
        // Trailing diagnostic bytes within the bound are fine.
        let mut long = vec![0u8; PACKET_SIZE_CHECK_EP_SUPPORTIVENESS];
        long[0] = 0x03;
        long[1] = 0x01;
        assert!(interpret(Endpoint::Interrupt, &long).is_supported());
    }

    #[test]
    fn every_other_pair_is_unsupported() {
        for info_1 in 0..=u8::MAX {
            for info_2 in 0..=u8::MAX {
                let cap = interpret(Endpoint::Control, &[info_1, info_2]);
                let expected = info_1 == 0x00 && info_2 == 0x01;
                assert_eq!(cap.is_supported(), expected, "{info_1:#04x} {info_2:#04x}");
                assert_eq!(cap.info.info_1, info_1);
            }
        }
    }

    #[test]
    fn wrong_endpoint_type_is_unsupported() {
        assert!(!interpret(Endpoint::Control, &[0x03, 0x01]).is_supported());
        assert!(!interpret(Endpoint::Interrupt, &[0x00, 0x01]).is_supported());
    }

    #[test]
    fn malformed_replies_are_unsupported() {
        assert!(!interpret(Endpoint::Control, &[]).is_supported());
        assert!(!interpret(Endpoint::Control, &[0x00]).is_supported());
        let mut oversized = vec![0u8; PACKET_SIZE_CHECK_EP_SUPPORTIVENESS + 1];
        oversized[1] = 0x01;
        assert!(!interpret(Endpoint::Control, &oversized).is_supported());
    }

    #[test]
    fn probe_request_is_bounded_and_parsable() {
        let req = probe_request(Endpoint::Interrupt);
        assert_eq!(req.len(), PACKET_SIZE_CHECK_EP_SUPPORTIVENESS);
        assert_eq!(parse_probe_request(&req), Some(0x81));
        assert_eq!(parse_probe_request(&req[..10]), None);
    }
}
