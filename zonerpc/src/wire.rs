//! The wire envelope shared by every concrete transport.
//!
//! This module only defines the *shape* of a frame — the concrete
//! transports (TCP, SPSC, in-process, enclave) that actually serialize and
//! push these bytes over a channel are out of scope for this crate (§1 of
//! the spec); callers outside this crate own codec + framing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Lowest protocol version this runtime will negotiate.
pub const LOWEST_SUPPORTED_VERSION: u64 = 1;
/// Highest protocol version this runtime will negotiate.
pub const HIGHEST_SUPPORTED_VERSION: u64 = 1;

/// Whether a protocol version falls within the range this build supports.
pub fn is_supported_version(version: u64) -> bool {
    (LOWEST_SUPPORTED_VERSION..=HIGHEST_SUPPORTED_VERSION).contains(&version)
}

/// Direction tag carried in every frame prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Receive,
    OneWay,
}

/// Identifies the message carried in a frame's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFingerprint {
    InitClientChannelSend,
    InitClientChannelResponse,
    CallSend,
    CallReceive,
    PostSend,
    TryCastSend,
    TryCastReceive,
    AddRefSend,
    AddRefReceive,
    ReleaseSend,
    ReleaseReceive,
    ObjectReleasedSend,
    TransportDownSend,
    CloseConnectionSend,
    CloseConnectionReceived,
}

/// Fixed-size frame prefix, present on every frame regardless of payload
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePrefix {
    pub protocol_version: u64,
    pub direction: Direction,
    pub sequence_number: u64,
    pub payload_size: u64,
}

/// A full frame: the fixed prefix plus a fingerprinted, opaque payload.
///
/// The payload bytes are whatever the configured serialization codec
/// produced for the message named by `fingerprint` — this crate never
/// interprets them beyond routing on identifiers carried alongside, since
/// the codec itself is out of scope.
#[derive(Debug, Clone)]
pub struct Frame {
    pub prefix: FramePrefix,
    pub fingerprint: PayloadFingerprint,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(
        protocol_version: u64,
        direction: Direction,
        sequence_number: u64,
        fingerprint: PayloadFingerprint,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        Self {
            prefix: FramePrefix {
                protocol_version,
                direction,
                sequence_number,
                payload_size: payload.len() as u64,
            },
            fingerprint,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_range_is_inclusive() {
        assert!(is_supported_version(LOWEST_SUPPORTED_VERSION));
        assert!(is_supported_version(HIGHEST_SUPPORTED_VERSION));
        assert!(!is_supported_version(HIGHEST_SUPPORTED_VERSION + 1));
    }

    #[test]
    fn frame_prefix_tracks_payload_size() {
        let frame = Frame::new(
            1,
            Direction::Send,
            7,
            PayloadFingerprint::CallSend,
            vec![1, 2, 3],
        );
        assert_eq!(frame.prefix.payload_size, 3);
        assert_eq!(frame.prefix.sequence_number, 7);
    }
}
