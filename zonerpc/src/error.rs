//! Crate-wide error taxonomy.
//!
//! One `thiserror`-derived enum rather than a per-module error type: almost
//! every operation in this crate (stub dispatch, service routing, transport
//! send, pass-through forwarding) can fail with the same handful of kinds,
//! and callers across zone boundaries need to serialize the *kind*, not a
//! formatted message.

use thiserror::Error;

use crate::ids::{DestinationZone, Object};

/// The crate's standard result alias.
pub type Result<T> = std::result::Result<T, ErrorCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    /// Frame's `protocol_version` is outside the supported range.
    #[error("invalid protocol version")]
    InvalidVersion,

    /// Malformed frame, or a stub lookup found a tombstone.
    #[error("invalid data")]
    InvalidData,

    /// The stub's concrete object does not implement the requested
    /// interface.
    #[error("invalid cast")]
    InvalidCast,

    /// Unknown method ordinal for the interface.
    #[error("invalid method id")]
    InvalidMethodId,

    /// Object id not found in the destination service's stub table.
    #[error("object {0} not found in zone {1:?}")]
    ObjectNotFound(Object, Option<DestinationZone>),

    /// The stub's aggregate shared count already reached zero (zombie
    /// state); shared operations fail.
    #[error("object is gone (zombie)")]
    ObjectGone,

    /// No route from this hop toward the named destination.
    #[error("zone not found")]
    ZoneNotFound,

    /// Wire disconnected, or send failed permanently.
    #[error("transport error")]
    TransportError,

    /// The service proxy's transport was freed while its registration was
    /// still cached.
    #[error("service proxy lost its connection")]
    ServiceProxyLostConnection,

    /// A pending reply was cancelled because the transport went down.
    #[error("call cancelled")]
    CallCancelled,

    /// Wire operation exceeded its timeout budget.
    #[error("timeout")]
    TimeoutError,

    /// A marshaller method was invoked in a role it does not support.
    #[error("incompatible service")]
    IncompatibleService,
}

impl ErrorCode {
    /// Whether this error indicates the peer/route is permanently gone,
    /// as opposed to a well-formed rejection of this particular call.
    /// `Service::transport_down` fan-out is only triggered by these.
    pub const fn is_connectivity_failure(self) -> bool {
        matches!(self, Self::TransportError | Self::CallCancelled)
    }
}
