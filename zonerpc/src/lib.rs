//! Capability-oriented, multi-zone RPC runtime core.
//!
//! This crate provides the zone graph, the distributed reference-counting
//! protocol, and the pass-through router that a generated IDL layer and a
//! concrete wire transport sit on top of. It does not itself serialize
//! bytes, negotiate transport security, or discover peers — see each
//! module's doc comment for the exact boundary.
//!
//! The load-bearing trait is [`marshaller::Marshaller`]: a [`service::Service`],
//! a [`transport::Transport`] (in its inbound-routing role), and a
//! [`passthrough::PassThrough`] all implement it, which is what lets a call
//! traverse any number of intermediate zones without the caller knowing how
//! many hops away the object actually lives.

pub mod config;
pub mod error;
pub mod ids;
pub mod marshaller;
pub mod passthrough;
pub mod proxy;
pub mod service;
pub mod stub;
pub mod transport;
pub mod wire;

pub mod prelude {
    pub use crate::config::{ServiceConfig, TransportConfig};
    pub use crate::error::{ErrorCode, Result};
    pub use crate::ids::{
        AddRefOptions, CallerZone, DestinationZone, InterfaceDescriptor, InterfaceOrdinal,
        KnownDirectionZone, Method, Object, ReleaseOptions, Zone,
    };
    pub use crate::marshaller::{Marshaller, ServiceEventListener};
    pub use crate::passthrough::PassThrough;
    pub use crate::proxy::{InterfaceProxy, ObjectProxy, ServiceProxy};
    pub use crate::service::Service;
    pub use crate::stub::{InterfaceStub, ObjectStub, StubFactory};
    pub use crate::transport::{OutboundSink, Transport, TransportStatus};
}
