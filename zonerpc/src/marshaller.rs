//! The `Marshaller` contract: the seven operations reachable either from
//! local code or from an inbound frame, shared by [`crate::service::Service`],
//! [`crate::transport::Transport`] (in its inbound-routing role) and
//! [`crate::passthrough::PassThrough`].
//!
//! Interface stubs/proxies generated by the (out-of-scope) IDL compiler are
//! the only callers that ever see interface-typed arguments; everything
//! below this line deals in raw `(object, interface, method)` identifiers
//! and opaque payload bytes, which is what lets a single trait describe a
//! local service, a wire transport, and a pass-through router uniformly.

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::{
    AddRefOptions, CallerZone, DestinationZone, InterfaceOrdinal, KnownDirectionZone, Method,
    Object, ReleaseOptions,
};

/// Operations a zone hop (a service, a transport, or a pass-through) must
/// answer for traffic addressed to a given destination zone.
#[async_trait]
pub trait Marshaller: Send + Sync {
    /// Two-way method invocation; returns the reply bytes.
    async fn send(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<Vec<u8>>;

    /// Fire-and-forget method invocation.
    async fn post(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<()>;

    /// Reports whether the object implements the given interface.
    async fn try_cast(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
    ) -> Result<()>;

    /// Creates or propagates a reference. See `Service::add_ref` for the
    /// routing-flag decision table.
    #[allow(clippy::too_many_arguments)]
    async fn add_ref(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        known_direction_zone_id: KnownDirectionZone,
        options: AddRefOptions,
    ) -> Result<()>;

    /// Releases a reference. Returns the stub's aggregate shared count
    /// after the operation (0 if the stub has just been erased).
    async fn release(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        options: ReleaseOptions,
    ) -> Result<u64>;

    /// Fire-and-forget notification that an object has been fully
    /// destroyed, sent to every zone that still held an optimistic
    /// reference to it.
    async fn object_released(
        &self,
        protocol_version: u64,
        object_id: Object,
        destination_zone_id: DestinationZone,
    ) -> Result<()>;

    /// Notifies that the route toward `caller_zone_id` is gone; the
    /// receiver must release every reference it attributes to that zone.
    async fn transport_down(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
    ) -> Result<()>;
}

/// Listener for the `object_released` notification, registered with a
/// [`crate::service::Service`] and invoked outside its locks (§6
/// "Service-event listeners").
#[async_trait]
pub trait ServiceEventListener: Send + Sync {
    async fn on_object_released(&self, object_id: Object, destination_zone_id: DestinationZone);
}
