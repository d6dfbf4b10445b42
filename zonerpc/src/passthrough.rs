//! Two transports glued together so a zone in the middle of a call chain
//! can forward traffic without being either endpoint.
//!
//! A pass-through is not a transport for wire purposes — it only exposes
//! the inbound [`Marshaller`] surface. It owns a self-reference that keeps
//! it alive for as long as either leg has an outstanding reference; once
//! the aggregate shared+optimistic count across both directions drops to
//! zero, the self-reference is dropped and the pass-through's two table
//! entries are removed from its transports.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::ids::{AddRefOptions, CallerZone, DestinationZone, InterfaceOrdinal, Method, Object, ReleaseOptions};
use crate::marshaller::Marshaller;
use crate::service::Service;
use crate::transport::Transport;

pub struct PassThrough {
    forward: Arc<Transport>,
    reverse: Arc<Transport>,
    service: Arc<Service>,
    forward_dest: DestinationZone,
    reverse_dest: DestinationZone,
    /// Summed shared+optimistic references across both directions. When it
    /// drops to zero the self-reference is released.
    aggregate_count: AtomicI64,
    self_ref: Mutex<Option<Arc<PassThrough>>>,
}

impl PassThrough {
    pub fn new(
        forward: Arc<Transport>,
        reverse: Arc<Transport>,
        service: Arc<Service>,
        forward_dest: DestinationZone,
        reverse_dest: DestinationZone,
    ) -> Arc<Self> {
        debug!(
            forward_dest = forward_dest.value(),
            reverse_dest = reverse_dest.value(),
            "pass-through created"
        );
        Arc::new(Self {
            forward,
            reverse,
            service,
            forward_dest,
            reverse_dest,
            aggregate_count: AtomicI64::new(0),
            self_ref: Mutex::new(None),
        })
    }

    /// Installs the self-keepalive. Must be called with the same `Arc`
    /// returned by `new`, immediately after both transports have recorded
    /// this pass-through.
    pub fn arm_self_reference(&self, pt: &Arc<PassThrough>) {
        *self.self_ref.lock() = Some(pt.clone());
    }

    /// Which leg to use for traffic addressed to `destination`: the
    /// `reverse` transport if it matches `reverse_dest`, `forward`
    /// otherwise.
    pub fn directional_transport(&self, destination: DestinationZone) -> Arc<Transport> {
        if destination == self.reverse_dest {
            self.reverse.clone()
        } else {
            self.forward.clone()
        }
    }

    fn bump(&self, delta: i64) {
        let previous = self.aggregate_count.fetch_add(delta, Ordering::AcqRel);
        let now = previous + delta;
        debug_assert!(now >= 0, "pass-through aggregate count went negative");
        if now == 0 {
            self.self_ref.lock().take();
            self.forward.remove_passthrough(self.reverse_dest, self.forward_dest);
            self.reverse.remove_passthrough(self.forward_dest, self.reverse_dest);
            debug!(
                forward_dest = self.forward_dest.value(),
                reverse_dest = self.reverse_dest.value(),
                "pass-through count reached zero, releasing self-reference"
            );
        }
    }

    /// Called when one of the two transports underlying this pass-through
    /// goes down. Tears the pass-through down immediately rather than
    /// waiting for reference counts to unwind, since neither leg can carry
    /// traffic any more.
    pub async fn local_transport_down(&self) {
        let _ = self
            .service
            .transport_down(1, self.forward_dest.as_zone().as_destination(), self.reverse_dest.as_caller())
            .await;
        self.bump(-self.aggregate_count.load(Ordering::Acquire));
    }
}

#[async_trait]
impl Marshaller for PassThrough {
    async fn send(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        let transport = self.directional_transport(destination_zone_id);
        transport
            .send(protocol_version, destination_zone_id, caller_zone_id, object_id, interface_id, method_id, in_bytes)
            .await
    }

    async fn post(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<()> {
        let transport = self.directional_transport(destination_zone_id);
        transport
            .post(protocol_version, destination_zone_id, caller_zone_id, object_id, interface_id, method_id, in_bytes)
            .await
    }

    async fn try_cast(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
    ) -> Result<()> {
        let transport = self.directional_transport(destination_zone_id);
        transport.try_cast(protocol_version, destination_zone_id, object_id, interface_id).await
    }

    async fn add_ref(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        known_direction_zone_id: crate::ids::KnownDirectionZone,
        options: AddRefOptions,
    ) -> Result<()> {
        let transport = self.directional_transport(destination_zone_id);
        let result = transport
            .add_ref(
                protocol_version,
                destination_zone_id,
                object_id,
                caller_zone_id,
                known_direction_zone_id,
                options,
            )
            .await;
        if result.is_ok() {
            self.bump(1);
        }
        result
    }

    async fn release(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        options: ReleaseOptions,
    ) -> Result<u64> {
        let transport = self.directional_transport(destination_zone_id);
        let result = transport
            .release(protocol_version, destination_zone_id, object_id, caller_zone_id, options)
            .await;
        if result.is_ok() {
            self.bump(-1);
        }
        result
    }

    async fn object_released(
        &self,
        protocol_version: u64,
        object_id: Object,
        destination_zone_id: DestinationZone,
    ) -> Result<()> {
        let transport = self.directional_transport(destination_zone_id);
        transport.object_released(protocol_version, object_id, destination_zone_id).await
    }

    async fn transport_down(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
    ) -> Result<()> {
        let transport = self.directional_transport(destination_zone_id);
        transport.transport_down(protocol_version, destination_zone_id, caller_zone_id).await
    }
}

