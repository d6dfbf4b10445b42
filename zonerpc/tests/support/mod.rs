//! In-process loopback transport used only by this crate's own tests.
//! Stands in for a concrete wire transport (TCP, SPSC, enclave, …): instead
//! of encoding frames, an outbound call on one transport is delivered
//! straight into its peer's inbound `Marshaller` implementation.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use zonerpc::prelude::*;
use zonerpc::wire::HIGHEST_SUPPORTED_VERSION;

pub struct LoopbackSink {
    peer: RwLock<Option<Weak<Transport>>>,
}

impl LoopbackSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { peer: RwLock::new(None) })
    }

    pub fn set_peer(&self, peer: &Arc<Transport>) {
        *self.peer.write() = Some(Arc::downgrade(peer));
    }

    fn peer(&self) -> Result<Arc<Transport>> {
        self.peer.read().as_ref().and_then(Weak::upgrade).ok_or(ErrorCode::TransportError)
    }
}

#[async_trait]
impl OutboundSink for LoopbackSink {
    async fn outbound_send(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        self.peer()?
            .inbound_send(protocol_version, destination_zone_id, caller_zone_id, object_id, interface_id, method_id, in_bytes)
            .await
    }

    async fn outbound_post(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<()> {
        self.peer()?
            .inbound_post(protocol_version, destination_zone_id, caller_zone_id, object_id, interface_id, method_id, in_bytes)
            .await
    }

    async fn outbound_try_cast(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
    ) -> Result<()> {
        self.peer()?.inbound_try_cast(protocol_version, destination_zone_id, object_id, interface_id).await
    }

    async fn outbound_add_ref(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        known_direction_zone_id: KnownDirectionZone,
        options: AddRefOptions,
    ) -> Result<()> {
        self.peer()?
            .inbound_add_ref(protocol_version, destination_zone_id, object_id, caller_zone_id, known_direction_zone_id, options)
            .await
    }

    async fn outbound_release(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        options: ReleaseOptions,
    ) -> Result<u64> {
        self.peer()?
            .inbound_release(protocol_version, destination_zone_id, object_id, caller_zone_id, options)
            .await
    }

    async fn outbound_object_released(
        &self,
        protocol_version: u64,
        object_id: Object,
        destination_zone_id: DestinationZone,
    ) -> Result<()> {
        self.peer()?.inbound_object_released(protocol_version, object_id, destination_zone_id).await
    }

    async fn outbound_transport_down(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
    ) -> Result<()> {
        self.peer()?.inbound_transport_down(protocol_version, destination_zone_id, caller_zone_id).await
    }

    async fn outbound_init_client_channel(
        &self,
        protocol_version: u64,
        caller_zone_id: CallerZone,
        caller_object_id: Object,
    ) -> Result<DestinationZone> {
        self.peer()?.inbound_init_client_channel(protocol_version, caller_zone_id, caller_object_id).await
    }
}

/// Wires up a transport pair between two services, each performing the real
/// client-side handshake (`init_client_channel`) against the other's
/// service before the pair is handed back — neither transport reaches
/// `Connected` except through that negotiation.
pub async fn connect_pair(service_a: &Arc<Service>, service_b: &Arc<Service>) -> (Arc<Transport>, Arc<Transport>) {
    let sink_a = LoopbackSink::new();
    let sink_b = LoopbackSink::new();

    let transport_a = Transport::new("a-to-b", service_a, service_b.zone_id(), sink_a.clone());
    let transport_b = Transport::new("b-to-a", service_b, service_a.zone_id(), sink_b.clone());

    sink_a.set_peer(&transport_b);
    sink_b.set_peer(&transport_a);

    service_a.register_transport(service_b.zone_id().as_destination(), transport_a.clone());
    service_b.register_transport(service_a.zone_id().as_destination(), transport_b.clone());

    transport_a
        .init_client_channel(HIGHEST_SUPPORTED_VERSION, service_a.zone_id().as_caller(), Object::new(0))
        .await
        .expect("handshake negotiates a supported version");
    transport_b
        .init_client_channel(HIGHEST_SUPPORTED_VERSION, service_b.zone_id().as_caller(), Object::new(0))
        .await
        .expect("handshake negotiates a supported version");

    (transport_a, transport_b)
}
