//! Cross-module scenario tests exercising the zone graph end to end over
//! the in-process loopback transport (see `tests/support/mod.rs`).

mod support;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use support::connect_pair;
use zonerpc::prelude::*;
use zonerpc::wire::HIGHEST_SUPPORTED_VERSION;

struct EchoInterface;

#[async_trait]
impl InterfaceStub for EchoInterface {
    fn interface_ordinal(&self) -> InterfaceOrdinal {
        InterfaceOrdinal::new(1)
    }

    async fn call(&self, _caller_zone: CallerZone, _method_id: Method, in_bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(in_bytes.to_vec())
    }
}

fn wrap_echo(service: &Arc<Service>, impl_address: usize) -> Arc<ObjectStub> {
    service.wrap_object(impl_address, |_object_id| {
        let mut m: HashMap<InterfaceOrdinal, Arc<dyn InterfaceStub>> = HashMap::new();
        m.insert(InterfaceOrdinal::new(1), Arc::new(EchoInterface));
        m
    })
}

/// S1 — two-zone echo. Zone 1 hosts an object; zone 2 adds a reference to
/// it across the loopback transport and calls it.
#[tokio::test]
async fn two_zone_echo() {
    let zone1 = Service::new("zone-1", Zone::new(101));
    let zone2 = Service::new("zone-2", Zone::new(102));
    let (_t1, t2) = connect_pair(&zone1, &zone2).await;

    let stub = wrap_echo(&zone1, 0x1000);

    t2.add_ref(
        1,
        zone1.zone_id().as_destination(),
        stub.object_id(),
        zone2.zone_id().as_caller(),
        zone2.zone_id().as_known_direction(),
        AddRefOptions::NORMAL,
    )
    .await
    .unwrap();
    assert_eq!(stub.aggregate_shared_count(), 1);

    let reply = t2
        .send(
            1,
            zone1.zone_id().as_destination(),
            zone2.zone_id().as_caller(),
            stub.object_id(),
            InterfaceOrdinal::new(1),
            Method::new(7),
            b"ping",
        )
        .await
        .unwrap();
    assert_eq!(reply, b"ping");

    let remaining = t2
        .release(
            1,
            zone1.zone_id().as_destination(),
            stub.object_id(),
            zone2.zone_id().as_caller(),
            ReleaseOptions::NORMAL,
        )
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(zone1.check_is_empty());
}

/// S3 — transport failure mid-call. Once the transport toward zone 2 is
/// reported down, zone 1 must have collected every stub referenced only by
/// zone 2 and a further `send` from zone 2 must be rejected.
#[tokio::test]
async fn transport_down_collects_stubs_and_blocks_further_traffic() {
    let zone1 = Service::new("zone-1", Zone::new(201));
    let zone2 = Service::new("zone-2", Zone::new(202));
    let (_t1, t2) = connect_pair(&zone1, &zone2).await;

    let stub = wrap_echo(&zone1, 0x2000);
    t2.add_ref(
        1,
        zone1.zone_id().as_destination(),
        stub.object_id(),
        zone2.zone_id().as_caller(),
        zone2.zone_id().as_known_direction(),
        AddRefOptions::NORMAL,
    )
    .await
    .unwrap();
    assert_eq!(stub.aggregate_shared_count(), 1);

    zone1
        .transport_down(1, zone1.zone_id().as_destination(), zone2.zone_id().as_caller())
        .await
        .unwrap();

    assert!(zone1.check_is_empty());
    assert!(zone1.get_stub(stub.object_id()).is_none());
}

/// S4 — an optimistic reference survives the shared reference's release,
/// then a further shared add-ref is rejected once the stub is a zombie.
#[tokio::test]
async fn optimistic_reference_survives_shared_release() {
    let zone1 = Service::new("zone-1", Zone::new(301));
    let zone2 = Service::new("zone-2", Zone::new(302));
    let (_t1, t2) = connect_pair(&zone1, &zone2).await;

    let stub = wrap_echo(&zone1, 0x3000);
    let caller = zone2.zone_id().as_caller();
    let known_direction = zone2.zone_id().as_known_direction();

    t2.add_ref(1, zone1.zone_id().as_destination(), stub.object_id(), caller, known_direction, AddRefOptions::NORMAL)
        .await
        .unwrap();
    t2.add_ref(1, zone1.zone_id().as_destination(), stub.object_id(), caller, known_direction, AddRefOptions::OPTIMISTIC)
        .await
        .unwrap();

    let remaining = t2
        .release(1, zone1.zone_id().as_destination(), stub.object_id(), caller, ReleaseOptions::NORMAL)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(stub.is_zombie());

    let err = t2
        .add_ref(1, zone1.zone_id().as_destination(), stub.object_id(), CallerZone::new(9999), known_direction, AddRefOptions::NORMAL)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::ObjectGone);

    t2.release(1, zone1.zone_id().as_destination(), stub.object_id(), caller, ReleaseOptions::OPTIMISTIC)
        .await
        .unwrap();
    assert!(zone1.check_is_empty());
}

/// S2 — three-zone transit. Zone 3 adds a reference to an object hosted in
/// zone 1 through zone 2, which has no direct transport to zone 1's object
/// ahead of time and must lazily create a pass-through bridging its two
/// legs. A further call and release both travel the same bridged route.
#[tokio::test]
async fn three_zone_transit_creates_a_passthrough() {
    let zone1 = Service::new("zone-1", Zone::new(401));
    let zone2 = Service::new("zone-2", Zone::new(402));
    let zone3 = Service::new("zone-3", Zone::new(403));
    let (_t1_to_2, t2_to_1) = connect_pair(&zone1, &zone2).await;
    let (t2_to_3, t3_to_2) = connect_pair(&zone2, &zone3).await;

    let stub = wrap_echo(&zone1, 0x4000);
    let caller = zone3.zone_id().as_caller();
    let known_direction = zone2.zone_id().as_known_direction();

    t3_to_2
        .add_ref(1, zone1.zone_id().as_destination(), stub.object_id(), caller, known_direction, AddRefOptions::NORMAL)
        .await
        .unwrap();
    assert_eq!(stub.aggregate_shared_count(), 1);

    // Zone 2 now bridges the two legs with a pass-through rather than
    // holding the reference itself.
    let pt = t2_to_1
        .get_passthrough(zone3.zone_id().as_destination(), zone1.zone_id().as_destination())
        .expect("pass-through created for the zone1<->zone3 pair");
    assert!(Arc::ptr_eq(
        &pt,
        &t2_to_3
            .get_passthrough(zone1.zone_id().as_destination(), zone3.zone_id().as_destination())
            .unwrap()
    ));

    let reply = t3_to_2
        .send(
            1,
            zone1.zone_id().as_destination(),
            caller,
            stub.object_id(),
            InterfaceOrdinal::new(1),
            Method::new(7),
            b"ping",
        )
        .await
        .unwrap();
    assert_eq!(reply, b"ping");

    let remaining = t3_to_2
        .release(1, zone1.zone_id().as_destination(), stub.object_id(), caller, ReleaseOptions::NORMAL)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(zone1.check_is_empty());
}

/// S5 — handshake version negotiation. A client-side transport's
/// `init_client_channel` carrying a protocol version outside the peer's
/// supported range is rejected by the peer's service, and the transport
/// never reaches `Connected`. Retrying with a supported version then
/// succeeds.
#[tokio::test]
async fn handshake_rejects_unsupported_protocol_version() {
    let zone1 = Service::new("zone-1", Zone::new(501));
    let zone2 = Service::new("zone-2", Zone::new(502));

    let sink1 = support::LoopbackSink::new();
    let sink2 = support::LoopbackSink::new();
    let t1 = Transport::new("1-to-2", &zone1, zone2.zone_id(), sink1.clone());
    let t2 = Transport::new("2-to-1", &zone2, zone1.zone_id(), sink2.clone());
    sink1.set_peer(&t2);
    sink2.set_peer(&t1);

    let err = t1
        .init_client_channel(HIGHEST_SUPPORTED_VERSION + 1, zone1.zone_id().as_caller(), Object::new(0))
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InvalidVersion);
    assert_eq!(t1.status(), TransportStatus::Connecting);

    t1.init_client_channel(HIGHEST_SUPPORTED_VERSION, zone1.zone_id().as_caller(), Object::new(0))
        .await
        .unwrap();
    assert_eq!(t1.status(), TransportStatus::Connected);
}

/// A `send` carrying a protocol version outside the supported range is
/// rejected before it ever reaches a stub, independent of the handshake.
#[tokio::test]
async fn unsupported_protocol_version_is_rejected_by_send() {
    let zone1 = Service::new("zone-1", Zone::new(511));
    let zone2 = Service::new("zone-2", Zone::new(512));
    let (_t1, t2) = connect_pair(&zone1, &zone2).await;

    let stub = wrap_echo(&zone1, 0x5100);
    t2.add_ref(
        1,
        zone1.zone_id().as_destination(),
        stub.object_id(),
        zone2.zone_id().as_caller(),
        zone2.zone_id().as_known_direction(),
        AddRefOptions::NORMAL,
    )
    .await
    .unwrap();

    let err = t2
        .send(
            HIGHEST_SUPPORTED_VERSION + 1,
            zone1.zone_id().as_destination(),
            zone2.zone_id().as_caller(),
            stub.object_id(),
            InterfaceOrdinal::new(1),
            Method::new(7),
            b"ping",
        )
        .await
        .unwrap_err();
    assert_eq!(err, ErrorCode::InvalidVersion);
}

/// S6 — simultaneous close. Both legs of a transport pair go down at once;
/// every pending call on either side is cancelled rather than left to hang
/// forever, and (once the service is told the caller zone is gone, the
/// same cleanup step a concrete wire's shutdown handler performs) the
/// stubs referenced only by that zone are collected.
#[tokio::test]
async fn simultaneous_transport_down_cancels_pending_and_collects_stubs() {
    let zone1 = Service::new("zone-1", Zone::new(601));
    let zone2 = Service::new("zone-2", Zone::new(602));
    let (t1, t2) = connect_pair(&zone1, &zone2).await;

    let stub = wrap_echo(&zone1, 0x6000);
    t2.add_ref(
        1,
        zone1.zone_id().as_destination(),
        stub.object_id(),
        zone2.zone_id().as_caller(),
        zone2.zone_id().as_known_direction(),
        AddRefOptions::NORMAL,
    )
    .await
    .unwrap();

    let (sequence_number_1, rx1) = t1.register_pending();
    let (sequence_number_2, rx2) = t2.register_pending();

    tokio::join!(t1.notify_all_destinations_of_disconnect(), t2.notify_all_destinations_of_disconnect());

    let outcome1 = t1.await_pending(sequence_number_1, rx1).await;
    let outcome2 = t2.await_pending(sequence_number_2, rx2).await;
    assert_eq!(outcome1.unwrap_err(), ErrorCode::CallCancelled);
    assert_eq!(outcome2.unwrap_err(), ErrorCode::CallCancelled);

    zone1
        .transport_down(1, zone1.zone_id().as_destination(), zone2.zone_id().as_caller())
        .await
        .unwrap();
    assert!(zone1.check_is_empty());
    assert!(zone1.get_stub(stub.object_id()).is_none());
}
