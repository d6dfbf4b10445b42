//! The per-zone hub: stub registry, transport registry, service-proxy
//! registry, and interface-stub factory table. `Service` is the inbound
//! `Marshaller` for every object it locally hosts.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{ErrorCode, Result};
use crate::ids::{
    AddRefOptions, CallerZone, DestinationZone, InterfaceOrdinal, KnownDirectionZone, Method,
    Object, ReleaseOptions, Zone,
};
use crate::marshaller::{Marshaller, ServiceEventListener};
use crate::stub::{InterfaceStub, ObjectStub, StubFactory};
use crate::transport::Transport;

thread_local! {
    static CURRENT_SERVICE: RefCell<Option<Weak<Service>>> = RefCell::new(None);
}

/// RAII guard that installs `service` as the thread-local "current service"
/// for re-entrancy detection inside nested call handlers, restoring the
/// previous value on drop. Must be held across every suspend point inside a
/// dispatch path that may itself issue outbound calls.
pub struct CurrentServiceGuard {
    previous: Option<Weak<Service>>,
}

impl CurrentServiceGuard {
    pub fn enter(service: &Arc<Service>) -> Self {
        let previous = CURRENT_SERVICE.with(|cell| {
            cell.borrow_mut().replace(Arc::downgrade(service))
        });
        Self { previous }
    }
}

impl Drop for CurrentServiceGuard {
    fn drop(&mut self) {
        CURRENT_SERVICE.with(|cell| {
            *cell.borrow_mut() = self.previous.take();
        });
    }
}

/// Returns the service currently dispatching on this thread, if any.
pub fn current_service() -> Option<Arc<Service>> {
    CURRENT_SERVICE.with(|cell| cell.borrow().as_ref().and_then(Weak::upgrade))
}

/// Per-zone hub: the stub registry, the service-proxy registry, the
/// transport registry and the interface-stub factory table.
pub struct Service {
    zone_id: Zone,
    name: String,
    config: ServiceConfig,
    object_id_generator: AtomicU64,
    stubs: DashMap<Object, Arc<ObjectStub>>,
    impl_to_object: DashMap<usize, Object>,
    transports: DashMap<DestinationZone, Arc<Transport>>,
    stub_factories: DashMap<InterfaceOrdinal, StubFactory>,
    listeners: parking_lot::Mutex<Vec<Weak<dyn ServiceEventListener>>>,
}

impl Service {
    pub fn new(name: impl Into<String>, zone_id: Zone) -> Arc<Self> {
        Self::with_config(name, zone_id, ServiceConfig::default())
    }

    pub fn with_config(name: impl Into<String>, zone_id: Zone, config: ServiceConfig) -> Arc<Self> {
        let name = name.into();
        info!(zone_id = zone_id.value(), name = %name, "service created");
        Arc::new(Self {
            zone_id,
            name,
            config,
            object_id_generator: AtomicU64::new(0),
            stubs: DashMap::new(),
            impl_to_object: DashMap::new(),
            transports: DashMap::new(),
            stub_factories: DashMap::new(),
            listeners: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub fn zone_id(&self) -> Zone {
        self.zone_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object ids are unique within this zone, not process-wide.
    pub fn generate_new_object_id(&self) -> Object {
        Object::new(self.object_id_generator.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Registers an interface-stub factory. Not thread-safe by design: call
    /// this before the service begins serving traffic.
    pub fn register_stub_factory(&self, interface_id: InterfaceOrdinal, factory: StubFactory) {
        self.stub_factories.insert(interface_id, factory);
    }

    pub fn stub_factory(&self, interface_id: InterfaceOrdinal) -> Option<StubFactory> {
        self.stub_factories.get(&interface_id).map(|f| f.clone())
    }

    /// Registers a local object for the first time it is marshalled out,
    /// or returns the existing stub if it was already wrapped. Maintains
    /// the invariant that an object has exactly one stub: one entry keyed
    /// by object id, one keyed by implementation address.
    pub fn wrap_object(
        &self,
        impl_address: usize,
        make_interfaces: impl FnOnce(Object) -> HashMap<InterfaceOrdinal, Arc<dyn InterfaceStub>>,
    ) -> Arc<ObjectStub> {
        if let Some(object_id) = self.impl_to_object.get(&impl_address) {
            if let Some(stub) = self.stubs.get(&object_id) {
                return stub.clone();
            }
        }
        let object_id = self.generate_new_object_id();
        let stub = Arc::new(ObjectStub::new(
            object_id,
            impl_address,
            make_interfaces(object_id),
        ));
        self.stubs.insert(object_id, stub.clone());
        self.impl_to_object.insert(impl_address, object_id);
        debug!(
            zone_id = self.zone_id.value(),
            object_id = object_id.value(),
            "wrapped local object"
        );
        stub
    }

    pub fn get_stub(&self, object_id: Object) -> Option<Arc<ObjectStub>> {
        self.stubs.get(&object_id).map(|s| s.clone())
    }

    /// Looks up a registered transport toward `destination`, falling back
    /// to the transport registered for `known_direction` when no direct
    /// route exists yet.
    pub fn get_transport_with_fallback(
        &self,
        destination: DestinationZone,
        known_direction: KnownDirectionZone,
    ) -> Option<Arc<Transport>> {
        self.transports
            .get(&destination)
            .map(|t| t.clone())
            .or_else(|| {
                self.transports
                    .get(&known_direction.as_destination())
                    .map(|t| t.clone())
            })
    }

    pub fn get_transport(&self, destination: DestinationZone) -> Option<Arc<Transport>> {
        self.transports.get(&destination).map(|t| t.clone())
    }

    pub fn register_transport(&self, destination: DestinationZone, transport: Arc<Transport>) {
        self.transports.insert(destination, transport);
    }

    /// Unregisters the route toward `destination`. Called by a transport
    /// once both its proxy and stub counts for that zone have reached zero.
    pub fn remove_transport(&self, destination: DestinationZone) {
        self.transports.remove(&destination);
    }

    pub fn register_listener(&self, listener: Weak<dyn ServiceEventListener>) {
        self.listeners.lock().push(listener);
    }

    async fn notify_object_released(&self, object_id: Object, destination_zone_id: DestinationZone) {
        let listeners: Vec<_> = {
            let guard = self.listeners.lock();
            guard.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            listener.on_object_released(object_id, destination_zone_id).await;
        }
    }

    /// All four registries must be empty at shutdown; used both by the
    /// crate's own cleanliness assertions and by test property 2
    /// (reference-count neutrality).
    pub fn check_is_empty(&self) -> bool {
        self.stubs.is_empty()
            && self.impl_to_object.is_empty()
            && self.transports.is_empty()
    }

    /// Server side of the handshake (§6). Validates the client's
    /// `protocol_version` before handing back this zone's descriptor; the
    /// caller (the transport receiving this on the wire) only transitions
    /// to `Connected` once this returns `Ok`. `caller_object_id` is expected
    /// to be the handshake dummy object and is not otherwise inspected.
    pub fn init_client_channel(
        &self,
        protocol_version: u64,
        caller_zone_id: CallerZone,
        caller_object_id: Object,
    ) -> Result<DestinationZone> {
        let _ = caller_object_id;
        if !self.config.is_supported_version(protocol_version) {
            warn!(
                zone_id = self.zone_id.value(),
                caller_zone = caller_zone_id.value(),
                protocol_version,
                "rejecting handshake: unsupported protocol version"
            );
            return Err(ErrorCode::InvalidVersion);
        }
        debug!(
            zone_id = self.zone_id.value(),
            caller_zone = caller_zone_id.value(),
            protocol_version,
            "handshake accepted"
        );
        Ok(self.zone_id.as_destination())
    }

    fn assert_local_destination(&self, destination_zone_id: DestinationZone) -> Result<()> {
        if destination_zone_id != self.zone_id.as_destination() {
            debug_assert!(
                false,
                "service {} received a frame addressed to zone {:?}; routing bug, should have gone through a pass-through",
                self.zone_id,
                destination_zone_id
            );
            error!(
                zone_id = self.zone_id.value(),
                destination_zone = destination_zone_id.value(),
                "routing bug: non-local destination reached the service directly"
            );
            return Err(ErrorCode::ZoneNotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl Marshaller for Service {
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
        self.assert_local_destination(destination_zone_id)?;
        if !self.config.is_supported_version(protocol_version) {
            return Err(ErrorCode::InvalidVersion);
        }
        let stub = self.get_stub(object_id).ok_or(ErrorCode::ObjectGone)?;
        stub.call(protocol_version, caller_zone_id, interface_id, method_id, in_bytes)
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
        self.assert_local_destination(destination_zone_id)?;
        if !self.config.is_supported_version(protocol_version) {
            return Err(ErrorCode::InvalidVersion);
        }
        let stub = self.get_stub(object_id).ok_or(ErrorCode::ObjectGone)?;
        stub.call(protocol_version, caller_zone_id, interface_id, method_id, in_bytes)
            .await?;
        Ok(())
    }

    async fn try_cast(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        interface_id: InterfaceOrdinal,
    ) -> Result<()> {
        self.assert_local_destination(destination_zone_id)?;
        if !self.config.is_supported_version(protocol_version) {
            return Err(ErrorCode::InvalidVersion);
        }
        let stub = self.get_stub(object_id).ok_or(ErrorCode::ObjectNotFound(object_id, None))?;
        stub.try_cast(interface_id)
    }

    async fn add_ref(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        known_direction_zone_id: KnownDirectionZone,
        options: AddRefOptions,
    ) -> Result<()> {
        let optimistic = options.is_optimistic();
        let build_caller_channel = options.wants_caller_route();
        let build_dest_channel = options.wants_destination_route();
        debug_assert!(build_caller_channel || build_dest_channel);

        if build_caller_channel {
            if self.zone_id.as_caller() != caller_zone_id {
                let caller_transport = self
                    .get_transport(caller_zone_id.as_destination())
                    .ok_or(ErrorCode::ZoneNotFound)?;
                let forwarded = AddRefOptions::BUILD_CALLER_ROUTE
                    | if optimistic {
                        AddRefOptions::OPTIMISTIC
                    } else {
                        AddRefOptions::NORMAL
                    };
                caller_transport
                    .add_ref(
                        protocol_version,
                        destination_zone_id,
                        object_id,
                        caller_zone_id,
                        self.zone_id.as_known_direction(),
                        forwarded,
                    )
                    .await?;
            } else {
                let destination_transport = self
                    .get_transport_with_fallback(destination_zone_id, known_direction_zone_id)
                    .ok_or(ErrorCode::ZoneNotFound)?;
                self.register_transport(destination_zone_id, destination_transport);
            }
        }

        if build_dest_channel {
            if self.zone_id.as_destination() != destination_zone_id {
                let dest_transport = self
                    .get_transport(destination_zone_id)
                    .ok_or(ErrorCode::ZoneNotFound)?;
                return dest_transport
                    .add_ref(
                        protocol_version,
                        destination_zone_id,
                        object_id,
                        caller_zone_id,
                        self.zone_id.as_known_direction(),
                        options - AddRefOptions::BUILD_CALLER_ROUTE,
                    )
                    .await;
            }

            if !self.config.is_supported_version(protocol_version) {
                return Err(ErrorCode::InvalidVersion);
            }
            if object_id.is_dummy() {
                return Ok(());
            }

            let stub = self.get_stub(object_id).ok_or(ErrorCode::ObjectNotFound(object_id, Some(destination_zone_id)))?;

            if let Some(caller_transport) =
                self.get_transport_with_fallback(caller_zone_id.as_destination(), known_direction_zone_id)
            {
                self.register_transport(caller_zone_id.as_destination(), caller_transport);
            }

            stub.add_ref(optimistic, false, caller_zone_id)?;
        }
        Ok(())
    }

    async fn release(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        object_id: Object,
        caller_zone_id: CallerZone,
        options: ReleaseOptions,
    ) -> Result<u64> {
        if !self.config.is_supported_version(protocol_version) {
            return Err(ErrorCode::InvalidVersion);
        }

        let stub = self
            .stubs
            .get(&object_id)
            .map(|s| s.clone())
            .ok_or(ErrorCode::ObjectNotFound(object_id, Some(destination_zone_id)))?;

        let optimistic = options.is_optimistic();
        let count = stub.release(optimistic, caller_zone_id);

        if count == 0 && !optimistic {
            let optimistic_holders = stub.optimistic_holders();

            self.stubs.remove(&object_id);
            self.impl_to_object.remove(&stub.impl_address());

            // Posting object_released must happen after the stub table
            // entries are erased; holding that lock across the notify
            // below is known to deadlock when a listener re-enters the
            // service synchronously.
            for holder in optimistic_holders {
                if let Some(transport) = self.get_transport(holder.as_destination()) {
                    if let Err(e) = transport
                        .object_released(protocol_version, object_id, self.zone_id.as_destination())
                        .await
                    {
                        warn!(
                            zone_id = self.zone_id.value(),
                            object_id = object_id.value(),
                            caller_zone = holder.value(),
                            error = ?e,
                            "failed to notify optimistic holder of object_released"
                        );
                    }
                }
            }
        }

        Ok(count)
    }

    async fn object_released(
        &self,
        _protocol_version: u64,
        object_id: Object,
        destination_zone_id: DestinationZone,
    ) -> Result<()> {
        self.notify_object_released(object_id, destination_zone_id).await;
        Ok(())
    }

    async fn transport_down(
        &self,
        protocol_version: u64,
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
    ) -> Result<()> {
        self.assert_local_destination(destination_zone_id)?;
        if !self.config.is_supported_version(protocol_version) {
            return Ok(());
        }

        // Collect the optimistic holders of each stub before erasing it, the
        // same ordering `release` uses: the stub table lock must not be held
        // across the `object_released` notifications below.
        let mut to_delete: Vec<(Object, Vec<CallerZone>)> = Vec::new();
        for entry in self.stubs.iter() {
            let (object_id, stub) = (*entry.key(), entry.value().clone());
            if stub.has_references_from_zone(caller_zone_id) {
                let should_delete = stub.release_all_from_zone(caller_zone_id);
                if should_delete {
                    to_delete.push((object_id, stub.optimistic_holders()));
                }
            }
        }

        for (object_id, _) in &to_delete {
            self.stubs.remove(object_id);
        }
        self.impl_to_object
            .retain(|_, object_id| self.stubs.contains_key(object_id));

        info!(
            zone_id = self.zone_id.value(),
            caller_zone = caller_zone_id.value(),
            deleted = to_delete.len(),
            "transport_down cleanup complete"
        );

        for (object_id, optimistic_holders) in to_delete {
            for holder in optimistic_holders {
                if let Some(transport) = self.get_transport(holder.as_destination()) {
                    if let Err(e) = transport
                        .object_released(protocol_version, object_id, self.zone_id.as_destination())
                        .await
                    {
                        warn!(
                            zone_id = self.zone_id.value(),
                            object_id = object_id.value(),
                            caller_zone = holder.value(),
                            error = ?e,
                            "failed to notify optimistic holder of object_released"
                        );
                    }
                }
            }
            self.notify_object_released(object_id, destination_zone_id).await;
        }
        Ok(())
    }
}
