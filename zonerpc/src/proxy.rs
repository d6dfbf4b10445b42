//! Client-side handles: a [`ServiceProxy`] per remote zone, one
//! [`ObjectProxy`] per remote object, and the dispatch scaffolding an IDL
//! compiler would generate on top of an object proxy (out of scope here,
//! represented by [`InterfaceProxy`]).

use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::ids::{
    AddRefOptions, CallerZone, DestinationZone, InterfaceDescriptor, InterfaceOrdinal,
    KnownDirectionZone, Method, Object, ReleaseOptions,
};
use crate::marshaller::Marshaller;

/// The client-side partner of one remote zone. Every [`ObjectProxy`] for
/// that zone routes its calls through the same `ServiceProxy`.
pub struct ServiceProxy {
    destination_zone_id: DestinationZone,
    caller_zone_id: CallerZone,
    marshaller: Arc<dyn Marshaller>,
}

impl ServiceProxy {
    pub fn new(
        destination_zone_id: DestinationZone,
        caller_zone_id: CallerZone,
        marshaller: Arc<dyn Marshaller>,
    ) -> Arc<Self> {
        Arc::new(Self {
            destination_zone_id,
            caller_zone_id,
            marshaller,
        })
    }

    pub fn destination_zone_id(&self) -> DestinationZone {
        self.destination_zone_id
    }

    pub async fn sp_send(
        &self,
        protocol_version: u64,
        object_id: Object,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        self.marshaller
            .send(
                protocol_version,
                self.destination_zone_id,
                self.caller_zone_id,
                object_id,
                interface_id,
                method_id,
                in_bytes,
            )
            .await
    }

    pub async fn sp_try_cast(
        &self,
        protocol_version: u64,
        object_id: Object,
        interface_id: InterfaceOrdinal,
    ) -> Result<()> {
        self.marshaller
            .try_cast(protocol_version, self.destination_zone_id, object_id, interface_id)
            .await
    }

    pub async fn sp_add_ref(
        &self,
        protocol_version: u64,
        object_id: Object,
        known_direction_zone_id: KnownDirectionZone,
        options: AddRefOptions,
    ) -> Result<()> {
        self.marshaller
            .add_ref(
                protocol_version,
                self.destination_zone_id,
                object_id,
                self.caller_zone_id,
                known_direction_zone_id,
                options,
            )
            .await
    }

    /// Used by an [`ObjectProxy`] on drop. Fire-and-forget from the
    /// caller's point of view: a failure here only means the remote side
    /// leaks a reference it will eventually reclaim via `transport_down`.
    pub async fn sp_release(&self, protocol_version: u64, object_id: Object, options: ReleaseOptions) -> Result<u64> {
        self.marshaller
            .release(protocol_version, self.destination_zone_id, object_id, self.caller_zone_id, options)
            .await
    }
}

/// Client-side handle to one remote object.
///
/// Constructed either by [`ObjectProxy::from_granted_reference`] (the
/// remote side already performed the `add_ref` as part of returning this
/// descriptor) or by [`ObjectProxy::create`] (this zone must add the
/// reference itself). Both converge on the same drop behaviour: a
/// best-effort `release` posted to the owning runtime.
pub struct ObjectProxy {
    service_proxy: Arc<ServiceProxy>,
    object_id: Object,
    protocol_version: u64,
}

impl ObjectProxy {
    /// Takes over a reference the remote end already counted against us
    /// (e.g. a descriptor returned from a `send` call).
    pub fn from_granted_reference(service_proxy: Arc<ServiceProxy>, object_id: Object, protocol_version: u64) -> Self {
        Self {
            service_proxy,
            object_id,
            protocol_version,
        }
    }

    /// Performs the `add_ref` itself before returning the proxy.
    pub async fn create(
        service_proxy: Arc<ServiceProxy>,
        object_id: Object,
        protocol_version: u64,
        known_direction_zone_id: KnownDirectionZone,
    ) -> Result<Self> {
        service_proxy
            .sp_add_ref(protocol_version, object_id, known_direction_zone_id, AddRefOptions::NORMAL)
            .await?;
        Ok(Self {
            service_proxy,
            object_id,
            protocol_version,
        })
    }

    pub fn object_id(&self) -> Object {
        self.object_id
    }

    pub fn descriptor(&self) -> InterfaceDescriptor {
        InterfaceDescriptor::new(self.object_id, self.service_proxy.destination_zone_id())
    }

    pub fn service_proxy(&self) -> &Arc<ServiceProxy> {
        &self.service_proxy
    }
}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        let service_proxy = self.service_proxy.clone();
        let object_id = self.object_id;
        let protocol_version = self.protocol_version;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = service_proxy.sp_release(protocol_version, object_id, ReleaseOptions::NORMAL).await {
                        warn!(object_id = object_id.value(), error = ?e, "failed to release object proxy on drop");
                    }
                });
            }
            Err(_) => {
                warn!(
                    object_id = object_id.value(),
                    "object proxy dropped outside a tokio runtime; release not sent"
                );
            }
        }
    }
}

/// Per-interface dispatch generated by the (out-of-scope) IDL compiler. It
/// owns the object proxy and turns a typed method call into
/// `service_proxy.send` with codec-opaque argument bytes.
pub struct InterfaceProxy {
    object_proxy: Arc<ObjectProxy>,
    interface_id: InterfaceOrdinal,
}

impl InterfaceProxy {
    pub fn new(object_proxy: Arc<ObjectProxy>, interface_id: InterfaceOrdinal) -> Self {
        Self { object_proxy, interface_id }
    }

    pub async fn call(&self, method_id: Method, in_bytes: &[u8]) -> Result<Vec<u8>> {
        self.object_proxy
            .service_proxy()
            .sp_send(self.object_proxy.protocol_version, self.object_proxy.object_id, self.interface_id, method_id, in_bytes)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;
    use crate::ids::Zone;

    #[tokio::test]
    async fn object_proxy_add_refs_on_create_and_releases_on_drop() {
        let service = Service::new("zone-1", Zone::new(1));
        let stub = service.wrap_object(0xAA, |_| std::collections::HashMap::new());

        let service_proxy = ServiceProxy::new(
            service.zone_id().as_destination(),
            CallerZone::new(99),
            service.clone() as Arc<dyn Marshaller>,
        );

        {
            let _proxy = ObjectProxy::create(
                service_proxy.clone(),
                stub.object_id(),
                1,
                service.zone_id().as_known_direction(),
            )
            .await
            .unwrap();
            assert_eq!(stub.aggregate_shared_count(), 1);
        }

        // Drop spawns the release asynchronously; yield so it lands.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(stub.aggregate_shared_count(), 0);
    }
}
