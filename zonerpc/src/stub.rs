//! Object stub: the server-side wrapper around a locally-hosted object.
//!
//! A stub owns exactly one strong handle to the concrete implementation and
//! a dispatch table of [`InterfaceStub`]s keyed by [`InterfaceOrdinal`]. It
//! also owns the per-caller reference bookkeeping described in §3/§4.2 of
//! the spec: every zone that holds a reference to this object is tracked
//! independently, so a zone releases exactly as many times as it added a
//! reference, never fewer and never more.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{ErrorCode, Result};
use crate::ids::{CallerZone, InterfaceOrdinal, Method, Object};
use crate::wire::is_supported_version;

/// A per-interface dispatch table, generated by the IDL compiler (out of
/// scope for this crate) for each interface a concrete object implements.
#[async_trait]
pub trait InterfaceStub: Send + Sync {
    /// The interface this stub dispatches for.
    fn interface_ordinal(&self) -> InterfaceOrdinal;

    /// Invoke `method_id` with the (codec-opaque) argument bytes, returning
    /// the (codec-opaque) reply bytes.
    async fn call(
        &self,
        caller_zone: CallerZone,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<Vec<u8>>;
}

/// Factory registered per [`InterfaceOrdinal`] that produces an
/// [`InterfaceStub`] for a freshly-wrapped concrete implementation.
///
/// Registration is not thread-safe by design (§6): applications register
/// every factory up front, before the service begins serving traffic.
pub type StubFactory = Arc<dyn Fn(&dyn std::any::Any) -> Option<Arc<dyn InterfaceStub>> + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct RefCounts {
    shared: u64,
    optimistic: u64,
}

/// Server-side wrapper around one locally-hosted object.
pub struct ObjectStub {
    object_id: Object,
    /// Address of the concrete implementation, used by the service's
    /// reverse lookup to avoid wrapping the same object twice.
    impl_address: usize,
    interfaces: HashMap<InterfaceOrdinal, Arc<dyn InterfaceStub>>,
    /// `CallerZone -> (shared_count, optimistic_count)`.
    per_caller: Mutex<HashMap<CallerZone, RefCounts>>,
    /// Aggregate shared count across all callers, kept in lockstep with
    /// `per_caller` so zombie checks don't need the mutex on the hot path.
    aggregate_shared: AtomicU64,
}

impl ObjectStub {
    pub fn new(
        object_id: Object,
        impl_address: usize,
        interfaces: HashMap<InterfaceOrdinal, Arc<dyn InterfaceStub>>,
    ) -> Self {
        Self {
            object_id,
            impl_address,
            interfaces,
            per_caller: Mutex::new(HashMap::new()),
            aggregate_shared: AtomicU64::new(0),
        }
    }

    pub fn object_id(&self) -> Object {
        self.object_id
    }

    pub fn impl_address(&self) -> usize {
        self.impl_address
    }

    pub fn aggregate_shared_count(&self) -> u64 {
        self.aggregate_shared.load(Ordering::Acquire)
    }

    /// Whether the stub is in the zombie state: no shared holders remain,
    /// but at least one caller still holds an optimistic reference.
    pub fn is_zombie(&self) -> bool {
        if self.aggregate_shared_count() != 0 {
            return false;
        }
        self.per_caller.lock().values().any(|c| c.optimistic > 0)
    }

    pub fn try_cast(&self, interface_id: InterfaceOrdinal) -> Result<()> {
        if self.interfaces.contains_key(&interface_id) {
            Ok(())
        } else {
            Err(ErrorCode::InvalidCast)
        }
    }

    pub async fn call(
        &self,
        protocol_version: u64,
        caller_zone: CallerZone,
        interface_id: InterfaceOrdinal,
        method_id: Method,
        in_bytes: &[u8],
    ) -> Result<Vec<u8>> {
        if !is_supported_version(protocol_version) {
            return Err(ErrorCode::InvalidVersion);
        }
        let iface = self
            .interfaces
            .get(&interface_id)
            .ok_or(ErrorCode::InvalidCast)?;
        iface.call(caller_zone, method_id, in_bytes).await.map_err(|e| {
            if matches!(e, ErrorCode::InvalidData) {
                ErrorCode::InvalidMethodId
            } else {
                e
            }
        })
    }

    /// Increments the appropriate per-caller counter.
    ///
    /// `outcall` distinguishes an add-ref caused by the local service
    /// handing out a brand-new descriptor (`true`) from one caused by an
    /// inbound `add_ref` frame (`false`); it only affects telemetry.
    pub fn add_ref(&self, optimistic: bool, outcall: bool, caller_zone: CallerZone) -> Result<()> {
        if !optimistic && self.is_zombie() {
            return Err(ErrorCode::ObjectGone);
        }
        let mut guard = self.per_caller.lock();
        let entry = guard.entry(caller_zone).or_default();
        if optimistic {
            entry.optimistic += 1;
        } else {
            entry.shared += 1;
            self.aggregate_shared.fetch_add(1, Ordering::AcqRel);
        }
        debug!(
            object_id = self.object_id.value(),
            caller_zone = caller_zone.value(),
            optimistic,
            outcall,
            "stub add_ref"
        );
        Ok(())
    }

    /// Decrements the appropriate per-caller counter and returns the
    /// stub's aggregate shared count after the operation.
    pub fn release(&self, optimistic: bool, caller_zone: CallerZone) -> u64 {
        let mut guard = self.per_caller.lock();
        if let Some(entry) = guard.get_mut(&caller_zone) {
            if optimistic {
                entry.optimistic = entry.optimistic.saturating_sub(1);
            } else if entry.shared > 0 {
                entry.shared -= 1;
                self.aggregate_shared.fetch_sub(1, Ordering::AcqRel);
            }
            if entry.shared == 0 && entry.optimistic == 0 {
                guard.remove(&caller_zone);
            }
        }
        debug!(
            object_id = self.object_id.value(),
            caller_zone = caller_zone.value(),
            optimistic,
            remaining_shared = self.aggregate_shared_count(),
            "stub release"
        );
        self.aggregate_shared_count()
    }

    pub fn has_references_from_zone(&self, caller_zone: CallerZone) -> bool {
        self.per_caller
            .lock()
            .get(&caller_zone)
            .map(|c| c.shared > 0 || c.optimistic > 0)
            .unwrap_or(false)
    }

    /// Drops every reference attributed to `caller_zone` at once (used when
    /// a transport reports the peer is gone). Returns whether the stub's
    /// aggregate shared count reached zero as a result, i.e. whether the
    /// caller (the service) must now unregister and erase this stub.
    pub fn release_all_from_zone(&self, caller_zone: CallerZone) -> bool {
        let mut guard = self.per_caller.lock();
        if let Some(entry) = guard.remove(&caller_zone) {
            if entry.shared > 0 {
                self.aggregate_shared.fetch_sub(entry.shared, Ordering::AcqRel);
            }
        }
        self.aggregate_shared_count() == 0
    }

    /// Caller zones that currently hold a non-zero optimistic count.
    /// Collected by `Service::release`/`Service::transport_down` before the
    /// stub table lock is released, so `object_released` notifications can
    /// be posted without holding any lock.
    pub fn optimistic_holders(&self) -> Vec<CallerZone> {
        self.per_caller
            .lock()
            .iter()
            .filter(|(_, c)| c.optimistic > 0)
            .map(|(z, _)| *z)
            .collect()
    }
}
