//! Typed identifier algebra and the add-ref/release option flags.
//!
//! Every identifier in the system is a 64-bit integer, but they are never
//! interchangeable: a [`Zone`] cannot be passed where a [`CallerZone`] is
//! expected, even though both wrap a `u64`. Distinct newtypes make that a
//! compile error instead of a routing bug discovered in production.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_newtype!(Zone);
id_newtype!(DestinationZone);
id_newtype!(CallerZone);
id_newtype!(KnownDirectionZone);
id_newtype!(Object);
id_newtype!(InterfaceOrdinal);
id_newtype!(Method);

impl Zone {
    /// Views this zone as a call destination.
    pub const fn as_destination(self) -> DestinationZone {
        DestinationZone(self.0)
    }

    /// Views this zone as a call origin.
    pub const fn as_caller(self) -> CallerZone {
        CallerZone(self.0)
    }

    /// Views this zone as a routing hint.
    pub const fn as_known_direction(self) -> KnownDirectionZone {
        KnownDirectionZone(self.0)
    }

    /// Allocates a process-wide unique zone id. Zone ids are never reused
    /// within the process, matching the "once assigned, never reused"
    /// invariant every `Service` instance relies on.
    pub fn next() -> Zone {
        static ZONE_ID_GENERATOR: AtomicU64 = AtomicU64::new(0);
        Zone(ZONE_ID_GENERATOR.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl DestinationZone {
    pub const fn as_caller(self) -> CallerZone {
        CallerZone(self.0)
    }

    pub const fn as_zone(self) -> Zone {
        Zone(self.0)
    }
}

impl CallerZone {
    pub const fn as_destination(self) -> DestinationZone {
        DestinationZone(self.0)
    }

    pub const fn as_zone(self) -> Zone {
        Zone(self.0)
    }
}

impl KnownDirectionZone {
    pub const fn as_destination(self) -> DestinationZone {
        DestinationZone(self.0)
    }

    pub const fn as_caller(self) -> CallerZone {
        CallerZone(self.0)
    }
}

/// Reserved object id for the handshake "dummy" descriptor.
///
/// `add_ref`/`release` against this id always succeed without side effects;
/// it exists only so the wire format can carry an `InterfaceDescriptor`
/// before any real object has been marshalled.
pub const DUMMY_OBJECT: Object = Object(0);

impl Object {
    pub const fn is_dummy(self) -> bool {
        self.0 == 0
    }
}

/// The wire representation of an object reference: which object, in which
/// zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceDescriptor {
    pub object_id: Object,
    pub destination_zone_id: DestinationZone,
}

impl InterfaceDescriptor {
    pub const fn new(object_id: Object, destination_zone_id: DestinationZone) -> Self {
        Self {
            object_id,
            destination_zone_id,
        }
    }

    pub const fn dummy(destination_zone_id: DestinationZone) -> Self {
        Self::new(DUMMY_OBJECT, destination_zone_id)
    }
}

bitflags::bitflags! {
    /// Flags carried on an `add_ref` call.
    ///
    /// `NORMAL` and `OPTIMISTIC` describe the *kind* of reference being
    /// taken and are mutually exclusive in practice (callers should set
    /// exactly one). `BUILD_DESTINATION_ROUTE` / `BUILD_CALLER_ROUTE`
    /// describe routing obligations that outlive the call itself — see
    /// `Service::add_ref` for how they're interpreted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AddRefOptions: u8 {
        const NORMAL                  = 0b0000_0001;
        const OPTIMISTIC              = 0b0000_0010;
        const BUILD_DESTINATION_ROUTE = 0b0000_0100;
        const BUILD_CALLER_ROUTE      = 0b0000_1000;
    }
}

impl AddRefOptions {
    pub const fn is_optimistic(self) -> bool {
        self.contains(Self::OPTIMISTIC)
    }

    /// Whether the destination-direction route must be built. An add-ref
    /// with neither routing flag set, or with both `NORMAL` bits set but no
    /// explicit routing flag, defaults to building the destination route —
    /// this is the common case of a brand-new outbound reference.
    pub fn wants_destination_route(self) -> bool {
        if self.contains(Self::BUILD_CALLER_ROUTE) && !self.contains(Self::BUILD_DESTINATION_ROUTE)
        {
            false
        } else {
            true
        }
    }

    pub const fn wants_caller_route(self) -> bool {
        self.contains(Self::BUILD_CALLER_ROUTE)
    }
}

bitflags::bitflags! {
    /// Flags carried on a `release` call. Exactly one of `NORMAL` /
    /// `OPTIMISTIC` is set: it names which per-caller counter to
    /// decrement.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReleaseOptions: u8 {
        const NORMAL     = 0b0000_0001;
        const OPTIMISTIC = 0b0000_0010;
    }
}

impl ReleaseOptions {
    pub const fn is_optimistic(self) -> bool {
        self.contains(Self::OPTIMISTIC)
    }
}
