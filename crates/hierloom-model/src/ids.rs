//! Identifiers for parts, instances and documents.
//!
//! All three are UUID newtypes so they can never be confused with each other
//! at an API boundary. They are totally ordered, which lets every table that
//! keys on them iterate deterministically.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(raw: Uuid) -> Self {
                Self(raw)
            }

            /// Deterministic id, mostly useful for fixtures.
            pub const fn from_u128(raw: u128) -> Self {
                Self(Uuid::from_u128(raw))
            }

            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(raw: Uuid) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

uuid_id!(
    /// Identity of a part inside a document.
    PartId
);

uuid_id!(
    /// Identity of one "instantiate this archetype here" operation. Every part
    /// cloned by the same operation shares it.
    InstanceId
);

uuid_id!(
    /// Identity of a document (an asset holding a part forest).
    DocumentId
);

/// Old id -> new id, produced when a clone generates fresh identities.
pub type IdRemapping = BTreeMap<PartId, PartId>;
