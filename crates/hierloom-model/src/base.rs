//! Base links: "this part is a clone of that archetype part, for this instance".

use crate::ids::{DocumentId, InstanceId, PartId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-part pointer back to the archetype it was cloned from.
///
/// `base_part_id` must have existed in `archetype` at some point; it may have
/// been deleted there since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BasePart {
    pub archetype: DocumentId,
    pub base_part_id: PartId,
    pub instance_id: InstanceId,
}

impl BasePart {
    pub fn new(archetype: DocumentId, base_part_id: PartId, instance_id: InstanceId) -> Self {
        Self {
            archetype,
            base_part_id,
            instance_id,
        }
    }

    pub fn key(&self) -> BaseInstanceKey {
        BaseInstanceKey::new(self.base_part_id, self.instance_id)
    }
}

/// `(archetype part, instance)` pair; the key of the reverse mapping tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BaseInstanceKey {
    pub base_part_id: PartId,
    pub instance_id: InstanceId,
}

impl BaseInstanceKey {
    pub fn new(base_part_id: PartId, instance_id: InstanceId) -> Self {
        Self {
            base_part_id,
            instance_id,
        }
    }
}

impl fmt::Display for BaseInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.base_part_id, self.instance_id)
    }
}
