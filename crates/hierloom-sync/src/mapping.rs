//! Reverse mapping tables of a derived document.
//!
//! - `(archetype part, instance)` -> last known derived design. Entries
//!   outlive the derived part so a later re-add from the archetype can be
//!   recognised as a move and reuse the same identity.
//! - `(archetype part, instance)` pairs the user explicitly deleted.
//! - per-instance common ancestor, the last-resort insertion point when an
//!   instance has no live parts left.

use hierloom_model::{BaseInstanceKey, Hierarchy, HierarchyPart, InstanceId, PartDesign, PartId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Where the parts of one instance were last seen together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommonAncestor {
    /// The root level of the document.
    Root,
    Part(PartId),
    /// The recorded chains could not be joined.
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ReverseMapping<P> {
    base_instance_mapping: BTreeMap<BaseInstanceKey, PartDesign<P>>,
    deleted_parts: BTreeSet<BaseInstanceKey>,
    common_ancestors: BTreeMap<InstanceId, CommonAncestor>,
}

impl<P> Default for ReverseMapping<P> {
    fn default() -> Self {
        Self {
            base_instance_mapping: BTreeMap::new(),
            deleted_parts: BTreeSet::new(),
            common_ancestors: BTreeMap::new(),
        }
    }
}

/// Comparable view of the tables, used to check refresh idempotency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingSnapshot {
    pub base_instance_mapping: BTreeMap<BaseInstanceKey, PartId>,
    pub deleted_parts: BTreeSet<BaseInstanceKey>,
    pub common_ancestors: BTreeMap<InstanceId, CommonAncestor>,
}

impl<P: HierarchyPart> ReverseMapping<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BaseInstanceKey) -> Option<&PartDesign<P>> {
        self.base_instance_mapping.get(key)
    }

    pub fn counterpart_id(&self, key: &BaseInstanceKey) -> Option<PartId> {
        self.get(key).map(|d| d.id())
    }

    pub fn record(&mut self, key: BaseInstanceKey, design: PartDesign<P>) {
        tracing::trace!(key = %key, part = %design.id(), "record counterpart");
        self.base_instance_mapping.insert(key, design);
    }

    pub fn mapped_keys(&self) -> impl Iterator<Item = &BaseInstanceKey> {
        self.base_instance_mapping.keys()
    }

    // ========================================================================
    // Deleted parts
    // ========================================================================

    pub fn is_deleted(&self, key: &BaseInstanceKey) -> bool {
        self.deleted_parts.contains(key)
    }

    pub fn deleted_parts(&self) -> &BTreeSet<BaseInstanceKey> {
        &self.deleted_parts
    }

    /// Returns how many keys were newly tracked.
    pub fn track_deleted(&mut self, keys: impl IntoIterator<Item = BaseInstanceKey>) -> usize {
        keys.into_iter()
            .filter(|key| self.deleted_parts.insert(*key))
            .count()
    }

    pub fn untrack_deleted(&mut self, keys: impl IntoIterator<Item = BaseInstanceKey>) -> usize {
        keys.into_iter()
            .filter(|key| self.deleted_parts.remove(key))
            .count()
    }

    // ========================================================================
    // Common ancestors
    // ========================================================================

    pub fn common_ancestor(&self, instance: InstanceId) -> Option<CommonAncestor> {
        self.common_ancestors.get(&instance).copied()
    }

    pub fn set_common_ancestor(&mut self, instance: InstanceId, ancestor: CommonAncestor) {
        self.common_ancestors.insert(instance, ancestor);
    }

    /// Fold `parent` (the parent of a part of `instance`) into the instance's
    /// entry in `current`, a table being rebuilt for one refresh.
    pub(crate) fn merge_common_ancestor(
        current: &mut BTreeMap<InstanceId, CommonAncestor>,
        hierarchy: &Hierarchy<P>,
        instance: InstanceId,
        parent: Option<PartId>,
    ) {
        let merged = match (current.get(&instance), parent) {
            (None, None) => CommonAncestor::Root,
            (None, Some(p)) => CommonAncestor::Part(p),
            (Some(CommonAncestor::Unknown), _) => CommonAncestor::Unknown,
            (Some(CommonAncestor::Root), _) | (Some(CommonAncestor::Part(_)), None) => {
                CommonAncestor::Root
            }
            (Some(CommonAncestor::Part(recorded)), Some(p)) => {
                nearest_common_ancestor(hierarchy, *recorded, p)
            }
        };
        current.insert(instance, merged);
    }

    /// Replace the entries of every instance seen in this refresh. Instances
    /// that currently have no live part keep their last known ancestor.
    pub(crate) fn replace_common_ancestors(&mut self, current: BTreeMap<InstanceId, CommonAncestor>) {
        self.common_ancestors.extend(current);
    }

    /// Drop everything known about `instance`.
    pub fn forget_instance(&mut self, instance: InstanceId) {
        self.base_instance_mapping
            .retain(|key, _| key.instance_id != instance);
        self.deleted_parts.retain(|key| key.instance_id != instance);
        self.common_ancestors.remove(&instance);
    }

    pub fn snapshot(&self) -> MappingSnapshot {
        MappingSnapshot {
            base_instance_mapping: self
                .base_instance_mapping
                .iter()
                .map(|(k, d)| (*k, d.id()))
                .collect(),
            deleted_parts: self.deleted_parts.clone(),
            common_ancestors: self.common_ancestors.clone(),
        }
    }
}

/// `start` followed by its resolvable ancestors, and whether the walk reached
/// the root level (as opposed to stopping at an id no longer in the store).
fn chain<P: HierarchyPart>(hierarchy: &Hierarchy<P>, start: PartId) -> (Vec<PartId>, bool) {
    let mut out = Vec::new();
    let mut current = Some(start);
    while let Some(id) = current {
        if out.contains(&id) {
            return (out, false);
        }
        match hierarchy.get(id) {
            Some(design) => {
                out.push(id);
                current = design.part.parent_id();
            }
            None => return (out, false),
        }
    }
    (out, true)
}

fn nearest_common_ancestor<P: HierarchyPart>(
    hierarchy: &Hierarchy<P>,
    recorded: PartId,
    parent: PartId,
) -> CommonAncestor {
    let (recorded_chain, recorded_complete) = chain(hierarchy, recorded);
    let (parent_chain, parent_complete) = chain(hierarchy, parent);
    let recorded_set: BTreeSet<PartId> = recorded_chain.into_iter().collect();
    if let Some(shared) = parent_chain.into_iter().find(|id| recorded_set.contains(id)) {
        return CommonAncestor::Part(shared);
    }
    if recorded_complete && parent_complete {
        CommonAncestor::Root
    } else {
        CommonAncestor::Unknown
    }
}
