//! Which archetypes a document instantiates, and which instances of each.

use crate::hub::{Hub, Subscription};
use crate::mapping::{CommonAncestor, ReverseMapping};
use hierloom_model::{DocumentId, Hierarchy, HierarchyPart, InstanceId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct ArchetypeEntry {
    instance_ids: BTreeSet<InstanceId>,
    subscription: Option<Subscription>,
}

impl ArchetypeEntry {
    pub fn instance_ids(&self) -> &BTreeSet<InstanceId> {
        &self.instance_ids
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }
}

#[derive(Debug, Default)]
pub struct InstanceRegistry {
    archetypes: BTreeMap<DocumentId, ArchetypeEntry>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_ids(&self, archetype: DocumentId) -> BTreeSet<InstanceId> {
        self.archetypes
            .get(&archetype)
            .map(|e| e.instance_ids.clone())
            .unwrap_or_default()
    }

    pub fn archetype_documents(&self) -> BTreeSet<DocumentId> {
        self.archetypes.keys().copied().collect()
    }

    pub fn entry(&self, archetype: DocumentId) -> Option<&ArchetypeEntry> {
        self.archetypes.get(&archetype)
    }

    pub fn is_tracking(&self, archetype: DocumentId) -> bool {
        self.archetypes.contains_key(&archetype)
    }

    /// Archetypes currently subscribed to, for idempotency checks.
    pub fn subscribed_archetypes(&self) -> BTreeSet<DocumentId> {
        self.archetypes
            .iter()
            .filter(|(_, e)| e.is_subscribed())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Rebuild the registry and the reverse mapping from the reachable parts
    /// of `hierarchy`.
    ///
    /// Archetypes are never dropped while they still have tracked instances,
    /// even if no live part references them right now; a base-side move
    /// briefly leaves an instance empty and the subscription must survive it.
    pub fn refresh<P: HierarchyPart>(
        &mut self,
        owner: DocumentId,
        hierarchy: &Hierarchy<P>,
        mapping: &mut ReverseMapping<P>,
        hub: &Hub,
    ) {
        self.archetypes.retain(|archetype, _| {
            let live = hub.is_live(*archetype);
            if !live {
                tracing::debug!(document = %owner, archetype = %archetype, "dropping deleted archetype");
            }
            live
        });

        let mut ancestors: BTreeMap<InstanceId, CommonAncestor> = BTreeMap::new();
        for id in hierarchy.depth_first() {
            let Some(design) = hierarchy.get(id) else {
                continue;
            };
            let Some(base) = design.base else {
                continue;
            };
            if base.archetype == owner {
                tracing::warn!(document = %owner, part = %id, "part claims its own document as archetype, ignoring");
                continue;
            }
            if hub.is_live(base.archetype) {
                self.archetypes
                    .entry(base.archetype)
                    .or_default()
                    .instance_ids
                    .insert(base.instance_id);
            }
            mapping.record(base.key(), design.clone());
            ReverseMapping::merge_common_ancestor(
                &mut ancestors,
                hierarchy,
                base.instance_id,
                design.part.parent_id(),
            );
        }
        mapping.replace_common_ancestors(ancestors);

        for (archetype, entry) in &mut self.archetypes {
            if entry.subscription.is_none() {
                entry.subscription = Some(hub.subscribe(*archetype, owner));
            }
        }
    }

    /// Stop tracking `instance` of `archetype`; the archetype itself is
    /// dropped (and unsubscribed) once it has no instance left.
    pub fn forget_instance(&mut self, archetype: DocumentId, instance: InstanceId) {
        if let Some(entry) = self.archetypes.get_mut(&archetype) {
            entry.instance_ids.remove(&instance);
            if entry.instance_ids.is_empty() {
                self.archetypes.remove(&archetype);
            }
        }
    }

    /// Release every subscription.
    pub fn clear(&mut self) {
        self.archetypes.clear();
    }
}
