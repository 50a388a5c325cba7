//! One composite document and the bookkeeping that ties it to its
//! archetypes.
//!
//! All mutation is `pub(crate)`: it goes through [`crate::Session`], which
//! dispatches the resulting events to dependent documents.

use crate::error::{Result, SyncError};
use crate::event::{PartChange, PartEvent};
use crate::hub::Hub;
use crate::kind::DocumentKind;
use crate::mapping::ReverseMapping;
use crate::propagation::PropagationFlag;
use crate::registry::InstanceRegistry;
use hierloom_model::{
    BaseInstanceKey, DocumentId, Hierarchy, HierarchyError, HierarchyPart, InstanceId,
    PartDesign, PartId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub struct Document<K: DocumentKind> {
    pub(crate) id: DocumentId,
    pub(crate) name: String,
    pub(crate) kind: Arc<K>,
    pub(crate) hierarchy: Hierarchy<K::Part>,
    pub(crate) registry: InstanceRegistry,
    pub(crate) mapping: ReverseMapping<K::Part>,
    pub(crate) propagation: PropagationFlag,
    pub(crate) hub: Hub,
    pub(crate) pending: Vec<PartEvent>,
}

impl<K: DocumentKind> fmt::Debug for Document<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind.name())
            .field("parts", &self.hierarchy.len())
            .field("archetypes", &self.registry.archetype_documents())
            .finish()
    }
}

impl<K: DocumentKind> Document<K> {
    pub(crate) fn new(
        id: DocumentId,
        name: String,
        kind: Arc<K>,
        hierarchy: Hierarchy<K::Part>,
        hub: Hub,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            hierarchy,
            registry: InstanceRegistry::new(),
            mapping: ReverseMapping::new(),
            propagation: PropagationFlag::default(),
            hub,
            pending: Vec::new(),
        }
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn hierarchy(&self) -> &Hierarchy<K::Part> {
        &self.hierarchy
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn mapping(&self) -> &ReverseMapping<K::Part> {
        &self.mapping
    }

    pub fn instance_ids(&self, archetype: DocumentId) -> BTreeSet<InstanceId> {
        self.registry.instance_ids(archetype)
    }

    pub fn archetype_documents(&self) -> BTreeSet<DocumentId> {
        self.registry.archetype_documents()
    }

    /// True while an archetype change is being applied to this document.
    pub fn is_updating_from_base(&self) -> bool {
        self.propagation.is_active()
    }

    /// Every archetype referenced by a reachable part, live or not.
    pub fn referenced_archetypes(&self) -> BTreeSet<DocumentId> {
        self.hierarchy
            .depth_first()
            .into_iter()
            .filter_map(|id| self.hierarchy.get(id).and_then(|d| d.base))
            .map(|base| base.archetype)
            .filter(|archetype| *archetype != self.id)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.hierarchy.validate().map_err(SyncError::from)
    }

    pub(crate) fn take_events(&mut self) -> Vec<PartEvent> {
        std::mem::take(&mut self.pending)
    }

    fn emit(&mut self, part: PartId, parent: Option<PartId>, index: usize, change: PartChange) {
        let event = PartEvent {
            document: self.id,
            part,
            parent,
            index,
            change,
            from_base: self.propagation.is_active(),
        };
        tracing::trace!(%event, "queue part event");
        self.pending.push(event);
    }

    // ========================================================================
    // Registry
    // ========================================================================

    pub(crate) fn refresh_instance_registry(&mut self) {
        self.registry
            .refresh(self.id, &self.hierarchy, &mut self.mapping, &self.hub);
    }

    /// Record as user-deleted every `(archetype part, instance)` pair that
    /// exists in a tracked archetype but has no counterpart here.
    pub(crate) fn finalize_initialization(
        &mut self,
        documents: &BTreeMap<DocumentId, Document<K>>,
    ) -> usize {
        self.registry
            .archetype_documents()
            .into_iter()
            .filter_map(|archetype_id| documents.get(&archetype_id))
            .map(|archetype| self.finalize_against_archetype(archetype))
            .sum()
    }

    /// [`Self::finalize_initialization`] restricted to one archetype, for an
    /// archetype that is loaded after this document.
    pub(crate) fn finalize_against_archetype(&mut self, archetype: &Document<K>) -> usize {
        let instances = self.registry.instance_ids(archetype.id);
        let mut missing = Vec::new();
        for base_part in archetype.hierarchy.ids() {
            for &instance in &instances {
                let key = BaseInstanceKey::new(base_part, instance);
                if self.mapping.get(&key).is_none() {
                    missing.push(key);
                }
            }
        }
        let tracked = self.mapping.track_deleted(missing);
        if tracked > 0 {
            tracing::debug!(document = %self.id, archetype = %archetype.id, tracked, "tracked parts missing from instances");
        }
        tracked
    }

    pub(crate) fn track_deleted_instance_parts(
        &mut self,
        keys: impl IntoIterator<Item = BaseInstanceKey>,
    ) -> usize {
        self.mapping.track_deleted(keys)
    }

    pub(crate) fn untrack_deleted_instance_parts(
        &mut self,
        keys: impl IntoIterator<Item = BaseInstanceKey>,
    ) -> usize {
        self.mapping.untrack_deleted(keys)
    }

    // ========================================================================
    // Structural operations
    // ========================================================================

    /// Move `root` (and its descendants) out of `source` and attach it here.
    pub(crate) fn add_part_to_document(
        &mut self,
        source: &mut Hierarchy<K::Part>,
        root: PartId,
        parent: Option<PartId>,
        index: usize,
    ) -> Result<Vec<PartId>> {
        let inserted = self.insert_without_refresh(source, root, parent, index)?;
        self.refresh_instance_registry();
        Ok(inserted)
    }

    pub(crate) fn insert_without_refresh(
        &mut self,
        source: &mut Hierarchy<K::Part>,
        root: PartId,
        parent: Option<PartId>,
        index: usize,
    ) -> Result<Vec<PartId>> {
        let inserted = self.hierarchy.add_part(source, root, parent, index)?;
        tracing::debug!(document = %self.id, part = %root, parts = inserted.len(), "part added");
        self.emit(root, parent, index, PartChange::Added);
        Ok(inserted)
    }

    pub(crate) fn remove_part_from_document(&mut self, id: PartId) -> Result<Hierarchy<K::Part>> {
        let removed = self.remove_without_refresh(id)?;
        self.refresh_instance_registry();
        Ok(removed)
    }

    pub(crate) fn remove_without_refresh(&mut self, id: PartId) -> Result<Hierarchy<K::Part>> {
        let parent = self.hierarchy.parent_id(id);
        let index = self
            .hierarchy
            .index_of(id)
            .ok_or(HierarchyError::UnknownPart(id))?;
        let removed = self.hierarchy.remove_part(id)?;
        // The last state of a removed counterpart is what a later move reuses.
        for design in removed.designs() {
            if let Some(base) = design.base {
                self.mapping.record(base.key(), design.clone());
            }
        }
        tracing::debug!(document = %self.id, part = %id, parts = removed.len(), "part removed");
        self.emit(id, parent, index, PartChange::Removed);
        Ok(removed)
    }

    /// Delete `ids` and all their descendants, leaves first. Counterparts of
    /// archetype parts are remembered as user-deleted and references to every
    /// deleted part are cleared. Returns the removal order.
    pub(crate) fn delete_parts(&mut self, ids: &[PartId]) -> Result<Vec<PartId>> {
        if let Some(&missing) = ids.iter().find(|&&id| !self.hierarchy.contains(id)) {
            return Err(HierarchyError::UnknownPart(missing).into());
        }

        let mut order = Vec::new();
        let mut deleted_keys = Vec::new();
        let mut stack: Vec<PartId> = ids.iter().rev().copied().collect();
        while let Some(&top) = stack.last() {
            if !self.hierarchy.contains(top) {
                stack.pop();
                continue;
            }
            let children = self.hierarchy.enumerate_child_parts(top, false);
            if !children.is_empty() {
                stack.extend(children.into_iter().rev());
                continue;
            }
            stack.pop();
            let removed = self.remove_without_refresh(top)?;
            if let Some(base) = removed.get(top).and_then(|d| d.base) {
                deleted_keys.push(base.key());
            }
            order.push(top);
        }

        let tracked = self.mapping.track_deleted(deleted_keys);
        let targets: BTreeSet<PartId> = order.iter().copied().collect();
        let cleared = self.hierarchy.clear_references_to(&targets);
        tracing::debug!(
            document = %self.id,
            deleted = order.len(),
            tracked,
            cleared,
            "parts deleted"
        );
        self.refresh_instance_registry();
        Ok(order)
    }

    /// Relocate `id` with its subtree: a removal and an addition in the same
    /// batch. `index` is interpreted after the part has left its old slot.
    pub(crate) fn move_part(
        &mut self,
        id: PartId,
        new_parent: Option<PartId>,
        index: usize,
    ) -> Result<()> {
        if !self.hierarchy.contains(id) {
            return Err(HierarchyError::UnknownPart(id).into());
        }
        if let Some(target) = new_parent {
            if !self.hierarchy.contains(target) {
                return Err(HierarchyError::UnknownPart(target).into());
            }
            if target == id || self.hierarchy.is_descendant_of(target, id) {
                return Err(HierarchyError::CyclicMove { part: id, target }.into());
            }
        }
        let siblings = self.hierarchy.siblings(new_parent);
        let len = siblings.len() - usize::from(siblings.contains(&id));
        if index > len {
            return Err(HierarchyError::IndexOutOfRange {
                parent: new_parent,
                index,
                len,
            }
            .into());
        }

        let old_parent = self.hierarchy.parent_id(id);
        let old_index = self
            .hierarchy
            .index_of(id)
            .ok_or(HierarchyError::UnknownPart(id))?;
        let mut removed = self.remove_without_refresh(id)?;
        if let Err(err) = self.hierarchy.check_insertion_point(new_parent, index) {
            // Bounded child slots can still refuse; put the part back silently.
            self.pending.pop();
            self.hierarchy.add_part(&mut removed, id, old_parent, old_index)?;
            return Err(err.into());
        }
        self.insert_without_refresh(&mut removed, id, new_parent, index)?;
        self.refresh_instance_registry();
        Ok(())
    }

    /// Apply a payload/override edit. Identity and structure are off limits;
    /// an edit that touches them is rolled back.
    pub(crate) fn update_part<F>(&mut self, id: PartId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut PartDesign<K::Part>),
    {
        let design = self
            .hierarchy
            .get_mut(id)
            .ok_or(HierarchyError::UnknownPart(id))?;
        let before = design.clone();
        edit(&mut *design);
        let reason = if design.part.id() != id {
            Some("the part id cannot change")
        } else if design.part.parent_id() != before.part.parent_id() {
            Some("the parent link cannot change, move the part instead")
        } else if design.part.child_ids() != before.part.child_ids() {
            Some("child links cannot change, add or remove parts instead")
        } else {
            None
        };
        if let Some(reason) = reason {
            *design = before;
            return Err(SyncError::InvalidEdit {
                part: id,
                reason: reason.to_string(),
            });
        }
        self.refresh_instance_registry();
        Ok(())
    }

    /// Clear the base link of `ids` so they stop receiving archetype edits.
    /// Instances left without any linked part are forgotten entirely.
    pub(crate) fn break_archetype_links(&mut self, ids: &[PartId]) -> Result<usize> {
        if let Some(&missing) = ids.iter().find(|&&id| !self.hierarchy.contains(id)) {
            return Err(HierarchyError::UnknownPart(missing).into());
        }
        let mut touched: BTreeSet<(DocumentId, InstanceId)> = BTreeSet::new();
        for &id in ids {
            if let Some(design) = self.hierarchy.get_mut(id) {
                if let Some(base) = design.base.take() {
                    touched.insert((base.archetype, base.instance_id));
                }
            }
        }
        self.refresh_instance_registry();

        for (archetype, instance) in &touched {
            let still_linked = self
                .hierarchy
                .designs()
                .any(|d| d.base.map(|b| b.instance_id) == Some(*instance));
            if !still_linked {
                tracing::debug!(document = %self.id, instance = %instance, "instance fully unlinked");
                self.registry.forget_instance(*archetype, *instance);
                self.mapping.forget_instance(*instance);
            }
        }
        Ok(touched.len())
    }

    pub(crate) fn clear_references_to_objects(&mut self, ids: &BTreeSet<PartId>) -> usize {
        self.hierarchy.clear_references_to(ids)
    }

    /// Run the kind's override reconciliation for every linked part whose
    /// archetype part is still resolvable.
    pub(crate) fn reconcile_with_base(&mut self, documents: &BTreeMap<DocumentId, Document<K>>) -> usize {
        let mut reconciled = 0;
        for id in self.hierarchy.depth_first() {
            let Some(base) = self.hierarchy.get(id).and_then(|d| d.base) else {
                continue;
            };
            let Some(base_design) = documents
                .get(&base.archetype)
                .and_then(|archetype| archetype.hierarchy.get(base.base_part_id))
            else {
                continue;
            };
            if let Some(design) = self.hierarchy.get_mut(id) {
                self.kind.reconcile_with_base(design, base_design);
                reconciled += 1;
            }
        }
        tracing::trace!(document = %self.id, reconciled, "reconciled with base");
        reconciled
    }
}
