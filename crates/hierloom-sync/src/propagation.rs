//! Applying archetype changes to a derived document.

use crate::document::Document;
use crate::error::{Result, SyncError};
use crate::event::{PartChange, PartEvent};
use crate::kind::{DocumentKind, NewBasePart};
use crate::resolver::{find_best_insert_index, live_counterpart};
use hierloom_model::{
    clone_sub_hierarchy, BaseInstanceKey, BasePart, DocumentId, PartId, SubHierarchyCloneFlags,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// "Updating from base" marker shared with collaborators that must not
/// record propagated changes as user edits.
#[derive(Debug, Clone, Default)]
pub struct PropagationFlag(Arc<AtomicBool>);

impl PropagationFlag {
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the flag until the returned scope is dropped.
    pub fn begin(&self) -> PropagationScope {
        let previous = self.0.swap(true, Ordering::AcqRel);
        PropagationScope {
            flag: Arc::clone(&self.0),
            previous,
        }
    }
}

#[must_use = "the flag is lowered as soon as the scope is dropped"]
#[derive(Debug)]
pub struct PropagationScope {
    flag: Arc<AtomicBool>,
    previous: bool,
}

impl Drop for PropagationScope {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

impl<K: DocumentKind> Document<K> {
    pub(crate) fn handle_archetype_event(
        &mut self,
        documents: &BTreeMap<DocumentId, Document<K>>,
        event: &PartEvent,
        reconcile: bool,
    ) -> Result<usize> {
        match event.change {
            PartChange::Added => {
                self.on_archetype_part_added(documents, event.document, event.part, reconcile)
            }
            PartChange::Removed => self.on_archetype_part_removed(event.document, event.part),
        }
    }

    /// Clone `part_id` into every tracked instance of `archetype_id` that
    /// wants it. Returns the number of instances that received a clone.
    pub(crate) fn on_archetype_part_added(
        &mut self,
        documents: &BTreeMap<DocumentId, Document<K>>,
        archetype_id: DocumentId,
        part_id: PartId,
        reconcile: bool,
    ) -> Result<usize> {
        let _scope = self.propagation.begin();

        if !self.registry.is_tracking(archetype_id) {
            return Ok(0);
        }
        let Some(archetype) = documents.get(&archetype_id) else {
            tracing::debug!(document = %self.id, archetype = %archetype_id, "archetype not loaded, skipping");
            return Ok(0);
        };
        let Some(new_part) = archetype.hierarchy.get(part_id) else {
            tracing::debug!(archetype = %archetype_id, part = %part_id, "added part already gone from archetype");
            return Ok(0);
        };
        let parent = archetype.hierarchy.parent(part_id);

        let mut added = 0;
        for instance in self.registry.instance_ids(archetype_id) {
            let key = BaseInstanceKey::new(part_id, instance);
            let candidate = NewBasePart {
                archetype: archetype_id,
                part: new_part,
                parent,
                instance_id: instance,
                deleted_in_instance: self.mapping.is_deleted(&key),
            };
            if !self.kind.should_add_new_part_from_base(&candidate) {
                tracing::debug!(document = %self.id, instance = %instance, part = %part_id, "part declined by instance");
                continue;
            }
            if live_counterpart(&self.hierarchy, &self.mapping, archetype_id, part_id, instance).is_some() {
                tracing::debug!(document = %self.id, instance = %instance, part = %part_id, "counterpart already present");
                continue;
            }
            let Some(point) = find_best_insert_index(
                &self.hierarchy,
                &self.mapping,
                archetype_id,
                &archetype.hierarchy,
                part_id,
                instance,
            ) else {
                continue;
            };

            let flags = SubHierarchyCloneFlags::GENERATE_NEW_IDS | SubHierarchyCloneFlags::REMOVE_OVERRIDES;
            let mut cloned = clone_sub_hierarchy(&archetype.hierarchy, &[part_id], flags)?;
            for (&old, &new) in &cloned.id_remapping {
                let design = cloned.hierarchy.get_mut(new).ok_or_else(|| {
                    SyncError::Invariant(format!("clone of {old} is missing from the cloned hierarchy"))
                })?;
                design.base = Some(BasePart::new(archetype_id, old, instance));
            }

            let mut root = cloned.id_remapping.get(&part_id).copied().ok_or_else(|| {
                SyncError::Invariant(format!("clone of {part_id} produced no root"))
            })?;
            let pairs: Vec<(PartId, PartId)> = cloned.id_remapping.iter().map(|(o, n)| (*o, *n)).collect();
            // Descendants the user deleted in this instance stay deleted.
            for &(old, new) in &pairs {
                if new == root || !cloned.hierarchy.contains(new) {
                    continue;
                }
                if self.mapping.is_deleted(&BaseInstanceKey::new(old, instance)) {
                    cloned.hierarchy.remove_part(new)?;
                    tracing::debug!(document = %self.id, instance = %instance, part = %old, "skipping deleted descendant");
                }
            }
            for (old, new) in pairs {
                let key = BaseInstanceKey::new(old, instance);
                if self.mapping.is_deleted(&key) || !cloned.hierarchy.contains(new) {
                    continue;
                }
                let Some(existing) = self.mapping.get(&key) else {
                    continue;
                };
                let existing_id = existing.id();
                if self.hierarchy.contains(existing_id) || cloned.hierarchy.contains(existing_id) {
                    continue;
                }
                // Removed and re-added on the archetype side: keep the old
                // derived identity.
                let mut reused = existing.clone();
                reused.base = Some(BasePart::new(archetype_id, old, instance));
                cloned.hierarchy.replace_part(new, reused).map_err(|err| {
                    SyncError::Invariant(format!("reusing {existing_id} in place of {new} failed: {err}"))
                })?;
                tracing::debug!(document = %self.id, part = %existing_id, base = %old, "reusing moved part");
                if new == root {
                    root = existing_id;
                }
            }

            self.insert_without_refresh(&mut cloned.hierarchy, root, point.parent, point.index)
                .map_err(|err| {
                    SyncError::Invariant(format!("inserting propagated part {root} failed: {err}"))
                })?;
            added += 1;
        }

        self.refresh_instance_registry();
        if reconcile {
            self.reconcile_with_base(documents);
        }
        Ok(added)
    }

    /// Remove every part cloned from `part_id`, whatever its instance.
    pub(crate) fn on_archetype_part_removed(
        &mut self,
        archetype_id: DocumentId,
        part_id: PartId,
    ) -> Result<usize> {
        let _scope = self.propagation.begin();

        let targets: Vec<PartId> = self
            .hierarchy
            .depth_first()
            .into_iter()
            .filter(|&id| {
                self.hierarchy.get(id).and_then(|d| d.base).map_or(false, |b| {
                    b.archetype == archetype_id && b.base_part_id == part_id
                })
            })
            .collect();
        let mut removed = 0;
        for id in targets {
            // An earlier target may have been an ancestor.
            if !self.hierarchy.contains(id) {
                continue;
            }
            self.remove_without_refresh(id)?;
            removed += 1;
        }
        if removed > 0 {
            self.refresh_instance_registry();
        }
        Ok(removed)
    }
}
