//! The set of loaded documents and the event loop between them.

use crate::config::SessionConfig;
use crate::document::Document;
use crate::error::{Result, SyncError};
use crate::event::PartEvent;
use crate::hub::Hub;
use crate::kind::DocumentKind;
use hierloom_model::{
    clone_sub_hierarchy, BaseInstanceKey, BasePart, ClonedHierarchy, DocumentId, Hierarchy,
    IdRemapping, InstanceId, PartDesign, PartId, SubHierarchyCloneFlags,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

pub type PartEventHandler = Box<dyn Fn(&PartEvent) + Send + Sync>;

/// Result of [`Session::instantiate`].
#[derive(Debug, Clone)]
pub struct Instantiation {
    pub instance_id: InstanceId,
    /// Roots of the new instance in the target document, in order.
    pub root_ids: Vec<PartId>,
    /// Archetype part id -> instance part id.
    pub id_remapping: IdRemapping,
}

pub struct Session<K: DocumentKind> {
    config: SessionConfig,
    kind: Arc<K>,
    hub: Hub,
    documents: BTreeMap<DocumentId, Document<K>>,
    handlers: Vec<PartEventHandler>,
}

impl<K: DocumentKind> Session<K> {
    pub fn new(kind: K) -> Self {
        Self::with_config(kind, SessionConfig::default())
    }

    pub fn with_config(kind: K, config: SessionConfig) -> Self {
        Self {
            config,
            kind: Arc::new(kind),
            hub: Hub::new(),
            documents: BTreeMap::new(),
            handlers: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Observe every part event, in dispatch order.
    pub fn on_event(&mut self, handler: impl Fn(&PartEvent) + Send + Sync + 'static) {
        self.handlers.push(Box::new(handler));
    }

    // ========================================================================
    // Documents
    // ========================================================================

    pub fn create_document(&mut self, name: impl Into<String>) -> DocumentId {
        let id = DocumentId::new();
        self.hub.register(id);
        let document = Document::new(
            id,
            name.into(),
            Arc::clone(&self.kind),
            Hierarchy::new(),
            self.hub.clone(),
        );
        self.documents.insert(id, document);
        id
    }

    /// Bring an existing hierarchy into the session under `id`.
    pub fn load_document(
        &mut self,
        id: DocumentId,
        name: impl Into<String>,
        hierarchy: Hierarchy<K::Part>,
    ) -> Result<()> {
        if self.documents.contains_key(&id) {
            return Err(SyncError::DuplicateDocument(id));
        }
        hierarchy.validate()?;

        let mut document = Document::new(
            id,
            name.into(),
            Arc::clone(&self.kind),
            hierarchy,
            self.hub.clone(),
        );
        for archetype in document.referenced_archetypes() {
            if self.derives_from(archetype, id) {
                return Err(SyncError::CyclicArchetype {
                    archetype,
                    target: id,
                });
            }
        }

        self.hub.register(id);
        document.refresh_instance_registry();
        if self.config.finalize_on_load {
            document.finalize_initialization(&self.documents);
        }
        tracing::info!(document = %id, name = %document.name, parts = document.hierarchy.len(), "document loaded");
        self.documents.insert(id, document);

        // Documents loaded earlier may have been waiting for this archetype.
        let waiting: Vec<DocumentId> = self
            .documents
            .values()
            .filter(|other| other.id != id && other.referenced_archetypes().contains(&id))
            .map(|other| other.id)
            .collect();
        for dependent in waiting {
            let Some(mut other) = self.documents.remove(&dependent) else {
                continue;
            };
            let was_tracking = other.registry.is_tracking(id);
            other.refresh_instance_registry();
            if self.config.finalize_on_load && !was_tracking && other.registry.is_tracking(id) {
                if let Some(archetype) = self.documents.get(&id) {
                    other.finalize_against_archetype(archetype);
                }
            }
            self.documents.insert(dependent, other);
        }
        Ok(())
    }

    /// Drop a document and its subscriptions. Dependents stop tracking it on
    /// their next refresh, which happens right away.
    pub fn unload_document(&mut self, id: DocumentId) -> Result<Hierarchy<K::Part>> {
        let mut document = self
            .documents
            .remove(&id)
            .ok_or(SyncError::UnknownDocument(id))?;
        self.hub.forget(id);
        document.registry.clear();
        self.refresh_dependents_of(id);
        tracing::info!(document = %id, "document unloaded");
        Ok(std::mem::take(&mut document.hierarchy))
    }

    /// Keep the document loaded but stop propagating from it.
    pub fn mark_deleted(&mut self, id: DocumentId) -> Result<()> {
        if !self.documents.contains_key(&id) {
            return Err(SyncError::UnknownDocument(id));
        }
        self.hub.mark_deleted(id);
        self.refresh_dependents_of(id);
        Ok(())
    }

    fn refresh_dependents_of(&mut self, id: DocumentId) {
        for other in self.documents.values_mut() {
            if other.registry.is_tracking(id) {
                other.refresh_instance_registry();
            }
        }
    }

    pub fn document(&self, id: DocumentId) -> Option<&Document<K>> {
        self.documents.get(&id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document<K>> {
        self.documents.values()
    }

    pub fn hierarchy(&self, id: DocumentId) -> Result<&Hierarchy<K::Part>> {
        self.document_ref(id).map(|d| &d.hierarchy)
    }

    fn document_ref(&self, id: DocumentId) -> Result<&Document<K>> {
        self.documents.get(&id).ok_or(SyncError::UnknownDocument(id))
    }

    pub fn instance_ids(&self, document: DocumentId, archetype: DocumentId) -> Result<BTreeSet<InstanceId>> {
        Ok(self.document_ref(document)?.instance_ids(archetype))
    }

    pub fn archetype_documents(&self, document: DocumentId) -> Result<BTreeSet<DocumentId>> {
        Ok(self.document_ref(document)?.archetype_documents())
    }

    /// Recompute the instance registry and reverse mapping of `document`.
    pub fn refresh_instance_registry(&mut self, document: DocumentId) -> Result<()> {
        self.documents
            .get_mut(&document)
            .ok_or(SyncError::UnknownDocument(document))?
            .refresh_instance_registry();
        Ok(())
    }

    pub fn validate(&self, document: DocumentId) -> Result<()> {
        self.document_ref(document)?.validate()
    }

    /// Whether `document` is `ancestor` or reaches it through base links.
    pub fn derives_from(&self, document: DocumentId, ancestor: DocumentId) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([document]);
        while let Some(current) = queue.pop_front() {
            if current == ancestor {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(doc) = self.documents.get(&current) {
                queue.extend(doc.referenced_archetypes());
            }
        }
        false
    }

    // ========================================================================
    // User operations
    // ========================================================================

    /// Add a single new part.
    pub fn add_part(
        &mut self,
        document: DocumentId,
        design: PartDesign<K::Part>,
        parent: Option<PartId>,
        index: usize,
    ) -> Result<PartId> {
        let mut source = Hierarchy::new();
        let id = source.push_root(design)?;
        self.mutate(document, |doc, _| {
            doc.add_part_to_document(&mut source, id, parent, index)?;
            Ok(id)
        })
    }

    /// Add every root of a detached forest at consecutive indices.
    pub fn add_sub_hierarchy(
        &mut self,
        document: DocumentId,
        mut source: Hierarchy<K::Part>,
        parent: Option<PartId>,
        index: usize,
    ) -> Result<Vec<PartId>> {
        source.validate()?;
        let roots = source.root_ids().to_vec();
        self.hierarchy(document)?
            .check_insertion_points(parent, index, roots.len())?;
        self.mutate(document, |doc, _| {
            for (offset, &root) in roots.iter().enumerate() {
                doc.insert_without_refresh(&mut source, root, parent, index + offset)?;
            }
            doc.refresh_instance_registry();
            Ok(roots.clone())
        })
    }

    pub fn remove_part(&mut self, document: DocumentId, part: PartId) -> Result<Hierarchy<K::Part>> {
        self.mutate(document, |doc, _| doc.remove_part_from_document(part))
    }

    pub fn delete_parts(&mut self, document: DocumentId, parts: &[PartId]) -> Result<Vec<PartId>> {
        self.mutate(document, |doc, _| doc.delete_parts(parts))
    }

    pub fn move_part(
        &mut self,
        document: DocumentId,
        part: PartId,
        new_parent: Option<PartId>,
        index: usize,
    ) -> Result<()> {
        self.mutate(document, |doc, _| doc.move_part(part, new_parent, index))
    }

    /// Edit a part's payload or overrides. Dependents are reconciled when the
    /// session is configured to do so.
    pub fn update_part<F>(&mut self, document: DocumentId, part: PartId, edit: F) -> Result<()>
    where
        F: FnOnce(&mut PartDesign<K::Part>),
    {
        self.mutate(document, |doc, _| doc.update_part(part, edit))?;
        if self.config.reconcile_after_propagation {
            self.reconcile_dependents(document);
        }
        Ok(())
    }

    pub fn break_archetype_links(&mut self, document: DocumentId, parts: &[PartId]) -> Result<usize> {
        self.mutate(document, |doc, _| doc.break_archetype_links(parts))
    }

    pub fn track_deleted_instance_parts(
        &mut self,
        document: DocumentId,
        keys: impl IntoIterator<Item = BaseInstanceKey>,
    ) -> Result<usize> {
        self.mutate(document, |doc, _| Ok(doc.track_deleted_instance_parts(keys)))
    }

    pub fn untrack_deleted_instance_parts(
        &mut self,
        document: DocumentId,
        keys: impl IntoIterator<Item = BaseInstanceKey>,
    ) -> Result<usize> {
        self.mutate(document, |doc, _| Ok(doc.untrack_deleted_instance_parts(keys)))
    }

    pub fn clear_references_to_objects(
        &mut self,
        document: DocumentId,
        ids: &BTreeSet<PartId>,
    ) -> Result<usize> {
        self.mutate(document, |doc, _| Ok(doc.clear_references_to_objects(ids)))
    }

    /// Detached clone of part of a document, e.g. for copy/paste.
    pub fn clone_sub_hierarchy(
        &self,
        document: DocumentId,
        roots: &[PartId],
        flags: SubHierarchyCloneFlags,
    ) -> Result<ClonedHierarchy<K::Part>> {
        Ok(clone_sub_hierarchy(self.hierarchy(document)?, roots, flags)?)
    }

    /// Reconcile `document` against all its archetypes.
    pub fn reconcile(&mut self, document: DocumentId) -> Result<usize> {
        self.mutate(document, |doc, others| Ok(doc.reconcile_with_base(others)))
    }

    /// Reconcile every document that derives from `archetype`, nearest first.
    fn reconcile_dependents(&mut self, archetype: DocumentId) {
        let mut queue = VecDeque::from([archetype]);
        let mut seen = BTreeSet::from([archetype]);
        while let Some(current) = queue.pop_front() {
            for subscriber in self.hub.subscribers_of(current) {
                if !seen.insert(subscriber) {
                    continue;
                }
                if let Some(mut doc) = self.documents.remove(&subscriber) {
                    doc.reconcile_with_base(&self.documents);
                    self.documents.insert(subscriber, doc);
                }
                queue.push_back(subscriber);
            }
        }
    }

    /// Clone `archetype` (all of it, or the sub-hierarchies at `roots`) into
    /// `target` as a new instance, inserting the roots at consecutive indices
    /// starting at `index`.
    pub fn instantiate(
        &mut self,
        archetype: DocumentId,
        target: DocumentId,
        roots: Option<&[PartId]>,
        parent: Option<PartId>,
        index: usize,
    ) -> Result<Instantiation> {
        if archetype == target || self.derives_from(archetype, target) {
            return Err(SyncError::CyclicArchetype { archetype, target });
        }
        let source = self.hierarchy(archetype)?;
        let roots: Vec<PartId> = match roots {
            Some(roots) => roots.to_vec(),
            None => source.root_ids().to_vec(),
        };
        if roots.is_empty() {
            return Err(SyncError::EmptyInstantiation(archetype));
        }
        self.hierarchy(target)?
            .check_insertion_points(parent, index, roots.len())?;

        let flags = SubHierarchyCloneFlags::GENERATE_NEW_IDS | SubHierarchyCloneFlags::REMOVE_OVERRIDES;
        let mut cloned = clone_sub_hierarchy(source, &roots, flags)?;
        let instance_id = InstanceId::new();
        for (&old, &new) in &cloned.id_remapping {
            if let Some(design) = cloned.hierarchy.get_mut(new) {
                design.base = Some(BasePart::new(archetype, old, instance_id));
            }
        }
        let root_ids = cloned.hierarchy.root_ids().to_vec();
        let id_remapping = cloned.id_remapping.clone();

        self.mutate(target, |doc, _| {
            for (offset, &root) in root_ids.iter().enumerate() {
                doc.insert_without_refresh(&mut cloned.hierarchy, root, parent, index + offset)?;
            }
            doc.refresh_instance_registry();
            Ok(())
        })?;
        tracing::info!(
            archetype = %archetype,
            target = %target,
            instance = %instance_id,
            parts = id_remapping.len(),
            "archetype instantiated"
        );
        Ok(Instantiation {
            instance_id,
            root_ids,
            id_remapping,
        })
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Run `op` on `document` with the other documents readable, then deliver
    /// whatever events it produced.
    fn mutate<T, F>(&mut self, document: DocumentId, op: F) -> Result<T>
    where
        F: FnOnce(&mut Document<K>, &BTreeMap<DocumentId, Document<K>>) -> Result<T>,
    {
        let mut doc = self
            .documents
            .remove(&document)
            .ok_or(SyncError::UnknownDocument(document))?;
        let outcome = op(&mut doc, &self.documents);
        let events = doc.take_events();
        let validation = self.post_mutation_check(&doc);
        self.documents.insert(document, doc);

        self.dispatch(events)?;
        let value = outcome?;
        validation?;
        Ok(value)
    }

    fn post_mutation_check(&self, doc: &Document<K>) -> Result<()> {
        if self.config.validate_after_mutation {
            doc.validate()
                .map_err(|err| SyncError::Invariant(format!("document {} is corrupt: {err}", doc.id)))
        } else {
            Ok(())
        }
    }

    /// Deliver events first-in first-out. A derived document handling an
    /// event queues its own events behind the current ones, which is how
    /// changes cascade through several levels of derivation.
    fn dispatch(&mut self, events: Vec<PartEvent>) -> Result<()> {
        let mut queue: VecDeque<PartEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            for handler in &self.handlers {
                handler(&event);
            }
            for subscriber in self.hub.subscribers_of(event.document) {
                if subscriber == event.document {
                    tracing::warn!(document = %subscriber, "document subscribed to itself, ignoring");
                    continue;
                }
                let Some(mut doc) = self.documents.remove(&subscriber) else {
                    tracing::debug!(document = %subscriber, "subscriber not loaded");
                    continue;
                };
                let outcome = doc.handle_archetype_event(
                    &self.documents,
                    &event,
                    self.config.reconcile_after_propagation,
                );
                queue.extend(doc.take_events());
                let validation = self.post_mutation_check(&doc);
                self.documents.insert(subscriber, doc);
                outcome?;
                validation?;
            }
        }
        Ok(())
    }
}
