//! Drives a [`Session`] of entity documents through a scenario script.

use crate::scenario::{split_path, DocumentSpec, EntitySpec, Scenario, Step};
use anyhow::{anyhow, bail, Context, Result};
use hierloom_model::{DocumentId, Hierarchy, PartId};
use hierloom_sync::{Entity, EntityHierarchy, PartEvent, Session, SessionConfig};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Replay {
    session: Session<EntityHierarchy>,
    /// Documents in declaration order.
    order: Vec<(String, DocumentId)>,
    events: Arc<Mutex<Vec<PartEvent>>>,
    /// Every part name seen so far, so removed parts still render by name.
    part_names: BTreeMap<PartId, String>,
}

impl Replay {
    pub fn new(config: SessionConfig) -> Self {
        let mut session = Session::with_config(EntityHierarchy, config);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        session.on_event(move |event| sink.lock().push(event.clone()));
        Self {
            session,
            order: Vec::new(),
            events,
            part_names: BTreeMap::new(),
        }
    }

    /// Load every document of `scenario`, then run its steps in order.
    pub fn run(&mut self, scenario: &Scenario) -> Result<()> {
        for spec in &scenario.documents {
            self.load(spec)
                .with_context(|| format!("loading document {:?}", spec.name))?;
        }
        for (n, step) in scenario.steps.iter().enumerate() {
            self.apply(step)
                .with_context(|| format!("step {} ({})", n + 1, step.label()))?;
            self.remember_names();
        }
        Ok(())
    }

    pub fn load(&mut self, spec: &DocumentSpec) -> Result<DocumentId> {
        if self.find_document(&spec.name).is_some() {
            bail!("Document {:?} is declared twice", spec.name);
        }
        let mut hierarchy = Hierarchy::new();
        for root in &spec.parts {
            let id = hierarchy.push_root(root.design())?;
            push_children(&mut hierarchy, id, &root.children)?;
        }
        let id = DocumentId::new();
        self.session.load_document(id, spec.name.clone(), hierarchy)?;
        self.order.push((spec.name.clone(), id));
        self.remember_names();
        Ok(id)
    }

    pub fn apply(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Instantiate {
                archetype,
                into,
                parent,
                index,
            } => {
                let archetype = self.document_id(archetype)?;
                let target = match self.find_document(into) {
                    Some(id) => id,
                    None => self.create(into),
                };
                let parent = self.resolve_opt(target, parent.as_deref())?;
                let index = self.index_or_end(target, parent, None, *index)?;
                let instantiation = self
                    .session
                    .instantiate(archetype, target, None, parent, index)?;
                tracing::debug!(instance = %instantiation.instance_id, "scenario instance created");
            }
            Step::Add {
                document,
                parent,
                index,
                entity,
            } => {
                let doc = self.document_id(document)?;
                let parent = self.resolve_opt(doc, parent.as_deref())?;
                let index = self.index_or_end(doc, parent, None, *index)?;
                let mut source = Hierarchy::new();
                let root = source.push_root(entity.design())?;
                push_children(&mut source, root, &entity.children)?;
                self.session.add_sub_hierarchy(doc, source, parent, index)?;
            }
            Step::Remove { document, path } => {
                let doc = self.document_id(document)?;
                let part = self.resolve(doc, path)?;
                self.session.remove_part(doc, part)?;
            }
            Step::Delete { document, paths } => {
                let doc = self.document_id(document)?;
                let parts = self.resolve_all(doc, paths)?;
                self.session.delete_parts(doc, &parts)?;
            }
            Step::Move {
                document,
                path,
                parent,
                index,
            } => {
                let doc = self.document_id(document)?;
                let part = self.resolve(doc, path)?;
                let parent = self.resolve_opt(doc, parent.as_deref())?;
                let index = self.index_or_end(doc, parent, Some(part), *index)?;
                self.session.move_part(doc, part, parent, index)?;
            }
            Step::Rename {
                document,
                path,
                name,
                mark_override,
            } => {
                let doc = self.document_id(document)?;
                let part = self.resolve(doc, path)?;
                let name = name.clone();
                let mark = *mark_override;
                self.session.update_part(doc, part, move |design| {
                    design.part.name = name;
                    if mark {
                        design.overrides.insert(Entity::name_path());
                    }
                })?;
            }
            Step::SetComponent {
                document,
                path,
                key,
                value,
                mark_override,
            } => {
                let doc = self.document_id(document)?;
                let part = self.resolve(doc, path)?;
                let mark = *mark_override;
                self.session.update_part(doc, part, |design| {
                    design.part.components.insert(key.clone(), value.clone());
                    if mark {
                        design.overrides.insert(Entity::component_path(key));
                    }
                })?;
            }
            Step::Reconcile { document } => {
                let doc = self.document_id(document)?;
                let changed = self.session.reconcile(doc)?;
                tracing::debug!(document = %doc, changed, "scenario reconcile");
            }
            Step::Unlink { document, paths } => {
                let doc = self.document_id(document)?;
                let parts = self.resolve_all(doc, paths)?;
                self.session.break_archetype_links(doc, &parts)?;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn documents(&self) -> impl Iterator<Item = (&str, &Hierarchy<Entity>)> {
        self.order.iter().filter_map(|(name, id)| {
            self.session
                .hierarchy(*id)
                .ok()
                .map(|h| (name.as_str(), h))
        })
    }

    pub fn events(&self) -> Vec<PartEvent> {
        self.events.lock().clone()
    }

    pub fn document_name(&self, id: DocumentId) -> Option<&str> {
        self.order
            .iter()
            .find(|(_, doc)| *doc == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn part_name(&self, id: PartId) -> Option<&str> {
        self.part_names.get(&id).map(String::as_str)
    }

    fn find_document(&self, name: &str) -> Option<DocumentId> {
        self.order
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    fn document_id(&self, name: &str) -> Result<DocumentId> {
        self.find_document(name)
            .ok_or_else(|| anyhow!("Unknown document {name:?}"))
    }

    fn create(&mut self, name: &str) -> DocumentId {
        let id = self.session.create_document(name);
        self.order.push((name.to_string(), id));
        id
    }

    /// Resolve a `/`-separated name path to a part id.
    fn resolve(&self, document: DocumentId, path: &str) -> Result<PartId> {
        let hierarchy = self.session.hierarchy(document)?;
        let mut siblings = hierarchy.root_ids();
        let mut found = None;
        for segment in split_path(path) {
            let id = siblings
                .iter()
                .copied()
                .find(|id| hierarchy.get(*id).is_some_and(|d| d.part.name == segment))
                .ok_or_else(|| anyhow!("No part at {path:?} (no {segment:?} at that level)"))?;
            siblings = hierarchy
                .get(id)
                .map(|d| d.part.children.as_slice())
                .unwrap_or(&[]);
            found = Some(id);
        }
        found.ok_or_else(|| anyhow!("Empty part path"))
    }

    fn resolve_opt(&self, document: DocumentId, path: Option<&str>) -> Result<Option<PartId>> {
        path.map(|p| self.resolve(document, p)).transpose()
    }

    fn resolve_all(&self, document: DocumentId, paths: &[String]) -> Result<Vec<PartId>> {
        paths.iter().map(|p| self.resolve(document, p)).collect()
    }

    /// `index`, or the end of `parent`'s child list (not counting `moving`).
    fn index_or_end(
        &self,
        document: DocumentId,
        parent: Option<PartId>,
        moving: Option<PartId>,
        index: Option<usize>,
    ) -> Result<usize> {
        if let Some(index) = index {
            return Ok(index);
        }
        let siblings = self.session.hierarchy(document)?.siblings(parent);
        let own = moving.is_some_and(|m| siblings.contains(&m));
        Ok(siblings.len() - usize::from(own))
    }

    fn remember_names(&mut self) {
        for (_, id) in &self.order {
            if let Ok(hierarchy) = self.session.hierarchy(*id) {
                for design in hierarchy.designs() {
                    self.part_names
                        .insert(design.part.id, design.part.name.clone());
                }
            }
        }
    }
}

fn push_children(
    hierarchy: &mut Hierarchy<Entity>,
    parent: PartId,
    children: &[EntitySpec],
) -> Result<()> {
    for child in children {
        let id = hierarchy.push_child(parent, child.design())?;
        push_children(hierarchy, id, &child.children)?;
    }
    Ok(())
}
