//! Entity hierarchies: named entities with string components, an ordered
//! child list and free-form links to other entities.

use crate::kind::DocumentKind;
use hierloom_model::{HierarchyPart, MemberPath, PartDesign, PartId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: PartId,
    pub name: String,
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// Non-structural references to other entities.
    #[serde(default)]
    pub links: Vec<PartId>,
    #[serde(default)]
    pub parent: Option<PartId>,
    #[serde(default)]
    pub children: Vec<PartId>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(PartId::new(), name)
    }

    pub fn with_id(id: PartId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            components: BTreeMap::new(),
            links: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_component(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.components.insert(key.into(), value.into());
        self
    }

    pub fn with_link(mut self, target: PartId) -> Self {
        self.links.push(target);
        self
    }

    pub fn name_path() -> MemberPath {
        MemberPath::member("name")
    }

    pub fn component_path(key: &str) -> MemberPath {
        MemberPath::member("components").then_key(key)
    }
}

impl HierarchyPart for Entity {
    fn id(&self) -> PartId {
        self.id
    }

    fn set_id(&mut self, id: PartId) {
        self.id = id;
    }

    fn parent_id(&self) -> Option<PartId> {
        self.parent
    }

    fn set_parent_id(&mut self, parent: Option<PartId>) {
        self.parent = parent;
    }

    fn child_ids(&self) -> &[PartId] {
        &self.children
    }

    fn insert_child_id(&mut self, index: usize, child: PartId) {
        self.children.insert(index, child);
    }

    fn remove_child_id(&mut self, child: PartId) -> Option<usize> {
        let index = self.children.iter().position(|&c| c == child)?;
        self.children.remove(index);
        Some(index)
    }

    fn references(&self) -> Vec<PartId> {
        self.links.clone()
    }

    fn remap_references(&mut self, map: &mut dyn FnMut(PartId) -> Option<PartId>) {
        self.links = self.links.iter().filter_map(|&link| map(link)).collect();
    }
}

/// Document kind for [`Entity`] hierarchies.
///
/// Reconciliation copies the name and the component set from the base part
/// unless the derived part overrides them. Links are left alone since they
/// address parts of the derived document.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityHierarchy;

impl DocumentKind for EntityHierarchy {
    type Part = Entity;

    fn name(&self) -> &str {
        "entity"
    }

    fn reconcile_with_base(&self, derived: &mut PartDesign<Entity>, base: &PartDesign<Entity>) {
        let overrides = &derived.overrides;
        let entity = &mut derived.part;
        if !overrides.contains(&Entity::name_path()) && entity.name != base.part.name {
            entity.name.clone_from(&base.part.name);
        }
        for (key, value) in &base.part.components {
            if !overrides.contains(&Entity::component_path(key)) {
                entity.components.insert(key.clone(), value.clone());
            }
        }
        entity.components.retain(|key, _| {
            base.part.components.contains_key(key) || overrides.contains(&Entity::component_path(key))
        });
    }
}
