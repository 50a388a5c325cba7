//! The document adapter: how a concrete part type exposes its structure.

use crate::base::BasePart;
use crate::ids::PartId;
use crate::overrides::OverrideSet;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A part payload that lives in a [`crate::Hierarchy`].
///
/// "Child" means different things for different document kinds (an entity
/// has an ordered child list, a slot holds at most one child, ...), so the
/// structural primitives are supplied by the part type itself. The parent
/// link and the child list are *structural* and are never reported through
/// [`HierarchyPart::references`].
pub trait HierarchyPart: Clone + Debug + Send + Sync + 'static {
    fn id(&self) -> PartId;
    fn set_id(&mut self, id: PartId);

    fn parent_id(&self) -> Option<PartId>;
    fn set_parent_id(&mut self, parent: Option<PartId>);

    fn child_ids(&self) -> &[PartId];

    /// Whether a child may be inserted at `index`. Kinds with bounded child
    /// slots override this.
    fn can_insert_child(&self, index: usize) -> bool {
        index <= self.child_ids().len()
    }

    /// Insert `child` at `index`. Callers check [`Self::can_insert_child`]
    /// first.
    fn insert_child_id(&mut self, index: usize, child: PartId);

    /// Remove `child`, returning the index it occupied.
    fn remove_child_id(&mut self, child: PartId) -> Option<usize>;

    /// Put `new` where `old` was. Returns `false` if `old` is not a child.
    fn replace_child_id(&mut self, old: PartId, new: PartId) -> bool {
        match self.remove_child_id(old) {
            Some(index) => {
                self.insert_child_id(index, new);
                true
            }
            None => false,
        }
    }

    /// Non-structural references this part holds to other identifiables.
    fn references(&self) -> Vec<PartId> {
        Vec::new()
    }

    /// Rewrite every non-structural reference. `map` returns the replacement
    /// id, or `None` to clear the reference.
    fn remap_references(&mut self, _map: &mut dyn FnMut(PartId) -> Option<PartId>) {}
}

/// A part plus its design metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartDesign<P> {
    pub part: P,
    #[serde(default)]
    pub base: Option<BasePart>,
    #[serde(default)]
    pub overrides: OverrideSet,
}

impl<P: HierarchyPart> PartDesign<P> {
    pub fn new(part: P) -> Self {
        Self {
            part,
            base: None,
            overrides: OverrideSet::new(),
        }
    }

    pub fn with_base(part: P, base: BasePart) -> Self {
        Self {
            part,
            base: Some(base),
            overrides: OverrideSet::new(),
        }
    }

    pub fn id(&self) -> PartId {
        self.part.id()
    }
}
