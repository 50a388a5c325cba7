//! The per-document part forest.
//!
//! A [`Hierarchy`] owns a flat id-keyed map of [`PartDesign`]s plus the
//! ordered list of root ids. Parent/child structure lives inside the parts
//! themselves (see [`HierarchyPart`]); this type keeps the two views
//! consistent:
//!
//! - every part id appears exactly once in the map
//! - a part is either a root or a child of exactly one other part
//! - insertion is pre-order (a parent is in the map before its children)
//! - removal is post-order (children leave the map before their parent)

use crate::error::{HierarchyError, Result};
use crate::ids::PartId;
use crate::part::{HierarchyPart, PartDesign};
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct Hierarchy<P> {
    root_ids: Vec<PartId>,
    parts: AHashMap<PartId, PartDesign<P>>,
}

impl<P> Default for Hierarchy<P> {
    fn default() -> Self {
        Self {
            root_ids: Vec::new(),
            parts: AHashMap::new(),
        }
    }
}

impl<P: HierarchyPart> Hierarchy<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a hierarchy from already-linked designs and check the forest
    /// invariant.
    pub fn from_parts(
        root_ids: Vec<PartId>,
        designs: impl IntoIterator<Item = PartDesign<P>>,
    ) -> Result<Self> {
        let mut parts = AHashMap::new();
        for design in designs {
            let id = design.id();
            if parts.insert(id, design).is_some() {
                return Err(HierarchyError::DuplicatePart(id));
            }
        }
        let hierarchy = Self { root_ids, parts };
        hierarchy.validate()?;
        Ok(hierarchy)
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn root_ids(&self) -> &[PartId] {
        &self.root_ids
    }

    pub fn contains(&self, id: PartId) -> bool {
        self.parts.contains_key(&id)
    }

    pub fn get(&self, id: PartId) -> Option<&PartDesign<P>> {
        self.parts.get(&id)
    }

    /// Mutable access to a design.
    ///
    /// Callers must not touch the part's id, parent or child links through
    /// this; use the structural operations below.
    pub fn get_mut(&mut self, id: PartId) -> Option<&mut PartDesign<P>> {
        self.parts.get_mut(&id)
    }

    /// All designs in the flat map, in no particular order.
    pub fn designs(&self) -> impl Iterator<Item = &PartDesign<P>> {
        self.parts.values()
    }

    pub fn designs_mut(&mut self) -> impl Iterator<Item = &mut PartDesign<P>> {
        self.parts.values_mut()
    }

    /// All part ids, sorted.
    pub fn ids(&self) -> Vec<PartId> {
        let mut ids: Vec<PartId> = self.parts.keys().copied().collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    pub fn parent_id(&self, id: PartId) -> Option<PartId> {
        self.parts.get(&id).and_then(|d| d.part.parent_id())
    }

    pub fn parent(&self, id: PartId) -> Option<&PartDesign<P>> {
        self.parent_id(id).and_then(|p| self.parts.get(&p))
    }

    pub fn child_count(&self, id: PartId) -> usize {
        self.parts
            .get(&id)
            .map(|d| d.part.child_ids().len())
            .unwrap_or(0)
    }

    pub fn child(&self, id: PartId, index: usize) -> Option<&PartDesign<P>> {
        let child = *self.parts.get(&id)?.part.child_ids().get(index)?;
        self.parts.get(&child)
    }

    /// Direct children that resolve in the map, in order.
    pub fn children(&self, id: PartId) -> impl Iterator<Item = &PartDesign<P>> + '_ {
        self.siblings(Some(id))
            .iter()
            .filter_map(move |child| self.parts.get(child))
    }

    /// Children of `id` (and, if `recursive`, all their descendants) in
    /// pre-order. Dangling child ids are skipped.
    pub fn enumerate_child_parts(&self, id: PartId, recursive: bool) -> Vec<PartId> {
        let mut out = Vec::new();
        let mut seen = AHashSet::new();
        seen.insert(id);
        self.collect_children(id, recursive, &mut seen, &mut out);
        out
    }

    fn collect_children(
        &self,
        id: PartId,
        recursive: bool,
        seen: &mut AHashSet<PartId>,
        out: &mut Vec<PartId>,
    ) {
        for &child in self.siblings(Some(id)) {
            if !self.parts.contains_key(&child) || !seen.insert(child) {
                continue;
            }
            out.push(child);
            if recursive {
                self.collect_children(child, true, seen, out);
            }
        }
    }

    pub fn is_root(&self, id: PartId) -> bool {
        self.root_ids.contains(&id)
    }

    /// The ordered ids under `parent`, or the root list for `None`.
    pub fn siblings(&self, parent: Option<PartId>) -> &[PartId] {
        match parent {
            None => &self.root_ids,
            Some(p) => self
                .parts
                .get(&p)
                .map(|d| d.part.child_ids())
                .unwrap_or(&[]),
        }
    }

    /// Position of `id` among its siblings.
    pub fn index_of(&self, id: PartId) -> Option<usize> {
        let design = self.parts.get(&id)?;
        self.siblings(design.part.parent_id())
            .iter()
            .position(|&c| c == id)
    }

    /// Every part reachable from the roots, pre-order. This is the only
    /// enumeration that ignores stale entries in the flat map.
    pub fn depth_first(&self) -> Vec<PartId> {
        let mut out = Vec::with_capacity(self.parts.len());
        let mut seen = AHashSet::with_capacity(self.parts.len());
        for &root in &self.root_ids {
            if !self.parts.contains_key(&root) || !seen.insert(root) {
                continue;
            }
            out.push(root);
            self.collect_children(root, true, &mut seen, &mut out);
        }
        out
    }

    /// Parent chain of `id`, nearest first, stopping at the first id that
    /// does not resolve.
    pub fn ancestors(&self, id: PartId) -> Vec<PartId> {
        let mut out = Vec::new();
        let mut current = self.parent_id(id);
        while let Some(p) = current {
            if out.contains(&p) || !self.parts.contains_key(&p) {
                break;
            }
            out.push(p);
            current = self.parent_id(p);
        }
        out
    }

    pub fn is_descendant_of(&self, id: PartId, ancestor: PartId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    // ========================================================================
    // Builders
    // ========================================================================

    /// Append a childless design as the last root.
    pub fn push_root(&mut self, design: PartDesign<P>) -> Result<PartId> {
        let index = self.root_ids.len();
        self.push_leaf(design, None, index)
    }

    /// Append a childless design as the last child of `parent`.
    pub fn push_child(&mut self, parent: PartId, design: PartDesign<P>) -> Result<PartId> {
        let index = self.child_count(parent);
        self.push_leaf(design, Some(parent), index)
    }

    fn push_leaf(
        &mut self,
        mut design: PartDesign<P>,
        parent: Option<PartId>,
        index: usize,
    ) -> Result<PartId> {
        let id = design.id();
        if self.parts.contains_key(&id) {
            return Err(HierarchyError::DuplicatePart(id));
        }
        if !design.part.child_ids().is_empty() {
            return Err(HierarchyError::Structure(format!(
                "part {id} carries child links that are not in the hierarchy"
            )));
        }
        self.check_insertion_point(parent, index)?;
        design.part.set_parent_id(None);
        self.parts.insert(id, design);
        self.attach(id, parent, index)?;
        Ok(id)
    }

    // ========================================================================
    // Part Store primitives
    // ========================================================================

    /// Reject an insertion point before anything is mutated.
    pub fn check_insertion_point(&self, parent: Option<PartId>, index: usize) -> Result<()> {
        match parent {
            None => {
                if index > self.root_ids.len() {
                    return Err(HierarchyError::IndexOutOfRange {
                        parent: None,
                        index,
                        len: self.root_ids.len(),
                    });
                }
            }
            Some(p) => {
                let design = self.parts.get(&p).ok_or(HierarchyError::UnknownPart(p))?;
                if !design.part.can_insert_child(index) {
                    let len = design.part.child_ids().len();
                    if index > len {
                        return Err(HierarchyError::IndexOutOfRange {
                            parent: Some(p),
                            index,
                            len,
                        });
                    }
                    return Err(HierarchyError::ChildRejected { parent: p, index });
                }
            }
        }
        Ok(())
    }

    /// Like [`Self::check_insertion_point`] for `count` parts inserted at
    /// consecutive indices starting at `index`.
    pub fn check_insertion_points(
        &self,
        parent: Option<PartId>,
        index: usize,
        count: usize,
    ) -> Result<()> {
        self.check_insertion_point(parent, index)?;
        let Some(p) = parent else {
            return Ok(());
        };
        let mut scratch = self
            .parts
            .get(&p)
            .ok_or(HierarchyError::UnknownPart(p))?
            .part
            .clone();
        for offset in 0..count {
            let at = index + offset;
            if !scratch.can_insert_child(at) {
                return Err(HierarchyError::ChildRejected { parent: p, index: at });
            }
            scratch.insert_child_id(at, PartId::new());
        }
        Ok(())
    }

    /// Move `root` and all its descendants from `source` into this map,
    /// pre-order, then attach `root` under `parent` at `index`.
    ///
    /// Everything is checked before either hierarchy is touched. Returns the
    /// moved ids in insertion order.
    pub fn add_part(
        &mut self,
        source: &mut Hierarchy<P>,
        root: PartId,
        parent: Option<PartId>,
        index: usize,
    ) -> Result<Vec<PartId>> {
        self.check_insertion_point(parent, index)?;
        let order = source.subtree_checked(root)?;
        if let Some(&dupe) = order.iter().find(|id| self.parts.contains_key(id)) {
            return Err(HierarchyError::DuplicatePart(dupe));
        }
        if let Some(p) = parent {
            if order.contains(&p) {
                return Err(HierarchyError::CyclicMove { part: root, target: p });
            }
        }

        if source.parent_id(root).is_some() || source.is_root(root) {
            source.detach(root)?;
        }
        for &id in &order {
            if let Some(mut design) = source.parts.remove(&id) {
                if id == root {
                    design.part.set_parent_id(None);
                }
                tracing::trace!(part = %id, "insert part");
                self.parts.insert(id, design);
            }
        }
        self.attach(root, parent, index)?;
        Ok(order)
    }

    /// `root` followed by its descendants, pre-order; fails if any child
    /// link dangles.
    fn subtree_checked(&self, root: PartId) -> Result<Vec<PartId>> {
        if !self.parts.contains_key(&root) {
            return Err(HierarchyError::UnknownPart(root));
        }
        let mut order = Vec::new();
        let mut seen = AHashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(HierarchyError::Structure(format!(
                    "part {id} is reachable twice below {root}"
                )));
            }
            order.push(id);
            let design = self.parts.get(&id).ok_or(HierarchyError::UnknownPart(id))?;
            for &child in design.part.child_ids().iter().rev() {
                if !self.parts.contains_key(&child) {
                    return Err(HierarchyError::MissingDescendant { parent: id, child });
                }
                stack.push(child);
            }
        }
        Ok(order)
    }

    /// Link a detached part (present in the map, no parent, not a root).
    pub fn attach(&mut self, id: PartId, parent: Option<PartId>, index: usize) -> Result<()> {
        self.check_insertion_point(parent, index)?;
        let design = self.parts.get(&id).ok_or(HierarchyError::UnknownPart(id))?;
        if design.part.parent_id().is_some() || self.root_ids.contains(&id) {
            return Err(HierarchyError::Structure(format!(
                "part {id} is already attached"
            )));
        }
        match parent {
            None => self.root_ids.insert(index, id),
            Some(p) => {
                let parent_design = self
                    .parts
                    .get_mut(&p)
                    .ok_or(HierarchyError::UnknownPart(p))?;
                parent_design.part.insert_child_id(index, id);
                if let Some(child) = self.parts.get_mut(&id) {
                    child.part.set_parent_id(Some(p));
                }
            }
        }
        Ok(())
    }

    /// Unlink `id` from its parent (or from the root list), leaving it in the
    /// map. Returns where it was.
    pub fn detach(&mut self, id: PartId) -> Result<(Option<PartId>, usize)> {
        let design = self.parts.get(&id).ok_or(HierarchyError::UnknownPart(id))?;
        match design.part.parent_id() {
            Some(p) => {
                let parent = self.parts.get_mut(&p).ok_or_else(|| {
                    HierarchyError::Structure(format!("parent {p} of {id} is not in the hierarchy"))
                })?;
                let index = parent.part.remove_child_id(id).ok_or_else(|| {
                    HierarchyError::Structure(format!("{id} is not listed as a child of {p}"))
                })?;
                if let Some(child) = self.parts.get_mut(&id) {
                    child.part.set_parent_id(None);
                }
                Ok((Some(p), index))
            }
            None => {
                let index = self
                    .root_ids
                    .iter()
                    .position(|&r| r == id)
                    .ok_or_else(|| {
                        HierarchyError::Structure(format!(
                            "{id} has no parent but is not a root part"
                        ))
                    })?;
                self.root_ids.remove(index);
                Ok((None, index))
            }
        }
    }

    /// Detach `id` and move it with all its descendants out of the map
    /// (post-order). The result is a standalone forest rooted at `id`.
    pub fn remove_part(&mut self, id: PartId) -> Result<Hierarchy<P>> {
        let order = self.subtree_checked(id)?;
        self.detach(id)?;
        let mut removed = Hierarchy::new();
        for &part in order.iter().rev() {
            if let Some(design) = self.parts.remove(&part) {
                tracing::trace!(part = %part, "remove part");
                removed.parts.insert(part, design);
            }
        }
        removed.root_ids.push(id);
        Ok(removed)
    }

    /// Swap the design at `old` for `replacement`, which takes over the
    /// structural position of `old`: its parent link, its slot among its
    /// siblings and its children. References to `old` elsewhere in the
    /// hierarchy are rewritten. Returns the displaced design.
    pub fn replace_part(
        &mut self,
        old: PartId,
        mut replacement: PartDesign<P>,
    ) -> Result<PartDesign<P>> {
        let new = replacement.id();
        if new != old && self.parts.contains_key(&new) {
            return Err(HierarchyError::DuplicatePart(new));
        }
        let parent = self
            .parts
            .get(&old)
            .ok_or(HierarchyError::UnknownPart(old))?
            .part
            .parent_id();
        match parent {
            Some(p) => {
                let listed = self
                    .parts
                    .get(&p)
                    .map(|d| d.part.child_ids().contains(&old))
                    .ok_or_else(|| {
                        HierarchyError::Structure(format!("parent {p} of {old} is not in the hierarchy"))
                    })?;
                if !listed {
                    return Err(HierarchyError::Structure(format!(
                        "{old} is not listed as a child of {p}"
                    )));
                }
            }
            None if !self.root_ids.contains(&old) => {
                return Err(HierarchyError::Structure(format!(
                    "{old} has no parent but is not a root part"
                )));
            }
            None => {}
        }
        let displaced = self.parts.remove(&old).ok_or(HierarchyError::UnknownPart(old))?;

        for stale in replacement.part.child_ids().to_vec() {
            replacement.part.remove_child_id(stale);
        }
        for (index, &child) in displaced.part.child_ids().iter().enumerate() {
            replacement.part.insert_child_id(index, child);
        }
        replacement.part.set_parent_id(parent);

        match parent {
            Some(p) => {
                if let Some(parent_design) = self.parts.get_mut(&p) {
                    parent_design.part.replace_child_id(old, new);
                }
            }
            None => {
                if let Some(slot) = self.root_ids.iter_mut().find(|r| **r == old) {
                    *slot = new;
                }
            }
        }
        for &child in displaced.part.child_ids() {
            if let Some(child_design) = self.parts.get_mut(&child) {
                child_design.part.set_parent_id(Some(new));
            }
        }

        self.parts.insert(new, replacement);
        if new != old {
            for design in self.parts.values_mut() {
                design
                    .part
                    .remap_references(&mut |r| Some(if r == old { new } else { r }));
            }
        }
        Ok(displaced)
    }

    /// Null out every non-structural reference to one of `ids`. Returns the
    /// number of references cleared.
    pub fn clear_references_to(&mut self, ids: &BTreeSet<PartId>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut cleared = 0;
        for design in self.parts.values_mut() {
            design.part.remap_references(&mut |r| {
                if ids.contains(&r) {
                    cleared += 1;
                    None
                } else {
                    Some(r)
                }
            });
        }
        cleared
    }

    /// Check the forest invariant.
    pub fn validate(&self) -> Result<()> {
        let mut seen = AHashSet::with_capacity(self.parts.len());
        for &root in &self.root_ids {
            let design = self.parts.get(&root).ok_or_else(|| {
                HierarchyError::Structure(format!("root {root} is not in the hierarchy"))
            })?;
            if let Some(p) = design.part.parent_id() {
                return Err(HierarchyError::Structure(format!(
                    "root {root} claims parent {p}"
                )));
            }
            self.validate_subtree(root, &mut seen)?;
        }
        if seen.len() != self.parts.len() {
            let mut stale: Vec<PartId> = self
                .parts
                .keys()
                .filter(|id| !seen.contains(*id))
                .copied()
                .collect();
            stale.sort();
            return Err(HierarchyError::Structure(format!(
                "part(s) unreachable from the roots: {stale:?}"
            )));
        }
        Ok(())
    }

    fn validate_subtree(&self, id: PartId, seen: &mut AHashSet<PartId>) -> Result<()> {
        if !seen.insert(id) {
            return Err(HierarchyError::Structure(format!(
                "part {id} is reachable more than once"
            )));
        }
        let design = self.parts.get(&id).ok_or(HierarchyError::UnknownPart(id))?;
        for &child in design.part.child_ids() {
            let child_design = self
                .parts
                .get(&child)
                .ok_or(HierarchyError::MissingDescendant { parent: id, child })?;
            if child_design.part.parent_id() != Some(id) {
                return Err(HierarchyError::Structure(format!(
                    "child {child} of {id} points at parent {:?}",
                    child_design.part.parent_id()
                )));
            }
            self.validate_subtree(child, seen)?;
        }
        Ok(())
    }
}
