//! Sub-hierarchy cloning.
//!
//! Extracts one or more independent sub-forests from a hierarchy, deep-clones
//! them into a detached [`Hierarchy`] and optionally mints fresh identities.
//! Used by instantiation, by base-to-derived propagation and by
//! duplicate/paste style operations.

use crate::error::{HierarchyError, Result};
use crate::hierarchy::Hierarchy;
use crate::ids::{IdRemapping, PartId};
use crate::overrides::OverrideSet;
use crate::part::{HierarchyPart, PartDesign};
use ahash::AHashMap;
use std::collections::BTreeSet;

bitflags::bitflags! {
    /// Options for [`clone_sub_hierarchy`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubHierarchyCloneFlags: u8 {
        /// Give every cloned part a fresh id and report the mapping.
        const GENERATE_NEW_IDS = 1 << 0;
        /// Null out references that point outside the cloned parts.
        const CLEAR_EXTERNAL_REFERENCES = 1 << 1;
        /// Do not re-publish override markers onto the clone.
        const REMOVE_OVERRIDES = 1 << 2;
    }
}

/// A detached clone and the id mapping that produced it.
#[derive(Debug, Clone)]
pub struct ClonedHierarchy<P> {
    pub hierarchy: Hierarchy<P>,
    /// Source id -> clone id. Empty unless `GENERATE_NEW_IDS` was set.
    pub id_remapping: IdRemapping,
}

/// Clone the sub-hierarchies rooted at `root_ids` out of `source`.
///
/// The roots must exist and be independent (no root may be a descendant of
/// another). Base links are carried over unchanged; callers that republish
/// the clone as a new instance rewrite them afterwards.
pub fn clone_sub_hierarchy<P: HierarchyPart>(
    source: &Hierarchy<P>,
    root_ids: &[PartId],
    flags: SubHierarchyCloneFlags,
) -> Result<ClonedHierarchy<P>> {
    for (i, &root) in root_ids.iter().enumerate() {
        if !source.contains(root) {
            return Err(HierarchyError::UnknownPart(root));
        }
        if root_ids[..i].contains(&root) {
            return Err(HierarchyError::DuplicatePart(root));
        }
    }
    for &root in root_ids {
        if let Some(&ancestor) = root_ids
            .iter()
            .find(|&&other| other != root && source.is_descendant_of(root, other))
        {
            return Err(HierarchyError::OverlappingRoots {
                ancestor,
                descendant: root,
            });
        }
    }

    // Extract the sub-forest.
    let mut extracted: Vec<PartDesign<P>> = Vec::new();
    for &root in root_ids {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let design = source.get(id).ok_or(HierarchyError::UnknownPart(id))?;
            for &child in design.part.child_ids().iter().rev() {
                if !source.contains(child) {
                    return Err(HierarchyError::MissingDescendant { parent: id, child });
                }
                stack.push(child);
            }
            let mut copy = design.clone();
            if id == root {
                copy.part.set_parent_id(None);
            }
            extracted.push(copy);
        }
    }
    let inside: BTreeSet<PartId> = extracted.iter().map(|d| d.id()).collect();

    // Overrides are collected up front and only re-applied after the clone.
    let mut collected: AHashMap<PartId, OverrideSet> = AHashMap::new();
    for design in &mut extracted {
        if !design.overrides.is_empty() {
            collected.insert(design.id(), std::mem::take(&mut design.overrides));
        }
    }

    let id_remapping: IdRemapping = if flags.contains(SubHierarchyCloneFlags::GENERATE_NEW_IDS) {
        inside.iter().map(|&id| (id, PartId::new())).collect()
    } else {
        IdRemapping::new()
    };
    let map_id = |id: PartId| id_remapping.get(&id).copied().unwrap_or(id);
    let clear_external = flags.contains(SubHierarchyCloneFlags::CLEAR_EXTERNAL_REFERENCES);

    let mut cloned = Vec::with_capacity(extracted.len());
    for mut design in extracted {
        let old = design.id();
        if !id_remapping.is_empty() {
            design.part.set_id(map_id(old));
            let parent = design.part.parent_id().map(map_id);
            design.part.set_parent_id(parent);
            for child in design.part.child_ids().to_vec() {
                design.part.replace_child_id(child, map_id(child));
            }
        }
        design.part.remap_references(&mut |r| {
            if inside.contains(&r) {
                Some(map_id(r))
            } else if clear_external {
                None
            } else {
                Some(r)
            }
        });
        if !flags.contains(SubHierarchyCloneFlags::REMOVE_OVERRIDES) {
            if let Some(overrides) = collected.get(&old) {
                design.overrides = overrides.remap_ids(&id_remapping);
            }
        }
        cloned.push(design);
    }

    let roots = root_ids.iter().map(|&r| map_id(r)).collect();
    let hierarchy = Hierarchy::from_parts(roots, cloned)?;
    tracing::trace!(
        roots = root_ids.len(),
        parts = hierarchy.len(),
        new_ids = !id_remapping.is_empty(),
        "cloned sub-hierarchy"
    );
    Ok(ClonedHierarchy {
        hierarchy,
        id_remapping,
    })
}
