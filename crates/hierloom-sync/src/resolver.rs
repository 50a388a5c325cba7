//! Where does a part newly added to an archetype belong in one instance?
//!
//! The placement degrades in steps: mirror the archetype position next to a
//! sibling that still has a counterpart, else the first slot under the
//! counterpart of the archetype parent, else the instance's last known
//! common ancestor, else nowhere.

use crate::mapping::{CommonAncestor, ReverseMapping};
use hierloom_model::{BaseInstanceKey, BasePart, DocumentId, Hierarchy, HierarchyPart, InstanceId, PartId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertionPoint {
    pub parent: Option<PartId>,
    pub index: usize,
}

/// The live derived part cloned from `base_part` for `instance`, if any.
pub fn live_counterpart<P: HierarchyPart>(
    derived: &Hierarchy<P>,
    mapping: &ReverseMapping<P>,
    archetype: DocumentId,
    base_part: PartId,
    instance: InstanceId,
) -> Option<PartId> {
    let id = mapping.counterpart_id(&BaseInstanceKey::new(base_part, instance))?;
    let expected = BasePart::new(archetype, base_part, instance);
    match derived.get(id) {
        Some(design) if design.base == Some(expected) => Some(id),
        _ => None,
    }
}

/// Resolve the insertion point for `new_part` (already present in
/// `archetype`) inside `instance` of `derived`. `None` means discard.
pub fn find_best_insert_index<P: HierarchyPart>(
    derived: &Hierarchy<P>,
    mapping: &ReverseMapping<P>,
    archetype_id: DocumentId,
    archetype: &Hierarchy<P>,
    new_part: PartId,
    instance: InstanceId,
) -> Option<InsertionPoint> {
    let counterpart = |base_part: PartId| live_counterpart(derived, mapping, archetype_id, base_part, instance);
    let base_parent = archetype.parent_id(new_part);
    let base_siblings = archetype.siblings(base_parent);
    let position = base_siblings.iter().position(|&s| s == new_part)?;

    let resolved = match base_parent {
        None => {
            // Root in the archetype: follow wherever the sibling's counterpart
            // lives, which need not be the derived root level.
            let before = base_siblings[..position]
                .iter()
                .rev()
                .find_map(|&s| counterpart(s))
                .and_then(|c| {
                    derived.index_of(c).map(|i| InsertionPoint {
                        parent: derived.parent_id(c),
                        index: i + 1,
                    })
                });
            before.or_else(|| {
                base_siblings[position + 1..]
                    .iter()
                    .find_map(|&s| counterpart(s))
                    .and_then(|c| {
                        derived.index_of(c).map(|index| InsertionPoint {
                            parent: derived.parent_id(c),
                            index,
                        })
                    })
            })
        }
        Some(bp) => counterpart(bp).map(|derived_parent| {
            let under_parent = |s: PartId| {
                counterpart(s).filter(|&c| derived.parent_id(c) == Some(derived_parent))
            };
            let index = base_siblings[..position]
                .iter()
                .rev()
                .find_map(|&s| under_parent(s))
                .and_then(|c| derived.index_of(c).map(|i| i + 1))
                .or_else(|| {
                    base_siblings[position + 1..]
                        .iter()
                        .find_map(|&s| under_parent(s))
                        .and_then(|c| derived.index_of(c))
                })
                .unwrap_or(0);
            InsertionPoint {
                parent: Some(derived_parent),
                index,
            }
        }),
    };

    let point = match resolved {
        Some(point) => point,
        None => orphan_fallback(derived, mapping, instance)?,
    };
    if derived.check_insertion_point(point.parent, point.index).is_err() {
        tracing::debug!(
            instance = %instance,
            part = %new_part,
            index = point.index,
            "resolved insertion point is not accepted, discarding"
        );
        return None;
    }
    Some(point)
}

/// An instance with no live part at all is re-anchored under its last known
/// common ancestor.
fn orphan_fallback<P: HierarchyPart>(
    derived: &Hierarchy<P>,
    mapping: &ReverseMapping<P>,
    instance: InstanceId,
) -> Option<InsertionPoint> {
    let alone = derived
        .designs()
        .all(|d| d.base.map(|b| b.instance_id) != Some(instance));
    if !alone {
        tracing::debug!(instance = %instance, "no sibling or parent counterpart, discarding");
        return None;
    }
    match mapping.common_ancestor(instance) {
        Some(CommonAncestor::Part(p)) if derived.contains(p) => {
            tracing::debug!(instance = %instance, ancestor = %p, "re-anchoring orphaned instance");
            Some(InsertionPoint {
                parent: Some(p),
                index: 0,
            })
        }
        _ => {
            tracing::debug!(instance = %instance, "orphaned instance has no usable ancestor, discarding");
            None
        }
    }
}
