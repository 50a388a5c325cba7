use hierloom_model::{BaseInstanceKey, DocumentId, PartDesign, PartId, SubHierarchyCloneFlags};
use hierloom_sync::{
    CommonAncestor, Entity, EntityHierarchy, PartChange, PartEvent, Session, SyncError,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

fn session() -> Session<EntityHierarchy> {
    Session::new(EntityHierarchy)
}

fn add_root(s: &mut Session<EntityHierarchy>, doc: DocumentId, name: &str) -> PartId {
    let index = s.hierarchy(doc).unwrap().root_ids().len();
    s.add_part(doc, PartDesign::new(Entity::new(name)), None, index)
        .unwrap()
}

fn add_child(s: &mut Session<EntityHierarchy>, doc: DocumentId, parent: PartId, name: &str) -> PartId {
    let index = s.hierarchy(doc).unwrap().child_count(parent);
    s.add_part(doc, PartDesign::new(Entity::new(name)), Some(parent), index)
        .unwrap()
}

fn names(s: &Session<EntityHierarchy>, doc: DocumentId, ids: &[PartId]) -> Vec<String> {
    let h = s.hierarchy(doc).unwrap();
    ids.iter().map(|&id| h.get(id).unwrap().part.name.clone()).collect()
}

fn root_names(s: &Session<EntityHierarchy>, doc: DocumentId) -> Vec<String> {
    let roots = s.hierarchy(doc).unwrap().root_ids().to_vec();
    names(s, doc, &roots)
}

fn record_events(s: &mut Session<EntityHierarchy>) -> Arc<Mutex<Vec<PartEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    s.on_event(move |event| sink.lock().push(event.clone()));
    log
}

// ============================================================================
// Instantiation
// ============================================================================

#[test]
fn test_instantiate_links_every_clone() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    add_child(&mut s, arch, a, "A1");
    let derived = s.create_document("derived");

    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();
    assert_eq!(inst.id_remapping.len(), 2);
    assert_eq!(inst.root_ids, vec![inst.id_remapping[&a]]);

    let h = s.hierarchy(derived).unwrap();
    for (&old, &new) in &inst.id_remapping {
        let base = h.get(new).unwrap().base.unwrap();
        assert_eq!(base.archetype, arch);
        assert_eq!(base.base_part_id, old);
        assert_eq!(base.instance_id, inst.instance_id);
    }
    assert_eq!(
        s.instance_ids(derived, arch).unwrap(),
        BTreeSet::from([inst.instance_id])
    );
    assert_eq!(s.archetype_documents(derived).unwrap(), BTreeSet::from([arch]));
}

#[test]
fn test_instantiate_rejects_cycles() {
    let mut s = session();
    let arch = s.create_document("arch");
    add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    s.instantiate(arch, derived, None, None, 0).unwrap();

    assert!(matches!(
        s.instantiate(arch, arch, None, None, 0),
        Err(SyncError::CyclicArchetype { .. })
    ));
    assert!(matches!(
        s.instantiate(derived, arch, None, None, 0),
        Err(SyncError::CyclicArchetype { .. })
    ));
    let empty = s.create_document("empty");
    assert!(matches!(
        s.instantiate(empty, derived, None, None, 0),
        Err(SyncError::EmptyInstantiation(_))
    ));
}

#[test]
fn test_invalid_index_is_rejected_before_mutation() {
    let mut s = session();
    let arch = s.create_document("arch");
    add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    assert!(matches!(
        s.instantiate(arch, derived, None, None, 3),
        Err(SyncError::Hierarchy(_))
    ));
    assert!(s.hierarchy(derived).unwrap().is_empty());
    assert!(s.archetype_documents(derived).unwrap().is_empty());
}

// ============================================================================
// Propagation
// ============================================================================

#[test]
fn test_added_child_propagates_to_every_instance() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    let first = s.instantiate(arch, derived, None, None, 0).unwrap();
    let second = s.instantiate(arch, derived, None, None, 1).unwrap();

    add_child(&mut s, arch, a, "A1");

    let h = s.hierarchy(derived).unwrap();
    for inst in [&first, &second] {
        let parent = inst.id_remapping[&a];
        let children = h.enumerate_child_parts(parent, false);
        assert_eq!(children.len(), 1);
        let child = h.get(children[0]).unwrap();
        assert_eq!(child.part.name, "A1");
        assert_eq!(child.base.unwrap().instance_id, inst.instance_id);
    }
}

#[test]
fn test_sibling_insertion_skips_deleted_counterpart() {
    let mut s = session();
    let arch = s.create_document("arch");
    add_root(&mut s, arch, "A");
    let b = add_root(&mut s, arch, "B");
    add_root(&mut s, arch, "C");
    let derived = s.create_document("derived");
    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();

    s.delete_parts(derived, &[inst.id_remapping[&b]]).unwrap();
    s.add_part(arch, PartDesign::new(Entity::new("D")), None, 2)
        .unwrap();

    assert_eq!(root_names(&s, arch), ["A", "B", "D", "C"]);
    assert_eq!(root_names(&s, derived), ["A", "D", "C"]);
}

#[test]
fn test_removed_part_leaves_every_instance() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let a1 = add_child(&mut s, arch, a, "A1");
    let derived = s.create_document("derived");
    s.instantiate(arch, derived, None, None, 0).unwrap();
    s.instantiate(arch, derived, None, None, 1).unwrap();
    assert_eq!(s.hierarchy(derived).unwrap().len(), 4);

    s.remove_part(arch, a1).unwrap();
    assert_eq!(s.hierarchy(derived).unwrap().len(), 2);
    // A removal from the base is not a user deletion.
    let document = s.document(derived).unwrap();
    assert!(document.mapping().deleted_parts().is_empty());
}

#[test]
fn test_base_side_move_reuses_derived_part() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let b = add_root(&mut s, arch, "B");
    let derived = s.create_document("derived");
    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();
    let x = inst.id_remapping[&a];
    let y = inst.id_remapping[&b];
    s.update_part(derived, x, |d| {
        d.part.components.insert("note".into(), "kept".into());
        d.overrides.insert(Entity::component_path("note"));
    })
    .unwrap();

    s.move_part(arch, a, Some(b), 0).unwrap();

    let h = s.hierarchy(derived).unwrap();
    assert_eq!(h.len(), 2);
    assert_eq!(h.root_ids(), &[y]);
    assert_eq!(h.enumerate_child_parts(y, false), vec![x]);
    assert_eq!(h.get(x).unwrap().part.components["note"], "kept");
    let document = s.document(derived).unwrap();
    assert!(document.mapping().deleted_parts().is_empty());
    s.validate(derived).unwrap();
}

#[test]
fn test_deleted_part_is_not_resurrected() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    add_root(&mut s, arch, "B");
    let derived = s.create_document("derived");
    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();
    s.delete_parts(derived, &[inst.id_remapping[&a]]).unwrap();

    let removed = s.remove_part(arch, a).unwrap();
    s.add_sub_hierarchy(arch, removed, None, 0).unwrap();

    assert_eq!(root_names(&s, arch), ["A", "B"]);
    assert_eq!(root_names(&s, derived), ["B"]);
    let key = BaseInstanceKey::new(a, inst.instance_id);
    assert!(s.document(derived).unwrap().mapping().is_deleted(&key));
}

#[test]
fn test_deleted_child_stays_deleted_when_base_moves_parent() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let a1 = add_child(&mut s, arch, a, "A1");
    add_root(&mut s, arch, "B");
    let derived = s.create_document("derived");
    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();
    let derived_a = inst.id_remapping[&a];
    s.delete_parts(derived, &[inst.id_remapping[&a1]]).unwrap();

    s.move_part(arch, a, None, 1).unwrap();

    assert_eq!(root_names(&s, derived), ["B", "A"]);
    let h = s.hierarchy(derived).unwrap();
    assert!(h.contains(derived_a));
    assert!(h.enumerate_child_parts(derived_a, true).is_empty());
    let key = BaseInstanceKey::new(a1, inst.instance_id);
    assert!(s.document(derived).unwrap().mapping().is_deleted(&key));
    s.validate(derived).unwrap();
}

#[test]
fn test_untracked_deletion_comes_back() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    add_root(&mut s, arch, "B");
    let derived = s.create_document("derived");
    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();
    s.delete_parts(derived, &[inst.id_remapping[&a]]).unwrap();
    let key = BaseInstanceKey::new(a, inst.instance_id);
    assert_eq!(s.untrack_deleted_instance_parts(derived, [key]).unwrap(), 1);

    s.move_part(arch, a, None, 1).unwrap();
    assert_eq!(root_names(&s, derived), ["B", "A"]);
}

#[test]
fn test_orphaned_instance_falls_back_to_common_ancestor() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    let p = add_root(&mut s, derived, "P");
    let inst = s.instantiate(arch, derived, None, Some(p), 0).unwrap();

    s.delete_parts(derived, &[inst.id_remapping[&a]]).unwrap();
    let document = s.document(derived).unwrap();
    assert_eq!(
        document.mapping().common_ancestor(inst.instance_id),
        Some(CommonAncestor::Part(p))
    );

    add_root(&mut s, arch, "B");
    let h = s.hierarchy(derived).unwrap();
    let children = h.enumerate_child_parts(p, false);
    assert_eq!(names(&s, derived, &children), ["B"]);
}

#[test]
fn test_declined_when_parent_counterpart_deleted() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    add_root(&mut s, arch, "B");
    let derived = s.create_document("derived");
    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();
    s.delete_parts(derived, &[inst.id_remapping[&a]]).unwrap();

    add_child(&mut s, arch, a, "A1");
    assert_eq!(root_names(&s, derived), ["B"]);
    assert_eq!(s.hierarchy(derived).unwrap().len(), 1);
}

#[test]
fn test_break_archetype_links_stops_propagation() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    let inst = s.instantiate(arch, derived, None, None, 0).unwrap();
    let x = inst.id_remapping[&a];

    assert_eq!(s.break_archetype_links(derived, &[x]).unwrap(), 1);
    assert!(s.archetype_documents(derived).unwrap().is_empty());
    assert_eq!(s.hub().subscribers_of(arch), Vec::<DocumentId>::new());

    add_child(&mut s, arch, a, "A1");
    add_root(&mut s, arch, "B");
    assert_eq!(s.hierarchy(derived).unwrap().len(), 1);
    assert!(s.hierarchy(derived).unwrap().get(x).unwrap().base.is_none());
}

// ============================================================================
// Deletion & events
// ============================================================================

#[test]
fn test_delete_removes_leaves_first() {
    let mut s = session();
    let doc = s.create_document("doc");
    let r = add_root(&mut s, doc, "R");
    let c1 = add_child(&mut s, doc, r, "C1");
    let g = add_child(&mut s, doc, c1, "G");
    let c2 = add_child(&mut s, doc, r, "C2");
    let log = record_events(&mut s);

    let order = s.delete_parts(doc, &[r]).unwrap();
    assert_eq!(order, vec![g, c1, c2, r]);
    let removed: Vec<PartId> = log
        .lock()
        .iter()
        .filter(|e| e.change == PartChange::Removed)
        .map(|e| e.part)
        .collect();
    assert_eq!(removed, order);
    assert!(s.hierarchy(doc).unwrap().is_empty());
}

#[test]
fn test_delete_clears_references_to_deleted_parts() {
    let mut s = session();
    let doc = s.create_document("doc");
    let target = add_root(&mut s, doc, "target");
    let keeper = s
        .add_part(doc, PartDesign::new(Entity::new("keeper").with_link(target)), None, 1)
        .unwrap();

    s.delete_parts(doc, &[target]).unwrap();
    assert!(s.hierarchy(doc).unwrap().get(keeper).unwrap().part.links.is_empty());
}

#[test]
fn test_propagated_events_are_flagged_from_base() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    s.instantiate(arch, derived, None, None, 0).unwrap();
    let log = record_events(&mut s);

    add_child(&mut s, arch, a, "A1");
    let events = log.lock().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].document, arch);
    assert!(!events[0].from_base);
    assert_eq!(events[1].document, derived);
    assert!(events[1].from_base);
    assert!(!s.document(derived).unwrap().is_updating_from_base());
}

// ============================================================================
// Load, unload, reconcile
// ============================================================================

#[test]
fn test_finalize_on_load_marks_missing_parts_deleted() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let b = add_root(&mut s, arch, "B");
    let staging = s.create_document("staging");
    let inst = s.instantiate(arch, staging, Some(&[a]), None, 0).unwrap();

    let saved = s.unload_document(staging).unwrap();
    let reloaded = DocumentId::new();
    s.load_document(reloaded, "reloaded", saved).unwrap();

    let document = s.document(reloaded).unwrap();
    assert!(document
        .mapping()
        .is_deleted(&BaseInstanceKey::new(b, inst.instance_id)));
    assert!(!document
        .mapping()
        .is_deleted(&BaseInstanceKey::new(a, inst.instance_id)));
    assert_eq!(s.hub().subscribers_of(arch), vec![reloaded]);
}

#[test]
fn test_finalize_runs_when_archetype_loads_after_derived() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let b = add_root(&mut s, arch, "B");
    let staging = s.create_document("staging");
    let inst = s.instantiate(arch, staging, None, None, 0).unwrap();
    s.delete_parts(staging, &[inst.id_remapping[&a]]).unwrap();

    let saved = s.unload_document(staging).unwrap();
    let saved_arch = s.unload_document(arch).unwrap();
    let reloaded = DocumentId::new();
    s.load_document(reloaded, "reloaded", saved).unwrap();
    assert!(s.archetype_documents(reloaded).unwrap().is_empty());
    s.load_document(arch, "arch", saved_arch).unwrap();

    let document = s.document(reloaded).unwrap();
    assert_eq!(document.archetype_documents(), BTreeSet::from([arch]));
    assert!(document
        .mapping()
        .is_deleted(&BaseInstanceKey::new(a, inst.instance_id)));
    assert!(!document
        .mapping()
        .is_deleted(&BaseInstanceKey::new(b, inst.instance_id)));

    s.move_part(arch, a, None, 1).unwrap();
    assert_eq!(root_names(&s, reloaded), ["B"]);
}

#[test]
fn test_unload_releases_subscriptions() {
    let mut s = session();
    let arch = s.create_document("arch");
    add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    s.instantiate(arch, derived, None, None, 0).unwrap();
    assert_eq!(s.hub().subscription_count(), 1);

    s.unload_document(derived).unwrap();
    assert_eq!(s.hub().subscription_count(), 0);
}

#[test]
fn test_deleted_archetype_is_dropped() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "A");
    let derived = s.create_document("derived");
    s.instantiate(arch, derived, None, None, 0).unwrap();

    s.mark_deleted(arch).unwrap();
    assert!(s.archetype_documents(derived).unwrap().is_empty());
    add_child(&mut s, arch, a, "A1");
    assert_eq!(s.hierarchy(derived).unwrap().len(), 1);
}

#[test]
fn test_update_propagates_unless_overridden() {
    let mut s = session();
    let arch = s.create_document("arch");
    let a = add_root(&mut s, arch, "Lamp");
    let derived = s.create_document("derived");
    let first = s.instantiate(arch, derived, None, None, 0).unwrap();
    let second = s.instantiate(arch, derived, None, None, 1).unwrap();
    let kept = second.id_remapping[&a];
    s.update_part(derived, kept, |d| {
        d.part.name = "Custom".into();
        d.overrides.insert(Entity::name_path());
    })
    .unwrap();

    s.update_part(arch, a, |d| d.part.name = "Lantern".into())
        .unwrap();
    assert_eq!(root_names(&s, derived), ["Lantern", "Custom"]);
    assert_eq!(
        names(&s, derived, &[first.id_remapping[&a]]),
        ["Lantern"]
    );
}

#[test]
fn test_structural_edit_is_rolled_back() {
    let mut s = session();
    let doc = s.create_document("doc");
    let r = add_root(&mut s, doc, "R");
    let err = s
        .update_part(doc, r, |d| d.part.children.push(PartId::new()))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidEdit { .. }));
    assert_eq!(s.hierarchy(doc).unwrap().child_count(r), 0);
    s.validate(doc).unwrap();
}

#[test]
fn test_clone_sub_hierarchy_for_paste() {
    let mut s = session();
    let doc = s.create_document("doc");
    let r = add_root(&mut s, doc, "R");
    add_child(&mut s, doc, r, "C");
    let cloned = s
        .clone_sub_hierarchy(doc, &[r], SubHierarchyCloneFlags::GENERATE_NEW_IDS)
        .unwrap();
    let pasted = s.add_sub_hierarchy(doc, cloned.hierarchy, None, 1).unwrap();
    assert_eq!(pasted, vec![cloned.id_remapping[&r]]);
    assert_eq!(root_names(&s, doc), ["R", "R"]);
    assert_eq!(s.hierarchy(doc).unwrap().len(), 4);
}
