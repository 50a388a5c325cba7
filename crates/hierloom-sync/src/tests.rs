//! Unit tests for the bookkeeping pieces.

use super::*;
use hierloom_model::{BaseInstanceKey, BasePart, DocumentId, Hierarchy, InstanceId, PartDesign, PartId};
use std::collections::BTreeMap;

fn linked(name: &str, archetype: DocumentId, instance: InstanceId) -> PartDesign<Entity> {
    PartDesign::with_base(
        Entity::new(name),
        BasePart::new(archetype, PartId::new(), instance),
    )
}

// ============================================================================
// Hub & subscriptions
// ============================================================================

#[test]
fn test_subscription_released_on_drop() {
    let hub = Hub::new();
    let archetype = DocumentId::new();
    let derived = DocumentId::new();
    let sub = hub.subscribe(archetype, derived);
    assert_eq!(hub.subscribers_of(archetype), vec![derived]);
    assert_eq!(sub.archetype(), archetype);
    drop(sub);
    assert!(hub.subscribers_of(archetype).is_empty());
    assert_eq!(hub.subscription_count(), 0);
}

#[test]
fn test_hub_status_transitions() {
    let hub = Hub::new();
    let doc = DocumentId::new();
    assert!(!hub.is_live(doc));
    hub.register(doc);
    assert!(hub.is_live(doc));
    hub.mark_deleted(doc);
    assert_eq!(hub.status(doc), Some(DocumentStatus::Deleted));
    hub.forget(doc);
    assert_eq!(hub.status(doc), None);
}

#[test]
fn test_propagation_scope_restores_previous_value() {
    let flag = PropagationFlag::default();
    assert!(!flag.is_active());
    {
        let _outer = flag.begin();
        assert!(flag.is_active());
        {
            let _inner = flag.begin();
            assert!(flag.is_active());
        }
        assert!(flag.is_active());
    }
    assert!(!flag.is_active());
}

// ============================================================================
// Registry & mapping
// ============================================================================

#[test]
fn test_refresh_tracks_instances_and_common_ancestor() {
    let hub = Hub::new();
    let owner = DocumentId::new();
    let archetype = DocumentId::new();
    hub.register(owner);
    hub.register(archetype);
    let instance = InstanceId::new();

    let mut h = Hierarchy::new();
    let root = h.push_root(PartDesign::new(Entity::new("root"))).unwrap();
    let x = h.push_child(root, PartDesign::new(Entity::new("x"))).unwrap();
    let y = h.push_child(root, PartDesign::new(Entity::new("y"))).unwrap();
    let a = h.push_child(x, linked("a", archetype, instance)).unwrap();
    h.push_child(y, linked("b", archetype, instance)).unwrap();

    let mut registry = InstanceRegistry::new();
    let mut mapping = ReverseMapping::new();
    registry.refresh(owner, &h, &mut mapping, &hub);

    assert_eq!(registry.instance_ids(archetype).len(), 1);
    assert_eq!(registry.subscribed_archetypes().len(), 1);
    assert_eq!(hub.subscribers_of(archetype), vec![owner]);
    assert_eq!(mapping.common_ancestor(instance), Some(CommonAncestor::Part(root)));
    let key = h.get(a).unwrap().base.unwrap().key();
    assert_eq!(mapping.counterpart_id(&key), Some(a));
}

#[test]
fn test_root_level_part_makes_ancestor_root() {
    let hub = Hub::new();
    let owner = DocumentId::new();
    let archetype = DocumentId::new();
    hub.register(archetype);
    let instance = InstanceId::new();

    let mut h = Hierarchy::new();
    let p = h.push_root(PartDesign::new(Entity::new("p"))).unwrap();
    h.push_child(p, linked("a", archetype, instance)).unwrap();
    h.push_root(linked("b", archetype, instance)).unwrap();

    let mut registry = InstanceRegistry::new();
    let mut mapping = ReverseMapping::new();
    registry.refresh(owner, &h, &mut mapping, &hub);
    assert_eq!(mapping.common_ancestor(instance), Some(CommonAncestor::Root));
}

#[test]
fn test_broken_ancestor_chain_is_unknown() {
    let mut h = Hierarchy::new();
    let p = h.push_root(PartDesign::new(Entity::new("p"))).unwrap();
    let instance = InstanceId::new();
    let mut current = BTreeMap::from([(instance, CommonAncestor::Part(PartId::new()))]);
    ReverseMapping::merge_common_ancestor(&mut current, &h, instance, Some(p));
    assert_eq!(current[&instance], CommonAncestor::Unknown);
    ReverseMapping::merge_common_ancestor(&mut current, &h, instance, None);
    assert_eq!(current[&instance], CommonAncestor::Unknown);
}

#[test]
fn test_refresh_skips_deleted_archetype_and_self_links() {
    let hub = Hub::new();
    let owner = DocumentId::new();
    let archetype = DocumentId::new();
    hub.register(owner);
    hub.register(archetype);
    let instance = InstanceId::new();

    let mut h = Hierarchy::new();
    h.push_root(linked("a", archetype, instance)).unwrap();
    h.push_root(linked("self", owner, InstanceId::new())).unwrap();

    let mut registry = InstanceRegistry::new();
    let mut mapping = ReverseMapping::new();
    registry.refresh(owner, &h, &mut mapping, &hub);
    assert_eq!(registry.archetype_documents().len(), 1);
    assert_eq!(mapping.mapped_keys().count(), 1);

    hub.mark_deleted(archetype);
    registry.refresh(owner, &h, &mut mapping, &hub);
    assert!(registry.archetype_documents().is_empty());
    assert!(hub.subscribers_of(archetype).is_empty());
}

#[test]
fn test_track_and_untrack_deleted() {
    let mut mapping: ReverseMapping<Entity> = ReverseMapping::new();
    let key = BaseInstanceKey::new(PartId::new(), InstanceId::new());
    assert_eq!(mapping.track_deleted([key, key]), 1);
    assert!(mapping.is_deleted(&key));
    assert_eq!(mapping.untrack_deleted([key]), 1);
    assert!(!mapping.is_deleted(&key));
}

// ============================================================================
// Resolver
// ============================================================================

#[test]
fn test_resolver_scans_forward_when_nothing_precedes() {
    let hub = Hub::new();
    let owner = DocumentId::new();
    let archetype_id = DocumentId::new();
    hub.register(archetype_id);
    let instance = InstanceId::new();

    let mut archetype = Hierarchy::new();
    let new_part = archetype.push_root(PartDesign::new(Entity::new("new"))).unwrap();
    let next = archetype.push_root(PartDesign::new(Entity::new("next"))).unwrap();

    let mut derived = Hierarchy::new();
    derived.push_root(PartDesign::new(Entity::new("own"))).unwrap();
    let next_copy = derived
        .push_root(PartDesign::with_base(
            Entity::new("next"),
            BasePart::new(archetype_id, next, instance),
        ))
        .unwrap();

    let mut registry = InstanceRegistry::new();
    let mut mapping = ReverseMapping::new();
    registry.refresh(owner, &derived, &mut mapping, &hub);

    let point = find_best_insert_index(&derived, &mapping, archetype_id, &archetype, new_part, instance)
        .unwrap();
    assert_eq!(point, InsertionPoint { parent: None, index: 1 });
    assert_eq!(derived.index_of(next_copy), Some(1));
}

#[test]
fn test_resolver_discards_when_parent_counterpart_missing() {
    let hub = Hub::new();
    let owner = DocumentId::new();
    let archetype_id = DocumentId::new();
    hub.register(archetype_id);
    let instance = InstanceId::new();

    let mut archetype = Hierarchy::new();
    let parent = archetype.push_root(PartDesign::new(Entity::new("parent"))).unwrap();
    let sibling = archetype.push_root(PartDesign::new(Entity::new("sibling"))).unwrap();
    let child = archetype.push_child(parent, PartDesign::new(Entity::new("child"))).unwrap();

    let mut derived = Hierarchy::new();
    derived
        .push_root(PartDesign::with_base(
            Entity::new("sibling"),
            BasePart::new(archetype_id, sibling, instance),
        ))
        .unwrap();
    let mut registry = InstanceRegistry::new();
    let mut mapping = ReverseMapping::new();
    registry.refresh(owner, &derived, &mut mapping, &hub);

    assert_eq!(
        find_best_insert_index(&derived, &mapping, archetype_id, &archetype, child, instance),
        None
    );
}

// ============================================================================
// Config, events, entity kind
// ============================================================================

#[test]
fn test_config_defaults_fill_missing_fields() {
    let config = SessionConfig::from_json_str(r#"{"finalize_on_load": false}"#).unwrap();
    assert!(!config.finalize_on_load);
    assert!(config.reconcile_after_propagation);
    assert_eq!(SessionConfig::from_json_str("{}").unwrap(), SessionConfig::default());
}

#[test]
fn test_event_display() {
    let event = PartEvent {
        document: DocumentId::from_u128(1),
        part: PartId::from_u128(2),
        parent: None,
        index: 0,
        change: PartChange::Removed,
        from_base: true,
    };
    let text = event.to_string();
    assert!(text.starts_with("removed 00000000-0000-0000-0000-000000000002"));
    assert!(text.ends_with("(from base)"));
}

#[test]
fn test_entity_reconcile_respects_overrides() {
    let base = PartDesign::new(
        Entity::new("Lamp")
            .with_component("mesh", "lamp.obj")
            .with_component("light", "warm"),
    );
    let mut derived = PartDesign::new(
        Entity::new("Old")
            .with_component("mesh", "custom.obj")
            .with_component("stale", "x")
            .with_component("extra", "y"),
    );
    derived.overrides.insert(Entity::component_path("mesh"));
    derived.overrides.insert(Entity::component_path("extra"));

    EntityHierarchy.reconcile_with_base(&mut derived, &base);
    assert_eq!(derived.part.name, "Lamp");
    assert_eq!(derived.part.components["mesh"], "custom.obj");
    assert_eq!(derived.part.components["light"], "warm");
    assert_eq!(derived.part.components["extra"], "y");
    assert!(!derived.part.components.contains_key("stale"));
}
