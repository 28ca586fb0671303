//! Edge case and end-to-end tests for strand-tree
//!
//! Listener replay, settings compilation, constant pool sharing and the
//! outbound change protocol.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use serde_json::{Map, Value, json};
use strand_tree::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn data(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn counter() -> (Rc<Cell<u32>>, impl Fn(&DomEvent) + 'static) {
    let count = Rc::new(Cell::new(0));
    let c = count.clone();
    (count, move |_: &DomEvent| c.set(c.get() + 1))
}

fn listener_node(tree: &StateTree) -> (StateNode, ElementListenerMap) {
    let node = tree.create_node(&[FeatureKind::ElementListeners]);
    let listeners = node.listeners().cloned().unwrap();
    (node, listeners)
}

// ============================================================================
// PROPERTY ADD EVENTS
// ============================================================================

proptest! {
    #[test]
    fn prop_property_add_fires_once_per_name(names in prop::collection::vec("[a-d]{1,2}", 0..40)) {
        let map = NodeMap::new(NodeId(1), FeatureKind::ElementProperties);
        let added = Rc::new(RefCell::new(Vec::new()));

        let a = added.clone();
        let _remover = map.add_property_add_listener(move |e| {
            a.borrow_mut().push(e.property.name().to_string());
        });

        let mut expected: Vec<String> = Vec::new();
        for name in &names {
            map.get_property(name);
            if !expected.contains(name) {
                expected.push(name.clone());
            }
        }

        prop_assert_eq!(&*added.borrow(), &expected);
    }

    #[test]
    fn prop_pool_dedups_equal_values(values in prop::collection::vec(0i64..5, 1..30)) {
        let pool = ConstantPool::new();
        let mut distinct = std::collections::BTreeSet::new();
        for v in &values {
            let first = pool.intern(json!({"v": v}));
            let second = pool.intern(json!({"v": v}));
            prop_assert_eq!(first.id(), second.id());
            distinct.insert(*v);
        }
        prop_assert_eq!(pool.len(), distinct.len());
    }
}

// ============================================================================
// SETTINGS COMPILATION
// ============================================================================

#[test]
fn test_unconfigured_listener_settings() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);

    assert_eq!(listeners.event_settings("click"), None);

    let reg = listeners.add("click", |_| {}).unwrap();
    reg.set_filter(None).unwrap();
    assert_eq!(listeners.event_settings("click"), Some(json!({})));

    reg.set_filter(Some("ok")).unwrap();
    assert_eq!(listeners.event_settings("click"), Some(json!({"ok": true})));

    reg.debounce(250, DebouncePhase::Leading, &[DebouncePhase::Trailing])
        .unwrap();
    assert_eq!(
        listeners.event_settings("click"),
        Some(json!({"ok": [[250, "leading", "trailing"]]}))
    );
}

#[test]
fn test_unfiltered_listener_not_starved() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);

    listeners.add("click", |_| {}).unwrap();
    listeners
        .add("click", |_| {})
        .unwrap()
        .set_filter(Some("event.shiftKey"))
        .unwrap();

    let settings = listeners.event_settings("click").unwrap();
    assert_eq!(settings.get("event.shiftKey"), Some(&json!(true)));
    assert_eq!(settings.get(ALWAYS_TRUE_FILTER), Some(&json!(true)));
}

#[test]
fn test_debounced_filter_with_unfiltered_listener() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);

    listeners.add("input", |_| {}).unwrap();
    listeners
        .add("input", |_| {})
        .unwrap()
        .debounce(300, DebouncePhase::Trailing, &[])
        .unwrap();

    // The debounced listener uses the always-true filter, which also gets
    // the synthesized zero-timeout leading entry.
    assert_eq!(
        listeners.event_settings("input"),
        Some(json!({"1": [[0, "leading"], [300, "trailing"]]}))
    );
}

#[test]
fn test_event_data_and_filter_together() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);

    listeners
        .add("keydown", |_| {})
        .unwrap()
        .add_event_data("event.key")
        .unwrap()
        .set_filter(Some("event.key === 'Enter'"))
        .unwrap();

    assert_eq!(
        listeners.event_settings("keydown"),
        Some(json!({"event.key": false, "event.key === 'Enter'": true}))
    );
    assert_eq!(listeners.expressions("keydown").len(), 2);
}

#[test]
fn test_settings_are_per_event_type() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);

    listeners.add("click", |_| {}).unwrap().set_filter(Some("a")).unwrap();
    listeners.add("input", |_| {}).unwrap();

    assert_eq!(listeners.event_settings("click"), Some(json!({"a": true})));
    assert_eq!(listeners.event_settings("input"), Some(json!({})));
    assert_eq!(listeners.event_types(), vec!["click", "input"]);
}

// ============================================================================
// REPLAY
// ============================================================================

#[test]
fn test_disabled_update_mode() {
    init_tracing();
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let (default_count, default_listener) = counter();
    let (always_count, always_listener) = counter();
    listeners.add("click", default_listener).unwrap();
    listeners
        .add("click", always_listener)
        .unwrap()
        .set_disabled_update_mode(DisabledUpdateMode::Always)
        .unwrap();

    node.set_enabled(false);
    tree.dispatch_event(&DomEvent::for_node(&node, "click", None)).unwrap();
    assert_eq!(default_count.get(), 0);
    assert_eq!(always_count.get(), 1);

    node.set_enabled(true);
    tree.dispatch_event(&DomEvent::for_node(&node, "click", None)).unwrap();
    assert_eq!(default_count.get(), 1);
    assert_eq!(always_count.get(), 2);
}

#[test]
fn test_dispatch_to_disabled_node_ignores_event_flag() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let (count, listener) = counter();
    listeners.add("click", listener).unwrap();

    node.set_enabled(false);
    tree.dispatch_event(&DomEvent::new(node.id(), "click", None)).unwrap();
    assert_eq!(count.get(), 0);
}

#[test]
fn test_filter_missing_field_never_fires() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let (count, listener) = counter();
    listeners.add("click", listener).unwrap().set_filter(Some("ok")).unwrap();

    listeners.fire_event(&DomEvent::for_node(&node, "click", None));
    listeners.fire_event(&DomEvent::for_node(&node, "click", data(json!({"other": true}))));
    listeners.fire_event(&DomEvent::for_node(&node, "click", data(json!({"ok": "yes"}))));
    assert_eq!(count.get(), 0);

    listeners.fire_event(&DomEvent::for_node(&node, "click", data(json!({"ok": true}))));
    assert_eq!(count.get(), 1);
}

#[test]
fn test_phase_matching() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let (plain_count, plain) = counter();
    let (trailing_count, trailing) = counter();
    listeners.add("input", plain).unwrap();
    listeners
        .add("input", trailing)
        .unwrap()
        .debounce(300, DebouncePhase::Trailing, &[])
        .unwrap();

    for phase in [DebouncePhase::Leading, DebouncePhase::Intermediate, DebouncePhase::Trailing] {
        listeners.fire_event(&DomEvent::for_node(&node, "input", None).with_phase(phase));
    }

    assert_eq!(plain_count.get(), 1);
    assert_eq!(trailing_count.get(), 1);
}

#[test]
fn test_fire_unknown_type_is_noop() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);
    listeners.fire_event(&DomEvent::for_node(&node, "click", None));

    let (count, listener) = counter();
    listeners.add("click", listener).unwrap();
    listeners.fire_event(&DomEvent::for_node(&node, "dblclick", None));
    assert_eq!(count.get(), 0);
}

#[test]
fn test_listener_removing_itself_during_replay() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let order = Rc::new(RefCell::new(Vec::new()));
    let slot: Rc<RefCell<Option<DomListenerRegistration>>> = Rc::new(RefCell::new(None));

    let o = order.clone();
    let s = slot.clone();
    let first = listeners
        .add("click", move |_| {
            o.borrow_mut().push("first");
            if let Some(reg) = s.borrow_mut().take() {
                reg.remove();
            }
        })
        .unwrap();
    *slot.borrow_mut() = Some(first);

    let o = order.clone();
    listeners
        .add("click", move |_| o.borrow_mut().push("second"))
        .unwrap();

    listeners.fire_event(&DomEvent::for_node(&node, "click", None));
    assert_eq!(*order.borrow(), vec!["first", "second"]);
    assert_eq!(listeners.listener_count("click"), 1);

    listeners.fire_event(&DomEvent::for_node(&node, "click", None));
    assert_eq!(*order.borrow(), vec!["first", "second", "second"]);
}

#[test]
fn test_listener_added_during_replay_waits() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);
    let (count, listener) = counter();
    let pending = Rc::new(RefCell::new(Some(listener)));

    let map = listeners.clone();
    let p = pending.clone();
    listeners
        .add("click", move |_| {
            if let Some(listener) = p.borrow_mut().take() {
                let _ = map.add("click", listener);
            }
        })
        .unwrap();

    listeners.fire_event(&DomEvent::for_node(&node, "click", None));
    assert_eq!(count.get(), 0);

    listeners.fire_event(&DomEvent::for_node(&node, "click", None));
    assert_eq!(count.get(), 1);
}

#[test]
fn test_end_to_end_filtered_and_unfiltered() {
    init_tracing();
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let (a_count, a) = counter();
    let (b_count, b) = counter();
    listeners.add("click", a).unwrap();
    listeners
        .add("click", b)
        .unwrap()
        .set_filter(Some("ok"))
        .unwrap()
        .debounce(0, DebouncePhase::Leading, &[])
        .unwrap();

    let id = node.id();
    tree.handle_event_message(&json!({"node": id, "event": "click", "data": {"ok": true}}))
        .unwrap();
    assert_eq!((a_count.get(), b_count.get()), (1, 1));

    tree.handle_event_message(&json!({"node": id, "event": "click", "data": {"ok": false}}))
        .unwrap();
    assert_eq!((a_count.get(), b_count.get()), (2, 1));

    let settings = listeners.event_settings("click").unwrap();
    assert_eq!(settings, json!({"ok": true, "1": true}));
}

#[test]
fn test_message_phase_routes_to_debounced_listener() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let (count, listener) = counter();
    listeners
        .add("input", listener)
        .unwrap()
        .debounce(300, DebouncePhase::Trailing, &[])
        .unwrap();

    let id = node.id();
    tree.handle_event_message(&json!({"node": id, "event": "input", "data": {"for": "leading"}}))
        .unwrap();
    assert_eq!(count.get(), 0);
    tree.handle_event_message(&json!({"node": id, "event": "input", "data": {"for": "trailing"}}))
        .unwrap();
    assert_eq!(count.get(), 1);
}

// ============================================================================
// REMOVAL
// ============================================================================

#[test]
fn test_remove_last_listener_sends_remove_change() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);

    let reg = listeners.add("click", |_| {}).unwrap();
    let batch = tree.collect_changes();
    assert!(batch.changes.contains(&NodeChange::Attach { node: node.id() }));
    assert!(batch.constants.is_some());

    reg.remove();
    assert!(listeners.event_types().is_empty());
    assert_eq!(listeners.event_settings("click"), None);

    let batch = tree.collect_changes();
    assert_eq!(
        batch.changes,
        vec![NodeChange::Remove {
            node: node.id(),
            feat: FeatureKind::ElementListeners.id(),
            key: "click".into(),
        }]
    );
    assert!(batch.constants.is_none());
}

#[test]
fn test_readd_after_removal_starts_fresh() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);

    let reg = listeners.add("click", |_| {}).unwrap();
    reg.set_filter(Some("x")).unwrap();
    reg.remove();

    listeners.add("click", |_| {}).unwrap();
    assert_eq!(listeners.event_settings("click"), Some(json!({})));
    assert_eq!(listeners.listener_count("click"), 1);
}

// ============================================================================
// CONSTANT POOL AND CHANGES
// ============================================================================

#[test]
fn test_common_settings_transmitted_once() {
    let tree = StateTree::new();
    for _ in 0..5 {
        let (_node, listeners) = listener_node(&tree);
        listeners.add("click", |_| {}).unwrap();
    }

    let batch = tree.collect_changes();
    let constants = batch.constants.unwrap();
    assert_eq!(constants.len(), 1);

    let (id, value) = constants.iter().next().unwrap();
    assert_eq!(value, &json!({}));
    let puts: Vec<&NodeChange> = batch
        .changes
        .iter()
        .filter(|c| matches!(c, NodeChange::Put { .. }))
        .collect();
    assert_eq!(puts.len(), 5);
    for put in puts {
        if let NodeChange::Put { value, .. } = put {
            assert_eq!(value.to_wire(), json!(id));
        }
    }
}

#[test]
fn test_only_referenced_settings_are_sent() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);

    let reg = listeners.add("click", |_| {}).unwrap();
    reg.set_filter(Some("ok")).unwrap();
    reg.debounce(100, DebouncePhase::Trailing, &[]).unwrap();
    reg.debounce(0, DebouncePhase::Leading, &[]).unwrap();

    let constants = tree.collect_changes().constants.unwrap();
    let key = ConstantPoolKey::new(json!({"ok": true}));
    assert_eq!(constants.len(), 1);
    assert_eq!(constants.get(key.id()), Some(&json!({"ok": true})));
    assert_eq!(tree.constant_pool().len(), 1);
}

#[test]
fn test_change_batch_json() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);
    listeners.add("click", |_| {}).unwrap().set_filter(Some("ok")).unwrap();

    let json = tree.collect_changes().to_json();
    let key = ConstantPoolKey::new(json!({"ok": true}));
    assert_eq!(
        json,
        json!({
            "changes": [
                {"type": "attach", "node": node.id()},
                {"type": "put", "node": node.id(), "feat": 3, "key": "click", "value": key.id()},
            ],
            "constants": {key.id(): {"ok": true}},
        })
    );
}

#[test]
fn test_detached_node_changes_not_collected() {
    let tree = StateTree::new();
    let (node, listeners) = listener_node(&tree);
    tree.collect_changes();

    listeners.add("click", |_| {}).unwrap();
    tree.detach(node.id()).unwrap();

    let batch = tree.collect_changes();
    assert_eq!(batch.changes, vec![NodeChange::Detach { node: node.id() }]);
    assert!(matches!(
        tree.dispatch_event(&DomEvent::for_node(&node, "click", None)),
        Err(TreeError::UnknownNode(_))
    ));
}

#[test]
fn test_configured_tree() {
    let config =
        TreeConfig::from_json(r#"{"always_true_filter": "true", "constant_key_bytes": 16}"#)
            .unwrap();
    let tree = StateTree::with_config(config);
    let (_node, listeners) = listener_node(&tree);

    listeners
        .add("input", |_| {})
        .unwrap()
        .debounce(100, DebouncePhase::Trailing, &[])
        .unwrap();

    assert_eq!(
        listeners.event_settings("input"),
        Some(json!({"true": [[100, "trailing"]]}))
    );
    let value = listeners.node_map().get("input").unwrap();
    assert_eq!(value.as_constant().unwrap().id().len(), 24);
}

// ============================================================================
// REACTIVITY ACROSS THE TREE
// ============================================================================

#[test]
fn test_computation_tracks_listener_key_set() {
    let tree = StateTree::new();
    let (_node, listeners) = listener_node(&tree);
    let reactive = tree.reactive().clone();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let map = listeners.node_map().clone();
    let computation = reactive.run_when_dependencies_change(move |ctx| {
        let mut names = Vec::new();
        map.for_each_property(ctx, |name, _| names.push(name.to_string()));
        s.borrow_mut().push(names);
    });

    let reg = listeners.add("click", |_| {}).unwrap();
    assert!(computation.is_invalidated());
    reactive.flush();

    // Recompiling settings for an existing type does not touch the key set
    reg.set_filter(Some("x")).unwrap();
    assert!(!computation.is_invalidated());

    assert_eq!(*seen.borrow(), vec![Vec::<String>::new(), vec!["click".to_string()]]);
}

#[test]
fn test_dropped_computation_handle_keeps_tracking() {
    let tree = StateTree::new();
    let map = NodeMap::new(NodeId(1), FeatureKind::ElementProperties);
    let runs = Rc::new(Cell::new(0));

    let (m, r) = (map.clone(), runs.clone());
    drop(tree.reactive().run_when_dependencies_change(move |ctx| {
        m.for_each_property(ctx, |_, _| {});
        r.set(r.get() + 1);
    }));

    map.get_property("x");
    tree.reactive().flush();
    assert_eq!(runs.get(), 2);

    map.get_property("y");
    tree.reactive().flush();
    assert_eq!(runs.get(), 3);
}
