#![allow(clippy::float_cmp)]

use std::time::Duration;

use uuid::Uuid;

use crate::config::SyncConfig;
use crate::geometry::{Geometry, Point};
use crate::locks::LockState;
use crate::model::{ConnectorData, Endpoint, Port};
use crate::store::LockRecord;
use crate::sync::Identity;
use crate::wire::{MoveDeltaMessage, encode_move_delta};

use super::*;

fn core() -> SyncCore {
    let identity = Identity::new(Uuid::new_v4(), Uuid::new_v4(), "alice");
    SyncCore::new(identity, &SyncConfig::default())
}

fn doc(core: &SyncCore, obj: &CanvasObject, updated_at: i64) -> Document {
    Document { board_id: core.identity().board_id, object_id: obj.id, payload: obj.to_payload().unwrap(), updated_at }
}

fn rect(left: f64) -> CanvasObject {
    CanvasObject { z_index: Some(1), ..CanvasObject::shape(Geometry::rect(left, 0.0, 100.0, 80.0)) }
}

fn bob(object_id: ObjectId) -> LockRecord {
    LockRecord { object_id, user_id: Uuid::new_v4(), user_name: "bob".into(), last_active_at: 0 }
}

fn changed(effects: &[Effect]) -> Vec<ObjectId> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Notify(Notice::ObjectsChanged { ids }) => Some(ids.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn has_write(effects: &[Effect]) -> bool {
    effects.iter().any(|effect| matches!(effect, Effect::Write(_)))
}

// =============================================================================
// DOCUMENT FEED
// =============================================================================

#[test]
fn remote_add_materializes_without_writing() {
    let mut core = core();
    let obj = rect(10.0);
    let id = obj.id;
    let effects = core.on_store_event(StoreEvent::Added(doc(&core, &obj, 100)), Instant::now());
    assert_eq!(changed(&effects), vec![id]);
    assert!(!has_write(&effects));
    assert_eq!(core.get(&id), Some(&obj));
    assert!(!core.can_undo());
}

#[test]
fn duplicate_delivery_is_idempotent() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(10.0);
    core.on_store_event(StoreEvent::Added(doc(&core, &obj, 100)), now);
    let effects = core.on_store_event(StoreEvent::Changed(doc(&core, &obj, 101)), now);
    assert!(effects.is_empty());
    assert_eq!(core.index().len(), 1);
}

#[test]
fn stale_echo_is_dropped_while_local_write_pending() {
    let mut core = core();
    let t0 = Instant::now();
    let mut obj = rect(0.0);
    let id = obj.id;
    core.submit_add(obj.clone(), t0);
    obj.geometry.left = 20.0;
    core.submit_modify(obj.clone(), t0).unwrap();
    let echoed = core.get(&id).unwrap().clone();
    obj.geometry.left = 30.0;
    core.submit_modify(obj, t0 + Duration::from_millis(10)).unwrap();

    let effects = core.on_store_event(StoreEvent::Changed(doc(&core, &echoed, 2)), t0 + Duration::from_millis(20));
    assert!(changed(&effects).is_empty());
    assert_eq!(core.get(&id).unwrap().geometry.left, 30.0);
    assert!(has_write(&core.tick(t0 + Duration::from_millis(100))));
}

#[test]
fn missing_z_index_falls_back_to_updated_at() {
    let mut core = core();
    let obj = CanvasObject::shape(Geometry::rect(0.0, 0.0, 10.0, 10.0));
    let id = obj.id;
    core.on_store_event(StoreEvent::Added(doc(&core, &obj, 4242)), Instant::now());
    assert_eq!(core.get(&id).unwrap().z_index, Some(4242));
}

#[test]
fn malformed_payload_is_dropped() {
    let mut core = core();
    let id = Uuid::new_v4();
    let bad = Document {
        board_id: core.identity().board_id,
        object_id: id,
        payload: serde_json::json!({ "id": id, "body": { "kind": "hexagon" } }),
        updated_at: 1,
    };
    assert!(core.on_store_event(StoreEvent::Added(bad), Instant::now()).is_empty());
    assert!(core.index().is_empty());
}

#[test]
fn payload_id_mismatch_is_dropped() {
    let mut core = core();
    let obj = rect(0.0);
    let mut mismatched = doc(&core, &obj, 1);
    mismatched.object_id = Uuid::new_v4();
    assert!(core.on_store_event(StoreEvent::Added(mismatched), Instant::now()).is_empty());
    assert!(core.index().is_empty());
}

#[test]
fn bulk_load_renders_once_at_completion() {
    let mut core = core();
    let now = Instant::now();
    let shape = rect(200.0);
    let mut data = ConnectorData::floating(Point::new(0.0, 0.0), Point::new(0.0, 0.0));
    data.attach(Endpoint::Target, shape.id, Port::Left);
    let connector = CanvasObject { z_index: Some(2), ..CanvasObject::connector(data) };
    let connector_id = connector.id;

    assert!(core.on_store_event(StoreEvent::BulkLoadStart, now).is_empty());
    assert!(core.is_bulk_loading());
    // Connector arrives before the shape it is attached to.
    assert!(core.on_store_event(StoreEvent::Added(doc(&core, &connector, 1)), now).is_empty());
    assert!(core.on_store_event(StoreEvent::Added(doc(&core, &shape, 2)), now).is_empty());

    let effects = core.on_store_event(StoreEvent::BulkLoadComplete, now);
    assert!(!core.is_bulk_loading());
    assert_eq!(effects.last(), Some(&Effect::Notify(Notice::RenderNeeded)));
    assert_eq!(core.path(&connector_id).unwrap().last().copied(), Some(Point::new(200.0, 40.0)));
}

#[test]
fn echo_of_own_write_yields_latency_sample() {
    let mut core = core();
    let t0 = Instant::now();
    let obj = rect(0.0);
    let id = obj.id;
    core.submit_add(obj.clone(), t0);
    let stored = core.get(&id).unwrap().clone();

    let effects = core.on_store_event(StoreEvent::Added(doc(&core, &stored, 1)), t0 + Duration::from_millis(30));
    let sample = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::Latency(sample) => Some(*sample),
            _ => None,
        })
        .unwrap();
    assert_eq!(sample.object_id, id);
    assert_eq!(sample.elapsed, Duration::from_millis(30));
    assert!(changed(&effects).is_empty());
}

#[test]
fn foreign_write_to_own_object_yields_no_latency_sample() {
    let mut core = core();
    let t0 = Instant::now();
    let obj = rect(0.0);
    let id = obj.id;
    core.submit_add(obj, t0);
    let mut theirs = core.get(&id).unwrap().clone();
    theirs.geometry.left = 50.0;

    let effects = core.on_store_event(StoreEvent::Changed(doc(&core, &theirs, 1)), t0 + Duration::from_millis(10));
    assert!(!effects.iter().any(|effect| matches!(effect, Effect::Latency(_))));

    let ours = CanvasObject { geometry: Geometry::rect(0.0, 0.0, 100.0, 80.0), ..theirs };
    let effects = core.on_store_event(StoreEvent::Changed(doc(&core, &ours, 2)), t0 + Duration::from_millis(40));
    let elapsed = effects.iter().find_map(|effect| match effect {
        Effect::Latency(sample) => Some(sample.elapsed),
        _ => None,
    });
    assert_eq!(elapsed, Some(Duration::from_millis(40)));
}

#[test]
fn remote_removal_floats_connectors_and_clears_selection() {
    let mut core = core();
    let now = Instant::now();
    let frame = CanvasObject {
        z_index: Some(0),
        ..CanvasObject::frame(Geometry::rect(0.0, 0.0, 1000.0, 1000.0), "f")
    };
    let frame_id = frame.id;
    let shape = rect(200.0);
    let shape_id = shape.id;
    let mut data = ConnectorData::floating(Point::new(0.0, 0.0), Point::new(0.0, 0.0));
    data.attach(Endpoint::Target, shape_id, Port::Left);
    let connector = CanvasObject { z_index: Some(2), ..CanvasObject::connector(data) };
    let connector_id = connector.id;
    core.submit_add(frame, now);
    core.submit_add(shape, now);
    core.submit_add(connector, now);
    assert!(core.get(&frame_id).unwrap().as_frame().unwrap().child_ids.contains(&shape_id));
    core.select(&[shape_id], now);

    let effects = core.on_store_event(StoreEvent::Removed { object_id: shape_id }, now);
    assert!(core.get(&shape_id).is_none());
    assert!(core.selection().is_empty());
    assert!(effects.contains(&Effect::ReleaseLocks(vec![shape_id])));
    assert!(!has_write(&effects));
    let floated = core.get(&connector_id).unwrap().as_connector().unwrap();
    assert_eq!(floated.attached_id(Endpoint::Target), None);
    assert_eq!(floated.float_point(Endpoint::Target), Point::new(200.0, 40.0));
    assert!(core.get(&frame_id).unwrap().as_frame().unwrap().child_ids.is_empty());
}

#[test]
fn removal_of_unknown_object_is_harmless() {
    let mut core = core();
    assert!(core.on_store_event(StoreEvent::Removed { object_id: Uuid::new_v4() }, Instant::now()).is_empty());
}

// =============================================================================
// LOCK FEED
// =============================================================================

#[test]
fn denied_lock_rolls_back_whole_selection() {
    let mut core = core();
    let now = Instant::now();
    let (x, y) = (rect(0.0), rect(300.0));
    let (x_id, y_id) = (x.id, y.id);
    core.submit_add(x, now);
    core.submit_add(y, now);

    let effects = core.select(&[x_id, y_id], now);
    let ticket = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::AcquireLocks { ticket, .. } => Some(*ticket),
            _ => None,
        })
        .unwrap();
    let results = vec![(x_id, Ok(LockGrant::Granted)), (y_id, Ok(LockGrant::Denied { holder: bob(y_id) }))];
    let effects = core.on_lock_results(ticket, results, now);

    assert!(core.selection().is_empty());
    assert!(effects.contains(&Effect::ReleaseLocks(vec![x_id])));
    assert!(effects.contains(&Effect::Notify(Notice::LockDenied { blocked_by: vec![y_id] })));
    assert!(core.locks().state(&x_id).is_none());
    assert_eq!(core.locks().remote_holder(&y_id), Some("bob"));
}

#[test]
fn failed_acquire_counts_as_denial() {
    let mut core = core();
    let now = Instant::now();
    let x = rect(0.0);
    let x_id = x.id;
    core.submit_add(x, now);
    core.select(&[x_id], now);
    let ticket = match core.locks().state(&x_id) {
        Some(LockState::PendingLocal { ticket }) => *ticket,
        other => panic!("unexpected lock state {other:?}"),
    };
    core.on_lock_results(ticket, vec![(x_id, Err(StoreError::Unavailable("down".into())))], now);
    assert!(core.selection().is_empty());
}

#[test]
fn selecting_remotely_locked_object_is_refused_locally() {
    let mut core = core();
    let now = Instant::now();
    let x = rect(0.0);
    let x_id = x.id;
    core.submit_add(x, now);
    core.on_lock_event(LockEvent::Acquired(bob(x_id)), now);

    let effects = core.select(&[x_id], now);
    assert!(!effects.iter().any(|effect| matches!(effect, Effect::AcquireLocks { .. })));
    assert!(effects.contains(&Effect::Notify(Notice::LockDenied { blocked_by: vec![x_id] })));
    assert!(core.selection().is_empty());
}

#[test]
fn losing_a_lock_revokes_the_selection() {
    let mut core = core();
    let now = Instant::now();
    let (x, y) = (rect(0.0), rect(300.0));
    let (x_id, y_id) = (x.id, y.id);
    core.submit_add(x, now);
    core.submit_add(y, now);
    core.select(&[x_id, y_id], now);

    let effects = core.on_lock_event(LockEvent::Acquired(bob(y_id)), now);
    assert!(core.selection().is_empty());
    assert!(effects.contains(&Effect::ReleaseLocks(vec![x_id])));
    let flags = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::Notify(Notice::InteractionFlags { flags }) => Some(flags.clone()),
            _ => None,
        })
        .unwrap();
    let y_flags = flags.iter().find(|flag| flag.object_id == y_id).unwrap();
    assert!(!y_flags.selectable);
    assert_eq!(y_flags.locked_by.as_deref(), Some("bob"));
}

#[test]
fn own_lock_events_are_ignored() {
    let mut core = core();
    let now = Instant::now();
    let x = rect(0.0);
    let x_id = x.id;
    core.submit_add(x, now);
    core.select(&[x_id], now);
    let own = LockRecord {
        object_id: x_id,
        user_id: core.identity().user_id,
        user_name: "alice".into(),
        last_active_at: 0,
    };
    core.on_lock_event(LockEvent::Acquired(own), now);
    assert_eq!(core.selection(), &[x_id]);
}

// =============================================================================
// MOVE DELTAS
// =============================================================================

fn delta(sender_id: Uuid, object_ids: Vec<ObjectId>, dx: f64, dy: f64) -> Vec<u8> {
    encode_move_delta(&MoveDeltaMessage { sender_id, object_ids, dx, dy })
}

#[test]
fn delta_moves_objects_without_writing() {
    let mut core = core();
    let obj = rect(0.0);
    let id = obj.id;
    core.on_store_event(StoreEvent::Added(doc(&core, &obj, 1)), Instant::now());

    let effects = core.on_delta(&delta(Uuid::new_v4(), vec![id], 5.0, -3.0));
    assert_eq!(changed(&effects), vec![id]);
    assert!(!has_write(&effects));
    let geometry = core.get(&id).unwrap().geometry;
    assert_eq!((geometry.left, geometry.top), (5.0, -3.0));
}

#[test]
fn own_and_active_deltas_are_ignored() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(0.0);
    let id = obj.id;
    core.on_store_event(StoreEvent::Added(doc(&core, &obj, 1)), now);

    let sender = core.identity().client_id;
    assert!(core.on_delta(&delta(sender, vec![id], 5.0, 0.0)).is_empty());

    core.select(&[id], now);
    assert!(core.on_delta(&delta(Uuid::new_v4(), vec![id], 5.0, 0.0)).is_empty());
    assert_eq!(core.get(&id).unwrap().geometry.left, 0.0);
}

#[test]
fn undecodable_delta_is_dropped() {
    let mut core = core();
    assert!(core.on_delta(&[0xff, 0xff, 0xff]).is_empty());
}
