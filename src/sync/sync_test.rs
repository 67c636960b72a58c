#![allow(clippy::float_cmp)]

use std::time::Duration;

use crate::model::{ConnectorData, FrameData};
use crate::store::StoreEvent;

use super::*;

fn core() -> SyncCore {
    let identity = Identity::new(Uuid::new_v4(), Uuid::new_v4(), "alice");
    SyncCore::new(identity, &SyncConfig::default())
}

fn rect(left: f64, top: f64) -> CanvasObject {
    CanvasObject::shape(Geometry::rect(left, top, 100.0, 80.0))
}

fn writes(effects: &[Effect]) -> Vec<&WriteOp> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Write(ops) => Some(ops),
            _ => None,
        })
        .flatten()
        .collect()
}

fn writes_for(effects: &[Effect], id: ObjectId) -> Vec<&WriteOp> {
    writes(effects).into_iter().filter(|op| op.object_id() == id).collect()
}

fn written_object(op: &WriteOp) -> CanvasObject {
    match op {
        WriteOp::Upsert { payload, .. } => CanvasObject::from_payload(payload).unwrap(),
        WriteOp::Delete { object_id } => panic!("expected upsert, got delete of {object_id}"),
    }
}

fn remote_change(core: &SyncCore, obj: &CanvasObject, updated_at: i64) -> StoreEvent {
    StoreEvent::Changed(Document {
        board_id: core.identity().board_id,
        object_id: obj.id,
        payload: obj.to_payload().unwrap(),
        updated_at,
    })
}

fn children(core: &SyncCore, frame: ObjectId) -> Vec<ObjectId> {
    core.get(&frame).unwrap().as_frame().unwrap().child_ids.iter().copied().collect()
}

// =============================================================================
// ADD / MODIFY
// =============================================================================

#[test]
fn add_writes_immediately_and_assigns_z() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(10.0, 10.0);
    let id = obj.id;

    let effects = core.submit_add(obj, now);
    let ops = writes_for(&effects, id);
    assert_eq!(ops.len(), 1);
    let stored = written_object(ops[0]);
    assert!(stored.z_index.is_some());
    assert_eq!(core.get(&id).unwrap().z_index, stored.z_index);
    assert!(core.can_undo());
}

#[test]
fn add_of_identical_object_is_noop() {
    let mut core = core();
    let now = Instant::now();
    let obj = CanvasObject { z_index: Some(5), ..rect(10.0, 10.0) };
    core.submit_add(obj.clone(), now);
    assert!(core.submit_add(obj, now).is_empty());
}

#[test]
fn new_objects_stack_above_existing() {
    let mut core = core();
    let now = Instant::now();
    let high = CanvasObject { z_index: Some(i64::MAX / 2), ..rect(0.0, 0.0) };
    let high_z = high.z_key();
    core.submit_add(high, now);
    let obj = rect(10.0, 10.0);
    let id = obj.id;
    core.submit_add(obj, now);
    assert!(core.get(&id).unwrap().z_key() > high_z);
}

#[test]
fn modify_unknown_object_fails() {
    let mut core = core();
    let err = core.submit_modify(rect(0.0, 0.0), Instant::now()).unwrap_err();
    assert!(matches!(err, EditError::NotFound(_)));
}

#[test]
fn modify_is_throttled_per_object() {
    let mut core = core();
    let t0 = Instant::now();
    let mut obj = rect(0.0, 0.0);
    let id = obj.id;
    core.submit_add(obj.clone(), t0);

    obj.geometry.left = 1.0;
    assert_eq!(writes_for(&core.submit_modify(obj.clone(), t0).unwrap(), id).len(), 1);
    obj.geometry.left = 2.0;
    assert!(writes_for(&core.submit_modify(obj.clone(), t0 + Duration::from_millis(10)).unwrap(), id).is_empty());
    obj.geometry.left = 3.0;
    assert!(writes_for(&core.submit_modify(obj, t0 + Duration::from_millis(20)).unwrap(), id).is_empty());

    let deadline = core.next_deadline().unwrap();
    assert_eq!(deadline, t0 + Duration::from_millis(80));
    assert!(core.tick(t0 + Duration::from_millis(79)).is_empty());
    let effects = core.tick(deadline);
    let ops = writes_for(&effects, id);
    assert_eq!(ops.len(), 1);
    assert_eq!(written_object(ops[0]).geometry.left, 3.0);
}

#[test]
fn drag_at_sixty_hertz_writes_at_most_eight_times() {
    let mut core = core();
    let t0 = Instant::now();
    let mut obj = rect(10.0, 10.0);
    let id = obj.id;
    core.submit_add(obj.clone(), t0);

    let start = t0 + Duration::from_secs(1);
    core.select(&[id], start);
    core.begin_transform(&[id]);
    let mut count = 0;
    for frame in 0..30u64 {
        let now = start + Duration::from_micros(16_667 * frame);
        obj.geometry.left += 2.0;
        let mut effects = core.submit_modify(obj.clone(), now).unwrap();
        effects.extend(core.tick(now));
        count += writes_for(&effects, id).len();
    }
    let effects = core.end_transform(start + Duration::from_millis(500));
    let last = writes_for(&effects, id);
    count += last.len();

    assert!(count <= 8, "{count} writes for a 500 ms drag");
    assert_eq!(last.len(), 1);
    assert_eq!(written_object(last[0]).geometry.left, 70.0);
}

#[test]
fn gesture_records_one_history_entry() {
    let mut core = core();
    let t0 = Instant::now();
    let mut obj = rect(10.0, 10.0);
    let id = obj.id;
    core.submit_add(obj.clone(), t0);

    core.begin_transform(&[id]);
    for step in 1..=5u32 {
        obj.geometry.left = 10.0 + f64::from(step) * 10.0;
        core.submit_modify(obj.clone(), t0 + Duration::from_millis(u64::from(step) * 5)).unwrap();
    }
    core.end_transform(t0 + Duration::from_millis(40));
    assert_eq!(core.history.undo_len(), 2);

    core.undo(t0 + Duration::from_millis(50));
    assert_eq!(core.get(&id).unwrap().geometry.left, 10.0);
    core.undo(t0 + Duration::from_millis(60));
    assert!(core.get(&id).is_none());
}

#[test]
fn modify_preserves_derived_frame_children() {
    let mut core = core();
    let now = Instant::now();
    let frame = CanvasObject::frame(Geometry::rect(0.0, 0.0, 400.0, 400.0), "f");
    let frame_id = frame.id;
    core.submit_add(frame.clone(), now);
    let shape = rect(50.0, 50.0);
    let shape_id = shape.id;
    core.submit_add(shape, now);
    assert_eq!(children(&core, frame_id), vec![shape_id]);

    let mut retitled = frame;
    if let ObjectBody::Frame(FrameData { title, child_ids }) = &mut retitled.body {
        *title = "renamed".into();
        child_ids.clear();
    }
    core.submit_modify(retitled, now).unwrap();
    assert_eq!(children(&core, frame_id), vec![shape_id]);
}

#[test]
fn moving_frame_carries_children() {
    let mut core = core();
    let now = Instant::now();
    let frame = CanvasObject::frame(Geometry::rect(0.0, 0.0, 400.0, 400.0), "f");
    let frame_id = frame.id;
    core.submit_add(frame.clone(), now);
    let shape = rect(50.0, 50.0);
    let shape_id = shape.id;
    core.submit_add(shape, now);

    let mut moved = core.get(&frame_id).unwrap().clone();
    moved.geometry.left += 30.0;
    moved.geometry.top += 20.0;
    let effects = core.submit_modify(moved, now + Duration::from_secs(1)).unwrap();

    let child = core.get(&shape_id).unwrap();
    assert_eq!((child.geometry.left, child.geometry.top), (80.0, 70.0));
    assert_eq!(writes_for(&effects, shape_id).len(), 1);
    assert_eq!(children(&core, frame_id), vec![shape_id]);
}

#[test]
fn modify_composes_selection_container() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(100.0, 100.0);
    let id = obj.id;
    core.submit_add(obj.clone(), now);
    core.select(&[id], now);

    core.set_selection_container(Some(Geometry::rect(100.0, 100.0, 100.0, 80.0)));
    // Center-origin container space: the child's center sits 5 units right of the container's.
    let relative = CanvasObject { geometry: Geometry::rect(-45.0, -40.0, 100.0, 80.0), ..obj };
    core.submit_modify(relative, now).unwrap();
    assert_eq!(core.get(&id).unwrap().geometry.left, 105.0);
    assert_eq!(core.get(&id).unwrap().geometry.top, 100.0);
}

// =============================================================================
// TRANSLATE / DELTAS
// =============================================================================

#[test]
fn translate_publishes_delta_including_frame_children() {
    let mut core = core();
    let now = Instant::now();
    let frame = CanvasObject::frame(Geometry::rect(0.0, 0.0, 400.0, 400.0), "f");
    let frame_id = frame.id;
    core.submit_add(frame, now);
    let shape = rect(50.0, 50.0);
    let shape_id = shape.id;
    core.submit_add(shape, now);

    let effects = core.submit_translate(&[frame_id], 10.0, 0.0, now + Duration::from_secs(1));
    let delta = effects
        .iter()
        .find_map(|effect| match effect {
            Effect::PublishDelta(message) => Some(message.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(delta.sender_id, core.identity().client_id);
    assert!(delta.object_ids.contains(&frame_id));
    assert!(delta.object_ids.contains(&shape_id));
    assert_eq!(delta.dx, 10.0);
    assert_eq!(core.get(&shape_id).unwrap().geometry.left, 60.0);
}

#[test]
fn translate_of_frame_and_child_moves_child_once() {
    let mut core = core();
    let now = Instant::now();
    let frame = CanvasObject::frame(Geometry::rect(0.0, 0.0, 400.0, 400.0), "f");
    let frame_id = frame.id;
    core.submit_add(frame, now);
    let shape = rect(50.0, 50.0);
    let shape_id = shape.id;
    core.submit_add(shape, now);

    core.submit_translate(&[frame_id, shape_id], 10.0, 0.0, now);
    assert_eq!(core.get(&shape_id).unwrap().geometry.left, 60.0);
}

#[test]
fn zero_translate_does_nothing() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(0.0, 0.0);
    let id = obj.id;
    core.submit_add(obj, now);
    assert!(core.submit_translate(&[id], 0.0, 0.0, now).is_empty());
}

// =============================================================================
// REMOVE / Z-ORDER / CONNECTORS
// =============================================================================

#[test]
fn remove_floats_attached_connectors() {
    let mut core = core();
    let now = Instant::now();
    let target = rect(200.0, 0.0);
    let target_id = target.id;
    core.submit_add(target, now);
    let mut data = ConnectorData::floating(Point::new(0.0, 0.0), Point::new(0.0, 0.0));
    data.attach(Endpoint::Target, target_id, Port::Left);
    let connector = CanvasObject::connector(data);
    let connector_id = connector.id;
    core.submit_add(connector, now);

    let effects = core.submit_remove(target_id, now).unwrap();
    let ops = writes(&effects);
    assert!(ops.contains(&&WriteOp::Delete { object_id: target_id }));
    let floated = core.get(&connector_id).unwrap().as_connector().unwrap();
    assert_eq!(floated.attached_id(Endpoint::Target), None);
    assert_eq!(floated.float_point(Endpoint::Target), Point::new(200.0, 40.0));
    assert_eq!(writes_for(&effects, connector_id).len(), 1);
}

fn grouped_connector(core: &mut SyncCore, now: Instant) -> (ObjectId, ObjectId, ObjectId) {
    let member = rect(0.0, 0.0);
    let member_id = member.id;
    core.submit_add(member, now);
    let mut data = ConnectorData::floating(Point::new(0.0, 0.0), Point::new(500.0, 500.0));
    data.attach(Endpoint::Source, member_id, Port::Right);
    let connector = CanvasObject::connector(data);
    let connector_id = connector.id;
    core.submit_add(connector, now);
    let (container_id, _) = core.group(&[member_id], now).unwrap();
    core.deselect(&[container_id], now);
    (member_id, connector_id, container_id)
}

#[test]
fn removing_container_floats_connectors_on_its_members() {
    let mut core = core();
    let now = Instant::now();
    let (member_id, connector_id, container_id) = grouped_connector(&mut core, now);
    assert_eq!(core.path(&connector_id).unwrap().first().copied(), Some(Point::new(100.0, 40.0)));

    let effects = core.submit_remove(container_id, now).unwrap();
    let data = core.get(&connector_id).unwrap().as_connector().unwrap();
    assert_eq!(data.attached_id(Endpoint::Source), None);
    assert_eq!(data.float_point(Endpoint::Source), Point::new(100.0, 40.0));
    assert_eq!(core.path(&connector_id).unwrap().first().copied(), Some(Point::new(100.0, 40.0)));
    let written = writes_for(&effects, connector_id);
    assert_eq!(written.len(), 1);
    assert_eq!(written_object(written[0]).as_connector().unwrap().attached_id(Endpoint::Source), None);

    core.undo(now);
    let data = core.get(&connector_id).unwrap().as_connector().unwrap();
    assert_eq!(data.attached_id(Endpoint::Source), Some(member_id));
}

#[test]
fn remote_container_removal_floats_member_connectors_without_writing() {
    let mut core = core();
    let now = Instant::now();
    let (_, connector_id, container_id) = grouped_connector(&mut core, now);

    let effects = core.on_store_event(StoreEvent::Removed { object_id: container_id }, now);
    assert!(writes(&effects).is_empty());
    let data = core.get(&connector_id).unwrap().as_connector().unwrap();
    assert_eq!(data.attached_id(Endpoint::Source), None);
    assert_eq!(data.float_point(Endpoint::Source), Point::new(100.0, 40.0));
}

#[test]
fn ungroup_keeps_member_connectors_attached() {
    let mut core = core();
    let now = Instant::now();
    let (member_id, connector_id, container_id) = grouped_connector(&mut core, now);

    core.ungroup(container_id, now).unwrap();
    let data = core.get(&connector_id).unwrap().as_connector().unwrap();
    assert_eq!(data.attached_id(Endpoint::Source), Some(member_id));
}

#[test]
fn remove_unknown_object_fails() {
    let mut core = core();
    assert!(matches!(core.submit_remove(Uuid::new_v4(), Instant::now()), Err(EditError::NotFound(_))));
}

#[test]
fn bring_to_front_and_send_to_back_restack() {
    let mut core = core();
    let now = Instant::now();
    let a = CanvasObject { z_index: Some(1), ..rect(0.0, 0.0) };
    let b = CanvasObject { z_index: Some(2), ..rect(0.0, 0.0) };
    let (a_id, b_id) = (a.id, b.id);
    core.submit_add(a, now);
    core.submit_add(b, now);

    let effects = core.bring_to_front(a_id, now).unwrap();
    assert_eq!(writes_for(&effects, a_id).len(), 1);
    assert_eq!(core.index().ids_in_order(), vec![b_id, a_id]);

    core.send_to_back(a_id, now).unwrap();
    assert_eq!(core.index().ids_in_order(), vec![a_id, b_id]);
}

#[test]
fn frame_sent_to_back_captures_contained_objects() {
    let mut core = core();
    let now = Instant::now();
    let shape = CanvasObject { z_index: Some(1), ..rect(50.0, 50.0) };
    let shape_id = shape.id;
    core.submit_add(shape, now);
    let frame = CanvasObject { z_index: Some(2), ..CanvasObject::frame(Geometry::rect(0.0, 0.0, 400.0, 400.0), "f") };
    let frame_id = frame.id;
    core.submit_add(frame, now);
    assert!(children(&core, frame_id).is_empty());

    core.send_to_back(frame_id, now).unwrap();
    assert_eq!(children(&core, frame_id), vec![shape_id]);
}

#[test]
fn insert_at_writes_every_restacked_object() {
    let mut core = core();
    let now = Instant::now();
    let ids: Vec<ObjectId> = (1..=3)
        .map(|z| {
            let obj = CanvasObject { z_index: Some(z), ..rect(0.0, 0.0) };
            let id = obj.id;
            core.submit_add(obj, now);
            id
        })
        .collect();

    let effects = core.insert_at(ids[2], 1, now).unwrap();
    assert_eq!(core.index().ids_in_order(), vec![ids[0], ids[2], ids[1]]);
    let written: BTreeSet<ObjectId> = writes(&effects).iter().map(|op| op.object_id()).collect();
    assert!(written.contains(&ids[2]));
    assert!(written.contains(&ids[1]));
}

#[test]
fn connector_edits_are_written_and_undoable() {
    let mut core = core();
    let now = Instant::now();
    let connector = CanvasObject::connector(ConnectorData::floating(Point::new(0.0, 0.0), Point::new(100.0, 0.0)));
    let id = connector.id;
    core.submit_add(connector, now);

    let effects = core.insert_waypoint(id, 0, Point::new(50.0, 50.0), now).unwrap();
    assert_eq!(writes_for(&effects, id).len(), 1);
    assert_eq!(core.path(&id).unwrap().len(), 3);

    core.move_waypoint(id, 0, Point::new(50.0, 80.0), now).unwrap();
    assert_eq!(core.path(&id).unwrap()[1], Point::new(50.0, 80.0));

    assert!(matches!(
        core.remove_waypoint(id, 4, now),
        Err(EditError::WaypointOutOfRange { index: 4, len: 1 })
    ));

    core.undo(now);
    assert_eq!(core.path(&id).unwrap()[1], Point::new(50.0, 50.0));
}

#[test]
fn dropping_endpoint_on_shape_attaches_it() {
    let mut core = core();
    let now = Instant::now();
    let target = rect(200.0, 0.0);
    let target_id = target.id;
    core.submit_add(target, now);
    let connector = CanvasObject::connector(ConnectorData::floating(Point::new(0.0, 0.0), Point::new(50.0, 0.0)));
    let id = connector.id;
    core.submit_add(connector, now);

    let (port, _) = core.move_endpoint(id, Endpoint::Target, Point::new(195.0, 40.0), Some(target_id), now).unwrap();
    assert_eq!(port, Some(Port::Left));
    let path = core.path(&id).unwrap();
    assert_eq!(path.last().copied(), Some(Point::new(200.0, 40.0)));
}

// =============================================================================
// SELECTION / DEFERRAL
// =============================================================================

#[test]
fn select_requests_locks_and_notifies() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(0.0, 0.0);
    let id = obj.id;
    core.submit_add(obj, now);

    let effects = core.select(&[id], now);
    assert!(effects.iter().any(|effect| matches!(effect, Effect::AcquireLocks { records, .. } if records.len() == 1)));
    assert!(effects.contains(&Effect::Notify(Notice::SelectionChanged { ids: vec![id] })));
    assert!(core.locks().holds_locally(&id));

    let effects = core.deselect(&[id], now);
    assert!(effects.contains(&Effect::ReleaseLocks(vec![id])));
    assert!(core.selection().is_empty());
}

#[test]
fn remote_change_to_selected_object_is_deferred_until_deselect() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(0.0, 0.0);
    let id = obj.id;
    core.submit_add(obj.clone(), now);
    core.select(&[id], now);

    let remote = CanvasObject { geometry: Geometry::rect(500.0, 0.0, 100.0, 80.0), ..core.get(&id).unwrap().clone() };
    let effects = core.on_store_event(remote_change(&core, &remote, 1), now);
    assert!(!effects.iter().any(|effect| matches!(effect, Effect::Notify(Notice::ObjectsChanged { .. }))));
    assert_eq!(core.get(&id).unwrap().geometry.left, 0.0);

    let effects = core.deselect(&[id], now);
    assert_eq!(core.get(&id).unwrap().geometry.left, 500.0);
    assert!(effects.contains(&Effect::Notify(Notice::ObjectsChanged { ids: vec![id] })));
}

#[test]
fn deferred_change_is_dropped_when_local_write_supersedes_it() {
    let mut core = core();
    let now = Instant::now();
    let obj = rect(0.0, 0.0);
    let id = obj.id;
    core.submit_add(obj, now);
    core.select(&[id], now);

    let mut local = core.get(&id).unwrap().clone();
    local.geometry.left = 40.0;
    core.submit_modify(local, now + Duration::from_secs(1)).unwrap();
    let remote = CanvasObject { geometry: Geometry::rect(500.0, 0.0, 100.0, 80.0), ..core.get(&id).unwrap().clone() };
    core.on_store_event(remote_change(&core, &remote, 1), now);

    core.deselect(&[id], now);
    assert_eq!(core.get(&id).unwrap().geometry.left, 40.0);
}

#[test]
fn shutdown_flushes_and_releases_everything() {
    let mut core = core();
    let t0 = Instant::now();
    let mut obj = rect(0.0, 0.0);
    let id = obj.id;
    core.submit_add(obj.clone(), t0);
    core.select(&[id], t0);
    obj.geometry.left = 1.0;
    core.submit_modify(obj.clone(), t0).unwrap();
    obj.geometry.left = 2.0;
    core.submit_modify(obj, t0 + Duration::from_millis(1)).unwrap();

    let effects = core.shutdown(t0 + Duration::from_millis(2));
    assert_eq!(written_object(writes_for(&effects, id)[0]).geometry.left, 2.0);
    assert_eq!(effects.last(), Some(&Effect::ReleaseAllLocks));
    assert!(core.selection().is_empty());
    assert!(core.locks().held().is_empty());
}
