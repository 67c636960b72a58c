use uuid::Uuid;

use crate::geometry::Geometry;
use crate::model::CanvasObject;

use super::*;

fn manager() -> (LockManager, UserId) {
    let user = Uuid::new_v4();
    (LockManager::new(user, "alice"), user)
}

fn remote(object_id: ObjectId, name: &str) -> LockRecord {
    LockRecord { object_id, user_id: Uuid::new_v4(), user_name: name.to_owned(), last_active_at: 0 }
}

fn ticket_of(request: &LockRequest) -> u64 {
    match request {
        LockRequest::Requested { ticket, .. } => *ticket,
        LockRequest::Rejected { .. } => panic!("expected a request"),
    }
}

// =============================================================
// Requests
// =============================================================

#[test]
fn request_marks_pending_and_builds_records() {
    let (mut locks, user) = manager();
    let ids = [Uuid::new_v4(), Uuid::new_v4()];
    let LockRequest::Requested { ticket, records } = locks.request(&ids, 7) else {
        panic!("expected request");
    };
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.user_id == user && r.last_active_at == 7 && r.user_name == "alice"));
    for id in &ids {
        assert_eq!(locks.state(id), Some(&LockState::PendingLocal { ticket }));
        assert!(locks.holds_locally(id));
    }
}

#[test]
fn request_rejects_fast_when_remote_locked() {
    let (mut locks, _) = manager();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    locks.apply_remote(LockEvent::Acquired(remote(y, "bob")));
    assert_eq!(locks.request(&[x, y], 0), LockRequest::Rejected { blocked_by: vec![y] });
    assert!(!locks.holds_locally(&x));
}

#[test]
fn all_granted_confirms() {
    let (mut locks, _) = manager();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let ticket = ticket_of(&locks.request(&[x, y], 0));
    let resolution = locks.resolve(ticket, vec![(x, Ok(LockGrant::Granted)), (y, Ok(LockGrant::Granted))]);
    assert_eq!(resolution, LockResolution::Confirmed);
    assert_eq!(locks.state(&x), Some(&LockState::LockedLocal));
    assert_eq!(locks.held().len(), 2);
}

#[test]
fn one_denial_rolls_back_everything() {
    let (mut locks, _) = manager();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let ticket = ticket_of(&locks.request(&[x, y], 0));
    let resolution = locks.resolve(
        ticket,
        vec![(x, Ok(LockGrant::Granted)), (y, Ok(LockGrant::Denied { holder: remote(y, "bob") }))],
    );
    assert_eq!(resolution, LockResolution::RolledBack { release: vec![x], denied: vec![y] });
    assert!(!locks.holds_locally(&x));
    assert_eq!(locks.remote_holder(&y), Some("bob"));
}

#[test]
fn network_failure_counts_as_denial() {
    let (mut locks, _) = manager();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let ticket = ticket_of(&locks.request(&[x, y], 0));
    let resolution =
        locks.resolve(ticket, vec![(x, Ok(LockGrant::Granted)), (y, Err(StoreError::Unavailable("down".into())))]);
    assert!(matches!(resolution, LockResolution::RolledBack { ref release, .. } if release == &vec![x]));
    assert!(locks.held().is_empty());
    assert!(locks.state(&y).is_none());
}

#[test]
fn superseded_ticket_releases_only_unheld_grants() {
    let (mut locks, _) = manager();
    let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
    let old = ticket_of(&locks.request(&[x, y], 0));
    locks.release(&[x, y]);
    let new = ticket_of(&locks.request(&[y], 0));
    assert_ne!(old, new);

    let resolution = locks.resolve(old, vec![(x, Ok(LockGrant::Granted)), (y, Ok(LockGrant::Granted))]);
    assert_eq!(resolution, LockResolution::Superseded { release: vec![x] });
    assert_eq!(locks.state(&y), Some(&LockState::PendingLocal { ticket: new }));
}

#[test]
fn release_returns_only_held_ids() {
    let (mut locks, _) = manager();
    let (x, stranger) = (Uuid::new_v4(), Uuid::new_v4());
    locks.request(&[x], 0);
    assert_eq!(locks.release(&[x, stranger]), vec![x]);
    assert!(locks.release(&[x]).is_empty());
}

#[test]
fn release_all_keeps_remote_cache() {
    let (mut locks, _) = manager();
    let (mine, theirs) = (Uuid::new_v4(), Uuid::new_v4());
    locks.request(&[mine], 0);
    locks.apply_remote(LockEvent::Acquired(remote(theirs, "bob")));
    assert_eq!(locks.release_all(), vec![mine]);
    assert_eq!(locks.remote_holder(&theirs), Some("bob"));
}

#[test]
fn forget_reports_local_hold() {
    let (mut locks, _) = manager();
    let x = Uuid::new_v4();
    locks.request(&[x], 0);
    assert!(locks.forget(&x));
    assert!(!locks.forget(&x));
}

// =============================================================
// Remote feed
// =============================================================

#[test]
fn own_records_are_ignored() {
    let (mut locks, user) = manager();
    let x = Uuid::new_v4();
    let record = LockRecord { object_id: x, user_id: user, user_name: "alice".into(), last_active_at: 0 };
    assert!(locks.apply_remote(LockEvent::Acquired(record)).is_empty());
    assert!(locks.state(&x).is_none());
}

#[test]
fn remote_acquire_of_local_lock_reports_loss() {
    let (mut locks, _) = manager();
    let x = Uuid::new_v4();
    locks.request(&[x], 0);
    assert_eq!(locks.apply_remote(LockEvent::Acquired(remote(x, "bob"))), vec![x]);
    assert_eq!(locks.remote_holder(&x), Some("bob"));
}

#[test]
fn snapshot_replaces_remote_cache() {
    let (mut locks, _) = manager();
    let (old, fresh) = (Uuid::new_v4(), Uuid::new_v4());
    locks.apply_remote(LockEvent::Acquired(remote(old, "bob")));
    locks.apply_remote(LockEvent::Snapshot(vec![remote(fresh, "carol")]));
    assert!(locks.remote_holder(&old).is_none());
    assert_eq!(locks.remote_holder(&fresh), Some("carol"));
}

#[test]
fn release_event_requires_matching_holder() {
    let (mut locks, _) = manager();
    let x = Uuid::new_v4();
    let record = remote(x, "bob");
    let holder = record.user_id;
    locks.apply_remote(LockEvent::Acquired(record));
    locks.apply_remote(LockEvent::Released { object_id: x, user_id: Uuid::new_v4() });
    assert!(locks.remote_holder(&x).is_some());
    locks.apply_remote(LockEvent::Released { object_id: x, user_id: holder });
    assert!(locks.remote_holder(&x).is_none());
}

#[test]
fn interaction_flags_cover_every_object() {
    let (mut locks, _) = manager();
    let mut index = ObjectIndex::new();
    let free = CanvasObject::shape(Geometry::default());
    let blocked = CanvasObject::shape(Geometry::default());
    let (free_id, blocked_id) = (free.id, blocked.id);
    index.insert(free);
    index.insert(blocked);
    locks.apply_remote(LockEvent::Acquired(remote(blocked_id, "bob")));

    let flags = locks.interaction_flags(&index);
    assert_eq!(flags.len(), 2);
    let blocked_flags = flags.iter().find(|f| f.object_id == blocked_id).unwrap();
    assert!(!blocked_flags.selectable && !blocked_flags.evented);
    assert_eq!(blocked_flags.cursor, Cursor::NotAllowed);
    assert_eq!(blocked_flags.locked_by.as_deref(), Some("bob"));
    let free_flags = flags.iter().find(|f| f.object_id == free_id).unwrap();
    assert!(free_flags.selectable && free_flags.evented);
}
