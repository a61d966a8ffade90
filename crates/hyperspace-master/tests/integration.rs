//! Integration tests for master semantics across sessions and handles.
//!
//! These tests drive the master API directly and verify lock promotion,
//! session teardown, ephemeral nodes and event delivery.

mod common;

use common::{new_master, open, session, RecordingSink};
use hyperspace_master::{
    EventMask, HyperspaceError, LockMode, LockStatus, Notification, OpenFlags,
};

#[tokio::test]
async fn test_fifo_promotion_without_jumping() {
    let master = new_master();
    let sink = RecordingSink::new();
    let [sh, sa, sb, sc] = [(); 4].map(|_| session(&master));
    let h = open(&master, sh, "/lockdir", &sink);
    let a = open(&master, sa, "/lockdir", &sink);
    let b = open(&master, sb, "/lockdir", &sink);
    let c = open(&master, sc, "/lockdir", &sink);

    assert!(matches!(
        master.lock(sh, h, LockMode::Exclusive).unwrap(),
        LockStatus::Granted { .. }
    ));
    assert_eq!(master.lock(sa, a, LockMode::Shared).unwrap(), LockStatus::Queued);
    assert_eq!(master.lock(sb, b, LockMode::Exclusive).unwrap(), LockStatus::Queued);
    assert_eq!(master.lock(sc, c, LockMode::Shared).unwrap(), LockStatus::Queued);

    // only A: B is exclusive and C may not overtake it
    master.release(sh, h).unwrap();
    let info = master.lock_info("/lockdir").unwrap();
    assert_eq!(info.mode, LockMode::Shared);
    assert_eq!(info.holders.iter().map(|x| x.handle).collect::<Vec<_>>(), vec![a]);
    assert_eq!(info.waiters.iter().map(|w| w.handle).collect::<Vec<_>>(), vec![b, c]);

    master.release(sa, a).unwrap();
    let info = master.lock_info("/lockdir").unwrap();
    assert_eq!(info.mode, LockMode::Exclusive);
    assert_eq!(info.holders[0].handle, b);

    master.release(sb, b).unwrap();
    let info = master.lock_info("/lockdir").unwrap();
    assert_eq!(info.mode, LockMode::Shared);
    assert_eq!(info.holders[0].handle, c);
    assert!(info.waiters.is_empty());

    master.flush().await;
    assert_eq!(
        sink.for_handle(a),
        vec![Notification::LockAcquired, Notification::LockReleased]
    );
    assert_eq!(
        sink.for_handle(b),
        vec![Notification::LockAcquired, Notification::LockReleased]
    );
    assert_eq!(sink.for_handle(c), vec![Notification::LockAcquired]);
    master.check_invariants().unwrap();
}

#[tokio::test]
async fn test_shared_waiters_promoted_together() {
    let master = new_master();
    let sink = RecordingSink::new();
    let [sh, sa, sb] = [(); 3].map(|_| session(&master));
    let h = open(&master, sh, "/f", &sink);
    let a = open(&master, sa, "/f", &sink);
    let b = open(&master, sb, "/f", &sink);

    master.lock(sh, h, LockMode::Exclusive).unwrap();
    master.lock(sa, a, LockMode::Shared).unwrap();
    master.lock(sb, b, LockMode::Shared).unwrap();
    master.release(sh, h).unwrap();

    let info = master.lock_info("/f").unwrap();
    assert_eq!(info.mode, LockMode::Shared);
    assert_eq!(info.holders.len(), 2);
    assert!(info.waiters.is_empty());
}

#[tokio::test]
async fn test_lock_acquired_released_end_to_end() {
    let master = new_master();
    let sink = RecordingSink::new();
    let (sa, sb) = (session(&master), session(&master));
    let a = open(&master, sa, "/lockdir", &sink);
    let b = open(&master, sb, "/lockdir", &sink);

    let LockStatus::Granted { generation: first } =
        master.lock(sa, a, LockMode::Exclusive).unwrap()
    else {
        panic!("first exclusive request should be granted");
    };
    assert_eq!(master.lock(sb, b, LockMode::Exclusive).unwrap(), LockStatus::Queued);
    assert!(matches!(
        master.lock(sb, b, LockMode::Shared),
        Err(HyperspaceError::AlreadyHolding(_))
    ));

    master.release(sa, a).unwrap();
    master.flush().await;
    assert_eq!(
        sink.for_handle(a),
        vec![Notification::LockAcquired, Notification::LockReleased]
    );
    assert_eq!(sink.for_handle(b), vec![Notification::LockAcquired]);
    assert!(master.lock_info("/lockdir").unwrap().generation > first);

    assert!(matches!(
        master.release(sa, a),
        Err(HyperspaceError::NotLockHolder(_))
    ));
}

#[tokio::test]
async fn test_foreign_session_cannot_use_handle() {
    let master = new_master();
    let sink = RecordingSink::new();
    let owner = session(&master);
    let stranger = session(&master);
    let h = open(&master, owner, "/guarded", &sink);
    master.attr_set(owner, h, "k", b"v").unwrap();
    master.lock(owner, h, LockMode::Exclusive).unwrap();

    assert_eq!(master.close(stranger, h), Err(HyperspaceError::BadHandle(h)));
    assert_eq!(master.release(stranger, h), Err(HyperspaceError::BadHandle(h)));
    assert_eq!(
        master.attr_get(stranger, h, "k"),
        Err(HyperspaceError::BadHandle(h))
    );
    assert_eq!(
        master.try_lock(stranger, h, LockMode::Shared),
        Err(HyperspaceError::BadHandle(h))
    );

    // untouched for its owner
    assert_eq!(master.lock_info("/guarded").unwrap().holders[0].handle, h);
    assert_eq!(master.attr_get(owner, h, "k").unwrap(), b"v".to_vec());
    master.release(owner, h).unwrap();
    master.close(owner, h).unwrap();
    assert_eq!(master.status().unwrap().handles, 0);
}

#[tokio::test]
async fn test_destroy_session_releases_everything_at_once() {
    let master = new_master();
    let sink = RecordingSink::new();
    let doomed = session(&master);
    let other = session(&master);

    let watcher = open(&master, other, "/", &sink);
    let held = open(&master, doomed, "/a", &sink);
    let blocker = open(&master, other, "/b", &sink);
    let queued = open(&master, doomed, "/b", &sink);
    let eph = master
        .open(
            doomed,
            "/e",
            OpenFlags::CREATE | OpenFlags::EPHEMERAL,
            EventMask::ALL,
            sink.clone(),
        )
        .unwrap();
    let waiter = open(&master, other, "/a", &sink);

    master.lock(doomed, held, LockMode::Exclusive).unwrap();
    master.lock(other, blocker, LockMode::Exclusive).unwrap();
    assert_eq!(
        master.lock(doomed, queued, LockMode::Shared).unwrap(),
        LockStatus::Queued
    );
    assert_eq!(
        master.lock(other, waiter, LockMode::Shared).unwrap(),
        LockStatus::Queued
    );
    master.flush().await;
    sink.clear();

    master.destroy_session(doomed).unwrap();
    master.flush().await;

    assert_eq!(sink.for_handle(held), vec![Notification::LockReleased]);
    assert_eq!(sink.for_handle(waiter), vec![Notification::LockAcquired]);
    assert_eq!(
        sink.for_handle(watcher),
        vec![Notification::ChildNodeRemoved("e".into())]
    );
    assert!(sink.for_handle(queued).is_empty());
    assert!(sink.for_handle(eph).is_empty());

    for h in [held, queued, eph] {
        assert!(matches!(
            master.attr_list(other, h),
            Err(HyperspaceError::BadHandle(_))
        ));
    }
    assert!(!master.exists(other, "/e").unwrap());
    assert!(master.lock_info("/b").unwrap().waiters.is_empty());
    assert!(matches!(
        master.keepalive(doomed),
        Err(HyperspaceError::NoSuchSession(_))
    ));
    master.check_invariants().unwrap();
}

#[tokio::test]
async fn test_ephemeral_node_outlives_all_but_last_handle() {
    let master = new_master();
    let sink = RecordingSink::new();
    let owner = session(&master);
    let observer = session(&master);
    let watcher = master
        .open(observer, "/", OpenFlags::NONE, EventMask::CHILD_NODE_REMOVED, sink.clone())
        .unwrap();

    let first = master
        .open(
            owner,
            "/eph",
            OpenFlags::CREATE | OpenFlags::EPHEMERAL,
            EventMask::NONE,
            sink.clone(),
        )
        .unwrap();
    let second = master
        .open(observer, "/eph", OpenFlags::NONE, EventMask::NONE, sink.clone())
        .unwrap();

    master.close(owner, first).unwrap();
    assert!(master.exists(observer, "/eph").unwrap());

    master.close(observer, second).unwrap();
    assert!(!master.exists(observer, "/eph").unwrap());

    master.flush().await;
    assert_eq!(
        sink.for_handle(watcher),
        vec![Notification::ChildNodeRemoved("eph".into())]
    );
}

#[tokio::test]
async fn test_ephemeral_directory_removed_with_last_child() {
    let master = new_master();
    let sink = RecordingSink::new();
    let owner = session(&master);
    let flags = OpenFlags::CREATE | OpenFlags::EPHEMERAL;

    let dir = master
        .open(owner, "/tmp", flags | OpenFlags::DIRECTORY, EventMask::NONE, sink.clone())
        .unwrap();
    let child = master
        .open(owner, "/tmp/c", flags, EventMask::NONE, sink.clone())
        .unwrap();

    master.close(owner, dir).unwrap();
    assert!(master.exists(owner, "/tmp").unwrap());

    master.close(owner, child).unwrap();
    assert!(!master.exists(owner, "/tmp/c").unwrap());
    assert!(!master.exists(owner, "/tmp").unwrap());
}

#[tokio::test]
async fn test_deleting_last_child_removes_idle_ephemeral_parent() {
    let master = new_master();
    let sink = RecordingSink::new();
    let owner = session(&master);
    let observer = session(&master);
    let watcher = master
        .open(observer, "/", OpenFlags::NONE, EventMask::CHILD_NODE_REMOVED, sink.clone())
        .unwrap();

    let dir = master
        .open(
            owner,
            "/tmp",
            OpenFlags::CREATE | OpenFlags::EPHEMERAL | OpenFlags::DIRECTORY,
            EventMask::NONE,
            sink.clone(),
        )
        .unwrap();
    master.mkdir(owner, "/tmp/c").unwrap();
    master.close(owner, dir).unwrap();
    assert!(master.exists(owner, "/tmp").unwrap());

    master.delete(owner, "/tmp/c").unwrap();
    assert!(!master.exists(owner, "/tmp/c").unwrap());
    assert!(!master.exists(owner, "/tmp").unwrap());

    master.flush().await;
    assert_eq!(
        sink.for_handle(watcher),
        vec![Notification::ChildNodeRemoved("tmp".into())]
    );
    master.check_invariants().unwrap();
}

#[tokio::test]
async fn test_delete_keeps_ephemeral_parent_with_open_handle() {
    let master = new_master();
    let sink = RecordingSink::new();
    let owner = session(&master);
    let dir = master
        .open(
            owner,
            "/tmp",
            OpenFlags::CREATE | OpenFlags::EPHEMERAL | OpenFlags::DIRECTORY,
            EventMask::NONE,
            sink.clone(),
        )
        .unwrap();
    master.mkdir(owner, "/tmp/c").unwrap();

    master.delete(owner, "/tmp/c").unwrap();
    assert!(master.exists(owner, "/tmp").unwrap());

    master.close(owner, dir).unwrap();
    assert!(!master.exists(owner, "/tmp").unwrap());
}

#[tokio::test]
async fn test_closed_handle_is_bad() {
    let master = new_master();
    let sink = RecordingSink::new();
    let s = session(&master);
    let h = open(&master, s, "/x", &sink);
    master.attr_set(s, h, "k", b"v").unwrap();

    master.close(s, h).unwrap();
    assert!(matches!(master.attr_get(s, h, "k"), Err(HyperspaceError::BadHandle(_))));
    assert!(matches!(
        master.lock(s, h, LockMode::Shared),
        Err(HyperspaceError::BadHandle(_))
    ));
    assert!(matches!(master.close(s, h), Err(HyperspaceError::BadHandle(_))));

    // the node itself is persistent
    let again = open(&master, s, "/x", &sink);
    assert_eq!(master.attr_get(s, again, "k").unwrap(), b"v".to_vec());
}

#[tokio::test]
async fn test_attr_set_notifies_subscribers_including_self() {
    let master = new_master();
    let sink = RecordingSink::new();
    let s = session(&master);
    let setter = master
        .open(s, "/node", OpenFlags::CREATE, EventMask::ATTR_SET, sink.clone())
        .unwrap();
    let peer = master
        .open(session(&master), "/node", OpenFlags::NONE, EventMask::ATTR_SET, sink.clone())
        .unwrap();
    let deletes_only = master
        .open(s, "/node", OpenFlags::NONE, EventMask::ATTR_DEL, sink.clone())
        .unwrap();

    master.attr_set(s, setter, "owner", b"x").unwrap();
    master.attr_del(s, setter, "owner").unwrap();
    master.flush().await;

    assert_eq!(sink.for_handle(setter), vec![Notification::AttrSet("owner".into())]);
    assert_eq!(sink.for_handle(peer), vec![Notification::AttrSet("owner".into())]);
    assert_eq!(
        sink.for_handle(deletes_only),
        vec![Notification::AttrDel("owner".into())]
    );
    assert!(matches!(
        master.attr_del(s, setter, "owner"),
        Err(HyperspaceError::NoSuchAttr(_))
    ));
}

#[tokio::test]
async fn test_readdir_and_attr_listing() {
    let master = new_master();
    let sink = RecordingSink::new();
    let s = session(&master);
    master.mkdir(s, "/dir").unwrap();
    master.mkdir(s, "/dir/b").unwrap();
    open(&master, s, "/dir/a", &sink);

    let dir = master
        .open(s, "/dir", OpenFlags::NONE, EventMask::NONE, sink.clone())
        .unwrap();
    assert_eq!(
        master.readdir(s, dir).unwrap(),
        vec!["a".to_string(), "b".to_string()]
    );

    master.attr_set(s, dir, "z", b"1").unwrap();
    master.attr_set(s, dir, "y", b"2").unwrap();
    assert_eq!(
        master.attr_list(s, dir).unwrap(),
        vec!["y".to_string(), "z".to_string()]
    );
    assert!(master.attr_exists(s, dir, "y").unwrap());
    assert!(!master.attr_exists(s, dir, "x").unwrap());

    assert!(matches!(
        master.delete(s, "/dir"),
        Err(HyperspaceError::NodeNotEmpty(_))
    ));
}

#[tokio::test]
async fn test_invariants_hold_through_mixed_workload() {
    let master = new_master();
    let sink = RecordingSink::new();
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let s = session(&master);
            (s, open(&master, s, "/busy", &sink))
        })
        .collect();

    for (i, &(s, h)) in handles.iter().enumerate() {
        let mode = if i % 3 == 0 { LockMode::Exclusive } else { LockMode::Shared };
        master.lock(s, h, mode).unwrap();
        master.check_invariants().unwrap();
    }
    for &(s, h) in handles.iter().rev() {
        // holders release, queued handles withdraw by closing
        if master.release(s, h).is_err() {
            master.close(s, h).unwrap();
        }
        master.check_invariants().unwrap();
    }
    let info = master.lock_info("/busy").unwrap();
    assert!(info.waiters.is_empty());
}
