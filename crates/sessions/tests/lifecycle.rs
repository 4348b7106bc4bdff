mod common;

use std::{sync::Arc, time::Duration};

use {
    common::{FakeConnector, RecordingNotifier, Script, eventually, harness, harness_with},
    switchboard_protocol::{CloseCause, Connector, ProtocolEvent},
    switchboard_sessions::{
        InactiveReason, Notifier, SessionError, SessionEvent, SessionService, SessionState,
        SessionStatus, SnapshotStatus, SnapshotStore, StartOutcome,
    },
};

fn manual() -> Script {
    Script {
        auto_open: None,
        ..Script::default()
    }
}

async fn wait_for_row(store: &dyn SnapshotStore, id: &str, status: SnapshotStatus) {
    for _ in 0..400 {
        if let Some(row) = store.find(id).await.unwrap()
            && row.status == status
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("snapshot row for {id} never reached {status}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_construction() {
    let h = harness(Script::default()).await;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = h.service.registry().clone();
        tasks.push(tokio::spawn(
            async move { registry.get_or_create("t1").await },
        ));
    }

    let mut generations = Vec::new();
    for task in tasks {
        generations.push(task.await.unwrap().unwrap().generation());
    }

    assert_eq!(h.connector.connect_count(), 1);
    assert!(generations.iter().all(|g| *g == generations[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_sessions_construct_independently() {
    let h = harness(Script::default()).await;
    let registry = h.service.registry().clone();

    let (a, b) = tokio::join!(registry.get_or_create("a"), registry.get_or_create("b"));
    assert_eq!(a.unwrap().session_id(), "a");
    assert_eq!(b.unwrap().session_id(), "b");
    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.service.list_active(), ["a", "b"]);
}

#[tokio::test]
async fn start_reports_inactive_until_open() {
    let h = harness(manual()).await;

    assert_eq!(h.service.start("t1"), StartOutcome::Starting);
    eventually("connect", || h.connector.connect_count() == 1).await;

    let status = h.service.status("t1");
    assert!(!status.active);
    assert_eq!(status.state, Some(SessionState::Connecting));
    assert!(h.service.connection("t1").is_none());

    h.connector.link(0).emit(ProtocolEvent::opened());
    eventually("connected", || {
        h.service.status("t1").last_status == Some(SessionStatus::Connected)
    })
    .await;

    let status = h.service.status("t1");
    assert!(status.active);
    assert_eq!(status.state, Some(SessionState::Open));
    assert!(h.notifier.has_event("session-active-t1"));
    assert_eq!(h.service.start("t1"), StartOutcome::AlreadyActive);
}

#[tokio::test]
async fn wait_times_out_but_construction_continues() {
    let h = harness_with(manual(), |c| c.ready_timeout_ms = 50).await;

    let err = h.service.wait_for_connection("t1").await.unwrap_err();
    assert!(matches!(err, SessionError::ConnectionTimeout { .. }), "{err:?}");
    assert_eq!(h.connector.connect_count(), 1);

    h.connector.link(0).emit(ProtocolEvent::opened());
    eventually("open", || h.service.registry().is_active("t1")).await;

    let handle = h.service.wait_for_connection("t1").await.unwrap();
    assert_eq!(handle.generation(), 1);
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test]
async fn caller_after_timeout_waits_on_the_pending_connection() {
    let h = harness_with(manual(), |c| c.ready_timeout_ms = 50).await;

    for _ in 0..2 {
        let err = h.service.wait_for_connection("t1").await.unwrap_err();
        assert!(matches!(err, SessionError::ConnectionTimeout { .. }), "{err:?}");
    }
    assert_eq!(h.connector.connect_count(), 1);
    assert!(!h.connector.link(0).handle.closed.load(std::sync::atomic::Ordering::SeqCst));

    let waiter = tokio::spawn({
        let registry = h.service.registry().clone();
        async move { registry.get_or_create("t1").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.connector.link(0).emit(ProtocolEvent::opened());

    let handle = waiter.await.unwrap().unwrap();
    assert_eq!(handle.generation(), 1);
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test]
async fn recreate_supersedes_pending_readiness() {
    let h = harness(manual()).await;
    let registry = h.service.registry().clone();

    let waiter = tokio::spawn({
        let registry = registry.clone();
        async move { registry.get_or_create("t1").await }
    });
    eventually("first connect", || h.connector.connect_count() == 1).await;
    let first = h.service.status("t1").generation;

    h.connector.set_script(Script::default());
    let handle = registry.recreate("t1").await.unwrap();

    assert!(handle.generation() > first);
    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Superseded { .. }), "{err:?}");
    assert_eq!(h.connector.connect_count(), 2);
}

#[tokio::test]
async fn stale_generation_events_are_ignored() {
    let h = harness(Script::default()).await;
    let registry = h.service.registry().clone();

    let first = registry.get_or_create("t1").await.unwrap();
    let second = registry.recreate("t1").await.unwrap();
    assert!(second.generation() > first.generation());
    assert!(h.connector.link(0).handle.closed.load(std::sync::atomic::Ordering::SeqCst));

    // A logout reported by the replaced connection must not touch the live one.
    h.connector
        .link(0)
        .emit(ProtocolEvent::closed(CloseCause::from_code(401, "late")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(registry.is_active("t1"));
    assert_eq!(h.connector.connect_count(), 2);
    assert!(!h.notifier.has_event("session-inactive-t1"));
}

#[tokio::test]
async fn transient_close_reconnects_with_stored_credentials() {
    let h = harness(Script::default()).await;
    h.service.wait_for_connection("t1").await.unwrap();
    wait_for_row(h.store.as_ref(), "t1", SnapshotStatus::Active).await;

    h.connector
        .link(0)
        .emit(ProtocolEvent::closed(CloseCause::from_code(428, "closed")));

    eventually("inactive", || h.notifier.has_event("session-inactive-t1")).await;
    eventually("reconnect", || h.connector.connect_count() == 2).await;
    eventually("open again", || h.service.registry().is_active("t1")).await;

    let events = h.notifier.events.lock().unwrap().clone();
    assert!(events.contains(&SessionEvent::Inactive {
        session_id: "t1".into(),
        reason: InactiveReason::ConnectionClosed,
    }));
    assert_eq!(
        h.connector.link(0).params.credentials_dir,
        h.connector.link(1).params.credentials_dir
    );
}

#[tokio::test]
async fn duplicate_close_is_reported_once() {
    let h = harness(Script::default()).await;
    h.service.wait_for_connection("t1").await.unwrap();
    h.connector.set_script(manual());

    let link = h.connector.link(0);
    link.emit(ProtocolEvent::closed(CloseCause::from_code(428, "closed")));
    link.emit(ProtocolEvent::closed(CloseCause::from_code(428, "closed")));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let inactive = h
        .notifier
        .event_names()
        .into_iter()
        .filter(|n| n == "session-inactive-t1")
        .count();
    assert_eq!(inactive, 1);
}

#[tokio::test]
async fn terminal_close_purges_and_pairs_again() {
    let h = harness_with(Script::default(), |c| c.logout_grace_ms = 200).await;
    h.service.wait_for_connection("t1").await.unwrap();
    wait_for_row(h.store.as_ref(), "t1", SnapshotStatus::Active).await;
    let creds = h.auth.path().join("t1").join("creds.json");
    assert!(creds.exists());

    h.connector.set_script(Script {
        auto_open: None,
        qr_first: true,
        ..Script::default()
    });
    h.connector
        .link(0)
        .emit(ProtocolEvent::closed(CloseCause::from_code(401, "logged out")));

    // Inactive during the grace period, credentials untouched.
    eventually("inactive", || !h.service.registry().is_active("t1")).await;
    assert_eq!(h.connector.connect_count(), 1);
    assert!(creds.exists());

    eventually("new generation", || h.connector.connect_count() == 2).await;
    eventually("pairing", || {
        h.service.status("t1").last_status == Some(SessionStatus::WaitingQr)
    })
    .await;

    assert!(!creds.exists());
    assert!(h.store.find("t1").await.unwrap().is_none());
    assert!(h.notifier.events.lock().unwrap().contains(&SessionEvent::Inactive {
        session_id: "t1".into(),
        reason: InactiveReason::LoggedOut,
    }));
    assert!(h.notifier.has_event("qr-t1"));
    assert_eq!(h.service.status("t1").state, Some(SessionState::Connecting));
}

#[tokio::test]
async fn start_during_logout_grace_still_purges() {
    let h = harness_with(Script::default(), |c| c.logout_grace_ms = 200).await;
    h.service.wait_for_connection("t1").await.unwrap();
    wait_for_row(h.store.as_ref(), "t1", SnapshotStatus::Active).await;
    let creds = h.auth.path().join("t1").join("creds.json");
    assert!(creds.exists());

    h.connector.set_script(Script {
        auto_open: None,
        qr_first: true,
        ..Script::default()
    });
    h.connector
        .link(0)
        .emit(ProtocolEvent::closed(CloseCause::from_code(401, "logged out")));
    eventually("inactive", || !h.service.registry().is_active("t1")).await;

    // Well inside the grace period.
    assert_eq!(h.service.start("t1"), StartOutcome::Starting);
    eventually("new generation", || h.connector.connect_count() == 2).await;
    eventually("pairing", || {
        h.service.status("t1").last_status == Some(SessionStatus::WaitingQr)
    })
    .await;

    assert!(!creds.exists());
    assert!(h.store.find("t1").await.unwrap().is_none());
    assert!(h.notifier.events.lock().unwrap().contains(&SessionEvent::Inactive {
        session_id: "t1".into(),
        reason: InactiveReason::LoggedOut,
    }));

    // The grace timer finds its generation superseded and does nothing.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.connector.connect_count(), 2);
    assert_eq!(h.service.status("t1").state, Some(SessionState::Connecting));
}

#[tokio::test]
async fn qr_is_suppressed_after_open() {
    let h = harness(Script {
        auto_open: None,
        qr_first: true,
        ..Script::default()
    })
    .await;

    h.service.start("t1");
    eventually("qr", || {
        h.service.status("t1").last_status == Some(SessionStatus::WaitingQr)
    })
    .await;
    assert!(h.notifier.has_event("qr-t1"));

    let link = h.connector.link(0);
    link.emit(ProtocolEvent::opened());
    eventually("open", || h.service.registry().is_active("t1")).await;

    link.emit(ProtocolEvent::QrChallenge("late".into()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let qrs = h
        .notifier
        .event_names()
        .into_iter()
        .filter(|n| n == "qr-t1")
        .count();
    assert_eq!(qrs, 1);
}

#[tokio::test]
async fn restarted_process_restores_credentials() {
    let h = harness(Script::default()).await;
    h.service.wait_for_connection("t1").await.unwrap();
    wait_for_row(h.store.as_ref(), "t1", SnapshotStatus::Active).await;
    let original = std::fs::read(h.auth.path().join("t1").join("creds.json")).unwrap();

    // Fresh host: same durable store, empty local auth dir.
    let auth = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new(Script {
        write_creds: false,
        ..Script::default()
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let service = SessionService::new(
        &common::test_config(auth.path()),
        Arc::clone(&connector) as Arc<dyn Connector>,
        Arc::clone(&h.store) as Arc<dyn SnapshotStore>,
        notifier as Arc<dyn Notifier>,
    );
    service.wait_for_connection("t1").await.unwrap();

    let restored = std::fs::read(connector.link(0).params.credentials_dir.join("creds.json")).unwrap();
    assert_eq!(restored, original);
}

#[tokio::test]
async fn corrupt_snapshot_blocks_start() {
    let h = harness(Script::default()).await;
    h.store
        .upsert("t1", SnapshotStatus::Active, b"not a snapshot")
        .await
        .unwrap();

    let err = h.service.wait_for_connection("t1").await.unwrap_err();
    assert!(matches!(err, SessionError::SnapshotRestore { .. }), "{err:?}");
    assert_eq!(h.connector.connect_count(), 0);
    assert_eq!(
        h.store.find("t1").await.unwrap().unwrap().status,
        SnapshotStatus::Corrupt
    );
    let status = h.service.status("t1");
    assert_eq!(status.state, Some(SessionState::Closed));
    assert_eq!(status.last_status, Some(SessionStatus::Inactive));
    assert!(status.last_close_cause.is_none());

    // Clearing the row lets the next attempt pair from scratch.
    h.store.delete("t1").await.unwrap();
    h.service.wait_for_connection("t1").await.unwrap();
    assert_eq!(h.connector.connect_count(), 1);
}

#[tokio::test]
async fn remove_closes_and_forgets() {
    let h = harness(Script::default()).await;
    h.service.wait_for_connection("t1").await.unwrap();

    assert!(h.service.remove("t1").await);
    assert!(h.service.connection("t1").is_none());
    assert!(h.service.list_active().is_empty());
    assert!(h.connector.link(0).handle.closed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(!h.service.remove("t1").await);
}

#[tokio::test]
async fn groups_require_an_open_session() {
    let h = harness(Script::default()).await;

    let err = h.service.groups("t1").await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(_)));

    h.service.wait_for_connection("t1").await.unwrap();
    let groups = h.service.groups("t1").await.unwrap();
    assert_eq!(groups[0].participants, 3);
}
