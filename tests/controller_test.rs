//! End-to-end tests across registry, store and session, driven through a
//! mock device link.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use optoplate::{
    AssignmentRegistry, Color, ExperimentSession, ExperimentState, LinkHandle, MockLink,
    PersistenceStore, PlateError, Protocol,
};

fn protocol(name: &str, color: Color) -> Protocol {
    Protocol {
        name: name.into(),
        color,
        intensity: 200,
        active: 5.0,
        silent: 2.0,
        pulse_on: 1.0,
        pulse_off: 1.0,
        total: 30.0,
    }
}

struct Harness {
    link: LinkHandle,
    sent: Arc<Mutex<Vec<String>>>,
    replies: Arc<Mutex<VecDeque<String>>>,
}

fn harness() -> Harness {
    let mock = MockLink::new();
    let sent = mock.sent_log();
    let replies = mock.reply_queue();
    Harness {
        link: LinkHandle::new(Box::new(mock)),
        sent,
        replies,
    }
}

#[tokio::test]
async fn create_assign_list_round_trip() {
    let h = harness();
    let mut registry = AssignmentRegistry::new(h.link.clone());

    let index = registry
        .create_protocol(protocol("P1", Color::Red))
        .await
        .unwrap();
    assert_eq!(index, 0);
    registry.assign_well("A", "1", 0).await.unwrap();
    registry.assign_range("B", "1", "B", "4", 0).await.unwrap();

    let listed = registry.list_protocols();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].protocol, protocol("P1", Color::Red));
    assert_eq!(listed[0].assignments.len(), 2);
    assert_eq!(listed[0].assignments[0].to_string(), "(A,1)");
    assert_eq!(listed[0].assignments[1].to_string(), "(B1-B4)");

    let frames = h.sent.lock().unwrap();
    assert_eq!(
        frames.as_slice(),
        [
            "<P1,200,PROTOCOL,5,2,1,1,30,R>",
            "<A,1,ASSIGN,0>",
            "<B,1,RANGE,B,4,0>",
        ]
    );
}

#[tokio::test]
async fn save_load_reassign_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("protocols.json");

    // Session one: define, assign, save.
    {
        let h = harness();
        let mut registry = AssignmentRegistry::new(h.link.clone());
        let store = PersistenceStore::new(store_path.clone(), h.link.clone(), Duration::ZERO);

        registry
            .create_protocol(protocol("P1", Color::Red))
            .await
            .unwrap();
        registry
            .create_protocol(protocol("P2", Color::Green))
            .await
            .unwrap();
        registry.assign_well("A", "1", 0).await.unwrap();
        registry.assign_range("B", "1", "B", "4", 1).await.unwrap();

        let report = store
            .save(registry.session_protocols(), registry.session_assignments())
            .unwrap();
        assert_eq!(report.saved, 2);
        registry.clear_session();
        assert!(registry.session_protocols().is_empty());
    }

    // Session two: load replays definitions, reassign replays bindings.
    let h = harness();
    let mut registry = AssignmentRegistry::new(h.link.clone());
    let store = PersistenceStore::new(store_path, h.link.clone(), Duration::ZERO);

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded.protocols.len(), 2);
    registry.adopt(loaded);

    let listed = registry.list_protocols();
    assert!(listed[0].previously_assigned);
    assert!(listed[1].previously_assigned);

    h.sent.lock().unwrap().clear();
    registry.reassign_all(Duration::ZERO).await.unwrap();
    let frames = h.sent.lock().unwrap();
    assert_eq!(frames.as_slice(), ["<A,1,ASSIGN,0>", "<B,1,RANGE,B,4,1>"]);
}

#[tokio::test]
async fn loaded_names_block_new_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("protocols.json");

    {
        let h = harness();
        let mut registry = AssignmentRegistry::new(h.link.clone());
        let store = PersistenceStore::new(store_path.clone(), h.link.clone(), Duration::ZERO);
        registry
            .create_protocol(protocol("P1", Color::Red))
            .await
            .unwrap();
        store
            .save(registry.session_protocols(), registry.session_assignments())
            .unwrap();
    }

    let h = harness();
    let mut registry = AssignmentRegistry::new(h.link.clone());
    let store = PersistenceStore::new(store_path, h.link.clone(), Duration::ZERO);
    registry.adopt(store.load().await.unwrap());

    let err = registry
        .create_protocol(protocol("P1", Color::Blue))
        .await
        .unwrap_err();
    assert!(matches!(err, PlateError::DuplicateName(_)));

    // A fresh name continues the dense index sequence after the loaded set.
    let index = registry
        .create_protocol(protocol("P2", Color::Blue))
        .await
        .unwrap();
    assert_eq!(index, 1);
}

#[tokio::test]
async fn corrupt_store_load_recovers_to_empty_session() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("protocols.json");
    std::fs::write(&store_path, "{not json").unwrap();

    let h = harness();
    let mut registry = AssignmentRegistry::new(h.link.clone());
    let store = PersistenceStore::new(store_path, h.link.clone(), Duration::ZERO);

    // stale session state from before the load attempt
    registry
        .create_protocol(protocol("Stale", Color::Red))
        .await
        .unwrap();
    registry.assign_well("A", "1", 0).await.unwrap();

    let err = store.load().await.unwrap_err();
    assert!(matches!(err, PlateError::CorruptStore(_)));

    // the caller recovers by adopting an empty store
    registry.adopt(optoplate::LoadResult::default());
    assert!(registry.session_protocols().is_empty());
    assert!(registry.session_assignments().is_empty());
    assert!(registry.list_protocols().is_empty());

    // the session starts over cleanly, with dense indices from zero
    let index = registry
        .create_protocol(protocol("Fresh", Color::Green))
        .await
        .unwrap();
    assert_eq!(index, 0);
}

#[tokio::test]
async fn repeated_save_keeps_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("protocols.json");
    let h = harness();
    let store = PersistenceStore::new(store_path.clone(), h.link.clone(), Duration::ZERO);

    let protocols = vec![protocol("P1", Color::Red)];
    let assignments = std::collections::BTreeMap::new();
    store.save(&protocols, &assignments).unwrap();
    let on_disk = std::fs::read_to_string(&store_path).unwrap();

    let report = store.save(&protocols, &assignments).unwrap();
    assert!(report.nothing_to_save());
    // a no-op save rewrites nothing
    assert_eq!(std::fs::read_to_string(&store_path).unwrap(), on_disk);
}

#[tokio::test]
async fn experiment_survives_silent_device_and_stops_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness();
    let mut session = ExperimentSession::with_timing(
        h.link.clone(),
        dir.path().to_path_buf(),
        Duration::from_millis(20),
        Duration::ZERO,
    );

    h.replies.lock().unwrap().push_back("TEMP: 24.0".to_string());
    session.start("soak").await.unwrap();
    assert_eq!(session.state(), ExperimentState::Running);
    tokio::time::sleep(Duration::from_millis(90)).await;
    session.stop().await.unwrap();
    assert_eq!(session.state(), ExperimentState::Idle);

    let log = std::fs::read_to_string(session.log_path("soak")).unwrap();
    let rows: Vec<&str> = log.lines().collect();
    assert_eq!(rows[0], "Timestamp,Temperature (C)");
    // first cycle saw the scripted reply, later cycles fell back to N/A
    assert!(rows[1].ends_with(",24.0"));
    assert!(rows[2..].iter().all(|r| r.ends_with(",N/A")));
    assert!(rows.len() >= 3);

    let frames = h.sent.lock().unwrap();
    assert_eq!(frames.first().unwrap(), "<soak,0,START>");
    assert_eq!(frames.last().unwrap(), "<0,0,STOP>");
    assert!(frames.iter().filter(|f| *f == "<0,0,TEMP>").count() >= 2);
}
