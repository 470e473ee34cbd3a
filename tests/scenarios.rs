use chrono::{Duration as ChronoDuration, Utc};
use collab_sync::document::{DocumentId, Selection, UserId, Version};
use collab_sync::{
    make_patch, AuthenticatedUser, OfflineBuffer, PersistenceStore, RoomRegistry, ServerMessage,
    Session, ShadowStore, SqlitePersistence, SyncEngine,
};
use std::sync::Arc;
use tokio::sync::mpsc;

fn engine_with(persistence: Arc<dyn PersistenceStore>) -> SyncEngine {
    SyncEngine::new(
        Arc::new(RoomRegistry::new()),
        Arc::new(ShadowStore::new()),
        persistence,
        Arc::new(OfflineBuffer::new()),
        60,
    )
}

fn session(id: &str) -> (Arc<Session>, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(32);
    let user = AuthenticatedUser { id: id.to_string(), username: format!("{id}-name"), email: format!("{id}@example.com") };
    (Arc::new(Session::new(user, tx)), rx)
}

fn drain(rx: &mut mpsc::Receiver<ServerMessage>) {
    while rx.try_recv().is_ok() {}
}

#[tokio::test]
async fn s1_single_writer_creates_auto_saved_version() {
    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::new_in_memory().unwrap());
    let doc_id = DocumentId::from("d1");
    persistence.create_document(&doc_id, "Untitled", &UserId::from("alice"), "").unwrap();
    let engine = engine_with(Arc::clone(&persistence));

    let (alice, mut alice_rx) = session("alice");
    engine.join_document(&alice, doc_id.clone()).await.unwrap();
    drain(&mut alice_rx);

    let patch = make_patch("", "hello");
    engine.document_change(&alice, doc_id.clone(), patch, None).await.unwrap();

    let document = persistence.get_document(&doc_id).unwrap().unwrap();
    assert_eq!(document.content, "hello");
    assert_eq!(document.versions.last().unwrap().content, "hello");
    assert_eq!(document.versions.last().unwrap().change_description, "Auto-saved version");
}

#[tokio::test]
async fn s2_disjoint_concurrent_edits_converge() {
    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::new_in_memory().unwrap());
    let doc_id = DocumentId::from("d2");
    let alice_id = UserId::from("alice");
    let bob_id = UserId::from("bob");
    persistence.create_document(&doc_id, "Untitled", &alice_id, "AAA BBB").unwrap();
    persistence.add_collaborator(&doc_id, &bob_id).unwrap();
    let engine = engine_with(Arc::clone(&persistence));

    let (alice, mut alice_rx) = session("alice");
    let (bob, mut bob_rx) = session("bob");
    engine.join_document(&alice, doc_id.clone()).await.unwrap();
    engine.join_document(&bob, doc_id.clone()).await.unwrap();
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    // Both patches are computed against the same base, as if neither side
    // had yet seen the other's edit.
    let patch_a = make_patch("AAA BBB", "XXX BBB");
    let patch_b = make_patch("AAA BBB", "AAA YYY");

    engine.document_change(&alice, doc_id.clone(), patch_a, None).await.unwrap();
    let relayed_to_bob = match bob_rx.try_recv().unwrap() {
        ServerMessage::DocumentChange { patches, .. } => patches,
        other => panic!("expected document-change, got {other:?}"),
    };

    engine.document_change(&bob, doc_id.clone(), patch_b, None).await.unwrap();
    let relayed_to_alice = match alice_rx.try_recv().unwrap() {
        ServerMessage::DocumentChange { patches, .. } => patches,
        other => panic!("expected document-change, got {other:?}"),
    };

    let document = persistence.get_document(&doc_id).unwrap().unwrap();
    assert_eq!(document.content, "XXX YYY");

    // Each peer, applying the relayed patch to what it already holds
    // locally, converges to the same text the server settled on.
    let (bob_local, bob_results) = collab_sync::apply(&relayed_to_bob, "AAA BBB");
    assert!(collab_sync::PatchBundle::fully_applied(&bob_results));
    assert_eq!(bob_local, "XXX BBB");

    let (alice_local, alice_results) = collab_sync::apply(&relayed_to_alice, "XXX BBB");
    assert!(collab_sync::PatchBundle::fully_applied(&alice_results));
    assert_eq!(alice_local, "XXX YYY");
}

#[tokio::test]
async fn s3_failed_patch_triggers_sync_required() {
    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::new_in_memory().unwrap());
    let doc_id = DocumentId::from("d3");
    let alice_id = UserId::from("alice");
    let bob_id = UserId::from("bob");
    persistence.create_document(&doc_id, "Untitled", &alice_id, "one two three").unwrap();
    persistence.add_collaborator(&doc_id, &bob_id).unwrap();
    let engine = engine_with(Arc::clone(&persistence));

    let (alice, mut alice_rx) = session("alice");
    let (bob, mut bob_rx) = session("bob");
    engine.join_document(&alice, doc_id.clone()).await.unwrap();
    engine.join_document(&bob, doc_id.clone()).await.unwrap();
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    // A patch whose context shares no characters at all with the real
    // document text: no boundary run can ever be found, so the hunk is
    // unlocatable no matter how fuzzy the search window is.
    let unlocatable = make_patch("1111222233334444", "1111222233334444555555");
    engine.document_change(&alice, doc_id.clone(), unlocatable, None).await.unwrap();

    match alice_rx.try_recv().unwrap() {
        ServerMessage::SyncRequired { content, .. } => assert_eq!(content, "one two three"),
        other => panic!("expected sync-required, got {other:?}"),
    }
    assert!(bob_rx.try_recv().is_err());

    let document = persistence.get_document(&doc_id).unwrap().unwrap();
    assert_eq!(document.content, "one two three");
}

#[tokio::test]
async fn s4_cursor_position_broadcasts_to_room_and_tracks_presence() {
    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::new_in_memory().unwrap());
    let doc_id = DocumentId::from("d4");
    let alice_id = UserId::from("alice");
    let bob_id = UserId::from("bob");
    persistence.create_document(&doc_id, "Untitled", &alice_id, "hello world").unwrap();
    persistence.add_collaborator(&doc_id, &bob_id).unwrap();
    let engine = engine_with(Arc::clone(&persistence));

    let (alice, mut alice_rx) = session("alice");
    let (bob, mut bob_rx) = session("bob");
    engine.join_document(&alice, doc_id.clone()).await.unwrap();
    engine.join_document(&bob, doc_id.clone()).await.unwrap();
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    engine.cursor_position(&bob, doc_id.clone(), 5, Selection { start: 5, end: 7 });

    match alice_rx.try_recv().unwrap() {
        ServerMessage::CursorPosition { user_id, cursor_position, selection, .. } => {
            assert_eq!(user_id, "bob");
            assert_eq!(cursor_position, 5);
            assert_eq!(selection, Selection { start: 5, end: 7 });
        }
        other => panic!("expected cursor-position, got {other:?}"),
    }

    let room = engine.rooms.get(&doc_id).unwrap();
    assert_eq!(room.active_editors().len(), 2);
}

#[tokio::test]
async fn s5_offline_edits_replay_in_client_timestamp_order() {
    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::new_in_memory().unwrap());
    let doc_id = DocumentId::from("d5");
    let alice_id = UserId::from("alice");
    persistence.create_document(&doc_id, "Untitled", &alice_id, "").unwrap();
    let engine = engine_with(Arc::clone(&persistence));

    let (alice, mut alice_rx) = session("alice");
    engine.join_document(&alice, doc_id.clone()).await.unwrap();
    drain(&mut alice_rx);

    let base = Utc::now();
    let t1 = base + ChronoDuration::milliseconds(100);
    let t2 = base + ChronoDuration::milliseconds(200);
    let t3 = base + ChronoDuration::milliseconds(300);

    let patch1 = make_patch("", "a");
    let patch2 = make_patch("a", "ab");
    let patch3 = make_patch("ab", "abc");

    // Pushed out of arrival order; replay must still follow client_timestamp.
    engine.save_offline_edit(&alice, doc_id.clone(), patch3, t3);
    engine.save_offline_edit(&alice, doc_id.clone(), patch1, t1);
    engine.save_offline_edit(&alice, doc_id.clone(), patch2, t2);
    drain(&mut alice_rx);

    engine.sync_offline_edits(&alice, doc_id.clone()).await.unwrap();

    let document = persistence.get_document(&doc_id).unwrap().unwrap();
    assert_eq!(document.content, "abc");
    assert_eq!(document.versions.last().unwrap().change_description, "Synced 3 offline edits");

    let mut saw_synced = false;
    while let Ok(msg) = alice_rx.try_recv() {
        if let ServerMessage::OfflineEditsSynced { success, count } = msg {
            assert!(success);
            assert_eq!(count, 3);
            saw_synced = true;
        }
    }
    assert!(saw_synced);
}

#[tokio::test]
async fn s6_revert_appends_version_and_broadcasts_to_room() {
    let persistence: Arc<dyn PersistenceStore> = Arc::new(SqlitePersistence::new_in_memory().unwrap());
    let doc_id = DocumentId::from("d6");
    let alice_id = UserId::from("alice");
    let bob_id = UserId::from("bob");
    persistence.create_document(&doc_id, "Untitled", &alice_id, "abcX").unwrap();
    persistence.add_collaborator(&doc_id, &bob_id).unwrap();
    persistence.append_version(&doc_id, &Version::new("a".to_string(), alice_id.clone(), "seed")).unwrap();
    persistence.append_version(&doc_id, &Version::new("ab".to_string(), alice_id.clone(), "seed")).unwrap();
    persistence.append_version(&doc_id, &Version::new("abc".to_string(), alice_id.clone(), "seed")).unwrap();

    let engine = engine_with(Arc::clone(&persistence));
    let (alice, mut alice_rx) = session("alice");
    let (bob, mut bob_rx) = session("bob");
    engine.join_document(&alice, doc_id.clone()).await.unwrap();
    engine.join_document(&bob, doc_id.clone()).await.unwrap();
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    engine.revert(&alice, doc_id.clone(), 1).await.unwrap();

    let document = persistence.get_document(&doc_id).unwrap().unwrap();
    assert_eq!(document.content, "ab");
    assert_eq!(document.versions.len(), 4);
    assert_eq!(document.versions[3].content, "ab");
    assert_eq!(document.versions[3].change_description, "Reverted to version 2");

    let owned = engine.shadow.lock(&doc_id, engine.persistence.as_ref()).await.unwrap();
    assert_eq!(owned.guard().await.text, "ab");

    let mut saw_document_updated = false;
    let mut saw_version_created = false;
    while let Ok(msg) = bob_rx.try_recv() {
        match msg {
            ServerMessage::DocumentUpdated { content, .. } => {
                assert_eq!(content, "ab");
                saw_document_updated = true;
            }
            ServerMessage::VersionCreated { version_index, .. } => {
                assert_eq!(version_index, 3);
                saw_version_created = true;
            }
            _ => {}
        }
    }
    assert!(saw_document_updated && saw_version_created);
}
