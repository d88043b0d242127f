//! Restart fidelity: state committed through the repository re-derives the
//! same pending work in a fresh registry.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::{Arc, Mutex};

use maildelta_core::mail::{FLAGGED, SEEN};
use maildelta_core::{
    ConsultRequest, Dispatch, ResourceLocks, StoreRequest, TaskRegistry, TaskStateRepository,
    TaskThing,
};

use common::{ACCOUNT, Db, MemoryContext, RecordingAccount, message, stock_registry};

fn seeded_db() -> Arc<Mutex<Db>> {
    let mut db = Db::default();
    db.insert_message(message("m1", "u1", 1, &[], &["f-inbox"]), "f-inbox", 11);
    db.insert_message(message("m2", "u2", 2, &[SEEN], &["f-inbox"]), "f-inbox", 12);
    db.insert_message(message("m3", "u3", 3, &[], &["f-inbox"]), "f-inbox", 13);
    Arc::new(Mutex::new(db))
}

async fn restarted(repository: &TaskStateRepository) -> (TaskRegistry, Vec<String>) {
    let registry = stock_registry(Arc::new(ResourceLocks::new()));
    let (keys, values) = repository.load_state_rows().await.unwrap();
    registry.initialize_from_database_state(keys, values).unwrap();
    let markers = registry
        .account_exists_init_tasks(ACCOUNT, "gmail")
        .await
        .unwrap();
    let mut ids: Vec<String> = markers.into_iter().map(|m| m.id).collect();
    ids.sort();
    (registry, ids)
}

async fn persisted_ids(repository: &TaskStateRepository) -> Vec<String> {
    repository
        .load_markers(ACCOUNT)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect()
}

#[tokio::test]
async fn derived_markers_match_persisted_markers() {
    let repository = Arc::new(TaskStateRepository::in_memory().await.unwrap());
    let db = seeded_db();
    let account = Arc::new(RecordingAccount::default());
    let mut ctx = MemoryContext::new(Arc::clone(&db), account).with_repository(Arc::clone(&repository));

    let registry = stock_registry(Arc::new(ResourceLocks::new()));
    registry
        .account_exists_init_tasks(ACCOUNT, "gmail")
        .await
        .unwrap();

    let requests = [
        ("store_flags", StoreRequest::conversation("c1").only(&["m1"]).add([SEEN])),
        ("store_flags", StoreRequest::conversation("c1").only(&["m2"]).remove([SEEN])),
        ("store_flags", StoreRequest::conversation("c1").only(&["m3"]).add([FLAGGED])),
        ("store_flags", StoreRequest::conversation("c1").only(&["m3"]).remove([FLAGGED])),
        ("store_labels", StoreRequest::conversation("c1").only(&["m1"]).add(["f-work"])),
    ];
    for (task_type, request) in requests {
        let raw = request.into_raw(task_type, ACCOUNT).unwrap();
        assert_eq!(registry.plan_task(&mut ctx, raw).await.unwrap(), Dispatch::Ran);
    }

    let before = persisted_ids(&repository).await;
    assert_eq!(before, ["store_flags:u1", "store_flags:u2", "store_labels:u1"]);
    assert_eq!(db.lock().unwrap().marker_ids(), before);

    drop(registry);
    let (registry, derived) = restarted(&repository).await;
    assert_eq!(derived, before);

    let mut value = vec![SEEN.to_string()];
    registry
        .consult(
            &ctx,
            "store_flags",
            ACCOUNT,
            ConsultRequest {
                entity_key: "u2",
                value: &mut value,
            },
        )
        .unwrap();
    assert!(value.is_empty());
}

#[tokio::test]
async fn executed_work_does_not_come_back() {
    let repository = Arc::new(TaskStateRepository::in_memory().await.unwrap());
    let db = seeded_db();
    let account = Arc::new(RecordingAccount::default());
    let mut ctx = MemoryContext::new(Arc::clone(&db), Arc::clone(&account))
        .with_repository(Arc::clone(&repository));

    let registry = stock_registry(Arc::new(ResourceLocks::new()));
    registry
        .account_exists_init_tasks(ACCOUNT, "gmail")
        .await
        .unwrap();
    let raw = StoreRequest::conversation("c1")
        .only(&["m1"])
        .add([SEEN])
        .into_raw("store_flags", ACCOUNT)
        .unwrap();
    registry.plan_task(&mut ctx, raw).await.unwrap();

    let (registry, derived) = restarted(&repository).await;
    assert_eq!(derived, ["store_flags:u1"]);

    let marker = repository.load_markers(ACCOUNT).await.unwrap().remove(0);
    registry
        .execute_task(&mut ctx, TaskThing::Marker(marker))
        .await
        .unwrap();
    assert_eq!(account.calls().len(), 1);
    assert!(persisted_ids(&repository).await.is_empty());

    let (_, derived) = restarted(&repository).await;
    assert!(derived.is_empty());
}

#[tokio::test]
async fn removed_account_forgets_state() {
    let repository = Arc::new(TaskStateRepository::in_memory().await.unwrap());
    let db = seeded_db();
    let mut ctx = MemoryContext::new(Arc::clone(&db), Arc::new(RecordingAccount::default()))
        .with_repository(Arc::clone(&repository));

    let registry = stock_registry(Arc::new(ResourceLocks::new()));
    registry
        .account_exists_init_tasks(ACCOUNT, "gmail")
        .await
        .unwrap();
    let raw = StoreRequest::conversation("c1")
        .add([FLAGGED])
        .into_raw("store_flags", ACCOUNT)
        .unwrap();
    registry.plan_task(&mut ctx, raw).await.unwrap();
    assert_eq!(persisted_ids(&repository).await.len(), 3);

    assert!(registry.account_removed(ACCOUNT));
    repository.remove_account(ACCOUNT).await.unwrap();

    let (_, derived) = restarted(&repository).await;
    assert!(derived.is_empty());
}
