use pretty_assertions::assert_eq;
use proptest::prelude::*;
use psync_core::prelude::*;
use psync_core::FileProfileStore;
use psync_test_utils::{
    default_count, eventually, ids, local_patch, participant, ScriptedStore, DEFAULT, SETTLE,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn change_in_one_window_reaches_the_other() {
    let store = Arc::new(ScriptedStore::new());
    let bus = SignalBus::new();
    let first = participant(store.clone(), &bus);
    let second = participant(store.clone(), &bus);

    first.start().await.unwrap();
    second.start().await.unwrap();
    first.settled().await.unwrap();
    second.settled().await.unwrap();
    assert_eq!(default_count(&store.snapshot()), 1);

    first.facade().add(local_patch("x")).await.unwrap();
    first.settled().await.unwrap();

    let expected = vec!["x".to_string(), DEFAULT.to_string()];
    let reached = eventually(
        || second.snapshot().is_some_and(|config| ids(&config) == expected),
        SETTLE,
    )
    .await;
    assert!(reached, "second window never saw the change");
    assert_eq!(ids(&store.snapshot()), expected);

    first.shutdown().await;
    second.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_windows_agree_on_one_default() {
    let store = Arc::new(ScriptedStore::new());
    let bus = SignalBus::new();
    let windows: Vec<_> = (0..4).map(|_| participant(store.clone(), &bus)).collect();

    for window in &windows {
        window.start().await.unwrap();
    }
    for window in &windows {
        window.settled().await.unwrap();
    }

    assert_eq!(ids(&store.snapshot()), vec![DEFAULT]);
    for window in &windows {
        window.shutdown().await;
    }
}

#[tokio::test]
async fn own_signals_are_ignored_by_default() {
    let store = Arc::new(ScriptedStore::new());
    let sync = ProfileSync::new(
        store,
        Arc::new(SignalBus::new()),
        SyncConfig::new().with_default_profile(false),
    );
    sync.start().await.unwrap();
    sync.facade().add(local_patch("a")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Start and the facade refresh; no echo from our own signal.
    assert_eq!(sync.cache().stats().reads, 2);
    sync.shutdown().await;
}

#[tokio::test]
async fn own_signals_refresh_when_not_ignored() {
    let store = Arc::new(ScriptedStore::new());
    let sync = ProfileSync::new(
        store,
        Arc::new(SignalBus::new()),
        SyncConfig::new()
            .with_default_profile(false)
            .with_ignore_own_signals(false),
    );
    sync.start().await.unwrap();
    sync.facade().add(local_patch("a")).await.unwrap();

    assert!(eventually(|| sync.cache().stats().reads == 3, SETTLE).await);
    sync.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn processes_sharing_a_file_converge() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profiles.json");
    let bus = SignalBus::new();
    let first = participant(Arc::new(FileProfileStore::new(path.clone())), &bus);
    let second = participant(Arc::new(FileProfileStore::new(path.clone())), &bus);

    first.start().await.unwrap();
    first.settled().await.unwrap();
    second.start().await.unwrap();
    second.settled().await.unwrap();

    second.facade().add(local_patch("y")).await.unwrap();
    second.settled().await.unwrap();

    let expected = vec!["y".to_string(), DEFAULT.to_string()];
    assert!(
        eventually(
            || first.snapshot().is_some_and(|config| ids(&config) == expected),
            SETTLE
        )
        .await
    );

    first.shutdown().await;
    second.shutdown().await;
}

#[derive(Debug, Clone)]
enum Op {
    Add(String),
    Remove(String),
    Rename(String),
    RemoveDefault,
    Reverse,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        "[a-e]".prop_map(Op::Add),
        "[a-e]".prop_map(Op::Remove),
        "[a-e]".prop_map(Op::Rename),
        Just(Op::RemoveDefault),
        Just(Op::Reverse),
    ]
}

async fn apply(sync: &ProfileSync, op: Op) {
    // Rejections (missing ids, duplicate adds) are part of the workload.
    let _ = match op {
        Op::Add(id) => sync.facade().add(local_patch(&id)).await,
        Op::Remove(id) => sync.facade().remove(ProfileId::from(id)).await,
        Op::Rename(id) => {
            let patch = ProfilePatch::new().with_id(id.as_str()).with_name("renamed");
            sync.facade().update(patch).await
        }
        Op::RemoveDefault => sync.facade().remove(ProfileId::from(DEFAULT)).await,
        Op::Reverse => {
            let Some(config) = sync.snapshot() else { return };
            let mut items = config.items.clone();
            items.reverse();
            sync.facade().set_all(config.with_items(items)).await
        }
    };
}

fn run_workload(ops: Vec<Op>) -> ProfileConfig {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let store = Arc::new(ScriptedStore::new());
        let sync = participant(store.clone(), &SignalBus::new());
        sync.start().await.unwrap();
        for op in ops {
            apply(&sync, op).await;
        }
        sync.settled().await.unwrap();
        sync.shutdown().await;
        store.snapshot()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_any_workload_stabilizes_with_one_default_last(
        ops in proptest::collection::vec(op(), 0..16)
    ) {
        let config = run_workload(ops);
        prop_assert!(config.satisfies_default_invariant());
        prop_assert_eq!(default_count(&config), 1);
        prop_assert!(config.first_duplicate().is_none());
    }
}
