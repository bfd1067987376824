use crate::{assert_cores_equal, CoreConfig, DiegoCore};
use diego_resolver::kv_fixture::{KvState, KvTxn};
use diego_resolver::RequestToken;
use test_log::test;

fn token(client: i64, req: i64) -> RequestToken {
    RequestToken::new(client, req)
}

#[test]
fn submit_creates_namespace_on_demand() {
    let core: DiegoCore<KvState> = DiegoCore::new(KvState::new, CoreConfig::default()).unwrap();
    assert_eq!(core.current_state_id("foo").1, false);

    let (ok, tail) = core.submit_transaction("foo", KvTxn::lww_set(0, token(1, 1), "a", "b")).unwrap();
    assert!(ok);
    assert_eq!(tail.len(), 1);
    assert_eq!(core.current_state_id("foo"), (1, true));
}

#[test]
fn unknown_namespace_queries_are_no_ops() {
    let core: DiegoCore<KvState> = DiegoCore::new(KvState::new, CoreConfig::default()).unwrap();
    assert_eq!(core.current_state_id("nope"), (0, false));
    let (tail, exists) = core.transactions_since_id("nope", 0);
    assert!(!exists);
    assert!(tail.is_empty());

    let mut called = false;
    core.current_state("nope", |_| called = true);
    assert!(!called);
}

#[test]
fn remove_namespace_forgets_it() {
    let core: DiegoCore<KvState> = DiegoCore::new(KvState::new, CoreConfig::default()).unwrap();
    core.submit_transaction("foo", KvTxn::lww_set(0, token(1, 1), "a", "b")).unwrap();
    assert_eq!(core.current_state_id("foo").1, true);

    core.remove_namespace("foo").unwrap();
    assert_eq!(core.current_state_id("foo").1, false);
}

#[test]
fn crash_recovery_rebuilds_multiple_namespaces() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    {
        let core: DiegoCore<KvState> = DiegoCore::new(
            KvState::new,
            CoreConfig { trailing_distance: 50, durable_root: Some(root.clone()) },
        )
        .unwrap();

        for i in 0..10 {
            core.submit_transaction("foo", KvTxn::lww_set(i, token(1, i + 1), "k", format!("v{i}"))).unwrap();
        }
        for i in 0..30 {
            core.submit_transaction("bar", KvTxn::lww_set(i, token(2, i + 1), "k", format!("w{i}"))).unwrap();
        }

        core.kill();
    }

    let core1: DiegoCore<KvState> = DiegoCore::new(
        KvState::new,
        CoreConfig { trailing_distance: 50, durable_root: Some(root.clone()) },
    )
    .unwrap();
    let core2: DiegoCore<KvState> = DiegoCore::new(
        KvState::new,
        CoreConfig { trailing_distance: 50, durable_root: Some(root) },
    )
    .unwrap();

    // `new` eagerly recreates every namespace found under the durable
    // root, so both cores already have "foo" and "bar" materialized here.
    assert_cores_equal(&core1, &core2, KvState::values_equal, |x, y| x == y);
    assert_eq!(core1.current_state_id("foo"), (10, true));
    assert_eq!(core1.current_state_id("bar"), (30, true));
}

#[test]
fn namespace_removal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    {
        let core: DiegoCore<KvState> = DiegoCore::new(
            KvState::new,
            CoreConfig { trailing_distance: 50, durable_root: Some(root.clone()) },
        )
        .unwrap();
        core.submit_transaction("foo", KvTxn::lww_set(0, token(1, 1), "k", "v")).unwrap();
        core.submit_transaction("bar", KvTxn::lww_set(0, token(2, 1), "k", "v")).unwrap();
        core.remove_namespace("bar").unwrap();
        core.kill();
    }

    let core: DiegoCore<KvState> = DiegoCore::new(
        KvState::new,
        CoreConfig { trailing_distance: 50, durable_root: Some(root) },
    )
    .unwrap();
    assert_eq!(core.current_state_id("bar"), (0, false));
    assert_eq!(core.current_state_id("foo"), (1, true));
}
