//! End-to-end key-value scenarios exercising the full submit/resolve/query
//! path through the core facade.

use crate::kv_fixture::{KvState, KvTxn};
use crate::{CoreConfig, DiegoCore, RequestToken, Transaction as _};
use test_log::test;

fn token(client: i64, req: i64) -> RequestToken {
    RequestToken::new(client, req)
}

#[test]
fn fresh_key_value_scenario() {
    let core: DiegoCore<KvState> =
        DiegoCore::new(KvState::new, CoreConfig { trailing_distance: 50, durable_root: None }).unwrap();

    let (ok, _) = core.submit_transaction("kv", KvTxn::lww_set(0, token(1, 1), "a", "b")).unwrap();
    assert!(ok);
    assert_eq!(core.current_state_id("kv"), (1, true));
    core.current_state("kv", |s| assert_eq!(s.get("a"), Some("b")));

    let (ok, _) = core.submit_transaction("kv", KvTxn::lww_set(0, token(1, 2), "a", "c")).unwrap();
    assert!(ok);
    assert_eq!(core.current_state_id("kv"), (2, true));
    core.current_state("kv", |s| assert_eq!(s.get("a"), Some("c")));

    let (tail, exists) = core.transactions_since_id("kv", 0);
    assert!(exists);
    assert_eq!(tail.len(), 2);
}

#[test]
fn pessimistic_reject_scenario() {
    let core: DiegoCore<KvState> =
        DiegoCore::new(KvState::new, CoreConfig { trailing_distance: 50, durable_root: None }).unwrap();
    core.submit_transaction("kv", KvTxn::lww_set(0, token(1, 1), "a", "b")).unwrap();
    core.submit_transaction("kv", KvTxn::lww_set(0, token(1, 2), "a", "c")).unwrap();

    let (ok, _) = core.submit_transaction("kv", KvTxn::pessimistic_set(0, token(2, 1), "a", "d")).unwrap();
    assert!(!ok);
    core.current_state("kv", |s| assert_eq!(s.get("a"), Some("c")));
    assert_eq!(core.current_state_id("kv"), (2, true));

    let (ok, _) = core.submit_transaction("kv", KvTxn::pessimistic_set(2, token(2, 2), "a", "d")).unwrap();
    assert!(ok);
    core.current_state("kv", |s| assert_eq!(s.get("a"), Some("d")));
    assert_eq!(core.current_state_id("kv"), (3, true));
}

#[test]
fn test_and_set_resolves_past_untouched_key() {
    let core: DiegoCore<KvState> =
        DiegoCore::new(KvState::new, CoreConfig { trailing_distance: 50, durable_root: None }).unwrap();
    core.submit_transaction("kv", KvTxn::lww_set(0, token(1, 1), "a", "b")).unwrap();
    core.submit_transaction("kv", KvTxn::lww_set(0, token(1, 2), "a", "c")).unwrap();

    let (ok, tail) = core.submit_transaction("kv", KvTxn::test_and_set(1, token(2, 1), "b", "x")).unwrap();
    assert!(ok);
    assert_eq!(tail.last().unwrap().id(), 2);
    core.current_state("kv", |s| assert_eq!(s.get("b"), Some("x")));
    assert_eq!(core.current_state_id("kv"), (3, true));
}

#[test]
fn at_most_once_duplicate_scenario() {
    let core: DiegoCore<KvState> =
        DiegoCore::new(KvState::new, CoreConfig { trailing_distance: 50, durable_root: None }).unwrap();
    let tok = token(1, 1);
    let (ok, _) = core.submit_transaction("kv", KvTxn::lww_set(0, tok, "k", "v1")).unwrap();
    assert!(ok);
    assert_eq!(core.current_state_id("kv"), (1, true));

    let (ok, _) = core.submit_transaction("kv", KvTxn::lww_set(0, tok, "k", "v1")).unwrap();
    assert!(ok);
    assert_eq!(core.current_state_id("kv"), (1, true));
    core.current_state("kv", |s| assert_eq!(s.get("k"), Some("v1")));
}
