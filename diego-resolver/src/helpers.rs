//! Small `State::apply`/`State::resolve` building blocks for embedding
//! applications. Sugar over the [`crate::State`] trait; not part of the
//! resolver's own control flow.

use crate::traits::State;

/// Calls `applier` only if `t` is up-to-date with `s`, i.e. `s.id() ==
/// t.id()`. Suitable for transactions that must always be applied fresh
/// (lww-style writes that never need `resolve`).
pub fn apply_if_up_to_date<S: State>(
    s: &mut S,
    t: S::Txn,
    applier: impl FnOnce(&mut S, S::Txn) -> S::Txn,
) -> (bool, Option<S::Txn>) {
    if s.id() == t.id() {
        let t = applier(s, t);
        (true, Some(t))
    } else {
        (false, None)
    }
}

/// Calls `is_safe` to decide whether `t` may be applied, and if so, applies
/// it via `applier`; otherwise refuses. Suitable for pessimistic
/// transactions that reject rather than resolve when stale.
pub fn apply_if_safe<S: State>(
    s: &mut S,
    t: S::Txn,
    is_safe: impl FnOnce(&S, &S::Txn) -> bool,
    applier: impl FnOnce(&mut S, S::Txn) -> S::Txn,
) -> (bool, Option<S::Txn>) {
    if is_safe(s, &t) {
        let t = applier(s, t);
        (true, Some(t))
    } else {
        (false, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_fixture::{KvState, KvTxn};
    use crate::traits::{RequestToken, State, Transaction};

    fn token() -> RequestToken {
        RequestToken::new(1, 1)
    }

    #[test]
    fn apply_if_up_to_date_applies_when_fresh() {
        let mut s = KvState::new();
        let t = KvTxn::lww_set(0, token(), "k", "v");
        let (ok, committed) = apply_if_up_to_date(&mut s, t, |s, t| {
            s.data.insert("k".to_string(), "v".to_string());
            t
        });
        assert!(ok);
        assert_eq!(committed.unwrap().id(), 0);
        assert_eq!(s.get("k"), Some("v"));
    }

    #[test]
    fn apply_if_up_to_date_refuses_when_stale() {
        let mut s = KvState::new();
        s.set_id(1);
        let t = KvTxn::lww_set(0, token(), "k", "v");
        let (ok, committed) = apply_if_up_to_date(&mut s, t, |s, t| {
            s.data.insert("k".to_string(), "v".to_string());
            t
        });
        assert!(!ok);
        assert!(committed.is_none());
        assert_eq!(s.get("k"), None);
    }

    #[test]
    fn apply_if_safe_applies_when_predicate_holds() {
        let mut s = KvState::new();
        let t = KvTxn::lww_set(0, token(), "k", "v");
        let (ok, committed) = apply_if_safe(&mut s, t, |_, _| true, |s, t| {
            s.data.insert("k".to_string(), "v".to_string());
            t
        });
        assert!(ok);
        assert!(committed.is_some());
        assert_eq!(s.get("k"), Some("v"));
    }

    #[test]
    fn apply_if_safe_refuses_when_predicate_fails() {
        let mut s = KvState::new();
        let t = KvTxn::lww_set(0, token(), "k", "v");
        let (ok, committed) = apply_if_safe(&mut s, t, |_, _| false, |s, t| {
            s.data.insert("k".to_string(), "v".to_string());
            t
        });
        assert!(!ok);
        assert!(committed.is_none());
        assert_eq!(s.get("k"), None);
    }
}
