//! A tiny last-writer-wins / pessimistic / test-and-set key-value `State`
//! and `Transaction` fixture, used only by this workspace's own tests to
//! exercise the resolver's contracts end to end. Not a public example
//! application — concrete applications are out of scope for this
//! workspace.

use crate::helpers::apply_if_up_to_date;
use crate::log::Log;
use crate::traits::{RequestToken, State, Transaction};
use diego_base::invariant;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KvTxn {
    /// Always overwrites, regardless of the id it was authored against.
    LwwSet {
        id: i64,
        token: RequestToken,
        key: String,
        value: String,
    },
    /// Rejected unless applied exactly at the head; never resolved.
    PessimisticSet {
        id: i64,
        token: RequestToken,
        key: String,
        value: String,
    },
    /// Rejected at the head unless fresh; resolved if nothing else touched
    /// the same key in the intervening log.
    TestAndSet {
        id: i64,
        token: RequestToken,
        key: String,
        value: String,
    },
}

impl KvTxn {
    pub fn lww_set(id: i64, token: RequestToken, key: impl Into<String>, value: impl Into<String>) -> Self {
        KvTxn::LwwSet { id, token, key: key.into(), value: value.into() }
    }

    pub fn pessimistic_set(id: i64, token: RequestToken, key: impl Into<String>, value: impl Into<String>) -> Self {
        KvTxn::PessimisticSet { id, token, key: key.into(), value: value.into() }
    }

    pub fn test_and_set(id: i64, token: RequestToken, key: impl Into<String>, value: impl Into<String>) -> Self {
        KvTxn::TestAndSet { id, token, key: key.into(), value: value.into() }
    }

    fn key(&self) -> &str {
        match self {
            KvTxn::LwwSet { key, .. } => key,
            KvTxn::PessimisticSet { key, .. } => key,
            KvTxn::TestAndSet { key, .. } => key,
        }
    }
}

impl Transaction for KvTxn {
    fn id(&self) -> i64 {
        match self {
            KvTxn::LwwSet { id, .. } => *id,
            KvTxn::PessimisticSet { id, .. } => *id,
            KvTxn::TestAndSet { id, .. } => *id,
        }
    }

    fn set_id(&mut self, new_id: i64) {
        match self {
            KvTxn::LwwSet { id, .. } => *id = new_id,
            KvTxn::PessimisticSet { id, .. } => *id = new_id,
            KvTxn::TestAndSet { id, .. } => *id = new_id,
        }
    }

    fn token(&self) -> RequestToken {
        match self {
            KvTxn::LwwSet { token, .. } => *token,
            KvTxn::PessimisticSet { token, .. } => *token,
            KvTxn::TestAndSet { token, .. } => *token,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct KvState {
    pub id: i64,
    pub data: HashMap<String, String>,
}

impl KvState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn values_equal(a: &Self, b: &Self) -> bool {
        a.id == b.id && a.data == b.data
    }
}

impl State for KvState {
    type Txn = KvTxn;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn apply(&mut self, t: KvTxn) -> (bool, Option<KvTxn>) {
        match t {
            KvTxn::LwwSet { key, value, token, .. } => {
                self.data.insert(key.clone(), value.clone());
                (true, Some(KvTxn::LwwSet { id: self.id, token, key, value }))
            }
            t @ KvTxn::PessimisticSet { .. } => apply_if_up_to_date(self, t, |s, t| {
                if let KvTxn::PessimisticSet { key, value, .. } = &t {
                    s.data.insert(key.clone(), value.clone());
                }
                t
            }),
            t @ KvTxn::TestAndSet { .. } => apply_if_up_to_date(self, t, |s, t| {
                if let KvTxn::TestAndSet { key, value, .. } = &t {
                    s.data.insert(key.clone(), value.clone());
                }
                t
            }),
        }
    }

    fn resolve(&self, _ancestor: &Self, log: &Log<KvTxn>, current: KvTxn) -> (bool, Option<KvTxn>) {
        match &current {
            KvTxn::LwwSet { .. } => {
                invariant!(false, "lww_set should never need resolution, it always applies");
                unreachable!()
            }
            KvTxn::PessimisticSet { .. } => (false, None),
            KvTxn::TestAndSet { key, value, token, .. } => {
                let back_id = log.back_id().expect("resolve only called against a non-empty log");
                for existing in log.iter_range(current.id(), back_id) {
                    if existing.key() == key.as_str() {
                        return (false, None);
                    }
                }
                (
                    true,
                    Some(KvTxn::TestAndSet {
                        id: self.id,
                        token: *token,
                        key: key.clone(),
                        value: value.clone(),
                    }),
                )
            }
        }
    }
}
