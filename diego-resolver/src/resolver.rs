//! The per-stream admission state machine. A [`Resolver`] owns one
//! `current_state`, one `trailing_state`, the bounded [`Log`] between them,
//! an at-most-once token index, and (optionally) a durable [`Wal`].

use crate::log::Log;
use crate::traits::{RequestToken, State};
use diego_base::{invariant, Result};
use diego_wal::Wal;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

pub const DEFAULT_TRAILING_DISTANCE: i64 = 500_000;

// `durable_path`, if set, backs the resolver with a `Wal` at that directory
// and replays it on open; `None` gives an in-memory-only resolver.
pub struct ResolverConfig {
    pub trailing_distance: i64,
    pub durable_path: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            trailing_distance: DEFAULT_TRAILING_DISTANCE,
            durable_path: None,
        }
    }
}

struct Inner<S: State> {
    current_state: S,
    trailing_state: S,
    log: Log<S::Txn>,
    token_index: HashMap<RequestToken, i64>,
    trailing_distance: i64,
    wal: Option<Wal<S::Txn>>,
    closed: bool,
}

impl<S: State> Inner<S>
where
    S::Txn: Serialize + DeserializeOwned,
{
    // `append_to_wal` is false only during WAL replay at startup, where the
    // transactions are already durable.
    fn submit_lockless(&mut self, t: S::Txn, append_to_wal: bool) -> (bool, Option<S::Txn>) {
        let trid = t.id();
        let sid = self.current_state.id();
        let tsid = self.trailing_state.id();

        if let Some(&existing_id) = self.token_index.get(&t.token()) {
            let existing = match self.log.get(existing_id) {
                Some(e) => e.clone(),
                None => diego_base::fatal(format!(
                    "token index pointed at log entry {existing_id}, which is no longer in the log"
                )),
            };
            debug!(target: "diego", client_id = t.token().client_id, req_id = t.token().req_id, "duplicate request token, replaying prior commit");
            return (true, Some(existing));
        }

        // Case A: fresh at the head.
        if trid == sid {
            let (ok, committed) = self.current_state.apply(t);
            invariant!(ok, "transaction at head (id {trid}) was rejected by apply");
            let committed = committed.unwrap_or_else(|| diego_base::fatal("accepted apply returned no transaction"));
            return self.transaction_success(committed, append_to_wal);
        }

        // Case B: within the trailing window. Try a direct apply first (some
        // transaction kinds, e.g. last-writer-wins, accept regardless of id);
        // fall back to resolve-then-apply.
        if trid >= tsid && trid < sid {
            let (ok, committed) = self.current_state.apply(t.clone());
            if ok {
                let committed = committed.unwrap_or_else(|| diego_base::fatal("accepted apply returned no transaction"));
                return self.transaction_success(committed, append_to_wal);
            }

            let (ok, resolved) = self.current_state.resolve(&self.trailing_state, &self.log, t);
            if !ok {
                debug!(target: "diego", trid, sid, "resolve rejected transaction");
                return (false, None);
            }
            let resolved = resolved.unwrap_or_else(|| diego_base::fatal("accepted resolve returned no transaction"));
            invariant!(
                resolved.id() == sid,
                "resolved transaction id {} != current state id {}",
                resolved.id(),
                sid
            );

            let (ok, committed) = self.current_state.apply(resolved);
            invariant!(ok, "resolved transaction was rejected by apply");
            let committed = committed.unwrap_or_else(|| diego_base::fatal("accepted apply returned no transaction"));
            return self.transaction_success(committed, append_to_wal);
        }

        // Case C: older than the trailing state. Reject without calling
        // apply, so at-most-once semantics hold even for rejected retries.
        if trid < tsid {
            debug!(target: "diego", trid, tsid, "rejecting transaction older than the trailing window");
            return (false, None);
        }

        diego_base::fatal(format!(
            "unreachable admission case: trid={trid} tsid={tsid} sid={sid}"
        ));
    }

    fn transaction_success(&mut self, t: S::Txn, append_to_wal: bool) -> (bool, Option<S::Txn>) {
        invariant!(
            t.id() == self.current_state.id(),
            "committed transaction id {} != current state id {}",
            t.id(),
            self.current_state.id()
        );
        self.commit(t.clone(), append_to_wal);
        (true, Some(t))
    }

    fn commit(&mut self, t: S::Txn, append_to_wal: bool) {
        if append_to_wal {
            if let Some(wal) = self.wal.as_ref() {
                if let Err(e) = wal.append(&t) {
                    diego_base::fatal(format!("wal append failed: {e:?}"));
                }
            }
        }

        if self.log.len() as i64 == self.trailing_distance {
            let evicted = self
                .log
                .pop_front()
                .unwrap_or_else(|| diego_base::fatal("log unexpectedly empty at trailing distance"));
            let (ok, _) = self.trailing_state.apply(evicted.clone());
            invariant!(ok, "evicted transaction {} failed to apply to trailing state", evicted.id());
            self.trailing_state.set_id(self.trailing_state.id() + 1);
            self.token_index.remove(&evicted.token());
        }

        self.log.push_back(t.clone());
        self.token_index.insert(t.token(), t.id());
        self.current_state.set_id(self.current_state.id() + 1);
    }

    fn transactions_since_id_lockless(&self, id: i64) -> (i64, Vec<S::Txn>)
    where
        S::Txn: Clone,
    {
        let sid = self.current_state.id();
        let tsid = self.trailing_state.id();
        if id >= sid || id < tsid {
            return (sid, Vec::new());
        }
        (sid, self.log.slice_from(id))
    }
}

pub struct Resolver<S: State> {
    inner: RwLock<Inner<S>>,
}

impl<S: State> Resolver<S>
where
    S::Txn: Serialize + DeserializeOwned,
{
    // `make_state` is called twice, once for `current_state` and once for
    // `trailing_state`.
    pub fn new(make_state: impl Fn() -> S, config: ResolverConfig) -> Result<Self> {
        let mut current_state = make_state();
        let mut trailing_state = make_state();
        current_state.set_id(0);
        trailing_state.set_id(0);

        let trailing_distance = if config.trailing_distance <= 0 {
            DEFAULT_TRAILING_DISTANCE
        } else {
            config.trailing_distance
        };

        let wal = match config.durable_path {
            Some(path) => Some(Wal::open(path)?),
            None => None,
        };

        let mut inner = Inner {
            current_state,
            trailing_state,
            log: Log::new(0),
            token_index: HashMap::new(),
            trailing_distance,
            wal: None,
            closed: false,
        };

        if let Some(wal_ref) = wal.as_ref() {
            wal_ref.read_all(|t| {
                inner.submit_lockless(t, false);
            })?;
        }

        inner.wal = wal;

        Ok(Self { inner: RwLock::new(inner) })
    }

    pub fn submit(&self, t: S::Txn) -> (bool, Option<S::Txn>) {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return (false, None);
        }
        inner.submit_lockless(t, true)
    }

    // Submits `t` and returns the tail committed since (and including) it,
    // under a single write lock.
    pub fn submit_and_get_since(&self, t: S::Txn) -> (bool, Vec<S::Txn>) {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return (false, Vec::new());
        }
        let since_id = t.id();
        let (ok, _) = inner.submit_lockless(t, true);
        let (_, tail) = inner.transactions_since_id_lockless(since_id);
        (ok, tail)
    }

    // Returns an empty tail, not an error, both when `id` is already current
    // and when `id` has fallen out of the trailing window.
    pub fn transactions_since_id(&self, id: i64) -> (i64, Vec<S::Txn>) {
        let inner = self.inner.read().unwrap();
        if inner.closed {
            return (0, Vec::new());
        }
        inner.transactions_since_id_lockless(id)
    }

    pub fn current_state_id(&self) -> i64 {
        let inner = self.inner.read().unwrap();
        inner.current_state.id()
    }

    pub fn trailing_state_id(&self) -> i64 {
        let inner = self.inner.read().unwrap();
        inner.trailing_state.id()
    }

    pub fn trailing_distance(&self) -> i64 {
        self.inner.read().unwrap().trailing_distance
    }

    pub fn current_state<R>(&self, callback: impl FnOnce(&S) -> R) -> R {
        let inner = self.inner.read().unwrap();
        callback(&inner.current_state)
    }

    // Idempotent; further `submit` calls are refused after close.
    pub fn close(&self) {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(wal) = inner.wal.as_ref() {
            wal.close();
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn assert_equal(
        &self,
        other: &Self,
        state_equals: impl Fn(&S, &S) -> bool,
        transaction_equals: impl Fn(&S::Txn, &S::Txn) -> bool,
    ) {
        let a = self.inner.read().unwrap();
        let b = other.inner.read().unwrap();
        invariant!(state_equals(&a.current_state, &b.current_state), "resolver current states not equal");
        invariant!(state_equals(&a.trailing_state, &b.trailing_state), "resolver trailing states not equal");
        invariant!(a.log.len() == b.log.len(), "resolver log lengths differ: {} vs {}", a.log.len(), b.log.len());

        if let (Some(back_a), Some(back_b)) = (a.log.back_id(), b.log.back_id()) {
            invariant!(a.log.front_id() == b.log.front_id(), "resolver log front ids differ");
            invariant!(back_a == back_b, "resolver log back ids differ");
            for id in a.log.front_id()..=back_a {
                let ea = a.log.get(id).expect("id within log bounds");
                let eb = b.log.get(id).expect("id within log bounds");
                invariant!(transaction_equals(ea, eb), "transactions at id {id} not equal");
            }
        }
    }
}
