//! A guarded mapping from stream name to [`Resolver`]. The manager never
//! holds its own lock while calling into a Resolver — only the map
//! operations themselves (insert/lookup/remove) are guarded.

use diego_base::invariant;
use diego_resolver::{Resolver, State};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub struct NamespaceManager<S: State>
where
    S::Txn: Serialize + DeserializeOwned,
{
    namespaces: RwLock<HashMap<String, Arc<Resolver<S>>>>,
}

impl<S: State> NamespaceManager<S>
where
    S::Txn: Serialize + DeserializeOwned,
{
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `resolver` under `name` only if absent. Returns whether the
    /// insertion happened.
    pub fn create(&self, name: &str, resolver: Arc<Resolver<S>>) -> bool {
        let mut namespaces = self.namespaces.write().unwrap();
        if namespaces.contains_key(name) {
            return false;
        }
        namespaces.insert(name.to_string(), resolver);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<Resolver<S>>> {
        self.namespaces.read().unwrap().get(name).cloned()
    }

    /// Look up, close, and remove `name` atomically under the write lock.
    pub fn remove(&self, name: &str) -> bool {
        let mut namespaces = self.namespaces.write().unwrap();
        match namespaces.remove(name) {
            Some(resolver) => {
                resolver.close();
                debug!(target: "diego", namespace = name, "removed namespace");
                true
            }
            None => false,
        }
    }

    pub fn iter_names(&self) -> Vec<String> {
        self.namespaces.read().unwrap().keys().cloned().collect()
    }

    /// Close every namespace's resolver without removing it from the map.
    /// Used by [`crate::assert_namespaces_equal`]-adjacent durability tests
    /// to simulate a crash: subsequent reopen-and-replay must reconstruct
    /// equivalent state.
    pub fn close_all(&self) {
        let namespaces = self.namespaces.read().unwrap();
        for resolver in namespaces.values() {
            resolver.close();
        }
    }
}

impl<S: State> Default for NamespaceManager<S>
where
    S::Txn: Serialize + DeserializeOwned,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Test-only: assert two namespace managers hold resolvers for the same
/// set of names, each pairwise equal per `state_equals`/`transaction_equals`.
#[cfg(any(test, feature = "test-util"))]
pub fn assert_namespaces_equal<S: State>(
    a: &NamespaceManager<S>,
    b: &NamespaceManager<S>,
    state_equals: impl Fn(&S, &S) -> bool + Copy,
    transaction_equals: impl Fn(&S::Txn, &S::Txn) -> bool + Copy,
) where
    S::Txn: Serialize + DeserializeOwned,
{
    let a_names = a.namespaces.read().unwrap();
    let b_names = b.namespaces.read().unwrap();
    invariant!(
        a_names.len() == b_names.len(),
        "namespace managers hold different numbers of namespaces: {} vs {}",
        a_names.len(),
        b_names.len()
    );

    for (name, resolver_a) in a_names.iter() {
        let resolver_b = b_names
            .get(name)
            .unwrap_or_else(|| diego_base::fatal(format!("namespace {name} missing from second manager")));
        resolver_a.assert_equal(resolver_b, state_equals, transaction_equals);
    }
}
