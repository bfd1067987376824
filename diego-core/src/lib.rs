//! A `NamespaceManager` plus a `make_state` factory and an optional durable
//! root directory, composed into the public submit/query surface.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use diego_base::Result;
use diego_namespace::NamespaceManager;
use diego_resolver::{Resolver, ResolverConfig, State, Transaction};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

fn encode_namespace(ns: &str) -> String {
    URL_SAFE_NO_PAD.encode(ns.as_bytes())
}

fn decode_namespace(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}

pub struct CoreConfig {
    pub trailing_distance: i64,
    // If set, every namespace's Resolver is backed by a WAL at
    // durable_root/<url-safe-base64(namespace)>, and on construction every
    // existing namespace subdirectory is eagerly replayed.
    pub durable_root: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            trailing_distance: diego_resolver::DEFAULT_TRAILING_DISTANCE,
            durable_root: None,
        }
    }
}

pub struct DiegoCore<S: State>
where
    S::Txn: Serialize + DeserializeOwned,
{
    namespaces: NamespaceManager<S>,
    trailing_distance: i64,
    make_state: Box<dyn Fn() -> S + Send + Sync>,
    durable_root: Option<PathBuf>,
}

impl<S: State> DiegoCore<S>
where
    S::Txn: Serialize + DeserializeOwned,
{
    // If config.durable_root is set, it must point to a directory that is
    // either empty or the durable root of a previous core with the same
    // make_state; every namespace subdirectory found there is recreated
    // (and its WAL replayed) before this returns.
    pub fn new(make_state: impl Fn() -> S + Send + Sync + 'static, config: CoreConfig) -> Result<Self> {
        let trailing_distance = if config.trailing_distance <= 0 {
            diego_resolver::DEFAULT_TRAILING_DISTANCE
        } else {
            config.trailing_distance
        };

        let core = Self {
            namespaces: NamespaceManager::new(),
            trailing_distance,
            make_state: Box::new(make_state),
            durable_root: config.durable_root,
        };

        if core.durable_root.is_some() {
            core.load_durable_namespaces()?;
        }

        Ok(core)
    }

    fn load_durable_namespaces(&self) -> Result<()> {
        let root = self.durable_root.as_ref().expect("durable_root set by caller");
        std::fs::create_dir_all(root)?;
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let encoded = name.to_str().ok_or_else(|| diego_base::err("non-utf8 durable root entry"))?;
            match decode_namespace(encoded) {
                Some(ns) => {
                    debug!(target: "diego", namespace = %ns, "recreating namespace from durable root");
                    self.robust_get(&ns)?;
                }
                None => {
                    warn!(target: "diego", entry = encoded, "skipping non-base64 durable root entry");
                }
            }
        }
        Ok(())
    }

    fn resolver_durable_path(&self, ns: &str) -> Option<PathBuf> {
        self.durable_root.as_ref().map(|root| root.join(encode_namespace(ns)))
    }

    // Tolerates racing creators and deleters.
    fn robust_get(&self, ns: &str) -> Result<Arc<Resolver<S>>> {
        loop {
            if let Some(rs) = self.namespaces.get(ns) {
                return Ok(rs);
            }

            let rs = Arc::new(Resolver::new(
                &self.make_state,
                ResolverConfig {
                    trailing_distance: self.trailing_distance,
                    durable_path: self.resolver_durable_path(ns),
                },
            )?);

            if self.namespaces.create(ns, rs.clone()) {
                return Ok(rs);
            }
            // Lost the race to create; someone else may have since removed
            // it again, so loop back around to `get`.
        }
    }

    // Creates ns if it doesn't exist. The tail is returned regardless of
    // whether t was accepted, so a rejected caller can still discover how
    // far behind it has fallen.
    pub fn submit_transaction(&self, ns: &str, t: S::Txn) -> Result<(bool, Vec<S::Txn>)> {
        let rs = self.robust_get(ns)?;
        let tid = t.id();
        let (ok, _) = rs.submit(t);
        let (_, tail) = rs.transactions_since_id(tid);
        Ok((ok, tail))
    }

    pub fn transactions_since_id(&self, ns: &str, id: i64) -> (Vec<S::Txn>, bool) {
        match self.namespaces.get(ns) {
            Some(rs) => {
                let (_, tail) = rs.transactions_since_id(id);
                (tail, true)
            }
            None => (Vec::new(), false),
        }
    }

    pub fn current_state_id(&self, ns: &str) -> (i64, bool) {
        match self.namespaces.get(ns) {
            Some(rs) => (rs.current_state_id(), true),
            None => (0, false),
        }
    }

    // A no-op if ns doesn't exist. callback must not call back into this
    // core.
    pub fn current_state(&self, ns: &str, callback: impl FnOnce(&S)) {
        if let Some(rs) = self.namespaces.get(ns) {
            rs.current_state(callback);
        }
    }

    pub fn remove_namespace(&self, ns: &str) -> Result<()> {
        if self.namespaces.remove(ns) {
            if let Some(path) = self.resolver_durable_path(ns) {
                remove_dir_if_present(&path)?;
            }
        }
        Ok(())
    }

    // Closes every namespace's resolver without removing it from the map,
    // simulating a crash.
    #[cfg(any(test, feature = "test-util"))]
    pub fn kill(&self) {
        self.namespaces.close_all();
    }
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(any(test, feature = "test-util"))]
pub fn assert_cores_equal<S: State>(
    a: &DiegoCore<S>,
    b: &DiegoCore<S>,
    state_equals: impl Fn(&S, &S) -> bool + Copy,
    transaction_equals: impl Fn(&S::Txn, &S::Txn) -> bool + Copy,
) where
    S::Txn: Serialize + DeserializeOwned,
{
    diego_namespace::assert_namespaces_equal(&a.namespaces, &b.namespaces, state_equals, transaction_equals);
}

#[cfg(test)]
mod tests;
