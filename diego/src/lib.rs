//! Diego: a server-side conflict-resolution engine for collaborative
//! editing of replicated mutable state. Clients submit transactions
//! prepared against some prior snapshot; this crate linearizes them into a
//! single total order per namespace, automatically rewriting concurrent
//! transactions so they can be applied on top of the committed head while
//! preserving each transaction's intent whenever it commutes with (or can
//! be resolved against) intervening work.
//!
//! Domain-agnostic: application state and transaction semantics are
//! supplied by the embedding application through the [`State`] and
//! [`Transaction`] traits. The HTTP/wire transport, CLI entry points, and
//! concrete example applications (key-value, lego, text-OT) are external
//! collaborators and out of scope for this crate.

pub use diego_base::{err, Error, Result};
pub use diego_core::{CoreConfig, DiegoCore};
pub use diego_namespace::NamespaceManager;
pub use diego_resolver::{
    apply_if_safe, apply_if_up_to_date, DurableTransaction, Log, ManagedResolve, RequestToken,
    RequestTokenGenerator, Resolver, ResolverConfig, State, Transaction, DEFAULT_TRAILING_DISTANCE,
};
pub use diego_wal::Wal;

#[cfg(any(test, feature = "test-util"))]
pub use diego_core::assert_cores_equal;

#[cfg(any(test, feature = "test-util"))]
pub use diego_resolver::kv_fixture;

#[cfg(test)]
mod tests;
