//! The per-stream resolver: an admission state machine over opaque,
//! application-supplied [`State`]/[`Transaction`] pairs, backed by a bounded
//! [`Log`] and an optional durable write-ahead log.

mod helpers;
mod log;
mod managed;
mod resolver;
mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod kv_fixture;

pub use helpers::{apply_if_safe, apply_if_up_to_date};
pub use log::Log;
pub use managed::ManagedResolve;
pub use resolver::{Resolver, ResolverConfig, DEFAULT_TRAILING_DISTANCE};
pub use traits::{DurableTransaction, RequestToken, RequestTokenGenerator, State, Transaction};
