//! Distributed coordination primitives — exclusive locks, shared read/write
//! locks, and a non-blocking asynchronous lock — layered on a ZooKeeper-style
//! hierarchical coordination service.
//!
//! The lock state machine (candidate creation, predecessor watching,
//! revocation) is written against the `Backend` trait so the same code runs
//! over a real `zookeeper` ensemble or the in-process mock used by this
//! crate's own test suite.

#[macro_use]
extern crate failure_derive;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate slog;

use std::sync::Arc;

use slog::Logger;

mod async_lock;
mod backend;
mod candidate;
mod config;
mod error;
mod metrics;
mod node_id;
mod path;
mod retry;
mod revoke;
mod sync_lock;

#[cfg(any(test, debug_assertions))]
pub mod mock;

pub use self::async_lock::AsyncLock as ZkAsyncLock;
pub use self::async_lock::ScopedAsyncLock;
pub use self::backend::Backend;
pub use self::config::Backend as BackendConfig;
pub use self::config::Config;
pub use self::config::RetryConfig;
pub use self::config::ZookeeperConfig;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::metrics::register_metrics;
pub use self::node_id::NodeId;
pub use self::path::LockKind;
pub use self::retry::retryable;
pub use self::revoke::RevokeMode;
pub use self::sync_lock::AcquireOptions;
pub use self::sync_lock::Lock as ZkLock;
pub use self::sync_lock::Lock as ZkReadLock;
pub use self::sync_lock::Lock as ZkWriteLock;
pub use self::sync_lock::ScopedLock;

/// Connect to the coordination service described by `config`, returning the
/// `Backend` every lock object in this crate is built on top of.
///
/// Mirrors this codebase's own `Coordinator::new`/`Admin::new` constructors:
/// match the configured backend kind and hand back the one real
/// implementation this crate ships (`zookeeper`), wrapped for dynamic
/// dispatch so the same lock types work unmodified against the mock
/// backend in tests.
pub fn connect(config: &Config, logger: Logger) -> Result<Arc<dyn Backend>> {
    match config.backend.clone() {
        BackendConfig::Zookeeper(zk_config) => {
            let backend = self::backend::zookeeper::ZookeeperBackend::new(zk_config, logger)?;
            Ok(Arc::new(backend))
        }
    }
}
