use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use failure::ResultExt;
use slog::Logger;

use zookeeper::Acl;
use zookeeper::CreateMode;
use zookeeper::WatchedEvent;
use zookeeper::ZkError;
use zookeeper::ZkResult;
use zookeeper::ZkState;
use zookeeper::ZooKeeper;

use super::super::config::ZookeeperConfig;
use super::super::metrics::BACKEND_OP_DURATION;
use super::super::metrics::BACKEND_OP_ERRORS;
use super::super::retry::with_retry;
use super::super::ErrorKind;
use super::super::Result;
use super::Backend;
use super::WakeSignal;

/// `Backend` implementation wrapping a live zookeeper ensemble connection.
///
/// Mirrors this codebase's `Client` wrapper: a `Mutex<CurrentSession>` holding
/// the live `ZooKeeper` handle plus an `Arc<AtomicBool>` flag flipped by a
/// `ZkState::Closed` listener, transparently reconnected on next use.
pub struct ZookeeperBackend {
    config: ZookeeperConfig,
    logger: Logger,
    session: Mutex<CurrentSession>,
}

struct CurrentSession {
    active: Arc<AtomicBool>,
    keeper: Arc<ZooKeeper>,
}

impl ZookeeperBackend {
    pub fn new(config: ZookeeperConfig, logger: Logger) -> Result<ZookeeperBackend> {
        let session = Mutex::new(ZookeeperBackend::connect(&config, &logger)?);
        Ok(ZookeeperBackend {
            config,
            logger,
            session,
        })
    }

    fn connect(config: &ZookeeperConfig, logger: &Logger) -> Result<CurrentSession> {
        info!(logger, "Connecting to zookeeper ensemble"; "ensemble" => &config.ensemble);
        let timeout = Duration::from_secs(config.timeout);
        let timer = BACKEND_OP_DURATION.with_label_values(&["connect"]).start_timer();
        let keeper = ZooKeeper::connect(&config.ensemble, timeout, |_| {}).map_err(|error| {
            BACKEND_OP_ERRORS.with_label_values(&["connect"]).inc();
            error
        });
        timer.observe_duration();
        let keeper = keeper.with_context(|_| ErrorKind::BackendConnect)?;

        let active = Arc::new(AtomicBool::new(true));
        let notify_close = Arc::clone(&active);
        let listener_logger = logger.clone();
        keeper.add_listener(move |state| {
            if let ZkState::Closed = state {
                warn!(listener_logger, "Zookeeper session closed");
                notify_close.store(false, Ordering::Relaxed);
            }
        });
        Ok(CurrentSession {
            active,
            keeper: Arc::new(keeper),
        })
    }

    /// Return the current live session, reconnecting if the previous one closed.
    fn keeper(&self) -> Result<Arc<ZooKeeper>> {
        let mut current = self.session.lock().expect("zookeeper session lock poisoned");
        if !current.active.load(Ordering::Relaxed) {
            *current = ZookeeperBackend::connect(&self.config, &self.logger)?;
        }
        Ok(Arc::clone(&current.keeper))
    }

    fn timed<T, F>(op: &'static str, f: F) -> ZkResult<T>
    where
        F: FnOnce() -> ZkResult<T>,
    {
        let timer = BACKEND_OP_DURATION.with_label_values(&[op]).start_timer();
        let result = f();
        timer.observe_duration();
        if result.is_err() {
            BACKEND_OP_ERRORS.with_label_values(&[op]).inc();
        }
        result
    }
}

impl Backend for ZookeeperBackend {
    fn ensure_persistent(&self, path: &str) -> Result<()> {
        let keeper = self.keeper()?;
        let result = with_retry(&self.config.retry, || {
            ZookeeperBackend::timed("create", || {
                keeper
                    .create(path, Vec::new(), Acl::open_unsafe().clone(), CreateMode::Persistent)
                    .map(|_| ())
            })
        });
        match result {
            Ok(()) | Err(ZkError::NodeExists) => Ok(()),
            Err(error) => Err(error).with_context(|_| ErrorKind::Backend("ensure persistent path"))?,
        }
    }

    fn create_sequential(&self, parent_prefix: &str, data: Vec<u8>) -> Result<String> {
        let keeper = self.keeper()?;
        with_retry(&self.config.retry, || {
            ZookeeperBackend::timed("create_sequential", || {
                keeper.create(
                    parent_prefix,
                    data.clone(),
                    Acl::open_unsafe().clone(),
                    CreateMode::EphemeralSequential,
                )
            })
        })
        .with_context(|_| ErrorKind::Backend("candidate creation"))
        .map_err(Into::into)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let keeper = self.keeper()?;
        let result = with_retry(&self.config.retry, || {
            ZookeeperBackend::timed("delete", || keeper.delete(path, None))
        });
        match result {
            Ok(()) | Err(ZkError::NoNode) => Ok(()),
            Err(error) => Err(error).with_context(|_| ErrorKind::Backend("node deletion"))?,
        }
    }

    fn get_children(&self, parent: &str) -> Result<Vec<String>> {
        let keeper = self.keeper()?;
        with_retry(&self.config.retry, || {
            ZookeeperBackend::timed("get_children", || keeper.get_children(parent, false))
        })
        .with_context(|_| ErrorKind::Backend("listing children"))
        .map_err(Into::into)
    }

    fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let keeper = self.keeper()?;
        with_retry(&self.config.retry, || {
            ZookeeperBackend::timed("get_data", || keeper.get_data(path, false))
        })
        .map(|(data, _stat)| data)
        .with_context(|_| ErrorKind::Backend("reading node data"))
        .map_err(Into::into)
    }

    fn set_data_create_or_set(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let keeper = self.keeper()?;
        let result = with_retry(&self.config.retry, || {
            ZookeeperBackend::timed("create", || {
                keeper.create(path, data.clone(), Acl::open_unsafe().clone(), CreateMode::Persistent)
                    .map(|_| ())
            })
        });
        match result {
            Ok(()) => Ok(()),
            Err(ZkError::NodeExists) => with_retry(&self.config.retry, || {
                ZookeeperBackend::timed("set_data", || keeper.set_data(path, data.clone(), None).map(|_| ()))
            })
            .with_context(|_| ErrorKind::Backend("updating node data"))
            .map_err(Into::into),
            Err(error) => Err(error).with_context(|_| ErrorKind::Backend("node creation"))?,
        }
    }

    fn watch_exists(&self, path: &str, signal: Arc<WakeSignal>) -> Result<bool> {
        let keeper = self.keeper()?;
        let watch_signal = Arc::clone(&signal);
        let stat = with_retry(&self.config.retry, || {
            let watch_signal = Arc::clone(&watch_signal);
            ZookeeperBackend::timed("exists_w", || {
                keeper.exists_w(path, move |_event: WatchedEvent| {
                    watch_signal.wake();
                })
            })
        })
        .with_context(|_| ErrorKind::Backend("installing watch"))?;
        Ok(stat.is_some())
    }

    fn watch_session(&self, signal: Arc<WakeSignal>) -> Result<Box<dyn Send>> {
        let keeper = self.keeper()?;
        let subscription = keeper.add_listener(move |state| {
            if let ZkState::Closed = state {
                signal.mark_session_closed();
            }
        });
        Ok(Box::new(SessionWatch {
            unsubscribe: Some(subscription),
            keeper: Some(keeper),
        }))
    }
}

/// Guard that ties a `WakeSignal`'s lifetime to a session-close listener, so a
/// waiting attempt is woken promptly if the whole session drops mid-wait
/// (spec §4.2 "Session loss during wait").
struct SessionWatch {
    unsubscribe: Option<zookeeper::Subscription>,
    keeper: Option<Arc<ZooKeeper>>,
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        if let (Some(id), Some(keeper)) = (self.unsubscribe.take(), self.keeper.take()) {
            keeper.remove_listener(id);
        }
    }
}
