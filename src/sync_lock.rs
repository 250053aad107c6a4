//! Blocking exclusive and shared read/write lock APIs (spec §4.3, §4.4).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use failure::ResultExt;
use slog::Logger;

use super::backend::Backend;
use super::backend::Wake;
use super::backend::WakeSignal;
use super::candidate;
use super::candidate::AttemptOutcome;
use super::metrics::LOCK_ACQUIRED;
use super::metrics::LOCK_ACQUIRE_TIMEOUT;
use super::metrics::LOCK_ACQUIRE_TOTAL;
use super::metrics::LOCK_RELEASE_TOTAL;
use super::metrics::LOCK_REVOKED_OBSERVED;
use super::metrics::LOCK_SESSION_RESTARTS;
use super::node_id::NodeId;
use super::path;
use super::path::LockKind;
use super::revoke;
use super::revoke::RevokeMode;
use super::ErrorKind;
use super::Result;

/// Revocation request strength for an `acquire_with` call (spec §9 REDESIGN
/// FLAGS: replaces `lock(revoke=IMMEDIATE)`'s dynamic callable form with an
/// explicit options struct).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Default)]
pub struct AcquireOptions {
    pub revoke: Option<RevokeMode>,
}

impl AcquireOptions {
    pub fn gentle() -> AcquireOptions {
        AcquireOptions { revoke: Some(RevokeMode::Gentle) }
    }

    pub fn immediate() -> AcquireOptions {
        AcquireOptions { revoke: Some(RevokeMode::Immediate) }
    }
}

struct State {
    candidate_path: Option<String>,
    acquired: bool,
    revoked: bool,
    revoke_cancel: Option<Arc<WakeSignal>>,
}

/// A named distributed lock of a given kind (exclusive, write or read). One
/// `Lock` may be reused across acquire/release cycles; each acquire creates a
/// fresh candidate (spec §3 "Lifecycle").
pub struct Lock {
    backend: Arc<dyn Backend>,
    logger: Logger,
    lock_root: String,
    lock_name: String,
    kind: LockKind,
    node_id: NodeId,
    state: Arc<Mutex<State>>,
}

impl Lock {
    pub fn new(backend: Arc<dyn Backend>, logger: Logger, lock_root: &str, lock_name: &str, kind: LockKind) -> Lock {
        Lock {
            backend,
            logger,
            lock_root: lock_root.to_string(),
            lock_name: lock_name.to_string(),
            kind,
            node_id: NodeId::new(),
            state: Arc::new(Mutex::new(State {
                candidate_path: None,
                acquired: false,
                revoked: false,
                revoke_cancel: None,
            })),
        }
    }

    pub fn exclusive(backend: Arc<dyn Backend>, logger: Logger, lock_root: &str, lock_name: &str) -> Lock {
        Lock::new(backend, logger, lock_root, lock_name, LockKind::Exclusive)
    }

    pub fn write(backend: Arc<dyn Backend>, logger: Logger, lock_root: &str, lock_name: &str) -> Lock {
        Lock::new(backend, logger, lock_root, lock_name, LockKind::Write)
    }

    pub fn read(backend: Arc<dyn Backend>, logger: Logger, lock_root: &str, lock_name: &str) -> Lock {
        Lock::new(backend, logger, lock_root, lock_name, LockKind::Read)
    }

    /// Attach user-supplied key/value attributes to this holder's `NodeId`,
    /// surfaced in the candidate's JSON payload for debugging (spec §3
    /// `node_attributes`). Has no effect on acquisition ordering.
    pub fn with_node_attributes(mut self, extra: BTreeMap<String, String>) -> Lock {
        self.node_id.extra(extra);
        self
    }

    /// Whether this instance currently holds the lock.
    pub fn has_lock(&self) -> bool {
        self.state.lock().expect("lock state poisoned").acquired
    }

    /// Whether this holder has observed a revocation request addressed to it.
    pub fn revoked(&self) -> bool {
        self.state.lock().expect("lock state poisoned").revoked
    }

    fn parent(&self) -> String {
        path::lock_parent_path(&self.lock_root, &self.lock_name)
    }

    /// Blocks until acquired, `timeout` elapses, or a permanent failure
    /// occurs. `timeout = None` waits indefinitely; `Some(Duration::from_secs(0))`
    /// is a non-blocking probe (spec §4.3).
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<bool> {
        self.acquire_with(timeout, AcquireOptions::default())
    }

    /// As `acquire`, additionally requesting revocation of blocking
    /// predecessors before waiting (spec §4.4).
    pub fn acquire_with(&self, timeout: Option<Duration>, opts: AcquireOptions) -> Result<bool> {
        LOCK_ACQUIRE_TOTAL.inc();
        let deadline = timeout.map(|t| Instant::now() + t);
        let parent = self.parent();

        if let Some(mode) = opts.revoke {
            revoke::request(&*self.backend, &parent, mode)?;
        }

        loop {
            let candidate_path = candidate::create_candidate(
                &*self.backend,
                &self.lock_root,
                &self.lock_name,
                self.kind,
                &self.node_id,
            )?;
            {
                let mut state = self.state.lock().expect("lock state poisoned");
                state.candidate_path = Some(candidate_path.clone());
            }

            match candidate::run_attempt(&*self.backend, &parent, &candidate_path, self.kind, deadline) {
                Ok(AttemptOutcome::Acquired) => {
                    {
                        let mut state = self.state.lock().expect("lock state poisoned");
                        state.acquired = true;
                        state.revoked = false;
                    }
                    self.spawn_revoke_watcher(parent.clone())?;
                    LOCK_ACQUIRED.inc();
                    return Ok(true);
                }
                Ok(AttemptOutcome::TimedOut) => {
                    LOCK_ACQUIRE_TIMEOUT.inc();
                    candidate::release_candidate(&*self.backend, &candidate_path)?;
                    let mut state = self.state.lock().expect("lock state poisoned");
                    state.candidate_path = None;
                    return Ok(false);
                }
                Ok(AttemptOutcome::SessionLost) => {
                    LOCK_SESSION_RESTARTS.inc();
                    info!(self.logger, "Session lost while waiting for lock, restarting attempt";
                        "lock_name" => &self.lock_name);
                    let mut state = self.state.lock().expect("lock state poisoned");
                    state.candidate_path = None;
                    drop(state);
                    continue;
                }
                Err(error) => {
                    let _ = candidate::release_candidate(&*self.backend, &candidate_path);
                    return Err(error);
                }
            }
        }
    }

    /// Releases the lock if held. Returns true if release completed (or the
    /// holder was already gone), false if the lock was not held.
    pub fn release(&self) -> Result<bool> {
        let candidate_path = {
            let mut state = self.state.lock().expect("lock state poisoned");
            if !state.acquired && state.candidate_path.is_none() {
                return Ok(false);
            }
            state.acquired = false;
            state.revoked = false;
            let cancel = state.revoke_cancel.take();
            let candidate_path = state.candidate_path.take();
            drop(state);
            if let Some(cancel) = cancel {
                cancel.wake();
            }
            candidate_path
        };
        LOCK_RELEASE_TOTAL.inc();
        if let Some(candidate_path) = candidate_path {
            candidate::release_candidate(&*self.backend, &candidate_path)?;
        }
        Ok(true)
    }

    /// Spawn a background thread that watches the revocation flag node for
    /// the lifetime of this acquisition, setting `revoked = true` the moment
    /// it is observed set (at acquire time or any time after, spec §4.6
    /// "Holders watch the flag for creation"). The thread exits once the
    /// flag fires, once `release` wakes its cancellation signal, or if the
    /// backend session closes.
    fn spawn_revoke_watcher(&self, parent: String) -> Result<()> {
        let signal = WakeSignal::new();
        {
            let mut state = self.state.lock().expect("lock state poisoned");
            state.revoke_cancel = Some(Arc::clone(&signal));
        }
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let logger = self.logger.clone();
        let lock_name = self.lock_name.clone();
        thread::Builder::new()
            .name(format!("zooky:revoke-watch:{}", lock_name))
            .spawn(move || loop {
                let still_held = state.lock().expect("lock state poisoned").acquired;
                if !still_held {
                    return;
                }
                let last_seen = signal.generation();
                match revoke::watch(&*backend, &parent, Arc::clone(&signal)) {
                    Ok(observed) if observed.revoked => {
                        state.lock().expect("lock state poisoned").revoked = true;
                        LOCK_REVOKED_OBSERVED.inc();
                        return;
                    }
                    Ok(_) => match signal.wait(last_seen, None) {
                        Wake::SessionClosed => return,
                        Wake::Woken | Wake::TimedOut => continue,
                    },
                    Err(error) => {
                        warn!(logger, "Revocation watch failed"; "lock_name" => &lock_name, "error" => %error);
                        return;
                    }
                }
            })
            .map(|_handle| ())
            .context(ErrorKind::SpawnThread("revocation watcher"))
            .map_err(Into::into)
    }

    /// Writes the revocation flag with a gentle payload, signaling all
    /// current holders to yield voluntarily (spec §4.3).
    pub fn revoke_all(&self) -> Result<()> {
        revoke::request(&*self.backend, &self.parent(), RevokeMode::Gentle)
    }

    /// Removes the lock parent and all of its children (spec §4.3; §9 "Open
    /// question — lock parent deletion": pruning happens only here, there is
    /// no periodic background sweep).
    pub fn clear(&self) -> Result<()> {
        let parent = self.parent();
        let children = self.backend.get_children(&parent)?;
        for child in children {
            self.backend.delete(&format!("{}/{}", parent, child))?;
        }
        self.backend.delete(&parent)?;
        Ok(())
    }

    /// Scoped acquisition: blocks until acquired (or `timeout` elapses,
    /// returning `None`), releasing on drop regardless of how the guard's
    /// scope is exited (spec §4.3 "context-manager semantics").
    pub fn scoped(&self, timeout: Option<Duration>) -> Result<Option<ScopedLock>> {
        self.scoped_with(timeout, AcquireOptions::default())
    }

    pub fn scoped_with(&self, timeout: Option<Duration>, opts: AcquireOptions) -> Result<Option<ScopedLock>> {
        if self.acquire_with(timeout, opts)? {
            Ok(Some(ScopedLock { lock: self }))
        } else {
            Ok(None)
        }
    }
}

/// RAII guard releasing its `Lock` when dropped, the way this codebase's
/// scoped-acquisition helpers guarantee release on every exit path.
pub struct ScopedLock<'a> {
    lock: &'a Lock,
}

impl<'a> Drop for ScopedLock<'a> {
    fn drop(&mut self) {
        if let Err(error) = self.lock.release() {
            error!(self.lock.logger, "Failed to release lock on scope exit";
                "lock_name" => &self.lock.lock_name, "error" => %error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeBackend;
    use slog::Discard;
    use slog::Logger as SlogLogger;
    use std::sync::Arc as StdArc;
    use std::thread;

    fn test_logger() -> Logger {
        SlogLogger::root(Discard, o!())
    }

    #[test]
    fn basic_exclusive_lock_round_trips() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let lock = Lock::exclusive(backend, test_logger(), "/ZktoolsLocks", "zkLockTest");
        assert!(lock.acquire(None).unwrap());
        assert!(lock.has_lock());
        assert!(lock.release().unwrap());
        assert!(!lock.has_lock());
    }

    #[test]
    fn sequential_handoff_between_two_holders() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let a = Lock::exclusive(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "L");
        assert!(a.acquire(None).unwrap());

        let vals: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let b_backend = StdArc::clone(&backend);
        let b_vals = Arc::clone(&vals);
        let handle = thread::spawn(move || {
            let b = Lock::exclusive(b_backend, test_logger(), "/ZktoolsLocks", "L");
            let _guard = b.scoped(None).unwrap().unwrap();
            b_vals.lock().unwrap().push(2);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(vals.lock().unwrap().is_empty());
        a.release().unwrap();
        handle.join().unwrap();
        assert_eq!(*vals.lock().unwrap(), vec![2]);
    }

    #[test]
    fn timeout_probe_returns_false_without_blocking() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let r1 = Lock::read(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "L");
        assert!(r1.acquire(None).unwrap());

        let w1 = Lock::write(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "L");
        let acquired = w1.acquire(Some(Duration::from_secs(0))).unwrap();
        assert!(!acquired);
    }

    #[test]
    fn gentle_revoke_is_observed_by_holder() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let r1 = Lock::read(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "L");
        assert!(r1.acquire(None).unwrap());

        let w1_backend = StdArc::clone(&backend);
        let handle = thread::spawn(move || {
            let w1 = Lock::write(w1_backend, test_logger(), "/ZktoolsLocks", "L");
            let acquired = w1.acquire_with(None, AcquireOptions::gentle()).unwrap();
            assert!(acquired);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(r1.revoked());
        r1.release().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn immediate_revoke_evicts_holder_candidate() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let r1 = Lock::read(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "L");
        assert!(r1.acquire(None).unwrap());

        let w1_backend = StdArc::clone(&backend);
        let handle = thread::spawn(move || {
            let w1 = Lock::write(w1_backend, test_logger(), "/ZktoolsLocks", "L");
            w1.acquire_with(None, AcquireOptions::immediate()).unwrap()
        });

        let acquired = handle.join().unwrap();
        assert!(acquired);
        assert!(r1.revoked());
    }

    #[test]
    fn revoked_flag_is_not_cleared_by_release() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let lock = Lock::exclusive(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "L");
        lock.revoke_all().unwrap();
        assert!(lock.acquire(None).unwrap());
        assert!(lock.revoked());
    }

    #[test]
    fn clear_removes_parent_and_children() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let lock = Lock::exclusive(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "L");
        assert!(lock.acquire(None).unwrap());
        lock.release().unwrap();
        lock.clear().unwrap();
        let children = backend.get_children("/ZktoolsLocks").unwrap();
        assert!(!children.iter().any(|c| c == "L"));
    }
}
