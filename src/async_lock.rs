//! Non-blocking asynchronous lock API (spec §4.5).
//!
//! `acquire`/`release` only ever send a command over a channel and return;
//! the actual candidate-lifecycle work (which may block on network I/O and
//! watch notifications) runs on a dedicated background worker thread, the
//! same named-thread, channel-signaled-shutdown convention this codebase's
//! zookeeper `Cleaner` background worker uses. State transitions are
//! published to `wait_for_acquire`/`wait_for_release` through a mutex and
//! condition variable, per spec §9 "Thread signaling".

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::bounded;
use crossbeam_channel::Sender;
use failure::ResultExt;
use slog::Logger;

use super::backend::Backend;
use super::candidate;
use super::candidate::AttemptOutcome;
use super::metrics::LOCK_ACQUIRED;
use super::metrics::LOCK_ACQUIRE_TOTAL;
use super::metrics::LOCK_RELEASE_TOTAL;
use super::metrics::LOCK_REVOKED_OBSERVED;
use super::metrics::LOCK_SESSION_RESTARTS;
use super::node_id::NodeId;
use super::path;
use super::path::LockKind;
use super::revoke;
use super::ErrorKind;
use super::Result;

enum Command {
    Acquire,
    Release,
}

struct State {
    candidate_created: bool,
    acquired: bool,
    revoked: bool,
    failed: bool,
}

/// Non-blocking distributed lock (spec §4.5 `ZkAsyncLock`). `acquire` and
/// `release` initiate work and return immediately; `wait_for_acquire` and
/// `wait_for_release` block the caller until the corresponding transition
/// of `acquired` completes.
pub struct AsyncLock {
    state: Arc<Mutex<State>>,
    cv: Arc<Condvar>,
    logger: Logger,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncLock {
    pub fn new(
        backend: Arc<dyn Backend>,
        logger: Logger,
        lock_root: &str,
        lock_name: &str,
        kind: LockKind,
    ) -> Result<AsyncLock> {
        let state = Arc::new(Mutex::new(State {
            candidate_created: false,
            acquired: false,
            revoked: false,
            failed: false,
        }));
        let cv = Arc::new(Condvar::new());
        let (tx, rx) = bounded(0);

        let worker_state = Arc::clone(&state);
        let worker_cv = Arc::clone(&cv);
        let worker_logger = logger.clone();
        let lock_root = lock_root.to_string();
        let lock_name_owned = lock_name.to_string();
        let node_id = NodeId::new();
        let handle = thread::Builder::new()
            .name(format!("zooky:async-lock:{}", lock_name_owned))
            .spawn(move || {
                let mut candidate_path: Option<String> = None;
                for command in rx.iter() {
                    match command {
                        Command::Acquire => {
                            candidate_path = run_acquire(
                                &*backend,
                                &worker_logger,
                                &lock_root,
                                &lock_name_owned,
                                kind,
                                &node_id,
                                &worker_state,
                                &worker_cv,
                            );
                        }
                        Command::Release => {
                            if let Some(path) = candidate_path.take() {
                                if let Err(error) = candidate::release_candidate(&*backend, &path) {
                                    warn!(worker_logger, "Failed to release async lock candidate";
                                        "lock_name" => &lock_name_owned, "error" => %error);
                                }
                            }
                            LOCK_RELEASE_TOTAL.inc();
                            let mut s = worker_state.lock().expect("async lock state poisoned");
                            s.acquired = false;
                            s.candidate_created = false;
                            s.revoked = false;
                            s.failed = false;
                            drop(s);
                            worker_cv.notify_all();
                        }
                    }
                }
            })
            .context(ErrorKind::SpawnThread("async lock worker"))?;

        Ok(AsyncLock {
            state,
            cv,
            logger,
            commands: tx,
            worker: Some(handle),
        })
    }

    pub fn exclusive(backend: Arc<dyn Backend>, logger: Logger, lock_root: &str, lock_name: &str) -> Result<AsyncLock> {
        AsyncLock::new(backend, logger, lock_root, lock_name, LockKind::Exclusive)
    }

    pub fn write(backend: Arc<dyn Backend>, logger: Logger, lock_root: &str, lock_name: &str) -> Result<AsyncLock> {
        AsyncLock::new(backend, logger, lock_root, lock_name, LockKind::Write)
    }

    pub fn read(backend: Arc<dyn Backend>, logger: Logger, lock_root: &str, lock_name: &str) -> Result<AsyncLock> {
        AsyncLock::new(backend, logger, lock_root, lock_name, LockKind::Read)
    }

    /// Initiate acquisition. Returns once the request has been handed to the
    /// background worker, never once the lock is actually held.
    pub fn acquire(&self) -> Result<()> {
        self.commands
            .send(Command::Acquire)
            .with_context(|_| ErrorKind::WorkerGone("async lock worker"))
            .map_err(Into::into)
    }

    /// Initiate release. Returns once the request has been handed to the
    /// background worker, never once the candidate node is actually gone.
    pub fn release(&self) -> Result<()> {
        self.commands
            .send(Command::Release)
            .with_context(|_| ErrorKind::WorkerGone("async lock worker"))
            .map_err(Into::into)
    }

    pub fn acquired(&self) -> bool {
        self.state.lock().expect("async lock state poisoned").acquired
    }

    pub fn candidate_created(&self) -> bool {
        self.state.lock().expect("async lock state poisoned").candidate_created
    }

    pub fn revoked(&self) -> bool {
        self.state.lock().expect("async lock state poisoned").revoked
    }

    /// Block until `acquired` becomes true or the attempt fails. Returns
    /// whether the lock is held. `timeout = None` waits indefinitely.
    pub fn wait_for_acquire(&self, timeout: Option<Duration>) -> bool {
        self.wait_until(timeout, |s| s.acquired || s.failed);
        self.acquired()
    }

    /// Block until `acquired` becomes false.
    pub fn wait_for_release(&self, timeout: Option<Duration>) {
        self.wait_until(timeout, |s| !s.acquired);
    }

    fn wait_until<F: Fn(&State) -> bool>(&self, timeout: Option<Duration>, predicate: F) {
        let mut state = self.state.lock().expect("async lock state poisoned");
        let deadline = timeout.map(|t| Instant::now() + t);
        while !predicate(&state) {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    (deadline - now).min(Duration::from_millis(100))
                }
                None => Duration::from_millis(100),
            };
            let (guard, _) = self.cv.wait_timeout(state, slice).expect("async lock state poisoned");
            state = guard;
        }
    }

    /// Scoped acquisition: `acquire` + `wait_for_acquire` on entry, `release`
    /// + `wait_for_release` on drop (spec §4.5 "Context-manager form").
    pub fn scoped(&self, timeout: Option<Duration>) -> Result<Option<ScopedAsyncLock>> {
        self.acquire()?;
        if self.wait_for_acquire(timeout) {
            Ok(Some(ScopedAsyncLock { lock: self }))
        } else {
            Ok(None)
        }
    }
}

impl Drop for AsyncLock {
    fn drop(&mut self) {
        // Dropping `commands` (done implicitly once this runs, since it is
        // a field of `self`) closes the channel; `rx.iter()` then ends and
        // the worker thread exits on its own.
        if let Some(handle) = self.worker.take() {
            if let Err(_panic) = handle.join() {
                error!(self.logger, "Async lock worker thread panicked");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_acquire(
    backend: &dyn Backend,
    logger: &Logger,
    lock_root: &str,
    lock_name: &str,
    kind: LockKind,
    node_id: &NodeId,
    state: &Arc<Mutex<State>>,
    cv: &Arc<Condvar>,
) -> Option<String> {
    LOCK_ACQUIRE_TOTAL.inc();
    let parent = path::lock_parent_path(lock_root, lock_name);
    let candidate_path = match candidate::create_candidate(backend, lock_root, lock_name, kind, node_id) {
        Ok(path) => path,
        Err(error) => {
            error!(logger, "Failed to create async lock candidate"; "lock_name" => lock_name, "error" => %error);
            let mut s = state.lock().expect("async lock state poisoned");
            s.failed = true;
            drop(s);
            cv.notify_all();
            return None;
        }
    };
    {
        let mut s = state.lock().expect("async lock state poisoned");
        s.candidate_created = true;
    }
    cv.notify_all();

    loop {
        match candidate::run_attempt(backend, &parent, &candidate_path, kind, None) {
            Ok(AttemptOutcome::Acquired) => {
                let revoked = revoke::read(backend, &parent).map(|s| s.revoked).unwrap_or(false);
                let mut s = state.lock().expect("async lock state poisoned");
                s.acquired = true;
                s.revoked = revoked;
                drop(s);
                cv.notify_all();
                if revoked {
                    LOCK_REVOKED_OBSERVED.inc();
                }
                LOCK_ACQUIRED.inc();
                return Some(candidate_path);
            }
            Ok(AttemptOutcome::SessionLost) => {
                LOCK_SESSION_RESTARTS.inc();
                warn!(logger, "Session lost while async-acquiring, failing attempt"; "lock_name" => lock_name);
                let mut s = state.lock().expect("async lock state poisoned");
                s.failed = true;
                s.candidate_created = false;
                drop(s);
                cv.notify_all();
                return None;
            }
            Ok(AttemptOutcome::TimedOut) => unreachable!("async acquire never sets a deadline"),
            Err(error) => {
                error!(logger, "Async lock attempt failed"; "lock_name" => lock_name, "error" => %error);
                let mut s = state.lock().expect("async lock state poisoned");
                s.failed = true;
                drop(s);
                cv.notify_all();
                return None;
            }
        }
    }
}

/// RAII guard releasing its `AsyncLock` when dropped.
pub struct ScopedAsyncLock<'a> {
    lock: &'a AsyncLock,
}

impl<'a> Drop for ScopedAsyncLock<'a> {
    fn drop(&mut self) {
        if let Err(error) = self.lock.release() {
            error!(self.lock.logger, "Failed to release async lock on scope exit"; "error" => %error);
            return;
        }
        self.lock.wait_for_release(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeBackend;
    use slog::Discard;
    use slog::Logger as SlogLogger;
    use std::sync::Arc as StdArc;
    use std::time::Duration;

    fn test_logger() -> Logger {
        SlogLogger::root(Discard, o!())
    }

    #[test]
    fn acquire_and_release_round_trip() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let lock = AsyncLock::exclusive(backend, test_logger(), "/ZktoolsLocks", "A").unwrap();
        lock.acquire().unwrap();
        assert!(lock.wait_for_acquire(Some(Duration::from_secs(5))));
        assert!(lock.acquired());
        lock.release().unwrap();
        lock.wait_for_release(Some(Duration::from_secs(5)));
        assert!(!lock.acquired());
    }

    #[test]
    fn contender_sees_candidate_created_before_acquired() {
        let backend: Arc<dyn Backend> = StdArc::new(FakeBackend::new());
        let holder = AsyncLock::exclusive(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "A").unwrap();
        holder.acquire().unwrap();
        assert!(holder.wait_for_acquire(Some(Duration::from_secs(5))));

        let contender = AsyncLock::exclusive(StdArc::clone(&backend), test_logger(), "/ZktoolsLocks", "A").unwrap();
        contender.acquire().unwrap();
        // Poll until the worker has created the candidate, without yet being acquired.
        let mut waited = Duration::from_millis(0);
        while !contender.candidate_created() && waited < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        assert!(contender.candidate_created());
        assert!(!contender.acquired());

        holder.release().unwrap();
        assert!(contender.wait_for_acquire(Some(Duration::from_secs(5))));
    }
}
