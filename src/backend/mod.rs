use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use super::Result;

pub mod zookeeper;

/// The coordination-service seam the candidate lifecycle (`engine.rs`) is written
/// against, so the same state machine runs unmodified over a real ensemble
/// (`zookeeper::ZookeeperBackend`) or an in-process mock (`mock::FakeBackend`).
pub trait Backend: Send + Sync {
    /// Ensure `path` exists as a persistent, empty node. `NODE_EXISTS` is success.
    fn ensure_persistent(&self, path: &str) -> Result<()>;

    /// Create an ephemeral-sequential child of `parent_prefix` (already including
    /// the trailing `lock-`/`write-`/`read-` prefix) holding `data`. Returns the
    /// full path zookeeper assigned, sequence suffix included.
    fn create_sequential(&self, parent_prefix: &str, data: Vec<u8>) -> Result<String>;

    /// Delete `path`. `NO_NODE` is treated as success.
    fn delete(&self, path: &str) -> Result<()>;

    /// List the bare (non-full-path) names of `parent`'s children.
    fn get_children(&self, parent: &str) -> Result<Vec<String>>;

    /// Read the data stored at `path`.
    fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// Create `path` with `data` if absent, otherwise overwrite its data
    /// (the create-or-set idempotent pattern used for the revocation flag).
    fn set_data_create_or_set(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// Atomically check whether `path` exists and install a one-shot watch
    /// that wakes `signal` the next time `path` is created or deleted.
    fn watch_exists(&self, path: &str, signal: Arc<WakeSignal>) -> Result<bool>;

    /// Subscribe `signal` to this backend's session-loss notifications.
    /// The returned guard unsubscribes on drop. A real ensemble connection
    /// marks the signal closed when its `ZkState::Closed` event fires; the
    /// mock backend used in tests has no session concept and never fires it.
    fn watch_session(&self, signal: Arc<WakeSignal>) -> Result<Box<dyn Send>>;
}

/// One-producer/many-waiter broadcast primitive used to publish watch-callback
/// wakeups to threads parked in the candidate lifecycle's wait step (spec §9
/// "Thread signaling"). A single `WakeSignal` is shared between exactly one
/// waiting attempt and the watch(es) registered on its behalf.
pub struct WakeSignal {
    state: Mutex<WakeState>,
    cv: Condvar,
}

struct WakeState {
    generation: u64,
    session_closed: bool,
}

/// Outcome of waiting on a `WakeSignal`.
#[derive(Debug, Eq, PartialEq)]
pub enum Wake {
    /// A watch fired (or a spurious wake occurred); the generation advanced.
    Woken,
    /// The backend session was closed while waiting.
    SessionClosed,
    /// The requested deadline elapsed with no wakeup.
    TimedOut,
}

/// Upper bound on a single wait slice, guaranteeing the bounded wake-up
/// latency spec §9's "Open question — timeout granularity" resolves to.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

impl WakeSignal {
    pub fn new() -> Arc<WakeSignal> {
        Arc::new(WakeSignal {
            state: Mutex::new(WakeState {
                generation: 0,
                session_closed: false,
            }),
            cv: Condvar::new(),
        })
    }

    /// Current generation, to be passed back into `wait`.
    pub fn generation(&self) -> u64 {
        self.state.lock().expect("WakeSignal state poisoned").generation
    }

    /// Record a watch firing (or any other reason to re-check state) and wake waiters.
    pub fn wake(&self) {
        let mut state = self.state.lock().expect("WakeSignal state poisoned");
        state.generation += 1;
        self.cv.notify_all();
    }

    /// Record that the backend session closed and wake waiters.
    pub fn mark_session_closed(&self) {
        let mut state = self.state.lock().expect("WakeSignal state poisoned");
        state.session_closed = true;
        state.generation += 1;
        self.cv.notify_all();
    }

    /// Block until the generation advances past `last_seen`, the session is
    /// marked closed, or `deadline` elapses. Wakes up at least every
    /// `MAX_WAIT_SLICE` to re-check regardless of spurious wake storms.
    pub fn wait(&self, last_seen: u64, deadline: Option<Instant>) -> Wake {
        let mut state = self.state.lock().expect("WakeSignal state poisoned");
        loop {
            if state.session_closed {
                return Wake::SessionClosed;
            }
            if state.generation != last_seen {
                return Wake::Woken;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wake::TimedOut;
                    }
                    (deadline - now).min(MAX_WAIT_SLICE)
                }
                None => MAX_WAIT_SLICE,
            };
            let (guard, _) = self
                .cv
                .wait_timeout(state, slice)
                .expect("WakeSignal state poisoned");
            state = guard;
        }
    }
}
