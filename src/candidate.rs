//! Candidate lifecycle shared by the synchronous and asynchronous lock APIs
//! (spec §4.2, state machine table in §4.6).

use std::sync::Arc;
use std::time::Instant;

use failure::ResultExt;

use super::backend::Backend;
use super::backend::Wake;
use super::backend::WakeSignal;
use super::node_id::NodeId;
use super::path;
use super::path::LockKind;
use super::ErrorKind;
use super::Result;

/// Result of running one candidate through its wait loop to completion.
#[derive(Debug, Eq, PartialEq)]
pub enum AttemptOutcome {
    /// No blocking predecessor remains; the caller now holds the lock.
    Acquired,
    /// The requested deadline elapsed before a blocking predecessor cleared.
    TimedOut,
    /// The backend session was lost mid-wait; the candidate node is gone
    /// with it (spec §4.2 "Session loss during wait").
    SessionLost,
}

/// Ensure the lock root and the named lock's parent exist, then create a
/// fresh ephemeral-sequential candidate of `kind` under it (spec §4.1, §4.2
/// steps 1-2). The candidate's data carries `owner` JSON-encoded, purely for
/// debugging and introspection (spec §3 "Lock-instance state", `NodeId` doc
/// comment) — it plays no part in ordering or acquisition decisions. Returns
/// the full path the backend assigned.
pub fn create_candidate(
    backend: &dyn Backend,
    lock_root: &str,
    lock_name: &str,
    kind: LockKind,
    owner: &NodeId,
) -> Result<String> {
    backend.ensure_persistent(lock_root)?;
    let parent = path::lock_parent_path(lock_root, lock_name);
    backend.ensure_persistent(&parent)?;
    let prefix = path::candidate_prefix_path(&parent, kind);
    let data = serde_json::to_vec(owner).context(ErrorKind::Encode("candidate owner"))?;
    backend.create_sequential(&prefix, data)
}

/// Delete a candidate node. `NO_NODE` is success per the backend contract, so
/// this is safe to call even after the session has already dropped it.
pub fn release_candidate(backend: &dyn Backend, candidate_path: &str) -> Result<()> {
    backend.delete(candidate_path)
}

/// Run `candidate_path`'s wait loop (spec §4.2 steps 3-7) until it is
/// acquired, its deadline elapses, or the session is lost. A single
/// `WakeSignal` is shared between the session-loss listener and every
/// predecessor watch installed during the attempt, so whichever fires first
/// wakes the same wait call (spec §9 "Watch dispatch reentrancy").
pub fn run_attempt(
    backend: &dyn Backend,
    parent: &str,
    candidate_path: &str,
    kind: LockKind,
    deadline: Option<Instant>,
) -> Result<AttemptOutcome> {
    let signal = WakeSignal::new();
    let _session_guard = backend.watch_session(Arc::clone(&signal))?;
    let our_name = candidate_name(candidate_path);
    let our_seq = path::sequence_of(our_name);

    loop {
        let children = backend.get_children(parent)?;
        let predecessor = match path::blocking_predecessor(&children, our_seq, kind) {
            None => return Ok(AttemptOutcome::Acquired),
            Some(predecessor) => predecessor,
        };
        let predecessor_path = format!("{}/{}", parent, predecessor);
        let last_seen = signal.generation();
        let still_there = backend.watch_exists(&predecessor_path, Arc::clone(&signal))?;
        if !still_there {
            // Vanished between listing and watch install; re-list (spec §4.2 step 6).
            continue;
        }
        match signal.wait(last_seen, deadline) {
            Wake::Woken => continue,
            Wake::SessionClosed => return Ok(AttemptOutcome::SessionLost),
            Wake::TimedOut => return Ok(AttemptOutcome::TimedOut),
        }
    }
}

fn candidate_name(candidate_path: &str) -> &str {
    candidate_path.rsplit('/').next().unwrap_or(candidate_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeBackend;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lone_candidate_acquires_immediately() {
        let backend = FakeBackend::new();
        let path = create_candidate(&backend, "/locks", "widgets", LockKind::Exclusive, &NodeId::new()).unwrap();
        let parent = super::super::path::lock_parent_path("/locks", "widgets");
        let outcome = run_attempt(&backend, &parent, &path, LockKind::Exclusive, None).unwrap();
        assert_eq!(outcome, AttemptOutcome::Acquired);
    }

    #[test]
    fn second_exclusive_candidate_blocks_until_first_releases() {
        let backend = Arc::new(FakeBackend::new());
        let parent = super::super::path::lock_parent_path("/locks", "widgets");
        let first = create_candidate(&*backend, "/locks", "widgets", LockKind::Exclusive, &NodeId::new()).unwrap();
        let second = create_candidate(&*backend, "/locks", "widgets", LockKind::Exclusive, &NodeId::new()).unwrap();

        let outcome = run_attempt(&*backend, &parent, &first, LockKind::Exclusive, None).unwrap();
        assert_eq!(outcome, AttemptOutcome::Acquired);

        let worker_backend = Arc::clone(&backend);
        let worker_parent = parent.clone();
        let worker_second = second.clone();
        let handle = thread::spawn(move || {
            run_attempt(&*worker_backend, &worker_parent, &worker_second, LockKind::Exclusive, None)
        });

        thread::sleep(Duration::from_millis(20));
        release_candidate(&*backend, &first).unwrap();

        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome, AttemptOutcome::Acquired);
    }

    #[test]
    fn readers_do_not_block_each_other() {
        let backend = FakeBackend::new();
        let parent = super::super::path::lock_parent_path("/locks", "widgets");
        let r1 = create_candidate(&backend, "/locks", "widgets", LockKind::Read, &NodeId::new()).unwrap();
        let r2 = create_candidate(&backend, "/locks", "widgets", LockKind::Read, &NodeId::new()).unwrap();
        assert_eq!(
            run_attempt(&backend, &parent, &r1, LockKind::Read, None).unwrap(),
            AttemptOutcome::Acquired
        );
        assert_eq!(
            run_attempt(&backend, &parent, &r2, LockKind::Read, None).unwrap(),
            AttemptOutcome::Acquired
        );
    }

    #[test]
    fn writer_blocks_behind_existing_readers() {
        let backend = Arc::new(FakeBackend::new());
        let parent = super::super::path::lock_parent_path("/locks", "widgets");
        let r1 = create_candidate(&*backend, "/locks", "widgets", LockKind::Read, &NodeId::new()).unwrap();
        let r2 = create_candidate(&*backend, "/locks", "widgets", LockKind::Read, &NodeId::new()).unwrap();
        let w1 = create_candidate(&*backend, "/locks", "widgets", LockKind::Write, &NodeId::new()).unwrap();
        assert_eq!(
            run_attempt(&*backend, &parent, &r1, LockKind::Read, None).unwrap(),
            AttemptOutcome::Acquired
        );
        assert_eq!(
            run_attempt(&*backend, &parent, &r2, LockKind::Read, None).unwrap(),
            AttemptOutcome::Acquired
        );

        let worker_backend = Arc::clone(&backend);
        let worker_parent = parent.clone();
        let worker_w1 = w1.clone();
        let handle = thread::spawn(move || {
            run_attempt(&*worker_backend, &worker_parent, &worker_w1, LockKind::Write, None)
        });

        thread::sleep(Duration::from_millis(20));
        release_candidate(&*backend, &r1).unwrap();
        release_candidate(&*backend, &r2).unwrap();

        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome, AttemptOutcome::Acquired);
    }

    #[test]
    fn zero_deadline_times_out_when_blocked() {
        let backend = FakeBackend::new();
        let parent = super::super::path::lock_parent_path("/locks", "widgets");
        let first = create_candidate(&backend, "/locks", "widgets", LockKind::Exclusive, &NodeId::new()).unwrap();
        let second = create_candidate(&backend, "/locks", "widgets", LockKind::Exclusive, &NodeId::new()).unwrap();
        run_attempt(&backend, &parent, &first, LockKind::Exclusive, None).unwrap();
        let outcome = run_attempt(
            &backend,
            &parent,
            &second,
            LockKind::Exclusive,
            Some(Instant::now()),
        )
        .unwrap();
        assert_eq!(outcome, AttemptOutcome::TimedOut);
    }

    #[test]
    fn session_loss_while_waiting_is_reported() {
        let backend = Arc::new(FakeBackend::new());
        let parent = super::super::path::lock_parent_path("/locks", "widgets");
        let first = create_candidate(&*backend, "/locks", "widgets", LockKind::Exclusive, &NodeId::new()).unwrap();
        let second = create_candidate(&*backend, "/locks", "widgets", LockKind::Exclusive, &NodeId::new()).unwrap();
        run_attempt(&*backend, &parent, &first, LockKind::Exclusive, None).unwrap();

        let worker_backend = Arc::clone(&backend);
        let worker_parent = parent.clone();
        let worker_second = second.clone();
        let handle = thread::spawn(move || {
            run_attempt(&*worker_backend, &worker_parent, &worker_second, LockKind::Exclusive, None)
        });

        thread::sleep(Duration::from_millis(20));
        backend.close_session();

        let outcome = handle.join().unwrap().unwrap();
        assert_eq!(outcome, AttemptOutcome::SessionLost);
    }
}
