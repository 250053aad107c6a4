//! Revocation flag protocol: request, observe and clear (spec §4.2 "Revocation",
//! §9 "Open question — does a cleared revocation flag reset?").

use std::sync::Arc;

use super::path;
use super::Result;
use super::backend::Backend;

/// Strength of a revocation request (spec §9 REDESIGN FLAGS: replaces the
/// original `False`/`True`/`IMMEDIATE` constants with a real enum).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum RevokeMode {
    /// Set the flag; holders notice it on their own schedule and release.
    Gentle,
    /// Set the flag and also delete the candidate nodes of whichever
    /// predecessors are currently blocking new acquires, forcing them to
    /// lose their place immediately rather than wait to be woken.
    Immediate,
}

/// Whether `path`'s lock parent currently carries a revocation flag, and what
/// its payload was (spec §4.2: payload `b"immediate"` selects immediate mode).
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct RevokedState {
    pub revoked: bool,
    pub immediate: bool,
}

impl RevokedState {
    fn clear() -> RevokedState {
        RevokedState { revoked: false, immediate: false }
    }
}

/// Request revocation of the lock rooted at `parent` (a lock parent path as
/// returned by `path::lock_parent_path`). Creates the flag node if absent,
/// otherwise overwrites its payload, so a second, stronger revoke always wins.
///
/// In `RevokeMode::Immediate`, also deletes every currently existing
/// candidate that blocks another existing candidate's acquisition (spec §9
/// "Immediate mode additionally: the requester enumerates the blocking
/// predecessors at the moment of request and deletes their candidate
/// nodes"), repeating until the queue has no more forced evictions left to
/// make. The requester's own (not yet created) candidate is not involved:
/// once it is created after this call returns, it inherits whatever queue
/// position is left.
pub fn request(backend: &dyn Backend, parent: &str, mode: RevokeMode) -> Result<()> {
    let flag_path = path::revoked_path(parent);
    let payload = match mode {
        RevokeMode::Gentle => Vec::new(),
        RevokeMode::Immediate => path::IMMEDIATE_PAYLOAD.to_vec(),
    };
    backend.set_data_create_or_set(&flag_path, payload)?;
    if let RevokeMode::Immediate = mode {
        evict_blocking_predecessors(backend, parent)?;
    }
    Ok(())
}

/// Read the current revocation state of the lock parent. A missing flag node
/// reads as not-revoked; `NO_NODE` from `get_data` is treated the same way by
/// the caller observing it via `watch`.
pub fn read(backend: &dyn Backend, parent: &str) -> Result<RevokedState> {
    let flag_path = path::revoked_path(parent);
    match backend.get_data(&flag_path) {
        Ok(data) => Ok(RevokedState {
            revoked: true,
            immediate: data == path::IMMEDIATE_PAYLOAD,
        }),
        Err(_) => Ok(RevokedState::clear()),
    }
}

/// Delete every candidate node directly blocking another candidate's front of
/// queue, repeatedly, until the queue is free of forced evictions. Used only
/// by `RevokeMode::Immediate`; gentle revocation never deletes candidates.
fn evict_blocking_predecessors(backend: &dyn Backend, parent: &str) -> Result<()> {
    loop {
        let children = backend.get_children(parent)?;
        let mut blockers = std::collections::BTreeSet::new();
        for child in &children {
            if child == path::REVOKED_NODE {
                continue;
            }
            let kind = kind_of(child);
            let seq = path::sequence_of(child);
            if let Some(predecessor) = path::blocking_predecessor(&children, seq, kind) {
                blockers.insert(predecessor);
            }
        }
        if blockers.is_empty() {
            return Ok(());
        }
        for blocker in &blockers {
            backend.delete(&format!("{}/{}", parent, blocker))?;
        }
    }
}

fn kind_of(node_name: &str) -> path::LockKind {
    if node_name.starts_with(path::LockKind::Read.prefix()) {
        path::LockKind::Read
    } else if node_name.starts_with(path::LockKind::Write.prefix()) {
        path::LockKind::Write
    } else {
        path::LockKind::Exclusive
    }
}

/// Install a watch on the revocation flag node and read its current state in
/// one step, so a flag set between the last check and the watch install is
/// never missed (the same atomically-check-then-watch pattern `Backend::watch_exists`
/// gives the candidate predecessor watch).
pub fn watch(backend: &dyn Backend, parent: &str, signal: Arc<super::backend::WakeSignal>) -> Result<RevokedState> {
    let flag_path = path::revoked_path(parent);
    let exists = backend.watch_exists(&flag_path, signal)?;
    if !exists {
        return Ok(RevokedState::clear());
    }
    read(backend, parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeBackend;

    #[test]
    fn unrevoked_parent_reads_clear() {
        let backend = FakeBackend::new();
        backend.ensure_persistent("/locks/widgets").unwrap();
        let state = read(&backend, "/locks/widgets").unwrap();
        assert!(!state.revoked);
    }

    #[test]
    fn gentle_revoke_sets_flag_without_immediate() {
        let backend = FakeBackend::new();
        backend.ensure_persistent("/locks/widgets").unwrap();
        request(&backend, "/locks/widgets", RevokeMode::Gentle).unwrap();
        let state = read(&backend, "/locks/widgets").unwrap();
        assert!(state.revoked);
        assert!(!state.immediate);
    }

    #[test]
    fn immediate_revoke_sets_immediate_flag() {
        let backend = FakeBackend::new();
        backend.ensure_persistent("/locks/widgets").unwrap();
        request(&backend, "/locks/widgets", RevokeMode::Immediate).unwrap();
        let state = read(&backend, "/locks/widgets").unwrap();
        assert!(state.revoked);
        assert!(state.immediate);
    }

    #[test]
    fn immediate_revoke_evicts_blocking_predecessors() {
        let backend = FakeBackend::new();
        backend.ensure_persistent("/locks/widgets").unwrap();
        let first = backend
            .create_sequential("/locks/widgets/lock-", Vec::new())
            .unwrap();
        let second = backend
            .create_sequential("/locks/widgets/lock-", Vec::new())
            .unwrap();
        request(&backend, "/locks/widgets", RevokeMode::Immediate).unwrap();
        let children = backend.get_children("/locks/widgets").unwrap();
        let first_name = first.rsplit('/').next().unwrap();
        let second_name = second.rsplit('/').next().unwrap();
        assert!(!children.iter().any(|c| c == first_name));
        assert!(children.iter().any(|c| c == second_name));
    }

    #[test]
    fn gentle_revoke_does_not_evict_anyone() {
        let backend = FakeBackend::new();
        backend.ensure_persistent("/locks/widgets").unwrap();
        let first = backend
            .create_sequential("/locks/widgets/lock-", Vec::new())
            .unwrap();
        backend
            .create_sequential("/locks/widgets/lock-", Vec::new())
            .unwrap();
        request(&backend, "/locks/widgets", RevokeMode::Gentle).unwrap();
        let children = backend.get_children("/locks/widgets").unwrap();
        let first_name = first.rsplit('/').next().unwrap();
        assert!(children.iter().any(|c| c == first_name));
    }
}
