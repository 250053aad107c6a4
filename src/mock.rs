//! In-process `Backend` implementation used by this crate's own test suite
//! (spec §8 "Test tooling (ambient)"): no network, no real zookeeper session,
//! just enough znode/watch bookkeeping to exercise the candidate lifecycle,
//! revocation protocol and lock APIs against the `Backend` trait seam.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use super::backend::Backend;
use super::backend::WakeSignal;
use super::ErrorKind;
use super::Result;

struct Inner {
    nodes: BTreeMap<String, Vec<u8>>,
    sequence_counters: HashMap<String, u64>,
    exists_watches: HashMap<String, Vec<Arc<WakeSignal>>>,
    session_watches: HashMap<u64, Arc<WakeSignal>>,
    next_watch_id: u64,
}

/// An in-process stand-in for a zookeeper ensemble, backing `Backend` with a
/// plain `BTreeMap`. Sequence numbers are tracked per parent directory, not
/// per candidate-kind prefix, matching real zookeeper's single counter per
/// parent znode (so `lock-`, `write-` and `read-` siblings interleave in
/// creation order exactly as they would against a live ensemble).
pub struct FakeBackend {
    inner: Arc<Mutex<Inner>>,
}

impl FakeBackend {
    pub fn new() -> FakeBackend {
        FakeBackend {
            inner: Arc::new(Mutex::new(Inner {
                nodes: BTreeMap::new(),
                sequence_counters: HashMap::new(),
                exists_watches: HashMap::new(),
                session_watches: HashMap::new(),
                next_watch_id: 0,
            })),
        }
    }

    /// Simulate the coordination-service session being lost: every registered
    /// session watch fires `SessionClosed`, matching a real ensemble's
    /// `ZkState::Closed` listener callback (spec §8 `test_candidate_release`,
    /// `testLockRevoked`'s restart-on-session-loss scenarios).
    pub fn close_session(&self) {
        let inner = self.inner.lock().expect("FakeBackend state poisoned");
        for signal in inner.session_watches.values() {
            signal.mark_session_closed();
        }
    }

    fn directory_of(parent_prefix: &str) -> String {
        match parent_prefix.rfind('/') {
            Some(idx) => parent_prefix[..idx].to_string(),
            None => String::new(),
        }
    }

    fn fire_exists_watches(inner: &mut Inner, path: &str) {
        if let Some(watchers) = inner.exists_watches.remove(path) {
            for signal in watchers {
                signal.wake();
            }
        }
    }
}

impl Default for FakeBackend {
    fn default() -> FakeBackend {
        FakeBackend::new()
    }
}

impl Backend for FakeBackend {
    fn ensure_persistent(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("FakeBackend state poisoned");
        inner.nodes.entry(path.to_string()).or_insert_with(Vec::new);
        Ok(())
    }

    fn create_sequential(&self, parent_prefix: &str, data: Vec<u8>) -> Result<String> {
        let mut inner = self.inner.lock().expect("FakeBackend state poisoned");
        let directory = FakeBackend::directory_of(parent_prefix);
        let counter = inner.sequence_counters.entry(directory).or_insert(0);
        let sequence = *counter;
        *counter += 1;
        let full_path = format!("{}{:010}", parent_prefix, sequence);
        inner.nodes.insert(full_path.clone(), data);
        Ok(full_path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("FakeBackend state poisoned");
        inner.nodes.remove(path);
        FakeBackend::fire_exists_watches(&mut inner, path);
        Ok(())
    }

    fn get_children(&self, parent: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().expect("FakeBackend state poisoned");
        let prefix = format!("{}/", parent.trim_end_matches('/'));
        let mut children = Vec::new();
        for path in inner.nodes.keys() {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if !rest.is_empty() && !rest.contains('/') {
                    children.push(rest.to_string());
                }
            }
        }
        Ok(children)
    }

    fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let inner = self.inner.lock().expect("FakeBackend state poisoned");
        inner
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| ErrorKind::Backend("node does not exist").into())
    }

    fn set_data_create_or_set(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock().expect("FakeBackend state poisoned");
        let existed = inner.nodes.contains_key(path);
        inner.nodes.insert(path.to_string(), data);
        if !existed {
            FakeBackend::fire_exists_watches(&mut inner, path);
        }
        Ok(())
    }

    fn watch_exists(&self, path: &str, signal: Arc<WakeSignal>) -> Result<bool> {
        let mut inner = self.inner.lock().expect("FakeBackend state poisoned");
        let exists = inner.nodes.contains_key(path);
        inner
            .exists_watches
            .entry(path.to_string())
            .or_insert_with(Vec::new)
            .push(signal);
        Ok(exists)
    }

    fn watch_session(&self, signal: Arc<WakeSignal>) -> Result<Box<dyn Send>> {
        let mut inner = self.inner.lock().expect("FakeBackend state poisoned");
        let id = inner.next_watch_id;
        inner.next_watch_id += 1;
        inner.session_watches.insert(id, signal);
        Ok(Box::new(SessionWatchGuard {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct SessionWatchGuard {
    id: u64,
    inner: Arc<Mutex<Inner>>,
}

impl Drop for SessionWatchGuard {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().expect("FakeBackend state poisoned");
        inner.session_watches.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_persistent_is_idempotent() {
        let backend = FakeBackend::new();
        backend.ensure_persistent("/locks/widgets").unwrap();
        backend.ensure_persistent("/locks/widgets").unwrap();
        assert_eq!(backend.get_children("/locks").unwrap(), vec!["widgets".to_string()]);
    }

    #[test]
    fn sequential_children_share_one_counter_across_kinds() {
        let backend = FakeBackend::new();
        backend.ensure_persistent("/locks/widgets").unwrap();
        let a = backend.create_sequential("/locks/widgets/lock-", Vec::new()).unwrap();
        let b = backend.create_sequential("/locks/widgets/read-", Vec::new()).unwrap();
        assert!(a.ends_with("0000000000"));
        assert!(b.ends_with("0000000001"));
    }

    #[test]
    fn get_data_on_missing_node_errors() {
        let backend = FakeBackend::new();
        assert!(backend.get_data("/locks/widgets/missing").is_err());
    }

    #[test]
    fn watch_exists_fires_on_create() {
        let backend = FakeBackend::new();
        let signal = WakeSignal::new();
        let gen = signal.generation();
        let existed = backend.watch_exists("/locks/widgets/revoked", Arc::clone(&signal)).unwrap();
        assert!(!existed);
        backend.set_data_create_or_set("/locks/widgets/revoked", Vec::new()).unwrap();
        assert_ne!(signal.generation(), gen);
    }

    #[test]
    fn watch_exists_fires_on_delete() {
        let backend = FakeBackend::new();
        backend.set_data_create_or_set("/locks/widgets/revoked", Vec::new()).unwrap();
        let signal = WakeSignal::new();
        let gen = signal.generation();
        let existed = backend.watch_exists("/locks/widgets/revoked", Arc::clone(&signal)).unwrap();
        assert!(existed);
        backend.delete("/locks/widgets/revoked").unwrap();
        assert_ne!(signal.generation(), gen);
    }

    #[test]
    fn session_close_wakes_registered_watches() {
        use super::super::backend::Wake;
        let backend = FakeBackend::new();
        let signal = WakeSignal::new();
        let _guard = backend.watch_session(Arc::clone(&signal)).unwrap();
        backend.close_session();
        assert_eq!(signal.wait(signal.generation(), None), Wake::SessionClosed);
    }
}
