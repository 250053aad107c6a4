//! Lock path layout and candidate node naming (spec §4.1).

/// Name of the persistent revocation flag child of a lock parent.
pub const REVOKED_NODE: &str = "revoked";

/// Data payload that upgrades a revocation request to immediate mode.
pub const IMMEDIATE_PAYLOAD: &[u8] = b"immediate";

/// Zookeeper sequential nodes suffix their name with a 10-digit counter.
const SEQUENCE_DIGITS: usize = 10;

/// The kind of candidate a lock attempt registers, encoded in its node name prefix.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum LockKind {
    /// Exclusive lock candidate (`lock-<seq>`).
    Exclusive,
    /// Write lock candidate (`write-<seq>`).
    Write,
    /// Read lock candidate (`read-<seq>`).
    Read,
}

impl LockKind {
    /// Node name prefix used when creating a candidate of this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            LockKind::Exclusive => "lock-",
            LockKind::Write => "write-",
            LockKind::Read => "read-",
        }
    }

    /// Whether a sibling with this kind's prefix counts as a writer for
    /// blocking-predecessor purposes (exclusive and write candidates both do).
    fn is_writer(self) -> bool {
        matches!(self, LockKind::Exclusive | LockKind::Write)
    }
}

/// Path of the persistent parent znode for a named lock.
pub fn lock_parent_path(lock_root: &str, lock_name: &str) -> String {
    format!("{}/{}", lock_root.trim_end_matches('/'), lock_name)
}

/// Path prefix passed to the sequential-create call for a candidate of `kind`.
pub fn candidate_prefix_path(parent: &str, kind: LockKind) -> String {
    format!("{}/{}", parent, kind.prefix())
}

/// Path of the revocation flag node under a lock parent.
pub fn revoked_path(parent: &str) -> String {
    format!("{}/{}", parent, REVOKED_NODE)
}

/// Extract the candidate's sequence number from the node name zookeeper returned.
///
/// # Panics
/// If `node_name` is shorter than the fixed sequence suffix or the suffix is not
/// all digits; both would indicate a name that did not come from a sequential create.
pub fn sequence_of(node_name: &str) -> u64 {
    let len = node_name.len();
    assert!(
        len >= SEQUENCE_DIGITS,
        "candidate node name '{}' is too short to carry a sequence suffix",
        node_name
    );
    let seq = &node_name[len - SEQUENCE_DIGITS..];
    seq.parse()
        .unwrap_or_else(|_| panic!("candidate node name '{}' has a non-numeric sequence suffix", node_name))
}

/// Whether a candidate node name (bare name, not full path) is a writer per §4.2 step 4.
pub fn is_writer(node_name: &str) -> bool {
    node_name.starts_with(LockKind::Exclusive.prefix()) || node_name.starts_with(LockKind::Write.prefix())
}

/// Compute the blocking predecessor, if any, among `children` (bare node names) for a
/// candidate of `kind` whose own sequence number is `our_seq` (spec §4.2 step 4).
///
/// Returns the bare node name of the blocking predecessor.
pub fn blocking_predecessor(children: &[String], our_seq: u64, kind: LockKind) -> Option<String> {
    let mut best: Option<(u64, &String)> = None;
    for child in children {
        if child == REVOKED_NODE {
            continue;
        }
        let seq = sequence_of(child);
        if seq >= our_seq {
            continue;
        }
        let conflicts = match kind {
            LockKind::Exclusive | LockKind::Write => true,
            LockKind::Read => is_writer(child),
        };
        if !conflicts {
            continue;
        }
        match best {
            Some((best_seq, _)) if best_seq >= seq => (),
            _ => best = Some((seq, child)),
        }
    }
    best.map(|(_, name)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_path_joins_root_and_name() {
        assert_eq!(lock_parent_path("/ZktoolsLocks", "widgets"), "/ZktoolsLocks/widgets");
        assert_eq!(lock_parent_path("/ZktoolsLocks/", "widgets"), "/ZktoolsLocks/widgets");
    }

    #[test]
    fn sequence_parses_trailing_digits() {
        assert_eq!(sequence_of("lock-0000000007"), 7);
        assert_eq!(sequence_of("read-0000000123"), 123);
    }

    #[test]
    fn exclusive_blocks_on_any_lower_sequence() {
        let children = vec![
            "read-0000000001".to_string(),
            "write-0000000002".to_string(),
            "lock-0000000004".to_string(),
        ];
        let pred = blocking_predecessor(&children, 3, LockKind::Exclusive);
        assert_eq!(pred, Some("write-0000000002".to_string()));
    }

    #[test]
    fn read_ignores_lower_readers() {
        let children = vec![
            "read-0000000001".to_string(),
            "read-0000000002".to_string(),
            "write-0000000003".to_string(),
        ];
        let pred = blocking_predecessor(&children, 4, LockKind::Read);
        assert_eq!(pred, Some("write-0000000003".to_string()));
    }

    #[test]
    fn read_with_no_writer_predecessor_is_unblocked() {
        let children = vec!["read-0000000001".to_string(), "read-0000000002".to_string()];
        let pred = blocking_predecessor(&children, 3, LockKind::Read);
        assert_eq!(pred, None);
    }

    #[test]
    fn no_predecessor_when_lowest_sequence() {
        let children = vec!["lock-0000000005".to_string()];
        let pred = blocking_predecessor(&children, 1, LockKind::Exclusive);
        assert_eq!(pred, None);
    }

    #[test]
    fn revoked_flag_never_counts_as_a_predecessor() {
        let children = vec!["revoked".to_string(), "lock-0000000001".to_string()];
        let pred = blocking_predecessor(&children, 5, LockKind::Exclusive);
        assert_eq!(pred, Some("lock-0000000001".to_string()));
    }
}
