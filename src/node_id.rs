use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

/// Identity of a lock candidate's owner, attached to candidate payloads and
/// revocation bookkeeping so that holders and waiters can be told apart in logs.
///
/// Node IDs are primarily used for debugging and introspection purposes. They
/// are not used by the protocol itself to make acquisition decisions.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId {
    extra: BTreeMap<String, String>,
    id: Uuid,
}

impl NodeId {
    pub fn new() -> NodeId {
        NodeId {
            extra: BTreeMap::new(),
            id: Uuid::new_v4(),
        }
    }

    /// Set the extra attributes attached to this node ID.
    pub fn extra(&mut self, extra: BTreeMap<String, String>) {
        self.extra = extra;
    }
}

impl Default for NodeId {
    fn default() -> NodeId {
        NodeId::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.id.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::NodeId;

    #[test]
    fn distinct_ids() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_matches_uuid() {
        let id = NodeId::new();
        assert_eq!(format!("{}", id), id.id.to_string());
    }
}
