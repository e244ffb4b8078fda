use std::fmt::{self, Debug, Display};

use serde::{Deserialize, Serialize};

/// Identity of a node, unique for the lifetime of the tree that issued it.
/// Ids are handed out by a monotonic counter owned by the tree and are never
/// reused, even after a merge discards the node, so a playback layer can use
/// them as stable animation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A live node in the tree's arena. Children are referenced by id rather
/// than owned directly, so the whole tree stays reachable from the arena
/// while a recursive operation holds on to one node.
#[derive(Debug)]
pub(crate) struct Node<K: Ord + Clone + Debug> {
    pub(crate) id: NodeId,
    pub(crate) keys: Vec<K>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) is_leaf: bool,
}

impl<K: Ord + Clone + Debug> Node<K> {
    pub(crate) fn new(id: NodeId, keys: Vec<K>, is_leaf: bool) -> Self {
        Node {
            id,
            keys,
            children: Vec::new(),
            is_leaf,
        }
    }

    /// Position of the first key >= `key`. With duplicates present this is
    /// the first occurrence, which is the one deletion removes.
    pub(crate) fn lower_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k < key)
    }

    /// Position after the last key <= `key`, i.e. the slot a new copy of
    /// `key` is inserted at.
    pub(crate) fn upper_bound(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }
}
