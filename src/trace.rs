use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::tree::NodeId;

/// What kind of work a step documents. `Traverse` marks descent decisions,
/// the rest mark mutations (or, for `Search`, the verdict of a lookup).
/// Borrowing a key through the parent is tagged `Merge`; it is the same
/// rebalancing family and the action set is part of the playback contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Delete,
    Search,
    Split,
    Merge,
    Traverse,
}

/// A deep, self-contained copy of one node and its subtree, detached from
/// the live arena. Later mutation of the tree never changes a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotNode<K> {
    pub id: NodeId,
    pub keys: Vec<K>,
    pub children: Vec<SnapshotNode<K>>,
    pub is_leaf: bool,
}

impl<K> SnapshotNode<K> {
    /// Looks up a node in the snapshot by id.
    pub fn find(&self, id: NodeId) -> Option<&SnapshotNode<K>> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Depth of the deepest leaf below this node.
    pub fn height(&self) -> usize {
        self.children.iter().map(|c| c.height() + 1).max().unwrap_or(0)
    }
}

/// One replay unit: the full tree as it looked at that instant, plus
/// metadata for the playback layer. `highlight` is empty when no node is
/// singled out; a merge step may highlight a retired id that no longer
/// appears in `tree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step<K> {
    pub tree: SnapshotNode<K>,
    pub action: Action,
    pub highlight: Vec<NodeId>,
    pub message: String,
}

/// Collects the steps of one engine operation, in execution order. Created
/// empty at the start of a call and handed back whole; steps are never
/// mutated after being recorded.
pub(crate) struct Recorder<K> {
    steps: Vec<Step<K>>,
}

impl<K: Clone + Debug> Recorder<K> {
    pub(crate) fn new() -> Self {
        Recorder { steps: Vec::new() }
    }

    pub(crate) fn record(
        &mut self,
        tree: SnapshotNode<K>,
        action: Action,
        highlight: Vec<NodeId>,
        message: String,
    ) {
        self.steps.push(Step {
            tree,
            action,
            highlight,
            message,
        });
    }

    pub(crate) fn into_steps(self) -> Vec<Step<K>> {
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::BTree;

    #[test]
    fn steps_are_independent_of_later_mutation() {
        let mut tree: BTree<i64> = BTree::new(2).unwrap();
        for key in [10, 20, 30] {
            tree.insert(key);
        }
        let steps = tree.insert(5);
        let frozen = steps.clone();

        tree.insert(40);
        tree.delete(&10);

        assert_eq!(steps, frozen);
    }

    #[test]
    fn find_locates_nested_nodes() {
        let mut tree: BTree<i64> = BTree::new(2).unwrap();
        for key in [10, 20, 30, 5] {
            tree.insert(key);
        }
        let steps = tree.search(&30);
        let last = steps.last().unwrap();
        for id in &last.highlight {
            assert!(last.tree.find(*id).is_some());
        }
        assert_eq!(last.tree.height(), 1);
    }

    #[test]
    fn height_of_single_leaf_is_zero() {
        let tree: BTree<i64> = BTree::new(2).unwrap();
        let steps = tree.search(&1);
        assert_eq!(steps[0].tree.height(), 0);
    }
}
