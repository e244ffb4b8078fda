use std::fmt::Debug;

use crate::trace::{Action, Recorder, Step};

use super::{BTree, NodeId};

impl<K: Ord + Clone + Debug> BTree<K> {
    /// Removes one occurrence of `key` (the first met on the search path).
    /// An absent key is not an error; the trace ends with a "not found"
    /// step. When the root ends up keyless with a single child, that child
    /// is promoted and the tree shrinks by one level.
    pub fn delete(&mut self, key: &K) -> Vec<Step<K>> {
        let mut rec = Recorder::new();
        rec.record(
            self.snapshot(),
            Action::Delete,
            Vec::new(),
            format!("Starting deletion of {key:?}"),
        );

        let removed = self.remove_from(self.root, key, &mut rec);

        let root = self.root;
        if self.node(root).keys.is_empty() && !self.node(root).is_leaf {
            let child = self.node(root).children[0];
            self.nodes.remove(&root);
            self.root = child;
            rec.record(
                self.snapshot(),
                Action::Merge,
                vec![child],
                "Root is empty; promoting its only child".to_string(),
            );
        }

        if removed {
            rec.record(
                self.snapshot(),
                Action::Delete,
                Vec::new(),
                format!("Finished deleting {key:?}"),
            );
        }
        rec.into_steps()
    }

    fn remove_from(&mut self, id: NodeId, key: &K, rec: &mut Recorder<K>) -> bool {
        rec.record(
            self.snapshot(),
            Action::Traverse,
            vec![id],
            format!("Processing node {:?}", self.node(id).keys),
        );

        let idx = self.node(id).lower_bound(key);
        let (found, is_leaf) = {
            let node = self.node(id);
            (
                idx < node.keys.len() && node.keys[idx] == *key,
                node.is_leaf,
            )
        };

        if found && is_leaf {
            self.node_mut(id).keys.remove(idx);
            rec.record(
                self.snapshot(),
                Action::Delete,
                vec![id],
                format!("Deleted {key:?} from leaf"),
            );
            true
        } else if found {
            self.remove_from_internal(id, idx, key, rec)
        } else if is_leaf {
            rec.record(
                self.snapshot(),
                Action::Delete,
                vec![id],
                format!("{key:?} not found in the tree"),
            );
            false
        } else {
            let idx = self.ensure_child_filled(id, idx, rec);
            let child = self.node(id).children[idx];
            self.remove_from(child, key, rec)
        }
    }

    /// The key sits at `keys[idx]` of an internal node. It is replaced by
    /// its predecessor or successor when the matching child can spare a
    /// key; otherwise both adjacent children are merged around it and the
    /// deletion recurses into the merged node.
    fn remove_from_internal(
        &mut self,
        id: NodeId,
        idx: usize,
        key: &K,
        rec: &mut Recorder<K>,
    ) -> bool {
        let left = self.node(id).children[idx];
        let right = self.node(id).children[idx + 1];
        let t = self.order;

        if self.node(left).keys.len() >= t {
            let pred = self.subtree_max(left);
            self.node_mut(id).keys[idx] = pred.clone();
            rec.record(
                self.snapshot(),
                Action::Delete,
                vec![id, left],
                format!("Replaced {key:?} with predecessor {pred:?}"),
            );
            self.remove_from(left, &pred, rec);
            true
        } else if self.node(right).keys.len() >= t {
            let succ = self.subtree_min(right);
            self.node_mut(id).keys[idx] = succ.clone();
            rec.record(
                self.snapshot(),
                Action::Delete,
                vec![id, right],
                format!("Replaced {key:?} with successor {succ:?}"),
            );
            self.remove_from(right, &succ, rec);
            true
        } else {
            // Both children are at the floor; fold them and the key into
            // one node, then delete the key from it.
            self.merge_children(id, idx, rec);
            self.remove_from(left, key, rec)
        }
    }

    /// Guarantees `children[idx]` holds at least `t` keys before descent,
    /// borrowing from a sibling with surplus (left first) or merging when
    /// neither has any. Returns the child position to descend into, which
    /// moves down by one after a merge with the left sibling.
    fn ensure_child_filled(&mut self, id: NodeId, idx: usize, rec: &mut Recorder<K>) -> usize {
        let t = self.order;
        let child = self.node(id).children[idx];
        if self.node(child).keys.len() >= t {
            return idx;
        }

        let child_count = self.node(id).children.len();
        if idx > 0 && self.node(self.node(id).children[idx - 1]).keys.len() >= t {
            self.borrow_from_left(id, idx, rec);
            idx
        } else if idx + 1 < child_count
            && self.node(self.node(id).children[idx + 1]).keys.len() >= t
        {
            self.borrow_from_right(id, idx, rec);
            idx
        } else if idx + 1 < child_count {
            self.merge_children(id, idx, rec);
            idx
        } else {
            self.merge_children(id, idx - 1, rec);
            idx - 1
        }
    }

    /// Rotation through the parent: the left sibling's last key replaces
    /// the separator, which drops into the undersized child (with the
    /// sibling's last subtree when the children are internal).
    fn borrow_from_left(&mut self, parent: NodeId, idx: usize, rec: &mut Recorder<K>) {
        let left = self.node(parent).children[idx - 1];
        let child = self.node(parent).children[idx];
        let separator = self.node(parent).keys[idx - 1].clone();

        let (stolen_key, stolen_child) = {
            let node = self.node_mut(left);
            let stolen_key = node.keys.pop().unwrap();
            let stolen_child = if node.is_leaf {
                None
            } else {
                Some(node.children.pop().unwrap())
            };
            (stolen_key, stolen_child)
        };
        {
            let node = self.node_mut(child);
            node.keys.insert(0, separator);
            if let Some(grandchild) = stolen_child {
                node.children.insert(0, grandchild);
            }
        }
        self.node_mut(parent).keys[idx - 1] = stolen_key.clone();

        rec.record(
            self.snapshot(),
            Action::Merge,
            vec![parent, left, child],
            format!("Borrowed {stolen_key:?} from the left sibling"),
        );
    }

    fn borrow_from_right(&mut self, parent: NodeId, idx: usize, rec: &mut Recorder<K>) {
        let child = self.node(parent).children[idx];
        let right = self.node(parent).children[idx + 1];
        let separator = self.node(parent).keys[idx].clone();

        let (stolen_key, stolen_child) = {
            let node = self.node_mut(right);
            let stolen_key = node.keys.remove(0);
            let stolen_child = if node.is_leaf {
                None
            } else {
                Some(node.children.remove(0))
            };
            (stolen_key, stolen_child)
        };
        {
            let node = self.node_mut(child);
            node.keys.push(separator);
            if let Some(grandchild) = stolen_child {
                node.children.push(grandchild);
            }
        }
        self.node_mut(parent).keys[idx] = stolen_key.clone();

        rec.record(
            self.snapshot(),
            Action::Merge,
            vec![parent, child, right],
            format!("Borrowed {stolen_key:?} from the right sibling"),
        );
    }

    /// Folds `children[idx + 1]` and the separator at `keys[idx]` into
    /// `children[idx]`. Both children must be at the `t-1` floor, so the
    /// merged node holds exactly `2t-1` keys. The right node's id is
    /// retired; the merge step still names it.
    fn merge_children(&mut self, parent: NodeId, idx: usize, rec: &mut Recorder<K>) {
        let left = self.node(parent).children[idx];
        let separator = self.node_mut(parent).keys.remove(idx);
        let right_id = self.node_mut(parent).children.remove(idx + 1);
        let mut right = self.nodes.remove(&right_id).unwrap();
        assert_eq!(self.node(left).keys.len(), self.order - 1);
        assert_eq!(right.keys.len(), self.order - 1);

        let message = format!("Merged children around separator {separator:?}");
        {
            let node = self.node_mut(left);
            node.keys.push(separator);
            node.keys.append(&mut right.keys);
            node.children.append(&mut right.children);
        }

        rec.record(
            self.snapshot(),
            Action::Merge,
            vec![parent, left, right_id],
            message,
        );
    }

    fn subtree_max(&self, mut id: NodeId) -> K {
        loop {
            let node = self.node(id);
            if node.is_leaf {
                return node.keys.last().unwrap().clone();
            }
            id = *node.children.last().unwrap();
        }
    }

    fn subtree_min(&self, mut id: NodeId) -> K {
        loop {
            let node = self.node(id);
            if node.is_leaf {
                return node.keys.first().unwrap().clone();
            }
            id = node.children[0];
        }
    }
}
