use std::{collections::HashMap, fmt::Debug};

use crate::trace::{Action, Recorder, SnapshotNode, Step};

mod delete;
mod node;

pub use node::NodeId;
pub(crate) use node::Node;

#[derive(Debug, PartialEq, Eq)]
pub enum TreeError {
    /// The minimum degree was below 2, which the rebalancing algorithms
    /// cannot support (a non-root node would be allowed zero keys).
    InvalidOrder(usize),
}

type Result<T> = std::result::Result<T, TreeError>;

/// A B-tree of minimum degree `order` whose public operations each return
/// the full ordered trace of intermediate states they passed through.
///
/// Nodes live in an arena keyed by [`NodeId`] so the engine can snapshot the
/// entire tree between mutations of a node deep inside a recursive call.
/// The id counter is owned by the tree and only ever counts up; ids of
/// merged-away nodes are retired, never reissued.
#[derive(Debug)]
pub struct BTree<K: Ord + Clone + Debug> {
    nodes: HashMap<NodeId, Node<K>>,
    root: NodeId,
    order: usize,
    next_id: u64,
}

impl<K: Ord + Clone + Debug> BTree<K> {
    /// Creates an empty tree: a single leaf root with no keys.
    pub fn new(order: usize) -> Result<Self> {
        if order < 2 {
            return Err(TreeError::InvalidOrder(order));
        }
        let mut tree = BTree {
            nodes: HashMap::new(),
            root: NodeId(0),
            order,
            next_id: 0,
        };
        tree.root = tree.alloc(Vec::new(), true);
        Ok(tree)
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        let root = self.node(self.root);
        root.is_leaf && root.keys.is_empty()
    }

    /// All keys in ascending order. Duplicates appear as many times as they
    /// were inserted.
    pub fn keys_in_order(&self) -> Vec<K> {
        let mut out = Vec::new();
        self.collect_keys(self.root, &mut out);
        out
    }

    /// Trace-free lookup.
    pub fn contains(&self, key: &K) -> bool {
        let mut id = self.root;
        loop {
            let node = self.node(id);
            let idx = node.lower_bound(key);
            if idx < node.keys.len() && node.keys[idx] == *key {
                return true;
            }
            if node.is_leaf {
                return false;
            }
            id = node.children[idx];
        }
    }

    /// Inserts `key`, splitting full nodes on the way down so the leaf that
    /// finally receives the key always has room. Duplicates are accepted;
    /// a key equal to a freshly promoted median descends into the lower
    /// half (the re-descent test is strictly-greater). The trace's step
    /// count depends on that tie-break, so it must not change.
    pub fn insert(&mut self, key: K) -> Vec<Step<K>> {
        let mut rec = Recorder::new();
        rec.record(
            self.snapshot(),
            Action::Insert,
            Vec::new(),
            format!("Starting insertion of {key:?}"),
        );

        let root = self.root;
        if self.node(root).is_leaf && self.node(root).keys.is_empty() {
            self.node_mut(root).keys.push(key.clone());
            rec.record(
                self.snapshot(),
                Action::Insert,
                vec![root],
                format!("Inserted {key:?} into the empty root"),
            );
            rec.record(
                self.snapshot(),
                Action::Insert,
                Vec::new(),
                format!("Finished inserting {key:?}"),
            );
            return rec.into_steps();
        }

        if self.node(self.root).keys.len() == self.max_keys() {
            self.split_root(&mut rec);
        }
        self.insert_non_full(self.root, key.clone(), &mut rec);

        rec.record(
            self.snapshot(),
            Action::Insert,
            Vec::new(),
            format!("Finished inserting {key:?}"),
        );
        rec.into_steps()
    }

    /// Documents the single-path descent to `key` without mutating the
    /// tree. The last step's message says whether the key was found.
    pub fn search(&self, key: &K) -> Vec<Step<K>> {
        let mut rec = Recorder::new();
        rec.record(
            self.snapshot(),
            Action::Search,
            Vec::new(),
            format!("Searching for {key:?}"),
        );

        let mut id = self.root;
        loop {
            let node = self.node(id);
            rec.record(
                self.snapshot(),
                Action::Traverse,
                vec![id],
                format!("Processing node {:?}", node.keys),
            );
            let idx = node.lower_bound(key);
            if idx < node.keys.len() && node.keys[idx] == *key {
                rec.record(
                    self.snapshot(),
                    Action::Search,
                    vec![id],
                    format!("Found {key:?} in node {:?}", node.keys),
                );
                break;
            }
            if node.is_leaf {
                rec.record(
                    self.snapshot(),
                    Action::Search,
                    vec![id],
                    format!("{key:?} not found in the tree"),
                );
                break;
            }
            id = node.children[idx];
        }
        rec.into_steps()
    }

    fn insert_non_full(&mut self, id: NodeId, key: K, rec: &mut Recorder<K>) {
        rec.record(
            self.snapshot(),
            Action::Traverse,
            vec![id],
            format!("Processing node {:?}", self.node(id).keys),
        );

        if self.node(id).is_leaf {
            let pos = self.node(id).upper_bound(&key);
            self.node_mut(id).keys.insert(pos, key.clone());
            rec.record(
                self.snapshot(),
                Action::Insert,
                vec![id],
                format!("Inserted {key:?} into leaf"),
            );
            return;
        }

        let mut idx = self.node(id).upper_bound(&key);
        let child = self.node(id).children[idx];
        rec.record(
            self.snapshot(),
            Action::Traverse,
            vec![id, child],
            format!("Moving to child {idx} (keys: {:?})", self.node(child).keys),
        );

        if self.node(child).keys.len() == self.max_keys() {
            self.split_child(id, idx, child, rec);
            // A key equal to the promoted median stays in the lower half.
            if key > self.node(id).keys[idx] {
                idx += 1;
            }
        }
        let next = self.node(id).children[idx];
        self.insert_non_full(next, key, rec);
    }

    /// The root cannot be split in place by its (nonexistent) parent, so a
    /// full root gets a fresh empty parent first and is then split as that
    /// parent's only child. Every other node is split before descent, while
    /// its parent still has room for the median.
    fn split_root(&mut self, rec: &mut Recorder<K>) {
        let old_root = self.root;
        let new_root = self.alloc(Vec::new(), false);
        self.node_mut(new_root).children.push(old_root);
        self.root = new_root;
        rec.record(
            self.snapshot(),
            Action::Split,
            vec![old_root],
            "Splitting full root node".to_string(),
        );
        self.split_child(new_root, 0, old_root, rec);
    }

    /// Splits `child` (which must hold `2t-1` keys) into two `t-1`-key
    /// nodes, promoting the median into `parent` at `index`. The new
    /// sibling takes the upper keys and, for internal nodes, the upper
    /// children, and is linked in right after `child`.
    fn split_child(&mut self, parent: NodeId, index: usize, child: NodeId, rec: &mut Recorder<K>) {
        let t = self.order;
        assert_eq!(self.node(child).keys.len(), self.max_keys());

        let (upper_keys, upper_children, median, child_is_leaf) = {
            let node = self.node_mut(child);
            let upper_keys = node.keys.split_off(t);
            let upper_children = if node.is_leaf {
                Vec::new()
            } else {
                node.children.split_off(t)
            };
            let median = node.keys.pop().unwrap();
            (upper_keys, upper_children, median, node.is_leaf)
        };

        let sibling = self.alloc(upper_keys, child_is_leaf);
        self.node_mut(sibling).children = upper_children;

        let parent_node = self.node_mut(parent);
        parent_node.children.insert(index + 1, sibling);
        parent_node.keys.insert(index, median.clone());

        rec.record(
            self.snapshot(),
            Action::Split,
            vec![parent, child, sibling],
            format!("Split child node at position {index} with median {median:?}"),
        );
    }

    pub(crate) fn max_keys(&self) -> usize {
        2 * self.order - 1
    }

    fn alloc(&mut self, keys: Vec<K>, is_leaf: bool) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, Node::new(id, keys, is_leaf));
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node<K> {
        &self.nodes[&id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<K> {
        self.nodes.get_mut(&id).unwrap()
    }

    pub(crate) fn snapshot(&self) -> SnapshotNode<K> {
        self.snapshot_from(self.root)
    }

    fn snapshot_from(&self, id: NodeId) -> SnapshotNode<K> {
        let node = self.node(id);
        SnapshotNode {
            id,
            keys: node.keys.clone(),
            children: node
                .children
                .iter()
                .map(|child| self.snapshot_from(*child))
                .collect(),
            is_leaf: node.is_leaf,
        }
    }

    fn collect_keys(&self, id: NodeId, out: &mut Vec<K>) {
        let node = self.node(id);
        if node.is_leaf {
            out.extend(node.keys.iter().cloned());
            return;
        }
        for (i, key) in node.keys.iter().enumerate() {
            self.collect_keys(node.children[i], out);
            out.push(key.clone());
        }
        self.collect_keys(*node.children.last().unwrap(), out);
    }
}

#[cfg(test)]
impl<K: Ord + Clone + Debug> BTree<K> {
    /// Asserts every at-rest structural invariant. Only meaningful between
    /// top-level operations, not mid-recursion.
    pub(crate) fn check_invariants(&self) {
        self.check_node(self.root, None, None, true);
        let mut depths = Vec::new();
        self.leaf_depths(self.root, 0, &mut depths);
        assert!(
            depths.windows(2).all(|w| w[0] == w[1]),
            "leaves at unequal depths: {depths:?}"
        );
    }

    fn check_node(&self, id: NodeId, min: Option<&K>, max: Option<&K>, is_root: bool) {
        let node = self.node(id);
        assert!(node.keys.len() <= self.max_keys());
        if !is_root {
            assert!(node.keys.len() >= self.order - 1);
        }
        assert!(node.keys.windows(2).all(|w| w[0] <= w[1]));
        if let Some(min) = min {
            assert!(node.keys.iter().all(|k| k >= min));
        }
        if let Some(max) = max {
            assert!(node.keys.iter().all(|k| k <= max));
        }
        if node.is_leaf {
            assert!(node.children.is_empty());
        } else {
            assert_eq!(node.children.len(), node.keys.len() + 1);
            for (i, child) in node.children.iter().enumerate() {
                let lo = if i == 0 { min } else { Some(&node.keys[i - 1]) };
                let hi = if i == node.keys.len() {
                    max
                } else {
                    Some(&node.keys[i])
                };
                self.check_node(*child, lo, hi, false);
            }
        }
    }

    fn leaf_depths(&self, id: NodeId, depth: usize, out: &mut Vec<usize>) {
        let node = self.node(id);
        if node.is_leaf {
            out.push(depth);
            return;
        }
        for child in &node.children {
            self.leaf_depths(*child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use proptest_state_machine::{prop_state_machine, ReferenceStateMachine, StateMachineTest};

    use super::*;
    use crate::generate::{key_sequence, RNG};

    fn build(order: usize, keys: &[i64]) -> BTree<i64> {
        let mut tree = BTree::new(order).unwrap();
        for key in keys {
            tree.insert(*key);
        }
        tree
    }

    fn has_action(steps: &[Step<i64>], action: Action) -> bool {
        steps.iter().any(|step| step.action == action)
    }

    #[test]
    fn order_below_two_is_rejected() {
        assert_eq!(BTree::<i64>::new(0).unwrap_err(), TreeError::InvalidOrder(0));
        assert_eq!(BTree::<i64>::new(1).unwrap_err(), TreeError::InvalidOrder(1));
        assert!(BTree::<i64>::new(2).is_ok());
    }

    #[test]
    fn insert_into_empty_tree_takes_fast_path() {
        let mut tree = BTree::new(2).unwrap();
        let steps = tree.insert(7);
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.action == Action::Insert));
        assert_eq!(tree.keys_in_order(), vec![7]);
    }

    #[test]
    fn three_inserts_at_order_two_never_split() {
        let mut tree = BTree::new(2).unwrap();
        for key in [10, 20, 30] {
            let steps = tree.insert(key);
            assert!(!has_action(&steps, Action::Split));
        }
        let root = tree.node(tree.root);
        assert!(root.is_leaf);
        assert_eq!(root.keys, vec![10, 20, 30]);
    }

    #[test]
    fn fourth_insert_splits_root() {
        let mut tree = build(2, &[10, 20, 30]);
        let steps = tree.insert(5);
        assert!(has_action(&steps, Action::Split));

        let root = tree.node(tree.root);
        assert!(!root.is_leaf);
        assert_eq!(root.keys, vec![20]);
        assert_eq!(tree.node(root.children[0]).keys, vec![5, 10]);
        assert_eq!(tree.node(root.children[1]).keys, vec![30]);
        tree.check_invariants();
    }

    #[test]
    fn split_yields_two_minimal_halves_and_one_median() {
        // 2t-1 = 5 keys fill the root at order 3; the sixth forces a split.
        let mut tree = build(3, &[1, 2, 3, 4, 5]);
        tree.insert(6);

        let root = tree.node(tree.root);
        assert_eq!(root.keys, vec![3]);
        assert_eq!(tree.node(root.children[0]).keys.len(), 2);
        assert_eq!(tree.node(root.children[1]).keys.len(), 3); // took the new key
        tree.check_invariants();
    }

    #[test]
    fn split_step_highlights_parent_child_and_sibling() {
        let mut tree = build(2, &[10, 20, 30]);
        let steps = tree.insert(5);
        let split = steps
            .iter()
            .find(|s| s.action == Action::Split && s.message.starts_with("Split child"))
            .unwrap();
        assert_eq!(split.highlight.len(), 3);
        for id in &split.highlight {
            assert!(split.tree.find(*id).is_some());
        }
    }

    #[test]
    fn key_equal_to_promoted_median_descends_left() {
        // Root [20] with a full left child [5, 10, 15]; inserting another 10
        // splits that child and promotes 10. The incoming 10 is not strictly
        // greater than the promoted median, so it lands in the lower half.
        let mut tree = build(2, &[10, 20, 30, 5, 15]);
        tree.insert(10);

        let root = tree.node(tree.root);
        assert_eq!(root.keys, vec![10, 20]);
        assert_eq!(tree.node(root.children[0]).keys, vec![5, 10]);
        assert_eq!(tree.node(root.children[1]).keys, vec![15]);
        assert_eq!(tree.node(root.children[2]).keys, vec![30]);
        tree.check_invariants();
    }

    #[test]
    fn search_hit_reports_found() {
        let tree = build(2, &[10, 20, 30, 5]);
        let steps = tree.search(&20);
        let last = steps.last().unwrap();
        assert_eq!(last.action, Action::Search);
        assert!(last.message.starts_with("Found 20"));
        // Start step, one traverse at the root, verdict.
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn search_miss_stays_on_a_single_path() {
        let tree = build(2, &[10, 20, 30, 5]);
        let root = tree.node(tree.root);
        let right = root.children[1];

        let steps = tree.search(&15);
        let last = steps.last().unwrap();
        assert_eq!(last.action, Action::Search);
        assert_eq!(last.message, "15 not found in the tree");
        assert!(steps.iter().all(|s| !s.highlight.contains(&right)));
    }

    #[test]
    fn search_on_empty_tree_misses() {
        let tree: BTree<i64> = BTree::new(2).unwrap();
        let steps = tree.search(&1);
        assert_eq!(steps.last().unwrap().message, "1 not found in the tree");
    }

    #[test]
    fn duplicate_keys_are_kept() {
        let mut tree = build(2, &[10, 10, 10]);
        assert_eq!(tree.keys_in_order(), vec![10, 10, 10]);
        tree.delete(&10);
        assert_eq!(tree.keys_in_order(), vec![10, 10]);
        tree.check_invariants();
    }

    #[test]
    fn node_ids_are_never_reused() {
        let mut tree = build(2, &[10, 20, 30, 5]);
        let before: Vec<NodeId> = tree.nodes.keys().copied().collect();

        // Collapse the tree back to a single leaf, then grow it again.
        for key in [5, 10, 30, 20] {
            tree.delete(&key);
        }
        let surviving: Vec<NodeId> = tree.nodes.keys().copied().collect();
        let retired: Vec<NodeId> = before
            .iter()
            .copied()
            .filter(|id| !surviving.contains(id))
            .collect();
        assert!(!retired.is_empty());

        for key in [1, 2, 3, 4, 5, 6] {
            tree.insert(key);
        }
        for id in &retired {
            assert!(!tree.nodes.contains_key(id));
        }
        tree.check_invariants();
    }

    #[test]
    fn fixed_seed_workloads_are_deterministic() {
        let run = |seed: u64| {
            let mut rng = RNG::from_seed(seed);
            let keys = key_sequence(&mut rng, 40);
            let mut tree = BTree::new(2).unwrap();
            let mut step_count = 0;
            for key in keys {
                step_count += tree.insert(key).len();
            }
            (step_count, tree.snapshot())
        };
        let (count_a, shape_a) = run(42);
        let (count_b, shape_b) = run(42);
        assert_eq!(count_a, count_b);
        assert_eq!(shape_a, shape_b);
    }

    #[derive(Debug, Clone)]
    pub enum TreeOperation {
        Insert(i64),
        Delete(i64),
        Search(i64),
    }

    #[derive(Debug, Clone)]
    pub struct ReferenceTree {
        counts: BTreeMap<i64, usize>,
        order: usize,
    }
    impl ReferenceStateMachine for ReferenceTree {
        type State = Self;
        type Transition = TreeOperation;

        fn init_state() -> BoxedStrategy<Self::State> {
            (2usize..6)
                .prop_map(|order| ReferenceTree {
                    counts: BTreeMap::new(),
                    order,
                })
                .boxed()
        }

        fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
            if state.counts.is_empty() {
                (-50i64..50).prop_map(TreeOperation::Insert).boxed()
            } else {
                let keys: Vec<i64> = state.counts.keys().copied().collect();
                let removal_key = proptest::sample::select(keys);
                prop_oneof![
                    (-50i64..50).prop_map(TreeOperation::Insert),
                    removal_key.prop_map(TreeOperation::Delete),
                    (-50i64..50).prop_map(TreeOperation::Search),
                ]
                .boxed()
            }
        }

        fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
            match transition {
                TreeOperation::Insert(k) => {
                    *state.counts.entry(*k).or_insert(0) += 1;
                }
                TreeOperation::Delete(k) => {
                    let count = state.counts.get_mut(k).unwrap();
                    *count -= 1;
                    if *count == 0 {
                        state.counts.remove(k);
                    }
                }
                TreeOperation::Search(_) => (),
            }
            state
        }

        fn preconditions(state: &Self::State, transition: &Self::Transition) -> bool {
            match transition {
                TreeOperation::Delete(k) => state.counts.contains_key(k),
                _ => true,
            }
        }
    }

    impl StateMachineTest for BTree<i64> {
        type SystemUnderTest = Self;
        type Reference = ReferenceTree;

        fn init_test(
            ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        ) -> Self::SystemUnderTest {
            Self::new(ref_state.order).unwrap()
        }

        fn apply(
            mut state: Self::SystemUnderTest,
            _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
            transition: <Self::Reference as ReferenceStateMachine>::Transition,
        ) -> Self::SystemUnderTest {
            match transition {
                TreeOperation::Insert(k) => {
                    let steps = state.insert(k);
                    assert!(!steps.is_empty());
                    assert!(state.contains(&k));
                }
                TreeOperation::Delete(k) => {
                    let steps = state.delete(&k);
                    assert!(steps
                        .iter()
                        .any(|s| s.message.starts_with("Finished deleting")));
                }
                TreeOperation::Search(k) => {
                    let steps = state.search(&k);
                    let last = steps.last().unwrap();
                    assert_eq!(last.action, Action::Search);
                    assert_eq!(last.message.starts_with("Found"), state.contains(&k));
                }
            }
            state
        }

        fn check_invariants(
            state: &Self::SystemUnderTest,
            ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        ) {
            state.check_invariants();
            let mut expected = Vec::new();
            for (key, count) in &ref_state.counts {
                expected.extend(std::iter::repeat(*key).take(*count));
            }
            assert_eq!(state.keys_in_order(), expected);
            for key in ref_state.counts.keys() {
                let steps = state.search(key);
                assert!(steps.last().unwrap().message.starts_with("Found"));
            }
        }
    }

    prop_state_machine! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn full_tree_test(sequential 1..200 => BTree<i64>);
    }
}
