pub mod generate;
pub mod repl;
pub mod trace;
pub mod tree;

pub use trace::{Action, SnapshotNode, Step};
pub use tree::{BTree, NodeId, TreeError};
