//! Report graph structure: forest building and canonical sequencing
//!
//! Both are pure functions over a node snapshot. Nothing here touches storage.

pub mod sequence;
pub mod tree;

pub use sequence::{
    canvas_edges, compare_document_order, flow_edges, sequence, FlowEdge, COLUMN_TOLERANCE,
};
pub use tree::{build_tree, build_tree_with, Forest, TreeNode, TreeOptions};
