//! Parent/child forest built from a flat node snapshot

use super::sequence::{compare_document_order, COLUMN_TOLERANCE};
use crate::model::{NodeKind, ReportNode};
use std::collections::HashMap;

/// A node together with its ordered children
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub node: ReportNode,
    pub children: Vec<TreeNode>,
}

// Traversals below use explicit stacks: a parent chain may be arbitrarily deep.
impl TreeNode {
    fn count(&self) -> usize {
        let mut total = 0;
        let mut pending = vec![self];
        while let Some(tree) = pending.pop() {
            total += 1;
            pending.extend(&tree.children);
        }
        total
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
        let mut pending = vec![self];
        while let Some(tree) = pending.pop() {
            out.push(&tree.node.id);
            pending.extend(tree.children.iter().rev());
        }
    }
}

impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut tree) = pending.pop() {
            pending.append(&mut tree.children);
        }
    }
}

/// Ordered rooted trees covering every node of a report exactly once
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Forest {
    pub roots: Vec<TreeNode>,
}

impl Forest {
    pub fn len(&self) -> usize {
        self.roots.iter().map(TreeNode::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Node ids in depth-first pre-order
    pub fn ids(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.len());
        for root in &self.roots {
            root.collect_ids(&mut out);
        }
        out
    }
}

/// How parent links are resolved
#[derive(Debug, Clone, Copy)]
pub struct TreeOptions {
    /// Attach parentless nodes to the closest preceding container in their column
    pub infer_parents: bool,
    pub column_tolerance: f64,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            infer_parents: false,
            column_tolerance: COLUMN_TOLERANCE,
        }
    }
}

/// Build the forest from explicit parent references only
pub fn build_tree(nodes: &[ReportNode]) -> Forest {
    build_tree_with(nodes, &TreeOptions::default())
}

/// Build the forest.
///
/// Siblings and roots follow document order. A parent id that is not in
/// the snapshot makes the node a root. Nodes trapped in a parent cycle are
/// promoted to roots so that nothing is dropped.
pub fn build_tree_with(nodes: &[ReportNode], options: &TreeOptions) -> Forest {
    let mut ordered: Vec<usize> = (0..nodes.len()).collect();
    ordered.sort_by(|&a, &b| compare_document_order(&nodes[a], &nodes[b]));

    let mut rank = vec![0usize; nodes.len()];
    for (r, &i) in ordered.iter().enumerate() {
        rank[i] = r;
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        index.entry(node.id.as_str()).or_insert(i);
    }

    let parents: Vec<Option<usize>> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| match node.parent_id.as_deref() {
            Some(pid) => index.get(pid).copied().filter(|&p| p != i),
            None if options.infer_parents => infer_parent(nodes, &ordered, rank[i], options),
            None => None,
        })
        .collect();

    // Walking `ordered` keeps every child list in document order
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots = Vec::new();
    for &i in &ordered {
        match parents[i] {
            Some(p) => children[p].push(i),
            None => roots.push(i),
        }
    }

    let mut visited = vec![false; nodes.len()];
    let mut forest = Forest::default();
    for &r in &roots {
        forest.roots.extend(materialize(r, nodes, &children, &mut visited));
    }
    for &i in &ordered {
        if !visited[i] {
            forest.roots.extend(materialize(i, nodes, &children, &mut visited));
        }
    }
    forest
}

fn infer_parent(
    nodes: &[ReportNode],
    ordered: &[usize],
    rank: usize,
    options: &TreeOptions,
) -> Option<usize> {
    let node = &nodes[ordered[rank]];
    // Sub-sections hang off sections only; everything else takes either container
    let sections_only = match node.kind {
        NodeKind::Section | NodeKind::Start | NodeKind::End => return None,
        NodeKind::SubSection => true,
        _ => false,
    };

    ordered[..rank].iter().rev().copied().find(|&c| {
        let candidate = &nodes[c];
        let fits = if sections_only {
            candidate.kind == NodeKind::Section
        } else {
            candidate.kind.is_container()
        };
        fits && (candidate.position.x - node.position.x).abs() < options.column_tolerance
    })
}

struct Frame {
    index: usize,
    next_child: usize,
    built: Vec<TreeNode>,
}

impl Frame {
    fn new(index: usize, children: &[Vec<usize>]) -> Self {
        Self {
            index,
            next_child: 0,
            built: Vec::with_capacity(children[index].len()),
        }
    }
}

/// Subtree under `root`, depth first. Nodes already placed are skipped.
fn materialize(
    root: usize,
    nodes: &[ReportNode],
    children: &[Vec<usize>],
    visited: &mut [bool],
) -> Option<TreeNode> {
    visited[root] = true;
    let mut stack = vec![Frame::new(root, children)];
    let mut finished = None;

    while let Some(frame) = stack.last_mut() {
        if let Some(&c) = children[frame.index].get(frame.next_child) {
            frame.next_child += 1;
            if !visited[c] {
                visited[c] = true;
                stack.push(Frame::new(c, children));
            }
            continue;
        }
        if let Some(done) = stack.pop() {
            let tree = TreeNode {
                node: nodes[done.index].clone(),
                children: done.built,
            };
            match stack.last_mut() {
                Some(parent) => parent.built.push(tree),
                None => finished = Some(tree),
            }
        }
    }
    finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodePayload;
    use proptest::prelude::*;

    fn root_ids(forest: &Forest) -> Vec<&str> {
        forest.roots.iter().map(|r| r.node.id.as_str()).collect()
    }

    #[test]
    fn test_children_follow_parent_ids() {
        let nodes = vec![
            ReportNode::new("sec", NodePayload::section("Findings")).with_order(1),
            ReportNode::new("c2", NodePayload::content("b")).with_order(3).with_parent("sec"),
            ReportNode::new("c1", NodePayload::content("a")).with_order(2).with_parent("sec"),
        ];
        let forest = build_tree(&nodes);
        assert_eq!(root_ids(&forest), vec!["sec"]);
        let kids: Vec<&str> = forest.roots[0]
            .children
            .iter()
            .map(|c| c.node.id.as_str())
            .collect();
        assert_eq!(kids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_dangling_parent_becomes_root() {
        let nodes = vec![
            ReportNode::new("a", NodePayload::section("A")).with_order(1),
            ReportNode::new("orphan", NodePayload::content("x")).with_order(2).with_parent("deleted"),
        ];
        let forest = build_tree(&nodes);
        assert_eq!(root_ids(&forest), vec!["a", "orphan"]);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn test_cycle_members_are_kept() {
        let nodes = vec![
            ReportNode::new("x", NodePayload::sub_section("X")).with_order(1).with_parent("y"),
            ReportNode::new("y", NodePayload::sub_section("Y")).with_order(2).with_parent("x"),
            ReportNode::new("self", NodePayload::content("z")).with_order(3).with_parent("self"),
        ];
        let forest = build_tree(&nodes);
        let mut ids = forest.ids();
        ids.sort();
        assert_eq!(ids, vec!["self", "x", "y"]);
        assert_eq!(root_ids(&forest), vec!["self", "x"]);
    }

    #[test]
    fn test_inference_attaches_to_preceding_container() {
        let nodes = vec![
            ReportNode::new("s1", NodePayload::section("One")).with_order(1).at(400.0, 100.0),
            ReportNode::new("sub", NodePayload::sub_section("Sub")).with_order(2).at(400.0, 200.0),
            ReportNode::new("c", NodePayload::content("text")).with_order(3).at(410.0, 300.0),
            ReportNode::new("s2", NodePayload::section("Two")).with_order(4).at(400.0, 400.0),
            ReportNode::new("sub2", NodePayload::sub_section("Sub2")).with_order(5).at(400.0, 500.0),
            ReportNode::new("side", NodePayload::content("far")).with_order(6).at(1200.0, 600.0),
        ];
        let options = TreeOptions {
            infer_parents: true,
            ..TreeOptions::default()
        };
        let forest = build_tree_with(&nodes, &options);
        assert_eq!(root_ids(&forest), vec!["s1", "s2", "side"]);
        assert_eq!(forest.ids(), vec!["s1", "sub", "c", "s2", "sub2", "side"]);
        assert_eq!(forest.roots[0].children[0].children[0].node.id, "c");
    }

    #[test]
    fn test_inference_keeps_explicit_parents() {
        let nodes = vec![
            ReportNode::new("s1", NodePayload::section("One")).with_order(1),
            ReportNode::new("s2", NodePayload::section("Two")).with_order(2),
            ReportNode::new("c", NodePayload::content("x")).with_order(3).with_parent("s1"),
        ];
        let options = TreeOptions {
            infer_parents: true,
            ..TreeOptions::default()
        };
        let forest = build_tree_with(&nodes, &options);
        assert_eq!(forest.roots[0].children[0].node.id, "c");
        assert!(forest.roots[1].children.is_empty());
    }

    #[test]
    fn test_empty_input() {
        let forest = build_tree(&[]);
        assert!(forest.is_empty());
        assert_eq!(forest.len(), 0);
    }

    #[test]
    fn test_deep_parent_chain() {
        const DEPTH: usize = 50_000;
        let nodes: Vec<ReportNode> = (0..DEPTH)
            .map(|i| {
                let node = ReportNode::new(format!("n{}", i), NodePayload::sub_section("Level"))
                    .with_order(i as i64);
                if i == 0 {
                    node
                } else {
                    node.with_parent(format!("n{}", i - 1))
                }
            })
            .collect();

        let forest = build_tree(&nodes);
        assert_eq!(root_ids(&forest), vec!["n0"]);
        assert_eq!(forest.len(), DEPTH);
        let ids = forest.ids();
        assert_eq!(ids[1], "n1");
        assert_eq!(ids[DEPTH - 1], "n49999");
    }

    fn arb_nodes() -> impl Strategy<Value = Vec<ReportNode>> {
        prop::collection::vec(
            (0i64..4, 0u8..3, prop::option::of(0usize..24), any::<bool>()),
            0..20,
        )
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (order, y, parent, is_section))| {
                    let payload = if is_section {
                        NodePayload::section(format!("S{}", i))
                    } else {
                        NodePayload::content(format!("C{}", i))
                    };
                    let mut node = ReportNode::new(format!("n{}", i), payload)
                        .with_order(order)
                        .at(400.0, f64::from(y));
                    // Indexes past the end of the set produce dangling parents
                    node.parent_id = parent.map(|p| format!("n{}", p));
                    node
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_forest_contains_every_node_once(nodes in arb_nodes(), infer in any::<bool>()) {
            let options = TreeOptions { infer_parents: infer, ..TreeOptions::default() };
            let forest = build_tree_with(&nodes, &options);
            let mut got: Vec<String> = forest.ids().into_iter().map(String::from).collect();
            let mut want: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
            got.sort();
            want.sort();
            prop_assert_eq!(got, want);
        }

        #[test]
        fn prop_build_is_idempotent(nodes in arb_nodes()) {
            prop_assert_eq!(build_tree(&nodes), build_tree(&nodes));
        }

        #[test]
        fn prop_siblings_are_in_document_order(nodes in arb_nodes()) {
            fn check(list: &[TreeNode]) -> bool {
                list.windows(2).all(|w| {
                    compare_document_order(&w[0].node, &w[1].node) != std::cmp::Ordering::Greater
                }) && list.iter().all(|t| check(&t.children))
            }
            let forest = build_tree(&nodes);
            // Promoted cycle members are appended after regular roots
            prop_assert!(forest.roots.iter().all(|t| check(&t.children)));
        }
    }
}
