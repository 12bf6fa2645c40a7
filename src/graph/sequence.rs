//! Canonical document order and the synthetic edges derived from it

use crate::model::{NodeKind, ReportNode};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Default horizontal distance under which two nodes share a canvas column
pub const COLUMN_TOLERANCE: f64 = 100.0;

/// `order` decides; vertical position only breaks ties
pub fn compare_document_order(a: &ReportNode, b: &ReportNode) -> Ordering {
    a.order
        .cmp(&b.order)
        .then_with(|| a.position.y.total_cmp(&b.position.y))
}

/// Body nodes in document order, start/end markers excluded.
///
/// The sort is stable: nodes with equal order and equal y keep their input order.
pub fn sequence(nodes: &[ReportNode]) -> Vec<&ReportNode> {
    let mut body: Vec<&ReportNode> = nodes.iter().filter(|n| !n.kind.is_marker()).collect();
    body.sort_by(|a, b| compare_document_order(a, b));
    body
}

/// Directed edge between two node ids, as drawn on the canvas
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl FlowEdge {
    pub fn between(source: &str, target: &str) -> Self {
        Self {
            id: format!("e-{}-{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

/// The visual chain: start, every body node in document order, end
fn visual_chain(nodes: &[ReportNode]) -> Vec<&ReportNode> {
    let mut chain = Vec::with_capacity(nodes.len());
    if let Some(start) = nodes.iter().find(|n| n.kind == NodeKind::Start) {
        chain.push(start);
    }
    chain.extend(sequence(nodes));
    if let Some(end) = nodes.iter().find(|n| n.kind == NodeKind::End) {
        chain.push(end);
    }
    chain
}

/// `start → node[0] → … → node[n-1] → end`. Missing markers are skipped.
pub fn flow_edges(nodes: &[ReportNode]) -> Vec<FlowEdge> {
    visual_chain(nodes)
        .windows(2)
        .map(|pair| FlowEdge::between(&pair[0].id, &pair[1].id))
        .collect()
}

/// Edges served to the canvas: sequential links between neighbours in the
/// same column, plus one edge per explicit parent reference.
pub fn canvas_edges(nodes: &[ReportNode], column_tolerance: f64) -> Vec<FlowEdge> {
    let mut seen = HashSet::new();
    let mut edges = Vec::new();

    for pair in visual_chain(nodes).windows(2) {
        if (pair[0].position.x - pair[1].position.x).abs() < column_tolerance {
            let edge = FlowEdge::between(&pair[0].id, &pair[1].id);
            if seen.insert(edge.id.clone()) {
                edges.push(edge);
            }
        }
    }

    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    for node in nodes {
        if let Some(parent) = node.parent_id.as_deref() {
            if !ids.contains(parent) {
                continue;
            }
            let edge = FlowEdge::between(parent, &node.id);
            if seen.insert(edge.id.clone()) {
                edges.push(edge);
            }
        }
    }

    edges
}
