//! Flatten a node forest into the block list every serializer consumes

use crate::graph::{Forest, TreeNode};
use crate::markup;
use crate::model::{
    ChartSeries, ChartType, MediaType, NodePayload, SignatureStatus, TablePayload,
};
use serde::Serialize;

/// Heading depth used when nothing else is configured
pub const DEFAULT_MAX_HEADING_LEVEL: u8 = 3;

/// Format-neutral document element
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExportBlock {
    Heading {
        level: u8,
        text: String,
    },
    /// Raw markup; each serializer decides how much of it survives
    Paragraph {
        text: String,
    },
    /// Every row holds exactly `columns.len()` cells
    Table {
        title: Option<String>,
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Diagram {
        title: String,
        source: String,
    },
    Checklist {
        title: Option<String>,
        items: Vec<(bool, String)>,
    },
    Chart {
        title: Option<String>,
        chart_type: ChartType,
        labels: Vec<String>,
        series: Vec<ChartSeries>,
    },
    Reference {
        title: Option<String>,
        citation: String,
        url: Option<String>,
        standard: Option<String>,
    },
    Signature {
        title: Option<String>,
        signer_name: Option<String>,
        signer_title: Option<String>,
        status: SignatureStatus,
        signed_at: Option<String>,
    },
    Media {
        media_type: MediaType,
        url: String,
        caption: Option<String>,
        alt_text: Option<String>,
    },
}

/// Title plus ordered blocks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub title: String,
    pub blocks: Vec<ExportBlock>,
}

impl ExportReport {
    /// `(level, text)` of every heading, for tables of contents
    pub fn headings(&self) -> Vec<(u8, &str)> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ExportBlock::Heading { level, text } => Some((*level, text.as_str())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOptions {
    /// Deeper headings are clamped to this level
    pub max_heading_level: u8,
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self {
            max_heading_level: DEFAULT_MAX_HEADING_LEVEL,
        }
    }
}

/// Walk the forest depth-first and emit blocks in document order
pub fn build_export_report(title: &str, forest: &Forest, options: &BlockOptions) -> ExportReport {
    let max_level = options.max_heading_level.clamp(1, 6);
    let mut blocks = Vec::new();
    walk(&forest.roots, 0, max_level, &mut blocks);
    ExportReport {
        title: title.to_string(),
        blocks,
    }
}

/// `parent_level` is the level of the enclosing heading, 0 at the top
fn walk(nodes: &[TreeNode], parent_level: u8, max_level: u8, out: &mut Vec<ExportBlock>) {
    for tree in nodes {
        let level = match &tree.node.payload {
            NodePayload::Section(s) => Some((parent_level + 1, s.title.as_str())),
            NodePayload::SubSection(s) => Some(((parent_level + 1).max(2), s.title.as_str())),
            _ => None,
        };

        match level {
            Some((level, text)) => {
                let level = level.min(max_level);
                out.push(ExportBlock::Heading {
                    level,
                    text: text.to_string(),
                });
                walk(&tree.children, level, max_level, out);
            }
            None => {
                if let Some(block) = leaf_block(&tree.node.payload) {
                    out.push(block);
                }
                walk(&tree.children, parent_level, max_level, out);
            }
        }
    }
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_ref()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(String::from)
}

fn leaf_block(payload: &NodePayload) -> Option<ExportBlock> {
    match payload {
        NodePayload::Content(c) => {
            if markup::is_blank(&c.content) {
                None
            } else {
                Some(ExportBlock::Paragraph {
                    text: c.content.clone(),
                })
            }
        }
        NodePayload::Table(t) => Some(table_block(t)),
        NodePayload::Diagram(d) => Some(ExportBlock::Diagram {
            title: non_empty(&d.title).unwrap_or_else(|| "Diagram".to_string()),
            source: d.source.clone(),
        }),
        NodePayload::Checklist(c) => Some(ExportBlock::Checklist {
            title: non_empty(&c.title),
            items: c
                .items
                .iter()
                .map(|item| (item.checked, item.text.clone()))
                .collect(),
        }),
        NodePayload::Chart(c) => Some(ExportBlock::Chart {
            title: non_empty(&c.title),
            chart_type: c.chart_type,
            labels: c.labels.clone(),
            series: c.series.clone(),
        }),
        NodePayload::Reference(r) => Some(ExportBlock::Reference {
            title: non_empty(&r.title),
            citation: r.citation.clone(),
            url: non_empty(&r.url),
            standard: non_empty(&r.standard),
        }),
        NodePayload::Signature(s) => Some(ExportBlock::Signature {
            title: non_empty(&s.title),
            signer_name: non_empty(&s.signer_name),
            signer_title: non_empty(&s.signer_title),
            status: s.status,
            signed_at: non_empty(&s.signed_at),
        }),
        NodePayload::Media(m) => Some(ExportBlock::Media {
            media_type: m.media_type,
            url: m.url.clone(),
            caption: non_empty(&m.caption),
            alt_text: non_empty(&m.alt_text),
        }),
        // Prompt output already lives in a content node
        NodePayload::Prompt(_) => None,
        NodePayload::Start(_) | NodePayload::End(_) => None,
        NodePayload::Section(_) | NodePayload::SubSection(_) => None,
    }
}

fn table_block(table: &TablePayload) -> ExportBlock {
    let columns = table.columns.iter().map(|c| c.header.clone()).collect();
    let rows = table
        .rows
        .iter()
        .map(|row| {
            table
                .columns
                .iter()
                .map(|col| row.cells.get(&col.id).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    ExportBlock::Table {
        title: non_empty(&table.title),
        columns,
        rows,
    }
}

/// Chart data as a table: one row per series, one column per label
pub fn chart_rows(labels: &[String], series: &[ChartSeries]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut header = Vec::with_capacity(labels.len() + 1);
    header.push("Series".to_string());
    header.extend(labels.iter().cloned());

    let rows = series
        .iter()
        .map(|s| {
            let mut row = Vec::with_capacity(labels.len() + 1);
            row.push(s.name.clone());
            for i in 0..labels.len() {
                row.push(s.values.get(i).map(|v| format_number(*v)).unwrap_or_default());
            }
            row
        })
        .collect();
    (header, rows)
}

/// Whole numbers print without a fractional part
pub fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Signature details as display lines, shared by the text-like serializers
pub fn signature_lines(
    signer_name: &Option<String>,
    signer_title: &Option<String>,
    status: SignatureStatus,
    signed_at: &Option<String>,
) -> Vec<String> {
    let mut lines = Vec::new();
    match (signer_name, signer_title) {
        (Some(name), Some(title)) => lines.push(format!("Signer: {}, {}", name, title)),
        (Some(name), None) => lines.push(format!("Signer: {}", name)),
        (None, Some(title)) => lines.push(format!("Signer: {}", title)),
        (None, None) => {}
    }
    lines.push(format!("Status: {}", status.as_str()));
    if let Some(at) = signed_at {
        lines.push(format!("Signed at: {}", at));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_tree;
    use crate::model::{
        ChecklistItem, ChecklistPayload, NodeKind, ReportNode, TableColumn, TableRow,
    };
    use std::collections::BTreeMap;

    fn blocks_for(nodes: &[ReportNode]) -> Vec<ExportBlock> {
        build_export_report("Report", &build_tree(nodes), &BlockOptions::default()).blocks
    }

    fn heading(level: u8, text: &str) -> ExportBlock {
        ExportBlock::Heading {
            level,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_empty_content_is_suppressed() {
        let nodes = vec![
            ReportNode::new("sec", NodePayload::section("Findings")).with_order(1),
            ReportNode::new("c1", NodePayload::content("")).with_order(2).with_parent("sec"),
            ReportNode::new("c2", NodePayload::content("Found 3 issues."))
                .with_order(3)
                .with_parent("sec"),
            ReportNode::new("c3", NodePayload::content("  <p> </p> ")).with_order(4).with_parent("sec"),
        ];
        assert_eq!(
            blocks_for(&nodes),
            vec![
                heading(1, "Findings"),
                ExportBlock::Paragraph {
                    text: "Found 3 issues.".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_heading_levels_follow_nesting() {
        let nodes = vec![
            ReportNode::new("s", NodePayload::section("Scope")).with_order(1),
            ReportNode::new("a", NodePayload::sub_section("Access")).with_order(2).with_parent("s"),
            ReportNode::new("b", NodePayload::sub_section("Ramps")).with_order(3).with_parent("a"),
            ReportNode::new("c", NodePayload::sub_section("Slopes")).with_order(4).with_parent("b"),
            ReportNode::new("loose", NodePayload::sub_section("Loose")).with_order(5),
        ];
        assert_eq!(
            blocks_for(&nodes),
            vec![
                heading(1, "Scope"),
                heading(2, "Access"),
                heading(3, "Ramps"),
                // Clamped to the default maximum
                heading(3, "Slopes"),
                // A root sub-section never outranks a section
                heading(2, "Loose"),
            ]
        );
    }

    #[test]
    fn test_markers_and_prompts_emit_nothing() {
        let nodes = vec![
            ReportNode::new("start", NodePayload::empty(NodeKind::Start)),
            ReportNode::new("p", NodePayload::empty(NodeKind::Prompt)).with_order(1),
            ReportNode::new("end", NodePayload::empty(NodeKind::End)),
        ];
        assert!(blocks_for(&nodes).is_empty());
    }

    #[test]
    fn test_table_rows_are_normalized() {
        let mut full = BTreeMap::new();
        full.insert("a".to_string(), "1".to_string());
        full.insert("b".to_string(), "2".to_string());
        full.insert("stale".to_string(), "x".to_string());
        let mut partial = BTreeMap::new();
        partial.insert("b".to_string(), "4".to_string());

        let table = NodePayload::Table(TablePayload {
            title: Some("Counts".into()),
            columns: vec![
                TableColumn { id: "a".into(), header: "A".into() },
                TableColumn { id: "b".into(), header: "B".into() },
            ],
            rows: vec![
                TableRow { id: "r1".into(), cells: full },
                TableRow { id: "r2".into(), cells: partial },
            ],
        });
        let blocks = blocks_for(&[ReportNode::new("t", table).with_order(1)]);
        assert_eq!(
            blocks,
            vec![ExportBlock::Table {
                title: Some("Counts".into()),
                columns: vec!["A".into(), "B".into()],
                rows: vec![
                    vec!["1".into(), "2".into()],
                    vec!["".into(), "4".into()],
                ],
            }]
        );
    }

    #[test]
    fn test_children_of_leaf_nodes_are_kept() {
        let checklist = NodePayload::Checklist(ChecklistPayload {
            title: Some("Checks".into()),
            items: vec![ChecklistItem {
                id: "i1".into(),
                text: "Handrails".into(),
                checked: true,
            }],
        });
        let nodes = vec![
            ReportNode::new("s", NodePayload::section("S")).with_order(1),
            ReportNode::new("list", checklist).with_order(2).with_parent("s"),
            ReportNode::new("note", NodePayload::content("nested")).with_order(3).with_parent("list"),
        ];
        let blocks = blocks_for(&nodes);
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[1], ExportBlock::Checklist { items, .. } if items[0].0));
        assert!(matches!(&blocks[2], ExportBlock::Paragraph { text } if text == "nested"));
    }

    #[test]
    fn test_diagram_title_defaults() {
        let nodes = vec![ReportNode::new("d", NodePayload::empty(NodeKind::Diagram)).with_order(1)];
        assert!(matches!(&blocks_for(&nodes)[0], ExportBlock::Diagram { title, .. } if title == "Diagram"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let nodes = vec![
            ReportNode::new("s", NodePayload::section("S")).with_order(1),
            ReportNode::new("c", NodePayload::content("x")).with_order(1).with_parent("s"),
        ];
        assert_eq!(blocks_for(&nodes), blocks_for(&nodes));
    }

    #[test]
    fn test_chart_rows_pad_missing_values() {
        let (header, rows) = chart_rows(
            &["Q1".to_string(), "Q2".to_string()],
            &[ChartSeries {
                name: "Defects".into(),
                values: vec![3.0],
            }],
        );
        assert_eq!(header, vec!["Series", "Q1", "Q2"]);
        assert_eq!(rows, vec![vec!["Defects".to_string(), "3".into(), "".into()]]);
        assert_eq!(format_number(2.5), "2.5");
    }
}
