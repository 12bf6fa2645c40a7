//! Built-in report templates
//!
//! A template is a small tree of titled nodes. Applying one to a report is
//! additive: nodes are created depth-first with parent links, and `order`
//! comes from one counter that keeps climbing across the whole template, so
//! the flat document sequence matches the template's reading order.

use crate::error::{ReportError, Result};
use crate::model::{NodeKind, NodePayload, ReportNode};
use crate::store::{NewNode, ReportStore};
use serde::Serialize;

/// Vertical gap between the lowest existing node and the first template node
pub const FIRST_OFFSET: f64 = 150.0;

/// Vertical step between consecutive template nodes
pub const STEP: f64 = 120.0;

/// Column template nodes are placed in
pub const COLUMN_X: f64 = 400.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateNode {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TemplateNode>,
    /// Extra payload fields, merged over the title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TemplateNode {
    pub fn new(kind: NodeKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            color: None,
            children: Vec::new(),
            data: None,
        }
    }

    pub fn color(mut self, color: &str) -> Self {
        self.color = Some(color.to_string());
        self
    }

    pub fn children(mut self, children: Vec<TemplateNode>) -> Self {
        self.children = children;
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Nodes in this subtree, self included
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TemplateNode::count).sum::<usize>()
    }

    /// Payload JSON: the kind's defaults, the title, then `data` on top
    fn payload_value(&self) -> serde_json::Value {
        let mut payload = NodePayload::empty(self.kind);
        payload.set_title(self.title.clone());
        let mut value = serde_json::to_value(&payload).unwrap_or(serde_json::Value::Null);
        if let (Some(serde_json::Value::Object(extra)), serde_json::Value::Object(target)) =
            (&self.data, &mut value)
        {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }
        value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTemplate {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub nodes: Vec<TemplateNode>,
}

impl ReportTemplate {
    pub fn node_count(&self) -> usize {
        self.nodes.iter().map(TemplateNode::count).sum()
    }

    /// Reject shapes the store would refuse halfway through
    pub fn validate(&self) -> Result<()> {
        fn check(node: &TemplateNode, parent: Option<NodeKind>) -> Result<()> {
            if node.kind.is_marker() {
                return Err(ReportError::invalid(format!(
                    "template node '{}' cannot be a {} marker",
                    node.title, node.kind
                )));
            }
            if node.kind == NodeKind::SubSection && parent != Some(NodeKind::Section) {
                return Err(ReportError::invalid(format!(
                    "template sub_section '{}' must sit under a section",
                    node.title
                )));
            }
            node.children
                .iter()
                .try_for_each(|child| check(child, Some(node.kind)))
        }
        self.nodes.iter().try_for_each(|node| check(node, None))
    }
}

fn template(
    id: &str,
    name: &str,
    description: &str,
    category: &str,
    nodes: Vec<TemplateNode>,
) -> ReportTemplate {
    ReportTemplate {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        nodes,
    }
}

fn section(title: &str, color: &str, children: Vec<TemplateNode>) -> TemplateNode {
    TemplateNode::new(NodeKind::Section, title)
        .color(color)
        .children(children)
}

fn leaf(kind: NodeKind, title: &str) -> TemplateNode {
    TemplateNode::new(kind, title)
}

fn chart(title: &str, chart_type: &str) -> TemplateNode {
    leaf(NodeKind::Chart, title).data(serde_json::json!({ "chartType": chart_type }))
}

/// The built-in catalogue
pub fn builtin_templates() -> Vec<ReportTemplate> {
    use NodeKind::*;

    vec![
        template(
            "structural-integrity",
            "Structural Integrity Report",
            "Condition assessment with visual inspection, checklists, and damage severity",
            "Assessment",
            vec![
                section("Executive Summary", "#3b82f6", vec![]),
                section(
                    "Visual Inspection Summary",
                    "#3b82f6",
                    vec![
                        leaf(SubSection, "Inspection Methodology"),
                        leaf(Checklist, "Structural Components Checklist"),
                        leaf(Content, "Inspection Findings"),
                    ],
                ),
                section(
                    "Damage Assessment",
                    "#3b82f6",
                    vec![
                        leaf(SubSection, "Severity Classification"),
                        leaf(Table, "Damage Inventory"),
                        leaf(Content, "Detailed Analysis"),
                    ],
                ),
                section(
                    "Recommendations",
                    "#3b82f6",
                    vec![leaf(Content, "Proposed Actions"), leaf(Table, "Priority Matrix")],
                ),
                section(
                    "Appendices",
                    "#3b82f6",
                    vec![leaf(Reference, "Standards and Codes"), leaf(Signature, "Approval")],
                ),
            ],
        ),
        template(
            "construction-progress",
            "Construction Progress Report",
            "Work completed, schedule adherence, resources, and cost tracking",
            "Progress",
            vec![
                section("Executive Summary", "#10b981", vec![]),
                section(
                    "Work Completed",
                    "#10b981",
                    vec![
                        leaf(SubSection, "Period Summary"),
                        chart("Progress Chart", "bar"),
                        leaf(Content, "Detailed Activities"),
                    ],
                ),
                section(
                    "Schedule & Resources",
                    "#10b981",
                    vec![
                        leaf(Table, "Schedule Adherence"),
                        leaf(Table, "Resource Utilization"),
                        chart("Cost Trends", "line"),
                    ],
                ),
                section(
                    "Issues & Mitigation",
                    "#10b981",
                    vec![leaf(Content, "Current Issues"), leaf(Table, "Mitigation Measures")],
                ),
                section("Next Period Plan", "#10b981", vec![]),
            ],
        ),
        template(
            "site-inspection",
            "Site Inspection Report",
            "Field inspection with location, conditions, checklists, and non-conformances",
            "Inspection",
            vec![
                section(
                    "Inspection Details",
                    "#f97316",
                    vec![leaf(Content, "Location and Date"), leaf(Content, "Inspector Information")],
                ),
                section(
                    "Conditions Observed",
                    "#f97316",
                    vec![
                        leaf(Checklist, "Inspection Checklist"),
                        leaf(Content, "Description of Conditions"),
                    ],
                ),
                section(
                    "Non-Conformance Items",
                    "#f97316",
                    vec![leaf(Table, "Non-Conformance Log"), leaf(Content, "Detailed Findings")],
                ),
                section(
                    "Corrective Actions",
                    "#f97316",
                    vec![leaf(Content, "Recommended Actions"), leaf(Table, "Action Plan")],
                ),
                section(
                    "Signatures",
                    "#f97316",
                    vec![
                        leaf(Signature, "Inspector Signature"),
                        leaf(Signature, "Reviewer Signature"),
                    ],
                ),
            ],
        ),
        template(
            "safety-incident",
            "Safety Incident Report",
            "Incident description, root cause analysis, and corrective actions",
            "Safety",
            vec![
                section(
                    "Incident Overview",
                    "#ef4444",
                    vec![leaf(Content, "Incident Description"), leaf(Table, "Incident Details")],
                ),
                section(
                    "Root Cause Analysis",
                    "#ef4444",
                    vec![leaf(Content, "Analysis"), leaf(Diagram, "Cause Diagram")],
                ),
                section(
                    "Corrective & Preventive Actions",
                    "#ef4444",
                    vec![leaf(Table, "Action Items"), leaf(Content, "Implementation Plan")],
                ),
                section(
                    "Risk Assessment",
                    "#ef4444",
                    vec![leaf(Table, "Risk Severity Matrix"), leaf(Content, "Risk Mitigation")],
                ),
                section(
                    "Compliance",
                    "#ef4444",
                    vec![leaf(Reference, "Safety Regulations"), leaf(Signature, "Approval")],
                ),
            ],
        ),
        template(
            "technical-design",
            "Technical Design Report",
            "Background, methodology, calculations, results, and conclusions",
            "Technical",
            vec![
                section("Background & Objectives", "#8b5cf6", vec![]),
                section(
                    "Methodology",
                    "#8b5cf6",
                    vec![leaf(Content, "Approach"), leaf(Diagram, "Process Flow")],
                ),
                section(
                    "Analysis & Calculations",
                    "#8b5cf6",
                    vec![
                        leaf(Content, "Calculations"),
                        leaf(Table, "Results Table"),
                        chart("Analysis Charts", "line"),
                    ],
                ),
                section(
                    "Results & Discussion",
                    "#8b5cf6",
                    vec![leaf(Content, "Findings"), leaf(Diagram, "Visualizations")],
                ),
                section("Conclusions", "#8b5cf6", vec![]),
                section(
                    "References",
                    "#8b5cf6",
                    vec![leaf(Reference, "Standards"), leaf(Reference, "Technical Literature")],
                ),
            ],
        ),
        template(
            "executive-summary",
            "Executive Summary Report",
            "High-level overview with KPIs, metrics, risks, and decisions",
            "Summary",
            vec![
                section("Overview", "#6366f1", vec![]),
                section(
                    "Key Metrics & KPIs",
                    "#6366f1",
                    vec![leaf(Table, "KPI Summary"), chart("Performance Charts", "bar")],
                ),
                section(
                    "Schedule & Cost Overview",
                    "#6366f1",
                    vec![
                        leaf(Table, "Schedule Status"),
                        leaf(Table, "Cost Summary"),
                        chart("Trend Analysis", "area"),
                    ],
                ),
                section(
                    "Major Risks & Decisions",
                    "#6366f1",
                    vec![leaf(Content, "Risk Summary"), leaf(Table, "Decision Log")],
                ),
                section("Recommendations", "#6366f1", vec![]),
            ],
        ),
    ]
}

pub fn find_template(id: &str) -> Option<ReportTemplate> {
    builtin_templates().into_iter().find(|t| t.id == id)
}

pub fn templates_in_category(category: &str) -> Vec<ReportTemplate> {
    builtin_templates()
        .into_iter()
        .filter(|t| t.category.eq_ignore_ascii_case(category))
        .collect()
}

/// Next free order and y coordinate in an existing report
struct Cursor {
    order: i64,
    y: f64,
}

impl Cursor {
    fn after(nodes: &[ReportNode]) -> Self {
        let order = nodes
            .iter()
            .filter(|n| !n.kind.is_marker())
            .map(|n| n.order)
            .max()
            .unwrap_or(0);
        let y = nodes
            .iter()
            .filter(|n| n.kind != NodeKind::End)
            .map(|n| n.position.y)
            .fold(0.0, f64::max);
        Self {
            order: order + 1,
            y: y + FIRST_OFFSET,
        }
    }

    fn advance(&mut self) -> (i64, f64) {
        let slot = (self.order, self.y);
        self.order += 1;
        self.y += STEP;
        slot
    }
}

fn create_subtree<S: ReportStore + ?Sized>(
    store: &S,
    report_id: &str,
    node: &TemplateNode,
    parent_id: Option<&str>,
    cursor: &mut Cursor,
    created: &mut Vec<ReportNode>,
) -> Result<()> {
    let (order, y) = cursor.advance();
    let mut new_node = NewNode::new(node.kind)
        .with_data(node.payload_value())
        .with_order(order)
        .at(COLUMN_X, y);
    if let Some(parent_id) = parent_id {
        new_node = new_node.under(parent_id);
    }
    if let Some(color) = &node.color {
        new_node = new_node.with_color(color.as_str());
    }

    let stored = store.create_node(report_id, new_node)?;
    let id = stored.id.clone();
    created.push(stored);

    for child in &node.children {
        create_subtree(store, report_id, child, Some(&id), cursor, created)?;
    }
    Ok(())
}

/// Add a template's nodes to a report. Returns the created nodes in creation order.
pub fn apply_template<S: ReportStore + ?Sized>(
    store: &S,
    report_id: &str,
    template: &ReportTemplate,
) -> Result<Vec<ReportNode>> {
    template.validate()?;
    let existing = store.list_nodes(report_id)?;
    let mut cursor = Cursor::after(&existing);

    let mut created = Vec::with_capacity(template.node_count());
    for node in &template.nodes {
        create_subtree(store, report_id, node, None, &mut cursor, &mut created)?;
    }

    tracing::info!(
        report_id,
        template = %template.id,
        nodes = created.len(),
        "applied template"
    );
    Ok(created)
}

pub fn apply_template_by_id<S: ReportStore + ?Sized>(
    store: &S,
    report_id: &str,
    template_id: &str,
) -> Result<Vec<ReportNode>> {
    let template =
        find_template(template_id).ok_or_else(|| ReportError::not_found("template", template_id))?;
    apply_template(store, report_id, &template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::graph;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Database, String) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("t.db")).unwrap();
        let project = db.create_project("Depot", None).unwrap();
        let report = db.create_report(&project.id, "Survey").unwrap();
        (dir, db, report.id)
    }

    #[test]
    fn test_builtin_catalogue() {
        let templates = builtin_templates();
        let ids: Vec<&str> = templates.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "structural-integrity",
                "construction-progress",
                "site-inspection",
                "safety-incident",
                "technical-design",
                "executive-summary",
            ]
        );
        for t in &templates {
            t.validate().unwrap();
        }
        assert_eq!(templates_in_category("safety").len(), 1);
        assert!(find_template("nope").is_none());
    }

    #[test]
    fn test_payload_value_merges_data() {
        let node = chart("Cost Trends", "line");
        let value = node.payload_value();
        assert_eq!(value["title"], "Cost Trends");
        assert_eq!(value["chartType"], "line");
    }

    #[test]
    fn test_validate_rejects_orphan_sub_section() {
        let t = template(
            "bad",
            "Bad",
            "",
            "Test",
            vec![leaf(NodeKind::Content, "Intro")
                .children(vec![leaf(NodeKind::SubSection, "Lost")])],
        );
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_apply_two_sections_one_sub_section() {
        let (_dir, db, report_id) = setup();
        let t = template(
            "small",
            "Small",
            "",
            "Test",
            vec![
                section("Scope", "#000000", vec![leaf(NodeKind::SubSection, "Limits")]),
                section("Findings", "#000000", vec![]),
            ],
        );

        let created = apply_template(&db, &report_id, &t).unwrap();
        assert_eq!(created.len(), 3);
        let (scope, limits, findings) = (&created[0], &created[1], &created[2]);
        assert_eq!(scope.title(), Some("Scope"));
        assert!(scope.parent_id.is_none());
        assert_eq!(limits.parent_id.as_deref(), Some(scope.id.as_str()));
        assert!(findings.parent_id.is_none());
        assert!(scope.order < findings.order);
        assert!(scope.order < limits.order && limits.order < findings.order);
        assert_eq!(scope.color.as_deref(), Some("#000000"));
        assert_eq!(limits.color.as_deref(), NodeKind::SubSection.default_color());

        let forest = graph::build_tree(&db.list_nodes(&report_id).unwrap());
        let titles: Vec<String> = forest
            .roots
            .iter()
            .filter(|r| !r.node.kind.is_marker())
            .map(|r| r.node.label())
            .collect();
        assert_eq!(titles, vec!["Scope", "Findings"]);
    }

    #[test]
    fn test_apply_is_additive() {
        let (_dir, db, report_id) = setup();
        let first = apply_template_by_id(&db, &report_id, "executive-summary").unwrap();
        let second = apply_template_by_id(&db, &report_id, "executive-summary").unwrap();
        assert_eq!(first.len(), second.len());
        let last_first = first.iter().map(|n| n.order).max().unwrap();
        assert!(second.iter().all(|n| n.order > last_first));
        assert_eq!(db.list_nodes(&report_id).unwrap().len(), 2 + first.len() * 2);
    }

    #[test]
    fn test_unknown_template() {
        let (_dir, db, report_id) = setup();
        let err = apply_template_by_id(&db, &report_id, "nope").unwrap_err();
        assert!(matches!(err, ReportError::NotFound { entity: "template", .. }));
    }
}
