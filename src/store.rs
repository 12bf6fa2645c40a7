//! Node store boundary
//!
//! Everything above the store (export, templates, generation, the API)
//! talks to [`ReportStore`]. The SQLite implementation lives in `db.rs`.

use crate::error::Result;
use crate::model::{NodeKind, NodePayload, Position, ReportNode};
use serde::{Deserialize, Serialize};

/// Deepest parent chain a node may sit under
pub const MAX_NESTING: usize = 8;

/// Fields for a node about to be created.
///
/// `data` stays untyped until the store validates it against `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, alias = "parentNodeId")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub linked_resource_ids: Vec<String>,
    #[serde(default)]
    pub ai_generated: bool,
}

impl NewNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            data: serde_json::Value::Null,
            parent_id: None,
            order: None,
            position: None,
            color: None,
            linked_resource_ids: Vec::new(),
            ai_generated: false,
        }
    }

    /// Typed payload; the kind follows it
    pub fn from_payload(payload: &NodePayload) -> Self {
        let mut node = Self::new(payload.kind());
        node.data = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
        node
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(Position::new(x, y));
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn generated(mut self) -> Self {
        self.ai_generated = true;
        self
    }
}

/// Partial update. `None` leaves a field alone; for the nullable fields
/// `Some(None)` clears it. In JSON an absent key is `None` and an explicit
/// `null` is `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeUpdate {
    /// Replaces the whole payload, validated against the node's kind
    pub data: Option<serde_json::Value>,
    #[serde(alias = "parentNodeId", deserialize_with = "present")]
    pub parent_id: Option<Option<String>>,
    pub order: Option<i64>,
    pub position: Option<Position>,
    #[serde(deserialize_with = "present")]
    pub color: Option<Option<String>>,
    pub linked_resource_ids: Option<Vec<String>>,
    pub ai_generated: Option<bool>,
}

/// Wraps whatever was sent, `null` included, so absent and null stay distinct
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl NodeUpdate {
    pub fn payload(payload: &NodePayload) -> Self {
        Self {
            data: serde_json::to_value(payload).ok(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &NodeUpdate::default()
    }
}

/// One entry of an atomic reorder batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOrder {
    pub id: String,
    pub order: i64,
}

/// What the export header and the generator need to know about a report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub id: String,
    pub title: String,
    pub project_id: String,
    pub project_name: String,
    pub status: String,
    pub created_at: String,
}

/// Project material the generator can cite
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContext {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub title: String,
    pub content: String,
}

/// Activity kinds recorded per report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    StatusChange,
    AiGeneration,
    SectionEdited,
    Exported,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Created => "created",
            ActivityKind::StatusChange => "status_change",
            ActivityKind::AiGeneration => "ai_generation",
            ActivityKind::SectionEdited => "section_edited",
            ActivityKind::Exported => "exported",
        }
    }
}

/// Persistence collaborator for report graphs
pub trait ReportStore {
    /// All nodes of a report, markers included, in no particular order
    fn list_nodes(&self, report_id: &str) -> Result<Vec<ReportNode>>;

    fn get_node(&self, node_id: &str) -> Result<ReportNode>;

    /// Validate and insert. Defaults: order after the last body node,
    /// position one step below the lowest node.
    fn create_node(&self, report_id: &str, node: NewNode) -> Result<ReportNode>;

    fn update_node(&self, node_id: &str, update: NodeUpdate) -> Result<ReportNode>;

    /// Remove a node and everything nested under it. Markers cannot be deleted.
    /// Returns how many nodes were removed.
    fn delete_node(&self, node_id: &str) -> Result<usize>;

    /// Apply every move or none
    fn reorder_nodes(&self, report_id: &str, moves: &[NodeOrder]) -> Result<()>;

    fn get_report(&self, report_id: &str) -> Result<ReportSummary>;

    fn list_resources(&self, project_id: &str) -> Result<Vec<ResourceContext>>;

    /// Section titles and text of earlier reports in the same project, newest first
    fn previous_reports_context(
        &self,
        project_id: &str,
        exclude_report_id: &str,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Best effort: failures are logged, never returned
    fn log_activity(&self, report_id: &str, kind: ActivityKind, details: serde_json::Value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_node_from_api_json() {
        let node: NewNode = serde_json::from_value(json!({
            "type": "content",
            "data": {"content": "<p>Hi</p>"},
            "parentNodeId": "sec-1",
            "position": {"x": 400.0, "y": 250.0}
        }))
        .unwrap();
        assert_eq!(node.kind, NodeKind::Content);
        assert_eq!(node.parent_id.as_deref(), Some("sec-1"));
        assert_eq!(node.position, Some(Position::new(400.0, 250.0)));
        assert_eq!(node.order, None);
    }

    #[test]
    fn test_new_node_from_payload() {
        let node = NewNode::from_payload(&NodePayload::section("Scope")).with_order(4);
        assert_eq!(node.kind, NodeKind::Section);
        assert_eq!(node.data["title"], "Scope");
        assert_eq!(node.order, Some(4));
    }

    #[test]
    fn test_update_is_empty() {
        assert!(NodeUpdate::default().is_empty());
        let update = NodeUpdate {
            order: Some(2),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let update: NodeUpdate =
            serde_json::from_value(json!({"parentId": null, "order": 3})).unwrap();
        assert_eq!(update.parent_id, Some(None));
        assert_eq!(update.color, None);
        assert_eq!(update.order, Some(3));

        let update: NodeUpdate = serde_json::from_value(json!({"color": "#fff"})).unwrap();
        assert_eq!(update.color, Some(Some("#fff".to_string())));
        assert_eq!(update.parent_id, None);
    }

    #[test]
    fn test_activity_kind_names() {
        assert_eq!(ActivityKind::AiGeneration.as_str(), "ai_generation");
        assert_eq!(
            serde_json::to_value(ActivityKind::StatusChange).unwrap(),
            json!("status_change")
        );
    }
}
