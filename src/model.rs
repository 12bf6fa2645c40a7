//! Report node model
//!
//! A report is a flat set of typed nodes. Each node carries a payload whose
//! shape is fixed by its kind; payloads are validated against the kind when
//! they cross the store boundary, so everything downstream can match on
//! [`NodePayload`] without guessing.

use crate::error::{ReportError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Section,
    SubSection,
    Content,
    Prompt,
    Table,
    Diagram,
    Checklist,
    Chart,
    Reference,
    Signature,
    Media,
    Start,
    End,
}

impl NodeKind {
    pub const ALL: [NodeKind; 13] = [
        NodeKind::Section,
        NodeKind::SubSection,
        NodeKind::Content,
        NodeKind::Prompt,
        NodeKind::Table,
        NodeKind::Diagram,
        NodeKind::Checklist,
        NodeKind::Chart,
        NodeKind::Reference,
        NodeKind::Signature,
        NodeKind::Media,
        NodeKind::Start,
        NodeKind::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Section => "section",
            NodeKind::SubSection => "sub_section",
            NodeKind::Content => "content",
            NodeKind::Prompt => "prompt",
            NodeKind::Table => "table",
            NodeKind::Diagram => "diagram",
            NodeKind::Checklist => "checklist",
            NodeKind::Chart => "chart",
            NodeKind::Reference => "reference",
            NodeKind::Signature => "signature",
            NodeKind::Media => "media",
            NodeKind::Start => "start",
            NodeKind::End => "end",
        }
    }

    /// Start/end markers bound the canvas flow and never reach a document
    pub fn is_marker(&self) -> bool {
        matches!(self, NodeKind::Start | NodeKind::End)
    }

    /// Kinds that open a heading and own nested nodes
    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Section | NodeKind::SubSection)
    }

    /// Palette colour used when neither the caller nor a template picks one
    pub fn default_color(&self) -> Option<&'static str> {
        match self {
            NodeKind::Section => Some("#2563eb"),
            NodeKind::SubSection => Some("#059669"),
            NodeKind::Table => Some("#ea580c"),
            NodeKind::Diagram => Some("#dc2626"),
            NodeKind::Content => Some("#64748b"),
            NodeKind::Prompt => Some("#9333ea"),
            NodeKind::Checklist => Some("#16a34a"),
            NodeKind::Chart => Some("#0284c7"),
            NodeKind::Reference => Some("#7c3aed"),
            NodeKind::Signature => Some("#be123c"),
            NodeKind::Media => Some("#0891b2"),
            NodeKind::Start | NodeKind::End => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "subsection" => return Ok(NodeKind::SubSection),
            other => {
                for kind in NodeKind::ALL {
                    if kind.as_str() == other {
                        return Ok(kind);
                    }
                }
            }
        }
        Err(ReportError::invalid(format!("unknown node type '{}'", s)))
    }
}

/// Canvas coordinate. Only `y` matters for documents, and only as a tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SectionPayload {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubSectionPayload {
    pub title: String,
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// HTML-ish rich text
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_prompt_node_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_content_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableColumn {
    pub id: String,
    pub header: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRow {
    pub id: String,
    /// Keyed by column id
    pub cells: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TablePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagramPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Mermaid source, kept verbatim
    #[serde(alias = "mermaidCode")]
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChecklistPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    #[default]
    Bar,
    Line,
    Area,
    Pie,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Pie => "pie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartSeries {
    pub name: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub chart_type: ChartType,
    pub labels: Vec<String>,
    pub series: Vec<ChartSeries>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferencePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub citation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureStatus {
    #[default]
    Pending,
    Signed,
    Rejected,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Pending => "pending",
            SignatureStatus::Signed => "signed",
            SignatureStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignaturePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_title: Option<String>,
    pub status: SignatureStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    #[default]
    Link,
    File,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Link => "link",
            MediaType::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaPayload {
    pub media_type: MediaType,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

/// Start/end markers carry no data
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarkerPayload {}

/// Type-dependent node data, one variant per [`NodeKind`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodePayload {
    Section(SectionPayload),
    SubSection(SubSectionPayload),
    Content(ContentPayload),
    Prompt(PromptPayload),
    Table(TablePayload),
    Diagram(DiagramPayload),
    Checklist(ChecklistPayload),
    Chart(ChartPayload),
    Reference(ReferencePayload),
    Signature(SignaturePayload),
    Media(MediaPayload),
    Start(MarkerPayload),
    End(MarkerPayload),
}

fn parse_payload<T: DeserializeOwned>(kind: NodeKind, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| ReportError::invalid(format!("malformed {} payload: {}", kind, e)))
}

impl NodePayload {
    /// Validate untyped JSON against the shape required by `kind`
    pub fn from_value(kind: NodeKind, value: serde_json::Value) -> Result<Self> {
        let value = match value {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            serde_json::Value::Object(map) => serde_json::Value::Object(map),
            other => {
                return Err(ReportError::invalid(format!(
                    "{} payload must be a JSON object, got {}",
                    kind, other
                )))
            }
        };

        Ok(match kind {
            NodeKind::Section => NodePayload::Section(parse_payload(kind, value)?),
            NodeKind::SubSection => NodePayload::SubSection(parse_payload(kind, value)?),
            NodeKind::Content => NodePayload::Content(parse_payload(kind, value)?),
            NodeKind::Prompt => NodePayload::Prompt(parse_payload(kind, value)?),
            NodeKind::Table => NodePayload::Table(parse_payload(kind, value)?),
            NodeKind::Diagram => NodePayload::Diagram(parse_payload(kind, value)?),
            NodeKind::Checklist => NodePayload::Checklist(parse_payload(kind, value)?),
            NodeKind::Chart => NodePayload::Chart(parse_payload(kind, value)?),
            NodeKind::Reference => NodePayload::Reference(parse_payload(kind, value)?),
            NodeKind::Signature => NodePayload::Signature(parse_payload(kind, value)?),
            NodeKind::Media => NodePayload::Media(parse_payload(kind, value)?),
            NodeKind::Start => NodePayload::Start(MarkerPayload::default()),
            NodeKind::End => NodePayload::End(MarkerPayload::default()),
        })
    }

    /// Parse the stored JSON column. An empty column means "no fields set".
    pub fn from_json_str(kind: NodeKind, data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Self::from_value(kind, serde_json::Value::Null);
        }
        let value: serde_json::Value = serde_json::from_str(data)
            .map_err(|e| ReportError::invalid(format!("malformed {} payload: {}", kind, e)))?;
        Self::from_value(kind, value)
    }

    /// Payload with every field defaulted
    pub fn empty(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Section => NodePayload::Section(SectionPayload::default()),
            NodeKind::SubSection => NodePayload::SubSection(SubSectionPayload::default()),
            NodeKind::Content => NodePayload::Content(ContentPayload::default()),
            NodeKind::Prompt => NodePayload::Prompt(PromptPayload::default()),
            NodeKind::Table => NodePayload::Table(TablePayload::default()),
            NodeKind::Diagram => NodePayload::Diagram(DiagramPayload::default()),
            NodeKind::Checklist => NodePayload::Checklist(ChecklistPayload::default()),
            NodeKind::Chart => NodePayload::Chart(ChartPayload::default()),
            NodeKind::Reference => NodePayload::Reference(ReferencePayload::default()),
            NodeKind::Signature => NodePayload::Signature(SignaturePayload::default()),
            NodeKind::Media => NodePayload::Media(MediaPayload::default()),
            NodeKind::Start => NodePayload::Start(MarkerPayload::default()),
            NodeKind::End => NodePayload::End(MarkerPayload::default()),
        }
    }

    pub fn section(title: impl Into<String>) -> Self {
        NodePayload::Section(SectionPayload {
            title: title.into(),
            ..Default::default()
        })
    }

    pub fn sub_section(title: impl Into<String>) -> Self {
        NodePayload::SubSection(SubSectionPayload {
            title: title.into(),
            ..Default::default()
        })
    }

    pub fn content(text: impl Into<String>) -> Self {
        NodePayload::Content(ContentPayload {
            content: text.into(),
            ..Default::default()
        })
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodePayload::Section(_) => NodeKind::Section,
            NodePayload::SubSection(_) => NodeKind::SubSection,
            NodePayload::Content(_) => NodeKind::Content,
            NodePayload::Prompt(_) => NodeKind::Prompt,
            NodePayload::Table(_) => NodeKind::Table,
            NodePayload::Diagram(_) => NodeKind::Diagram,
            NodePayload::Checklist(_) => NodeKind::Checklist,
            NodePayload::Chart(_) => NodeKind::Chart,
            NodePayload::Reference(_) => NodeKind::Reference,
            NodePayload::Signature(_) => NodeKind::Signature,
            NodePayload::Media(_) => NodeKind::Media,
            NodePayload::Start(_) => NodeKind::Start,
            NodePayload::End(_) => NodeKind::End,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            NodePayload::Section(p) => Some(p.title.as_str()),
            NodePayload::SubSection(p) => Some(p.title.as_str()),
            NodePayload::Content(p) => p.title.as_deref(),
            NodePayload::Prompt(p) => p.title.as_deref(),
            NodePayload::Table(p) => p.title.as_deref(),
            NodePayload::Diagram(p) => p.title.as_deref(),
            NodePayload::Checklist(p) => p.title.as_deref(),
            NodePayload::Chart(p) => p.title.as_deref(),
            NodePayload::Reference(p) => p.title.as_deref(),
            NodePayload::Signature(p) => p.title.as_deref(),
            NodePayload::Media(p) => p.caption.as_deref(),
            NodePayload::Start(_) | NodePayload::End(_) => None,
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        match self {
            NodePayload::Section(p) => p.title = title,
            NodePayload::SubSection(p) => p.title = title,
            NodePayload::Content(p) => p.title = Some(title),
            NodePayload::Prompt(p) => p.title = Some(title),
            NodePayload::Table(p) => p.title = Some(title),
            NodePayload::Diagram(p) => p.title = Some(title),
            NodePayload::Checklist(p) => p.title = Some(title),
            NodePayload::Chart(p) => p.title = Some(title),
            NodePayload::Reference(p) => p.title = Some(title),
            NodePayload::Signature(p) => p.title = Some(title),
            NodePayload::Media(p) => p.caption = Some(title),
            NodePayload::Start(_) | NodePayload::End(_) => {}
        }
    }

    /// JSON stored in the `data` column
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One node of a report graph
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportNode {
    pub id: String,
    pub report_id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub parent_id: Option<String>,
    pub order: i64,
    pub position: Position,
    #[serde(rename = "data")]
    pub payload: NodePayload,
    pub ai_generated: bool,
    pub linked_resource_ids: Vec<String>,
    pub color: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ReportNode {
    /// Detached node with default placement; the kind follows the payload
    pub fn new(id: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            id: id.into(),
            report_id: String::new(),
            kind: payload.kind(),
            parent_id: None,
            order: 0,
            position: Position::default(),
            payload,
            ai_generated: false,
            linked_resource_ids: Vec::new(),
            color: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.payload.title()
    }

    /// Label for listings: the title, or the kind when untitled
    pub fn label(&self) -> String {
        match self.title() {
            Some(t) if !t.trim().is_empty() => t.to_string(),
            _ => self.kind.to_string(),
        }
    }
}
