//! Document export
//!
//! A report snapshot goes through the same steps for every format: build
//! the node forest, flatten it into [`ExportBlock`]s, then hand the block
//! list and a small header to one serializer.

pub mod blocks;
pub mod docx;
pub mod markdown;
pub mod pdf;
pub mod text;

pub use blocks::{build_export_report, BlockOptions, ExportBlock, ExportReport};

use crate::config::ExportConfig;
use crate::error::{ReportError, Result};
use crate::graph::{build_tree_with, TreeOptions};
use crate::model::ReportNode;
use crate::store::{ActivityKind, ReportStore};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Target document format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Docx,
    Pdf,
    Markdown,
    Text,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Docx,
        ExportFormat::Pdf,
        ExportFormat::Markdown,
        ExportFormat::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Text => "txt",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::Text => "text/plain",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Docx => "docx",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Markdown => "md",
            ExportFormat::Text => "txt",
        }
    }

    /// Binary formats should not be dumped on a terminal
    pub fn is_binary(&self) -> bool {
        matches!(self, ExportFormat::Docx | ExportFormat::Pdf)
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docx" => Ok(ExportFormat::Docx),
            "pdf" => Ok(ExportFormat::Pdf),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "txt" | "text" => Ok(ExportFormat::Text),
            _ => Err(ReportError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Project line and date printed above the table of contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportHeader {
    pub project_name: String,
    /// `YYYY-MM-DD`
    pub generated_at: String,
}

/// Knobs for the tree and block stages
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub blocks: BlockOptions,
    pub tree: TreeOptions,
}

impl From<&ExportConfig> for ExportOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            blocks: BlockOptions {
                max_heading_level: config.heading_level(),
            },
            tree: TreeOptions {
                infer_parents: config.infer_parents,
                column_tolerance: config.column_tolerance,
            },
        }
    }
}

/// Rendered document ready to hand to a client or write to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
    pub file_name: String,
}

/// Tree and block stages over a node snapshot
pub fn build_document(title: &str, nodes: &[ReportNode], options: &ExportOptions) -> ExportReport {
    let forest = build_tree_with(nodes, &options.tree);
    build_export_report(title, &forest, &options.blocks)
}

/// Serialize a block list. Nothing is returned unless the whole document rendered.
pub fn render(report: &ExportReport, header: &ExportHeader, format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Markdown => Ok(markdown::render(report, header).into_bytes()),
        ExportFormat::Text => Ok(text::render(report, header).into_bytes()),
        ExportFormat::Docx => docx::render(report, header),
        ExportFormat::Pdf => pdf::render(report, header),
    }
}

/// Date part of an RFC 3339 timestamp
fn date_of(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| timestamp.chars().take(10).collect())
}

/// Export a stored report
pub fn export_report<S: ReportStore + ?Sized>(
    store: &S,
    report_id: &str,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<ExportArtifact> {
    let summary = store.get_report(report_id)?;
    let nodes = store.list_nodes(report_id)?;

    let document = build_document(&summary.title, &nodes, options);
    let header = ExportHeader {
        project_name: summary.project_name.clone(),
        generated_at: date_of(&summary.created_at),
    };
    let bytes = render(&document, &header, format)?;

    tracing::info!(
        report_id,
        format = %format,
        blocks = document.blocks.len(),
        bytes = bytes.len(),
        "exported report"
    );
    store.log_activity(
        report_id,
        ActivityKind::Exported,
        serde_json::json!({ "format": format.as_str() }),
    );

    Ok(ExportArtifact {
        bytes,
        mime_type: format.mime_type(),
        file_name: format!("report-{}.{}", report_id, format.extension()),
    })
}
