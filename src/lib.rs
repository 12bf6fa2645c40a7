//! reportgraph - Node-graph report builder with document export
//!
//! A report is a flat set of typed nodes (sections, content, tables,
//! diagrams, ...) laid out on a canvas. Parent links and an explicit
//! `order` turn that set into a document, which can be exported as docx,
//! pdf, markdown or plain text.
//!
//! # Pipeline
//!
//! | Stage | Module |
//! |-------|--------|
//! | Node model and payloads | [`model`] |
//! | Parent/child forest, document order | [`graph`] |
//! | Flattening into headings, paragraphs, tables | [`export::blocks`] |
//! | Format serializers | [`export`] |
//!
//! # Quick Start
//!
//! ```no_run
//! use reportgraph::export::{export_report, ExportFormat, ExportOptions};
//! use reportgraph::model::NodePayload;
//! use reportgraph::store::{NewNode, ReportStore};
//! use reportgraph::Database;
//!
//! let db = Database::open_at("reportgraph.db").unwrap();
//! let project = db.create_project("Harbour Station", None).unwrap();
//! let report = db.create_report(&project.id, "Access Audit").unwrap();
//!
//! let section = db
//!     .create_node(&report.id, NewNode::from_payload(&NodePayload::section("Findings")))
//!     .unwrap();
//! db.create_node(
//!     &report.id,
//!     NewNode::from_payload(&NodePayload::content("<p>Found 3 issues.</p>")).under(&section.id),
//! )
//! .unwrap();
//!
//! let doc = export_report(&db, &report.id, ExportFormat::Markdown, &ExportOptions::default()).unwrap();
//! println!("{}", String::from_utf8_lossy(&doc.bytes));
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod generate;
pub mod graph;
pub mod init;
pub mod markup;
pub mod model;
pub mod schema;
pub mod serve;
pub mod store;
pub mod templates;

pub use config::Config;
pub use db::{Activity, Database, Project, Report, Resource, CURRENT_SCHEMA};
pub use error::{ReportError, Result};
pub use export::{export_report, ExportArtifact, ExportBlock, ExportFormat, ExportReport};
pub use graph::{build_tree, sequence, Forest, TreeNode};
pub use model::{NodeKind, NodePayload, ReportNode};
pub use store::{NewNode, NodeUpdate, ReportStore};
pub use templates::{apply_template, apply_template_by_id, ReportTemplate};
