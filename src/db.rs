//! SQLite database with Diesel ORM
//!
//! Stores projects, reports, report nodes, resources and the activity log.
//! Tables are created on open; node invariants are enforced here, inside
//! transactions, so every writer sees the same rules.

use crate::error::{ReportError, Result};
use crate::graph;
use crate::markup;
use crate::model::{NodeKind, NodePayload, Position, ReportNode};
use crate::schema::*;
use crate::store::{
    ActivityKind, NewNode, NodeOrder, NodeUpdate, ReportStore, ReportSummary, ResourceContext,
    MAX_NESTING,
};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

/// Walk up directory tree to find .reportgraph folder (like git finds .git)
/// Can be overridden with REPORTGRAPH_DB_PATH env var
fn get_db_path() -> std::path::PathBuf {
    // Check env var first - always takes priority
    if let Ok(path) = std::env::var("REPORTGRAPH_DB_PATH") {
        return std::path::PathBuf::from(path);
    }

    if let Ok(current_dir) = std::env::current_dir() {
        let mut dir = current_dir.as_path();
        loop {
            let data_dir = dir.join(".reportgraph");
            if data_dir.exists() && data_dir.is_dir() {
                return data_dir.join("reportgraph.db");
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break, // Reached filesystem root
            }
        }
    }

    // Nothing found - default to current directory
    std::path::PathBuf::from(".reportgraph/reportgraph.db")
}

/// Current schema version for reportgraph
pub const CURRENT_SCHEMA: ReportSchema = ReportSchema {
    major: 1,
    minor: 0,
    patch: 0,
    name: "report-graph",
    features: &[
        "projects",
        "reports",
        "report_nodes",
        "resources",
        "report_activity",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct ReportSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl ReportSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::fmt::Display for ReportSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

/// Allowed values for `reports.status`
pub const REPORT_STATUSES: [&str; 4] = ["draft", "in_review", "approved", "published"];

/// Allowed values for `resources.resource_type`
pub const RESOURCE_TYPES: [&str; 6] = ["note", "pdf", "image", "table", "link", "other"];

/// Canvas column new nodes are dropped into
pub const DEFAULT_COLUMN_X: f64 = 400.0;

/// Vertical step between a new node and the lowest existing one
const NEW_NODE_STEP: f64 = 50.0;

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub client: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = projects)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub client: Option<String>,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = reports)]
pub struct NewReport<'a> {
    pub id: &'a str,
    pub project_id: &'a str,
    pub title: &'a str,
    pub status: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = reports)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = report_nodes)]
struct NewNodeRow<'a> {
    id: &'a str,
    report_id: &'a str,
    node_type: &'a str,
    parent_id: Option<&'a str>,
    sort_order: i64,
    position_x: f64,
    position_y: f64,
    data: &'a str,
    ai_generated: bool,
    linked_resource_ids: &'a str,
    color: Option<&'a str>,
    created_at: &'a str,
    updated_at: &'a str,
}

/// Raw `report_nodes` row; see [`NodeRow::into_node`]
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = report_nodes)]
struct NodeRow {
    id: String,
    report_id: String,
    node_type: String,
    parent_id: Option<String>,
    sort_order: i64,
    position_x: f64,
    position_y: f64,
    data: String,
    ai_generated: bool,
    linked_resource_ids: String,
    color: Option<String>,
    created_at: String,
    updated_at: String,
}

impl NodeRow {
    fn kind(&self) -> Result<NodeKind> {
        self.node_type.parse()
    }

    fn into_node(self) -> Result<ReportNode> {
        let kind = self.kind()?;
        let payload = NodePayload::from_json_str(kind, &self.data)?;
        let linked_resource_ids = serde_json::from_str(&self.linked_resource_ids)
            .unwrap_or_else(|e| {
                tracing::warn!(node_id = %self.id, error = %e, "unreadable linked resource ids");
                Vec::new()
            });
        Ok(ReportNode {
            id: self.id,
            report_id: self.report_id,
            kind,
            parent_id: self.parent_id,
            order: self.sort_order,
            position: Position::new(self.position_x, self.position_y),
            payload,
            ai_generated: self.ai_generated,
            linked_resource_ids,
            color: self.color,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = report_nodes)]
struct NodeChangeset<'a> {
    data: Option<String>,
    parent_id: Option<Option<&'a str>>,
    sort_order: Option<i64>,
    position_x: Option<f64>,
    position_y: Option<f64>,
    ai_generated: Option<bool>,
    linked_resource_ids: Option<String>,
    color: Option<Option<&'a str>>,
    updated_at: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = resources)]
pub struct NewResource<'a> {
    pub id: &'a str,
    pub project_id: &'a str,
    pub resource_type: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = resources)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub project_id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub title: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = report_activity)]
pub struct NewActivity<'a> {
    pub report_id: &'a str,
    pub activity_type: &'a str,
    pub details: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Serialize)]
#[diesel(table_name = report_activity)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: i32,
    pub report_id: String,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub details: Option<String>,
    pub created_at: String,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Get the database path that will be used
    pub fn db_path() -> std::path::PathBuf {
        get_db_path()
    }

    /// Open database at default path (respects REPORTGRAPH_DB_PATH env var)
    pub fn open() -> Result<Self> {
        let path = get_db_path();
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ReportError::Pool(format!("{}: {}", parent.display(), e)))?;
            }
        }
        Self::open_at(&path)
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(5)
            .build(manager)
            .map_err(|e| ReportError::Pool(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        tracing::debug!(path = %path_str, schema = %CURRENT_SCHEMA, "database ready");
        Ok(db)
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| ReportError::Pool(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                client TEXT,
                created_at TEXT NOT NULL
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY NOT NULL,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS report_nodes (
                id TEXT PRIMARY KEY NOT NULL,
                report_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                parent_id TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                position_x REAL NOT NULL DEFAULT 0,
                position_y REAL NOT NULL DEFAULT 0,
                data TEXT NOT NULL DEFAULT '{}',
                ai_generated BOOLEAN NOT NULL DEFAULT 0,
                linked_resource_ids TEXT NOT NULL DEFAULT '[]',
                color TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (report_id) REFERENCES reports(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY NOT NULL,
                project_id TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id)
            )
        "#).execute(&mut conn)?;

        diesel::sql_query(r#"
            CREATE TABLE IF NOT EXISTS report_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                report_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                details TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (report_id) REFERENCES reports(id)
            )
        "#).execute(&mut conn)?;

        // Create indexes
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_reports_project ON reports(project_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_nodes_report ON report_nodes(report_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_nodes_parent ON report_nodes(parent_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_resources_project ON resources(project_id)").execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_activity_report ON report_activity(report_id)").execute(&mut conn)?;

        // Register current schema
        self.register_schema(&CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(&self, schema: &ReportSchema) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now();
        let features_json = serde_json::to_string(&schema.features).unwrap_or_default();

        let new_schema = NewSchemaVersion {
            version: &schema.version_string(),
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(&mut conn)?;

        Ok(())
    }

    // ========================================================================
    // Projects
    // ========================================================================

    pub fn create_project(&self, name: &str, client: Option<&str>) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ReportError::invalid("project name is required"));
        }
        let mut conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let now = now();

        diesel::insert_into(projects::table)
            .values(&NewProject {
                id: &id,
                name,
                client,
                created_at: &now,
            })
            .execute(&mut conn)?;

        tracing::info!(project_id = %id, name, "created project");
        Ok(Project {
            id,
            name: name.to_string(),
            client: client.map(String::from),
            created_at: now,
        })
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut conn = self.get_conn()?;
        let rows = projects::table
            .order(projects::created_at.asc())
            .select(Project::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn get_project(&self, project_id: &str) -> Result<Project> {
        let mut conn = self.get_conn()?;
        projects::table
            .find(project_id)
            .select(Project::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| ReportError::not_found("project", project_id))
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Create a report together with its start and end markers
    pub fn create_report(&self, project_id: &str, title: &str) -> Result<Report> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ReportError::invalid("report title is required"));
        }
        self.get_project(project_id)?;

        let mut conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let now = now();

        conn.transaction::<_, ReportError, _>(|conn| {
            diesel::insert_into(reports::table)
                .values(&NewReport {
                    id: &id,
                    project_id,
                    title,
                    status: REPORT_STATUSES[0],
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;

            for (kind, y) in [(NodeKind::Start, 50.0), (NodeKind::End, 250.0)] {
                let marker_id = Uuid::new_v4().to_string();
                diesel::insert_into(report_nodes::table)
                    .values(&NewNodeRow {
                        id: &marker_id,
                        report_id: &id,
                        node_type: kind.as_str(),
                        parent_id: None,
                        sort_order: 0,
                        position_x: DEFAULT_COLUMN_X,
                        position_y: y,
                        data: "{}",
                        ai_generated: false,
                        linked_resource_ids: "[]",
                        color: None,
                        created_at: &now,
                        updated_at: &now,
                    })
                    .execute(conn)?;
            }
            Ok(())
        })?;

        tracing::info!(report_id = %id, project_id, title, "created report");
        self.log_activity(&id, ActivityKind::Created, serde_json::json!({ "title": title }));

        Ok(Report {
            id,
            project_id: project_id.to_string(),
            title: title.to_string(),
            status: REPORT_STATUSES[0].to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Reports of one project, oldest first
    pub fn list_reports(&self, project_id: &str) -> Result<Vec<Report>> {
        self.get_project(project_id)?;
        let mut conn = self.get_conn()?;
        let rows = reports::table
            .filter(reports::project_id.eq(project_id))
            .order(reports::created_at.asc())
            .select(Report::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    pub fn get_report_row(&self, report_id: &str) -> Result<Report> {
        let mut conn = self.get_conn()?;
        reports::table
            .find(report_id)
            .select(Report::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| ReportError::not_found("report", report_id))
    }

    pub fn update_report_status(&self, report_id: &str, status: &str) -> Result<Report> {
        if !REPORT_STATUSES.contains(&status) {
            return Err(ReportError::invalid(format!(
                "unknown status '{}' (expected one of: {})",
                status,
                REPORT_STATUSES.join(", ")
            )));
        }
        let previous = self.get_report_row(report_id)?;
        let mut conn = self.get_conn()?;
        let now = now();

        diesel::update(reports::table.find(report_id))
            .set((reports::status.eq(status), reports::updated_at.eq(&now)))
            .execute(&mut conn)?;

        tracing::info!(report_id, from = %previous.status, to = status, "report status changed");
        self.log_activity(
            report_id,
            ActivityKind::StatusChange,
            serde_json::json!({ "from": previous.status, "to": status }),
        );

        Ok(Report {
            status: status.to_string(),
            updated_at: now,
            ..previous
        })
    }

    // ========================================================================
    // Resources
    // ========================================================================

    pub fn add_resource(
        &self,
        project_id: &str,
        resource_type: &str,
        title: &str,
        content: &str,
    ) -> Result<Resource> {
        if !RESOURCE_TYPES.contains(&resource_type) {
            return Err(ReportError::invalid(format!(
                "unknown resource type '{}' (expected one of: {})",
                resource_type,
                RESOURCE_TYPES.join(", ")
            )));
        }
        self.get_project(project_id)?;

        let mut conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let now = now();

        diesel::insert_into(resources::table)
            .values(&NewResource {
                id: &id,
                project_id,
                resource_type,
                title,
                content,
                created_at: &now,
            })
            .execute(&mut conn)?;

        tracing::debug!(resource_id = %id, project_id, resource_type, "added resource");
        Ok(Resource {
            id,
            project_id: project_id.to_string(),
            resource_type: resource_type.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
        })
    }

    pub fn list_project_resources(&self, project_id: &str) -> Result<Vec<Resource>> {
        let mut conn = self.get_conn()?;
        let rows = resources::table
            .filter(resources::project_id.eq(project_id))
            .order(resources::created_at.asc())
            .select(Resource::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Activity
    // ========================================================================

    pub fn record_activity(
        &self,
        report_id: &str,
        kind: ActivityKind,
        details: &serde_json::Value,
    ) -> Result<()> {
        let mut conn = self.get_conn()?;
        let details = if details.is_null() {
            None
        } else {
            Some(details.to_string())
        };
        diesel::insert_into(report_activity::table)
            .values(&NewActivity {
                report_id,
                activity_type: kind.as_str(),
                details: details.as_deref(),
                created_at: &now(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    /// Most recent first
    pub fn list_activity(&self, report_id: &str, limit: i64) -> Result<Vec<Activity>> {
        let mut conn = self.get_conn()?;
        let rows = report_activity::table
            .filter(report_activity::report_id.eq(report_id))
            .order(report_activity::id.desc())
            .limit(limit)
            .select(Activity::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    // ========================================================================
    // Node helpers
    // ========================================================================

    fn load_rows(conn: &mut SqliteConnection, report_id: &str) -> Result<Vec<NodeRow>> {
        let rows = report_nodes::table
            .filter(report_nodes::report_id.eq(report_id))
            .order((report_nodes::sort_order.asc(), report_nodes::position_y.asc()))
            .select(NodeRow::as_select())
            .load(conn)?;
        Ok(rows)
    }

    fn load_row(conn: &mut SqliteConnection, node_id: &str) -> Result<NodeRow> {
        report_nodes::table
            .find(node_id)
            .select(NodeRow::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| ReportError::not_found("node", node_id))
    }

    fn report_exists(conn: &mut SqliteConnection, report_id: &str) -> Result<()> {
        let found: i64 = reports::table
            .filter(reports::id.eq(report_id))
            .count()
            .get_result(conn)?;
        if found == 0 {
            return Err(ReportError::not_found("report", report_id));
        }
        Ok(())
    }
}

/// Check a prospective parent link against the rest of the report.
///
/// `node_id` is `None` for a node that does not exist yet.
fn validate_parent(
    rows: &[NodeRow],
    node_id: Option<&str>,
    kind: NodeKind,
    parent_id: Option<&str>,
) -> Result<()> {
    let Some(parent_id) = parent_id else {
        if kind == NodeKind::SubSection {
            return Err(ReportError::invalid("a sub_section needs a parent section"));
        }
        return Ok(());
    };

    if kind.is_marker() {
        return Err(ReportError::invalid("start and end markers cannot have a parent"));
    }
    if node_id == Some(parent_id) {
        return Err(ReportError::invalid("a node cannot be its own parent"));
    }

    let by_id: HashMap<&str, &NodeRow> = rows.iter().map(|r| (r.id.as_str(), r)).collect();
    let parent = by_id.get(parent_id).ok_or_else(|| {
        ReportError::invalid(format!("parent node {} is not part of this report", parent_id))
    })?;
    let parent_kind = parent.kind()?;
    if parent_kind.is_marker() {
        return Err(ReportError::invalid("start and end markers cannot have children"));
    }
    if kind == NodeKind::SubSection && parent_kind != NodeKind::Section {
        return Err(ReportError::invalid(format!(
            "a sub_section must sit under a section, not a {}",
            parent_kind
        )));
    }

    // Depth of the node once attached, counting the parent chain
    let mut depth = 1;
    let mut cursor = parent.parent_id.as_deref();
    while let Some(ancestor) = cursor {
        if Some(ancestor) == node_id {
            return Err(ReportError::invalid("moving the node there would create a cycle"));
        }
        depth += 1;
        if depth > MAX_NESTING {
            break;
        }
        cursor = by_id.get(ancestor).and_then(|r| r.parent_id.as_deref());
    }

    let below = node_id.map(|id| subtree_height(rows, id)).unwrap_or(0);
    if depth + below > MAX_NESTING {
        return Err(ReportError::invalid(format!(
            "nodes cannot be nested more than {} levels deep",
            MAX_NESTING
        )));
    }
    Ok(())
}

/// Levels of descendants below `node_id`
fn subtree_height(rows: &[NodeRow], node_id: &str) -> usize {
    let mut height = 0;
    let mut frontier: Vec<&str> = vec![node_id];
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(node_id);
    loop {
        let next: Vec<&str> = rows
            .iter()
            .filter(|r| {
                r.parent_id
                    .as_deref()
                    .is_some_and(|p| frontier.contains(&p))
            })
            .map(|r| r.id.as_str())
            .filter(|id| seen.insert(*id))
            .collect();
        if next.is_empty() {
            return height;
        }
        height += 1;
        frontier = next;
    }
}

/// `node_id` plus every node nested under it
fn descendants(rows: &[NodeRow], node_id: &str) -> Vec<String> {
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for row in rows {
        if let Some(parent) = row.parent_id.as_deref() {
            children.entry(parent).or_default().push(row.id.as_str());
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack = vec![node_id];
    let mut out = Vec::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        out.push(id.to_string());
        if let Some(kids) = children.get(id) {
            stack.extend(kids.iter().copied());
        }
    }
    out
}

fn next_order(rows: &[NodeRow]) -> Result<i64> {
    let mut max = 0;
    for row in rows {
        if !row.kind()?.is_marker() {
            max = max.max(row.sort_order);
        }
    }
    Ok(max + 1)
}

fn next_position(rows: &[NodeRow]) -> Position {
    let lowest = rows
        .iter()
        .filter(|r| r.node_type != NodeKind::End.as_str())
        .map(|r| r.position_y)
        .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |a| a.max(y))));
    Position::new(DEFAULT_COLUMN_X, lowest.unwrap_or(0.0) + NEW_NODE_STEP)
}

fn json_ids(ids: &[String]) -> String {
    serde_json::to_string(ids).unwrap_or_else(|_| "[]".to_string())
}

impl ReportStore for Database {
    fn list_nodes(&self, report_id: &str) -> Result<Vec<ReportNode>> {
        let mut conn = self.get_conn()?;
        Self::report_exists(&mut conn, report_id)?;
        Self::load_rows(&mut conn, report_id)?
            .into_iter()
            .map(NodeRow::into_node)
            .collect()
    }

    fn get_node(&self, node_id: &str) -> Result<ReportNode> {
        let mut conn = self.get_conn()?;
        Self::load_row(&mut conn, node_id)?.into_node()
    }

    fn create_node(&self, report_id: &str, node: NewNode) -> Result<ReportNode> {
        if node.kind.is_marker() {
            return Err(ReportError::invalid(
                "start and end markers are created with the report",
            ));
        }
        let payload = NodePayload::from_value(node.kind, node.data)?;
        let data = payload.to_json_string();
        let linked = json_ids(&node.linked_resource_ids);
        let id = Uuid::new_v4().to_string();
        let now = now();

        let mut conn = self.get_conn()?;
        conn.transaction::<_, ReportError, _>(|conn| {
            Self::report_exists(conn, report_id)?;
            let rows = Self::load_rows(conn, report_id)?;
            validate_parent(&rows, None, node.kind, node.parent_id.as_deref())?;

            let order = match node.order {
                Some(order) => order,
                None => next_order(&rows)?,
            };
            let position = node.position.unwrap_or_else(|| next_position(&rows));
            let color = node
                .color
                .as_deref()
                .or_else(|| node.kind.default_color());

            diesel::insert_into(report_nodes::table)
                .values(&NewNodeRow {
                    id: &id,
                    report_id,
                    node_type: node.kind.as_str(),
                    parent_id: node.parent_id.as_deref(),
                    sort_order: order,
                    position_x: position.x,
                    position_y: position.y,
                    data: &data,
                    ai_generated: node.ai_generated,
                    linked_resource_ids: &linked,
                    color,
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;
            Ok(())
        })?;

        tracing::debug!(node_id = %id, report_id, kind = %node.kind, "created node");
        Self::load_row(&mut conn, &id)?.into_node()
    }

    fn update_node(&self, node_id: &str, update: NodeUpdate) -> Result<ReportNode> {
        let mut conn = self.get_conn()?;
        let now = now();

        let edited = conn.transaction::<_, ReportError, _>(|conn| {
            let row = Self::load_row(conn, node_id)?;
            let kind = row.kind()?;

            let data = match update.data.clone() {
                Some(value) => Some(NodePayload::from_value(kind, value)?.to_json_string()),
                None => None,
            };

            if let Some(parent) = &update.parent_id {
                let rows = Self::load_rows(conn, &row.report_id)?;
                validate_parent(&rows, Some(node_id), kind, parent.as_deref())?;
            }

            let changes = NodeChangeset {
                data,
                parent_id: update.parent_id.as_ref().map(|p| p.as_deref()),
                sort_order: update.order,
                position_x: update.position.map(|p| p.x),
                position_y: update.position.map(|p| p.y),
                ai_generated: update.ai_generated,
                linked_resource_ids: update.linked_resource_ids.as_deref().map(json_ids),
                color: update.color.as_ref().map(|c| c.as_deref()),
                updated_at: &now,
            };
            diesel::update(report_nodes::table.find(node_id))
                .set(&changes)
                .execute(conn)?;

            Ok((row.report_id, kind, update.data.is_some()))
        })?;

        let (report_id, kind, data_changed) = edited;
        tracing::debug!(node_id, report_id = %report_id, "updated node");
        if data_changed && kind.is_container() {
            self.log_activity(
                &report_id,
                ActivityKind::SectionEdited,
                serde_json::json!({ "nodeId": node_id }),
            );
        }
        Self::load_row(&mut conn, node_id)?.into_node()
    }

    fn delete_node(&self, node_id: &str) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let removed = conn.transaction::<_, ReportError, _>(|conn| {
            let row = Self::load_row(conn, node_id)?;
            if row.kind()?.is_marker() {
                return Err(ReportError::invalid(
                    "start and end markers cannot be deleted",
                ));
            }
            let rows = Self::load_rows(conn, &row.report_id)?;
            let doomed = descendants(&rows, node_id);
            let count = diesel::delete(report_nodes::table.filter(report_nodes::id.eq_any(doomed)))
                .execute(conn)?;
            Ok(count)
        })?;
        tracing::debug!(node_id, removed, "deleted node");
        Ok(removed)
    }

    fn reorder_nodes(&self, report_id: &str, moves: &[NodeOrder]) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now();
        conn.transaction::<_, ReportError, _>(|conn| {
            Self::report_exists(conn, report_id)?;
            for m in moves {
                let updated = diesel::update(
                    report_nodes::table
                        .filter(report_nodes::id.eq(&m.id))
                        .filter(report_nodes::report_id.eq(report_id)),
                )
                .set((
                    report_nodes::sort_order.eq(m.order),
                    report_nodes::updated_at.eq(&now),
                ))
                .execute(conn)?;
                if updated == 0 {
                    return Err(ReportError::not_found("node", m.id.clone()));
                }
            }
            Ok(())
        })?;
        tracing::debug!(report_id, moves = moves.len(), "reordered nodes");
        Ok(())
    }

    fn get_report(&self, report_id: &str) -> Result<ReportSummary> {
        let report = self.get_report_row(report_id)?;
        let project = self.get_project(&report.project_id)?;
        Ok(ReportSummary {
            id: report.id,
            title: report.title,
            project_id: project.id,
            project_name: project.name,
            status: report.status,
            created_at: report.created_at,
        })
    }

    fn list_resources(&self, project_id: &str) -> Result<Vec<ResourceContext>> {
        Ok(self
            .list_project_resources(project_id)?
            .into_iter()
            .map(|r| ResourceContext {
                id: r.id,
                resource_type: r.resource_type,
                title: r.title,
                content: r.content,
            })
            .collect())
    }

    fn previous_reports_context(
        &self,
        project_id: &str,
        exclude_report_id: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let mut conn = self.get_conn()?;
        let previous: Vec<Report> = reports::table
            .filter(reports::project_id.eq(project_id))
            .filter(reports::id.ne(exclude_report_id))
            .order(reports::created_at.desc())
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .select(Report::as_select())
            .load(&mut conn)?;

        let mut out = Vec::with_capacity(previous.len());
        for report in previous {
            let nodes = Self::load_rows(&mut conn, &report.id)?
                .into_iter()
                .map(NodeRow::into_node)
                .collect::<Result<Vec<_>>>()?;
            out.push(summarize_report(&report.title, &nodes));
        }
        Ok(out)
    }

    fn log_activity(&self, report_id: &str, kind: ActivityKind, details: serde_json::Value) {
        if let Err(e) = self.record_activity(report_id, kind, &details) {
            tracing::warn!(report_id, activity = kind.as_str(), error = %e, "failed to log activity");
        }
    }
}

/// `Report: <title>` followed by one `<section>: <text>` paragraph per section
fn summarize_report(title: &str, nodes: &[ReportNode]) -> String {
    let forest = graph::build_tree(nodes);
    let mut sections = Vec::new();

    fn collect_text(tree: &graph::TreeNode, out: &mut Vec<String>) {
        for child in &tree.children {
            if let NodePayload::Content(c) = &child.node.payload {
                let text = markup::strip_markup(&c.content);
                if !text.is_empty() {
                    out.push(text);
                }
            }
            if !child.node.kind.is_container() {
                collect_text(child, out);
            }
        }
    }

    fn visit(tree: &graph::TreeNode, sections: &mut Vec<String>) {
        if tree.node.kind.is_container() {
            let mut text = Vec::new();
            collect_text(tree, &mut text);
            sections.push(format!("{}: {}", tree.node.label(), text.join(" ")));
        }
        for child in &tree.children {
            visit(child, sections);
        }
    }

    for root in &forest.roots {
        visit(root, &mut sections);
    }
    format!("Report: {}\n{}", title, sections.join("\n\n"))
}
