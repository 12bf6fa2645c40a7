//! HTTP API for report graphs
//!
//! `reportgraph serve` → JSON API over the local database, plus document export

use crate::config::Config;
use crate::db::Database;
use crate::error::{ReportError, Result};
use crate::export::{self, ExportFormat, ExportOptions};
use crate::generate::{self, ContentGenerator, OpenAiGenerator};
use crate::graph;
use crate::store::{NewNode, NodeOrder, NodeUpdate, ReportStore};
use crate::templates;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};

#[derive(Serialize)]
struct ApiResponse<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// What a handler produced, before it is written to the socket
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json { status: u16, body: String },
    File { content_type: &'static str, file_name: String, bytes: Vec<u8> },
}

impl Reply {
    pub fn status(&self) -> u16 {
        match self {
            Reply::Json { status, .. } => *status,
            Reply::File { .. } => 200,
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        let body = serde_json::to_string(value)
            .unwrap_or_else(|e| format!(r#"{{"ok":false,"data":null,"error":"{}"}}"#, e));
        Reply::Json { status, body }
    }

    fn ok<T: Serialize>(data: T) -> Self {
        Self::json(200, &ApiResponse::success(data))
    }

    fn created<T: Serialize>(data: T) -> Self {
        Self::json(201, &ApiResponse::success(data))
    }

    fn failure(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, &ApiResponse::failure(message))
    }

    fn from_error(err: &ReportError) -> Self {
        if err.is_client_error() {
            tracing::debug!(error = %err, "rejected request");
        } else {
            tracing::warn!(error = %err, "request failed");
        }
        Self::failure(err.status_code(), err.public_message())
    }
}

/// Everything a request handler needs
pub struct ServerState {
    pub db: Database,
    pub config: Config,
    generator: std::result::Result<Box<dyn ContentGenerator>, String>,
}

impl ServerState {
    /// Generation is wired from `[ai]`; a missing key only fails the generate route
    pub fn new(db: Database, config: Config) -> Self {
        let generator = OpenAiGenerator::from_config(&config.ai)
            .map(|g| Box::new(g) as Box<dyn ContentGenerator>)
            .map_err(|e| e.to_string());
        Self {
            db,
            config,
            generator,
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn ContentGenerator>) -> Self {
        self.generator = Ok(generator);
        self
    }

    /// Generation is the only feature that needs an API key
    fn generator(&self) -> Result<&dyn ContentGenerator> {
        self.generator
            .as_deref()
            .map_err(|e| ReportError::Generation(e.clone()))
    }

    fn export_options(&self) -> ExportOptions {
        ExportOptions::from(&self.config.export)
    }
}

/// Start the API server
pub fn start_server(state: ServerState) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let server = Server::http(&addr).map_err(|e| std::io::Error::other(e.to_string()))?;

    eprintln!("\n{}", "reportgraph".green().bold());
    eprintln!("   API: http://{}/api", addr);
    if state.config.server.api_token.is_some() {
        eprintln!("   Auth: bearer token required");
    }
    eprintln!("   Press Ctrl+C to stop\n");
    tracing::info!(%addr, "server listening");

    // Handle requests
    for request in server.incoming_requests() {
        if let Err(e) = handle_request(&state, request) {
            tracing::error!(error = %e, "failed to write response");
        }
    }

    Ok(())
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn handle_request(state: &ServerState, mut request: Request) -> std::io::Result<()> {
    let method = request.method().clone();
    let url = request.url().to_string();
    let auth = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string());

    let mut body = String::new();
    let reply = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => dispatch(state, &method, &url, auth.as_deref(), &body),
        Err(e) => Reply::failure(400, format!("Failed to read body: {}", e)),
    };
    tracing::info!(method = %method, url = %url, status = reply.status(), "request");

    match reply {
        Reply::Json { status, body } => {
            let mut response = Response::from_string(body).with_status_code(status);
            if let Some(h) = header("Content-Type", "application/json") {
                response = response.with_header(h);
            }
            request.respond(response)
        }
        Reply::File {
            content_type,
            file_name,
            bytes,
        } => {
            let mut response = Response::from_data(bytes);
            if let Some(h) = header("Content-Type", content_type) {
                response = response.with_header(h);
            }
            let disposition = format!("attachment; filename=\"{}\"", file_name);
            if let Some(h) = header("Content-Disposition", &disposition) {
                response = response.with_header(h);
            }
            request.respond(response)
        }
    }
}

fn authorized(state: &ServerState, auth: Option<&str>) -> bool {
    match &state.config.server.api_token {
        None => true,
        Some(token) => auth
            .and_then(|a| a.strip_prefix("Bearer "))
            .is_some_and(|given| given.trim() == token),
    }
}

/// Route a request. Kept free of sockets so it can be driven from tests.
pub fn dispatch(
    state: &ServerState,
    method: &Method,
    url: &str,
    auth: Option<&str>,
    body: &str,
) -> Reply {
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p, q),
        None => (url, ""),
    };
    if path.starts_with("/api") && !authorized(state, auth) {
        return Reply::failure(401, "Unauthorized");
    }

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match route(state, method, &segments, query, body) {
        Ok(reply) => reply,
        Err(e) => Reply::from_error(&e),
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| ReportError::invalid(format!("Invalid JSON: {}", e)))
}

fn parse_query<T: serde::de::DeserializeOwned>(query: &str) -> Result<T> {
    serde_urlencoded::from_str(query)
        .map_err(|e| ReportError::invalid(format!("Invalid query: {}", e)))
}

#[derive(Deserialize)]
struct CreateProject {
    name: String,
    #[serde(default)]
    client: Option<String>,
}

#[derive(Deserialize)]
struct CreateReport {
    title: String,
}

#[derive(Deserialize)]
struct CreateResource {
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    title: String,
    content: String,
}

#[derive(Deserialize)]
struct SetStatus {
    status: String,
}

#[derive(Deserialize)]
struct Reorder {
    orders: Vec<NodeOrder>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplyTemplate {
    template_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Generate {
    node_id: String,
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateDiagram {
    diagram_node_id: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAll {
    section_node_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default)]
    format: Option<String>,
}

#[derive(Deserialize)]
struct ActivityQuery {
    #[serde(default = "default_activity_limit")]
    limit: i64,
}

fn default_activity_limit() -> i64 {
    100
}

#[derive(Serialize)]
struct NodesView<'a> {
    nodes: Vec<&'a crate::model::ReportNode>,
    edges: Vec<graph::FlowEdge>,
}

/// Node must exist and belong to the report named in the path
fn node_in_report(state: &ServerState, report_id: &str, node_id: &str) -> Result<()> {
    let node = state.db.get_node(node_id)?;
    if node.report_id != report_id {
        return Err(ReportError::not_found("node", node_id));
    }
    Ok(())
}

fn route(
    state: &ServerState,
    method: &Method,
    segments: &[&str],
    query: &str,
    body: &str,
) -> Result<Reply> {
    let db = &state.db;
    match (method, segments) {
        (Method::Get, ["api", "projects"]) => Ok(Reply::ok(db.list_projects()?)),
        (Method::Post, ["api", "projects"]) => {
            let req: CreateProject = parse_body(body)?;
            Ok(Reply::created(db.create_project(&req.name, req.client.as_deref())?))
        }
        (Method::Get, ["api", "projects", id, "reports"]) => Ok(Reply::ok(db.list_reports(id)?)),
        (Method::Post, ["api", "projects", id, "reports"]) => {
            let req: CreateReport = parse_body(body)?;
            Ok(Reply::created(db.create_report(id, &req.title)?))
        }
        (Method::Get, ["api", "projects", id, "resources"]) => {
            db.get_project(id)?;
            Ok(Reply::ok(db.list_project_resources(id)?))
        }
        (Method::Post, ["api", "projects", id, "resources"]) => {
            let req: CreateResource = parse_body(body)?;
            Ok(Reply::created(db.add_resource(
                id,
                &req.resource_type,
                &req.title,
                &req.content,
            )?))
        }

        (Method::Get, ["api", "reports", id]) => Ok(Reply::ok(db.get_report(id)?)),
        (Method::Put, ["api", "reports", id, "status"]) => {
            let req: SetStatus = parse_body(body)?;
            Ok(Reply::ok(db.update_report_status(id, &req.status)?))
        }
        (Method::Get, ["api", "reports", id, "nodes"]) => {
            let nodes = db.list_nodes(id)?;
            let edges = graph::canvas_edges(&nodes, state.config.export.column_tolerance);
            Ok(Reply::ok(NodesView {
                nodes: nodes.iter().collect(),
                edges,
            }))
        }
        (Method::Post, ["api", "reports", id, "nodes"]) => {
            let node: NewNode = parse_body(body)?;
            Ok(Reply::created(db.create_node(id, node)?))
        }
        (Method::Put, ["api", "reports", id, "nodes", "reorder"]) => {
            let req: Reorder = parse_body(body)?;
            db.reorder_nodes(id, &req.orders)?;
            Ok(Reply::ok(req.orders.len()))
        }
        (Method::Patch, ["api", "reports", id, "nodes", node_id]) => {
            let update: NodeUpdate = parse_body(body)?;
            node_in_report(state, id, node_id)?;
            Ok(Reply::ok(db.update_node(node_id, update)?))
        }
        (Method::Delete, ["api", "reports", id, "nodes", node_id]) => {
            node_in_report(state, id, node_id)?;
            Ok(Reply::ok(db.delete_node(node_id)?))
        }
        (Method::Get, ["api", "reports", id, "outline"]) => {
            let nodes = db.list_nodes(id)?;
            Ok(Reply::ok(NodesView {
                nodes: graph::sequence(&nodes),
                edges: graph::flow_edges(&nodes),
            }))
        }
        (Method::Post, ["api", "reports", id, "apply-template"]) => {
            let req: ApplyTemplate = parse_body(body)?;
            Ok(Reply::created(templates::apply_template_by_id(
                db,
                id,
                &req.template_id,
            )?))
        }
        (Method::Post, ["api", "reports", id, "generate"]) => {
            let req: Generate = parse_body(body)?;
            Ok(Reply::ok(generate::generate_content(
                db,
                state.generator()?,
                id,
                &req.node_id,
                req.prompt.as_deref(),
            )?))
        }
        (Method::Post, ["api", "reports", id, "generate-diagram"]) => {
            let req: GenerateDiagram = parse_body(body)?;
            let description = req.prompt.as_deref().or(req.description.as_deref());
            Ok(Reply::ok(generate::generate_diagram(
                db,
                state.generator()?,
                id,
                &req.diagram_node_id,
                description,
            )?))
        }
        (Method::Post, ["api", "reports", id, "generate-all"]) => {
            let req: GenerateAll = parse_body(body)?;
            Ok(Reply::ok(generate::generate_all(
                db,
                state.generator()?,
                id,
                &req.section_node_ids,
            )?))
        }
        (Method::Get, ["api", "reports", id, "activity"]) => {
            let q: ActivityQuery = parse_query(query)?;
            db.get_report_row(id)?;
            Ok(Reply::ok(db.list_activity(id, q.limit)?))
        }
        (Method::Get, ["api", "reports", id, "export"]) => {
            let q: ExportQuery = parse_query(query)?;
            let format: ExportFormat = q
                .format
                .as_deref()
                .unwrap_or(&state.config.export.default_format)
                .parse()?;
            let artifact = export::export_report(db, id, format, &state.export_options())?;
            Ok(Reply::File {
                content_type: artifact.mime_type,
                file_name: artifact.file_name,
                bytes: artifact.bytes,
            })
        }

        (Method::Get, ["api", "templates"]) => Ok(Reply::ok(templates::builtin_templates())),

        _ => Ok(Reply::failure(404, "Not found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::MockGenerator;
    use serde_json::Value;
    use tempfile::TempDir;

    fn state_replying(token: Option<&str>, reply: &str) -> (TempDir, ServerState) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("api.db")).unwrap();
        let mut config = Config::default();
        config.server.api_token = token.map(String::from);
        let state = ServerState::new(db, config).with_generator(Box::new(MockGenerator::new(reply)));
        (dir, state)
    }

    fn state(token: Option<&str>) -> (TempDir, ServerState) {
        state_replying(token, "<p>Generated</p>")
    }

    fn call(state: &ServerState, method: Method, url: &str, body: &str) -> (u16, Value) {
        match dispatch(state, &method, url, None, body) {
            Reply::Json { status, body } => (status, serde_json::from_str(&body).unwrap()),
            other => panic!("expected JSON, got {:?}", other),
        }
    }

    fn new_report(state: &ServerState) -> String {
        let (_, project) = call(state, Method::Post, "/api/projects", r#"{"name":"Museum"}"#);
        let project_id = project["data"]["id"].as_str().unwrap().to_string();
        let (status, report) = call(
            state,
            Method::Post,
            &format!("/api/projects/{}/reports", project_id),
            r#"{"title":"Access Review"}"#,
        );
        assert_eq!(status, 201);
        report["data"]["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_token_required_when_configured() {
        let (_dir, state) = state(Some("s3cret"));
        let reply = dispatch(&state, &Method::Get, "/api/projects", None, "");
        assert_eq!(reply.status(), 401);
        let reply = dispatch(&state, &Method::Get, "/api/projects", Some("Bearer wrong"), "");
        assert_eq!(reply.status(), 401);
        let reply = dispatch(&state, &Method::Get, "/api/projects", Some("Bearer s3cret"), "");
        assert_eq!(reply.status(), 200);
    }

    #[test]
    fn test_node_lifecycle() {
        let (_dir, state) = state(None);
        let report_id = new_report(&state);
        let base = format!("/api/reports/{}/nodes", report_id);

        let (status, created) = call(
            &state,
            Method::Post,
            &base,
            r#"{"type":"section","data":{"title":"Entrances"}}"#,
        );
        assert_eq!(status, 201);
        let node_id = created["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["data"]["data"]["title"], "Entrances");

        let (status, updated) = call(
            &state,
            Method::Patch,
            &format!("{}/{}", base, node_id),
            r#"{"data":{"title":"Main Entrance"},"color":null}"#,
        );
        assert_eq!(status, 200);
        assert_eq!(updated["data"]["data"]["title"], "Main Entrance");
        assert!(updated["data"]["color"].is_null());

        let (_, listing) = call(&state, Method::Get, &base, "");
        assert_eq!(listing["data"]["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(listing["data"]["edges"].as_array().unwrap().len(), 2);

        let (_, outline) = call(&state, Method::Get, &format!("/api/reports/{}/outline", report_id), "");
        assert_eq!(outline["data"]["nodes"].as_array().unwrap().len(), 1);

        let (status, deleted) = call(&state, Method::Delete, &format!("{}/{}", base, node_id), "");
        assert_eq!(status, 200);
        assert_eq!(deleted["data"], 1);
    }

    #[test]
    fn test_errors_map_to_status_codes() {
        let (_dir, state) = state(None);
        let report_id = new_report(&state);

        let (status, body) = call(&state, Method::Get, "/api/reports/missing", "");
        assert_eq!(status, 404);
        assert_eq!(body["ok"], false);

        let (status, _) = call(
            &state,
            Method::Post,
            &format!("/api/reports/{}/nodes", report_id),
            "{not json",
        );
        assert_eq!(status, 400);

        let (status, body) = call(
            &state,
            Method::Get,
            &format!("/api/reports/{}/export?format=odt", report_id),
            "",
        );
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("odt"));

        let (status, _) = call(&state, Method::Get, "/nowhere", "");
        assert_eq!(status, 404);
    }

    #[test]
    fn test_export_returns_file() {
        let (_dir, state) = state(None);
        let report_id = new_report(&state);
        let url = format!("/api/reports/{}/export?format=md", report_id);
        match dispatch(&state, &Method::Get, &url, None, "") {
            Reply::File {
                content_type,
                file_name,
                bytes,
            } => {
                assert_eq!(content_type, "text/markdown");
                assert_eq!(file_name, format!("report-{}.md", report_id));
                assert!(String::from_utf8(bytes).unwrap().starts_with("# Access Review\n"));
            }
            other => panic!("expected a file, got {:?}", other),
        }
    }

    #[test]
    fn test_template_and_generate_routes() {
        let (_dir, state) = state(None);
        let report_id = new_report(&state);

        let (_, catalogue) = call(&state, Method::Get, "/api/templates", "");
        assert_eq!(catalogue["data"].as_array().unwrap().len(), 6);

        let (status, applied) = call(
            &state,
            Method::Post,
            &format!("/api/reports/{}/apply-template", report_id),
            r#"{"templateId":"site-inspection"}"#,
        );
        assert_eq!(status, 201);
        let first = applied["data"][0]["id"].as_str().unwrap().to_string();

        let (status, generated) = call(
            &state,
            Method::Post,
            &format!("/api/reports/{}/generate", report_id),
            &format!(r#"{{"nodeId":"{}"}}"#, first),
        );
        assert_eq!(status, 200);
        assert_eq!(generated["data"]["data"]["content"], "<p>Generated</p>");
        assert_eq!(generated["data"]["aiGenerated"], true);

        let (_, activity) = call(
            &state,
            Method::Get,
            &format!("/api/reports/{}/activity?limit=5", report_id),
            "",
        );
        assert_eq!(activity["data"][0]["type"], "ai_generation");
    }

    #[test]
    fn test_reorder_route() {
        let (_dir, state) = state(None);
        let report_id = new_report(&state);
        let base = format!("/api/reports/{}/nodes", report_id);
        let (_, a) = call(&state, Method::Post, &base, r#"{"type":"content","data":{"content":"a"}}"#);
        let a_id = a["data"]["id"].as_str().unwrap();

        let body = format!(r#"{{"orders":[{{"id":"{}","order":9}},{{"id":"ghost","order":1}}]}}"#, a_id);
        let (status, _) = call(&state, Method::Put, &format!("{}/reorder", base), &body);
        assert_eq!(status, 404);

        let body = format!(r#"{{"orders":[{{"id":"{}","order":9}}]}}"#, a_id);
        let (status, moved) = call(&state, Method::Put, &format!("{}/reorder", base), &body);
        assert_eq!(status, 200);
        assert_eq!(moved["data"], 1);
    }

    #[test]
    fn test_generate_diagram_route() {
        let (_dir, state) = state_replying(None, "graph LR\n  Car-->Ramp");
        let report_id = new_report(&state);
        let (_, diagram) = call(
            &state,
            Method::Post,
            &format!("/api/reports/{}/nodes", report_id),
            r#"{"type":"diagram","data":{"title":"Route"}}"#,
        );
        let diagram_id = diagram["data"]["id"].as_str().unwrap().to_string();
        let url = format!("/api/reports/{}/generate-diagram", report_id);

        let (status, written) = call(
            &state,
            Method::Post,
            &url,
            &format!(r#"{{"diagramNodeId":"{}","description":"car park to entrance"}}"#, diagram_id),
        );
        assert_eq!(status, 200);
        assert_eq!(written["data"]["data"]["source"], "graph LR\n  Car-->Ramp");
        assert_eq!(written["data"]["data"]["title"], "Route");

        let (status, _) = call(&state, Method::Post, &url, r#"{"diagramNodeId":"ghost","prompt":"x"}"#);
        assert_eq!(status, 404);
    }

    #[test]
    fn test_generate_all_route() {
        let (_dir, state) = state(None);
        let report_id = new_report(&state);
        let (_, section) = call(
            &state,
            Method::Post,
            &format!("/api/reports/{}/nodes", report_id),
            r#"{"type":"section","data":{"title":"Parking"}}"#,
        );
        let section_id = section["data"]["id"].as_str().unwrap().to_string();
        let url = format!("/api/reports/{}/generate-all", report_id);

        let (status, outcome) = call(
            &state,
            Method::Post,
            &url,
            &format!(r#"{{"sectionNodeIds":["{}","ghost"]}}"#, section_id),
        );
        assert_eq!(status, 200);
        assert_eq!(outcome["data"]["generated"][0], section_id.as_str());
        assert_eq!(outcome["data"]["failed"][0]["nodeId"], "ghost");
        assert_eq!(outcome["data"]["total"], 2);

        let (status, _) = call(&state, Method::Post, &url, r#"{"sectionNodeIds":[]}"#);
        assert_eq!(status, 400);
    }
}
