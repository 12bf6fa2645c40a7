//! AI content generation
//!
//! Builds a prompt from the target node, the project's resources and
//! earlier reports, sends it through a [`ContentGenerator`], and writes the
//! answer back into the graph. Diagram nodes get Mermaid source from a
//! separate prompt, and [`generate_all`] runs a batch of sections.

use crate::config::AiConfig;
use crate::error::{ReportError, Result};
use crate::model::{ContentPayload, DiagramPayload, NodeKind, NodePayload, ReportNode};
use crate::store::{ActivityKind, NewNode, NodeUpdate, ReportStore, ResourceContext};
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const SYSTEM_PROMPT: &str = "You are a professional accessibility consultant. Generate structured, accurate report sections based only on provided project information. Never invent codes, dates, or details.";

pub const DIAGRAM_SYSTEM_PROMPT: &str =
    "You generate Mermaid diagrams only. Output pure Mermaid code, no backticks, no explanations.";

/// Written when the model answers with nothing
pub const FALLBACK_CONTENT: &str = "Unable to generate content.";

/// Diagram source stored when the model answers with nothing
pub const FALLBACK_DIAGRAM: &str = "graph TD\n    A[Start] --> B[End]";

pub const DIAGRAM_MAX_TOKENS: u32 = 500;

/// Earlier reports pulled into the prompt
pub const PREVIOUS_REPORTS: usize = 3;

/// Vertical gap between a prompt node and the content node it creates
const CREATED_CONTENT_OFFSET: f64 = 100.0;

/// What the model is asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationKind {
    /// HTML paragraphs for a report section
    #[default]
    Content,
    /// Mermaid source for a diagram node
    Diagram,
}

/// System message for a kind of request
pub fn system_prompt(kind: GenerationKind) -> &'static str {
    match kind {
        GenerationKind::Content => SYSTEM_PROMPT,
        GenerationKind::Diagram => DIAGRAM_SYSTEM_PROMPT,
    }
}

/// Everything the generator sees for one call
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationRequest {
    pub kind: GenerationKind,
    pub prompt: String,
    pub resources: Vec<ResourceContext>,
    /// Title of the enclosing section
    pub section_context: Option<String>,
    pub prior_reports_context: Option<String>,
    /// `None` uses the generator's configured default
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Produces HTML-ish text for a request
pub trait ContentGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// `[TYPE: title]` blocks, one per resource
fn resources_text(resources: &[ResourceContext]) -> String {
    resources
        .iter()
        .map(|r| {
            let label = r.resource_type.replace('_', " ").to_uppercase();
            if r.title.is_empty() {
                format!("[{}]\n{}\n", label, r.content)
            } else {
                format!("[{}: {}]\n{}\n", label, r.title, r.content)
            }
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

fn diagram_prompt(description: &str) -> String {
    format!(
        "You are a Mermaid diagram generator. Generate ONLY valid Mermaid code based on this description: \"{}\"

Rules:
- Output ONLY the Mermaid code, no markdown backticks, no explanations
- Use appropriate diagram type (flowchart, sequenceDiagram, classDiagram, etc.)
- Keep it simple and clear
- Use descriptive node labels",
        description
    )
}

/// User message sent alongside [`system_prompt`]
pub fn build_prompt(request: &GenerationRequest) -> String {
    if request.kind == GenerationKind::Diagram {
        return diagram_prompt(&request.prompt);
    }
    let section = request
        .section_context
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("\nPARENT SECTION: {}", s))
        .unwrap_or_default();
    let previous = request
        .prior_reports_context
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            format!(
                "\n\nREFERENCE: PREVIOUS REPORTS FROM THIS PROJECT (for style and structure guidance):\n{}",
                s
            )
        })
        .unwrap_or_default();

    format!(
        "You are a professional accessibility consultant writing a structured compliance report section.

{section}

USER PROMPT/INSTRUCTION: {prompt}

AVAILABLE PROJECT INFORMATION:
{resources}
{previous}

INSTRUCTIONS:
- Follow the user's prompt/instruction above
- Use ONLY information provided in the project resources above
- Reference previous reports for style and structure guidance, but generate NEW content based on current project resources
- Do NOT invent or hallucinate specific code references, dates, or details not present in the resources
- Use a professional, firm-neutral tone
- Be specific and actionable where possible
- If insufficient information is available, note that in a professional manner
- Format the output as clean HTML paragraphs (use <p> tags, no headers)

Generate the content now:",
        section = section,
        prompt = request.prompt,
        resources = resources_text(&request.resources),
        previous = previous,
    )
}

// ============================================================================
// OpenAI-compatible backend
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

/// Chat-completions client for OpenAI and compatible servers
pub struct OpenAiGenerator {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ReportError::Generation(format!("could not build HTTP client: {}", e)))?;
        let defaults = AiConfig::default();
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        })
    }

    /// Fails when the key variable named in the config is unset
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            ReportError::Generation(format!("{} is not set", config.api_key_env))
        })?;
        let mut generator = Self::new(&config.base_url, &config.model, api_key)?;
        generator.temperature = config.temperature;
        generator.max_tokens = config.max_tokens;
        Ok(generator)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl ContentGenerator for OpenAiGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let user_prompt = build_prompt(request);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(request.kind),
                },
                ChatMessage {
                    role: "user",
                    content: &user_prompt,
                },
            ],
            temperature: request.temperature.unwrap_or(self.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
        };

        tracing::debug!(
            model = %self.model,
            kind = ?request.kind,
            prompt_chars = user_prompt.len(),
            "requesting completion"
        );
        let response = self
            .client
            .post(self.chat_completions_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .map_err(|e| ReportError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().unwrap_or_default();
            return Err(ReportError::Generation(format!("HTTP {}: {}", status, text)));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| ReportError::Generation(format!("unreadable completion: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Canned generator for tests and offline runs
pub struct MockGenerator {
    response: std::result::Result<String, String>,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl MockGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: Ok(response.into()),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Every call fails with this message
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            response: Err(message.into()),
            ..Self::new("")
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().ok().and_then(|r| r.clone())
    }
}

impl ContentGenerator for MockGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }
        self.response.clone().map_err(ReportError::Generation)
    }
}

// ============================================================================
// Writing generated content into the graph
// ============================================================================

/// Request assembled for one node, before anything is sent
#[derive(Debug, Clone)]
pub struct PreparedGeneration {
    pub node: ReportNode,
    pub request: GenerationRequest,
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Gather the prompt and its context for `node_id`
pub fn prepare_generation<S: ReportStore + ?Sized>(
    store: &S,
    report_id: &str,
    node_id: &str,
    prompt_override: Option<&str>,
) -> Result<PreparedGeneration> {
    let node = store.get_node(node_id)?;
    if node.report_id != report_id {
        return Err(ReportError::not_found("node", node_id));
    }
    match node.kind {
        NodeKind::Content | NodeKind::Prompt | NodeKind::Section | NodeKind::SubSection => {}
        other => {
            return Err(ReportError::invalid(format!(
                "cannot generate content for a {} node",
                other
            )))
        }
    }
    let report = store.get_report(report_id)?;

    let parent = match node.parent_id.as_deref() {
        Some(pid) => store.get_node(pid).ok(),
        None => None,
    };
    let section_context = if node.kind.is_container() {
        node.title().map(str::to_string)
    } else {
        parent
            .as_ref()
            .filter(|p| p.kind.is_container())
            .and_then(|p| p.title().map(str::to_string))
    };

    let (stored_prompt, temperature, max_tokens) = match &node.payload {
        NodePayload::Prompt(p) => (Some(p.prompt.as_str()), p.temperature, p.max_tokens),
        NodePayload::Section(p) => (p.prompt.as_deref(), None, None),
        _ => (None, None, None),
    };
    let prompt = match non_blank(prompt_override).or(non_blank(stored_prompt)) {
        Some(p) => p.to_string(),
        None => {
            let title = section_context.clone().unwrap_or_else(|| node.label());
            format!("Generate content for the section: {}", title)
        }
    };

    let mut resources = store.list_resources(&report.project_id)?;
    if !node.linked_resource_ids.is_empty() {
        resources.retain(|r| node.linked_resource_ids.contains(&r.id));
    }

    let previous = store.previous_reports_context(&report.project_id, report_id, PREVIOUS_REPORTS)?;
    let prior_reports_context = if previous.is_empty() {
        None
    } else {
        Some(previous.join("\n\n---\n\n"))
    };

    Ok(PreparedGeneration {
        node,
        request: GenerationRequest {
            prompt,
            resources,
            section_context,
            prior_reports_context,
            temperature,
            max_tokens,
            ..Default::default()
        },
    })
}

/// Gather the Mermaid request for a diagram node. The description falls
/// back to the diagram's title.
pub fn prepare_diagram<S: ReportStore + ?Sized>(
    store: &S,
    report_id: &str,
    node_id: &str,
    description: Option<&str>,
) -> Result<PreparedGeneration> {
    let node = store.get_node(node_id)?;
    if node.report_id != report_id {
        return Err(ReportError::not_found("node", node_id));
    }
    let NodePayload::Diagram(diagram) = &node.payload else {
        return Err(ReportError::invalid(format!(
            "cannot generate a diagram for a {} node",
            node.kind
        )));
    };
    let description = non_blank(description)
        .or(non_blank(diagram.title.as_deref()))
        .ok_or_else(|| ReportError::invalid("a diagram description is required"))?
        .to_string();

    Ok(PreparedGeneration {
        request: GenerationRequest {
            kind: GenerationKind::Diagram,
            prompt: description,
            max_tokens: Some(DIAGRAM_MAX_TOKENS),
            ..Default::default()
        },
        node,
    })
}

/// Mermaid source without a surrounding ``` fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    body.strip_suffix("```").unwrap_or(body).trim()
}

fn payload_value(payload: &NodePayload) -> Result<serde_json::Value> {
    serde_json::to_value(payload).map_err(|e| ReportError::invalid(e.to_string()))
}

/// Generate text for a node and store it. Returns the node that now holds the text.
///
/// A content node is overwritten. A prompt node writes into its linked
/// content node, creating one beside it when there is none. A section or
/// sub-section gets a new child content node. Nothing is written when the
/// generator fails.
pub fn generate_content<S, G>(
    store: &S,
    generator: &G,
    report_id: &str,
    node_id: &str,
    prompt_override: Option<&str>,
) -> Result<ReportNode>
where
    S: ReportStore + ?Sized,
    G: ContentGenerator + ?Sized,
{
    let PreparedGeneration { node, request } =
        prepare_generation(store, report_id, node_id, prompt_override)?;

    let text = generator.generate(&request).inspect_err(|e| {
        tracing::error!(report_id, node_id, error = %e, "content generation failed");
    })?;
    let text = if text.trim().is_empty() {
        FALLBACK_CONTENT.to_string()
    } else {
        text
    };

    let written = match &node.payload {
        NodePayload::Content(existing) => {
            let payload = NodePayload::Content(ContentPayload {
                content: text,
                ..existing.clone()
            });
            store.update_node(
                &node.id,
                NodeUpdate {
                    data: Some(payload_value(&payload)?),
                    ai_generated: Some(true),
                    ..Default::default()
                },
            )?
        }
        NodePayload::Prompt(prompt) => {
            let linked = prompt
                .target_content_node_id
                .as_deref()
                .and_then(|id| store.get_node(id).ok())
                .filter(|n| n.kind == NodeKind::Content && n.report_id == report_id);

            let written = match linked {
                Some(target) => {
                    let existing = match &target.payload {
                        NodePayload::Content(c) => c.clone(),
                        _ => ContentPayload::default(),
                    };
                    let payload = NodePayload::Content(ContentPayload {
                        content: text,
                        source_prompt_node_id: Some(node.id.clone()),
                        ..existing
                    });
                    store.update_node(
                        &target.id,
                        NodeUpdate {
                            data: Some(payload_value(&payload)?),
                            ai_generated: Some(true),
                            ..Default::default()
                        },
                    )?
                }
                None => {
                    let payload = NodePayload::Content(ContentPayload {
                        title: prompt.title.clone(),
                        content: text,
                        source_prompt_node_id: Some(node.id.clone()),
                    });
                    let mut new_node = NewNode::from_payload(&payload)
                        .with_order(node.order)
                        .at(node.position.x, node.position.y + CREATED_CONTENT_OFFSET)
                        .generated();
                    if let Some(parent) = &node.parent_id {
                        new_node = new_node.under(parent.as_str());
                    }
                    store.create_node(report_id, new_node)?
                }
            };

            let mut prompt = prompt.clone();
            prompt.target_content_node_id = Some(written.id.clone());
            prompt.last_run_at = Some(chrono::Local::now().to_rfc3339());
            store.update_node(
                &node.id,
                NodeUpdate::payload(&NodePayload::Prompt(prompt)),
            )?;
            written
        }
        NodePayload::Section(_) | NodePayload::SubSection(_) => {
            let payload = NodePayload::content(text);
            store.create_node(
                report_id,
                NewNode::from_payload(&payload).under(node.id.as_str()).generated(),
            )?
        }
        _ => {
            return Err(ReportError::invalid(format!(
                "cannot generate content for a {} node",
                node.kind
            )))
        }
    };

    tracing::info!(
        report_id,
        node_id,
        written = %written.id,
        resources = request.resources.len(),
        "generated content"
    );
    store.log_activity(
        report_id,
        ActivityKind::AiGeneration,
        serde_json::json!({
            "nodeId": node.id,
            "targetNodeId": written.id,
            "prompt": request.prompt,
        }),
    );
    Ok(written)
}

/// Ask for Mermaid source and store it on the diagram node.
/// An empty answer stores [`FALLBACK_DIAGRAM`].
pub fn generate_diagram<S, G>(
    store: &S,
    generator: &G,
    report_id: &str,
    node_id: &str,
    description: Option<&str>,
) -> Result<ReportNode>
where
    S: ReportStore + ?Sized,
    G: ContentGenerator + ?Sized,
{
    let PreparedGeneration { node, request } =
        prepare_diagram(store, report_id, node_id, description)?;

    let reply = generator.generate(&request).inspect_err(|e| {
        tracing::error!(report_id, node_id, error = %e, "diagram generation failed");
    })?;
    let source = match strip_code_fence(&reply) {
        "" => FALLBACK_DIAGRAM.to_string(),
        code => code.to_string(),
    };
    let existing = match &node.payload {
        NodePayload::Diagram(d) => d.clone(),
        _ => DiagramPayload::default(),
    };
    let payload = NodePayload::Diagram(DiagramPayload { source, ..existing });
    let written = store.update_node(
        &node.id,
        NodeUpdate {
            data: Some(payload_value(&payload)?),
            ai_generated: Some(true),
            ..Default::default()
        },
    )?;

    tracing::info!(report_id, node_id, "generated diagram");
    store.log_activity(
        report_id,
        ActivityKind::AiGeneration,
        serde_json::json!({
            "nodeId": node.id,
            "diagram": true,
            "prompt": request.prompt,
        }),
    );
    Ok(written)
}

/// A node the batch could not generate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub node_id: String,
    pub error: String,
}

/// Result of [`generate_all`]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BatchOutcome {
    /// Requested ids that were generated, in request order
    pub generated: Vec<String>,
    pub failed: Vec<BatchFailure>,
    pub total: usize,
}

/// Sections and sub-sections of a report in document order
pub fn section_node_ids<S: ReportStore + ?Sized>(store: &S, report_id: &str) -> Result<Vec<String>> {
    let nodes = store.list_nodes(report_id)?;
    Ok(crate::graph::sequence(&nodes)
        .into_iter()
        .filter(|n| n.kind.is_container())
        .map(|n| n.id.clone())
        .collect())
}

/// Run [`generate_content`] for each node with its stored prompt.
///
/// A failing node is recorded and the batch moves on; nodes already
/// written stay written.
pub fn generate_all<S, G>(
    store: &S,
    generator: &G,
    report_id: &str,
    node_ids: &[String],
) -> Result<BatchOutcome>
where
    S: ReportStore + ?Sized,
    G: ContentGenerator + ?Sized,
{
    if node_ids.is_empty() {
        return Err(ReportError::invalid("at least one node id is required"));
    }
    store.get_report(report_id)?;

    let mut outcome = BatchOutcome {
        total: node_ids.len(),
        ..Default::default()
    };
    for node_id in node_ids {
        match generate_content(store, generator, report_id, node_id, None) {
            Ok(_) => outcome.generated.push(node_id.clone()),
            Err(e) => {
                tracing::warn!(report_id, node_id = %node_id, error = %e, "batch generation skipped node");
                outcome.failed.push(BatchFailure {
                    node_id: node_id.clone(),
                    error: e.public_message(),
                });
            }
        }
    }

    tracing::info!(
        report_id,
        generated = outcome.generated.len(),
        total = outcome.total,
        "batch generation finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::model::PromptPayload;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        db: Database,
        project_id: String,
        report_id: String,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(dir.path().join("g.db")).unwrap();
        let project = db.create_project("Library", None).unwrap();
        let report = db.create_report(&project.id, "Audit").unwrap();
        Fixture {
            _dir: dir,
            db,
            project_id: project.id,
            report_id: report.id,
        }
    }

    fn resource(kind: &str, title: &str, content: &str) -> ResourceContext {
        ResourceContext {
            id: title.to_string(),
            resource_type: kind.to_string(),
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_build_prompt_sections() {
        let request = GenerationRequest {
            prompt: "Summarise the ramps".to_string(),
            resources: vec![
                resource("note", "Visit", "Ramp gradient 1:10"),
                resource("site_photo", "", "photo.jpg"),
            ],
            section_context: Some("Entrances".to_string()),
            prior_reports_context: Some("Report: Old".to_string()),
            ..Default::default()
        };
        let prompt = build_prompt(&request);
        assert!(prompt.contains("\nPARENT SECTION: Entrances"));
        assert!(prompt.contains("USER PROMPT/INSTRUCTION: Summarise the ramps"));
        assert!(prompt.contains("[NOTE: Visit]\nRamp gradient 1:10\n\n---\n\n[SITE PHOTO]\nphoto.jpg"));
        assert!(prompt.contains("REFERENCE: PREVIOUS REPORTS FROM THIS PROJECT"));
        assert!(prompt.ends_with("Generate the content now:"));

        let bare = build_prompt(&GenerationRequest::new("x"));
        assert!(!bare.contains("PARENT SECTION"));
        assert!(!bare.contains("REFERENCE:"));
    }

    #[test]
    fn test_generate_into_content_node() {
        let f = setup();
        let node = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::content("old")))
            .unwrap();
        let generator = MockGenerator::new("<p>New text</p>");

        let written =
            generate_content(&f.db, &generator, &f.report_id, &node.id, Some("Rewrite")).unwrap();
        assert_eq!(written.id, node.id);
        assert!(written.ai_generated);
        assert_eq!(written.payload, NodePayload::content("<p>New text</p>"));
        assert_eq!(generator.last_request().unwrap().prompt, "Rewrite");

        let activity = f.db.list_activity(&f.report_id, 1).unwrap();
        assert_eq!(activity[0].activity_type, "ai_generation");
    }

    #[test]
    fn test_section_gets_child_and_default_prompt() {
        let f = setup();
        let section = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::section("Toilets")))
            .unwrap();
        let generator = MockGenerator::new("   ");

        let written = generate_content(&f.db, &generator, &f.report_id, &section.id, None).unwrap();
        assert_eq!(written.parent_id.as_deref(), Some(section.id.as_str()));
        assert_eq!(written.payload, NodePayload::content(FALLBACK_CONTENT));
        let request = generator.last_request().unwrap();
        assert_eq!(request.prompt, "Generate content for the section: Toilets");
        assert_eq!(request.section_context.as_deref(), Some("Toilets"));
    }

    #[test]
    fn test_prompt_node_creates_and_then_reuses_target() {
        let f = setup();
        let section = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::section("Lifts")))
            .unwrap();
        let prompt = NodePayload::Prompt(PromptPayload {
            prompt: "Describe the lifts".to_string(),
            temperature: Some(0.2),
            ..Default::default()
        });
        let prompt_node = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&prompt).under(section.id.as_str()))
            .unwrap();

        let generator = MockGenerator::new("<p>Two lifts</p>");
        let first = generate_content(&f.db, &generator, &f.report_id, &prompt_node.id, None).unwrap();
        assert_eq!(first.parent_id.as_deref(), Some(section.id.as_str()));
        assert!(first.ai_generated);
        let request = generator.last_request().unwrap();
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.section_context.as_deref(), Some("Lifts"));

        match f.db.get_node(&prompt_node.id).unwrap().payload {
            NodePayload::Prompt(p) => {
                assert_eq!(p.target_content_node_id.as_deref(), Some(first.id.as_str()));
                assert!(p.last_run_at.is_some());
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let second = generate_content(&f.db, &generator, &f.report_id, &prompt_node.id, None).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(generator.call_count(), 2);
    }

    #[test]
    fn test_linked_resources_narrow_context() {
        let f = setup();
        let kept = f
            .db
            .add_resource(&f.project_id, "note", "Kept", "a")
            .unwrap();
        f.db.add_resource(&f.project_id, "note", "Dropped", "b").unwrap();
        let mut new_node = NewNode::from_payload(&NodePayload::content(""));
        new_node.linked_resource_ids = vec![kept.id.clone()];
        let node = f.db.create_node(&f.report_id, new_node).unwrap();

        let prepared = prepare_generation(&f.db, &f.report_id, &node.id, None).unwrap();
        let titles: Vec<&str> = prepared.request.resources.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Kept"]);
    }

    #[test]
    fn test_failure_writes_nothing() {
        let f = setup();
        let node = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::content("keep me")))
            .unwrap();
        let generator = MockGenerator::failing("HTTP 500");
        let err = generate_content(&f.db, &generator, &f.report_id, &node.id, None).unwrap_err();
        assert!(matches!(err, ReportError::Generation(_)));
        assert_eq!(f.db.get_node(&node.id).unwrap().payload, NodePayload::content("keep me"));
    }

    #[test]
    fn test_rejects_other_kinds_and_foreign_nodes() {
        let f = setup();
        let table = f
            .db
            .create_node(&f.report_id, NewNode::new(NodeKind::Table))
            .unwrap();
        let generator = MockGenerator::new("x");
        assert!(matches!(
            generate_content(&f.db, &generator, &f.report_id, &table.id, None).unwrap_err(),
            ReportError::InvalidInput(_)
        ));

        let other = f.db.create_report(&f.project_id, "Other").unwrap();
        assert!(matches!(
            generate_content(&f.db, &generator, &other.id, &table.id, None).unwrap_err(),
            ReportError::NotFound { .. }
        ));
        assert_eq!(generator.call_count(), 0);
    }

    #[test]
    fn test_diagram_written_from_fenced_reply() {
        let f = setup();
        let diagram = NodePayload::Diagram(DiagramPayload {
            title: Some("Entry route".to_string()),
            source: String::new(),
        });
        let node = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&diagram))
            .unwrap();
        let generator = MockGenerator::new("```mermaid\ngraph LR\n  A-->B\n```");

        let written = generate_diagram(&f.db, &generator, &f.report_id, &node.id, None).unwrap();
        assert!(written.ai_generated);
        assert_eq!(
            written.payload,
            NodePayload::Diagram(DiagramPayload {
                title: Some("Entry route".to_string()),
                source: "graph LR\n  A-->B".to_string(),
            })
        );

        let request = generator.last_request().unwrap();
        assert_eq!(request.kind, GenerationKind::Diagram);
        assert_eq!(request.max_tokens, Some(DIAGRAM_MAX_TOKENS));
        assert!(build_prompt(&request).contains("based on this description: \"Entry route\""));
        assert_eq!(system_prompt(request.kind), DIAGRAM_SYSTEM_PROMPT);
        assert_eq!(f.db.list_activity(&f.report_id, 1).unwrap()[0].activity_type, "ai_generation");
    }

    #[test]
    fn test_diagram_needs_description_and_falls_back() {
        let f = setup();
        let node = f
            .db
            .create_node(&f.report_id, NewNode::new(NodeKind::Diagram))
            .unwrap();
        let generator = MockGenerator::new("  ");

        assert!(matches!(
            generate_diagram(&f.db, &generator, &f.report_id, &node.id, None).unwrap_err(),
            ReportError::InvalidInput(_)
        ));
        assert_eq!(generator.call_count(), 0);

        let written =
            generate_diagram(&f.db, &generator, &f.report_id, &node.id, Some("Evacuation flow")).unwrap();
        match written.payload {
            NodePayload::Diagram(d) => assert_eq!(d.source, FALLBACK_DIAGRAM),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_diagram_rejects_other_kinds() {
        let f = setup();
        let node = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::content("x")))
            .unwrap();
        let generator = MockGenerator::new("graph TD");
        assert!(matches!(
            generate_diagram(&f.db, &generator, &f.report_id, &node.id, Some("flow")).unwrap_err(),
            ReportError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  graph TD\n A-->B \n"), "graph TD\n A-->B");
        assert_eq!(strip_code_fence("```\ngraph TD\n```"), "graph TD");
        assert_eq!(strip_code_fence("```"), "");
    }

    #[test]
    fn test_generate_all_continues_past_failures() {
        let f = setup();
        let first = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::section("Parking")))
            .unwrap();
        let second = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::section("Toilets")))
            .unwrap();

        let ids = section_node_ids(&f.db, &f.report_id).unwrap();
        assert_eq!(ids, vec![first.id.clone(), second.id.clone()]);

        let mut requested = ids.clone();
        requested.insert(1, "ghost".to_string());
        let generator = MockGenerator::new("<p>Done</p>");
        let outcome = generate_all(&f.db, &generator, &f.report_id, &requested).unwrap();

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.generated, ids);
        assert_eq!(
            outcome.failed,
            vec![BatchFailure {
                node_id: "ghost".to_string(),
                error: "node not found: ghost".to_string(),
            }]
        );
        assert_eq!(generator.call_count(), 2);
        assert_eq!(generator.last_request().unwrap().section_context.as_deref(), Some("Toilets"));
    }

    #[test]
    fn test_generate_all_reports_generator_failures() {
        let f = setup();
        let section = f
            .db
            .create_node(&f.report_id, NewNode::from_payload(&NodePayload::section("Lifts")))
            .unwrap();
        let generator = MockGenerator::failing("HTTP 503");

        let outcome =
            generate_all(&f.db, &generator, &f.report_id, std::slice::from_ref(&section.id)).unwrap();
        assert!(outcome.generated.is_empty());
        assert_eq!(outcome.failed[0].error, "Failed to generate content");
        assert_eq!(f.db.list_nodes(&f.report_id).unwrap().len(), 3);

        assert!(matches!(
            generate_all(&f.db, &generator, &f.report_id, &[]).unwrap_err(),
            ReportError::InvalidInput(_)
        ));
    }
}
