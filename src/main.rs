use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use reportgraph::export::{self, ExportFormat, ExportOptions};
use reportgraph::generate::{self, OpenAiGenerator};
use reportgraph::graph::{self, TreeNode};
use reportgraph::model::{NodeKind, NodePayload};
use reportgraph::serve::{self, ServerState};
use reportgraph::store::{NewNode, NodeOrder, NodeUpdate, ReportStore};
use reportgraph::{init, templates, Config, Database, ReportError, Result};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "reportgraph")]
#[command(author, version, about = "Node-graph report builder with docx, pdf, markdown and text export")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .reportgraph/ with a database and config in the current directory
    Init,

    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Manage reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Manage project resources used as generation context
    Resource {
        #[command(subcommand)]
        action: ResourceAction,
    },

    /// Manage report nodes
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },

    /// Print a report's node tree in document order
    Outline {
        report_id: String,
    },

    /// Built-in report templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Generate content for a node with the configured model. Diagram nodes get Mermaid source.
    Generate {
        report_id: String,

        /// Node to generate; with --all, any number of nodes
        #[arg(required_unless_present = "all")]
        node_ids: Vec<String>,

        /// Instruction to use instead of the node's stored prompt (diagram description for diagrams)
        #[arg(short, long, conflicts_with = "all")]
        prompt: Option<String>,

        /// Generate each listed node, or every section when none are listed, continuing past failures
        #[arg(long)]
        all: bool,

        /// Print the assembled prompt without calling the model
        #[arg(long, conflicts_with = "all")]
        dry_run: bool,
    },

    /// Export a report as docx, pdf, markdown or txt
    Export {
        report_id: String,

        /// Output format (default from config, normally docx)
        #[arg(short, long)]
        format: Option<String>,

        /// Output file. Text formats default to stdout, binary formats to report-<id>.<ext>
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the activity log of a report
    Activity {
        report_id: String,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Start the HTTP API
    Serve {
        /// Port to listen on (default from config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (default from config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectAction {
    /// Create a project
    Add {
        name: String,

        #[arg(short, long)]
        client: Option<String>,
    },
    /// List projects
    List,
}

#[derive(Subcommand, Debug)]
enum ReportAction {
    /// Create a report (start and end markers are added automatically)
    Create { project_id: String, title: String },
    /// List the reports of a project
    List { project_id: String },
    /// Set status: draft, in_review, approved or published
    Status { report_id: String, status: String },
}

#[derive(Subcommand, Debug)]
enum ResourceAction {
    /// Add a resource to a project
    Add {
        project_id: String,

        /// note, pdf, image, table, link or other
        #[arg(short = 't', long = "type", default_value = "note")]
        resource_type: String,

        #[arg(long, default_value = "")]
        title: String,

        /// Inline content
        #[arg(short, long, conflicts_with = "file")]
        content: Option<String>,

        /// Read content from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// List a project's resources
    List { project_id: String },
}

#[derive(Subcommand, Debug)]
enum NodeAction {
    /// Add a node to a report
    Add {
        report_id: String,

        /// section, sub_section, content, prompt, table, diagram, checklist, chart, reference, signature, media
        #[arg(short = 't', long = "type")]
        kind: String,

        #[arg(long)]
        title: Option<String>,

        /// Body text: content HTML, prompt instruction or diagram source
        #[arg(short, long)]
        content: Option<String>,

        /// Full payload as JSON
        #[arg(short, long)]
        data: Option<String>,

        #[arg(short, long)]
        parent: Option<String>,

        #[arg(short, long)]
        order: Option<i64>,

        #[arg(long)]
        color: Option<String>,
    },
    /// List a report's nodes in document order
    List { report_id: String },
    /// Change fields of a node
    Update {
        node_id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        content: Option<String>,

        /// Replace the whole payload with this JSON
        #[arg(short, long, conflicts_with_all = ["title", "content"])]
        data: Option<String>,

        #[arg(short, long, conflicts_with = "detach")]
        parent: Option<String>,

        /// Make the node a root
        #[arg(long)]
        detach: bool,

        #[arg(short, long)]
        order: Option<i64>,

        #[arg(long)]
        color: Option<String>,
    },
    /// Set the order of several nodes at once: ID=ORDER ... (all or nothing)
    Move {
        report_id: String,

        #[arg(required = true)]
        moves: Vec<String>,
    },
    /// Delete a node and everything nested under it
    Delete { node_id: String },
}

#[derive(Subcommand, Debug)]
enum TemplateAction {
    /// List built-in templates
    List {
        /// Only templates in this category, e.g. safety
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Add a template's nodes to a report
    Apply { report_id: String, template_id: String },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_env("REPORTGRAPH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(format!("reportgraph={}", default_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();

    // The server logs each request; one-shot commands only surface problems
    let default_level = match cli.command {
        Command::Serve { .. } => "info",
        _ => "warn",
    };
    init_tracing(default_level);

    let config = Config::load();

    let result = match cli.command {
        Command::Init => {
            if let Err(e) = init::init_project() {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "reportgraph", &mut io::stdout());
            Ok(())
        }
        Command::Serve { port, host } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            match Database::open() {
                Ok(db) => {
                    if let Err(e) = serve::start_server(ServerState::new(db, config)) {
                        eprintln!("{} {}", "Server error:".red().bold(), e);
                        std::process::exit(1);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        command => Database::open().and_then(|db| run(&db, &config, command)),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(db: &Database, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Project { action } => match action {
            ProjectAction::Add { name, client } => {
                let project = db.create_project(&name, client.as_deref())?;
                println!("{} project {} {}", "Created".green(), project.id, project.name.bold());
            }
            ProjectAction::List => {
                let projects = db.list_projects()?;
                if projects.is_empty() {
                    println!("No projects yet. Create one with {}", "reportgraph project add <name>".cyan());
                }
                for p in projects {
                    let client = p.client.map(|c| format!(" ({})", c)).unwrap_or_default();
                    println!("{}  {}{}", p.id.dimmed(), p.name.bold(), client);
                }
            }
        },

        Command::Report { action } => match action {
            ReportAction::Create { project_id, title } => {
                let report = db.create_report(&project_id, &title)?;
                println!("{} report {} {}", "Created".green(), report.id, report.title.bold());
            }
            ReportAction::List { project_id } => {
                for r in db.list_reports(&project_id)? {
                    println!(
                        "{}  {}  [{}]  {}",
                        r.id.dimmed(),
                        r.title.bold(),
                        r.status.cyan(),
                        &r.created_at[..r.created_at.len().min(10)]
                    );
                }
            }
            ReportAction::Status { report_id, status } => {
                let report = db.update_report_status(&report_id, &status)?;
                println!("{} {} is now {}", "Updated".green(), report.title, report.status.cyan());
            }
        },

        Command::Resource { action } => match action {
            ResourceAction::Add {
                project_id,
                resource_type,
                title,
                content,
                file,
            } => {
                let content = match (content, file) {
                    (Some(c), _) => c,
                    (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
                        ReportError::invalid(format!("could not read {}: {}", path.display(), e))
                    })?,
                    (None, None) => {
                        return Err(ReportError::invalid("either --content or --file is required"))
                    }
                };
                let resource = db.add_resource(&project_id, &resource_type, &title, &content)?;
                println!("{} resource {} [{}]", "Added".green(), resource.id, resource.resource_type);
            }
            ResourceAction::List { project_id } => {
                for r in db.list_project_resources(&project_id)? {
                    println!(
                        "{}  [{}] {}  ({} chars)",
                        r.id.dimmed(),
                        r.resource_type.cyan(),
                        r.title.bold(),
                        r.content.chars().count()
                    );
                }
            }
        },

        Command::Node { action } => run_node(db, action)?,

        Command::Outline { report_id } => {
            let summary = db.get_report(&report_id)?;
            let nodes = db.list_nodes(&report_id)?;
            let forest = graph::build_tree_with(&nodes, &ExportOptions::from(&config.export).tree);
            println!("{} {}", summary.title.bold(), format!("({})", summary.project_name).dimmed());
            for root in &forest.roots {
                print_tree(root, 0);
            }
        }

        Command::Template { action } => match action {
            TemplateAction::List { category } => {
                let catalogue = match category.as_deref() {
                    Some(category) => templates::templates_in_category(category),
                    None => templates::builtin_templates(),
                };
                if catalogue.is_empty() {
                    println!("No templates in that category");
                }
                for t in catalogue {
                    println!(
                        "{}  {}  [{}]  {} nodes",
                        t.id.cyan(),
                        t.name.bold(),
                        t.category,
                        t.node_count()
                    );
                    println!("    {}", t.description.dimmed());
                }
            }
            TemplateAction::Apply {
                report_id,
                template_id,
            } => {
                let created = templates::apply_template_by_id(db, &report_id, &template_id)?;
                println!("{} {} nodes from {}", "Added".green(), created.len(), template_id.cyan());
            }
        },

        Command::Generate {
            report_id,
            node_ids,
            prompt,
            all,
            dry_run,
        } => {
            if all {
                return run_generate_all(db, config, &report_id, node_ids);
            }
            let [node_id] = node_ids.as_slice() else {
                return Err(ReportError::invalid(
                    "pass a single node id, or --all to generate several",
                ));
            };
            let is_diagram = db.get_node(node_id)?.kind == NodeKind::Diagram;

            if dry_run {
                let prepared = if is_diagram {
                    generate::prepare_diagram(db, &report_id, node_id, prompt.as_deref())?
                } else {
                    generate::prepare_generation(db, &report_id, node_id, prompt.as_deref())?
                };
                println!("{}", generate::build_prompt(&prepared.request));
                return Ok(());
            }
            let generator = OpenAiGenerator::from_config(&config.ai)?;
            eprintln!("{} with {}...", "Generating".cyan(), generator.model());
            let node = if is_diagram {
                generate::generate_diagram(db, &generator, &report_id, node_id, prompt.as_deref())?
            } else {
                generate::generate_content(db, &generator, &report_id, node_id, prompt.as_deref())?
            };
            println!("{} node {}", "Wrote".green(), node.id);
        }

        Command::Export {
            report_id,
            format,
            output,
        } => {
            let format: ExportFormat = format
                .as_deref()
                .unwrap_or(&config.export.default_format)
                .parse()?;
            let artifact =
                export::export_report(db, &report_id, format, &ExportOptions::from(&config.export))?;

            let target = match output {
                Some(path) => Some(path),
                None if format.is_binary() => Some(PathBuf::from(&artifact.file_name)),
                None => None,
            };
            match target {
                Some(path) => {
                    std::fs::write(&path, &artifact.bytes)?;
                    eprintln!(
                        "{} {} ({} bytes)",
                        "Exported".green(),
                        path.display(),
                        artifact.bytes.len()
                    );
                }
                None => {
                    io::stdout().write_all(&artifact.bytes)?;
                }
            }
        }

        Command::Activity { report_id, limit } => {
            db.get_report_row(&report_id)?;
            for a in db.list_activity(&report_id, limit)? {
                println!(
                    "{}  {}  {}",
                    a.created_at.dimmed(),
                    a.activity_type.cyan(),
                    a.details.unwrap_or_default()
                );
            }
        }

        Command::Init | Command::Serve { .. } | Command::Completion { .. } => {}
    }
    Ok(())
}

/// Batch generation; fails only when no node could be generated
fn run_generate_all(db: &Database, config: &Config, report_id: &str, node_ids: Vec<String>) -> Result<()> {
    db.get_report(report_id)?;
    let targets = if node_ids.is_empty() {
        generate::section_node_ids(db, report_id)?
    } else {
        node_ids
    };
    if targets.is_empty() {
        println!("No sections to generate");
        return Ok(());
    }

    let generator = OpenAiGenerator::from_config(&config.ai)?;
    eprintln!(
        "{} {} nodes with {}...",
        "Generating".cyan(),
        targets.len(),
        generator.model()
    );
    let outcome = generate::generate_all(db, &generator, report_id, &targets)?;
    for failure in &outcome.failed {
        eprintln!("{} {}: {}", "Failed".red(), failure.node_id, failure.error);
    }
    println!(
        "{} {} of {} nodes",
        "Generated".green(),
        outcome.generated.len(),
        outcome.total
    );
    if outcome.generated.is_empty() {
        return Err(ReportError::Generation("no node could be generated".to_string()));
    }
    Ok(())
}

/// Payload JSON from `--data`, then `--title` and `--content` on top
fn build_payload(
    kind: NodeKind,
    base: serde_json::Value,
    title: Option<String>,
    content: Option<String>,
) -> Result<serde_json::Value> {
    let mut payload = NodePayload::from_value(kind, base)?;
    if let Some(title) = title {
        payload.set_title(title);
    }
    if let Some(text) = content {
        match &mut payload {
            NodePayload::Content(p) => p.content = text,
            NodePayload::Prompt(p) => p.prompt = text,
            NodePayload::Diagram(p) => p.source = text,
            _ => {
                return Err(ReportError::invalid(format!(
                    "--content does not apply to {} nodes",
                    kind
                )))
            }
        }
    }
    serde_json::to_value(&payload).map_err(|e| ReportError::invalid(e.to_string()))
}

fn parse_json(data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data).map_err(|e| ReportError::invalid(format!("--data is not valid JSON: {}", e)))
}

fn run_node(db: &Database, action: NodeAction) -> Result<()> {
    match action {
        NodeAction::Add {
            report_id,
            kind,
            title,
            content,
            data,
            parent,
            order,
            color,
        } => {
            let kind: NodeKind = kind.parse()?;
            let base = match data {
                Some(d) => parse_json(&d)?,
                None => serde_json::Value::Null,
            };
            let mut node = NewNode::new(kind).with_data(build_payload(kind, base, title, content)?);
            node.parent_id = parent;
            node.order = order;
            node.color = color;
            let created = db.create_node(&report_id, node)?;
            println!(
                "{} {} {} {}",
                "Created".green(),
                created.kind,
                created.id,
                created.label().bold()
            );
        }
        NodeAction::List { report_id } => {
            let nodes = db.list_nodes(&report_id)?;
            for node in graph::sequence(&nodes) {
                let parent = node
                    .parent_id
                    .as_deref()
                    .map(|p| format!(" <- {}", p))
                    .unwrap_or_default();
                println!(
                    "{:>4}  {:<12} {}  {}{}",
                    node.order,
                    node.kind.as_str().cyan(),
                    node.id.dimmed(),
                    node.label(),
                    parent.dimmed()
                );
            }
        }
        NodeAction::Update {
            node_id,
            title,
            content,
            data,
            parent,
            detach,
            order,
            color,
        } => {
            let mut update = NodeUpdate {
                order,
                color: color.map(Some),
                ..Default::default()
            };
            if let Some(d) = data {
                update.data = Some(parse_json(&d)?);
            } else if title.is_some() || content.is_some() {
                let existing = db.get_node(&node_id)?;
                let base = serde_json::to_value(&existing.payload)
                    .map_err(|e| ReportError::invalid(e.to_string()))?;
                update.data = Some(build_payload(existing.kind, base, title, content)?);
            }
            if detach {
                update.parent_id = Some(None);
            } else if let Some(p) = parent {
                update.parent_id = Some(Some(p));
            }
            if update.is_empty() {
                return Err(ReportError::invalid("nothing to update"));
            }
            let node = db.update_node(&node_id, update)?;
            println!("{} {} {}", "Updated".green(), node.id, node.label().bold());
        }
        NodeAction::Move { report_id, moves } => {
            let orders = moves
                .iter()
                .map(String::as_str)
                .map(parse_move)
                .collect::<Result<Vec<_>>>()?;
            db.reorder_nodes(&report_id, &orders)?;
            println!("{} {} nodes", "Reordered".green(), orders.len());
        }
        NodeAction::Delete { node_id } => {
            let removed = db.delete_node(&node_id)?;
            println!("{} {} nodes", "Deleted".green(), removed);
        }
    }
    Ok(())
}

/// `ID=ORDER`
fn parse_move(arg: &str) -> Result<NodeOrder> {
    let (id, order) = arg
        .rsplit_once('=')
        .ok_or_else(|| ReportError::invalid(format!("expected ID=ORDER, got '{}'", arg)))?;
    let order = order
        .trim()
        .parse()
        .map_err(|_| ReportError::invalid(format!("order must be an integer in '{}'", arg)))?;
    Ok(NodeOrder {
        id: id.trim().to_string(),
        order,
    })
}

fn print_tree(tree: &TreeNode, depth: usize) {
    let node = &tree.node;
    if node.kind.is_marker() {
        return;
    }
    let label = if node.kind.is_container() {
        node.label().bold().to_string()
    } else {
        node.label()
    };
    println!(
        "{}{} {}  {}",
        "  ".repeat(depth + 1),
        node.kind.as_str().cyan(),
        label,
        node.id.dimmed()
    );
    for child in &tree.children {
        print_tree(child, depth + 1);
    }
}
