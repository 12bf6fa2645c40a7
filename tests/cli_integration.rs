//! Integration tests for the reportgraph CLI
//!
//! These tests exercise the full CLI workflow using a temporary database.
//! They verify that commands work end-to-end without mocking.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run reportgraph with a specific database path, inside `dir`
fn run_reportgraph(args: &[&str], dir: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_reportgraph"))
        .args(args)
        .current_dir(dir)
        .env("REPORTGRAPH_DB_PATH", dir.join("test.db"))
        .env("NO_COLOR", "1")
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("Failed to execute reportgraph")
}

/// Helper to get stdout as string
fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Run and require success
fn ok(args: &[&str], dir: &Path) -> String {
    let output = run_reportgraph(args, dir);
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        stderr(&output)
    );
    stdout(&output)
}

/// Third word of a "Created <what> <id> ..." line
fn created_id(out: &str) -> String {
    out.lines()
        .find(|l| l.starts_with("Created"))
        .and_then(|l| l.split_whitespace().nth(2))
        .unwrap_or_else(|| panic!("no id in output: {}", out))
        .to_string()
}

/// Project plus an empty report; returns the report id
fn new_report(dir: &Path) -> String {
    let project = created_id(&ok(&["project", "add", "Harbour Station"], dir));
    created_id(&ok(&["report", "create", &project, "Access Audit"], dir))
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_reportgraph"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("reportgraph"));
    assert!(out.contains("export"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_reportgraph"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("reportgraph"));
}

// =============================================================================
// Shell Completion Tests
// =============================================================================

#[test]
fn test_completion_zsh() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let out = ok(&["completion", "zsh"], dir.path());
    assert!(
        out.contains("#compdef reportgraph"),
        "zsh completion should contain #compdef"
    );
}

#[test]
fn test_completion_bash() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let out = ok(&["completion", "bash"], dir.path());
    assert!(
        out.contains("_reportgraph"),
        "bash completion should contain _reportgraph function"
    );
}

#[test]
fn test_completion_fish() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let out = ok(&["completion", "fish"], dir.path());
    assert!(out.contains("complete -c reportgraph"));
}

// =============================================================================
// Projects and Reports
// =============================================================================

#[test]
fn test_init_creates_data_dir() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let out = ok(&["init"], dir.path());
    assert!(out.contains("reportgraph initialized!"));
    assert!(dir.path().join(".reportgraph/config.toml").exists());
    assert!(dir.path().join(".reportgraph/reportgraph.db").exists());
}

#[test]
fn test_projects_and_reports() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let project = created_id(&ok(&["project", "add", "Museum", "-c", "City Council"], dir.path()));

    let out = ok(&["project", "list"], dir.path());
    assert!(out.contains("Museum (City Council)"));

    let report = created_id(&ok(&["report", "create", &project, "Entrances"], dir.path()));
    let out = ok(&["report", "list", &project], dir.path());
    assert!(out.contains("Entrances"));
    assert!(out.contains("[draft]"));

    let out = ok(&["report", "status", &report, "in_review"], dir.path());
    assert!(out.contains("in_review"));

    let output = run_reportgraph(&["report", "status", &report, "shipped"], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown status"));
}

#[test]
fn test_report_for_missing_project_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let output = run_reportgraph(&["report", "create", "nope", "Title"], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("project not found: nope"));
}

// =============================================================================
// Node CRUD Tests
// =============================================================================

#[test]
fn test_add_and_list_nodes() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());

    let section = created_id(&ok(
        &["node", "add", &report, "-t", "section", "--title", "Findings"],
        dir.path(),
    ));
    ok(
        &["node", "add", &report, "-t", "content", "-c", "Found 3 issues.", "-p", &section],
        dir.path(),
    );

    let out = ok(&["node", "list", &report], dir.path());
    assert!(out.contains("Findings"));
    assert!(out.contains("content"));
    assert!(!out.contains("start"), "markers are not listed: {}", out);

    let out = ok(&["outline", &report], dir.path());
    assert!(out.contains("Access Audit"));
    assert!(out.contains("section Findings"));
}

#[test]
fn test_sub_section_without_section_parent_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    let output = run_reportgraph(
        &["node", "add", &report, "-t", "sub_section", "--title", "Orphan"],
        dir.path(),
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("sub_section"));
}

#[test]
fn test_update_move_and_delete() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    let a = created_id(&ok(&["node", "add", &report, "-t", "section", "--title", "Alpha"], dir.path()));
    let b = created_id(&ok(&["node", "add", &report, "-t", "section", "--title", "Beta"], dir.path()));

    ok(&["node", "update", &a, "--title", "Alpha Prime"], dir.path());

    // Unknown id rolls back the whole batch
    let output = run_reportgraph(
        &["node", "move", &report, &format!("{}=10", a), "ghost=1"],
        dir.path(),
    );
    assert!(!output.status.success());

    ok(&["node", "move", &report, &format!("{}=2", a), &format!("{}=1", b)], dir.path());
    let out = ok(&["node", "list", &report], dir.path());
    let beta = out.find("Beta").expect("Beta listed");
    let alpha = out.find("Alpha Prime").expect("Alpha listed");
    assert!(beta < alpha, "Beta should come first: {}", out);

    let out = ok(&["node", "delete", &a], dir.path());
    assert!(out.contains("Deleted 1 nodes"));
}

// =============================================================================
// Templates
// =============================================================================

#[test]
fn test_template_list_and_apply() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let out = ok(&["template", "list"], dir.path());
    assert!(out.contains("structural-integrity"));
    assert!(out.contains("executive-summary"));

    let report = new_report(dir.path());
    let out = ok(&["template", "apply", &report, "site-inspection"], dir.path());
    assert!(out.contains("Added 15 nodes"));

    let out = ok(&["outline", &report], dir.path());
    assert!(out.contains("Inspection Details"));
    assert!(out.contains("Reviewer Signature"));

    let out = ok(&["template", "list", "--category", "safety"], dir.path());
    assert!(out.contains("safety-incident"));
    assert!(!out.contains("structural-integrity"));

    let output = run_reportgraph(&["template", "apply", &report, "nope"], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("template not found"));
}

// =============================================================================
// Export
// =============================================================================

#[test]
fn test_export_markdown_to_stdout() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    let section = created_id(&ok(
        &["node", "add", &report, "-t", "section", "--title", "Findings"],
        dir.path(),
    ));
    ok(
        &["node", "add", &report, "-t", "content", "-c", "Found 3 issues.", "-p", &section],
        dir.path(),
    );

    let out = ok(&["export", &report, "-f", "md"], dir.path());
    assert!(out.starts_with("# Access Audit\n"));
    assert!(out.contains("Project: Harbour Station"));
    assert!(out.contains("## Table of Contents"));
    assert!(out.ends_with("# Findings\n\nFound 3 issues.\n\n"), "got: {}", out);

    let out = ok(&["activity", &report], dir.path());
    assert!(out.contains("exported"));
}

#[test]
fn test_export_empty_report_every_format() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());

    for (format, magic) in [("docx", &b"PK"[..]), ("pdf", &b"%PDF"[..])] {
        let target = dir.path().join(format!("out.{}", format));
        ok(
            &["export", &report, "-f", format, "-o", target.to_str().unwrap()],
            dir.path(),
        );
        let bytes = std::fs::read(&target).unwrap();
        assert!(bytes.starts_with(magic), "{} has wrong magic", format);
    }

    let out = ok(&["export", &report, "-f", "txt"], dir.path());
    assert!(out.contains("Table of Contents"));
}

#[test]
fn test_export_binary_defaults_to_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    let output = run_reportgraph(&["export", &report, "-f", "docx"], dir.path());
    assert!(output.status.success(), "export failed: {}", stderr(&output));
    assert!(output.stdout.is_empty());
    assert!(dir.path().join(format!("report-{}.docx", report)).exists());
}

#[test]
fn test_export_unknown_format_fails() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    let output = run_reportgraph(&["export", &report, "-f", "odt"], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unsupported export format: odt"));
}

// =============================================================================
// Generation
// =============================================================================

#[test]
fn test_generate_dry_run_prints_prompt() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let project = created_id(&ok(&["project", "add", "Library"], dir.path()));
    ok(
        &["resource", "add", &project, "-t", "note", "--title", "Visit", "-c", "Ramp at 1:10"],
        dir.path(),
    );
    let report = created_id(&ok(&["report", "create", &project, "Audit"], dir.path()));
    let section = created_id(&ok(
        &["node", "add", &report, "-t", "section", "--title", "Entrances"],
        dir.path(),
    ));

    let out = ok(&["generate", &report, &section, "--dry-run"], dir.path());
    assert!(out.contains("USER PROMPT/INSTRUCTION: Generate content for the section: Entrances"));
    assert!(out.contains("[NOTE: Visit]\nRamp at 1:10"));
}

#[test]
fn test_generate_without_key_fails_cleanly() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    let section = created_id(&ok(
        &["node", "add", &report, "-t", "section", "--title", "Entrances"],
        dir.path(),
    ));
    let output = run_reportgraph(&["generate", &report, &section], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("OPENAI_API_KEY is not set"));
}

#[test]
fn test_generate_diagram_dry_run_uses_mermaid_prompt() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    let diagram = created_id(&ok(
        &["node", "add", &report, "-t", "diagram", "--title", "Route"],
        dir.path(),
    ));

    let out = ok(
        &["generate", &report, &diagram, "-p", "car park to entrance", "--dry-run"],
        dir.path(),
    );
    assert!(out.contains("Mermaid diagram generator"));
    assert!(out.contains("\"car park to entrance\""));
}

#[test]
fn test_generate_all_without_key_fails_cleanly() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let report = new_report(dir.path());
    ok(
        &["node", "add", &report, "-t", "section", "--title", "Parking"],
        dir.path(),
    );

    let output = run_reportgraph(&["generate", &report, "--all"], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("OPENAI_API_KEY is not set"));

    let output = run_reportgraph(&["generate", &report, "a", "b"], dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("--all"));
}
