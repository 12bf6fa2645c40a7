//! Project initialization for reportgraph
//!
//! `reportgraph init` → creates .reportgraph/ with a database and a config file

use crate::db::{Database, CURRENT_SCHEMA};
use crate::error::ReportError;
use colored::Colorize;
use std::fs;
use std::path::Path;

/// Starter config; every value shown is the built-in default
pub const CONFIG_TEMPLATE: &str = r#"# reportgraph configuration
# Values shown are the defaults. Delete a line to fall back to it.

[server]
host = "127.0.0.1"
port = 3030
# Require "Authorization: Bearer <token>" on /api requests
# api_token = "change-me"

[export]
# Deepest heading written to documents (1-6)
max_heading_level = 3
# Attach parentless nodes to the closest section above them in the same column
infer_parents = false
column_tolerance = 100.0
default_format = "docx"

[ai]
base_url = "https://api.openai.com/v1"
model = "gpt-4-turbo-preview"
# Name of the environment variable holding the API key
api_key_env = "OPENAI_API_KEY"
temperature = 0.7
max_tokens = 1500
"#;

/// Initialize reportgraph in the current directory
pub fn init_project() -> Result<(), String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Could not get current directory: {}", e))?;
    init_in(&cwd)
}

/// Initialize reportgraph in `dir`
pub fn init_in(dir: &Path) -> Result<(), String> {
    println!("\n{}", "Initializing reportgraph...".cyan().bold());
    println!("   Directory: {}\n", dir.display());

    // 1. Create .reportgraph directory
    let data_dir = dir.join(".reportgraph");
    create_dir_if_missing(&data_dir)?;

    // 2. Initialize database by opening it (creates tables)
    let db_path = data_dir.join("reportgraph.db");
    if db_path.exists() {
        println!("   {} .reportgraph/reportgraph.db (already exists)", "Skipping".yellow());
    } else {
        println!("   {} .reportgraph/reportgraph.db", "Creating".green());
    }
    Database::open_at(&db_path).map_err(|e: ReportError| format!("Could not open database: {}", e))?;

    // 3. Write config.toml
    write_file_if_missing(
        &data_dir.join("config.toml"),
        CONFIG_TEMPLATE,
        ".reportgraph/config.toml",
    )?;

    // 4. Keep the database out of version control
    add_to_gitignore(dir)?;

    tracing::info!(path = %db_path.display(), schema = %CURRENT_SCHEMA, "initialized project");

    println!("\n{}", "reportgraph initialized!".green().bold());
    println!("\nNext steps:");
    println!("  1. Run {} to create a project", "reportgraph project add <name>".cyan());
    println!("  2. Run {} to start a report", "reportgraph report create <project> <title>".cyan());
    println!("  3. Run {} to serve the API", "reportgraph serve".cyan());
    println!();

    Ok(())
}

fn create_dir_if_missing(path: &Path) -> Result<(), String> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| format!("Could not create {}: {}", path.display(), e))?;
        println!("   {} {}", "Creating".green(), path.display());
    }
    Ok(())
}

fn write_file_if_missing(path: &Path, content: &str, display_name: &str) -> Result<(), String> {
    if path.exists() {
        println!("   {} {} (already exists)", "Skipping".yellow(), display_name);
    } else {
        fs::write(path, content)
            .map_err(|e| format!("Could not write {}: {}", display_name, e))?;
        println!("   {} {}", "Creating".green(), display_name);
    }
    Ok(())
}

fn add_to_gitignore(dir: &Path) -> Result<(), String> {
    let gitignore_path = dir.join(".gitignore");
    let entry = ".reportgraph/reportgraph.db";

    if gitignore_path.exists() {
        let existing = fs::read_to_string(&gitignore_path)
            .map_err(|e| format!("Could not read .gitignore: {}", e))?;

        if existing.lines().any(|line| line.trim() == entry || line.trim() == ".reportgraph/") {
            return Ok(());
        }

        let new_content = format!("{}\n\n# reportgraph database (local)\n{}\n", existing.trim_end(), entry);
        fs::write(&gitignore_path, new_content)
            .map_err(|e| format!("Could not update .gitignore: {}", e))?;
        println!("   {} .gitignore (added {})", "Updated".green(), entry);
    } else {
        let content = format!("# reportgraph database (local)\n{}\n", entry);
        fs::write(&gitignore_path, content)
            .map_err(|e| format!("Could not create .gitignore: {}", e))?;
        println!("   {} .gitignore", "Creating".green());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    #[test]
    fn test_config_template_matches_defaults() {
        let parsed: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        init_in(dir.path()).unwrap();
        init_in(dir.path()).unwrap();

        assert!(dir.path().join(".reportgraph/reportgraph.db").exists());
        assert!(dir.path().join(".reportgraph/config.toml").exists());
        let gitignore = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(gitignore.matches(".reportgraph/reportgraph.db").count(), 1);
    }
}
