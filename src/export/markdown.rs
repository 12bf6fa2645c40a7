//! Markdown serializer

use super::blocks::{chart_rows, signature_lines, ExportBlock, ExportReport};
use super::ExportHeader;
use crate::markup;
use crate::model::MediaType;
use std::fmt::Write;

/// Escape a cell so it cannot break the pipe table
fn escape_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn write_table(md: &mut String, columns: &[String], rows: &[Vec<String>]) {
    let header: Vec<String> = columns.iter().map(|c| escape_cell(c)).collect();
    writeln!(md, "| {} |", header.join(" | ")).unwrap();
    writeln!(md, "| {} |", vec!["---"; columns.len()].join(" | ")).unwrap();
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| escape_cell(c)).collect();
        writeln!(md, "| {} |", cells.join(" | ")).unwrap();
    }
    writeln!(md).unwrap();
}

fn write_caption(md: &mut String, title: &Option<String>) {
    if let Some(title) = title {
        writeln!(md, "**{}**\n", title).unwrap();
    }
}

/// Render one block. Every block ends with a blank line.
fn write_block(md: &mut String, block: &ExportBlock) {
    match block {
        ExportBlock::Heading { level, text } => {
            writeln!(md, "{} {}\n", "#".repeat(usize::from(*level)), text).unwrap();
        }
        ExportBlock::Paragraph { text } => {
            writeln!(md, "{}\n", markup::to_markdown(text)).unwrap();
        }
        ExportBlock::Table {
            title,
            columns,
            rows,
        } => {
            write_caption(md, title);
            write_table(md, columns, rows);
        }
        ExportBlock::Diagram { title, source } => {
            writeln!(md, "**{}**\n", title).unwrap();
            writeln!(md, "```mermaid\n{}\n```\n", source.trim_end()).unwrap();
        }
        ExportBlock::Checklist { title, items } => {
            write_caption(md, title);
            for (checked, text) in items {
                writeln!(md, "- [{}] {}", if *checked { "x" } else { " " }, text).unwrap();
            }
            writeln!(md).unwrap();
        }
        ExportBlock::Chart {
            title,
            chart_type,
            labels,
            series,
        } => {
            let name = title.as_deref().unwrap_or("Chart");
            writeln!(md, "**{}** ({} chart)\n", name, chart_type.as_str()).unwrap();
            let (header, rows) = chart_rows(labels, series);
            write_table(md, &header, &rows);
        }
        ExportBlock::Reference {
            title,
            citation,
            url,
            standard,
        } => {
            write_caption(md, title);
            writeln!(md, "> {}", citation).unwrap();
            if let Some(standard) = standard {
                writeln!(md, ">\n> Standard: {}", standard).unwrap();
            }
            if let Some(url) = url {
                writeln!(md, ">\n> <{}>", url).unwrap();
            }
            writeln!(md).unwrap();
        }
        ExportBlock::Signature {
            title,
            signer_name,
            signer_title,
            status,
            signed_at,
        } => {
            writeln!(md, "**{}**\n", title.as_deref().unwrap_or("Signature")).unwrap();
            for line in signature_lines(signer_name, signer_title, *status, signed_at) {
                writeln!(md, "- {}", line).unwrap();
            }
            writeln!(md).unwrap();
        }
        ExportBlock::Media {
            media_type,
            url,
            caption,
            alt_text,
        } => {
            if *media_type == MediaType::Image {
                let alt = alt_text.as_deref().or(caption.as_deref()).unwrap_or("");
                writeln!(md, "![{}]({})\n", alt, url).unwrap();
            } else {
                writeln!(md, "{}: {}\n", caption.as_deref().unwrap_or("Media"), url).unwrap();
            }
        }
    }
}

/// Blocks only, without the title/TOC header
pub fn render_body(blocks: &[ExportBlock]) -> String {
    let mut md = String::new();
    for block in blocks {
        write_block(&mut md, block);
    }
    md
}

/// Full Markdown document
pub fn render(report: &ExportReport, header: &ExportHeader) -> String {
    let mut md = String::new();

    writeln!(md, "# {}\n", report.title).unwrap();
    writeln!(md, "Project: {}\n", header.project_name).unwrap();
    writeln!(md, "Generated: {}\n", header.generated_at).unwrap();

    writeln!(md, "## Table of Contents\n").unwrap();
    let headings = report.headings();
    for (level, text) in &headings {
        let indent = "  ".repeat(usize::from(level.saturating_sub(1)));
        writeln!(md, "{}- {}", indent, text).unwrap();
    }
    if !headings.is_empty() {
        writeln!(md).unwrap();
    }

    md.push_str(&render_body(&report.blocks));
    md
}
