//! Plain-text serializer

use super::blocks::{chart_rows, signature_lines, ExportBlock, ExportReport};
use super::ExportHeader;
use crate::markup;
use std::fmt::Write;

const RULE_WIDTH: usize = 60;

fn underline(text: &str, ch: char) -> String {
    let width = text.chars().count().max(1);
    std::iter::repeat(ch).take(width).collect()
}

/// Cell text on a single line
fn flatten_cell(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn join_cells(cells: &[String]) -> String {
    cells
        .iter()
        .map(|c| flatten_cell(c))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn write_table(out: &mut String, columns: &[String], rows: &[Vec<String>]) {
    let header = join_cells(columns);
    writeln!(out, "{}", header).unwrap();
    writeln!(out, "{}", underline(&header, '-')).unwrap();
    for row in rows {
        writeln!(out, "{}", join_cells(row)).unwrap();
    }
    writeln!(out).unwrap();
}

fn write_block(out: &mut String, block: &ExportBlock) {
    match block {
        ExportBlock::Heading { text, .. } => {
            writeln!(out, "\n{}\n{}", text, underline(text, '-')).unwrap();
        }
        ExportBlock::Paragraph { text } => {
            writeln!(out, "{}\n", markup::strip_markup(text)).unwrap();
        }
        ExportBlock::Table {
            title,
            columns,
            rows,
        } => {
            writeln!(out).unwrap();
            if let Some(title) = title {
                writeln!(out, "{}\n", title).unwrap();
            }
            write_table(out, columns, rows);
        }
        ExportBlock::Diagram { title, source } => {
            writeln!(out, "\n{}\n\n{}\n", title, source.trim_end()).unwrap();
        }
        ExportBlock::Checklist { title, items } => {
            if let Some(title) = title {
                writeln!(out, "{}", title).unwrap();
            }
            for (checked, text) in items {
                writeln!(out, "[{}] {}", if *checked { "x" } else { " " }, text).unwrap();
            }
            writeln!(out).unwrap();
        }
        ExportBlock::Chart {
            title,
            chart_type,
            labels,
            series,
        } => {
            let name = title.as_deref().unwrap_or("Chart");
            writeln!(out, "\n{} ({} chart)\n", name, chart_type.as_str()).unwrap();
            let (header, rows) = chart_rows(labels, series);
            write_table(out, &header, &rows);
        }
        ExportBlock::Reference {
            title,
            citation,
            url,
            standard,
        } => {
            if let Some(title) = title {
                writeln!(out, "{}", title).unwrap();
            }
            writeln!(out, "\"{}\"", citation).unwrap();
            if let Some(standard) = standard {
                writeln!(out, "Standard: {}", standard).unwrap();
            }
            if let Some(url) = url {
                writeln!(out, "{}", url).unwrap();
            }
            writeln!(out).unwrap();
        }
        ExportBlock::Signature {
            title,
            signer_name,
            signer_title,
            status,
            signed_at,
        } => {
            writeln!(out, "{}", title.as_deref().unwrap_or("Signature")).unwrap();
            for line in signature_lines(signer_name, signer_title, *status, signed_at) {
                writeln!(out, "  {}", line).unwrap();
            }
            writeln!(out).unwrap();
        }
        ExportBlock::Media {
            media_type,
            url,
            caption,
            alt_text,
        } => {
            let label = caption
                .as_deref()
                .or(alt_text.as_deref())
                .unwrap_or(media_type.as_str());
            writeln!(out, "[{}] {}: {}\n", media_type.as_str(), label, url).unwrap();
        }
    }
}

pub fn render(report: &ExportReport, header: &ExportHeader) -> String {
    let mut out = String::new();

    writeln!(out, "{}\n", report.title).unwrap();
    writeln!(out, "Project: {}", header.project_name).unwrap();
    writeln!(out, "Generated: {}\n", header.generated_at).unwrap();

    writeln!(out, "Table of Contents").unwrap();
    writeln!(out, "{}", underline("Table of Contents", '-')).unwrap();
    for (level, text) in report.headings() {
        let indent = "  ".repeat(usize::from(level.saturating_sub(1)));
        writeln!(out, "{}{}", indent, text).unwrap();
    }
    writeln!(out, "\n{}\n", "=".repeat(RULE_WIDTH)).unwrap();

    for block in &report.blocks {
        write_block(&mut out, block);
    }
    out
}
