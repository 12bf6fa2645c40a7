//! Word (OOXML) serializer
//!
//! Writes the minimum package Word needs: content types, the package
//! relationship, the document body and a style sheet with Title and
//! Heading1..6. The archive is assembled in memory.

use super::blocks::{chart_rows, signature_lines, ExportBlock, ExportReport};
use super::ExportHeader;
use crate::error::Result;
use crate::markup::{self, InlineRun};
use crate::model::MediaType;
use std::fmt::Write as _;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/>
<Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/>
</Types>"#;

const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/>
</Relationships>"#;

const DOCUMENT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>"#;

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Heading sizes in half-points, Heading1 first
const HEADING_SIZES: [u32; 6] = [32, 28, 26, 24, 22, 22];

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            // Control characters are not allowed in XML 1.0
            c if (c as u32) < 0x20 && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

fn styles_xml() -> String {
    let mut xml = String::new();
    write!(
        xml,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:styles xmlns:w="{}">"#,
        W_NS
    )
    .unwrap();
    xml.push_str(
        r#"<w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:pPr><w:spacing w:after="160"/></w:pPr><w:rPr><w:sz w:val="22"/></w:rPr></w:style>"#,
    );
    xml.push_str(
        r#"<w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:pPr><w:spacing w:after="240"/></w:pPr><w:rPr><w:b/><w:sz w:val="48"/></w:rPr></w:style>"#,
    );
    for (i, size) in HEADING_SIZES.iter().enumerate() {
        let level = i + 1;
        write!(
            xml,
            r#"<w:style w:type="paragraph" w:styleId="Heading{level}"><w:name w:val="heading {level}"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:pPr><w:keepNext/><w:spacing w:before="240" w:after="120"/><w:outlineLvl w:val="{outline}"/></w:pPr><w:rPr><w:b/><w:sz w:val="{size}"/></w:rPr></w:style>"#,
            level = level,
            outline = i,
            size = size
        )
        .unwrap();
    }
    xml.push_str(
        r#"<w:style w:type="table" w:styleId="TableGrid"><w:name w:val="Table Grid"/><w:tblPr><w:tblBorders><w:top w:val="single" w:sz="4"/><w:left w:val="single" w:sz="4"/><w:bottom w:val="single" w:sz="4"/><w:right w:val="single" w:sz="4"/><w:insideH w:val="single" w:sz="4"/><w:insideV w:val="single" w:sz="4"/></w:tblBorders></w:tblPr></w:style>"#,
    );
    xml.push_str("</w:styles>");
    xml
}

#[derive(Clone, Copy, Default)]
struct RunStyle {
    bold: bool,
    italic: bool,
    mono: bool,
}

fn run(xml: &mut String, text: &str, style: RunStyle) {
    xml.push_str("<w:r>");
    if style.bold || style.italic || style.mono {
        xml.push_str("<w:rPr>");
        if style.mono {
            xml.push_str(r#"<w:rFonts w:ascii="Courier New" w:hAnsi="Courier New"/>"#);
        }
        if style.bold {
            xml.push_str("<w:b/>");
        }
        if style.italic {
            xml.push_str("<w:i/>");
        }
        xml.push_str("</w:rPr>");
    }
    write!(xml, r#"<w:t xml:space="preserve">{}</w:t></w:r>"#, escape_xml(text)).unwrap();
}

fn paragraph(xml: &mut String, style: Option<&str>, text: &str, run_style: RunStyle) {
    xml.push_str("<w:p>");
    if let Some(style) = style {
        write!(xml, r#"<w:pPr><w:pStyle w:val="{}"/></w:pPr>"#, style).unwrap();
    }
    if !text.is_empty() {
        run(xml, text, run_style);
    }
    xml.push_str("</w:p>");
}

fn plain(xml: &mut String, text: &str) {
    paragraph(xml, None, text, RunStyle::default());
}

fn rich_paragraph(xml: &mut String, bullet: bool, runs: &[InlineRun]) {
    xml.push_str("<w:p>");
    if bullet {
        xml.push_str(r#"<w:pPr><w:ind w:left="360" w:hanging="360"/></w:pPr>"#);
        run(xml, "\u{2022}\t", RunStyle::default());
    }
    for r in runs {
        run(
            xml,
            &r.text,
            RunStyle {
                bold: r.bold,
                italic: r.italic,
                mono: false,
            },
        );
    }
    xml.push_str("</w:p>");
}

fn page_break(xml: &mut String) {
    xml.push_str(r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#);
}

fn table(xml: &mut String, columns: &[String], rows: &[Vec<String>]) {
    xml.push_str(r#"<w:tbl><w:tblPr><w:tblStyle w:val="TableGrid"/><w:tblW w:w="5000" w:type="pct"/></w:tblPr><w:tblGrid>"#);
    let width = if columns.is_empty() {
        0
    } else {
        9000 / columns.len()
    };
    for _ in columns {
        write!(xml, r#"<w:gridCol w:w="{}"/>"#, width).unwrap();
    }
    xml.push_str("</w:tblGrid>");

    let header_style = RunStyle {
        bold: true,
        ..Default::default()
    };
    table_row(xml, columns, header_style);
    for row in rows {
        table_row(xml, row, RunStyle::default());
    }
    xml.push_str("</w:tbl>");
    // Word needs a paragraph between a table and whatever follows
    plain(xml, "");
}

fn table_row(xml: &mut String, cells: &[String], style: RunStyle) {
    xml.push_str("<w:tr>");
    for cell in cells {
        xml.push_str("<w:tc>");
        paragraph(xml, None, cell, style);
        xml.push_str("</w:tc>");
    }
    xml.push_str("</w:tr>");
}

fn caption(xml: &mut String, title: &Option<String>) {
    if let Some(title) = title {
        paragraph(
            xml,
            None,
            title,
            RunStyle {
                bold: true,
                ..Default::default()
            },
        );
    }
}

fn write_block(xml: &mut String, block: &ExportBlock) {
    let bold = RunStyle {
        bold: true,
        ..Default::default()
    };
    match block {
        ExportBlock::Heading { level, text } => {
            let style = format!("Heading{}", (*level).clamp(1, 6));
            paragraph(xml, Some(&style), text, RunStyle::default());
        }
        ExportBlock::Paragraph { text } => {
            for line in markup::inline_lines(text) {
                rich_paragraph(xml, line.bullet, &line.runs);
            }
        }
        ExportBlock::Table {
            title,
            columns,
            rows,
        } => {
            caption(xml, title);
            table(xml, columns, rows);
        }
        ExportBlock::Diagram { title, source } => {
            paragraph(xml, Some("Heading3"), title, RunStyle::default());
            let mono = RunStyle {
                mono: true,
                ..Default::default()
            };
            for line in source.lines() {
                paragraph(xml, None, line, mono);
            }
        }
        ExportBlock::Checklist { title, items } => {
            caption(xml, title);
            for (checked, text) in items {
                let mark = if *checked { "\u{2611}" } else { "\u{2610}" };
                plain(xml, &format!("{} {}", mark, text));
            }
        }
        ExportBlock::Chart {
            title,
            chart_type,
            labels,
            series,
        } => {
            let name = title.as_deref().unwrap_or("Chart");
            paragraph(xml, None, &format!("{} ({} chart)", name, chart_type.as_str()), bold);
            let (header, rows) = chart_rows(labels, series);
            table(xml, &header, &rows);
        }
        ExportBlock::Reference {
            title,
            citation,
            url,
            standard,
        } => {
            caption(xml, title);
            paragraph(
                xml,
                None,
                citation,
                RunStyle {
                    italic: true,
                    ..Default::default()
                },
            );
            if let Some(standard) = standard {
                plain(xml, &format!("Standard: {}", standard));
            }
            if let Some(url) = url {
                plain(xml, url);
            }
        }
        ExportBlock::Signature {
            title,
            signer_name,
            signer_title,
            status,
            signed_at,
        } => {
            paragraph(xml, None, title.as_deref().unwrap_or("Signature"), bold);
            for line in signature_lines(signer_name, signer_title, *status, signed_at) {
                plain(xml, &line);
            }
        }
        ExportBlock::Media {
            media_type,
            url,
            caption: media_caption,
            alt_text,
        } => {
            let label = media_caption
                .as_deref()
                .or(alt_text.as_deref())
                .unwrap_or(if *media_type == MediaType::Image {
                    "Image"
                } else {
                    "Media"
                });
            plain(xml, &format!("{}: {}", label, url));
        }
    }
}

/// `word/document.xml`
pub fn document_xml(report: &ExportReport, header: &ExportHeader) -> String {
    let mut xml = String::new();
    write!(
        xml,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{}"><w:body>"#,
        W_NS
    )
    .unwrap();

    paragraph(&mut xml, Some("Title"), &report.title, RunStyle::default());
    plain(&mut xml, &format!("Project: {}", header.project_name));
    plain(&mut xml, &format!("Generated: {}", header.generated_at));

    paragraph(&mut xml, Some("Heading1"), "Table of Contents", RunStyle::default());
    for (level, text) in report.headings() {
        xml.push_str("<w:p>");
        let indent = 360 * u32::from(level.saturating_sub(1));
        if indent > 0 {
            write!(xml, r#"<w:pPr><w:ind w:left="{}"/></w:pPr>"#, indent).unwrap();
        }
        run(&mut xml, text, RunStyle::default());
        xml.push_str("</w:p>");
    }
    page_break(&mut xml);

    for block in &report.blocks {
        write_block(&mut xml, block);
    }

    xml.push_str(r#"<w:sectPr><w:pgSz w:w="11906" w:h="16838"/><w:pgMar w:top="1440" w:right="1440" w:bottom="1440" w:left="1440" w:header="708" w:footer="708" w:gutter="0"/></w:sectPr>"#);
    xml.push_str("</w:body></w:document>");
    xml
}

/// Complete `.docx` package
pub fn render(report: &ExportReport, header: &ExportHeader) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", PACKAGE_RELS.to_string()),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS.to_string()),
        ("word/document.xml", document_xml(report, header)),
        ("word/styles.xml", styles_xml()),
    ];
    for (name, body) in parts {
        zip.start_file(name, options)?;
        zip.write_all(body.as_bytes())?;
    }

    Ok(zip.finish()?.into_inner())
}
