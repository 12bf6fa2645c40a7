//! PDF serializer
//!
//! Emits a PDF 1.4 file by hand: A4 pages, the three standard Type 1 fonts
//! (Helvetica, Helvetica-Bold, Courier) in WinAnsi encoding, one content
//! stream per page, an xref table and a trailer. Text outside Latin-1 is
//! written as `?`. Line wrapping uses an average glyph width per font.

use super::blocks::{chart_rows, signature_lines, ExportBlock, ExportReport};
use super::ExportHeader;
use crate::error::Result;
use crate::markup;
use std::io::Write;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
const TEXT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const LINE_SPACING: f32 = 1.4;

/// Objects 1..=5 are fixed: catalog, page tree, three fonts
const FIRST_PAGE_OBJECT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Font {
    Regular,
    Bold,
    Mono,
}

impl Font {
    fn resource(&self) -> &'static str {
        match self {
            Font::Regular => "F1",
            Font::Bold => "F2",
            Font::Mono => "F3",
        }
    }

    /// Average advance as a fraction of the font size
    fn glyph_width(&self) -> f32 {
        match self {
            Font::Regular => 0.5,
            Font::Bold => 0.55,
            Font::Mono => 0.6,
        }
    }

    fn chars_per_width(&self, size: f32, width: f32) -> usize {
        ((width / (size * self.glyph_width())).floor() as usize).max(1)
    }
}

/// Latin-1 bytes of a PDF literal string, with delimiters escaped
fn pdf_string(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(b'(');
    for c in text.chars() {
        let byte = match c as u32 {
            0x09 => b' ',
            cp @ 0x20..=0x7e | cp @ 0xa0..=0xff => cp as u8,
            _ => b'?',
        };
        if matches!(byte, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out.push(b')');
    out
}

/// Greedy word wrap by character count; overlong words are split
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(max_chars);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current_len == 0 {
            word.len()
        } else {
            current_len + 1 + word.len()
        };
        if needed > max_chars && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

fn truncate_to(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut s: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        s.push('~');
        s
    }
}

/// Lays text out top to bottom, starting a new page when the bottom margin is hit
struct PageWriter {
    pages: Vec<Vec<u8>>,
    current: Vec<u8>,
    y: f32,
}

impl PageWriter {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn new_page(&mut self) {
        self.pages.push(std::mem::take(&mut self.current));
        self.y = PAGE_HEIGHT - MARGIN;
    }

    /// Reserve `height` points, breaking the page if they do not fit
    fn reserve(&mut self, height: f32) -> f32 {
        if self.y - height < MARGIN {
            self.new_page();
        }
        self.y -= height;
        self.y
    }

    fn gap(&mut self, points: f32) {
        self.y -= points;
    }

    fn line(&mut self, font: Font, size: f32, x: f32, text: &str) -> Result<()> {
        let leading = size * LINE_SPACING;
        let baseline = self.reserve(leading) + (leading - size);
        write!(
            self.current,
            "BT /{} {} Tf {:.2} {:.2} Td ",
            font.resource(),
            size,
            x,
            baseline
        )?;
        self.current.extend(pdf_string(text));
        self.current.extend_from_slice(b" Tj ET\n");
        Ok(())
    }

    fn wrapped(&mut self, font: Font, size: f32, indent: f32, text: &str) -> Result<()> {
        let max_chars = font.chars_per_width(size, TEXT_WIDTH - indent);
        for line in wrap(text, max_chars) {
            self.line(font, size, MARGIN + indent, &line)?;
        }
        Ok(())
    }

    fn centered(&mut self, font: Font, size: f32, text: &str) -> Result<()> {
        let max_chars = font.chars_per_width(size, TEXT_WIDTH);
        for line in wrap(text, max_chars) {
            let width = line.chars().count() as f32 * size * font.glyph_width();
            let x = ((PAGE_WIDTH - width) / 2.0).max(MARGIN);
            self.line(font, size, x, &line)?;
        }
        Ok(())
    }

    /// One table row drawn as a single text object, one cell per column slot
    fn row(&mut self, font: Font, cells: &[String]) -> Result<()> {
        const SIZE: f32 = 10.0;
        let leading = SIZE * LINE_SPACING;
        let baseline = self.reserve(leading) + (leading - SIZE);
        let col_width = if cells.is_empty() {
            TEXT_WIDTH
        } else {
            TEXT_WIDTH / cells.len() as f32
        };
        let max_chars = font.chars_per_width(SIZE, col_width - 4.0);

        write!(self.current, "BT /{} {} Tf", font.resource(), SIZE)?;
        for (i, cell) in cells.iter().enumerate() {
            let x = MARGIN + i as f32 * col_width;
            write!(self.current, " 1 0 0 1 {:.2} {:.2} Tm ", x, baseline)?;
            self.current.extend(pdf_string(&truncate_to(cell, max_chars)));
            self.current.extend_from_slice(b" Tj");
        }
        self.current.extend_from_slice(b" ET\n");
        Ok(())
    }

    fn table(&mut self, columns: &[String], rows: &[Vec<String>]) -> Result<()> {
        self.row(Font::Bold, columns)?;
        for row in rows {
            self.row(Font::Regular, row)?;
        }
        self.gap(5.0);
        Ok(())
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.pages.push(self.current);
        self.pages
    }
}

fn heading_size(level: u8) -> f32 {
    match level {
        1 => 16.0,
        2 => 14.0,
        _ => 12.0,
    }
}

fn write_block(w: &mut PageWriter, block: &ExportBlock) -> Result<()> {
    match block {
        ExportBlock::Heading { level, text } => {
            w.gap(6.0);
            w.wrapped(Font::Bold, heading_size(*level), 0.0, text)?;
            w.gap(2.0);
        }
        ExportBlock::Paragraph { text } => {
            for line in markup::inline_lines(text) {
                let body = line.plain_text();
                if line.bullet {
                    w.wrapped(Font::Regular, 11.0, 12.0, &format!("- {}", body))?;
                } else {
                    w.wrapped(Font::Regular, 11.0, 0.0, &body)?;
                }
            }
            w.gap(5.0);
        }
        ExportBlock::Table {
            title,
            columns,
            rows,
        } => {
            if let Some(title) = title {
                w.wrapped(Font::Bold, 11.0, 0.0, title)?;
            }
            w.table(columns, rows)?;
        }
        ExportBlock::Diagram { title, source } => {
            w.wrapped(Font::Bold, 12.0, 0.0, title)?;
            for line in source.lines() {
                let max_chars = Font::Mono.chars_per_width(9.0, TEXT_WIDTH);
                // Keep indentation, which wrap() would collapse
                let chars: Vec<char> = line.chars().collect();
                if chars.is_empty() {
                    w.gap(9.0 * LINE_SPACING);
                }
                for chunk in chars.chunks(max_chars) {
                    let piece: String = chunk.iter().collect();
                    w.line(Font::Mono, 9.0, MARGIN, &piece)?;
                }
            }
            w.gap(5.0);
        }
        ExportBlock::Checklist { title, items } => {
            if let Some(title) = title {
                w.wrapped(Font::Bold, 11.0, 0.0, title)?;
            }
            for (checked, text) in items {
                let mark = if *checked { "[x]" } else { "[ ]" };
                w.wrapped(Font::Regular, 11.0, 0.0, &format!("{} {}", mark, text))?;
            }
            w.gap(5.0);
        }
        ExportBlock::Chart {
            title,
            chart_type,
            labels,
            series,
        } => {
            let name = title.as_deref().unwrap_or("Chart");
            w.wrapped(
                Font::Bold,
                11.0,
                0.0,
                &format!("{} ({} chart)", name, chart_type.as_str()),
            )?;
            let (header, rows) = chart_rows(labels, series);
            w.table(&header, &rows)?;
        }
        ExportBlock::Reference {
            title,
            citation,
            url,
            standard,
        } => {
            if let Some(title) = title {
                w.wrapped(Font::Bold, 11.0, 0.0, title)?;
            }
            w.wrapped(Font::Regular, 11.0, 12.0, &format!("\"{}\"", citation))?;
            if let Some(standard) = standard {
                w.wrapped(Font::Regular, 11.0, 12.0, &format!("Standard: {}", standard))?;
            }
            if let Some(url) = url {
                w.wrapped(Font::Mono, 9.0, 12.0, url)?;
            }
            w.gap(5.0);
        }
        ExportBlock::Signature {
            title,
            signer_name,
            signer_title,
            status,
            signed_at,
        } => {
            w.wrapped(Font::Bold, 11.0, 0.0, title.as_deref().unwrap_or("Signature"))?;
            for line in signature_lines(signer_name, signer_title, *status, signed_at) {
                w.wrapped(Font::Regular, 11.0, 12.0, &line)?;
            }
            w.gap(5.0);
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
            w.wrapped(Font::Regular, 11.0, 0.0, &format!("{}: {}", label, url))?;
            w.gap(5.0);
        }
    }
    Ok(())
}

fn layout(report: &ExportReport, header: &ExportHeader) -> Result<Vec<Vec<u8>>> {
    let mut w = PageWriter::new();

    w.gap(40.0);
    w.centered(Font::Bold, 20.0, &report.title)?;
    w.gap(12.0);
    w.centered(Font::Regular, 12.0, &format!("Project: {}", header.project_name))?;
    w.centered(Font::Regular, 12.0, &format!("Generated: {}", header.generated_at))?;
    w.gap(30.0);

    w.line(Font::Bold, 16.0, MARGIN, "Table of Contents")?;
    w.gap(4.0);
    for (level, text) in report.headings() {
        let indent = 15.0 * f32::from(level.saturating_sub(1));
        w.wrapped(Font::Regular, 12.0, indent, text)?;
    }

    w.new_page();
    for block in &report.blocks {
        write_block(&mut w, block)?;
    }
    Ok(w.finish())
}

/// Serialize laid-out pages into a PDF file
fn assemble(title: &str, pages: &[Vec<u8>]) -> Result<Vec<u8>> {
    let page_count = pages.len();
    let info_object = FIRST_PAGE_OBJECT + 2 * page_count;

    let mut objects: Vec<Vec<u8>> = Vec::with_capacity(info_object);
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());

    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", FIRST_PAGE_OBJECT + 2 * i))
        .collect();
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            page_count
        )
        .into_bytes(),
    );

    for base in ["Helvetica", "Helvetica-Bold", "Courier"] {
        objects.push(
            format!(
                "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                base
            )
            .into_bytes(),
        );
    }

    for (i, content) in pages.iter().enumerate() {
        let contents_object = FIRST_PAGE_OBJECT + 2 * i + 1;
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R /F3 5 0 R >> >> \
                 /Contents {} 0 R >>",
                PAGE_WIDTH, PAGE_HEIGHT, contents_object
            )
            .into_bytes(),
        );

        let mut stream = Vec::with_capacity(content.len() + 64);
        writeln!(stream, "<< /Length {} >>\nstream", content.len())?;
        stream.extend_from_slice(content);
        stream.extend_from_slice(b"\nendstream");
        objects.push(stream);
    }

    let mut info = b"<< /Title ".to_vec();
    info.extend(pdf_string(title));
    info.extend_from_slice(b" /Producer (reportgraph) >>");
    objects.push(info);

    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        writeln!(out, "{} 0 obj", i + 1)?;
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    writeln!(out, "xref\n0 {}\n0000000000 65535 f ", objects.len() + 1)?;
    for offset in offsets {
        writeln!(out, "{:010} 00000 n ", offset)?;
    }
    writeln!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R /Info {} 0 R >>\nstartxref\n{}\n%%EOF",
        objects.len() + 1,
        info_object,
        xref_offset
    )?;
    Ok(out)
}

pub fn render(report: &ExportReport, header: &ExportHeader) -> Result<Vec<u8>> {
    let pages = layout(report, header)?;
    assemble(&report.title, &pages)
}
