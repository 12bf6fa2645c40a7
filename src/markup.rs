//! Inline markup handling for content payloads
//!
//! Generated and edited content arrives as loose HTML (`<p>`, `<strong>`,
//! `<li>`, entities). Serializers either flatten it to plain text or keep
//! bold/italic runs when their format supports them.

use regex::Regex;

lazy_static::lazy_static! {
    // A tag name must follow `<` or `</` directly; any other `<` is text
    static ref TOKEN: Regex =
        Regex::new(r"(?s)<!--.*?-->|</?[a-zA-Z][a-zA-Z0-9]*\b[^>]*>|[^<]+|<").expect("token regex");
    static ref TAG_NAME: Regex = Regex::new(r"^<(/?)([a-zA-Z][a-zA-Z0-9]*)").expect("tag regex");
    static ref NUMERIC_ENTITY: Regex = Regex::new(r"&#(\d{1,7});").expect("entity regex");
    static ref WHITESPACE: Regex = Regex::new(r"[ \t\r\f\u{a0}]+").expect("whitespace regex");
}

/// A span of text sharing one set of inline styles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

/// One rendered line: a paragraph, a `<br>`-separated line or a list item
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InlineLine {
    pub bullet: bool,
    pub runs: Vec<InlineRun>,
}

impl InlineLine {
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|r| r.text.as_str()).collect()
    }
}

/// Decode the handful of entities editors and the generator emit
pub fn decode_entities(s: &str) -> String {
    let s = NUMERIC_ENTITY.replace_all(s, |caps: &regex::Captures| {
        caps[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

struct LineBuilder {
    lines: Vec<InlineLine>,
    current: InlineLine,
}

impl LineBuilder {
    fn push_text(&mut self, text: &str, bold: bool, italic: bool) {
        let text = WHITESPACE.replace_all(text, " ");
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.current.runs.last_mut() {
            if last.bold == bold && last.italic == italic {
                last.text.push_str(&text);
                return;
            }
        }
        self.current.runs.push(InlineRun {
            text: text.into_owned(),
            bold,
            italic,
        });
    }

    fn break_line(&mut self, bullet_next: bool) {
        let done = std::mem::replace(
            &mut self.current,
            InlineLine {
                bullet: bullet_next,
                runs: Vec::new(),
            },
        );
        if let Some(line) = trim_line(done) {
            self.lines.push(line);
        }
    }

    fn finish(mut self) -> Vec<InlineLine> {
        self.break_line(false);
        self.lines
    }
}

fn trim_line(mut line: InlineLine) -> Option<InlineLine> {
    while let Some(first) = line.runs.first_mut() {
        let trimmed = first.text.trim_start().to_string();
        if trimmed.is_empty() {
            line.runs.remove(0);
        } else {
            first.text = trimmed;
            break;
        }
    }
    while let Some(last) = line.runs.last_mut() {
        let trimmed = last.text.trim_end().to_string();
        if trimmed.is_empty() {
            line.runs.pop();
        } else {
            last.text = trimmed;
            break;
        }
    }
    if line.runs.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Split markup into styled lines. Unknown tags are dropped, their text kept.
pub fn inline_lines(html: &str) -> Vec<InlineLine> {
    let mut builder = LineBuilder {
        lines: Vec::new(),
        current: InlineLine::default(),
    };
    let mut bold = 0usize;
    let mut italic = 0usize;

    for token in TOKEN.find_iter(html) {
        let token = token.as_str();
        if token.starts_with('<') && token.len() > 1 {
            let Some(caps) = TAG_NAME.captures(token) else {
                continue;
            };
            let closing = &caps[1] == "/";
            let name = caps[2].to_ascii_lowercase();
            match (name.as_str(), closing) {
                ("strong" | "b", false) => bold += 1,
                ("strong" | "b", true) => bold = bold.saturating_sub(1),
                ("em" | "i", false) => italic += 1,
                ("em" | "i", true) => italic = italic.saturating_sub(1),
                ("li", false) => builder.break_line(true),
                ("br", _) => {
                    let bullet = builder.current.bullet && builder.current.runs.is_empty();
                    builder.break_line(bullet)
                }
                ("p" | "div" | "li" | "ul" | "ol" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5"
                | "h6", _) => builder.break_line(false),
                _ => {}
            }
            continue;
        }

        let decoded = decode_entities(token);
        let mut parts = decoded.split('\n');
        if let Some(first) = parts.next() {
            builder.push_text(first, bold > 0, italic > 0);
        }
        for part in parts {
            builder.break_line(false);
            builder.push_text(part, bold > 0, italic > 0);
        }
    }

    builder.finish()
}

/// Plain text: tags removed, entities decoded, one line per paragraph or item
pub fn strip_markup(html: &str) -> String {
    inline_lines(html)
        .iter()
        .map(|line| {
            if line.bullet {
                format!("- {}", line.plain_text())
            } else {
                line.plain_text()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// True when the markup renders to nothing but whitespace
pub fn is_blank(html: &str) -> bool {
    inline_lines(html).is_empty()
}

fn markdown_run(run: &InlineRun) -> String {
    let marker = match (run.bold, run.italic) {
        (true, true) => "***",
        (true, false) => "**",
        (false, true) => "*",
        (false, false) => return run.text.clone(),
    };
    // Emphasis markers must hug the text, so surrounding spaces move outside
    let core = run.text.trim();
    if core.is_empty() {
        return run.text.clone();
    }
    let lead = &run.text[..run.text.len() - run.text.trim_start().len()];
    let trail = &run.text[run.text.trim_end().len()..];
    format!("{}{}{}{}{}", lead, marker, core, marker, trail)
}

/// Markdown rendering that keeps bold, italic and list items
pub fn to_markdown(html: &str) -> String {
    inline_lines(html)
        .iter()
        .map(|line| {
            let body: String = line.runs.iter().map(markdown_run).collect();
            if line.bullet {
                format!("- {}", body)
            } else {
                body
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_plain_text_passthrough() {
        assert_eq!(strip_markup("Found 3 issues."), "Found 3 issues.");
    }

    #[test]
    fn test_strip_tags_and_entities() {
        let html = "<p>Ramp &amp; stairs</p><p>Width &lt; 900mm&nbsp;measured</p>";
        assert_eq!(strip_markup(html), "Ramp & stairs\nWidth < 900mm measured");
    }

    #[test]
    fn test_strip_lists() {
        let html = "<ul><li>Door</li><li>Handrail</li></ul>";
        assert_eq!(strip_markup(html), "- Door\n- Handrail");
    }

    #[test]
    fn test_blank_detection() {
        assert!(is_blank(""));
        assert!(is_blank("   \n\t"));
        assert!(is_blank("<p> </p><br/>"));
        assert!(is_blank("<p>&nbsp;</p>"));
        assert!(!is_blank("<p>x</p>"));
    }

    #[test]
    fn test_inline_runs_track_styles() {
        let lines = inline_lines("<p>Found <strong>3</strong> <em>major</em> issues.</p>");
        assert_eq!(lines.len(), 1);
        let runs = &lines[0].runs;
        assert_eq!(runs[0].text, "Found ");
        assert!(runs[1].bold && runs[1].text == "3");
        assert!(runs[3].italic && runs[3].text == "major");
        assert_eq!(lines[0].plain_text(), "Found 3 major issues.");
    }

    #[test]
    fn test_newlines_in_text_split_lines() {
        assert_eq!(strip_markup("line one\nline two"), "line one\nline two");
    }

    #[test]
    fn test_markdown_conversion() {
        let html = "<p>Found <strong>3 </strong>issues</p><ul><li><em>fix</em> ramps</li></ul>";
        assert_eq!(to_markdown(html), "Found **3** issues\n- *fix* ramps");
    }

    #[test]
    fn test_numeric_entities() {
        assert_eq!(decode_entities("caf&#233; &amp;co"), "café &co");
    }

    #[test]
    fn test_stray_angle_bracket_is_text() {
        assert_eq!(strip_markup("a < b"), "a < b");
    }

    #[test]
    fn test_comparison_text_survives() {
        let text = "Slope < 1:12 and width > 900mm required";
        assert_eq!(strip_markup(text), text);
        assert!(!is_blank("< 1:12 >"));
        assert_eq!(
            strip_markup("<p>Gradient <strong>< 1:20</strong></p>"),
            "Gradient < 1:20"
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        assert_eq!(strip_markup("<!-- draft -->Kept"), "Kept");
    }
}
