//! HTML transcript rendering with fenced code detection and syntect highlighting.

use once_cell::sync::Lazy;
use syntect::highlighting::{ Theme, ThemeSet };
use syntect::html::highlighted_html_for_string;
use syntect::parsing::{ SyntaxReference, SyntaxSet };
use log::warn;

use crate::models::chat::{ Conversation, Role, Turn };

const FENCE_CHARS: [char; 2] = ['`', '~'];
const MIN_FENCE_LEN: usize = 3;
const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const THEME_NAME: &str = "base16-ocean.dark";

struct SyntectAssets {
    syntax_set: SyntaxSet,
    theme: Theme,
}

static ASSETS: Lazy<Option<SyntectAssets>> = Lazy::new(|| {
    let syntax_set = SyntaxSet::load_defaults_newlines();
    let mut themes = ThemeSet::load_defaults().themes;
    let theme = themes
        .remove(THEME_NAME)
        .or_else(|| themes.into_values().next());
    match theme {
        Some(theme) => Some(SyntectAssets { syntax_set, theme }),
        None => {
            warn!("No syntect theme available; code blocks will not be highlighted");
            None
        }
    }
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Reasoning emitted by thinking models ahead of the answer.
    Thinking(String),
    Prose(String),
    Code {
        lang: Option<String>,
        code: String,
    },
}

/// Splits message text into prose and fenced code segments. A fence left open
/// at the end of the text still produces a code segment, which keeps partial
/// streamed replies readable.
pub fn parse_segments(content: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut content = content;

    if let Some(rest) = content.trim_start().strip_prefix(THINK_OPEN) {
        let (thinking, answer) = match rest.find(THINK_CLOSE) {
            Some(end) => (&rest[..end], &rest[end + THINK_CLOSE.len()..]),
            None => (rest, ""),
        };
        if !thinking.trim().is_empty() {
            segments.push(Segment::Thinking(thinking.trim().to_string()));
        }
        content = answer;
    }

    let mut current: Vec<&str> = Vec::new();
    let mut open_fence: Option<(Fence, Option<String>)> = None;

    for line in content.lines() {
        let trimmed = line.trim_start();
        match open_fence.take() {
            None => {
                if let Some((fence, rest)) = fence_run(trimmed) {
                    flush_prose(&mut segments, &mut current);
                    let tag = rest.trim();
                    let lang = if tag.is_empty() { None } else { Some(tag.to_string()) };
                    open_fence = Some((fence, lang));
                } else {
                    current.push(line);
                }
            }
            Some((fence, lang)) => {
                if fence.closed_by(trimmed) {
                    segments.push(Segment::Code { lang, code: current.join("\n") });
                    current.clear();
                } else {
                    current.push(line);
                    open_fence = Some((fence, lang));
                }
            }
        }
    }

    match open_fence {
        Some((_, lang)) => segments.push(Segment::Code { lang, code: current.join("\n") }),
        None => flush_prose(&mut segments, &mut current),
    }
    segments
}

/// Opening marker run of a code fence: three or more of one fence character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    ch: char,
    len: usize,
}

impl Fence {
    /// A fence closes on a bare run of the same character at least as long as the opener.
    fn closed_by(&self, trimmed: &str) -> bool {
        matches!(
            fence_run(trimmed),
            Some((run, rest)) if run.ch == self.ch && run.len >= self.len && rest.trim().is_empty()
        )
    }
}

/// Splits a fence line into its marker run and whatever follows it.
fn fence_run(trimmed: &str) -> Option<(Fence, &str)> {
    let ch = trimmed.chars().next().filter(|c| FENCE_CHARS.contains(c))?;
    let rest = trimmed.trim_start_matches(ch);
    let len = trimmed.len() - rest.len();
    if len < MIN_FENCE_LEN {
        return None;
    }
    Some((Fence { ch, len }, rest))
}

fn flush_prose(segments: &mut Vec<Segment>, lines: &mut Vec<&str>) {
    let text = lines.join("\n");
    lines.clear();
    if !text.trim().is_empty() {
        segments.push(Segment::Prose(text));
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Lazy::force(&ASSETS);
        Renderer
    }

    pub fn render_conversation(&self, conversation: &Conversation) -> String {
        conversation
            .turns()
            .iter()
            .map(|turn| self.render_turn(turn))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn render_turn(&self, turn: &Turn) -> String {
        let (class, label) = match turn.role() {
            Role::User => ("user", "You"),
            Role::Assistant => ("assistant", "Assistant"),
            Role::System => ("system", "System"),
        };
        let mut html = format!(
            "<div class=\"turn {}\"><div class=\"turn-header\"><span class=\"role\">{}</span><time datetime=\"{}\">{}</time></div>",
            class,
            label,
            turn.created_at().to_rfc3339(),
            turn.created_at().format("%H:%M:%S")
        );
        html.push_str(&self.render_content(turn.content()));
        if let Some(model) = turn.model() {
            html.push_str(
                &format!("<div class=\"model-badge\">Model: {}</div>", escape_html(model))
            );
        }
        html.push_str("</div>");
        html
    }

    /// Renders a reply that is still streaming in.
    pub fn render_partial(&self, content: &str) -> String {
        format!(
            "<div class=\"turn assistant pending\"><div class=\"turn-header\"><span class=\"role\">Assistant</span></div>{}</div>",
            self.render_content(content)
        )
    }

    pub fn render_content(&self, content: &str) -> String {
        let mut html = String::from("<div class=\"content\">");
        for segment in parse_segments(content) {
            match segment {
                Segment::Thinking(text) =>
                    html.push_str(
                        &format!(
                            "<details class=\"thinking\"><summary>Reasoning</summary>{}</details>",
                            render_prose(&text)
                        )
                    ),
                Segment::Prose(text) => html.push_str(&render_prose(&text)),
                Segment::Code { lang, code } => html.push_str(&render_code(lang.as_deref(), &code)),
            }
        }
        html.push_str("</div>");
        html
    }
}

fn render_prose(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.lines().map(escape_html).collect();
            format!("<p>{}</p>", lines.join("<br>"))
        })
        .collect()
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, lang: Option<&str>) -> &'a SyntaxReference {
    lang.and_then(|l| {
        syntax_set.find_syntax_by_token(l).or_else(|| syntax_set.find_syntax_by_extension(l))
    }).unwrap_or_else(|| syntax_set.find_syntax_plain_text())
}

fn render_code(lang: Option<&str>, code: &str) -> String {
    let label = lang.unwrap_or("text");
    let body = ASSETS.as_ref()
        .and_then(|assets| {
            let syntax = find_syntax(&assets.syntax_set, lang);
            let source = format!("{}\n", code);
            highlighted_html_for_string(&source, &assets.syntax_set, syntax, &assets.theme)
                .map_err(|e| warn!("Highlighting failed for '{}': {}", label, e))
                .ok()
        })
        .unwrap_or_else(|| format!("<pre><code>{}</code></pre>", escape_html(code)));

    format!(
        "<div class=\"code-block\" data-lang=\"{lang}\"><div class=\"code-header\"><span class=\"code-lang\">{lang}</span><button type=\"button\" class=\"copy-button\" data-code=\"{raw}\">Copy</button></div>{body}</div>",
        lang = escape_html(label),
        raw = escape_html(code),
        body = body
    )
}
