//! Span-tagging code highlighter.
//!
//! Code is HTML-escaped once, then every category scan for the language runs
//! over the escaped text. Candidate spans are resolved against a masked
//! working buffer (a span survives only while the text under its range still
//! reads as its recorded literal) and finally spliced into the output from
//! right to left so earlier offsets never shift.
//!
//! ```
//! use ask_widget::highlight::highlight;
//!
//! let html = highlight("return 1;", "js");
//! assert_eq!(
//!     html,
//!     r#"<span class="hl-keyword">return</span> <span class="hl-number">1</span>;"#
//! );
//! ```

pub mod rules;

use serde::Serialize;
use tracing::debug;

use crate::markup::{escape_html, ENTITIES};
use rules::Rule;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Lexical category a span is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Keyword,
    String,
    Comment,
    Function,
    Number,
    Preprocessor,
    Tag,
    Attribute,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Keyword,
        Category::String,
        Category::Comment,
        Category::Function,
        Category::Number,
        Category::Preprocessor,
        Category::Tag,
        Category::Attribute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Keyword => "keyword",
            Category::String => "string",
            Category::Comment => "comment",
            Category::Function => "function",
            Category::Number => "number",
            Category::Preprocessor => "preprocessor",
            Category::Tag => "tag",
            Category::Attribute => "attribute",
        }
    }

    /// CSS class used on the emitted `<span>`.
    pub fn css_class(self) -> String {
        format!("hl-{}", self.as_str())
    }

    /// Inverse of [`Category::css_class`].
    pub fn from_css_class(class: &str) -> Option<Self> {
        let name = class.strip_prefix("hl-")?;
        Category::ALL.into_iter().find(|c| c.as_str() == name)
    }

    fn open_tag(self) -> String {
        format!("<span class=\"{}\">", self.css_class())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CLOSE_TAG: &str = "</span>";

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Languages with a rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    JavaScript,
    Html,
    Css,
    Python,
    Cpp,
}

impl Language {
    /// Resolve a fence/info-string tag. Matching is case-insensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "js" | "javascript" | "jsx" | "mjs" => Some(Language::JavaScript),
            "html" | "htm" | "xml" => Some(Language::Html),
            "css" => Some(Language::Css),
            "py" | "python" => Some(Language::Python),
            "c" | "h" | "cpp" | "c++" | "cc" | "hpp" | "cxx" => Some(Language::Cpp),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Html => "html",
            Language::Css => "css",
            Language::Python => "python",
            Language::Cpp => "cpp",
        }
    }

    fn rules(self) -> &'static [Rule] {
        match self {
            Language::JavaScript => rules::JAVASCRIPT.as_slice(),
            Language::Html => rules::HTML.as_slice(),
            Language::Css => rules::CSS.as_slice(),
            Language::Python => rules::PYTHON.as_slice(),
            Language::Cpp => rules::CPP.as_slice(),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Token spans
// ---------------------------------------------------------------------------

/// A half-open byte range `[start, end)` into the escaped code, with the
/// category it was matched as and the literal text it covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
    pub category: Category,
    pub literal: String,
}

/// Working copy of the escaped text. Bytes covered by an accepted span are
/// masked out, so a later candidate overlapping them no longer reads as its
/// literal.
struct SpanBuffer {
    cells: Vec<Option<u8>>,
}

impl SpanBuffer {
    fn new(text: &str) -> Self {
        Self {
            cells: text.bytes().map(Some).collect(),
        }
    }

    fn still_reads(&self, span: &TokenSpan) -> bool {
        let Some(cells) = self.cells.get(span.start..span.end) else {
            return false;
        };
        cells.len() == span.literal.len()
            && cells
                .iter()
                .zip(span.literal.bytes())
                .all(|(cell, b)| *cell == Some(b))
    }

    fn claim(&mut self, span: &TokenSpan) {
        for cell in &mut self.cells[span.start..span.end] {
            *cell = None;
        }
    }
}

/// Whether byte offset `pos` falls strictly inside one of the entities the
/// escaper emits (e.g. the `39` of `&#39;`).
fn inside_entity(text: &str, pos: usize) -> bool {
    let mut window_start = pos.saturating_sub(5);
    while !text.is_char_boundary(window_start) {
        window_start += 1;
    }
    let Some(head) = text.get(window_start..pos) else {
        return false;
    };
    let Some(rel) = head.rfind('&') else {
        return false;
    };
    let amp = window_start + rel;
    ENTITIES
        .iter()
        .any(|(_, entity)| text[amp..].starts_with(entity) && pos < amp + entity.len())
}

/// Run every category scan for `language` over already-escaped text and
/// return the candidate spans in collection order.
pub fn collect_spans(escaped: &str, language: Language) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    for rule in language.rules() {
        let regions: Vec<(usize, usize)> = match &rule.within {
            Some(scope) => scope.find_iter(escaped).map(|m| (m.start(), m.end())).collect(),
            None => vec![(0, escaped.len())],
        };
        for (offset, end) in regions {
            for caps in rule.pattern.captures_iter(&escaped[offset..end]) {
                for &(group, category) in &rule.captures {
                    let Some(m) = caps.get(group) else { continue };
                    let (start, stop) = (offset + m.start(), offset + m.end());
                    if start == stop
                        || inside_entity(escaped, start)
                        || inside_entity(escaped, stop)
                    {
                        continue;
                    }
                    spans.push(TokenSpan {
                        start,
                        end: stop,
                        category,
                        literal: m.as_str().to_string(),
                    });
                }
            }
        }
    }
    spans
}

/// Resolve overlapping candidates. Candidates are taken in collection order;
/// each one is kept only if the buffer still reads as its literal, and then
/// claims its range. The survivors come back sorted rightmost-first.
pub fn resolve_spans(escaped: &str, candidates: Vec<TokenSpan>) -> Vec<TokenSpan> {
    let mut buffer = SpanBuffer::new(escaped);
    let mut accepted = Vec::with_capacity(candidates.len());
    for span in candidates {
        if buffer.still_reads(&span) {
            buffer.claim(&span);
            accepted.push(span);
        }
    }
    accepted.sort_by(|a, b| b.start.cmp(&a.start));
    accepted
}

/// Splice tags into `escaped` for spans sorted by descending start.
fn splice(escaped: &str, spans: &[TokenSpan]) -> String {
    let mut out = escaped.to_string();
    let mut dropped = 0usize;
    for span in spans {
        if out.get(span.start..span.end) != Some(span.literal.as_str()) {
            dropped += 1;
            continue;
        }
        out.insert_str(span.end, CLOSE_TAG);
        out.insert_str(span.start, &span.category.open_tag());
    }
    if dropped > 0 {
        debug!(dropped, "stale spans skipped during splice");
    }
    out
}

/// Highlight `code` for a known language.
pub fn highlight_as(code: &str, language: Language) -> String {
    let escaped = escape_html(code);
    let candidates = collect_spans(&escaped, language);
    let total = candidates.len();
    let accepted = resolve_spans(&escaped, candidates);
    debug!(
        language = %language,
        candidates = total,
        accepted = accepted.len(),
        "highlighted code block"
    );
    splice(&escaped, &accepted)
}

/// Highlight `code` given a free-form language tag. Unknown tags produce the
/// escaped code with no spans.
pub fn highlight(code: &str, language: &str) -> String {
    match Language::from_tag(language) {
        Some(lang) => highlight_as(code, lang),
        None => escape_html(code),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
