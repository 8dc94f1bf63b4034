//! Reply formatting: the markdown subset bot replies actually use.
//!
//! - ```` ```lang ```` fenced blocks, highlighted per language
//! - `` `inline code` ``
//! - `**bold**`, `*italic*` (asterisks not touching word characters), `__underline__`
//!
//! Prose is HTML-escaped before any tag is introduced, so reply text can
//! never inject markup.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::highlight::{highlight_as, Language};
use crate::markup::escape_html;

static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*([\w+#.-]*)[^\n]*\n(.*?)```").expect("fence pattern must compile")
});
static INLINE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("inline code pattern must compile"));
static BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("bold pattern must compile"));
static UNDERLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__(.*?)__").expect("underline pattern must compile"));
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x01(\d+)\x01").expect("placeholder pattern must compile"));

/// A fenced code block found in a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Info-string tag as written (may be empty).
    pub language: String,
    pub code: String,
}

impl CodeBlock {
    /// `<pre><code>` markup with the body highlighted when the tag is known.
    pub fn to_html(&self) -> String {
        match Language::from_tag(&self.language) {
            Some(lang) => format!(
                "<pre><code class=\"language-{}\">{}</code></pre>",
                lang.name(),
                highlight_as(&self.code, lang)
            ),
            None => format!("<pre><code>{}</code></pre>", escape_html(&self.code)),
        }
    }
}

/// All fenced code blocks in `text`, in order. Used by "copy code".
pub fn code_blocks(text: &str) -> Vec<CodeBlock> {
    FENCE
        .captures_iter(text)
        .map(|caps| CodeBlock {
            language: caps[1].to_string(),
            code: caps[2].to_string(),
        })
        .collect()
}

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// `*x*` → `<i>x</i>` where the opening `*` is not preceded by a word
/// character and the closing one is not followed by one. The closing
/// asterisk is searched lazily on the same line.
fn italicize(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let opens = chars[i] == '*' && (i == 0 || !is_word(chars[i - 1]));
        if opens {
            let mut close = None;
            let mut j = i + 1;
            while j < chars.len() && chars[j] != '\n' {
                if chars[j] == '*' && chars.get(j + 1).map_or(true, |c| !is_word(*c)) {
                    close = Some(j);
                    break;
                }
                j += 1;
            }
            if let Some(j) = close {
                out.push_str("<i>");
                out.extend(&chars[i + 1..j]);
                out.push_str("</i>");
                i = j + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn stash(slots: &mut Vec<String>, html: String) -> String {
    slots.push(html);
    format!("\x01{}\x01", slots.len() - 1)
}

/// Format a complete bot reply as HTML.
pub fn format_reply(text: &str) -> String {
    let mut slots: Vec<String> = Vec::new();

    // \x01 delimits stash slots; reply text may not contain it.
    let text = text.replace('\x01', "");
    let text = FENCE.replace_all(&text, |caps: &Captures| {
        let block = CodeBlock {
            language: caps[1].to_string(),
            code: caps[2].to_string(),
        };
        stash(&mut slots, block.to_html())
    });
    let escaped = escape_html(&text);
    let text = INLINE_CODE.replace_all(&escaped, |caps: &Captures| {
        stash(&mut slots, format!("<code>{}</code>", &caps[1]))
    });

    let text = BOLD.replace_all(&text, "<b>$1</b>");
    let text = italicize(&text);
    let text = UNDERLINE.replace_all(&text, "<u>$1</u>");

    PLACEHOLDER
        .replace_all(&text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| slots.get(i).cloned())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Escape a user message for display. User text is never formatted.
pub fn format_user(text: &str) -> String {
    escape_html(text)
}
