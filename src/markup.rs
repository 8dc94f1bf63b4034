//! HTML escaping and the small tag walker used to turn widget HTML back into
//! plain or ANSI-colored text for the terminal.

use colored::*;

use crate::highlight::Category;

/// Characters the escaper replaces, with their entity forms.
pub const ENTITIES: [(char, &str); 5] = [
    ('&', "&amp;"),
    ('<', "&lt;"),
    ('>', "&gt;"),
    ('"', "&quot;"),
    ('\'', "&#39;"),
];

/// Escape `&`, `<`, `>`, `"` and `'` for safe embedding in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match ENTITIES.iter().find(|(ch, _)| *ch == c) {
            Some((_, entity)) => out.push_str(entity),
            None => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_html`]. Unknown `&...;` sequences are left as-is.
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        match ENTITIES.iter().find(|(_, entity)| rest.starts_with(entity)) {
            Some((ch, entity)) => {
                out.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// A piece of widget HTML: either a tag or a run of (still escaped) text.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Open { name: &'a str, class: Option<&'a str> },
    Close,
    Text(&'a str),
}

fn pieces(html: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = html;
    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            out.push(Piece::Text(rest));
            break;
        };
        if lt > 0 {
            out.push(Piece::Text(&rest[..lt]));
        }
        let Some(gt) = rest[lt..].find('>') else {
            out.push(Piece::Text(&rest[lt..]));
            break;
        };
        let inner = &rest[lt + 1..lt + gt];
        if inner.starts_with('/') {
            out.push(Piece::Close);
        } else {
            let name = inner.split_whitespace().next().unwrap_or("");
            let class = inner
                .split_once("class=\"")
                .and_then(|(_, tail)| tail.split_once('"'))
                .map(|(value, _)| value);
            out.push(Piece::Open { name, class });
        }
        rest = &rest[lt + gt + 1..];
    }
    out
}

/// Drop every tag, keeping the escaped text between them.
pub fn strip_tags(html: &str) -> String {
    pieces(html)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Text(t) => Some(t),
            _ => None,
        })
        .collect()
}

/// Plain text content of widget HTML (tags dropped, entities decoded).
pub fn to_plain(html: &str) -> String {
    unescape_html(&strip_tags(html))
}

#[derive(Debug, Clone, Copy)]
enum Style {
    Bold,
    Italic,
    Underline,
    Code,
    Span(Category),
    Plain,
}

fn category_color(category: Category) -> Color {
    match category {
        Category::Keyword => Color::Magenta,
        Category::String => Color::Green,
        Category::Comment => Color::BrightBlack,
        Category::Function => Color::Blue,
        Category::Number => Color::Yellow,
        Category::Preprocessor => Color::Cyan,
        Category::Tag => Color::Red,
        Category::Attribute => Color::BrightYellow,
    }
}

fn paint(text: &str, stack: &[Style]) -> String {
    let mut s = text.normal();
    for style in stack {
        s = match *style {
            Style::Bold => s.bold(),
            Style::Italic => s.italic(),
            Style::Underline => s.underline(),
            Style::Code => s.bright_white(),
            Style::Span(category) => s.color(category_color(category)),
            Style::Plain => s,
        };
    }
    s.to_string()
}

/// Render widget HTML (formatted replies, highlighted code) as ANSI text.
pub fn to_ansi(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut stack: Vec<Style> = Vec::new();
    for piece in pieces(html) {
        match piece {
            Piece::Open { name, class } => stack.push(match name {
                "b" | "strong" => Style::Bold,
                "i" | "em" => Style::Italic,
                "u" => Style::Underline,
                "code" => Style::Code,
                "span" => class
                    .and_then(Category::from_css_class)
                    .map_or(Style::Plain, Style::Span),
                _ => Style::Plain,
            }),
            Piece::Close => {
                stack.pop();
            }
            Piece::Text(text) => out.push_str(&paint(&unescape_html(text), &stack)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_all_specials() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_escape_plain_text_unchanged() {
        assert_eq!(escape_html("hello world"), "hello world");
    }

    #[test]
    fn test_unescape_inverts_escape() {
        for s in ["&lt;", "a & b", "&amp;amp;", "<<>>", "\"'\"", "ünïcødé & <x>"] {
            assert_eq!(unescape_html(&escape_html(s)), s);
        }
    }

    #[test]
    fn test_unescape_leaves_unknown_entities() {
        assert_eq!(unescape_html("&nbsp;&"), "&nbsp;&");
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(
            strip_tags(r#"<b>hi</b> <span class="hl-keyword">if</span>"#),
            "hi if"
        );
    }

    #[test]
    fn test_to_plain_decodes() {
        assert_eq!(to_plain("<code>&lt;div&gt;</code>"), "<div>");
    }

    #[test]
    fn test_pieces_reads_span_class() {
        let p = pieces(r#"<span class="hl-number">1</span>"#);
        assert_eq!(
            p,
            vec![
                Piece::Open { name: "span", class: Some("hl-number") },
                Piece::Text("1"),
                Piece::Close,
            ]
        );
    }

    #[test]
    fn test_to_ansi_without_color_is_plain_text() {
        colored::control::set_override(false);
        assert_eq!(to_ansi("<b>x</b> &amp; <i>y</i>"), "x & y");
        colored::control::unset_override();
    }
}
