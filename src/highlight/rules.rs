//! Per-language rule tables.
//!
//! Every pattern is written against HTML-escaped text: a double quote is
//! `&quot;`, a single quote `&#39;`, angle brackets `&lt;` / `&gt;`.
//! Rule order is priority order. Comments and strings share one leading
//! pattern so whichever starts first wins (`"http://x"` stays a string and
//! `// "x"` stays a comment).

use once_cell::sync::Lazy;
use regex::Regex;

use super::Category;

/// One category scan: a pattern plus the capture groups it tags.
pub struct Rule {
    pub pattern: Regex,
    pub captures: Vec<(usize, Category)>,
    /// When set, `pattern` only runs inside matches of this region pattern.
    pub within: Option<Regex>,
}

impl Rule {
    fn new(pattern: &str, captures: &[(usize, Category)]) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("highlight rule pattern must compile"),
            captures: captures.to_vec(),
            within: None,
        }
    }

    fn scoped(mut self, region: &str) -> Self {
        self.within = Some(Regex::new(region).expect("highlight scope pattern must compile"));
        self
    }

    fn whole(pattern: &str, category: Category) -> Self {
        Self::new(pattern, &[(0, category)])
    }

    fn keywords(words: &[&str]) -> Self {
        Self::whole(&format!(r"\b(?:{})\b", words.join("|")), Category::Keyword)
    }
}

const DQ_STRING: &str = r"&quot;(?:\\.|[^\\\n])*?&quot;";
const SQ_STRING: &str = r"&#39;(?:\\.|[^\\\n])*?&#39;";
const NUMBER: &str = r"\b\d+(?:\.\d+)?\b";
const CALL: &str = r"\b([A-Za-z_]\w*)\s*\(";

const COMMENT_OR_STRING: &[(usize, Category)] = &[(1, Category::Comment), (2, Category::String)];
const CALL_NAME: &[(usize, Category)] = &[(1, Category::Function)];

const JS_KEYWORDS: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "export", "extends", "false", "finally", "for",
    "function", "if", "import", "in", "instanceof", "let", "new", "null", "of", "return",
    "static", "super", "switch", "this", "throw", "true", "try", "typeof", "undefined", "var",
    "void", "while", "with", "yield",
];

const PY_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "self", "try", "while", "with", "yield",
];

const CPP_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "catch", "char", "class", "const", "constexpr",
    "continue", "default", "delete", "do", "double", "else", "enum", "explicit", "extern",
    "false", "float", "for", "friend", "goto", "if", "inline", "int", "long", "mutable",
    "namespace", "new", "noexcept", "nullptr", "operator", "override", "private",
    "protected", "public", "register", "return", "short", "signed", "sizeof", "static",
    "struct", "switch", "template", "this", "throw", "true", "try", "typedef", "typename",
    "union", "unsigned", "using", "virtual", "void", "volatile", "while",
];

pub static JAVASCRIPT: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(
            &format!(r"(?s)(//[^\n]*|/\*.*?\*/)|({DQ_STRING}|{SQ_STRING}|`(?:\\.|[^\\`])*`)"),
            COMMENT_OR_STRING,
        ),
        Rule::keywords(JS_KEYWORDS),
        Rule::new(r"([A-Za-z_$][\w$]*)\s*\(", CALL_NAME),
        Rule::whole(NUMBER, Category::Number),
    ]
});

pub static PYTHON: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(
            &format!(
                r"(?s)(#[^\n]*)|(&quot;&quot;&quot;.*?&quot;&quot;&quot;|&#39;&#39;&#39;.*?&#39;&#39;&#39;|{DQ_STRING}|{SQ_STRING})"
            ),
            COMMENT_OR_STRING,
        ),
        Rule::keywords(PY_KEYWORDS),
        Rule::new(CALL, CALL_NAME),
        Rule::whole(NUMBER, Category::Number),
    ]
});

/// The include scan sits in the leading pattern, ahead of strings and the
/// generic directive scan: `#include <x>` is one preprocessor span while
/// `#include "x"` splits into a directive and a string header.
pub static CPP: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(
            &format!(
                r"(?s)(//[^\n]*|/\*.*?\*/)|(#[ \t]*include[ \t]*&lt;[^&\n]*&gt;)|(#[ \t]*include)[ \t]*(&quot;[^&\n]*&quot;)|({DQ_STRING}|{SQ_STRING})"
            ),
            &[
                (1, Category::Comment),
                (2, Category::Preprocessor),
                (3, Category::Preprocessor),
                (4, Category::String),
                (5, Category::String),
            ],
        ),
        Rule::whole(r"#[ \t]*[A-Za-z_]\w*", Category::Preprocessor),
        Rule::keywords(CPP_KEYWORDS),
        Rule::new(CALL, CALL_NAME),
        Rule::whole(NUMBER, Category::Number),
    ]
});

/// An opening tag from `<name` to its closing `>`, stepping over quoted
/// values that contain `>`.
const OPEN_TAG: &str = r"(?s)&lt;[A-Za-z][\w:-]*(?:&quot;.*?&quot;|&#39;.*?&#39;|.)*?&gt;";

pub static HTML: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::whole(r"(?s)&lt;!--.*?--&gt;", Category::Comment),
        Rule::new(r"&lt;!([A-Za-z]+)", &[(1, Category::Keyword)]),
        Rule::new(
            r"=[ \t]*(&quot;[^\n]*?&quot;|&#39;[^\n]*?&#39;)",
            &[(1, Category::String)],
        )
        .scoped(OPEN_TAG),
        Rule::new(r"&lt;/?([A-Za-z][\w:-]*)", &[(1, Category::Tag)]),
        Rule::new(r"[ \t\n]([A-Za-z_:][\w:.-]*)[ \t]*=", &[(1, Category::Attribute)])
            .scoped(OPEN_TAG),
    ]
});

pub static CSS: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(
            &format!(r"(?s)(/\*.*?\*/)|({DQ_STRING}|{SQ_STRING})"),
            COMMENT_OR_STRING,
        ),
        Rule::whole(r"@[\w-]+", Category::Keyword),
        Rule::new(r"(?m)^[ \t]*([^{}\n/]+?)[ \t]*\{", &[(1, Category::Tag)]),
        Rule::new(
            r"(?m)(?:[{;][ \t\n]*|^[ \t]+)([A-Za-z-]+)[ \t]*:",
            &[(1, Category::Attribute)],
        ),
        Rule::whole(
            r"#[0-9a-fA-F]{3,8}\b|-?\b\d+(?:\.\d+)?(?:px|em|rem|vh|vw|ms|deg|fr|s|%)?",
            Category::Number,
        ),
    ]
});
