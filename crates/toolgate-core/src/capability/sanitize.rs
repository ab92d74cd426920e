//! Static checks on stored capability code.
//!
//! Code is rejected, never repaired. Two passes run over each body: a fixed
//! deny-list of constructs that reach for ambient authority or tamper with
//! object identity, and a delimiter scanner that requires balanced brackets
//! and terminated strings, templates, comments and regex literals. A body
//! that passes the scanner cannot close the registration wrapper it is
//! spliced into.

use std::sync::OnceLock;

use regex::Regex;

/// Why a capability body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizationError {
    #[error("forbidden construct: {construct}")]
    ForbiddenConstruct { construct: &'static str },

    #[error("invalid syntax: {reason}")]
    InvalidSyntax { reason: String },

    #[error("capability body is empty")]
    EmptyBody,
}

/// Result type for sanitization checks.
pub type SanitizationResult<T> = std::result::Result<T, SanitizationError>;

const DENY_LIST: &[(&str, &str)] = &[
    ("eval", r"\beval\s*\("),
    ("Function constructor", r"\bnew\s+Function\b|\bFunction\s*\("),
    ("dynamic import", r"\bimport\s*\("),
    ("module import/export", r"(?m)^\s*(?:import|export)\b"),
    ("require", r"\brequire\s*\("),
    ("Deno", r"\bDeno\b"),
    ("globalThis", r"\bglobalThis\b"),
    ("process", r"\bprocess\s*\."),
    ("__proto__", r"__proto__"),
    ("constructor", r"\bconstructor\b"),
    ("setPrototypeOf", r"\bsetPrototypeOf\b"),
    ("getPrototypeOf", r"\bgetPrototypeOf\b"),
    ("accessor definition", r"__(?:define|lookup)(?:Getter|Setter)__"),
    ("property definition", r"\bdefinePropert(?:y|ies)\b"),
    ("prototype", r"\bprototype\b"),
    ("well-known symbol assignment", r"\[\s*Symbol\s*\.\s*\w+\s*\]\s*=[^=]"),
    ("Reflect", r"\bReflect\b"),
    ("WebAssembly", r"\bWebAssembly\b"),
    ("bootstrap internals", r"__toolgate"),
];

/// Keywords after which `[` opens an array literal rather than a member
/// access.
const LITERAL_PRECEDERS: &[&str] = &[
    "return", "case", "in", "of", "typeof", "instanceof", "yield", "await", "throw", "delete",
    "void", "new", "else", "do",
];

fn deny_list() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DENY_LIST
            .iter()
            .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| (*label, re)))
            .collect()
    })
}

/// Run both passes over `code`.
pub fn sanitize(code: &str) -> SanitizationResult<()> {
    if code.trim().is_empty() {
        return Err(SanitizationError::EmptyBody);
    }
    if let Some((label, _)) = deny_list().iter().find(|(_, re)| re.is_match(code)) {
        return Err(SanitizationError::ForbiddenConstruct { construct: label });
    }
    if has_string_member_key(code) {
        return Err(SanitizationError::ForbiddenConstruct {
            construct: "computed member access",
        });
    }
    check_delimiters(code)
}

/// Whether `code` indexes a value with a key built from a string or
/// template literal, e.g. `Array['proto' + 'type']`. Plain identifier and
/// numeric keys stay allowed.
fn has_string_member_key(code: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r#"([\w$]+|\)|\])\s*\[[^\[\]]*['"`]"#).ok());
    match pattern {
        Some(re) => re
            .captures_iter(code)
            .any(|caps| !LITERAL_PRECEDERS.contains(&&caps[1])),
        None => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Paren,
    Bracket,
    Brace,
    /// `${` inside a template literal; its `}` resumes the template.
    TemplateExpr,
}

impl Frame {
    fn closer(self) -> char {
        match self {
            Frame::Paren => ')',
            Frame::Bracket => ']',
            Frame::Brace | Frame::TemplateExpr => '}',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Quoted(char),
    Template,
    LineComment,
    BlockComment,
    Regex { in_class: bool },
}

fn invalid(reason: impl Into<String>) -> SanitizationError {
    SanitizationError::InvalidSyntax {
        reason: reason.into(),
    }
}

/// A `/` starts a regex literal unless it follows something that ends an
/// expression.
fn slash_starts_regex(prev: Option<char>, prev_word: &str) -> bool {
    match prev {
        None => true,
        Some(c) if c.is_alphanumeric() || c == '_' || c == '$' => {
            matches!(
                prev_word,
                "return" | "typeof" | "case" | "do" | "else" | "in" | "of" | "void" | "yield" | "await"
            )
        }
        Some(')') | Some(']') | Some('}') => false,
        Some(_) => true,
    }
}

/// Check that delimiters balance and every literal and comment terminates.
pub fn check_delimiters(code: &str) -> SanitizationResult<()> {
    let chars: Vec<char> = code.chars().collect();
    let mut stack: Vec<Frame> = Vec::new();
    let mut mode = Mode::Code;
    let mut prev: Option<char> = None;
    let mut word = String::new();
    let mut prev_word = String::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '\n' {
            line += 1;
        }

        match mode {
            Mode::Code => {
                if c.is_alphanumeric() || c == '_' || c == '$' {
                    word.push(c);
                } else if !word.is_empty() {
                    prev_word = std::mem::take(&mut word);
                }

                match c {
                    '/' if next == Some('/') => {
                        mode = Mode::LineComment;
                        i += 1;
                    }
                    '/' if next == Some('*') => {
                        mode = Mode::BlockComment;
                        i += 1;
                    }
                    '/' if slash_starts_regex(prev, &prev_word) => {
                        mode = Mode::Regex { in_class: false };
                    }
                    '\'' | '"' => mode = Mode::Quoted(c),
                    '`' => mode = Mode::Template,
                    '(' => stack.push(Frame::Paren),
                    '[' => stack.push(Frame::Bracket),
                    '{' => stack.push(Frame::Brace),
                    ')' | ']' | '}' => match stack.pop() {
                        Some(frame) if frame.closer() == c => {
                            if frame == Frame::TemplateExpr {
                                mode = Mode::Template;
                            }
                        }
                        Some(frame) => {
                            return Err(invalid(format!(
                                "line {line}: found '{c}' where '{}' was expected",
                                frame.closer()
                            )))
                        }
                        None => return Err(invalid(format!("line {line}: unbalanced '{c}'"))),
                    },
                    _ => {}
                }
                if !c.is_whitespace() {
                    prev = Some(c);
                    if !(c.is_alphanumeric() || c == '_' || c == '$') {
                        prev_word.clear();
                    }
                }
            }
            Mode::Quoted(quote) => match c {
                '\\' => i += 1,
                '\n' => return Err(invalid(format!("line {line}: unterminated string literal"))),
                _ if c == quote => {
                    mode = Mode::Code;
                    prev = Some(')');
                }
                _ => {}
            },
            Mode::Template => match c {
                '\\' => i += 1,
                '`' => {
                    mode = Mode::Code;
                    prev = Some(')');
                }
                '$' if next == Some('{') => {
                    stack.push(Frame::TemplateExpr);
                    mode = Mode::Code;
                    prev = Some('{');
                    i += 1;
                }
                _ => {}
            },
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                }
            }
            Mode::BlockComment => {
                if c == '*' && next == Some('/') {
                    mode = Mode::Code;
                    i += 1;
                }
            }
            Mode::Regex { in_class } => match c {
                '\\' => i += 1,
                '\n' => return Err(invalid(format!("line {line}: unterminated regex literal"))),
                '[' => mode = Mode::Regex { in_class: true },
                ']' if in_class => mode = Mode::Regex { in_class: false },
                '/' if !in_class => {
                    mode = Mode::Code;
                    prev = Some(')');
                }
                _ => {}
            },
        }
        i += 1;
    }

    match mode {
        Mode::Code | Mode::LineComment => {}
        Mode::Quoted(_) => return Err(invalid("unterminated string literal")),
        Mode::Template => return Err(invalid("unterminated template literal")),
        Mode::BlockComment => return Err(invalid("unterminated block comment")),
        Mode::Regex { .. } => return Err(invalid("unterminated regex literal")),
    }
    if let Some(frame) = stack.last() {
        return Err(invalid(format!("unclosed delimiter, expected '{}'", frame.closer())));
    }
    Ok(())
}
