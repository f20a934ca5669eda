//! Glob patterns for branch and path filters.
//!
//! - `*` matches any run of characters except `/`
//! - `**` matches any run of characters including `/`
//! - `**/` matches zero or more leading directories
//! - `?` matches exactly one character other than `/`
//!
//! Everything else is literal and patterns always match the whole input,
//! so `*.md` only matches markdown files at the repository root.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    Any,
    Star,
    DoubleStar,
    DirPrefix,
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Pattern {
    raw: String,
    #[serde(skip)]
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let tokens = compile(&raw);
        Self { raw, tokens }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `input` matches this pattern in full.
    pub fn matches(&self, input: &str) -> bool {
        let input = normalize_path(input);
        let chars: Vec<char> = input.chars().collect();
        match_tokens(&self.tokens, &chars)
    }
}

impl From<String> for Pattern {
    fn from(raw: String) -> Self {
        Pattern::new(raw)
    }
}

impl From<&str> for Pattern {
    fn from(raw: &str) -> Self {
        Pattern::new(raw)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> Self {
        p.raw
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Strip a leading `./` so `./docs/a.md` and `docs/a.md` are equivalent.
pub fn normalize_path(path: &str) -> &str {
    let mut p = path;
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    p
}

/// True if any pattern in `patterns` matches `input`.
pub fn any_match(patterns: &[Pattern], input: &str) -> bool {
    patterns.iter().any(|p| p.matches(input))
}

fn compile(raw: &str) -> Vec<Token> {
    let chars: Vec<char> = normalize_path(raw).chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    tokens.push(Token::DirPrefix);
                    i += 3;
                } else {
                    tokens.push(Token::DoubleStar);
                    i += 2;
                }
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Any);
                i += 1;
            }
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }
    tokens
}

fn match_tokens(tokens: &[Token], input: &[char]) -> bool {
    let Some((head, rest)) = tokens.split_first() else {
        return input.is_empty();
    };
    match head {
        Token::Literal(c) => input.first() == Some(c) && match_tokens(rest, &input[1..]),
        Token::Any => matches!(input.first(), Some(c) if *c != '/') && match_tokens(rest, &input[1..]),
        Token::Star => {
            for i in 0..=input.len() {
                if i > 0 && input[i - 1] == '/' {
                    break;
                }
                if match_tokens(rest, &input[i..]) {
                    return true;
                }
            }
            false
        }
        Token::DoubleStar => (0..=input.len()).any(|i| match_tokens(rest, &input[i..])),
        Token::DirPrefix => {
            match_tokens(rest, input)
                || (1..=input.len())
                    .filter(|&i| input[i - 1] == '/')
                    .any(|i| match_tokens(rest, &input[i..]))
        }
    }
}
