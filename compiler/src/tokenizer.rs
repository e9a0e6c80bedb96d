use regex::Regex;
use lazy_static::lazy_static;
use crate::utils::{quote, error};
use crate::error::CompileError;

lazy_static! {
    pub static ref TOKEN_REGEX: Regex = Regex::new(concat!(
        r#"("(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'"#,
        r"|-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?\b",
        r"|[=;{}()\[\],:<>]",
        r"|\.?[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*",
        r"|//[^\n]*|/\*[\s\S]*?\*/|\s+)",
    )).unwrap();
    pub static ref WHITESPACE_RX: Regex = Regex::new(r"^(//[^\n]*|/\*[\s\S]*\*/|\s+)$").unwrap();
}

#[derive(Debug, PartialEq)]
pub struct Token {
    pub text:   String,
    pub line:   usize,
    pub column: usize,
}

fn unexpected(text: &str, line: usize, column: usize) -> CompileError {
    error(&format!("Syntax error: {}", quote(text)), line, column)
}

/// Splits schema text into tokens, dropping whitespace and comments. The
/// returned list always ends with an empty EOF token.
pub fn tokenize_schema(text: &str) -> Result<Vec<Token>, CompileError> {
    let mut tokens = Vec::new();
    let (mut line, mut column) = (1, 1);
    let mut offset = 0;

    for found in TOKEN_REGEX.find_iter(text) {
        if found.start() > offset {
            return Err(unexpected(&text[offset..found.start()], line, column));
        }

        let part = found.as_str();
        if !WHITESPACE_RX.is_match(part) {
            tokens.push(Token { text: part.to_string(), line, column });
        }

        // Columns count characters, not bytes.
        match part.rsplit_once('\n') {
            Some((before, after)) => {
                line += before.matches('\n').count() + 1;
                column = after.chars().count() + 1;
            }
            None => column += part.chars().count(),
        }
        offset = found.end();
    }

    if offset != text.len() {
        return Err(unexpected(&text[offset..], line, column));
    }

    tokens.push(Token { text: String::new(), line, column });
    Ok(tokens)
}
