use std::iter::Peekable;
use std::str::Chars;

use crate::{error::CompileError, tokenizer::Token};

pub fn quote(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text))
}

/// A parse error at `line:column`; the file name is attached by the loader.
pub fn error(msg: &str, line: usize, column: usize) -> CompileError {
    CompileError::ParseError {
        file: String::new(),
        msg: msg.to_string(),
        line,
        column,
    }
}

/// Up to `max` digits in `radix`, as a value and a digit count.
fn take_digits(chars: &mut Peekable<Chars>, radix: u32, max: usize) -> (u32, usize) {
    let mut value = 0u32;
    let mut count = 0;
    while count < max {
        match chars.peek().and_then(|c| c.to_digit(radix)) {
            Some(digit) => {
                value = value * radix + digit;
                count += 1;
                chars.next();
            }
            None => break,
        }
    }
    (value, count)
}

/// Decodes a string literal token: strips the quotes and resolves the C-style
/// escapes protobuf accepts (`\n`, `\101`, `\x41`, `\u00e9`, ...). Octal and
/// hex escapes are bytes, so the result must still be UTF-8. NUL is rejected
/// because descriptor strings are NUL-terminated.
pub fn unquote(token: &Token) -> Result<String, CompileError> {
    let fail = |msg: &str| error(msg, token.line, token.column);
    let text = token.text.as_str();
    let inner = if text.len() >= 2 { &text[1..text.len() - 1] } else { text };

    let mut out: Vec<u8> = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('a') => out.push(0x07),
            Some('b') => out.push(0x08),
            Some('f') => out.push(0x0c),
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('v') => out.push(0x0b),
            Some(first @ '0'..='7') => {
                let (rest, count) = take_digits(&mut chars, 8, 2);
                let value = (first as u32 - '0' as u32) * 8u32.pow(count as u32) + rest;
                if value > 0xff {
                    return Err(fail("Octal escape out of range"));
                }
                out.push(value as u8);
            }
            Some('x') | Some('X') => match take_digits(&mut chars, 16, 2) {
                (_, 0) => return Err(fail("Expected hex digits after \\x")),
                (value, _) => out.push(value as u8),
            },
            Some(kind @ ('u' | 'U')) => {
                let width = if kind == 'u' { 4 } else { 8 };
                let decoded = match take_digits(&mut chars, 16, width) {
                    (value, count) if count == width => char::from_u32(value),
                    _ => None,
                };
                let Some(decoded) = decoded else {
                    return Err(fail("Invalid unicode escape"));
                };
                let mut buf = [0u8; 4];
                out.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
            }
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => return Err(fail("Unterminated escape in string literal")),
        }
    }

    if out.contains(&0) {
        return Err(fail("String literals may not contain NUL"));
    }
    String::from_utf8(out).map_err(|_| fail("String literal is not valid UTF-8"))
}

/// Converts a string to PascalCase.
/// - Underscored names are split and each word capitalised (`client_id` → `ClientId`).
/// - Fully uppercase names keep only the first letter uppercase (`SIGNAL` → `Signal`).
/// - Otherwise only the first letter is uppercased.
pub fn to_pascal_case(s: &str) -> String {
    fn capitalize(word: &str, lower_rest: bool) -> String {
        let mut chars = word.chars();
        match chars.next() {
            None => String::new(),
            Some(first) if lower_rest => first.to_uppercase().to_string() + &chars.as_str().to_lowercase(),
            Some(first) => first.to_uppercase().to_string() + chars.as_str(),
        }
    }

    if s.contains('_') {
        s.split('_')
            .filter(|word| !word.is_empty())
            .map(|word| capitalize(word, true))
            .collect()
    } else {
        capitalize(s, s == s.to_uppercase())
    }
}

/// `GetUser` → `getUser`, used for gRPC-web client method names.
pub fn to_lower_camel_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_lowercase().to_string() + chars.as_str(),
    }
}

/// Relative module specifier from the file with stem `from` to the module
/// `to` (both `/`-separated, relative to the same root), in the `./x` /
/// `../x` form used by CommonJS requires.
pub fn relative_module(from: &str, to: &str) -> String {
    let from_dirs: Vec<&str> = from.split('/').collect();
    let from_dirs = &from_dirs[..from_dirs.len() - 1];
    let to_parts: Vec<&str> = to.split('/').collect();

    let common = from_dirs
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count()
        .min(to_parts.len() - 1);

    let ups = from_dirs.len() - common;
    let mut out = if ups == 0 {
        String::from("./")
    } else {
        "../".repeat(ups)
    };
    out.push_str(&to_parts[common..].join("/"));
    out
}
