//! JavaScript deobfuscation and reflow.
//!
//! Deobfuscation runs a handful of regex rewrites until nothing changes:
//!
//! - `\x6a\x51` and `j` escapes become the characters they encode
//! - `atob("...")` becomes the decoded string literal
//! - `String.fromCharCode(106, 81)` becomes a string literal
//! - adjacent literal concatenation `"jQ" + "uery"` is folded
//! - `obj["prop"]` becomes `obj.prop`
//!
//! Reflow then breaks statements and blocks onto their own lines. It never
//! touches operator spacing, so `a=a+1` stays greppable as written.

use super::layout::LineWriter;
use crate::errors::TransformError;
use base64::Engine;
use regex::{Captures, Regex};
use std::sync::LazyLock;

const MAX_PASSES: usize = 4;

static HEX_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\x([0-9a-fA-F]{2})").unwrap());

static UNICODE_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").unwrap());

static ATOB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"atob\s*\(\s*["']([A-Za-z0-9+/=]+)["']\s*\)"#).unwrap());

static FROM_CHAR_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"String\.fromCharCode\s*\(\s*((?:0[xX][0-9a-fA-F]+|\d+)(?:\s*,\s*(?:0[xX][0-9a-fA-F]+|\d+))*)\s*\)").unwrap()
});

static DOUBLE_CONCAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\\\n]*)"\s*\+\s*"([^"\\\n]*)""#).unwrap());

static SINGLE_CONCAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'([^'\\\n]*)'\s*\+\s*'([^'\\\n]*)'"#).unwrap());

static BRACKET_PROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_$][\w$]*)\[\s*["']([A-Za-z_$][\w$]*)["']\s*\]"#).unwrap()
});

/// Deobfuscate then reflow.
pub fn beautify(source: &str) -> Result<String, TransformError> {
    reflow(&deobfuscate(source))
}

/// Undo common string-hiding tricks. Never fails: anything it does not
/// recognize is left alone.
pub fn deobfuscate(source: &str) -> String {
    let mut text = source.to_string();

    for _ in 0..MAX_PASSES {
        let mut changed = 0;
        changed += rewrite(&mut text, &HEX_ESCAPE_RE, |caps| {
            decode_code_unit(&caps[1]).filter(|c| c.is_ascii() && literal_safe(*c))
        });
        changed += rewrite(&mut text, &UNICODE_ESCAPE_RE, |caps| {
            decode_code_unit(&caps[1]).filter(|c| literal_safe(*c))
        });
        changed += rewrite_str(&mut text, &ATOB_RE, |caps| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&caps[1])
                .ok()?;
            String::from_utf8(bytes).ok().map(|s| quote(&s))
        });
        changed += rewrite_str(&mut text, &FROM_CHAR_CODE_RE, |caps| {
            let decoded: Option<String> = caps[1]
                .split(',')
                .map(|n| parse_char_code(n.trim()))
                .collect();
            decoded.map(|s| quote(&s))
        });
        changed += rewrite_str(&mut text, &DOUBLE_CONCAT_RE, |caps| {
            Some(format!("\"{}{}\"", &caps[1], &caps[2]))
        });
        changed += rewrite_str(&mut text, &SINGLE_CONCAT_RE, |caps| {
            Some(format!("'{}{}'", &caps[1], &caps[2]))
        });
        changed += rewrite_str(&mut text, &BRACKET_PROP_RE, |caps| {
            Some(format!("{}.{}", &caps[1], &caps[2]))
        });

        if changed == 0 {
            break;
        }
    }
    text
}

fn rewrite<F>(text: &mut String, re: &Regex, mut decode: F) -> usize
where
    F: FnMut(&Captures) -> Option<char>,
{
    rewrite_str(text, re, |caps| decode(caps).map(String::from))
}

fn rewrite_str<F>(text: &mut String, re: &Regex, mut replace: F) -> usize
where
    F: FnMut(&Captures) -> Option<String>,
{
    let mut count = 0;
    let result = re.replace_all(text, |caps: &Captures| match replace(caps) {
        Some(s) => {
            count += 1;
            s
        }
        None => caps[0].to_string(),
    });
    if count > 0 {
        *text = result.into_owned();
    }
    count
}

fn decode_code_unit(hex: &str) -> Option<char> {
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

fn parse_char_code(n: &str) -> Option<char> {
    let code = match n.strip_prefix("0x").or_else(|| n.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => n.parse().ok()?,
    };
    char::from_u32(code)
}

/// Characters that can be substituted inside any literal without changing
/// where it ends.
fn literal_safe(c: char) -> bool {
    !c.is_control() && !matches!(c, '"' | '\'' | '`' | '\\' | '/')
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ── Reflow ──────────────────────────────────────────────────────────────────

/// Put statements and blocks on their own lines, indented by brace depth.
///
/// Fails on an unterminated string, comment or regex literal and on
/// unbalanced brackets.
pub fn reflow(source: &str) -> Result<String, TransformError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let byte_at = |idx: usize| chars.get(idx).map(|(o, _)| *o).unwrap_or(source.len());

    let mut w = LineWriter::with_capacity(source.len() + source.len() / 8);
    let mut open: Vec<(char, usize)> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        match c {
            '"' | '\'' | '`' => {
                let end = scan_string(&chars, i, c)?;
                w.push_str(&source[offset..byte_at(end)]);
                i = end;
                continue;
            }
            '/' if next == Some('/') => {
                let end = chars[i..]
                    .iter()
                    .position(|(_, ch)| *ch == '\n')
                    .map(|p| i + p)
                    .unwrap_or(chars.len());
                w.push_str(&source[offset..byte_at(end)]);
                w.newline();
                i = end;
                continue;
            }
            '/' if next == Some('*') => {
                let end = source[offset + 2..]
                    .find("*/")
                    .map(|p| offset + 2 + p + 2)
                    .ok_or_else(|| TransformError::malformed(offset, "unterminated comment"))?;
                w.push_str(&source[offset..end]);
                i = chars.partition_point(|(o, _)| *o < end);
                continue;
            }
            '/' if regex_allowed(w.tail()) => {
                let end = scan_regex(&chars, i)?;
                w.push_str(&source[offset..byte_at(end)]);
                i = end;
                continue;
            }
            '(' | '[' => {
                open.push((c, offset));
                w.push(c);
            }
            ')' | ']' => {
                let expected = if c == ')' { '(' } else { '[' };
                match open.pop() {
                    Some((o, _)) if o == expected => w.push(c),
                    _ => return Err(TransformError::malformed(offset, format!("unexpected '{c}'"))),
                }
            }
            '{' => {
                open.push(('{', offset));
                w.push('{');
                w.indent();
                w.newline();
            }
            '}' => {
                match open.pop() {
                    Some(('{', _)) if w.dedent() => {}
                    _ => return Err(TransformError::malformed(offset, "unexpected '}'")),
                }
                w.newline();
                w.push('}');
                if !matches!(peek_visible(&chars, i + 1), Some(';' | ',' | ')' | ']' | '.')) {
                    w.newline();
                }
            }
            ';' => {
                w.push(';');
                if !matches!(open.last(), Some(('(' | '[', _))) {
                    w.newline();
                }
            }
            c if c.is_whitespace() => {
                let mut saw_newline = false;
                while let Some((_, ws)) = chars.get(i).filter(|(_, ch)| ch.is_whitespace()) {
                    saw_newline |= *ws == '\n';
                    i += 1;
                }
                if saw_newline {
                    w.newline();
                } else {
                    w.space();
                }
                continue;
            }
            c => w.push(c),
        }
        i += 1;
    }

    if let Some((c, offset)) = open.last() {
        return Err(TransformError::malformed(*offset, format!("unclosed '{c}'")));
    }

    Ok(w.finish())
}

/// Index one past the closing quote.
fn scan_string(chars: &[(usize, char)], start: usize, quote: char) -> Result<usize, TransformError> {
    let mut j = start + 1;
    while let Some((_, c)) = chars.get(j) {
        match *c {
            '\\' => j += 2,
            c if c == quote => return Ok(j + 1),
            '\n' if quote != '`' => break,
            _ => j += 1,
        }
    }
    Err(TransformError::malformed(chars[start].0, "unterminated string"))
}

/// Index one past the last flag of a regex literal.
fn scan_regex(chars: &[(usize, char)], start: usize) -> Result<usize, TransformError> {
    let mut j = start + 1;
    let mut in_class = false;
    while let Some((_, c)) = chars.get(j) {
        match *c {
            '\\' => {
                j += 2;
                continue;
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => {
                j += 1;
                while chars.get(j).is_some_and(|(_, f)| f.is_ascii_alphabetic()) {
                    j += 1;
                }
                return Ok(j);
            }
            '\n' => break,
            _ => {}
        }
        j += 1;
    }
    Err(TransformError::malformed(chars[start].0, "unterminated regex literal"))
}

fn peek_visible(chars: &[(usize, char)], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .map(|(_, c)| *c)
        .find(|c| !c.is_whitespace())
}

/// Whether a `/` at this point starts a regex literal rather than a division.
fn regex_allowed(tail: &str) -> bool {
    let Some(last) = tail.chars().last() else {
        return true;
    };
    if "(,=:[!&|?{};+-*%<>~^".contains(last) {
        return true;
    }
    const KEYWORDS: &[&str] = &["return", "typeof", "case", "in", "of", "void", "delete", "throw", "new", "else", "do"];
    KEYWORDS.iter().any(|kw| {
        tail.strip_suffix(kw).is_some_and(|before| {
            !before
                .chars()
                .last()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
    })
}
