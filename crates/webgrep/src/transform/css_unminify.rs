//! CSS unminification: one selector or declaration per line.

use super::layout::LineWriter;
use crate::errors::TransformError;

/// Reflow minified CSS. Strings, comments and `url(...)` bodies are copied
/// verbatim; unterminated strings/comments and unbalanced braces are errors.
pub fn unminify(source: &str) -> Result<String, TransformError> {
    let bytes = source.as_bytes();
    let mut w = LineWriter::with_capacity(source.len() + source.len() / 4);
    let mut blocks: Vec<usize> = Vec::new();
    let mut parens = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' | b'\'' => {
                let end = scan_string(bytes, i)?;
                w.push_str(&source[i..end]);
                i = end;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = source[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .ok_or_else(|| TransformError::malformed(i, "unterminated comment"))?;
                w.push_str(&source[i..end]);
                if parens == 0 {
                    w.newline();
                }
                i = end;
                continue;
            }
            b'(' => {
                parens += 1;
                w.push('(');
            }
            b')' => {
                parens = parens
                    .checked_sub(1)
                    .ok_or_else(|| TransformError::malformed(i, "unexpected ')'"))?;
                w.push(')');
            }
            b'{' if parens == 0 => {
                blocks.push(i);
                w.space();
                w.push('{');
                w.indent();
                w.newline();
            }
            b'}' if parens == 0 => {
                if blocks.pop().is_none() || !w.dedent() {
                    return Err(TransformError::malformed(i, "unexpected '}'"));
                }
                w.newline();
                w.push('}');
                w.newline();
            }
            b';' if parens == 0 => {
                w.push(';');
                w.newline();
            }
            b',' if parens == 0 && blocks.is_empty() => {
                // Selector lists outside any block: one selector per line.
                w.push(',');
                w.newline();
            }
            b if b.is_ascii_whitespace() => {
                while bytes.get(i).is_some_and(|c| c.is_ascii_whitespace()) {
                    i += 1;
                }
                w.space();
                continue;
            }
            _ => {
                // Copy the whole UTF-8 sequence.
                let len = utf8_len(b);
                w.push_str(&source[i..(i + len).min(source.len())]);
                i += len;
                continue;
            }
        }
        i += 1;
    }

    if let Some(offset) = blocks.last() {
        return Err(TransformError::malformed(*offset, "unclosed '{'"));
    }
    if parens != 0 {
        return Err(TransformError::malformed(source.len(), "unclosed '('"));
    }
    Ok(w.finish())
}

fn scan_string(bytes: &[u8], start: usize) -> Result<usize, TransformError> {
    let quote = bytes[start];
    let mut j = start + 1;
    while let Some(&b) = bytes.get(j) {
        match b {
            b'\\' => j += 2,
            b'\n' => break,
            b if b == quote => return Ok(j + 1),
            _ => j += 1,
        }
    }
    Err(TransformError::malformed(start, "unterminated string"))
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        b if b >= 0xC0 => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unminify_rules() {
        let out = unminify("a,b{color:red;margin:0}p{x:1}").unwrap();
        assert_eq!(out, "a,\nb {\n  color:red;\n  margin:0\n}\np {\n  x:1\n}");
    }

    #[test]
    fn test_unminify_nested_at_rules() {
        let out = unminify("@media (max-width:600px){.a{display:none}}").unwrap();
        assert_eq!(
            out,
            "@media (max-width:600px) {\n  .a {\n    display:none\n  }\n}"
        );
    }

    #[test]
    fn test_unminify_keeps_urls_and_strings() {
        let out =
            unminify(r#".i{background:url(data:image/png;base64,AAA=);content:"a;b{"}"#).unwrap();
        assert!(out.contains("url(data:image/png;base64,AAA=);"));
        assert!(out.contains(r#"content:"a;b{""#));
    }

    #[test]
    fn test_unminify_rejects_malformed() {
        assert!(unminify(".a{color:red").is_err());
        assert!(unminify(".a{content:'x}").is_err());
        assert!(unminify("}").is_err());
    }

    #[test]
    fn test_unminify_utf8() {
        let out = unminify(".é{content:\"✓\"}").unwrap();
        assert_eq!(out, ".é {\n  content:\"✓\"\n}");
    }
}
