//! Terminal rendering of scan results.

use crate::matching::Match;
use crate::report::{ScanResult, ScanStatus};
use std::io::{IsTerminal, Write};

/// Longest snippet context kept on each side of a hit.
const CONTEXT_CHARS: usize = 60;

/// Check if color output is enabled.
pub fn color_enabled() -> bool {
    // https://no-color.org/
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }
    // --no-color
    if std::env::var("WEBGREP_NO_COLOR").is_ok() {
        return false;
    }
    std::io::stdout().is_terminal()
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const MAGENTA: &str = "\x1b[35m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Colored string builder.
pub struct Styled {
    use_color: bool,
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}

impl Styled {
    pub fn new() -> Self {
        Self {
            use_color: color_enabled(),
        }
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }

    pub fn fail_sym(&self) -> &str {
        if self.use_color {
            "\x1b[31m\u{2717}\x1b[0m"
        } else {
            "!!"
        }
    }

    pub fn warn_sym(&self) -> &str {
        if self.use_color {
            "\x1b[33m\u{26a0}\x1b[0m"
        } else {
            "??"
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color {
            format!("{code}{s}{RESET}")
        } else {
            s.to_string()
        }
    }

    pub fn green(&self, s: &str) -> String {
        self.paint(GREEN, s)
    }

    pub fn red(&self, s: &str) -> String {
        self.paint(RED, s)
    }

    pub fn magenta(&self, s: &str) -> String {
        self.paint(MAGENTA, s)
    }

    pub fn dim(&self, s: &str) -> String {
        self.paint(DIM, s)
    }

    pub fn bold(&self, s: &str) -> String {
        self.paint(BOLD, s)
    }
}

/// Check if --quiet mode is active.
pub fn is_quiet() -> bool {
    std::env::var("WEBGREP_QUIET").is_ok()
}

/// Check if --verbose mode is active.
pub fn is_verbose() -> bool {
    std::env::var("WEBGREP_VERBOSE").is_ok()
}

/// Print JSON output to stdout.
pub fn print_json(value: &serde_json::Value) {
    if let Ok(s) = serde_json::to_string_pretty(value) {
        println!("{s}");
    }
}

/// One grep-style line: `url [kind label] line: snippet`.
pub fn format_match(s: &Styled, m: &Match) -> String {
    let unit = &m.unit;
    format!(
        "{} [{} {}] {}: {}",
        s.magenta(unit.source_url.as_str()),
        unit.kind.as_str(),
        unit.label,
        s.green(&m.line_number.to_string()),
        snippet(s, m),
    )
}

/// The matched line, clipped around the hit, with the hit highlighted.
fn snippet(s: &Styled, m: &Match) -> String {
    let text = m.unit.text.as_str();
    let line_start = text[..m.start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[m.end..].find('\n').map_or(text.len(), |i| m.end + i);

    let before = &text[line_start..m.start];
    let after = &text[m.end..line_end];
    let before = match before.char_indices().rev().nth(CONTEXT_CHARS - 1) {
        Some((i, _)) if i > 0 => format!("...{}", &before[i..]),
        _ => before.to_string(),
    };
    let after = match after.char_indices().nth(CONTEXT_CHARS) {
        Some((i, _)) => format!("{}...", &after[..i]),
        None => after.to_string(),
    };

    // A hit spanning lines is shown up to its first line break.
    let hit = m.matched_text().lines().next().unwrap_or_default();
    format!(
        "{}{}{}",
        before.trim_start(),
        s.bold(&s.red(hit)),
        after.trim_end()
    )
}

/// Matches to stdout, then failures and warnings to stderr unless quiet.
pub fn print_text(s: &Styled, result: &ScanResult) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for m in &result.matches {
        if writeln!(out, "{}", format_match(s, m)).is_err() {
            // Closed pipe (`| head`).
            return;
        }
    }
    drop(out);

    if is_quiet() {
        return;
    }

    if result.status == ScanStatus::RootUnreachable {
        eprintln!("  {} {} could not be fetched", s.fail_sym(), result.root);
    }

    if !result.failures.is_empty() {
        eprintln!();
        eprintln!("  {}", s.bold("Could not be fully processed:"));
        for f in &result.failures {
            let stage = format!("{:?}", f.stage).to_lowercase();
            eprintln!("    {} {} {} {}", s.fail_sym(), f.resource_url, s.dim(&format!("[{stage}]")), f.reason);
        }
    }

    for w in &result.warnings {
        eprintln!("  {} {w}", s.warn_sym());
    }

    if is_verbose() {
        eprintln!();
        eprintln!(
            "  {} {} matches, {} resources, {} units, {}",
            s.bold("Status:"),
            result.matches.len(),
            result.stats.resources_fetched,
            result.stats.units_extracted,
            format_size(result.stats.bytes_fetched as u64),
        );
    }
}

/// Format bytes into human-readable size (e.g., "28.7 MB").
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Ordinal;
    use crate::extraction::{ExtractedUnit, UnitKind};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use url::Url;

    fn hit(text: &str, needle: &str) -> Match {
        let start = text.find(needle).unwrap();
        let unit = Arc::new(ExtractedUnit {
            source_url: Url::parse("https://example.com/app.js").unwrap(),
            ordinal: Ordinal::root().child(0),
            kind: UnitKind::JsText,
            label: "script".to_string(),
            index: 0,
            text: text.to_string(),
            transforms: BTreeSet::new(),
            warnings: Vec::new(),
        });
        let line_number = text[..start].matches('\n').count() + 1;
        Match {
            unit,
            pattern: 0,
            start,
            end: start + needle.len(),
            line_number,
        }
    }

    #[test]
    fn test_format_match_plain() {
        let m = hit("var a=1;\n  a=a+1;\nend();", "a=a");
        assert_eq!(
            format_match(&Styled::plain(), &m),
            "https://example.com/app.js [js_text script] 2: a=a+1;"
        );
    }

    #[test]
    fn test_snippet_clips_long_lines() {
        let long = format!("{}needle{}", "x".repeat(100), "y".repeat(100));
        let m = hit(&long, "needle");
        let line = format_match(&Styled::plain(), &m);
        let expected = format!("...{}needle{}...", "x".repeat(CONTEXT_CHARS), "y".repeat(CONTEXT_CHARS));
        assert!(line.ends_with(&expected));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
