//! Pattern matching over extracted units.
//!
//! A [`PatternSet`] is compiled once per scan. Literal patterns go through a
//! single leftmost-longest Aho-Corasick automaton; regular expressions are
//! run side by side and the earliest, then longest, candidate wins. Either
//! way matches within one unit never overlap.

use crate::config::PatternMode;
use crate::errors::ScanError;
use crate::extraction::ExtractedUnit;
use aho_corasick::{AhoCorasick, Input, MatchKind};
use regex::{Regex, RegexBuilder};
use std::cmp::Reverse;
use std::sync::Arc;

/// One occurrence of a pattern in a unit. Offsets are byte offsets into
/// `unit.text`.
#[derive(Debug, Clone)]
pub struct Match {
    pub unit: Arc<ExtractedUnit>,
    /// Index into the scan's pattern list.
    pub pattern: usize,
    pub start: usize,
    pub end: usize,
    /// 1-based line of `start`.
    pub line_number: usize,
}

impl Match {
    pub fn matched_text(&self) -> &str {
        &self.unit.text[self.start..self.end]
    }
}

enum Matcher {
    Literal(AhoCorasick),
    Regex(Vec<Regex>),
}

pub struct PatternSet {
    patterns: Vec<String>,
    matcher: Matcher,
}

impl std::fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternSet")
            .field("patterns", &self.patterns)
            .finish()
    }
}

impl PatternSet {
    /// Validate and compile `patterns`. Fails on an empty list, an empty
    /// pattern or an invalid regular expression.
    pub fn compile(
        patterns: &[String],
        mode: PatternMode,
        case_insensitive: bool,
    ) -> Result<Self, ScanError> {
        if patterns.is_empty() {
            return Err(ScanError::InvalidPattern("no patterns given".to_string()));
        }
        if patterns.iter().any(|p| p.is_empty()) {
            return Err(ScanError::InvalidPattern("empty pattern".to_string()));
        }

        let matcher = match mode {
            // ASCII folding is all Aho-Corasick offers; anything else goes
            // through escaped regexes.
            PatternMode::Literal if case_insensitive && !patterns.iter().all(|p| p.is_ascii()) => {
                let escaped: Vec<String> = patterns.iter().map(|p| regex::escape(p)).collect();
                Matcher::Regex(build_regexes(&escaped, patterns, true)?)
            }
            PatternMode::Literal => {
                let ac = AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .ascii_case_insensitive(case_insensitive)
                    .build(patterns)
                    .map_err(|e| ScanError::InvalidPattern(e.to_string()))?;
                Matcher::Literal(ac)
            }
            PatternMode::Regex => Matcher::Regex(build_regexes(patterns, patterns, case_insensitive)?),
        };

        Ok(Self {
            patterns: patterns.to_vec(),
            matcher,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Lazily iterate the matches in `unit`.
    pub fn matches<'a>(&'a self, unit: &'a Arc<ExtractedUnit>) -> Matches<'a> {
        let slots = match &self.matcher {
            Matcher::Literal(_) => Vec::new(),
            Matcher::Regex(regexes) => vec![Slot::Unknown; regexes.len()],
        };
        Matches {
            set: self,
            unit,
            pos: 0,
            line: 1,
            line_pos: 0,
            slots,
        }
    }

    /// All matches in `units`, in unit order.
    pub fn search(&self, units: &[Arc<ExtractedUnit>]) -> Vec<Match> {
        units.iter().flat_map(|u| self.matches(u)).collect()
    }
}

fn build_regexes(
    sources: &[String],
    originals: &[String],
    case_insensitive: bool,
) -> Result<Vec<Regex>, ScanError> {
    sources
        .iter()
        .zip(originals)
        .map(|(source, original)| {
            RegexBuilder::new(source)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| ScanError::InvalidPattern(format!("{original}: {e}")))
        })
        .collect()
}

/// Next known hit of one regex.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Unknown,
    Found(usize, usize),
    Exhausted,
}

/// Iterator returned by [`PatternSet::matches`].
pub struct Matches<'a> {
    set: &'a PatternSet,
    unit: &'a Arc<ExtractedUnit>,
    pos: usize,
    line: usize,
    line_pos: usize,
    /// One per regex. A regex is only searched again once `pos` has moved
    /// past its cached hit, so each regex scans the unit about once.
    slots: Vec<Slot>,
}

impl Matches<'_> {
    /// Next candidate at or after `pos` as `(start, end, pattern)`.
    fn find_next(&mut self, text: &str) -> Option<(usize, usize, usize)> {
        let pos = self.pos;
        let set = self.set;
        match &set.matcher {
            Matcher::Literal(ac) => {
                let input = Input::new(text).span(pos..text.len());
                ac.find(input)
                    .map(|m| (m.start(), m.end(), m.pattern().as_usize()))
            }
            Matcher::Regex(regexes) => {
                for (slot, re) in self.slots.iter_mut().zip(regexes) {
                    let stale = match *slot {
                        Slot::Unknown => true,
                        Slot::Found(start, _) => start < pos,
                        Slot::Exhausted => false,
                    };
                    if stale {
                        *slot = match re.find_at(text, pos) {
                            Some(m) => Slot::Found(m.start(), m.end()),
                            None => Slot::Exhausted,
                        };
                    }
                }
                self.slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| match *slot {
                        Slot::Found(start, end) => Some((start, end, i)),
                        _ => None,
                    })
                    .min_by_key(|&(start, end, i)| (start, Reverse(end), i))
            }
        }
    }
}

impl Iterator for Matches<'_> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        let text = self.unit.text.as_str();
        loop {
            if self.pos > text.len() {
                return None;
            }
            let (start, end, pattern) = self.find_next(text)?;
            if start == end {
                // Empty-width: step past one character and retry.
                self.pos = end + text[end..].chars().next().map_or(1, char::len_utf8);
                continue;
            }
            self.pos = end;

            self.line += text[self.line_pos..start].matches('\n').count();
            self.line_pos = start;

            return Some(Match {
                unit: Arc::clone(self.unit),
                pattern,
                start,
                end,
                line_number: self.line,
            });
        }
    }
}
