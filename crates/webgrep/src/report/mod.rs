//! Scan results: recorded failures, deterministic match ordering and the
//! JSON report.

use crate::acquisition::Ordinal;
use crate::matching::Match;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use url::Url;

/// Pipeline stage a failure happened in. Declaration order is report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Classify,
    Parse,
    Transform,
    Ocr,
    Steganography,
}

/// A resource or transform that could not be fully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub resource_url: String,
    pub ordinal: Ordinal,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    /// `max_resources` was reached with work left.
    Truncated,
    Cancelled,
    RootUnreachable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanStats {
    pub resources_fetched: usize,
    pub bytes_fetched: usize,
    pub units_extracted: usize,
}

/// Outcome of one scan.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub root: Url,
    pub patterns: Vec<String>,
    pub status: ScanStatus,
    pub matches: Vec<Match>,
    pub failures: Vec<Failure>,
    pub warnings: Vec<String>,
    pub stats: ScanStats,
}

impl ScanResult {
    /// 0 when something matched, 1 when nothing did, 2 when the root could
    /// not be fetched.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            ScanStatus::RootUnreachable => 2,
            _ if !self.matches.is_empty() => 0,
            _ => 1,
        }
    }

    pub fn to_json(&self) -> Value {
        let matches: Vec<Value> = self
            .matches
            .iter()
            .map(|m| {
                json!({
                    "url": m.unit.source_url.as_str(),
                    "ordinal": m.unit.ordinal.to_string(),
                    "kind": m.unit.kind,
                    "label": m.unit.label,
                    "unit_index": m.unit.index,
                    "pattern": self.patterns.get(m.pattern),
                    "start": m.start,
                    "end": m.end,
                    "line": m.line_number,
                    "text": m.matched_text(),
                    "transforms": m.unit.transforms,
                    "warnings": m.unit.warnings,
                })
            })
            .collect();

        let failures: Vec<Value> = self
            .failures
            .iter()
            .map(|f| {
                json!({
                    "url": f.resource_url,
                    "ordinal": f.ordinal.to_string(),
                    "stage": f.stage,
                    "reason": f.reason,
                })
            })
            .collect();

        json!({
            "root": self.root.as_str(),
            "status": self.status,
            "patterns": self.patterns,
            "matches": matches,
            "failures": failures,
            "warnings": self.warnings,
            "stats": self.stats,
        })
    }
}

/// Order and deduplicate matches and failures.
///
/// Matches sort by resource discovery order, unit kind, unit index, then
/// span. A span hit in several variants of the same unit is kept once, from
/// the first variant in that order.
pub fn aggregate(mut matches: Vec<Match>, mut failures: Vec<Failure>) -> (Vec<Match>, Vec<Failure>) {
    matches.sort_by(|a, b| {
        a.unit
            .ordinal
            .cmp(&b.unit.ordinal)
            .then(a.unit.kind.cmp(&b.unit.kind))
            .then(a.unit.index.cmp(&b.unit.index))
            .then(a.start.cmp(&b.start))
            .then(a.end.cmp(&b.end))
    });

    let mut seen = HashSet::new();
    matches.retain(|m| seen.insert((m.unit.key(), m.start, m.end)));

    // Stable: failures of one resource and stage keep recording order.
    failures.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then(a.stage.cmp(&b.stage)));

    (matches, failures)
}

/// Accumulates per-resource output while a scan runs.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    matches: Vec<Match>,
    failures: Vec<Failure>,
    warnings: Vec<String>,
    stats: ScanStats,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_matches(&mut self, matches: impl IntoIterator<Item = Match>) {
        self.matches.extend(matches);
    }

    pub fn add_failure(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    pub fn add_failures(&mut self, failures: impl IntoIterator<Item = Failure>) {
        self.failures.extend(failures);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn record_fetch(&mut self, bytes: usize) {
        self.stats.resources_fetched += 1;
        self.stats.bytes_fetched += bytes;
    }

    pub fn record_units(&mut self, count: usize) {
        self.stats.units_extracted += count;
    }

    pub fn finish(self, root: Url, patterns: Vec<String>, status: ScanStatus) -> ScanResult {
        let (matches, failures) = aggregate(self.matches, self.failures);
        ScanResult {
            root,
            patterns,
            status,
            matches,
            failures,
            warnings: self.warnings,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractedUnit, Transform, UnitKind};
    use assert_json_diff::assert_json_eq;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn unit(ordinal: Ordinal, kind: UnitKind, index: usize, label: &str) -> Arc<ExtractedUnit> {
        Arc::new(ExtractedUnit {
            source_url: Url::parse("https://example.com/app.js").unwrap(),
            ordinal,
            kind,
            label: label.to_string(),
            index,
            text: "a=a+1; a=a".to_string(),
            transforms: BTreeSet::new(),
            warnings: Vec::new(),
        })
    }

    fn hit(unit: &Arc<ExtractedUnit>, start: usize, end: usize) -> Match {
        Match {
            unit: Arc::clone(unit),
            pattern: 0,
            start,
            end,
            line_number: 1,
        }
    }

    fn failure(ordinal: Ordinal, stage: Stage, reason: &str) -> Failure {
        Failure {
            resource_url: "https://example.com/".to_string(),
            ordinal,
            stage,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_aggregate_orders_by_discovery_then_kind() {
        let root = Ordinal::root();
        let child = root.child(0);
        let js = unit(child.clone(), UnitKind::JsText, 0, "script");
        let page = unit(root.clone(), UnitKind::HtmlText, 0, "page");
        let inline = unit(root.clone(), UnitKind::JsText, 1, "inline-script#0");

        let (matches, _) = aggregate(
            vec![hit(&js, 0, 3), hit(&inline, 7, 10), hit(&page, 0, 3), hit(&inline, 0, 3)],
            Vec::new(),
        );
        let order: Vec<(&str, usize)> = matches
            .iter()
            .map(|m| (m.unit.label.as_str(), m.start))
            .collect();
        assert_eq!(
            order,
            vec![("page", 0), ("inline-script#0", 0), ("inline-script#0", 7), ("script", 0)]
        );
    }

    #[test]
    fn test_aggregate_dedups_variants() {
        let root = Ordinal::root();
        let pretty = unit(root.clone(), UnitKind::JsText, 0, "script");
        let raw = unit(root.clone(), UnitKind::JsText, 1, "script");

        let (matches, _) = aggregate(
            vec![hit(&raw, 0, 3), hit(&pretty, 0, 3), hit(&raw, 7, 10), hit(&pretty, 0, 3)],
            Vec::new(),
        );
        let kept: Vec<(usize, usize)> = matches.iter().map(|m| (m.unit.index, m.start)).collect();
        assert_eq!(kept, vec![(0, 0), (1, 7)]);
    }

    #[test]
    fn test_aggregate_orders_failures() {
        let root = Ordinal::root();
        let (_, failures) = aggregate(
            Vec::new(),
            vec![
                failure(root.child(1), Stage::Fetch, "b"),
                failure(root.clone(), Stage::Ocr, "c"),
                failure(root.clone(), Stage::Parse, "d"),
                failure(root.clone(), Stage::Parse, "e"),
            ],
        );
        let reasons: Vec<&str> = failures.iter().map(|f| f.reason.as_str()).collect();
        assert_eq!(reasons, vec!["d", "e", "c", "b"]);
    }

    #[test]
    fn test_exit_codes() {
        let root = Url::parse("https://example.com/").unwrap();
        let page = unit(Ordinal::root(), UnitKind::HtmlText, 0, "page");

        let mut agg = ResultAggregator::new();
        agg.add_matches([hit(&page, 0, 3)]);
        assert_eq!(agg.finish(root.clone(), vec![], ScanStatus::Truncated).exit_code(), 0);

        let none = ResultAggregator::new().finish(root.clone(), vec![], ScanStatus::Completed);
        assert_eq!(none.exit_code(), 1);

        let down = ResultAggregator::new().finish(root, vec![], ScanStatus::RootUnreachable);
        assert_eq!(down.exit_code(), 2);
    }

    #[test]
    fn test_json_report() {
        let root = Url::parse("https://example.com/").unwrap();
        let mut js = (*unit(Ordinal::root().child(0), UnitKind::JsText, 0, "script")).clone();
        js.transforms.insert(Transform::Deobfuscated);
        let js = Arc::new(js);

        let mut agg = ResultAggregator::new();
        agg.record_fetch(120);
        agg.record_units(1);
        agg.add_matches([hit(&js, 0, 3)]);
        agg.add_failure(failure(Ordinal::root().child(1), Stage::Fetch, "timed out after 50ms"));
        let result = agg.finish(root, vec!["a=a".to_string()], ScanStatus::Completed);

        assert_json_eq!(
            result.to_json(),
            json!({
                "root": "https://example.com/",
                "status": "completed",
                "patterns": ["a=a"],
                "matches": [{
                    "url": "https://example.com/app.js",
                    "ordinal": "0",
                    "kind": "js_text",
                    "label": "script",
                    "unit_index": 0,
                    "pattern": "a=a",
                    "start": 0,
                    "end": 3,
                    "line": 1,
                    "text": "a=a",
                    "transforms": ["deobfuscated"],
                    "warnings": [],
                }],
                "failures": [{
                    "url": "https://example.com/",
                    "ordinal": "1",
                    "stage": "fetch",
                    "reason": "timed out after 50ms",
                }],
                "warnings": [],
                "stats": {
                    "resources_fetched": 1,
                    "bytes_fetched": 120,
                    "units_extracted": 1,
                },
            })
        );
    }
}
