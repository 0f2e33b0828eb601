//! webgrep: grep for web pages.
//!
//! Fetches a page and its sub-resources, turns every resource into
//! searchable text (visible HTML text, deobfuscated scripts, unminified
//! stylesheets, image metadata, OCR text, hidden payloads) and reports every
//! pattern hit with its provenance.

pub mod acquisition;
pub mod cli;
pub mod config;
pub mod errors;
pub mod events;
pub mod extraction;
pub mod matching;
pub mod pipeline;
pub mod report;
pub mod transform;

pub use config::{PatternMode, ScanConfig};
pub use errors::ScanError;
pub use matching::{Match, PatternSet};
pub use pipeline::TransformPipeline;
pub use report::{ScanResult, ScanStatus};

/// Compile `patterns` and scan `root` with the default collaborators.
pub async fn scan(config: ScanConfig, root: &str, patterns: &[String]) -> Result<ScanResult, ScanError> {
    let set = PatternSet::compile(patterns, config.pattern_mode, config.case_insensitive)?;
    TransformPipeline::new(config, set)?.run(root).await
}
