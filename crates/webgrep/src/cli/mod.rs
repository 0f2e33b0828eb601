//! Command-line interface for the `webgrep` binary.

pub mod output;
pub mod scan_cmd;

use crate::config::{PatternMode, ScanConfig};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Search a web page, its scripts, stylesheets and images for a pattern.
#[derive(Debug, Parser)]
#[command(name = "webgrep", version, about)]
pub struct Cli {
    /// Page to scan (http, https or data URL)
    pub url: String,

    /// Patterns to search for
    pub patterns: Vec<String>,

    /// Additional pattern; may be repeated
    #[arg(short = 'e', long = "regexp", value_name = "PATTERN")]
    pub regexp: Vec<String>,

    /// Treat patterns as literal strings
    #[arg(short = 'F', long)]
    pub fixed_strings: bool,

    #[arg(short = 'i', long)]
    pub ignore_case: bool,

    #[arg(long)]
    pub no_deobfuscate: bool,

    #[arg(long)]
    pub no_unminify: bool,

    #[arg(long)]
    pub no_exif: bool,

    #[arg(long)]
    pub no_ocr: bool,

    #[arg(long)]
    pub no_steg: bool,

    /// Passphrase for steganography backends that take one
    #[arg(long)]
    pub passphrase: Option<String>,

    /// Also search untransformed script and stylesheet source
    #[arg(long)]
    pub search_raw: bool,

    /// Page-to-page hops to follow on the root's host
    #[arg(long)]
    pub depth: Option<usize>,

    /// Maximum resources to fetch, root included
    #[arg(long)]
    pub max_resources: Option<usize>,

    /// Concurrent fetches
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-fetch timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Minimum milliseconds between request starts
    #[arg(long)]
    pub delay: Option<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Append scan events to this JSONL file
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,

    /// JSON config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub no_color: bool,

    /// Only print matches
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// `-e` patterns first, then positional ones.
    pub fn pattern_list(&self) -> Vec<String> {
        self.regexp
            .iter()
            .chain(self.patterns.iter())
            .cloned()
            .collect()
    }

    /// Flags override whatever the config file and environment set.
    pub fn apply(&self, config: &mut ScanConfig) {
        if self.fixed_strings {
            config.pattern_mode = PatternMode::Literal;
        }
        if self.ignore_case {
            config.case_insensitive = true;
        }
        if self.no_deobfuscate {
            config.transforms.deobfuscate = false;
        }
        if self.no_unminify {
            config.transforms.unminify = false;
        }
        if self.no_exif {
            config.transforms.exif = false;
        }
        if self.no_ocr {
            config.transforms.ocr = false;
        }
        if self.no_steg {
            config.transforms.steganography = false;
        }
        if let Some(p) = &self.passphrase {
            config.steg_passphrase = Some(p.clone());
        }
        if self.search_raw {
            config.search_raw = true;
        }
        if let Some(d) = self.depth {
            config.max_depth = d;
        }
        if let Some(n) = self.max_resources {
            config.max_resources = n;
        }
        if let Some(n) = self.concurrency {
            config.max_concurrency = n;
        }
        if let Some(ms) = self.timeout {
            config.fetch_timeout_ms = ms;
        }
        if let Some(ms) = self.delay {
            config.min_delay_ms = ms;
        }
    }
}
