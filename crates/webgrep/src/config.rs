//! Scan configuration.
//!
//! Layered as: built-in defaults, then a JSON file, then `WEBGREP_*`
//! environment variables. The CLI applies its flags on top.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which best-effort transforms run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformToggles {
    pub deobfuscate: bool,
    pub unminify: bool,
    pub exif: bool,
    pub ocr: bool,
    pub steganography: bool,
}

impl Default for TransformToggles {
    fn default() -> Self {
        Self {
            deobfuscate: true,
            unminify: true,
            exif: true,
            ocr: true,
            steganography: true,
        }
    }
}

/// How patterns are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    #[default]
    Regex,
    Literal,
}

/// Everything that bounds and shapes one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Fetched resources, root included.
    pub max_resources: usize,
    /// Page-to-page hops. 0 scans the root page and its assets only.
    pub max_depth: usize,
    /// Concurrent sub-resource fetches.
    pub max_concurrency: usize,
    /// Per-fetch timeout in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Minimum milliseconds between two request starts.
    pub min_delay_ms: u64,
    /// Bodies larger than this are truncated before extraction.
    pub max_resource_bytes: usize,
    /// Only follow page links on the root's host.
    pub same_host_pages: bool,
    pub user_agent: String,
    pub pattern_mode: PatternMode,
    pub case_insensitive: bool,
    /// Also search the untransformed source of scripts and stylesheets.
    pub search_raw: bool,
    pub steg_passphrase: Option<String>,
    /// Tesseract language code(s); tesseract's own default when unset.
    pub ocr_language: Option<String>,
    pub transforms: TransformToggles,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_resources: 100,
            max_depth: 0,
            max_concurrency: 8,
            fetch_timeout_ms: 10_000,
            min_delay_ms: 0,
            max_resource_bytes: 10 * 1024 * 1024,
            same_host_pages: true,
            user_agent: format!("webgrep/{}", env!("CARGO_PKG_VERSION")),
            pattern_mode: PatternMode::Regex,
            case_insensitive: false,
            search_raw: false,
            steg_passphrase: None,
            ocr_language: None,
            transforms: TransformToggles::default(),
        }
    }
}

impl ScanConfig {
    /// Defaults, overlaid with the user config file if one exists, then the
    /// environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `WEBGREP_*` overrides. `lookup` is injectable for tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WEBGREP_MAX_RESOURCES") {
            self.max_resources = v.parse().context("WEBGREP_MAX_RESOURCES")?;
        }
        if let Some(v) = lookup("WEBGREP_MAX_DEPTH") {
            self.max_depth = v.parse().context("WEBGREP_MAX_DEPTH")?;
        }
        if let Some(v) = lookup("WEBGREP_CONCURRENCY") {
            self.max_concurrency = v.parse().context("WEBGREP_CONCURRENCY")?;
        }
        if let Some(v) = lookup("WEBGREP_TIMEOUT_MS") {
            self.fetch_timeout_ms = v.parse().context("WEBGREP_TIMEOUT_MS")?;
        }
        if let Some(v) = lookup("WEBGREP_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("WEBGREP_STEG_PASSPHRASE") {
            self.steg_passphrase = Some(v);
        }
        if let Some(v) = lookup("WEBGREP_OCR_LANG") {
            self.ocr_language = Some(v);
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// `<config_dir>/webgrep/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("webgrep").join("config.json"))
}
