//! Content extraction.
//!
//! Every fetched resource goes through exactly one [`Extractor`] variant,
//! which turns its bytes into [`ExtractedUnit`]s: normalized, searchable
//! text views with provenance. Extractors never fail as a whole. Each
//! best-effort step records a [`Failure`] and falls back to whatever it can
//! still offer.

pub mod html;
pub mod image;
pub mod metadata;
pub mod script;
pub mod stylesheet;

use crate::acquisition::{ContentKind, FetchedResource, Ordinal, ResourceHint};
use crate::config::{ScanConfig, TransformToggles};
use crate::report::{Failure, Stage};
use crate::transform::{
    Beautifier, LsbExtractor, OcrEngine, SourceBeautifier, SourceKind, StegExtractor,
    SteghideExtractor, TesseractOcr,
};
use async_trait::async_trait;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub use self::html::HtmlExtractor;
pub use self::image::ImageExtractor;
pub use self::script::ScriptExtractor;
pub use self::stylesheet::StylesheetExtractor;

/// What kind of text a unit holds. Declaration order is report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    HtmlText,
    JsText,
    CssText,
    ExifField,
    OcrText,
    StegPayload,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HtmlText => "html_text",
            Self::JsText => "js_text",
            Self::CssText => "css_text",
            Self::ExifField => "exif_field",
            Self::OcrText => "ocr_text",
            Self::StegPayload => "steg_payload",
        }
    }
}

/// Transforms that shaped a unit's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transform {
    Deobfuscated,
    Unminified,
    Ocr,
    StegExtracted,
}

/// Identity shared by the transform variants of one unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitKey {
    pub ordinal: Ordinal,
    pub kind: UnitKind,
    pub label: String,
}

/// One searchable text view of a resource.
#[derive(Debug, Clone)]
pub struct ExtractedUnit {
    pub source_url: Url,
    pub ordinal: Ordinal,
    pub kind: UnitKind,
    pub label: String,
    /// Position among the units produced from the same resource.
    pub index: usize,
    pub text: String,
    pub transforms: BTreeSet<Transform>,
    pub warnings: Vec<String>,
}

impl ExtractedUnit {
    pub fn key(&self) -> UnitKey {
        UnitKey {
            ordinal: self.ordinal.clone(),
            kind: self.kind,
            label: self.label.clone(),
        }
    }
}

/// A link the HTML extractor found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    pub url: Url,
    pub hint: ResourceHint,
}

/// Everything one extractor produced for one resource.
#[derive(Debug, Default)]
pub struct Extraction {
    pub units: Vec<ExtractedUnit>,
    pub discovered: Vec<DiscoveredLink>,
    pub failures: Vec<Failure>,
}

impl Extraction {
    /// Append a unit and return it for transforms/warnings to be filled in.
    pub fn push_unit(
        &mut self,
        resource: &FetchedResource,
        kind: UnitKind,
        label: impl Into<String>,
        text: &str,
    ) -> &mut ExtractedUnit {
        let index = self.units.len();
        self.units.push(ExtractedUnit {
            source_url: resource.url.clone(),
            ordinal: resource.ordinal.clone(),
            kind,
            label: label.into(),
            index,
            text: searchable_text(text).into_owned(),
            transforms: BTreeSet::new(),
            warnings: Vec::new(),
        });
        let last = self.units.len() - 1;
        &mut self.units[last]
    }

    pub fn fail(&mut self, resource: &FetchedResource, stage: Stage, reason: impl ToString) {
        self.failures.push(Failure {
            resource_url: resource.url.to_string(),
            ordinal: resource.ordinal.clone(),
            stage,
            reason: reason.to_string(),
        });
    }
}

/// Render control characters (other than line breaks and tabs) as `\xNN`
/// so unit text is never raw binary.
pub fn searchable_text(text: &str) -> Cow<'_, str> {
    if !text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
            let _ = write!(out, "\\x{:02x}", c as u32);
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

// ── Context ─────────────────────────────────────────────────────────────────

/// Collaborators and switches shared by every extractor during a scan.
#[derive(Clone)]
pub struct ExtractContext {
    pub beautifier: Arc<dyn Beautifier>,
    pub ocr: Option<Arc<dyn OcrEngine>>,
    /// Tried in order; the first payload wins.
    pub steg: Vec<Arc<dyn StegExtractor>>,
    pub transforms: TransformToggles,
    pub steg_passphrase: Option<String>,
    pub search_raw: bool,
}

impl ExtractContext {
    /// In-process collaborators only: no OCR, LSB steganography.
    pub fn offline(config: &ScanConfig) -> Self {
        let lsb: Arc<dyn StegExtractor> = Arc::new(LsbExtractor::default());
        Self {
            beautifier: Arc::new(SourceBeautifier),
            ocr: None,
            steg: vec![lsb],
            transforms: config.transforms.clone(),
            steg_passphrase: config.steg_passphrase.clone(),
            search_raw: config.search_raw,
        }
    }

    /// [`offline`](Self::offline) plus whichever external tools are
    /// installed, for the transforms that are enabled.
    pub fn detect(config: &ScanConfig) -> Self {
        let mut ctx = Self::offline(config);

        if config.transforms.ocr {
            match TesseractOcr::locate() {
                Ok(engine) => {
                    let engine = match &config.ocr_language {
                        Some(lang) => engine.language(lang),
                        None => engine,
                    };
                    ctx.ocr = Some(Arc::new(engine));
                }
                Err(e) => warn!("OCR disabled: {e}"),
            }
        }

        if config.transforms.steganography {
            match SteghideExtractor::locate() {
                Ok(steghide) => ctx.steg.push(Arc::new(steghide)),
                Err(e) => debug!("steghide backend skipped: {e}"),
            }
        }

        ctx
    }

    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    pub fn with_steg(mut self, backends: Vec<Arc<dyn StegExtractor>>) -> Self {
        self.steg = backends;
        self
    }

    pub fn with_beautifier(mut self, beautifier: Arc<dyn Beautifier>) -> Self {
        self.beautifier = beautifier;
        self
    }
}

// ── Dispatch ────────────────────────────────────────────────────────────────

/// Turn one resource into searchable units.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, resource: &FetchedResource, ctx: &ExtractContext) -> Extraction;
}

/// The closed set of extractors, one per [`ContentKind`].
#[derive(Debug, Clone, Copy)]
pub enum Extractor {
    Html(HtmlExtractor),
    JavaScript(ScriptExtractor),
    Css(StylesheetExtractor),
    Image(ImageExtractor),
}

impl Extractor {
    pub fn for_kind(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Html => Self::Html(HtmlExtractor),
            ContentKind::JavaScript => Self::JavaScript(ScriptExtractor),
            ContentKind::Css => Self::Css(StylesheetExtractor),
            ContentKind::Image => Self::Image(ImageExtractor),
        }
    }
}

#[async_trait]
impl ContentExtractor for Extractor {
    async fn extract(&self, resource: &FetchedResource, ctx: &ExtractContext) -> Extraction {
        match self {
            Self::Html(e) => e.extract(resource, ctx).await,
            Self::JavaScript(e) => e.extract(resource, ctx).await,
            Self::Css(e) => e.extract(resource, ctx).await,
            Self::Image(e) => e.extract(resource, ctx).await,
        }
    }
}

/// Beautify `source` and push the result, falling back to the raw text with
/// a warning when the beautifier gives up. With `search_raw`, the raw text
/// is pushed as a second variant of the same unit.
pub(crate) fn push_source_units(
    out: &mut Extraction,
    resource: &FetchedResource,
    label: &str,
    source: &str,
    kind: SourceKind,
    ctx: &ExtractContext,
) {
    let (unit_kind, transform, enabled) = match kind {
        SourceKind::JavaScript => (UnitKind::JsText, Transform::Deobfuscated, ctx.transforms.deobfuscate),
        SourceKind::Css => (UnitKind::CssText, Transform::Unminified, ctx.transforms.unminify),
    };

    if !enabled {
        out.push_unit(resource, unit_kind, label, source);
        return;
    }

    match ctx.beautifier.beautify(source, kind) {
        Ok(pretty) => {
            let unit = out.push_unit(resource, unit_kind, label, &pretty);
            unit.transforms.insert(transform);
            if ctx.search_raw && pretty != source {
                out.push_unit(resource, unit_kind, label, source);
            }
        }
        Err(e) => {
            debug!("{} beautifier failed on {label} of {}: {e}", kind.name(), resource.url);
            let unit = out.push_unit(resource, unit_kind, label, source);
            unit.warnings
                .push(format!("{} beautification failed, searching raw source: {e}", kind.name()));
            out.fail(resource, Stage::Transform, format!("{label}: {e}"));
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn resource(url: &str, content_type: &str, bytes: &[u8]) -> FetchedResource {
        FetchedResource {
            url: Url::parse(url).unwrap(),
            content_type: Some(content_type.to_string()),
            bytes: bytes.to_vec(),
            depth: 0,
            ordinal: Ordinal::root(),
            hint: ResourceHint::Page,
        }
    }

    pub fn context() -> ExtractContext {
        ExtractContext::offline(&ScanConfig::default())
    }
}
