//! Best-effort transform collaborators.
//!
//! Each collaborator sits behind a narrow trait so the extractors never care
//! whether the work happens in-process (beautifiers, LSB decoding) or in an
//! external tool (tesseract, steghide).

pub mod css_unminify;
pub mod js_beautify;
mod layout;
pub mod ocr;
pub mod steg;

use crate::errors::TransformError;

pub use ocr::{OcrEngine, TesseractOcr};
pub use steg::{LsbExtractor, StegExtractor, SteghideExtractor};

/// Source languages the beautifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    JavaScript,
    Css,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JavaScript => "JavaScript",
            Self::Css => "CSS",
        }
    }
}

/// Make minified or obfuscated source readable.
pub trait Beautifier: Send + Sync {
    fn beautify(&self, source: &str, kind: SourceKind) -> Result<String, TransformError>;
}

/// In-process beautifier: [`js_beautify`] for scripts, [`css_unminify`] for
/// stylesheets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceBeautifier;

impl Beautifier for SourceBeautifier {
    fn beautify(&self, source: &str, kind: SourceKind) -> Result<String, TransformError> {
        match kind {
            SourceKind::JavaScript => js_beautify::beautify(source),
            SourceKind::Css => css_unminify::unminify(source),
        }
    }
}
