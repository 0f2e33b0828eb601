//! Error taxonomy.
//!
//! Everything except [`ScanError`] is recoverable: the pipeline records it as
//! a [`Failure`](crate::report::Failure) against the resource that caused it
//! and keeps scanning.

use std::time::Duration;
use thiserror::Error;

/// Transport failures for a single resource.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),
}

/// A beautify/deobfuscate/unminify step could not make sense of its input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("malformed source at byte {offset}: {message}")]
    Malformed { offset: usize, message: String },
    #[error("{0} sources are not supported by this beautifier")]
    Unsupported(&'static str),
}

impl TransformError {
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    #[error("OCR failed: {0}")]
    Failed(String),
    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SteganographyError {
    /// Not a failure from the scan's point of view: the image simply carries
    /// nothing this extractor recognizes.
    #[error("no hidden payload found")]
    NoPayload,
    #[error("steganography backend unavailable: {0}")]
    Unavailable(String),
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("steganography I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed markup or metadata.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{what} truncated at byte {offset}")]
    Truncated { what: &'static str, offset: usize },
    #[error("bad {what} header")]
    BadHeader { what: &'static str },
    #[error("{what} offset {offset} out of bounds")]
    BadOffset { what: &'static str, offset: usize },
    #[error("invalid {what}: {message}")]
    Invalid { what: &'static str, message: String },
}

/// Fatal errors: the scan does not start.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP client setup failed: {0}")]
    Client(String),
}
