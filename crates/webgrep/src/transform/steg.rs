//! Steganography collaborators.
//!
//! [`LsbExtractor`] decodes least-significant-bit payloads in-process;
//! [`SteghideExtractor`] shells out to `steghide` for JPEG/BMP covers.

use crate::errors::SteganographyError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

/// Recover data hidden inside an image.
#[async_trait]
pub trait StegExtractor: Send + Sync {
    /// Short backend name used in unit labels.
    fn name(&self) -> &str;

    /// `Err(NoPayload)` means the image carries nothing this backend
    /// recognizes.
    async fn extract_hidden(
        &self,
        image: &[u8],
        passphrase: Option<&str>,
    ) -> Result<Vec<u8>, SteganographyError>;
}

// ── LSB ─────────────────────────────────────────────────────────────────────

/// Reads the least significant bit of each R, G, B sample in row-major
/// order, most significant bit first, and accepts either
///
/// - a 4-byte big-endian length followed by that many bytes of text, or
/// - a run of at least `min_text_len` printable characters ended by NUL.
#[derive(Debug, Clone)]
pub struct LsbExtractor {
    max_payload: usize,
    min_text_len: usize,
}

impl Default for LsbExtractor {
    fn default() -> Self {
        Self {
            max_payload: 64 * 1024,
            min_text_len: 6,
        }
    }
}

impl LsbExtractor {
    fn decode(&self, image: &[u8]) -> Result<Vec<u8>, SteganographyError> {
        let img = image::load_from_memory(image)
            .map_err(|e| SteganographyError::Decode(e.to_string()))?;
        let samples = img.to_rgb8().into_raw();

        let wanted = (self.max_payload + 4).min(samples.len() / 8);
        let bytes: Vec<u8> = samples
            .chunks_exact(8)
            .take(wanted)
            .map(|chunk| chunk.iter().fold(0u8, |acc, s| (acc << 1) | (s & 1)))
            .collect();

        if bytes.len() >= 4 {
            let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            if len > 0 && len <= self.max_payload && 4 + len <= bytes.len() {
                let payload = &bytes[4..4 + len];
                if is_printable(payload) {
                    return Ok(payload.to_vec());
                }
            }
        }

        if let Some(end) = bytes.iter().position(|b| *b == 0) {
            let payload = &bytes[..end];
            if payload.len() >= self.min_text_len && is_printable(payload) {
                return Ok(payload.to_vec());
            }
        }

        Err(SteganographyError::NoPayload)
    }
}

#[async_trait]
impl StegExtractor for LsbExtractor {
    fn name(&self) -> &str {
        "lsb"
    }

    async fn extract_hidden(
        &self,
        image: &[u8],
        _passphrase: Option<&str>,
    ) -> Result<Vec<u8>, SteganographyError> {
        let this = self.clone();
        let data = image.to_vec();
        tokio::task::spawn_blocking(move || this.decode(&data))
            .await
            .map_err(|e| SteganographyError::Decode(e.to_string()))?
    }
}

fn is_printable(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.chars().all(|c| !c.is_control() || c.is_whitespace()),
        Err(_) => false,
    }
}

// ── steghide ────────────────────────────────────────────────────────────────

/// Runs `steghide extract` against a temporary copy of the image.
#[derive(Debug, Clone)]
pub struct SteghideExtractor {
    binary: PathBuf,
}

impl SteghideExtractor {
    pub fn locate() -> Result<Self, SteganographyError> {
        let binary = which::which("steghide")
            .map_err(|e| SteganographyError::Unavailable(e.to_string()))?;
        Ok(Self::with_binary(binary))
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl StegExtractor for SteghideExtractor {
    fn name(&self) -> &str {
        "steghide"
    }

    async fn extract_hidden(
        &self,
        image: &[u8],
        passphrase: Option<&str>,
    ) -> Result<Vec<u8>, SteganographyError> {
        let dir = tempfile::tempdir()?;
        let cover = dir.path().join("cover");
        let extracted = dir.path().join("payload");
        tokio::fs::write(&cover, image).await?;

        let output = Command::new(&self.binary)
            .arg("extract")
            .arg("-sf")
            .arg(&cover)
            .arg("-xf")
            .arg(&extracted)
            .arg("-p")
            .arg(passphrase.unwrap_or(""))
            .arg("-f")
            .arg("-q")
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("could not extract") || stderr.contains("not supported") {
                return Err(SteganographyError::NoPayload);
            }
            return Err(SteganographyError::Decode(stderr.trim().to_string()));
        }

        Ok(tokio::fs::read(&extracted).await?)
    }
}
