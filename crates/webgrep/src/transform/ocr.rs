//! OCR collaborator backed by the `tesseract` command-line tool.

use crate::errors::OcrError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Recover rendered text from image bytes.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// Runs `tesseract stdin stdout`, feeding the image on stdin.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: Option<String>,
}

impl TesseractOcr {
    /// Find `tesseract` on `PATH`.
    pub fn locate() -> Result<Self, OcrError> {
        let binary =
            which::which("tesseract").map_err(|e| OcrError::Unavailable(e.to_string()))?;
        Ok(Self::with_binary(binary))
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            language: None,
        }
    }

    /// Tesseract language code(s), e.g. `eng+fra`.
    pub fn language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("stdin").arg("stdout");
        if let Some(lang) = &self.language {
            cmd.arg("-l").arg(lang);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::Failed("stdin not captured".to_string()))?;
        let data = image.to_vec();
        // Feed stdin concurrently so a chatty child cannot deadlock on a full
        // stdout pipe.
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(&data).await;
        });

        let output = child.wait_with_output().await?;
        let _ = writer.await;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
