//! Images: metadata fields, OCR text and steganographic payloads.
//!
//! The three steps are independent. A failure in one is recorded and the
//! others still run.

use super::metadata::read_metadata;
use super::{ContentExtractor, ExtractContext, Extraction, Transform, UnitKind};
use crate::acquisition::FetchedResource;
use crate::errors::SteganographyError;
use crate::report::Stage;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageExtractor;

#[async_trait]
impl ContentExtractor for ImageExtractor {
    async fn extract(&self, resource: &FetchedResource, ctx: &ExtractContext) -> Extraction {
        let mut out = Extraction::default();

        if ctx.transforms.exif {
            extract_metadata(&mut out, resource);
        }
        if ctx.transforms.ocr {
            extract_ocr(&mut out, resource, ctx).await;
        }
        if ctx.transforms.steganography {
            extract_steg(&mut out, resource, ctx).await;
        }

        out
    }
}

fn extract_metadata(out: &mut Extraction, resource: &FetchedResource) {
    let metadata = read_metadata(&resource.bytes);
    let mut seen: HashMap<String, usize> = HashMap::new();

    for field in &metadata.fields {
        let mut label = field.label();
        // Repeated fields (two JPEG comments, say) stay distinct units.
        let n = seen.entry(label.clone()).or_insert(0);
        *n += 1;
        if *n > 1 {
            label = format!("{label}#{n}");
        }
        out.push_unit(resource, UnitKind::ExifField, label, &field.text());
    }

    if let Some(err) = metadata.error {
        out.fail(resource, Stage::Parse, err);
    }
}

async fn extract_ocr(out: &mut Extraction, resource: &FetchedResource, ctx: &ExtractContext) {
    let Some(engine) = &ctx.ocr else {
        return;
    };
    match engine.recognize_text(&resource.bytes).await {
        Ok(text) if !text.trim().is_empty() => {
            let unit = out.push_unit(resource, UnitKind::OcrText, "ocr", text.trim_end());
            unit.transforms.insert(Transform::Ocr);
        }
        Ok(_) => {}
        Err(e) => out.fail(resource, Stage::Ocr, e),
    }
}

async fn extract_steg(out: &mut Extraction, resource: &FetchedResource, ctx: &ExtractContext) {
    let passphrase = ctx.steg_passphrase.as_deref();
    for backend in &ctx.steg {
        match backend.extract_hidden(&resource.bytes, passphrase).await {
            Ok(payload) => {
                let text = String::from_utf8_lossy(&payload);
                let label = format!("steg:{}", backend.name());
                let unit = out.push_unit(resource, UnitKind::StegPayload, label, &text);
                unit.transforms.insert(Transform::StegExtracted);
                return;
            }
            Err(SteganographyError::NoPayload) => {
                debug!("{}: no {} payload", resource.url, backend.name());
            }
            Err(e) => out.fail(resource, Stage::Steganography, format!("{}: {e}", backend.name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::metadata::test_images::*;
    use super::super::test_support::*;
    use super::*;
    use crate::errors::OcrError;
    use crate::transform::{OcrEngine, StegExtractor};
    use std::sync::Arc;

    struct FixedOcr(Result<&'static str, &'static str>);

    #[async_trait]
    impl OcrEngine for FixedOcr {
        async fn recognize_text(&self, _image: &[u8]) -> Result<String, OcrError> {
            self.0
                .map(str::to_string)
                .map_err(|e| OcrError::Failed(e.to_string()))
        }
    }

    struct FixedSteg(&'static str, Option<&'static [u8]>);

    #[async_trait]
    impl StegExtractor for FixedSteg {
        fn name(&self) -> &str {
            self.0
        }

        async fn extract_hidden(
            &self,
            _image: &[u8],
            _passphrase: Option<&str>,
        ) -> Result<Vec<u8>, SteganographyError> {
            self.1
                .map(<[u8]>::to_vec)
                .ok_or(SteganographyError::NoPayload)
        }
    }

    fn comment_jpeg() -> Vec<u8> {
        jpeg(&[
            jpeg_segment(0xFE, b"the flag is here"),
            jpeg_segment(0xFE, b"second note"),
        ])
    }

    #[tokio::test]
    async fn test_metadata_units() {
        let res = resource("https://example.com/a.jpg", "image/jpeg", &comment_jpeg());
        let ctx = context().with_steg(Vec::new());
        let out = ImageExtractor.extract(&res, &ctx).await;

        let got: Vec<(&str, &str)> = out
            .units
            .iter()
            .map(|u| (u.label.as_str(), u.text.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("jpeg:Comment", "Comment: the flag is here"),
                ("jpeg:Comment#2", "Comment: second note"),
            ]
        );
        assert!(out.units.iter().all(|u| u.kind == UnitKind::ExifField));
        assert!(out.failures.is_empty());
    }

    #[tokio::test]
    async fn test_steps_are_independent() {
        let res = resource("https://example.com/a.jpg", "image/jpeg", &comment_jpeg());
        let backends: Vec<Arc<dyn StegExtractor>> = vec![
            Arc::new(FixedSteg("lsb", None)),
            Arc::new(FixedSteg("steghide", Some(b"payload\x01"))),
        ];
        let ctx = context()
            .with_ocr(Arc::new(FixedOcr(Err("engine crashed"))))
            .with_steg(backends);
        let out = ImageExtractor.extract(&res, &ctx).await;

        let kinds: Vec<UnitKind> = out.units.iter().map(|u| u.kind).collect();
        assert_eq!(
            kinds,
            vec![UnitKind::ExifField, UnitKind::ExifField, UnitKind::StegPayload]
        );
        let steg = &out.units[2];
        assert_eq!(steg.label, "steg:steghide");
        assert_eq!(steg.text, "payload\\x01");
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].stage, Stage::Ocr);
    }

    #[tokio::test]
    async fn test_ocr_unit() {
        let res = resource("https://example.com/a.png", "image/png", b"not parsed");
        let ctx = context()
            .with_ocr(Arc::new(FixedOcr(Ok("PASSWORD hunter2\n\n"))))
            .with_steg(Vec::new());
        let out = ImageExtractor.extract(&res, &ctx).await;

        assert_eq!(out.units.len(), 1);
        assert_eq!(out.units[0].kind, UnitKind::OcrText);
        assert_eq!(out.units[0].text, "PASSWORD hunter2");
        assert!(out.units[0].transforms.contains(&Transform::Ocr));
    }

    #[tokio::test]
    async fn test_disabled_steps_do_nothing() {
        let res = resource("https://example.com/a.jpg", "image/jpeg", &comment_jpeg());
        let lsb: Arc<dyn StegExtractor> = Arc::new(FixedSteg("lsb", Some(b"x")));
        let mut ctx = context()
            .with_ocr(Arc::new(FixedOcr(Ok("text"))))
            .with_steg(vec![lsb]);
        ctx.transforms.exif = false;
        ctx.transforms.ocr = false;
        ctx.transforms.steganography = false;

        let out = ImageExtractor.extract(&res, &ctx).await;
        assert!(out.units.is_empty());
        assert!(out.failures.is_empty());
    }
}
