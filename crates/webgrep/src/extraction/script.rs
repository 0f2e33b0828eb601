//! External JavaScript resources.

use super::{push_source_units, ContentExtractor, ExtractContext, Extraction};
use crate::acquisition::FetchedResource;
use crate::transform::SourceKind;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptExtractor;

#[async_trait]
impl ContentExtractor for ScriptExtractor {
    async fn extract(&self, resource: &FetchedResource, ctx: &ExtractContext) -> Extraction {
        let mut out = Extraction::default();
        let source = resource.text();
        push_source_units(&mut out, resource, "script", &source, SourceKind::JavaScript, ctx);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Transform, UnitKind};
    use super::*;

    #[tokio::test]
    async fn test_script_is_deobfuscated() {
        let res = resource(
            "https://example.com/app.js",
            "application/javascript",
            br#"var k="\x66\x6c\x61\x67";k=k+1;"#,
        );
        let out = ScriptExtractor.extract(&res, &context()).await;

        assert_eq!(out.units.len(), 1);
        let unit = &out.units[0];
        assert_eq!(unit.kind, UnitKind::JsText);
        assert_eq!(unit.label, "script");
        assert!(unit.text.contains("\"flag\""));
        assert!(unit.transforms.contains(&Transform::Deobfuscated));
        assert!(out.discovered.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_script_falls_back() {
        let res = resource("https://example.com/app.js", "text/javascript", b"var s = 'oops");
        let out = ScriptExtractor.extract(&res, &context()).await;

        assert_eq!(out.units[0].text, "var s = 'oops");
        assert!(out.units[0].transforms.is_empty());
        assert_eq!(out.failures.len(), 1);
    }
}
