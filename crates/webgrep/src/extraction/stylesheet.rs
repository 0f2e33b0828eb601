//! External CSS resources.

use super::{push_source_units, ContentExtractor, ExtractContext, Extraction};
use crate::acquisition::FetchedResource;
use crate::transform::SourceKind;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct StylesheetExtractor;

#[async_trait]
impl ContentExtractor for StylesheetExtractor {
    async fn extract(&self, resource: &FetchedResource, ctx: &ExtractContext) -> Extraction {
        let mut out = Extraction::default();
        let source = resource.text();
        push_source_units(&mut out, resource, "stylesheet", &source, SourceKind::Css, ctx);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Transform, UnitKind};
    use super::*;

    #[tokio::test]
    async fn test_stylesheet_is_unminified() {
        let res = resource(
            "https://example.com/site.css",
            "text/css",
            b".x{content:\"token\";color:red}",
        );
        let out = StylesheetExtractor.extract(&res, &context()).await;

        assert_eq!(out.units.len(), 1);
        let unit = &out.units[0];
        assert_eq!(unit.kind, UnitKind::CssText);
        assert_eq!(unit.text, ".x {\n  content:\"token\";\n  color:red\n}");
        assert!(unit.transforms.contains(&Transform::Unminified));
    }
}
