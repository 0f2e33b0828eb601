//! HTML pages: visible text, inline scripts and styles, and sub-resource
//! discovery.

use super::{push_source_units, ContentExtractor, DiscoveredLink, ExtractContext, Extraction, UnitKind};
use crate::acquisition::{normalize_url, FetchedResource, ResourceHint};
use crate::report::Stage;
use crate::transform::SourceKind;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use url::Url;

/// Attributes whose values are human-readable text.
const TEXT_ATTRIBUTES: &[&str] = &["title", "alt", "content", "placeholder", "value"];

/// Elements whose bodies are not page text.
const OPAQUE_ELEMENTS: &[&str] = &["script", "style", "template"];

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

/// Everything read from one document in a single pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedPage {
    /// Visible text, comments and text attributes, one chunk per line.
    pub text: String,
    pub inline_scripts: Vec<String>,
    pub inline_styles: Vec<String>,
    /// Sub-resources in document order, deduplicated.
    pub links: Vec<DiscoveredLink>,
}

#[async_trait]
impl ContentExtractor for HtmlExtractor {
    async fn extract(&self, resource: &FetchedResource, ctx: &ExtractContext) -> Extraction {
        let mut out = Extraction::default();

        // The DOM is not Send; parse on the blocking pool and keep only owned data.
        let html = resource.text();
        let base = resource.url.clone();
        let page = match tokio::task::spawn_blocking(move || parse_page(&html, &base)).await {
            Ok(page) => page,
            Err(e) => {
                out.fail(resource, Stage::Parse, format!("HTML parser task failed: {e}"));
                return out;
            }
        };

        out.push_unit(resource, UnitKind::HtmlText, "page", &page.text);

        for (i, script) in page.inline_scripts.iter().enumerate() {
            let label = format!("inline-script#{i}");
            push_source_units(&mut out, resource, &label, script, SourceKind::JavaScript, ctx);
        }
        for (i, style) in page.inline_styles.iter().enumerate() {
            let label = format!("inline-style#{i}");
            push_source_units(&mut out, resource, &label, style, SourceKind::Css, ctx);
        }

        out.discovered = page.links;
        out
    }
}

/// Parse `html` and collect its text and links, resolving relative URLs
/// against `<base href>` when present, else `page_url`.
pub fn parse_page(html: &str, page_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = document_base(&document, page_url);

    let mut page = ParsedPage::default();
    let mut chunks: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for node in document.tree.root().descendants() {
        match node.value() {
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|e| OPAQUE_ELEMENTS.contains(&e.name()))
                });
                if !hidden {
                    push_chunk(&mut chunks, text);
                }
            }
            Node::Comment(comment) => push_chunk(&mut chunks, comment),
            Node::Element(element) => {
                for attr in TEXT_ATTRIBUTES {
                    if let Some(value) = element.attr(attr) {
                        push_chunk(&mut chunks, value);
                    }
                }

                let mut link = |raw: Option<&str>, hint: ResourceHint| {
                    if let Some(url) = raw.and_then(|r| resolve(&base, r)) {
                        if seen.insert(normalize_url(&url)) {
                            page.links.push(DiscoveredLink { url, hint });
                        }
                    }
                };

                match element.name() {
                    "script" => match element.attr("src") {
                        Some(src) => link(Some(src), ResourceHint::Script),
                        None => {
                            let body = element_text(ElementRef::wrap(node));
                            if !body.trim().is_empty() {
                                page.inline_scripts.push(body);
                            }
                        }
                    },
                    "style" => {
                        let body = element_text(ElementRef::wrap(node));
                        if !body.trim().is_empty() {
                            page.inline_styles.push(body);
                        }
                    }
                    "link" => {
                        let rel = element.attr("rel").unwrap_or("");
                        let has_rel = |want: &str| {
                            rel.split_ascii_whitespace()
                                .any(|r| r.eq_ignore_ascii_case(want))
                        };
                        if has_rel("stylesheet") {
                            link(element.attr("href"), ResourceHint::Stylesheet);
                        } else if has_rel("icon") || has_rel("apple-touch-icon") {
                            link(element.attr("href"), ResourceHint::Image);
                        }
                    }
                    "img" => {
                        link(element.attr("src"), ResourceHint::Image);
                        link(element.attr("srcset").and_then(first_candidate), ResourceHint::Image);
                    }
                    "source" => {
                        link(element.attr("srcset").and_then(first_candidate), ResourceHint::Image);
                    }
                    "a" | "area" => link(element.attr("href"), ResourceHint::Page),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    page.text = chunks.join("\n");
    page
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    if let Ok(sel) = Selector::parse("base[href]") {
        if let Some(el) = document.select(&sel).next() {
            if let Some(href) = el.value().attr("href") {
                if let Ok(base) = page_url.join(href.trim()) {
                    return base;
                }
            }
        }
    }
    page_url.clone()
}

fn push_chunk(chunks: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn element_text(element: Option<ElementRef<'_>>) -> String {
    element
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default()
}

/// First URL of a `srcset` list.
fn first_candidate(srcset: &str) -> Option<&str> {
    srcset.split(',').next()?.split_whitespace().next()
}

/// Resolve a link, keeping only schemes the scanner can acquire.
fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    match url.scheme() {
        "http" | "https" => {
            url.set_fragment(None);
            Some(url)
        }
        "data" => Some(url),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Transform;
    use super::*;

    fn parse(html: &str) -> ParsedPage {
        parse_page(html, &Url::parse("https://example.com/dir/index.html").unwrap())
    }

    #[test]
    fn test_text_excludes_script_and_style_bodies() {
        let page = parse(
            r#"<html><head><title>Hello</title><style>.x{}</style></head>
            <body><p>visible  text</p><script>var a=1;a=a+1;</script>
            <!-- note to self --><img alt="a cat" src="cat.png"></body></html>"#,
        );
        assert_eq!(page.text, "Hello\nvisible  text\nnote to self\na cat");
        assert_eq!(page.inline_scripts, vec!["var a=1;a=a+1;"]);
        assert_eq!(page.inline_styles, vec![".x{}"]);
    }

    #[test]
    fn test_links_in_document_order() {
        let page = parse(
            r#"<link rel="stylesheet" href="/s.css"><script src="app.js"></script>
            <a href="other.html#frag">x</a><img src="cat.png"><a href="other.html">dup</a>
            <link rel="shortcut icon" href="/favicon.ico"><a href="mailto:a@b.c">mail</a>
            <picture><source srcset="big.webp 2x, small.webp 1x"></picture>"#,
        );
        let got: Vec<(String, ResourceHint)> = page
            .links
            .iter()
            .map(|l| (l.url.to_string(), l.hint))
            .collect();
        assert_eq!(
            got,
            vec![
                ("https://example.com/s.css".to_string(), ResourceHint::Stylesheet),
                ("https://example.com/dir/app.js".to_string(), ResourceHint::Script),
                ("https://example.com/dir/other.html".to_string(), ResourceHint::Page),
                ("https://example.com/dir/cat.png".to_string(), ResourceHint::Image),
                ("https://example.com/favicon.ico".to_string(), ResourceHint::Image),
                ("https://example.com/dir/big.webp".to_string(), ResourceHint::Image),
            ]
        );
    }

    #[test]
    fn test_base_href_and_data_urls() {
        let page = parse(
            r#"<base href="https://cdn.example.net/assets/">
            <script src="lib.js"></script><img src="data:image/png;base64,AAAA">"#,
        );
        assert_eq!(page.links[0].url.as_str(), "https://cdn.example.net/assets/lib.js");
        assert_eq!(page.links[1].url.scheme(), "data");
    }

    #[test]
    fn test_tag_soup_is_tolerated() {
        let page = parse("<div><p>unclosed <b>bold</div></span>tail");
        assert_eq!(page.text, "unclosed\nbold\ntail");
    }

    #[tokio::test]
    async fn test_extract_units() {
        let res = resource(
            "https://example.com/",
            "text/html",
            b"<p>hi</p><script>var a=1;a=a+1;</script><style>b{c:d}</style>",
        );
        let out = HtmlExtractor.extract(&res, &context()).await;

        let kinds: Vec<(UnitKind, &str)> = out
            .units
            .iter()
            .map(|u| (u.kind, u.label.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (UnitKind::HtmlText, "page"),
                (UnitKind::JsText, "inline-script#0"),
                (UnitKind::CssText, "inline-style#0"),
            ]
        );
        assert_eq!(out.units[1].text, "var a=1;\na=a+1;");
        assert!(out.units[1].transforms.contains(&Transform::Deobfuscated));
        assert_eq!(out.units[0].text, "hi");
    }
}
