//! Fetched resources and content classification.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use url::Url;

/// What the discovering page said a link was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceHint {
    /// The root URL, or an `<a href>` target.
    Page,
    Script,
    Stylesheet,
    Image,
}

/// Content families with a dedicated extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Html,
    JavaScript,
    Css,
    Image,
}

/// Discovery path of a resource: `[]` for the root, `[n]` for the n-th link
/// the root discovered, `[n, m]` for the m-th link of that one.
///
/// Ordered by depth first, then path, so the root sorts first and siblings
/// keep document order no matter which fetch finished first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Ordinal(Vec<u32>);

impl Ordinal {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// The ordinal of the `index`-th link discovered from `self`.
    pub fn child(&self, index: u32) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }
}

impl Ord for Ordinal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Ordinal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "root");
        }
        let parts: Vec<String> = self.0.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// One retrieved resource. Immutable once created.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub url: Url,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Page-to-page hops from the root (assets share their page's depth).
    pub depth: usize,
    pub ordinal: Ordinal,
    pub hint: ResourceHint,
}

impl FetchedResource {
    /// Body decoded as UTF-8, invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn classify(&self) -> Option<ContentKind> {
        classify(self.content_type.as_deref(), &self.url, self.hint)
    }
}

/// Pick an extractor family from the declared content type, falling back to
/// the discovery hint and then the URL extension when the type says nothing
/// useful.
pub fn classify(content_type: Option<&str>, url: &Url, hint: ResourceHint) -> Option<ContentKind> {
    let essence = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();

    match essence.as_str() {
        "text/html" | "application/xhtml+xml" | "image/svg+xml" => return Some(ContentKind::Html),
        "application/javascript"
        | "text/javascript"
        | "application/x-javascript"
        | "application/ecmascript"
        | "text/ecmascript" => return Some(ContentKind::JavaScript),
        "text/css" => return Some(ContentKind::Css),
        e if e.starts_with("image/") => return Some(ContentKind::Image),
        _ => {}
    }

    let generic = matches!(
        essence.as_str(),
        "" | "application/octet-stream" | "binary/octet-stream" | "text/plain"
    );

    if generic {
        match hint {
            ResourceHint::Script => return Some(ContentKind::JavaScript),
            ResourceHint::Stylesheet => return Some(ContentKind::Css),
            ResourceHint::Image => return Some(ContentKind::Image),
            ResourceHint::Page => {}
        }
    }

    if let Some(kind) = classify_extension(url) {
        return Some(kind);
    }

    if generic && hint == ResourceHint::Page {
        return Some(ContentKind::Html);
    }

    None
}

fn classify_extension(url: &Url) -> Option<ContentKind> {
    let last = url.path_segments()?.last()?;
    let ext = last.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" | "xhtml" | "svg" => Some(ContentKind::Html),
        "js" | "mjs" | "cjs" => Some(ContentKind::JavaScript),
        "css" => Some(ContentKind::Css),
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tif" | "tiff" | "ico" => {
            Some(ContentKind::Image)
        }
        _ => None,
    }
}

/// Visited-set key: the URL without its fragment.
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_classify_by_content_type() {
        let u = url("https://example.com/x");
        assert_eq!(
            classify(Some("text/html; charset=utf-8"), &u, ResourceHint::Page),
            Some(ContentKind::Html)
        );
        assert_eq!(
            classify(Some("application/javascript"), &u, ResourceHint::Page),
            Some(ContentKind::JavaScript)
        );
        assert_eq!(
            classify(Some("image/jpeg"), &u, ResourceHint::Script),
            Some(ContentKind::Image)
        );
    }

    #[test]
    fn test_classify_generic_uses_hint_then_extension() {
        let u = url("https://example.com/asset");
        assert_eq!(
            classify(Some("application/octet-stream"), &u, ResourceHint::Stylesheet),
            Some(ContentKind::Css)
        );
        assert_eq!(
            classify(None, &url("https://example.com/app.min.js"), ResourceHint::Page),
            Some(ContentKind::JavaScript)
        );
        assert_eq!(classify(None, &u, ResourceHint::Page), Some(ContentKind::Html));
    }

    #[test]
    fn test_classify_unsupported() {
        let u = url("https://example.com/font.woff2");
        assert_eq!(classify(Some("font/woff2"), &u, ResourceHint::Page), None);
    }

    #[test]
    fn test_ordinal_order() {
        let root = Ordinal::root();
        let a = root.child(0);
        let b = root.child(1);
        let a0 = a.child(0);
        let mut all = vec![a0.clone(), b.clone(), root.clone(), a.clone()];
        all.sort();
        assert_eq!(all, vec![root, a, b, a0]);
    }

    #[test]
    fn test_normalize_strips_fragment() {
        assert_eq!(
            normalize_url(&url("https://example.com/a#top")),
            "https://example.com/a"
        );
    }
}
