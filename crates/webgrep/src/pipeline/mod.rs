//! Scan orchestration.
//!
//! A single coordinator owns the visited set, the resource budget and the
//! result aggregator. Resources are fetched in waves: the root, then
//! everything the root discovered, then everything those discovered, and
//! so on. Each wave is planned in discovery order before any of it is
//! fetched, so which URLs are claimed (and which are cut by the resource
//! cap) never depends on network timing. Inside a wave, fetch + extract +
//! match tasks run concurrently on a `JoinSet`, paced by the rate limiter.

pub mod governor;
pub mod rate_limiter;

use self::governor::{clamp_body, ResourceBudget};
use self::rate_limiter::RateLimiter;
use crate::acquisition::{
    data_url, normalize_url, FetchResponse, FetchedResource, Fetcher, HttpClient, Ordinal,
    ResourceHint,
};
use crate::config::ScanConfig;
use crate::errors::{FetchError, ScanError};
use crate::events::{EventSink, NullSink, ScanEvent};
use crate::extraction::{ContentExtractor, DiscoveredLink, ExtractContext, ExtractedUnit, Extractor};
use crate::matching::{Match, PatternSet};
use crate::report::{Failure, ResultAggregator, ScanResult, ScanStatus, Stage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Runs scans. Cheap to reuse: every [`run`](Self::run) starts from an
/// empty visited set and budget.
pub struct TransformPipeline {
    config: ScanConfig,
    patterns: Arc<PatternSet>,
    fetcher: Arc<dyn Fetcher>,
    extract: ExtractContext,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

/// A resource claimed for fetching.
#[derive(Debug, Clone)]
struct Pending {
    url: Url,
    ordinal: Ordinal,
    depth: usize,
    hint: ResourceHint,
}

/// Everything one task produced for one resource.
struct Processed {
    item: Pending,
    /// Body size, `None` when the fetch failed.
    fetched_bytes: Option<usize>,
    units: usize,
    matches: Vec<Match>,
    failures: Vec<Failure>,
    warnings: Vec<String>,
    links: Vec<DiscoveredLink>,
}

impl Processed {
    fn new(item: Pending) -> Self {
        Self {
            item,
            fetched_bytes: None,
            units: 0,
            matches: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            links: Vec::new(),
        }
    }

    fn fail(&mut self, stage: Stage, reason: impl ToString) {
        self.failures.push(Failure {
            resource_url: self.item.url.to_string(),
            ordinal: self.item.ordinal.clone(),
            stage,
            reason: reason.to_string(),
        });
    }
}

/// What the coordinator keeps of a finished resource to plan the next wave.
struct Frontier {
    item: Pending,
    links: Vec<DiscoveredLink>,
}

/// Read-only state shared with the worker tasks of one run.
struct Shared {
    config: ScanConfig,
    patterns: Arc<PatternSet>,
    fetcher: Arc<dyn Fetcher>,
    extract: ExtractContext,
    events: Arc<dyn EventSink>,
    limiter: RateLimiter,
}

impl TransformPipeline {
    /// A pipeline with the default HTTP client and whichever OCR and
    /// steganography tools are installed.
    pub fn new(config: ScanConfig, patterns: PatternSet) -> Result<Self, ScanError> {
        let client =
            HttpClient::new(&config.user_agent).map_err(|e| ScanError::Client(e.to_string()))?;
        let extract = ExtractContext::detect(&config);
        Ok(Self {
            patterns: Arc::new(patterns),
            fetcher: Arc::new(client),
            extract,
            events: Arc::new(NullSink),
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_extract_context(mut self, extract: ExtractContext) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops a running scan when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Scan `root` and everything reachable from it within the configured
    /// caps.
    ///
    /// Only an unusable root URL is an error. An unreachable root yields a
    /// result with [`ScanStatus::RootUnreachable`]; every other problem is
    /// recorded in [`ScanResult::failures`].
    pub async fn run(&self, root: &str) -> Result<ScanResult, ScanError> {
        let root_url = parse_root(root)?;
        let shared = Arc::new(Shared {
            config: self.config.clone(),
            patterns: Arc::clone(&self.patterns),
            fetcher: Arc::clone(&self.fetcher),
            extract: self.extract.clone(),
            events: Arc::clone(&self.events),
            limiter: RateLimiter::new(self.config.max_concurrency, self.config.min_delay_ms),
        });
        let patterns = self.patterns.patterns().to_vec();

        self.events.emit(&ScanEvent::ScanStarted {
            root: root_url.to_string(),
            patterns: patterns.len(),
        });

        let mut agg = ResultAggregator::new();
        let mut budget = ResourceBudget::new(self.config.max_resources.max(1));
        let mut visited: HashSet<String> = HashSet::new();

        visited.insert(normalize_url(&root_url));
        budget.try_claim();
        let root_item = Pending {
            url: root_url.clone(),
            ordinal: Ordinal::root(),
            depth: 0,
            hint: ResourceHint::Page,
        };

        let root_done = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            done = process(Arc::clone(&shared), root_item) => Some(done),
        };
        let Some(root_done) = root_done else {
            return Ok(self.finish(agg, root_url, patterns, ScanStatus::Cancelled));
        };
        if root_done.fetched_bytes.is_none() {
            merge(&mut agg, root_done);
            return Ok(self.finish(agg, root_url, patterns, ScanStatus::RootUnreachable));
        }

        let mut completed = vec![merge(&mut agg, root_done)];
        let mut truncated = false;
        let mut cancelled = false;

        while !completed.is_empty() && !cancelled {
            completed.sort_by(|a, b| a.item.ordinal.cmp(&b.item.ordinal));
            let wave = self.plan_wave(
                std::mem::take(&mut completed),
                &root_url,
                &mut visited,
                &mut budget,
                &mut truncated,
            );
            if wave.is_empty() {
                break;
            }
            debug!("fetching wave of {} resources", wave.len());

            let mut tasks = JoinSet::new();
            let mut in_flight: HashMap<task::Id, Pending> = HashMap::new();
            for item in wave {
                let handle = tasks.spawn(process(Arc::clone(&shared), item.clone()));
                in_flight.insert(handle.id(), item);
            }

            loop {
                let joined = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    joined = tasks.join_next_with_id() => Some(joined),
                };
                match joined {
                    None => {
                        tasks.abort_all();
                        cancelled = true;
                        break;
                    }
                    Some(None) => break,
                    Some(Some(Ok((id, done)))) => {
                        in_flight.remove(&id);
                        completed.push(merge(&mut agg, done));
                    }
                    Some(Some(Err(e))) => {
                        warn!("resource task failed: {e}");
                        if let Some(item) = in_flight.remove(&e.id()) {
                            let done = task_failed(&self.events, item, &e);
                            completed.push(merge(&mut agg, done));
                        }
                    }
                }
            }
        }

        if truncated {
            agg.warn(format!(
                "resource limit of {} reached; scan truncated",
                budget.max_resources()
            ));
        }

        let status = if cancelled {
            self.events.emit(&ScanEvent::Cancelled);
            ScanStatus::Cancelled
        } else if truncated {
            ScanStatus::Truncated
        } else {
            ScanStatus::Completed
        };
        Ok(self.finish(agg, root_url, patterns, status))
    }

    /// Claim the next wave from finished resources, in discovery order.
    fn plan_wave(
        &self,
        completed: Vec<Frontier>,
        root: &Url,
        visited: &mut HashSet<String>,
        budget: &mut ResourceBudget,
        truncated: &mut bool,
    ) -> Vec<Pending> {
        let mut wave = Vec::new();
        for done in completed {
            for (i, link) in done.links.into_iter().enumerate() {
                let Some(next) = self.follow(&done.item, i, link, root) else {
                    continue;
                };
                let key = normalize_url(&next.url);
                if visited.contains(&key) {
                    continue;
                }
                if !budget.try_claim() {
                    if !*truncated {
                        *truncated = true;
                        self.events.emit(&ScanEvent::Truncated {
                            max_resources: budget.max_resources(),
                        });
                    }
                    return wave;
                }
                visited.insert(key);
                wave.push(next);
            }
        }
        wave
    }

    /// Scope rules for a discovered link. Assets share their page's depth
    /// and are always in scope; page links cost one hop and may be limited
    /// to the root's host.
    fn follow(&self, parent: &Pending, index: usize, link: DiscoveredLink, root: &Url) -> Option<Pending> {
        let ordinal = parent.ordinal.child(u32::try_from(index).unwrap_or(u32::MAX));
        let depth = match link.hint {
            ResourceHint::Page => {
                let depth = parent.depth + 1;
                if depth > self.config.max_depth {
                    return None;
                }
                if self.config.same_host_pages && link.url.host_str() != root.host_str() {
                    return None;
                }
                depth
            }
            _ => parent.depth,
        };
        Some(Pending {
            url: link.url,
            ordinal,
            depth,
            hint: link.hint,
        })
    }

    fn finish(
        &self,
        agg: ResultAggregator,
        root: Url,
        patterns: Vec<String>,
        status: ScanStatus,
    ) -> ScanResult {
        let result = agg.finish(root, patterns, status);
        self.events.emit(&ScanEvent::ScanFinished {
            status: result.status,
            matches: result.matches.len(),
            failures: result.failures.len(),
            resources: result.stats.resources_fetched,
        });
        result
    }
}

fn parse_root(root: &str) -> Result<Url, ScanError> {
    let url = Url::parse(root.trim()).map_err(|e| ScanError::InvalidUrl {
        url: root.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" | "data" => Ok(url),
        other => Err(ScanError::InvalidUrl {
            url: root.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Fold a finished resource into the aggregator.
fn merge(agg: &mut ResultAggregator, done: Processed) -> Frontier {
    if let Some(bytes) = done.fetched_bytes {
        agg.record_fetch(bytes);
    }
    agg.record_units(done.units);
    agg.add_matches(done.matches);
    agg.add_failures(done.failures);
    for w in done.warnings {
        agg.warn(w);
    }
    Frontier {
        item: done.item,
        links: done.links,
    }
}

/// A resource whose task panicked: keep it in the report as a failure.
fn task_failed(events: &Arc<dyn EventSink>, item: Pending, error: &JoinError) -> Processed {
    let mut done = Processed::new(item);
    let reason = format!("resource task failed: {error}");
    events.emit(&ScanEvent::ResourceFailed {
        url: done.item.url.to_string(),
        ordinal: done.item.ordinal.to_string(),
        stage: Stage::Fetch,
        reason: reason.clone(),
    });
    done.fail(Stage::Fetch, reason);
    done
}

/// Fetch, classify, extract and search one resource.
async fn process(shared: Arc<Shared>, item: Pending) -> Processed {
    let mut done = Processed::new(item);
    let events = &shared.events;
    let url_str = done.item.url.to_string();
    let ordinal_str = done.item.ordinal.to_string();

    let response = match fetch(&shared, &done.item.url).await {
        Ok(response) => response,
        Err(e) => {
            events.emit(&ScanEvent::ResourceFailed {
                url: url_str,
                ordinal: ordinal_str,
                stage: Stage::Fetch,
                reason: e.to_string(),
            });
            done.fail(Stage::Fetch, e);
            return done;
        }
    };

    let FetchResponse {
        mut bytes,
        content_type,
    } = response;
    done.fetched_bytes = Some(bytes.len());
    if let Some(original) = clamp_body(&mut bytes, shared.config.max_resource_bytes) {
        done.warnings.push(format!(
            "{url_str}: body of {original} bytes truncated to {}",
            shared.config.max_resource_bytes
        ));
    }
    events.emit(&ScanEvent::ResourceFetched {
        url: url_str.clone(),
        ordinal: ordinal_str.clone(),
        bytes: bytes.len(),
        content_type: content_type.clone(),
    });

    let resource = FetchedResource {
        url: done.item.url.clone(),
        content_type,
        bytes,
        depth: done.item.depth,
        ordinal: done.item.ordinal.clone(),
        hint: done.item.hint,
    };

    let Some(kind) = resource.classify() else {
        let reason = format!(
            "unsupported content type {}",
            resource.content_type.as_deref().unwrap_or("(none)")
        );
        events.emit(&ScanEvent::ResourceFailed {
            url: url_str,
            ordinal: ordinal_str,
            stage: Stage::Classify,
            reason: reason.clone(),
        });
        done.fail(Stage::Classify, reason);
        return done;
    };

    let extraction = Extractor::for_kind(kind)
        .extract(&resource, &shared.extract)
        .await;

    let units: Vec<Arc<ExtractedUnit>> = extraction.units.into_iter().map(Arc::new).collect();
    done.units = units.len();
    events.emit(&ScanEvent::UnitsExtracted {
        url: url_str.clone(),
        ordinal: ordinal_str.clone(),
        units: units.len(),
    });

    done.matches = shared.patterns.search(&units);
    if !done.matches.is_empty() {
        events.emit(&ScanEvent::MatchesFound {
            url: url_str,
            ordinal: ordinal_str,
            matches: done.matches.len(),
        });
    }

    for failure in &extraction.failures {
        events.emit(&ScanEvent::ResourceFailed {
            url: failure.resource_url.clone(),
            ordinal: failure.ordinal.to_string(),
            stage: failure.stage,
            reason: failure.reason.clone(),
        });
    }
    done.failures.extend(extraction.failures);
    done.links = extraction.discovered;
    done
}

/// `data:` URLs are decoded in place; everything else goes through the
/// rate limiter and the fetcher under the per-fetch timeout.
async fn fetch(shared: &Shared, url: &Url) -> Result<FetchResponse, FetchError> {
    if url.scheme() == "data" {
        return data_url::decode(url.as_str());
    }

    let _guard = shared
        .limiter
        .acquire()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;
    let timeout = shared.config.fetch_timeout();
    match tokio::time::timeout(timeout, shared.fetcher.fetch(url, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternMode;
    use crate::events::CollectingSink;
    use async_trait::async_trait;
    use std::time::Duration;

    /// In-memory site. Paths missing from the map are 404s; `slow` paths
    /// never answer and `broken` paths panic.
    #[derive(Default)]
    struct FakeSite {
        pages: HashMap<String, (&'static str, Vec<u8>)>,
        slow: HashSet<String>,
        broken: HashSet<String>,
    }

    impl FakeSite {
        fn page(mut self, url: &str, content_type: &'static str, body: &str) -> Self {
            self.pages
                .insert(url.to_string(), (content_type, body.as_bytes().to_vec()));
            self
        }

        fn slow(mut self, url: &str) -> Self {
            self.slow.insert(url.to_string());
            self
        }

        fn broken(mut self, url: &str) -> Self {
            self.broken.insert(url.to_string());
            self
        }
    }

    #[async_trait]
    impl Fetcher for FakeSite {
        async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
            if self.slow.contains(url.as_str()) {
                std::future::pending::<()>().await;
            }
            if self.broken.contains(url.as_str()) {
                panic!("fetcher crashed on {url}");
            }
            match self.pages.get(url.as_str()) {
                Some((ct, body)) => Ok(FetchResponse {
                    bytes: body.clone(),
                    content_type: Some(ct.to_string()),
                }),
                None => Err(FetchError::Status(404)),
            }
        }
    }

    fn pipeline(site: FakeSite, config: ScanConfig, pattern: &str) -> TransformPipeline {
        let patterns =
            PatternSet::compile(&[pattern.to_string()], PatternMode::Regex, false).unwrap();
        let extract = ExtractContext::offline(&config);
        TransformPipeline::new(config, patterns)
            .unwrap()
            .with_fetcher(Arc::new(site))
            .with_extract_context(extract)
    }

    #[tokio::test]
    async fn test_inline_script_match() {
        let site = FakeSite::default().page(
            "https://example.com/",
            "text/html",
            "<html><body><script>var a=1;a=a+1;</script></body></html>",
        );
        let result = pipeline(site, ScanConfig::default(), "a=a")
            .run("https://example.com/")
            .await
            .unwrap();

        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].unit.label, "inline-script#0");
        // Reflowed text is "var a=1;\na=a+1;".
        assert_eq!(result.matches[0].start, 9);
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_sub_resources_and_failures() {
        let site = FakeSite::default()
            .page(
                "https://example.com/",
                "text/html",
                r#"<script src="/app.js"></script><link rel="stylesheet" href="/s.css">
                <script src="/missing.js"></script><a href="/next">next</a>"#,
            )
            .page("https://example.com/app.js", "application/javascript", "let token='abc';")
            .page("https://example.com/s.css", "text/css", ".t::after{content:'token'}")
            .page("https://example.com/next", "text/html", "token");

        let result = pipeline(site, ScanConfig::default(), "token")
            .run("https://example.com/")
            .await
            .unwrap();

        let urls: Vec<&str> = result
            .matches
            .iter()
            .map(|m| m.unit.source_url.as_str())
            .collect();
        // Depth 0: the linked page is not followed.
        assert_eq!(urls, vec!["https://example.com/app.js", "https://example.com/s.css"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, Stage::Fetch);
        assert_eq!(result.stats.resources_fetched, 3);
    }

    #[tokio::test]
    async fn test_depth_follows_same_host_pages() {
        let site = FakeSite::default()
            .page(
                "https://example.com/",
                "text/html",
                r#"<a href="/next">n</a><a href="https://other.com/">o</a>"#,
            )
            .page("https://example.com/next", "text/html", "<p>token</p>")
            .page("https://other.com/", "text/html", "<p>token</p>");

        let mut config = ScanConfig::default();
        config.max_depth = 1;
        let result = pipeline(site, config, "token")
            .run("https://example.com/")
            .await
            .unwrap();

        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].unit.source_url.as_str(), "https://example.com/next");
    }

    #[tokio::test]
    async fn test_panicking_resource_is_reported() {
        let site = FakeSite::default()
            .page(
                "https://example.com/",
                "text/html",
                r#"<script src="/boom.js"></script><script src="/app.js"></script>"#,
            )
            .page("https://example.com/app.js", "text/javascript", "let token=1;")
            .broken("https://example.com/boom.js");
        let sink = Arc::new(CollectingSink::new());

        let result = pipeline(site, ScanConfig::default(), "token")
            .with_events(sink.clone())
            .run("https://example.com/")
            .await
            .unwrap();

        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].unit.source_url.as_str(), "https://example.com/app.js");
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].resource_url, "https://example.com/boom.js");
        assert_eq!(result.failures[0].ordinal.to_string(), "0");
        assert!(result.failures[0].reason.contains("resource task failed"));
        assert!(sink.events().iter().any(|e| matches!(
            e,
            ScanEvent::ResourceFailed { url, .. } if url == "https://example.com/boom.js"
        )));
    }

    #[tokio::test]
    async fn test_root_unreachable() {
        let result = pipeline(FakeSite::default(), ScanConfig::default(), "x")
            .run("https://example.com/")
            .await
            .unwrap();
        assert_eq!(result.status, ScanStatus::RootUnreachable);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_invalid_root_url() {
        let p = pipeline(FakeSite::default(), ScanConfig::default(), "x");
        assert!(matches!(p.run("not a url").await, Err(ScanError::InvalidUrl { .. })));
        assert!(matches!(p.run("ftp://example.com/").await, Err(ScanError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_cap_truncates_in_discovery_order() {
        let site = FakeSite::default()
            .page(
                "https://example.com/",
                "text/html",
                r#"<script src="/a.js"></script><script src="/b.js"></script><script src="/c.js"></script>"#,
            )
            .page("https://example.com/a.js", "text/javascript", "hit")
            .page("https://example.com/b.js", "text/javascript", "hit")
            .page("https://example.com/c.js", "text/javascript", "hit");

        let mut config = ScanConfig::default();
        config.max_resources = 3;
        let sink = Arc::new(CollectingSink::new());
        let result = pipeline(site, config, "hit")
            .with_events(sink.clone())
            .run("https://example.com/")
            .await
            .unwrap();

        assert_eq!(result.status, ScanStatus::Truncated);
        assert_eq!(result.warnings.len(), 1);
        let urls: Vec<&str> = result
            .matches
            .iter()
            .map(|m| m.unit.source_url.as_str())
            .collect();
        assert_eq!(urls, vec!["https://example.com/a.js", "https://example.com/b.js"]);
        assert!(sink
            .events()
            .contains(&ScanEvent::Truncated { max_resources: 3 }));
    }

    #[tokio::test]
    async fn test_slow_resource_times_out() {
        let site = FakeSite::default()
            .page("https://example.com/", "text/html", r#"<p>hit</p><script src="/slow.js"></script>"#)
            .slow("https://example.com/slow.js");
        let mut config = ScanConfig::default();
        config.fetch_timeout_ms = 50;

        let result = pipeline(site, config, "hit")
            .run("https://example.com/")
            .await
            .unwrap();

        assert_eq!(result.status, ScanStatus::Completed);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_root_matches() {
        let site = FakeSite::default()
            .page("https://example.com/", "text/html", r#"<p>hit</p><script src="/slow.js"></script>"#)
            .slow("https://example.com/slow.js");
        let mut config = ScanConfig::default();
        config.fetch_timeout_ms = 60_000;

        let p = pipeline(site, config, "hit");
        let token = p.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let result = p.run("https://example.com/").await.unwrap();
        assert_eq!(result.status, ScanStatus::Cancelled);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_type_is_classify_failure() {
        let site = FakeSite::default()
            .page("https://example.com/", "text/html", r#"<img src="/font.woff2">"#)
            .page("https://example.com/font.woff2", "font/woff2", "x");
        let result = pipeline(site, ScanConfig::default(), "x")
            .run("https://example.com/")
            .await
            .unwrap();
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].stage, Stage::Classify);
    }
}
