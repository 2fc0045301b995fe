//! Crawler engine: breadth-first discovery of PDF URLs on one site.
//!
//! The frontier is a priority queue keyed by URL score (descending), ties
//! broken by insertion order. Scope is the seed's registrable domain
//! (eTLD+1), so `www.example.com` and `docs.example.com` are both in scope.
//! Individual page failures are logged and skipped; only an unreachable seed
//! fails the crawl itself.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::fetch::{FetchError, Fetched, Fetcher};

#[derive(Debug, Clone)]
pub struct CrawlLimits {
    pub max_pages: usize,
    pub max_depth: u32,
    pub concurrency: usize,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_pages: 2_000,
            max_depth: 6,
            concurrency: 4,
        }
    }
}

/// Delay between page-fetch batches. Keeps us polite on origin servers.
const POLITENESS_DELAY: Duration = Duration::from_millis(500);

/// Cancellation is re-checked every this many anchors during extraction.
const LINK_BATCH: usize = 50;

#[derive(Debug)]
pub enum CrawlError {
    /// The seed could not be parsed as a URL.
    InvalidSeed(url::ParseError),
    /// The seed page was unreachable through both fetch tiers.
    SeedUnreachable(FetchError),
    /// The job's cancellation token fired mid-crawl.
    Cancelled,
}

impl std::fmt::Display for CrawlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSeed(e) => write!(f, "Seed is not a valid URL: {}", e),
            Self::SeedUnreachable(e) => write!(f, "Seed unreachable: {}", e),
            Self::Cancelled => write!(f, "Crawl cancelled"),
        }
    }
}

impl std::error::Error for CrawlError {}

/// A PDF link surfaced by the crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfCandidate {
    pub url: String,
    pub link_text: String,
}

#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub pdfs: Vec<PdfCandidate>,
    pub pages_visited: usize,
    pub page_errors: usize,
}

/// Seam between the pipeline and the two-tier fetcher: page loads for the
/// crawl, bounded samples for classification. Tests provide canned sets.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &Url, cancel: &CancellationToken) -> Result<Fetched, FetchError>;

    async fn fetch_sample(
        &self,
        url: &Url,
        max_bytes: usize,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchError>;
}

#[async_trait]
impl PageFetcher for Fetcher {
    async fn fetch_page(&self, url: &Url, cancel: &CancellationToken) -> Result<Fetched, FetchError> {
        self.fetch(url, cancel).await
    }

    async fn fetch_sample(
        &self,
        url: &Url,
        max_bytes: usize,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchError> {
        Fetcher::fetch_sample(self, url, max_bytes, cancel).await
    }
}

//
// URL utilities
//

/// Prepends `https://` when the operator typed a bare domain.
pub fn ensure_scheme(domain: &str) -> String {
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    }
}

/// The registrable (eTLD+1) domain of a host: `docs.example.com` → `example.com`.
pub fn registrable_domain(host: &str) -> String {
    psl::domain_str(host).unwrap_or(host).to_string()
}

/// Canonical form used for the visited set: lowercase scheme and host,
/// fragment stripped, query pairs sorted.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = normalized
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        normalized.set_query(Some(&query));
    }

    // The url crate already lowercases scheme and host on parse
    normalized.to_string()
}

/// Frontier priority for a URL. Product pages first, boilerplate last.
pub fn score_url(url: &Url, product_lines: &[String]) -> i32 {
    let path = url.path().to_lowercase();
    let mut score = 0;

    let product_page = path.contains("/product/") || path.contains("/product_category/");
    let product_line_hit = !product_lines.is_empty()
        && product_lines
            .iter()
            .any(|pl| path.contains(&pl.to_lowercase()));
    if product_page || product_line_hit {
        score += 10;
    }

    if ["/catalog", "/spec", "/datasheet", "/submittal"]
        .iter()
        .any(|kw| path.contains(kw))
    {
        score += 5;
    }

    if ["/blog", "/news", "/careers", "/login"]
        .iter()
        .any(|kw| path.contains(kw))
    {
        score -= 5;
    }

    score
}

/// True when the URL or its link text matches the product-line filter.
/// An empty filter matches everything.
pub fn matches_product_lines(url: &str, link_text: &str, product_lines: &[String]) -> bool {
    if product_lines.is_empty() {
        return true;
    }
    let combined = format!("{} {}", url, link_text).to_lowercase();
    product_lines
        .iter()
        .any(|pl| combined.contains(&pl.to_lowercase()))
}

//
// Frontier
//

#[derive(Debug)]
struct FrontierEntry {
    score: i32,
    seq: u64,
    depth: u32,
    url: Url,
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.seq == other.seq
    }
}

impl Eq for FrontierEntry {}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher score first, then earlier insertion (FIFO)
        self.score
            .cmp(&other.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Frontier {
    heap: BinaryHeap<FrontierEntry>,
    seen: HashSet<String>,
    next_seq: u64,
}

impl Frontier {
    /// Enqueues a URL unless its normalized form was already seen.
    fn push(&mut self, url: Url, score: i32, depth: u32) -> bool {
        if !self.seen.insert(normalize_url(&url)) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(FrontierEntry { score, seq, depth, url });
        true
    }

    fn pop(&mut self) -> Option<(Url, u32)> {
        self.heap.pop().map(|e| (e.url, e.depth))
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

//
// Crawler
//

pub struct Crawler<'a, F: PageFetcher + ?Sized> {
    fetcher: &'a F,
    limits: CrawlLimits,
    product_lines: Vec<String>,
}

impl<'a, F: PageFetcher + ?Sized> Crawler<'a, F> {
    pub fn new(fetcher: &'a F, product_lines: Vec<String>) -> Self {
        Self {
            fetcher,
            limits: CrawlLimits::default(),
            product_lines,
        }
    }

    pub fn with_limits(mut self, limits: CrawlLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Runs the crawl to exhaustion (or its bounds) and returns every PDF
    /// candidate found on the seed's registrable domain.
    pub async fn crawl(
        &self,
        seed: &str,
        cancel: &CancellationToken,
    ) -> Result<CrawlOutcome, CrawlError> {
        let seed_url = Url::parse(&ensure_scheme(seed)).map_err(CrawlError::InvalidSeed)?;
        let scope = registrable_domain(seed_url.host_str().unwrap_or_default());

        tracing::info!("Starting crawl of {} (scope: {})", seed_url, scope);

        let mut outcome = CrawlOutcome::default();
        let mut pdf_seen: HashSet<String> = HashSet::new();
        let mut frontier = Frontier::default();
        frontier.push(seed_url.clone(), 0, 0);

        // The seed is fetched alone: if it is unreachable through both
        // tiers, the whole job fails rather than limping on.
        let (first_url, _) = frontier.pop().expect("seed enqueued above");
        let seed_page = self
            .fetcher
            .fetch_page(&first_url, cancel)
            .await
            .map_err(|e| match e {
                FetchError::Cancelled => CrawlError::Cancelled,
                other => CrawlError::SeedUnreachable(other),
            })?;
        outcome.pages_visited += 1;
        self.process_page(
            &first_url,
            0,
            seed_page,
            &scope,
            &mut frontier,
            &mut pdf_seen,
            &mut outcome,
            cancel,
        )?;

        while !frontier.is_empty() && outcome.pages_visited < self.limits.max_pages {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            // Pull up to `concurrency` URLs and fetch them together; the
            // batch size is the per-host in-flight cap.
            let mut batch = Vec::with_capacity(self.limits.concurrency);
            while batch.len() < self.limits.concurrency
                && outcome.pages_visited + batch.len() < self.limits.max_pages
            {
                match frontier.pop() {
                    Some(entry) => batch.push(entry),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }

            let fetches = batch.iter().map(|(url, _)| self.fetcher.fetch_page(url, cancel));
            let results = futures::future::join_all(fetches).await;

            for ((url, depth), result) in batch.into_iter().zip(results) {
                outcome.pages_visited += 1;
                match result {
                    Ok(page) => self.process_page(
                        &url,
                        depth,
                        page,
                        &scope,
                        &mut frontier,
                        &mut pdf_seen,
                        &mut outcome,
                        cancel,
                    )?,
                    Err(FetchError::Cancelled) => return Err(CrawlError::Cancelled),
                    Err(e) => {
                        tracing::warn!("Skipping page '{}': {}", url, e);
                        outcome.page_errors += 1;
                    }
                }
            }

            if outcome.pages_visited % 10 == 0 {
                tracing::info!(
                    "Crawl progress: {} pages visited, {} PDFs found",
                    outcome.pages_visited,
                    outcome.pdfs.len()
                );
            }

            tokio::time::sleep(POLITENESS_DELAY).await;
        }

        tracing::info!(
            "Crawl completed: visited {} pages, found {} PDFs ({} page errors)",
            outcome.pages_visited,
            outcome.pdfs.len(),
            outcome.page_errors
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_page(
        &self,
        url: &Url,
        depth: u32,
        page: Fetched,
        scope: &str,
        frontier: &mut Frontier,
        pdf_seen: &mut HashSet<String>,
        outcome: &mut CrawlOutcome,
        cancel: &CancellationToken,
    ) -> Result<(), CrawlError> {
        // The URL itself may have turned out to be a PDF
        if page.is_pdf() || has_pdf_extension(url.path()) {
            self.record_pdf(url.as_str(), "", pdf_seen, outcome);
            return Ok(());
        }
        if !page.is_html() {
            return Ok(());
        }

        for (i, (link, text)) in extract_links(&page.text(), url).into_iter().enumerate() {
            if i % LINK_BATCH == 0 && cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            if has_pdf_extension(link.path()) {
                if matches_product_lines(link.as_str(), &text, &self.product_lines) {
                    self.record_pdf(link.as_str(), &text, pdf_seen, outcome);
                }
                continue;
            }

            let in_scope = link
                .host_str()
                .map(|h| registrable_domain(h) == scope)
                .unwrap_or(false);
            if in_scope && depth < self.limits.max_depth {
                let score = score_url(&link, &self.product_lines);
                frontier.push(link, score, depth + 1);
            }
        }

        Ok(())
    }

    fn record_pdf(
        &self,
        url: &str,
        link_text: &str,
        pdf_seen: &mut HashSet<String>,
        outcome: &mut CrawlOutcome,
    ) {
        if pdf_seen.insert(url.to_string()) {
            tracing::info!("Found PDF: {}", url);
            outcome.pdfs.push(PdfCandidate {
                url: url.to_string(),
                link_text: link_text.to_string(),
            });
        }
    }
}

fn has_pdf_extension(path: &str) -> bool {
    path.to_lowercase().ends_with(".pdf")
}

/// Extracts anchors from an HTML page, resolved against the page URL.
/// Anchor-only, javascript:, mailto: and tel: links are dropped, as are
/// fragments on otherwise-identical URLs.
pub fn extract_links(html: &str, base: &Url) -> Vec<(Url, String)> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else { continue };
        if href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else { continue };
        resolved.set_fragment(None);
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let text = element.text().collect::<String>().trim().to_string();
        links.push((resolved, text));
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use bytes::Bytes;

    struct MockFetcher {
        pages: HashMap<String, (String, &'static str)>,
    }

    impl MockFetcher {
        fn new() -> Self {
            Self { pages: HashMap::new() }
        }

        fn with_html(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), (html.to_string(), "text/html"));
            self
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch_page(
            &self,
            url: &Url,
            _cancel: &CancellationToken,
        ) -> Result<Fetched, FetchError> {
            match self.pages.get(url.as_str()) {
                Some((body, mime)) => Ok(Fetched {
                    bytes: Bytes::from(body.clone()),
                    mime: Some(mime.to_string()),
                    final_url: url.clone(),
                    declared_size: None,
                }),
                None => Err(FetchError::HttpStatus(404)),
            }
        }

        async fn fetch_sample(
            &self,
            url: &Url,
            _max_bytes: usize,
            cancel: &CancellationToken,
        ) -> Result<Fetched, FetchError> {
            self.fetch_page(url, cancel).await
        }
    }

    #[test]
    fn test_normalize_url() {
        let a = Url::parse("https://Example.COM/Docs?b=2&a=1#section").unwrap();
        assert_eq!(normalize_url(&a), "https://example.com/Docs?a=1&b=2");

        let b = Url::parse("https://example.com/page#top").unwrap();
        assert_eq!(normalize_url(&b), "https://example.com/page");
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("docs.example.com"), "example.com");
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("shop.example.co.uk"), "example.co.uk");
    }

    #[test]
    fn test_score_url_table() {
        let lines: Vec<String> = vec![];
        let score = |u: &str| score_url(&Url::parse(u).unwrap(), &lines);

        assert_eq!(score("https://x.com/product/valve-a"), 10);
        assert_eq!(score("https://x.com/product_category/pumps"), 10);
        assert_eq!(score("https://x.com/catalog/2026"), 5);
        assert_eq!(score("https://x.com/specs/ab.html"), 5);
        assert_eq!(score("https://x.com/about"), 0);
        assert_eq!(score("https://x.com/blog/post-1"), -5);
        assert_eq!(score("https://x.com/careers"), -5);
        // additive: a product page under /datasheet scores both bonuses
        assert_eq!(score("https://x.com/product/datasheets/a"), 15);
    }

    #[test]
    fn test_score_url_product_lines() {
        let lines = vec!["AquaFlow".to_string()];
        let url = Url::parse("https://x.com/series/aquaflow-200").unwrap();
        assert_eq!(score_url(&url, &lines), 10);
    }

    #[test]
    fn test_frontier_ordering() {
        let mut frontier = Frontier::default();
        frontier.push(Url::parse("https://x.com/a").unwrap(), 0, 1);
        frontier.push(Url::parse("https://x.com/b").unwrap(), 10, 1);
        frontier.push(Url::parse("https://x.com/c").unwrap(), 5, 1);
        frontier.push(Url::parse("https://x.com/d").unwrap(), 10, 1);

        let order: Vec<String> = std::iter::from_fn(|| frontier.pop())
            .map(|(u, _)| u.path().to_string())
            .collect();
        // score descending; FIFO between the two score-10 entries
        assert_eq!(order, vec!["/b", "/d", "/c", "/a"]);
    }

    #[test]
    fn test_frontier_dedup_by_normalized_url() {
        let mut frontier = Frontier::default();
        assert!(frontier.push(Url::parse("https://x.com/p?a=1&b=2").unwrap(), 0, 1));
        assert!(!frontier.push(Url::parse("https://x.com/p?b=2&a=1").unwrap(), 0, 1));
        assert!(!frontier.push(Url::parse("https://x.com/p?a=1&b=2#frag").unwrap(), 0, 1));
    }

    #[test]
    fn test_extract_links_skips_non_navigable() {
        let base = Url::parse("https://x.com/docs/").unwrap();
        let html = r##"
            <html><body>
              <a href="/product/a">A</a>
              <a href="b.pdf">B sheet</a>
              <a href="#top">Top</a>
              <a href="javascript:void(0)">JS</a>
              <a href="mailto:sales@x.com">Mail</a>
              <a href="tel:+15551234">Call</a>
            </body></html>
        "##;
        let links = extract_links(html, &base);
        let paths: Vec<&str> = links.iter().map(|(u, _)| u.path()).collect();
        assert_eq!(paths, vec!["/product/a", "/docs/b.pdf"]);
        assert_eq!(links[1].1, "B sheet");
    }

    #[test]
    fn test_matches_product_lines() {
        let lines = vec!["Alpha".to_string(), "beta-2".to_string()];
        assert!(matches_product_lines("https://x.com/d/alpha.pdf", "", &lines));
        assert!(matches_product_lines("https://x.com/d/a.pdf", "Beta-2 datasheet", &lines));
        assert!(!matches_product_lines("https://x.com/d/gamma.pdf", "Gamma", &lines));
        assert!(matches_product_lines("https://x.com/anything.pdf", "", &[]));
    }

    #[tokio::test]
    async fn test_crawl_discovers_pdfs_in_scope() {
        let fetcher = MockFetcher::new()
            .with_html(
                "https://acme.example.com/",
                r#"<a href="/product/widget">Widget</a>
                   <a href="/docs/widget-datasheet.pdf">Datasheet</a>
                   <a href="https://other.com/external.pdf">External page link is still a pdf</a>
                   <a href="https://docs.example.com/sub">Subdomain</a>"#,
            )
            .with_html(
                "https://acme.example.com/product/widget",
                r#"<a href="/docs/widget-submittal.pdf">Submittal</a>"#,
            )
            .with_html(
                "https://docs.example.com/sub",
                r#"<a href="/library/spec.pdf">Spec</a>"#,
            );

        let crawler = Crawler::new(&fetcher, vec![]);
        let cancel = CancellationToken::new();
        let outcome = crawler.crawl("https://acme.example.com/", &cancel).await.unwrap();

        let urls: Vec<&str> = outcome.pdfs.iter().map(|p| p.url.as_str()).collect();
        assert!(urls.contains(&"https://acme.example.com/docs/widget-datasheet.pdf"));
        assert!(urls.contains(&"https://acme.example.com/docs/widget-submittal.pdf"));
        // PDF links are emitted regardless of host; only page *traversal* is scoped
        assert!(urls.contains(&"https://other.com/external.pdf"));
        // subdomain page was in scope and traversed
        assert!(urls.contains(&"https://docs.example.com/library/spec.pdf"));
        assert_eq!(outcome.pdfs.len(), 4);
    }

    #[tokio::test]
    async fn test_crawl_seed_unreachable() {
        let fetcher = MockFetcher::new();
        let crawler = Crawler::new(&fetcher, vec![]);
        let cancel = CancellationToken::new();
        let result = crawler.crawl("https://nowhere.example.com", &cancel).await;
        assert!(matches!(result, Err(CrawlError::SeedUnreachable(_))));
    }

    #[tokio::test]
    async fn test_crawl_cancellation_before_start() {
        let fetcher = MockFetcher::new().with_html("https://x.example.com/", "<a href='/a'>a</a>");
        let crawler = Crawler::new(&fetcher, vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = crawler.crawl("https://x.example.com/", &cancel).await;
        assert!(matches!(result, Err(CrawlError::Cancelled)));
    }

    #[tokio::test]
    async fn test_crawl_respects_page_bound() {
        // A chain of pages longer than the bound
        let mut fetcher = MockFetcher::new();
        for i in 0..10 {
            fetcher = fetcher.with_html(
                &format!("https://x.example.com/p{}", i),
                &format!("<a href=\"/p{}\">next</a>", i + 1),
            );
        }
        let crawler = Crawler::new(&fetcher, vec![]).with_limits(CrawlLimits {
            max_pages: 3,
            max_depth: 6,
            concurrency: 1,
        });
        let cancel = CancellationToken::new();
        let outcome = crawler.crawl("https://x.example.com/p0", &cancel).await.unwrap();
        assert!(outcome.pages_visited <= 3);
    }

    #[tokio::test]
    async fn test_product_line_filter_limits_pdfs() {
        let fetcher = MockFetcher::new().with_html(
            "https://x.example.com/",
            r#"<a href="/d/alpha-100.pdf">Alpha 100</a>
               <a href="/d/beta-200.pdf">Beta 200</a>"#,
        );
        let crawler = Crawler::new(&fetcher, vec!["alpha".to_string()]);
        let cancel = CancellationToken::new();
        let outcome = crawler.crawl("https://x.example.com/", &cancel).await.unwrap();
        assert_eq!(outcome.pdfs.len(), 1);
        assert_eq!(outcome.pdfs[0].url, "https://x.example.com/d/alpha-100.pdf");
    }
}
