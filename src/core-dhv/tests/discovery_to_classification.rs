//! End-to-end shape of the discovery → classification pipeline, run against
//! canned pages and a failing model so the filename fallback carries the
//! whole classification load.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use core_dhv::classify::classify_pdf;
use core_dhv::crawl::{Crawler, PageFetcher};
use core_dhv::fetch::{FetchError, Fetched};
use core_dhv::llms::MockLlm;
use data_model_dhv::models::filename_from_url;

struct CannedSite {
    pages: HashMap<String, String>,
}

#[async_trait]
impl PageFetcher for CannedSite {
    async fn fetch_page(&self, url: &Url, _cancel: &CancellationToken) -> Result<Fetched, FetchError> {
        match self.pages.get(url.as_str()) {
            Some(html) => Ok(Fetched {
                bytes: Bytes::from(html.clone()),
                mime: Some("text/html".to_string()),
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

fn acme_site() -> CannedSite {
    let mut pages = HashMap::new();
    pages.insert(
        "https://acme.example.com/".to_string(),
        r#"<html><body>
            <a href="/product/valves">Valves</a>
            <a href="/product/pumps">Pumps</a>
            <a href="/support">Support</a>
        </body></html>"#
            .to_string(),
    );
    pages.insert(
        "https://acme.example.com/product/valves".to_string(),
        r#"<a href="/docs/v100-datasheet.pdf">V100</a>
           <a href="/docs/v100-submittal.pdf">V100 submittal</a>
           <a href="/docs/v100-install.pdf">V100 install</a>
           <a href="/docs/v200-datasheet.pdf">V200</a>
           <a href="/docs/valves-brochure.pdf">Valve brochure</a>"#
            .to_string(),
    );
    pages.insert(
        "https://acme.example.com/product/pumps".to_string(),
        r#"<a href="/docs/p10-datasheet.pdf">P10</a>
           <a href="/docs/p10-submittal.pdf">P10 submittal</a>
           <a href="/docs/p20-submittal.pdf">P20 submittal</a>
           <a href="/docs/p20-installation.pdf">P20 install</a>
           <a href="/docs/pumps-brochure.pdf">Pump brochure</a>"#
            .to_string(),
    );
    pages.insert(
        "https://acme.example.com/support".to_string(),
        "<html><body>No documents here</body></html>".to_string(),
    );
    CannedSite { pages }
}

#[tokio::test]
async fn crawl_then_classify_with_model_down() {
    let site = acme_site();
    let crawler = Crawler::new(&site, vec![]);
    let cancel = CancellationToken::new();

    let outcome = crawler.crawl("https://acme.example.com/", &cancel).await.unwrap();
    assert_eq!(outcome.pdfs.len(), 10, "site links exactly 10 PDFs");
    assert_eq!(outcome.page_errors, 0);

    // Model endpoint down for every call: the filename heuristic decides
    let model = MockLlm::failing();
    let mut technical = 0;
    let mut excluded = 0;
    for candidate in &outcome.pdfs {
        let filename = filename_from_url(&candidate.url);
        let classification = classify_pdf(Some(&model), &filename, None).await;
        if classification.is_technical {
            technical += 1;
        } else {
            excluded += 1;
        }
    }

    // 3 datasheets + 3 submittals in the allow-list; 2 installation manuals
    // and 2 brochures retained but not uploadable
    assert_eq!(technical, 6);
    assert_eq!(excluded, 4);
}

#[tokio::test]
async fn crawl_prioritizes_product_pages() {
    let site = acme_site();
    let crawler = Crawler::new(&site, vec![]);
    let cancel = CancellationToken::new();

    let outcome = crawler.crawl("https://acme.example.com/", &cancel).await.unwrap();
    // all four pages are reachable and visited within bounds
    assert_eq!(outcome.pages_visited, 4);
}
