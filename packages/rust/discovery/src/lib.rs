//! Paginated listing-link discovery.
//!
//! Walks the listing index page by page over plain HTTP, collecting the
//! detail-page links each page references. Links are deduplicated across
//! pages while keeping first-seen order.

mod parser;

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexSet;
use listingscout_shared::{DiscoveryConfig, ListingLink, ListingScoutError, Result, SiteConfig};
use reqwest::Client;
use reqwest::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use parser::extract_listing_links;

/// Maximum number of redirects to follow for one listing page.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// PageFetcher
// ---------------------------------------------------------------------------

/// Retrieves the HTML of a static page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return its body. Non-success statuses are errors.
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// [`PageFetcher`] backed by a reqwest client carrying the site's headers.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a client with the configured User-Agent, Accept-Language and timeout.
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let language = HeaderValue::from_str(&site.accept_language).map_err(|e| {
            ListingScoutError::config(format!(
                "invalid accept_language '{}': {e}",
                site.accept_language
            ))
        })?;
        headers.insert(ACCEPT_LANGUAGE, language);

        let client = Client::builder()
            .user_agent(site.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(site.request_timeout_secs))
            .build()
            .map_err(|e| ListingScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ListingScoutError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ListingScoutError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| ListingScoutError::Network(format!("{url}: failed to read body: {e}")))
    }
}

// ---------------------------------------------------------------------------
// LinkDiscoverer
// ---------------------------------------------------------------------------

/// Collects detail-page links from the paginated listing index.
pub struct LinkDiscoverer<F> {
    config: DiscoveryConfig,
    fetcher: F,
}

impl LinkDiscoverer<HttpFetcher> {
    /// Discoverer using a reqwest fetcher built from `site`.
    pub fn with_http(config: DiscoveryConfig, site: &SiteConfig) -> Result<Self> {
        Ok(Self::new(config, HttpFetcher::new(site)?))
    }
}

impl<F: PageFetcher> LinkDiscoverer<F> {
    pub fn new(config: DiscoveryConfig, fetcher: F) -> Self {
        Self { config, fetcher }
    }

    /// The configuration this discoverer was built with.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Scan pages `1..=max_pages`, returning at most `max_links` unique links.
    ///
    /// A failed fetch ends the scan: on the first page it is returned as an
    /// error, on later pages the links found so far are returned. The scan
    /// also stops once a page adds nothing new.
    #[instrument(skip_all, fields(max_pages, max_links))]
    pub async fn discover_links(
        &self,
        max_pages: u32,
        max_links: usize,
    ) -> Result<IndexSet<ListingLink>> {
        let mut links = IndexSet::new();
        if max_pages == 0 || max_links == 0 {
            debug!("nothing to discover");
            return Ok(links);
        }

        'pages: for page in 1..=max_pages {
            let url = self.config.page_url(page);
            debug!(page, %url, "fetching listing page");

            let html = match self.fetcher.fetch(&url).await {
                Ok(html) => html,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    warn!(page, error = %e, "listing page fetch failed, keeping partial result");
                    break;
                }
            };

            let before = links.len();
            for link in extract_listing_links(&html, &self.config.base_url) {
                links.insert(link);
                if links.len() >= max_links {
                    info!(page, total = links.len(), "link cap reached");
                    break 'pages;
                }
            }

            let new_links = links.len() - before;
            info!(page, new_links, total = links.len(), "listing page scanned");

            if new_links == 0 {
                debug!(page, "page added no new links, stopping");
                break;
            }

            if page < max_pages {
                tokio::time::sleep(self.config.pacing.delay()).await;
            }
        }

        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listingscout_shared::{AppConfig, PacingConfig};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> DiscoveryConfig {
        DiscoveryConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            listing_url: Url::parse(&format!("{}/fr/maroc/immobilier", server.uri())).unwrap(),
            page_param: "o".into(),
            max_pages: 10,
            max_links: 300,
            pacing: PacingConfig::none(),
        }
    }

    fn discoverer(server: &MockServer) -> LinkDiscoverer<HttpFetcher> {
        LinkDiscoverer::with_http(config_for(server), &AppConfig::default().site).unwrap()
    }

    fn page_with(hrefs: &[&str]) -> String {
        let anchors: String = hrefs
            .iter()
            .map(|h| format!(r#"<a href="{h}">listing</a>"#))
            .collect();
        format!("<html><body>{anchors}</body></html>")
    }

    async fn mount_page(server: &MockServer, page: u32, body: String) {
        Mock::given(method("GET"))
            .and(path("/fr/maroc/immobilier"))
            .and(query_param("o", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn single_page_dedups_and_strips_query() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            1,
            page_with(&[
                "/fr/maroc/a_12345.htm?x=1",
                "/fr/maroc/a_12345.htm",
                "/fr/maroc/other",
            ]),
        )
        .await;

        let links = discoverer(&server).discover_links(1, 300).await.unwrap();
        let links: Vec<&str> = links.iter().map(|l| l.as_str()).collect();
        assert_eq!(links, vec![format!("{}/fr/maroc/a_12345.htm", server.uri())]);
    }

    #[tokio::test]
    async fn stops_when_a_page_adds_nothing() {
        let server = MockServer::start().await;
        mount_page(&server, 1, page_with(&["/x/a_1.htm", "/x/b_2.htm"])).await;
        mount_page(&server, 2, page_with(&["/x/b_2.htm", "/x/a_1.htm"])).await;
        Mock::given(method("GET"))
            .and(query_param("o", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with(&["/x/c_3.htm"])))
            .expect(0)
            .mount(&server)
            .await;

        let links = discoverer(&server).discover_links(5, 300).await.unwrap();
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn link_cap_ends_whole_discovery() {
        let server = MockServer::start().await;
        mount_page(&server, 1, page_with(&["/x/a_1.htm", "/x/b_2.htm", "/x/c_3.htm"])).await;
        Mock::given(method("GET"))
            .and(query_param("o", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with(&["/x/d_4.htm"])))
            .expect(0)
            .mount(&server)
            .await;

        let links = discoverer(&server).discover_links(3, 2).await.unwrap();
        let links: Vec<String> = links.iter().map(|l| l.to_string()).collect();
        assert_eq!(
            links,
            vec![
                format!("{}/x/a_1.htm", server.uri()),
                format!("{}/x/b_2.htm", server.uri()),
            ]
        );
    }

    #[tokio::test]
    async fn first_page_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = discoverer(&server).discover_links(3, 300).await.unwrap_err();
        assert!(matches!(err, ListingScoutError::Network(_)));
    }

    #[tokio::test]
    async fn later_page_failure_keeps_partial_result() {
        let server = MockServer::start().await;
        mount_page(&server, 1, page_with(&["/x/a_1.htm"])).await;
        Mock::given(method("GET"))
            .and(query_param("o", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let links = discoverer(&server).discover_links(4, 300).await.unwrap();
        assert_eq!(links.len(), 1);
    }

    #[tokio::test]
    async fn zero_limits_fetch_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with(&["/x/a_1.htm"])))
            .expect(0)
            .mount(&server)
            .await;

        let d = discoverer(&server);
        assert!(d.discover_links(0, 300).await.unwrap().is_empty());
        assert!(d.discover_links(3, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sends_configured_headers() {
        let server = MockServer::start().await;
        let site = AppConfig::default().site;
        Mock::given(method("GET"))
            .and(wiremock::matchers::header_exists("accept-language"))
            .and(wiremock::matchers::header("user-agent", site.user_agent.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(page_with(&["/x/a_1.htm"])))
            .expect(1)
            .mount(&server)
            .await;

        let links = discoverer(&server).discover_links(1, 300).await.unwrap();
        assert_eq!(links.len(), 1);
    }
}
