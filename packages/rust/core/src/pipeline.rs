//! End-to-end harvest: listing index → links → stabilized pages → records.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{error, info, instrument, warn};

use listingscout_browser::{BrowserSession, ChromeSessionFactory, SessionFactory, Stabilizer};
use listingscout_discovery::{HttpFetcher, LinkDiscoverer, PageFetcher};
use listingscout_extract::RecordExtractor;
use indexmap::IndexSet;
use listingscout_shared::{
    AppConfig, DiscoveryConfig, ListingLink, ListingRecord, PacingConfig, Result,
};

/// One link that produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of [`Harvester::run`].
#[derive(Debug, Default)]
pub struct HarvestReport {
    /// Unique links returned by discovery.
    pub links_discovered: usize,
    /// Extracted records, in link order.
    pub records: Vec<ListingRecord>,
    /// Links skipped because stabilization or extraction failed.
    pub failures: Vec<LinkFailure>,
    /// Tolerated conditions across all pages.
    pub degradations: usize,
    /// Set when discovery failed and the run harvested nothing.
    pub discovery_error: Option<String>,
    /// Set when the browser session could not be opened.
    pub session_error: Option<String>,
    /// Set when the link loop itself panicked; records gathered before that are kept.
    pub aborted: Option<String>,
    pub duration: Duration,
}

impl HarvestReport {
    /// Summary counters as JSON, for run bookkeeping.
    pub fn stats_json(&self) -> String {
        serde_json::json!({
            "links_discovered": self.links_discovered,
            "records": self.records.len(),
            "failures": self.failures.len(),
            "degradations": self.degradations,
            "discovery_error": self.discovery_error,
            "session_error": self.session_error,
            "aborted": self.aborted,
            "duration_ms": self.duration.as_millis() as u64,
        })
        .to_string()
    }
}

/// Progress callback for reporting harvest status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a detail page is processed.
    fn link_started(&self, url: &str, current: usize, total: usize);
    /// Called after a detail page, whether it produced a record or not.
    fn link_finished(&self, url: &str, ok: bool);
    /// Called when the run completes.
    fn done(&self, report: &HarvestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn link_started(&self, _url: &str, _current: usize, _total: usize) {}
    fn link_finished(&self, _url: &str, _ok: bool) {}
    fn done(&self, _report: &HarvestReport) {}
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

/// Runs discovery once, then stabilizes and extracts every link in order
/// over a single browser session.
pub struct Harvester<F, S> {
    discoverer: LinkDiscoverer<F>,
    sessions: S,
    stabilizer: Stabilizer,
    extractor: RecordExtractor,
}

impl Harvester<HttpFetcher, ChromeSessionFactory> {
    /// Wire the HTTP fetcher and Chrome sessions from the app config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let discovery = DiscoveryConfig::try_from(config)?;
        Ok(Self::new(
            LinkDiscoverer::with_http(discovery, &config.site)?,
            ChromeSessionFactory::from(config),
            Stabilizer::new(config.stabilizer.clone()),
            RecordExtractor::from_config(&config.selectors)?,
        ))
    }
}

impl<F, S> Harvester<F, S>
where
    F: PageFetcher,
    S: SessionFactory,
{
    pub fn new(
        discoverer: LinkDiscoverer<F>,
        sessions: S,
        stabilizer: Stabilizer,
        extractor: RecordExtractor,
    ) -> Self {
        Self {
            discoverer,
            sessions,
            stabilizer,
            extractor,
        }
    }

    fn pacing(&self) -> &PacingConfig {
        &self.discoverer.config().pacing
    }

    /// Run the whole harvest. Never fails: problems end up on the report.
    ///
    /// The session is closed once the link loop ends, even when the loop
    /// panics. Dropping the returned future mid-run drops the session
    /// without `close`; [`ChromeSession`](listingscout_browser::ChromeSession)
    /// stops its browser on drop.
    #[instrument(skip_all, fields(listing_url = %self.discoverer.config().listing_url))]
    pub async fn run(&self, progress: &dyn ProgressReporter) -> HarvestReport {
        let start = Instant::now();
        let mut report = HarvestReport::default();
        let config = self.discoverer.config();

        progress.phase("Discovering listing links");
        let links = match self
            .discoverer
            .discover_links(config.max_pages, config.max_links)
            .await
        {
            Ok(links) => links,
            Err(e) => {
                error!(error = %e, "link discovery failed");
                report.discovery_error = Some(e.to_string());
                return finish(report, start, progress);
            }
        };
        report.links_discovered = links.len();
        info!(links = links.len(), "discovery complete");

        if links.is_empty() {
            info!("no links found, nothing to harvest");
            return finish(report, start, progress);
        }

        progress.phase("Launching browser");
        let mut session = match self.sessions.open().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "could not open browser session");
                report.session_error = Some(e.to_string());
                return finish(report, start, progress);
            }
        };

        progress.phase("Extracting listings");
        let harvested = AssertUnwindSafe(self.harvest_links(
            &mut session,
            &links,
            progress,
            &mut report,
        ))
        .catch_unwind()
        .await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "browser session did not close cleanly");
        }
        if let Err(panic) = harvested {
            let reason = panic_message(panic.as_ref());
            error!(%reason, "harvest loop aborted");
            report.aborted = Some(reason);
        }

        finish(report, start, progress)
    }

    /// Visit every link in order over `session`, recording outcomes on `report`.
    async fn harvest_links(
        &self,
        session: &mut S::Session,
        links: &IndexSet<ListingLink>,
        progress: &dyn ProgressReporter,
        report: &mut HarvestReport,
    ) {
        let total = links.len();
        for (i, link) in links.iter().enumerate() {
            let url = link.as_str();
            progress.link_started(url, i + 1, total);

            let outcome = AssertUnwindSafe(self.harvest_link(session, url))
                .catch_unwind()
                .await;

            let ok = match outcome {
                Ok(Ok((record, degradations))) => {
                    info!(
                        current = i + 1,
                        total,
                        title = %record.title,
                        price = %record.price,
                        equipments = record.equipments.len(),
                        "listing extracted"
                    );
                    report.degradations += degradations;
                    report.records.push(record);
                    true
                }
                Ok(Err(e)) => {
                    warn!(url, error = %e, "listing skipped");
                    report.failures.push(LinkFailure {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                    false
                }
                Err(panic) => {
                    let reason = format!("panic: {}", panic_message(panic.as_ref()));
                    error!(url, %reason, "listing skipped");
                    report.failures.push(LinkFailure {
                        url: url.to_string(),
                        reason,
                    });
                    false
                }
            };
            progress.link_finished(url, ok);

            tokio::time::sleep(self.pacing().delay()).await;
        }
    }

    /// Stabilize and extract one detail page. Returns the record and its degradation count.
    async fn harvest_link(
        &self,
        session: &mut S::Session,
        url: &str,
    ) -> Result<(ListingRecord, usize)> {
        let page = self.stabilizer.stabilize(session, url).await?;
        let extracted = self.extractor.extract(&page.html, page.equipments, url);
        for degradation in &extracted.degradations {
            warn!(url, %degradation, "field degraded");
        }
        let degradations = page.degradations.len() + extracted.degradations.len();
        Ok((extracted.record, degradations))
    }
}

fn finish(mut report: HarvestReport, start: Instant, progress: &dyn ProgressReporter) -> HarvestReport {
    report.duration = start.elapsed();
    info!(
        links = report.links_discovered,
        records = report.records.len(),
        failures = report.failures.len(),
        degradations = report.degradations,
        elapsed_ms = report.duration.as_millis() as u64,
        "harvest finished"
    );
    progress.done(&report);
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
