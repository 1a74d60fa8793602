//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use listingscout_browser::{BrowserSession, ChromeSession, Stabilizer};
use listingscout_core::{HarvestReport, Harvester, ProgressReporter};
use listingscout_discovery::LinkDiscoverer;
use listingscout_extract::RecordExtractor;
use listingscout_shared::{
    AppConfig, DiscoveryConfig, ListingRecord, init_config, load_config, load_config_from,
};
use listingscout_storage::{CsvSink, RecordSink, Storage, is_database_path};
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// listingscout: harvest avito.ma property listings.
#[derive(Parser)]
#[command(
    name = "listingscout",
    version,
    about = "Harvest avito.ma property listings into a CSV file or a libSQL database.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.listingscout/listingscout.toml.
    #[arg(long, env = "LISTINGSCOUT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Discover listings, render each detail page and write the records.
    Run {
        /// Number of listing pages to scan.
        #[arg(long)]
        pages: Option<u32>,

        /// Stop after this many unique links.
        #[arg(long)]
        links: Option<usize>,

        /// Output path; `.db`/`.sqlite` writes a libSQL database, anything else CSV.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Show the browser window.
        #[arg(long)]
        headful: bool,
    },

    /// Discover listing links and print them without visiting them.
    Links {
        /// Number of listing pages to scan.
        #[arg(long)]
        pages: Option<u32>,

        /// Stop after this many unique links.
        #[arg(long)]
        links: Option<usize>,
    },

    /// Render and extract a single detail page, printing the record as JSON.
    Extract {
        /// Detail page URL.
        url: String,

        /// Show the browser window.
        #[arg(long)]
        headful: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a default config file to ~/.listingscout/listingscout.toml.
    Init,
    /// Print the effective configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` takes precedence.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "listingscout=info",
        1 => "listingscout=debug",
        _ => "listingscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run {
            pages,
            links,
            out,
            headful,
        } => {
            let mut config = read_config(config_path.as_deref())?;
            apply_limits(&mut config, pages, links);
            if let Some(out) = out {
                config.output.path = out;
            }
            if headful {
                config.browser.headless = false;
            }
            cmd_run(&config).await
        }
        Command::Links { pages, links } => {
            let mut config = read_config(config_path.as_deref())?;
            apply_limits(&mut config, pages, links);
            cmd_links(&config).await
        }
        Command::Extract { url, headful } => {
            let mut config = read_config(config_path.as_deref())?;
            if headful {
                config.browser.headless = false;
            }
            cmd_extract(&config, &url).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn apply_limits(config: &mut AppConfig, pages: Option<u32>, links: Option<usize>) {
    if let Some(pages) = pages {
        config.limits.max_pages = pages;
    }
    if let Some(links) = links {
        config.limits.max_links = links;
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig) -> Result<()> {
    info!(
        listing_url = %config.site.listing_url,
        max_pages = config.limits.max_pages,
        max_links = config.limits.max_links,
        out = %config.output.path.display(),
        "starting harvest"
    );

    let harvester = Harvester::from_config(config)?;
    let reporter = CliProgress::new();
    let report = harvester.run(&reporter).await;

    // Whatever was harvested gets written, even an empty set.
    let out = &config.output.path;
    let written = persist(out, &config.site.listing_url, &report).await?;

    println!();
    if let Some(e) = &report.discovery_error {
        println!("  Discovery failed: {e}");
    }
    if let Some(e) = &report.session_error {
        println!("  Browser failed:   {e}");
    }
    if let Some(reason) = &report.aborted {
        println!("  Run aborted:      {reason}");
    }
    println!("  Links:        {}", report.links_discovered);
    println!("  Records:      {written}");
    println!("  Failures:     {}", report.failures.len());
    println!("  Degradations: {}", report.degradations);
    println!("  Output:       {}", out.display());
    println!("  Time:         {:.1}s", report.duration.as_secs_f64());
    println!();

    for failure in &report.failures {
        println!("  skipped {}: {}", failure.url, failure.reason);
    }

    Ok(())
}

/// Write the report's records to `out`, keeping run bookkeeping when it is a database.
async fn persist(out: &Path, listing_url: &str, report: &HarvestReport) -> Result<usize> {
    if is_database_path(out) {
        let mut storage = Storage::open(out).await?;
        let run_id = Uuid::now_v7().to_string();
        storage.insert_run(&run_id, listing_url).await?;
        let written = storage.persist(&report.records).await?;
        storage.finish_run(&run_id, &report.stats_json()).await?;
        info!(%run_id, written, total = storage.count_listings().await?, "records stored");
        Ok(written)
    } else {
        let mut sink = CsvSink::create(out)?;
        let written = sink.persist(&report.records).await?;
        info!(written, path = %out.display(), "records written");
        Ok(written)
    }
}

async fn cmd_links(config: &AppConfig) -> Result<()> {
    let discovery = DiscoveryConfig::try_from(config)?;
    let (max_pages, max_links) = (discovery.max_pages, discovery.max_links);
    let discoverer = LinkDiscoverer::with_http(discovery, &config.site)?;

    let links = discoverer.discover_links(max_pages, max_links).await?;
    for link in &links {
        println!("{}", link.as_str());
    }
    info!(count = links.len(), "links discovered");
    Ok(())
}

async fn cmd_extract(config: &AppConfig, url: &str) -> Result<()> {
    let stabilizer = Stabilizer::new(config.stabilizer.clone());
    let extractor = RecordExtractor::from_config(&config.selectors)?;

    let mut session = ChromeSession::launch(&config.browser, &config.site).await?;
    let outcome = extract_one(&mut session, &stabilizer, &extractor, url).await;
    if let Err(e) = session.close().await {
        warn!(error = %e, "browser did not close cleanly");
    }

    let record = outcome?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn extract_one(
    session: &mut ChromeSession,
    stabilizer: &Stabilizer,
    extractor: &RecordExtractor,
    url: &str,
) -> Result<ListingRecord> {
    let page = stabilizer
        .stabilize(session, url)
        .await
        .map_err(|e| eyre!("could not render {url}: {e}"))?;
    let extracted = extractor.extract(&page.html, page.equipments, url);
    for degradation in &extracted.degradations {
        warn!(url, %degradation, "field degraded");
    }
    Ok(extracted.record)
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = read_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn link_started(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Rendering [{current}/{total}] {url}"));
    }

    fn link_finished(&self, url: &str, ok: bool) {
        if !ok {
            self.spinner.println(format!("  skipped {url}"));
        }
    }

    fn done(&self, _report: &HarvestReport) {
        self.spinner.finish_and_clear();
    }
}
