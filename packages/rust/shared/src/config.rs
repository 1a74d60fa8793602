//! Application configuration for listingscout.
//!
//! User config lives at `~/.listingscout/listingscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ListingScoutError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "listingscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".listingscout";

// ---------------------------------------------------------------------------
// Config structs (matching listingscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Target site URLs and request headers.
    #[serde(default)]
    pub site: SiteConfig,

    /// Page and link caps for discovery.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Randomized pause between requests.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Headless browser launch options.
    #[serde(default)]
    pub browser: BrowserLaunchConfig,

    /// Bounds and markers for the dynamic-content protocol.
    #[serde(default)]
    pub stabilizer: StabilizerConfig,

    /// Markup markers used by the field extraction rules.
    #[serde(default)]
    pub selectors: SelectorsConfig,

    /// Where records are written.
    #[serde(default)]
    pub output: OutputConfig,
}

impl AppConfig {
    /// Reject combinations that would make a run misbehave.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.site.base_url).map_err(|e| {
            ListingScoutError::config(format!("invalid site.base_url '{}': {e}", self.site.base_url))
        })?;
        Url::parse(&self.site.listing_url).map_err(|e| {
            ListingScoutError::config(format!(
                "invalid site.listing_url '{}': {e}",
                self.site.listing_url
            ))
        })?;
        if self.site.page_param.trim().is_empty() {
            return Err(ListingScoutError::config("site.page_param must not be empty"));
        }
        if self.pacing.max_delay_ms < self.pacing.min_delay_ms {
            return Err(ListingScoutError::config(format!(
                "pacing.max_delay_ms ({}) is below pacing.min_delay_ms ({})",
                self.pacing.max_delay_ms, self.pacing.min_delay_ms
            )));
        }
        Ok(())
    }
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Base used to resolve relative links.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Paginated listing index.
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Query parameter carrying the page number.
    #[serde(default = "default_page_param")]
    pub page_param: String,

    /// User-Agent sent with static fetches and set on the browser.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept-Language sent with static fetches and set on the browser.
    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Timeout for one static fetch.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            listing_url: default_listing_url(),
            page_param: default_page_param(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.avito.ma".into()
}
fn default_listing_url() -> String {
    "https://www.avito.ma/fr/maroc/immobilier".into()
}
fn default_page_param() -> String {
    "o".into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/122 Safari/537.36".into()
}
fn default_accept_language() -> String {
    "fr-FR,fr;q=0.9,en;q=0.8".into()
}
fn default_request_timeout() -> u64 {
    30
}

/// `[limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Number of listing pages to scan.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Safety cap on discovered links.
    #[serde(default = "default_max_links")]
    pub max_links: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_links: default_max_links(),
        }
    }
}

fn default_max_pages() -> u32 {
    10
}
fn default_max_links() -> usize {
    300
}

/// `[pacing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Lower bound of the pause in ms.
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,

    /// Upper bound of the pause in ms (inclusive).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl PacingConfig {
    /// No pause at all.
    pub fn none() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Draw a pause uniformly from the configured range.
    pub fn delay(&self) -> Duration {
        let lo = self.min_delay_ms.min(self.max_delay_ms);
        let hi = self.min_delay_ms.max(self.max_delay_ms);
        if hi == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

fn default_min_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    2000
}

/// `[browser]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserLaunchConfig {
    /// Run without a visible window.
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Explicit Chrome/Chromium binary; searched for when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_executable: Option<PathBuf>,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Hide common automation fingerprints.
    #[serde(default = "default_true")]
    pub stealth: bool,

    /// Upper bound for a single navigation.
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Extra Chrome command-line arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

impl Default for BrowserLaunchConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            stealth: true,
            navigation_timeout_secs: default_navigation_timeout(),
            chrome_args: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_navigation_timeout() -> u64 {
    30
}

/// `[stabilizer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizerConfig {
    /// Element whose presence means the page has rendered.
    #[serde(default = "default_heading_selector")]
    pub heading_selector: String,

    #[serde(default = "default_heading_attempts")]
    pub heading_attempts: u32,

    #[serde(default = "default_heading_interval")]
    pub heading_interval_ms: u64,

    /// Pause after scrolling to the page midpoint.
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Exact `aria-label` of the "show more" buttons.
    #[serde(default = "default_expand_label")]
    pub expand_label: String,

    /// Exact text of the `h2` heading the equipment section follows.
    #[serde(default = "default_equipment_heading")]
    pub equipment_heading: String,

    #[serde(default = "default_equipment_attempts")]
    pub equipment_attempts: u32,

    #[serde(default = "default_equipment_interval")]
    pub equipment_interval_ms: u64,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            heading_selector: default_heading_selector(),
            heading_attempts: default_heading_attempts(),
            heading_interval_ms: default_heading_interval(),
            settle_ms: default_settle(),
            expand_label: default_expand_label(),
            equipment_heading: default_equipment_heading(),
            equipment_attempts: default_equipment_attempts(),
            equipment_interval_ms: default_equipment_interval(),
        }
    }
}

fn default_heading_selector() -> String {
    "h1".into()
}
fn default_heading_attempts() -> u32 {
    20
}
fn default_heading_interval() -> u64 {
    500
}
fn default_settle() -> u64 {
    1000
}
fn default_expand_label() -> String {
    "Voir plus".into()
}
fn default_equipment_heading() -> String {
    "Équipements".into()
}
fn default_equipment_attempts() -> u32 {
    10
}
fn default_equipment_interval() -> u64 {
    200
}

/// `[selectors]` section.
///
/// The class markers are generated by the site's CSS tooling and change
/// whenever it redeploys; they are matched as regex fragments against
/// individual class names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorsConfig {
    #[serde(default = "default_price_class")]
    pub price_class: String,

    #[serde(default = "default_location_class")]
    pub location_class: String,

    #[serde(default = "default_description_class")]
    pub description_class: String,

    /// `data-testid` of the seller name element.
    #[serde(default = "default_seller_test_id")]
    pub seller_test_id: String,

    /// Regex matched against the diacritic-folded, lower-cased label text.
    #[serde(default = "default_category_label")]
    pub category_label: String,

    #[serde(default = "default_property_block_class")]
    pub property_block_class: String,

    #[serde(default = "default_property_label_class")]
    pub property_label_class: String,

    #[serde(default = "default_property_value_class")]
    pub property_value_class: String,

    /// Placeholder text the breadcrumb's home icon renders.
    #[serde(default = "default_breadcrumb_icon_text")]
    pub breadcrumb_icon_text: String,

    /// Substring identifying listing photos.
    #[serde(default = "default_image_host_marker")]
    pub image_host_marker: String,

    /// Substring identifying thumbnails of other listings.
    #[serde(default = "default_thumbnail_marker")]
    pub thumbnail_marker: String,
}

impl Default for SelectorsConfig {
    fn default() -> Self {
        Self {
            price_class: default_price_class(),
            location_class: default_location_class(),
            description_class: default_description_class(),
            seller_test_id: default_seller_test_id(),
            category_label: default_category_label(),
            property_block_class: default_property_block_class(),
            property_label_class: default_property_label_class(),
            property_value_class: default_property_value_class(),
            breadcrumb_icon_text: default_breadcrumb_icon_text(),
            image_host_marker: default_image_host_marker(),
            thumbnail_marker: default_thumbnail_marker(),
        }
    }
}

fn default_price_class() -> String {
    "sc-16573058-12".into()
}
fn default_location_class() -> String {
    "sc-16573058-17".into()
}
fn default_description_class() -> String {
    "sc-9bb253d7-0".into()
}
fn default_seller_test_id() -> String {
    "SellerName".into()
}
fn default_category_label() -> String {
    "categor(y|ie)".into()
}
fn default_property_block_class() -> String {
    "sc-cd1c365e-1".into()
}
fn default_property_label_class() -> String {
    "bXFCIH".into()
}
fn default_property_value_class() -> String {
    "fjZBup".into()
}
fn default_breadcrumb_icon_text() -> String {
    "Home Icon".into()
}
fn default_image_host_marker() -> String {
    "content.avito.ma".into()
}
fn default_thumbnail_marker() -> String {
    "?t=card".into()
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `.csv` for a flat file, `.db`/`.sqlite` for a libSQL database.
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("avito_dataset.csv")
}

// ---------------------------------------------------------------------------
// Discovery config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime discovery configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Base used to resolve relative hrefs.
    pub base_url: Url,
    /// Listing index the page parameter is appended to.
    pub listing_url: Url,
    /// Name of the page-number query parameter.
    pub page_param: String,
    /// Listing pages to scan at most.
    pub max_pages: u32,
    /// Links to collect at most.
    pub max_links: usize,
    /// Pause between listing pages.
    pub pacing: PacingConfig,
}

impl DiscoveryConfig {
    /// URL of listing page `page` (1-based).
    pub fn page_url(&self, page: u32) -> Url {
        let mut url = self.listing_url.clone();
        url.query_pairs_mut()
            .append_pair(&self.page_param, &page.to_string());
        url
    }
}

impl TryFrom<&AppConfig> for DiscoveryConfig {
    type Error = ListingScoutError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let base_url = Url::parse(&config.site.base_url)
            .map_err(|e| ListingScoutError::config(format!("site.base_url: {e}")))?;
        let listing_url = Url::parse(&config.site.listing_url)
            .map_err(|e| ListingScoutError::config(format!("site.listing_url: {e}")))?;

        Ok(Self {
            base_url,
            listing_url,
            page_param: config.site.page_param.clone(),
            max_pages: config.limits.max_pages,
            max_links: config.limits.max_links,
            pacing: config.pacing.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.listingscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ListingScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.listingscout/listingscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ListingScoutError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ListingScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ListingScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ListingScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ListingScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
