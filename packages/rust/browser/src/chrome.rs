//! [`BrowserSession`] over Chrome via the DevTools protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use listingscout_shared::{
    AppConfig, BrowserLaunchConfig, ListingScoutError, Result, SiteConfig,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::session::{BrowserSession, ElementSnapshot, Locator, SessionFactory};

/// Well-known Chrome/Chromium install locations.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
];

/// Executable names searched for on `PATH`.
const CHROME_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Hides the usual automation fingerprints before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3] });
Object.defineProperty(navigator, 'languages', { get: () => ['fr-FR', 'fr'] });
"#;

/// Serializes an element into `{ tag, text, attributes }`.
const SNAPSHOT_FN: &str = r#"
const snap = (el) => {
  const attributes = {};
  for (const a of el.attributes) { attributes[a.name] = a.value; }
  return { tag: el.tagName.toLowerCase(), text: el.textContent || '', attributes };
};
"#;

// ---------------------------------------------------------------------------
// ChromeSession
// ---------------------------------------------------------------------------

/// One Chrome process with a single page.
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromeSession {
    /// Find Chrome, launch it and open a blank page with the site's
    /// user agent and language applied.
    pub async fn launch(config: &BrowserLaunchConfig, site: &SiteConfig) -> Result<Self> {
        let chrome_path = find_chrome(config.chrome_executable.as_deref())?;
        info!(path = %chrome_path.display(), headless = config.headless, "launching browser");

        let language = site
            .accept_language
            .split(',')
            .next()
            .unwrap_or("fr-FR")
            .trim()
            .to_string();

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(config.window_width, config.window_height);

        // with_head means NOT headless
        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg(format!(
                "--window-size={},{}",
                config.window_width, config.window_height
            ))
            .arg(format!("--lang={language}"))
            .arg(format!("--user-agent={}", site.user_agent));
        if config.stealth {
            builder = builder.arg("--disable-blink-features=AutomationControlled");
        }
        for arg in &config.chrome_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| ListingScoutError::Browser(format!("invalid browser config: {e}")))?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ListingScoutError::Browser(format!("failed to launch browser: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match open_page(&browser, config, site).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler.abort();
                return Err(e);
            }
        };

        Ok(Self {
            browser: Some(browser),
            page,
            handler,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        })
    }
}

async fn open_page(browser: &Browser, config: &BrowserLaunchConfig, site: &SiteConfig) -> Result<Page> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| ListingScoutError::Browser(format!("failed to open page: {e}")))?;

    let ua_override = SetUserAgentOverrideParams::builder()
        .user_agent(site.user_agent.clone())
        .accept_language(site.accept_language.clone())
        .build()
        .map_err(|e| ListingScoutError::Browser(format!("invalid user agent override: {e}")))?;
    page.execute(ua_override)
        .await
        .map_err(|e| ListingScoutError::Browser(format!("user agent override failed: {e}")))?;

    if config.stealth {
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(|e| ListingScoutError::Browser(format!("stealth script failed: {e}")))?;
    }

    Ok(page)
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        debug!(url, "navigating");
        tokio::time::timeout(self.navigation_timeout, self.page.goto(url))
            .await
            .map_err(|_| {
                ListingScoutError::navigation(
                    url,
                    format!("timed out after {}s", self.navigation_timeout.as_secs()),
                )
            })?
            .map_err(|e| ListingScoutError::navigation(url, e.to_string()))?;
        Ok(())
    }

    async fn find_elements(&mut self, locator: &Locator) -> Result<Vec<ElementSnapshot>> {
        let script = find_script(locator)?;
        let result = self
            .page
            .evaluate_expression(script)
            .await
            .map_err(|e| ListingScoutError::Browser(format!("element lookup failed: {e}")))?;
        decode_snapshots(result.value())
    }

    async fn execute_script(&mut self, source: &str) -> Result<()> {
        self.page
            .evaluate_expression(source)
            .await
            .map_err(|e| ListingScoutError::Browser(format!("script failed: {e}")))?;
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| ListingScoutError::Browser(format!("failed to read page source: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        info!("closing browser");

        let closed = browser
            .close()
            .await
            .map_err(|e| ListingScoutError::Browser(format!("failed to close browser: {e}")));
        if let Err(e) = browser.wait().await {
            warn!(error = %e, "browser process did not exit cleanly");
        }
        self.handler.abort();
        closed.map(|_| ())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // chromiumoxide kills the child process when `Browser` drops.
        if self.browser.is_some() {
            warn!("browser session dropped without close");
        }
        self.handler.abort();
    }
}

/// Decode the JSON array returned by a [`find_script`] evaluation.
fn decode_snapshots(value: Option<&serde_json::Value>) -> Result<Vec<ElementSnapshot>> {
    let value =
        value.ok_or_else(|| ListingScoutError::parse("element lookup returned no value"))?;
    serde_json::from_value(value.clone())
        .map_err(|e| ListingScoutError::parse(format!("element lookup returned bad data: {e}")))
}

/// Build the lookup script for `locator`; the selector is embedded as a JSON string literal.
fn find_script(locator: &Locator) -> Result<String> {
    let quote = |s: &str| {
        serde_json::to_string(s)
            .map_err(|e| ListingScoutError::Browser(format!("unencodable locator: {e}")))
    };

    let body = match locator {
        Locator::Tag(sel) | Locator::Css(sel) => format!(
            "return Array.from(document.querySelectorAll({})).map(snap);",
            quote(sel)?
        ),
        Locator::XPath(expr) => format!(
            r#"const r = document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
const out = [];
for (let i = 0; i < r.snapshotLength; i++) {{
  const n = r.snapshotItem(i);
  if (n.nodeType === 1) {{ out.push(snap(n)); }}
}}
return out;"#,
            quote(expr)?
        ),
    };

    Ok(format!("(() => {{\n{SNAPSHOT_FN}\n{body}\n}})()"))
}

/// Configured path first, then well-known install paths, then `PATH`.
fn find_chrome(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ListingScoutError::config(format!(
            "configured chrome_executable not found: {}",
            path.display()
        )));
    }

    if let Some(path) = CHROME_PATHS.iter().map(Path::new).find(|p| p.exists()) {
        return Ok(path.to_path_buf());
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            for cmd in CHROME_COMMANDS {
                let candidate = dir.join(cmd);
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    Err(ListingScoutError::Browser(
        "Chrome/Chromium not found; install it or set browser.chrome_executable".into(),
    ))
}

// ---------------------------------------------------------------------------
// ChromeSessionFactory
// ---------------------------------------------------------------------------

/// Launches a fresh [`ChromeSession`] per call.
#[derive(Debug, Clone)]
pub struct ChromeSessionFactory {
    browser: BrowserLaunchConfig,
    site: SiteConfig,
}

impl ChromeSessionFactory {
    pub fn new(browser: BrowserLaunchConfig, site: SiteConfig) -> Self {
        Self { browser, site }
    }
}

impl From<&AppConfig> for ChromeSessionFactory {
    fn from(config: &AppConfig) -> Self {
        Self::new(config.browser.clone(), config.site.clone())
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    type Session = ChromeSession;

    async fn open(&self) -> Result<ChromeSession> {
        ChromeSession::launch(&self.browser, &self.site).await
    }
}
