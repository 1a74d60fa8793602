//! The narrow browser surface the stabilizer drives.

use std::collections::HashMap;

use async_trait::async_trait;
use listingscout_shared::Result;
use serde::Deserialize;

/// How to find elements in the live page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Elements with this tag name.
    Tag(String),
    /// Elements matching a CSS selector.
    Css(String),
    /// Element nodes matched by an XPath expression.
    XPath(String),
}

impl Locator {
    pub fn tag(name: impl Into<String>) -> Self {
        Self::Tag(name.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }
}

/// A detached copy of one element's tag, text and attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ElementSnapshot {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A scriptable browsing session holding one page.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url`. Failure is a [`Navigation`](listingscout_shared::ListingScoutError::Navigation) error.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Snapshot every element matching `locator`, in document order.
    async fn find_elements(&mut self, locator: &Locator) -> Result<Vec<ElementSnapshot>>;

    /// Run `source` in the page, ignoring its result.
    async fn execute_script(&mut self, source: &str) -> Result<()>;

    /// Serialized DOM of the current page.
    async fn page_source(&mut self) -> Result<String>;

    /// Release the session. Later calls are no-ops.
    async fn close(&mut self) -> Result<()>;
}

/// Opens browsing sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession;

    async fn open(&self) -> Result<Self::Session>;
}
