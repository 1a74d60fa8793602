//! Core domain types for listing discovery and extraction.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Column order used by every sink that writes flat rows.
pub const RECORD_COLUMNS: [&str; 13] = [
    "id",
    "url",
    "title",
    "price",
    "location",
    "publication_time",
    "seller",
    "category",
    "description",
    "breadcrumb",
    "properties",
    "equipments",
    "images",
];

/// Detail pages end in `_<digits>.htm`.
static DETAIL_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_\d+\.htm$").expect("detail path regex"));

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for record identifiers (time-sortable, never derived from page content).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ListingLink
// ---------------------------------------------------------------------------

/// Absolute, query-free URL of one detail page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingLink(String);

impl ListingLink {
    /// Resolve `href` against `base` and keep it only if it points at a detail page.
    ///
    /// Query string and fragment are dropped before the path is checked.
    pub fn resolve(base: &Url, href: &str) -> Option<Self> {
        let mut url = base.join(href.trim()).ok()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }
        url.set_query(None);
        url.set_fragment(None);

        if !DETAIL_PATH_RE.is_match(url.path()) {
            return None;
        }
        Some(Self(url.into()))
    }

    /// The link as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ListingLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ListingLink {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ListingRecord
// ---------------------------------------------------------------------------

/// Structured output for one detail page.
///
/// Every field is always present; missing markup leaves the empty default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub id: RecordId,
    pub url: String,
    pub title: String,
    /// Raw display text, not parsed.
    pub price: String,
    pub location: String,
    /// `YYYY-MM-DD HH:MM:SS`, the raw text when it could not be resolved, or empty.
    pub publication_time: String,
    pub seller: String,
    pub category: String,
    pub description: String,
    pub breadcrumb: Vec<String>,
    pub properties: BTreeMap<String, String>,
    pub equipments: Vec<String>,
    pub images: Vec<String>,
}

impl ListingRecord {
    /// A record for `url` with a fresh id and every other field empty.
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            url: url.into(),
            title: String::new(),
            price: String::new(),
            location: String::new(),
            publication_time: String::new(),
            seller: String::new(),
            category: String::new(),
            description: String::new(),
            breadcrumb: Vec::new(),
            properties: BTreeMap::new(),
            equipments: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Flatten into text cells in [`RECORD_COLUMNS`] order.
    ///
    /// Structured fields become compact JSON with non-ASCII characters kept as-is.
    pub fn to_row(&self) -> [String; 13] {
        [
            self.id.to_string(),
            self.url.clone(),
            self.title.clone(),
            self.price.clone(),
            self.location.clone(),
            self.publication_time.clone(),
            self.seller.clone(),
            self.category.clone(),
            self.description.clone(),
            compact_json(&self.breadcrumb),
            compact_json(&self.properties),
            compact_json(&self.equipments),
            compact_json(&self.images),
        ]
    }
}

fn compact_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

/// A condition that was tolerated instead of failing the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// No primary heading appeared within the polling bound.
    HeadingTimeout,
    /// A best-effort browser step (scroll, expand, poll) failed.
    StepFailed { step: &'static str, message: String },
    /// Equipment count never reached a fixed point.
    StabilizationTimeout { last_count: usize },
    /// Reading equipment labels from the live page failed.
    EquipmentExtraction(String),
    /// A record field fell back to its empty default.
    FieldMissing { field: &'static str },
    /// The publication time could not be resolved to a timestamp.
    PublicationUnresolved(String),
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeadingTimeout => f.write_str("primary heading never appeared"),
            Self::StepFailed { step, message } => write!(f, "{step} failed: {message}"),
            Self::StabilizationTimeout { last_count } => {
                write!(f, "equipment count not stable (last count {last_count})")
            }
            Self::EquipmentExtraction(msg) => write!(f, "equipment extraction failed: {msg}"),
            Self::FieldMissing { field } => write!(f, "field '{field}' not found"),
            Self::PublicationUnresolved(text) => {
                write!(f, "publication time '{text}' not resolvable")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.avito.ma").unwrap()
    }

    #[test]
    fn record_id_roundtrip() {
        let id = RecordId::new();
        let parsed: RecordId = id.to_string().parse().expect("parse RecordId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn link_strips_query_and_resolves() {
        let link = ListingLink::resolve(&base(), "/fr/maroc/a_12345.htm?x=1").unwrap();
        assert_eq!(link.as_str(), "https://www.avito.ma/fr/maroc/a_12345.htm");

        let absolute =
            ListingLink::resolve(&base(), "https://www.avito.ma/fr/rabat/villa_987.htm#photos")
                .unwrap();
        assert_eq!(absolute.as_str(), "https://www.avito.ma/fr/rabat/villa_987.htm");
    }

    #[test]
    fn link_rejects_non_detail_targets() {
        assert!(ListingLink::resolve(&base(), "/fr/maroc/other").is_none());
        assert!(ListingLink::resolve(&base(), "/fr/maroc/a_12345.html").is_none());
        assert!(ListingLink::resolve(&base(), "/fr/maroc/a_.htm").is_none());
        assert!(ListingLink::resolve(&base(), "mailto:x_1.htm").is_none());
    }

    #[test]
    fn empty_record_has_fixed_shape() {
        let record = ListingRecord::empty("https://www.avito.ma/fr/maroc/a_1.htm");
        let row = record.to_row();
        assert_eq!(row.len(), RECORD_COLUMNS.len());
        assert_eq!(row[1], "https://www.avito.ma/fr/maroc/a_1.htm");
        assert_eq!(row[2], "");
        assert_eq!(row[9], "[]");
        assert_eq!(row[10], "{}");
    }

    #[test]
    fn row_keeps_non_ascii_in_json() {
        let mut record = ListingRecord::empty("https://www.avito.ma/fr/maroc/a_2.htm");
        record.equipments = vec!["Ascenseur".into(), "Sécurité".into()];
        record
            .properties
            .insert("Surface habitable".into(), "120 m²".into());

        let row = record.to_row();
        assert_eq!(row[11], r#"["Ascenseur","Sécurité"]"#);
        assert_eq!(row[10], r#"{"Surface habitable":"120 m²"}"#);
    }
}
