//! Record extraction from rendered detail pages.
//!
//! Turns the page source captured by the browser into a [`ListingRecord`].
//! Every field is looked up independently by a rule from [`RuleSet`]; a
//! field whose markup is missing keeps its empty default and is reported
//! as a [`Degradation::FieldMissing`] instead of failing the page.

pub mod published;
pub mod rules;
pub mod text;

use std::sync::LazyLock;

use chrono::{Local, NaiveDateTime};
use listingscout_shared::{Degradation, ListingRecord, Result, SelectorsConfig};
use scraper::Html;
use tracing::{debug, instrument, trace};

pub use published::{PublicationTime, resolve_publication_time, resolve_publication_time_now};
pub use rules::RuleSet;
pub use text::normalize;

static DEFAULT_EXTRACTOR: LazyLock<RecordExtractor> = LazyLock::new(|| {
    RecordExtractor::from_config(&SelectorsConfig::default()).expect("default selector rules")
});

/// A record plus the fields that fell back to their defaults.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub record: ListingRecord,
    pub degradations: Vec<Degradation>,
}

/// Applies a [`RuleSet`] to page sources.
#[derive(Debug)]
pub struct RecordExtractor {
    rules: RuleSet,
}

impl RecordExtractor {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Build an extractor from the `[selectors]` config section.
    pub fn from_config(selectors: &SelectorsConfig) -> Result<Self> {
        Ok(Self::new(RuleSet::from_config(selectors)?))
    }

    /// Extract a record, resolving relative publication times against the local clock.
    pub fn extract(&self, html: &str, equipments: Vec<String>, url: &str) -> Extracted {
        self.extract_at(html, equipments, url, Local::now().naive_local())
    }

    /// Extract a record with an explicit reference time.
    #[instrument(skip_all, fields(url = %url))]
    pub fn extract_at(
        &self,
        html: &str,
        equipments: Vec<String>,
        url: &str,
        now: NaiveDateTime,
    ) -> Extracted {
        let document = Html::parse_document(html);
        let mut record = ListingRecord::empty(url);
        let mut degradations = Vec::new();

        let mut text_field = |field: &'static str, rule: &dyn rules::TextRule| -> String {
            match rule.text(&document) {
                Some(value) if !value.is_empty() => value,
                _ => {
                    trace!(rule = rule.name(), field, "rule matched nothing");
                    degradations.push(Degradation::FieldMissing { field });
                    String::new()
                }
            }
        };

        record.title = text_field("title", self.rules.title.as_ref());
        record.price = text_field("price", self.rules.price.as_ref());
        record.location = text_field("location", self.rules.location.as_ref());
        record.seller = text_field("seller", self.rules.seller.as_ref());
        record.category = text_field("category", self.rules.category.as_ref());
        record.description = text_field("description", self.rules.description.as_ref());

        match published::resolve(&document, now) {
            PublicationTime::Resolved(value) => record.publication_time = value,
            PublicationTime::Unresolved(text) => {
                degradations.push(Degradation::PublicationUnresolved(text.clone()));
                record.publication_time = text;
            }
            PublicationTime::Absent => {
                degradations.push(Degradation::FieldMissing {
                    field: "publication_time",
                });
            }
        }

        record.breadcrumb = self.rules.breadcrumb.extract(&document);
        if record.breadcrumb.is_empty() {
            degradations.push(Degradation::FieldMissing { field: "breadcrumb" });
        }
        record.properties = self.rules.properties.extract(&document);
        if record.properties.is_empty() {
            degradations.push(Degradation::FieldMissing { field: "properties" });
        }
        record.images = self.rules.images.extract(&document);
        if record.images.is_empty() {
            degradations.push(Degradation::FieldMissing { field: "images" });
        }
        record.equipments = equipments;

        debug!(
            title = %record.title,
            price = %record.price,
            properties = record.properties.len(),
            images = record.images.len(),
            equipments = record.equipments.len(),
            missing = degradations.len(),
            "record extracted"
        );

        Extracted {
            record,
            degradations,
        }
    }
}

/// Extract a record with the default selector rules.
pub fn extract_record(html: &str, equipments: Vec<String>, url: &str) -> ListingRecord {
    DEFAULT_EXTRACTOR.extract(html, equipments, url).record
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const URL: &str = "https://www.avito.ma/fr/casablanca/appartements/appartement_55123.htm";

    const DETAIL_PAGE: &str = r#"
<html><body>
  <ol>
    <li><svg></svg>Home Icon</li>
    <li>Immobilier</li>
    <li>Appartements</li>
  </ol>
  <h1> Appartement  à vendre
       Maarif </h1>
  <p class="sc-16573058-12 ezLmNw">1 350 000 DH</p>
  <span class="sc-16573058-17 cLQBqT">Casablanca, Maarif</span>
  <time datetime="2024-01-15T10:30:00Z">il y a 2 semaines</time>
  <p data-testid="SellerName">Agence Atlas</p>
  <div><span>Catégorie</span><span>Appartements, à vendre</span></div>
  <div class="sc-9bb253d7-0 hTcLyo">Bel appartement
      lumineux.</div>
  <div class="sc-cd1c365e-1"><span class="fjZBup">120 m²</span><span class="bXFCIH">Surface habitable</span></div>
  <div class="sc-cd1c365e-1"><span class="fjZBup">3</span><span class="bXFCIH">Chambres</span></div>
  <img src="https://content.avito.ma/classifieds/images/10.jpg">
  <img src="https://content.avito.ma/classifieds/images/10.jpg">
  <img src="https://content.avito.ma/classifieds/images/99.jpg?t=card">
</body></html>
"#;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn extractor() -> RecordExtractor {
        RecordExtractor::from_config(&SelectorsConfig::default()).unwrap()
    }

    #[test]
    fn extracts_every_field() {
        let equipments = vec!["Ascenseur".to_string(), "Balcon".to_string()];
        let out = extractor().extract_at(DETAIL_PAGE, equipments.clone(), URL, now());
        let r = out.record;

        assert_eq!(r.url, URL);
        assert_eq!(r.title, "Appartement à vendre Maarif");
        assert_eq!(r.price, "1 350 000 DH");
        assert_eq!(r.location, "Casablanca, Maarif");
        assert_eq!(r.publication_time, "2024-01-15 10:30:00");
        assert_eq!(r.seller, "Agence Atlas");
        assert_eq!(r.category, "Appartements, à vendre");
        assert_eq!(r.description, "Bel appartement lumineux.");
        assert_eq!(r.breadcrumb, vec!["Immobilier", "Appartements"]);
        assert_eq!(r.properties.len(), 2);
        assert_eq!(r.properties["Chambres"], "3");
        assert_eq!(r.properties["Surface habitable"], "120 m²");
        assert_eq!(r.equipments, equipments);
        assert_eq!(
            r.images,
            vec!["https://content.avito.ma/classifieds/images/10.jpg"]
        );
        assert!(out.degradations.is_empty(), "{:?}", out.degradations);
    }

    #[test]
    fn markerless_document_yields_empty_record() {
        let out = extractor().extract_at("<html><body><p>nothing</p></body></html>", vec![], URL, now());
        let r = &out.record;

        assert_eq!(r.url, URL);
        assert!(!r.id.to_string().is_empty());
        for value in [
            &r.title,
            &r.price,
            &r.location,
            &r.publication_time,
            &r.seller,
            &r.category,
            &r.description,
        ] {
            assert!(value.is_empty());
        }
        assert!(r.breadcrumb.is_empty());
        assert!(r.properties.is_empty());
        assert!(r.equipments.is_empty());
        assert!(r.images.is_empty());
        assert!(
            out.degradations
                .contains(&Degradation::FieldMissing { field: "price" })
        );
        assert_eq!(out.degradations.len(), 10);
    }

    #[test]
    fn unresolved_publication_keeps_text() {
        let out = extractor().extract_at("<time>Hier</time>", vec![], URL, now());
        assert_eq!(out.record.publication_time, "hier");
        assert!(
            out.degradations
                .contains(&Degradation::PublicationUnresolved("hier".into()))
        );
    }

    #[test]
    fn each_record_gets_a_fresh_id() {
        let a = extract_record(DETAIL_PAGE, vec![], URL);
        let b = extract_record(DETAIL_PAGE, vec![], URL);
        assert_ne!(a.id, b.id);
        assert_eq!(a.title, b.title);
    }
}
