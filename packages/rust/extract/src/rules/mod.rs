//! Named, swappable field rules.
//!
//! The detail page's class names are generated hashes that change between
//! site deployments. Each volatile lookup is therefore a small rule value
//! built from [`SelectorsConfig`], so a marker can be replaced without
//! touching the extraction flow.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use indexmap::IndexSet;
use listingscout_shared::{ListingScoutError, Result, SelectorsConfig};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use crate::text::{fold, normalize};

static SPAN_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span").expect("span selector"));
static OL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("ol").expect("ol selector"));
static LI_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").expect("li selector"));
static IMG_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("img selector"));
static DIV_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div").expect("div selector"));

// ---------------------------------------------------------------------------
// Single-value rules
// ---------------------------------------------------------------------------

/// Locates the element holding one scalar field.
pub trait TextRule: Send + Sync + fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// The element whose text is the field value, if present.
    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>>;

    /// Normalized text of the located element.
    fn text(&self, document: &Html) -> Option<String> {
        self.locate(document).map(|el| element_text(&el))
    }
}

/// First element matching a CSS selector.
#[derive(Debug)]
pub struct SelectorRule {
    name: String,
    selector: Selector,
}

impl SelectorRule {
    pub fn new(name: impl Into<String>, css: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            selector: parse_selector(css)?,
        })
    }
}

impl TextRule for SelectorRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        document.select(&self.selector).next()
    }
}

/// First `tag` element carrying a class that matches `pattern`.
#[derive(Debug)]
pub struct ClassPatternRule {
    name: String,
    tag: Selector,
    class: Regex,
}

impl ClassPatternRule {
    pub fn new(name: impl Into<String>, tag: &str, pattern: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            tag: parse_selector(tag)?,
            class: parse_regex(pattern)?,
        })
    }
}

impl TextRule for ClassPatternRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        document
            .select(&self.tag)
            .find(|el| has_class_matching(el, &self.class))
    }
}

/// The `span` that follows a label `span`.
///
/// The label is the first `span` whose sole text (see [`sole_text`]) matches
/// `label` once folded. Its value is the next `span` in document order,
/// wherever it is nested.
#[derive(Debug)]
pub struct LabelFollowingRule {
    name: String,
    label: Regex,
}

impl LabelFollowingRule {
    pub fn new(name: impl Into<String>, label_pattern: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            label: parse_regex(label_pattern)?,
        })
    }
}

impl TextRule for LabelFollowingRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        let spans: Vec<ElementRef<'a>> = document.select(&SPAN_SEL).collect();
        let pos = spans.iter().position(|span| {
            sole_text(span).is_some_and(|text| self.label.is_match(&fold(&normalize(text))))
        })?;
        spans.get(pos + 1).copied()
    }
}

// ---------------------------------------------------------------------------
// Multi-value rules
// ---------------------------------------------------------------------------

/// Labels of the first ordered list, minus the home-icon placeholder.
#[derive(Debug, Clone)]
pub struct BreadcrumbRule {
    pub icon_text: String,
}

impl BreadcrumbRule {
    pub fn extract(&self, document: &Html) -> Vec<String> {
        let Some(ol) = document.select(&OL_SEL).next() else {
            return Vec::new();
        };
        ol.select(&LI_SEL)
            .map(|li| {
                let text = element_text(&li);
                if self.icon_text.is_empty() {
                    text
                } else {
                    normalize(text.replace(&self.icon_text, "").as_str())
                }
            })
            .filter(|text| !text.is_empty())
            .collect()
    }
}

/// Label/value pairs from the property blocks.
#[derive(Debug, Clone)]
pub struct PropertyRule {
    block: Regex,
    label: Regex,
    value: Regex,
}

impl PropertyRule {
    pub fn new(block: &str, label: &str, value: &str) -> Result<Self> {
        Ok(Self {
            block: parse_regex(block)?,
            label: parse_regex(label)?,
            value: parse_regex(value)?,
        })
    }

    /// Blocks missing either half are skipped; a repeated label keeps the last value.
    pub fn extract(&self, document: &Html) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();
        for block in document
            .select(&DIV_SEL)
            .filter(|div| has_class_matching(div, &self.block))
        {
            let find = |re: &Regex| block.select(&SPAN_SEL).find(|s| has_class_matching(s, re));
            if let (Some(label), Some(value)) = (find(&self.label), find(&self.value)) {
                properties.insert(element_text(&label), element_text(&value));
            }
        }
        properties
    }
}

/// Listing photo URLs, thumbnails of other listings excluded.
#[derive(Debug, Clone)]
pub struct ImageRule {
    pub host_marker: String,
    pub thumbnail_marker: String,
}

impl ImageRule {
    pub fn extract(&self, document: &Html) -> Vec<String> {
        let mut images = IndexSet::new();
        for src in document
            .select(&IMG_SEL)
            .filter_map(|img| img.value().attr("src"))
        {
            if !src.contains(&self.host_marker) {
                continue;
            }
            if !self.thumbnail_marker.is_empty() && src.contains(&self.thumbnail_marker) {
                continue;
            }
            images.insert(src.to_string());
        }
        images.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// Every rule the record extractor applies, one per field.
#[derive(Debug)]
pub struct RuleSet {
    pub title: Box<dyn TextRule>,
    pub price: Box<dyn TextRule>,
    pub location: Box<dyn TextRule>,
    pub seller: Box<dyn TextRule>,
    pub category: Box<dyn TextRule>,
    pub description: Box<dyn TextRule>,
    pub breadcrumb: BreadcrumbRule,
    pub properties: PropertyRule,
    pub images: ImageRule,
}

impl RuleSet {
    /// Build the rule set from configured markers.
    pub fn from_config(selectors: &SelectorsConfig) -> Result<Self> {
        let seller_css = format!(r#"[data-testid="{}"]"#, selectors.seller_test_id);

        Ok(Self {
            title: Box::new(SelectorRule::new("title", "h1")?),
            price: Box::new(ClassPatternRule::new("price", "p", &selectors.price_class)?),
            location: Box::new(ClassPatternRule::new(
                "location",
                "span",
                &selectors.location_class,
            )?),
            seller: Box::new(SelectorRule::new("seller", &seller_css)?),
            category: Box::new(LabelFollowingRule::new(
                "category",
                &selectors.category_label,
            )?),
            description: Box::new(ClassPatternRule::new(
                "description",
                "div",
                &selectors.description_class,
            )?),
            breadcrumb: BreadcrumbRule {
                icon_text: selectors.breadcrumb_icon_text.clone(),
            },
            properties: PropertyRule::new(
                &selectors.property_block_class,
                &selectors.property_label_class,
                &selectors.property_value_class,
            )?,
            images: ImageRule {
                host_marker: selectors.image_host_marker.clone(),
                thumbnail_marker: selectors.thumbnail_marker.clone(),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn element_text(el: &ElementRef<'_>) -> String {
    normalize(el.text().collect::<String>().as_str())
}

fn has_class_matching(el: &ElementRef<'_>, pattern: &Regex) -> bool {
    el.value().classes().any(|class| pattern.is_match(class))
}

/// The text of an element holding exactly one child, descending through
/// single-child elements. `None` when any level has several children.
fn sole_text<'a>(el: &ElementRef<'a>) -> Option<&'a str> {
    let mut node = **el;
    loop {
        let mut children = node.children();
        let child = children.next()?;
        if children.next().is_some() {
            return None;
        }
        match child.value() {
            Node::Text(text) => return Some(&**text),
            Node::Element(_) => node = child,
            _ => return None,
        }
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| ListingScoutError::validation(format!("invalid selector '{css}': {e}")))
}

fn parse_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| ListingScoutError::validation(format!("invalid pattern '{pattern}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::from_config(&SelectorsConfig::default()).expect("default rules")
    }

    #[test]
    fn class_pattern_matches_hashed_classes() {
        let doc = Html::parse_document(
            r#"<p class="other">no</p><p class="sc-16573058-12 kXyZ">1 200 000 DH</p>"#,
        );
        assert_eq!(rules().price.text(&doc).as_deref(), Some("1 200 000 DH"));
    }

    #[test]
    fn category_takes_next_sibling_span() {
        let doc = Html::parse_document(
            r#"<div><span>Catégorie</span><span>Appartements</span></div>"#,
        );
        assert_eq!(rules().category.text(&doc).as_deref(), Some("Appartements"));
    }

    #[test]
    fn category_takes_next_span_in_document() {
        let doc = Html::parse_document(
            r#"<div><span>CATEGORIE</span></div><div><span>Villas</span></div>"#,
        );
        assert_eq!(rules().category.text(&doc).as_deref(), Some("Villas"));
    }

    #[test]
    fn category_prefers_nested_span_over_later_sibling() {
        let doc = Html::parse_document(
            r#"<div><span>Catégorie</span><div><span>Appartements</span></div><span>Rabat</span></div>"#,
        );
        assert_eq!(rules().category.text(&doc).as_deref(), Some("Appartements"));
    }

    #[test]
    fn category_label_may_wrap_a_single_element() {
        let doc = Html::parse_document(
            r#"<div><span><b>Catégorie</b></span><span>Villas</span></div>"#,
        );
        assert_eq!(rules().category.text(&doc).as_deref(), Some("Villas"));
    }

    #[test]
    fn category_label_with_mixed_content_is_ignored() {
        let doc = Html::parse_document(
            r#"<div><span>Catégorie <b>du bien</b></span><span>Nope</span></div>"#,
        );
        assert_eq!(rules().category.text(&doc), None);
    }

    #[test]
    fn breadcrumb_drops_icon_and_empty_items() {
        let doc = Html::parse_document(
            r#"<ol><li>Home Icon</li><li> Immobilier </li><li></li><li>Casablanca</li></ol>
               <ol><li>Other list</li></ol>"#,
        );
        assert_eq!(
            rules().breadcrumb.extract(&doc),
            vec!["Immobilier".to_string(), "Casablanca".to_string()]
        );
    }

    #[test]
    fn properties_skip_incomplete_and_keep_last_duplicate() {
        let doc = Html::parse_document(
            r#"
            <div class="sc-cd1c365e-1"><span class="bXFCIH">Chambres</span><span class="fjZBup">2</span></div>
            <div class="sc-cd1c365e-1"><span class="bXFCIH">Étage</span></div>
            <div class="sc-cd1c365e-1"><span class="fjZBup">3</span><span class="bXFCIH">Chambres</span></div>
            "#,
        );
        let props = rules().properties.extract(&doc);
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("Chambres").map(String::as_str), Some("3"));
    }

    #[test]
    fn images_filter_host_thumbnails_and_duplicates() {
        let doc = Html::parse_document(
            r#"
            <img src="https://content.avito.ma/classifieds/images/1.jpg">
            <img src="https://content.avito.ma/classifieds/images/2.jpg?t=card">
            <img src="https://cdn.example.com/logo.png">
            <img src="https://content.avito.ma/classifieds/images/1.jpg">
            <img alt="no src">
            "#,
        );
        assert_eq!(
            rules().images.extract(&doc),
            vec!["https://content.avito.ma/classifieds/images/1.jpg".to_string()]
        );
    }

    #[test]
    fn invalid_marker_is_rejected() {
        let selectors = SelectorsConfig {
            price_class: "sc-(".into(),
            ..SelectorsConfig::default()
        };
        let err = RuleSet::from_config(&selectors).unwrap_err();
        assert!(matches!(err, ListingScoutError::Validation { .. }));
    }
}
