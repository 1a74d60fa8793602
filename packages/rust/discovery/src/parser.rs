//! Anchor scanning for listing index pages.

use std::sync::LazyLock;

use listingscout_shared::ListingLink;
use scraper::{Html, Selector};
use url::Url;

static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// Every detail-page link on `html`, in document order, resolved against `base`.
///
/// Duplicates are kept; the caller owns deduplication across pages.
pub fn extract_listing_links(html: &str, base: &Url) -> Vec<ListingLink> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SEL)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| ListingLink::resolve(base, href))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_detail_links_in_order() {
        let html = r##"
            <html><body>
              <a href="/fr/maroc/appartement_12345.htm?x=1">A</a>
              <a href="/fr/maroc/appartement_12345.htm">A again</a>
              <a href="/fr/maroc/other">Category</a>
              <a href="https://www.avito.ma/fr/rabat/villa_777.htm#top">B</a>
              <a href="#">Anchor</a>
              <a>no href</a>
            </body></html>
        "##;
        let base = Url::parse("https://www.avito.ma").unwrap();
        let links: Vec<String> = extract_listing_links(html, &base)
            .into_iter()
            .map(|l| l.to_string())
            .collect();

        assert_eq!(
            links,
            vec![
                "https://www.avito.ma/fr/maroc/appartement_12345.htm",
                "https://www.avito.ma/fr/maroc/appartement_12345.htm",
                "https://www.avito.ma/fr/rabat/villa_777.htm",
            ]
        );
    }

    #[test]
    fn empty_page_yields_nothing() {
        let base = Url::parse("https://www.avito.ma").unwrap();
        assert!(extract_listing_links("<html></html>", &base).is_empty());
    }
}
