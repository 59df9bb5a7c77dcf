//! CSS-selector extractor for marketplace result grids.
//!
//! Each site has a set of selectors: a container per listing, plus title,
//! price, link, image and location selectors evaluated inside it. The
//! built-in selectors can be overridden per site from configuration.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SearchError;
use crate::types::{ResultItem, Site};

use super::Extractor;

/// Selectors for one site. An empty `link` selector means the listing
/// container itself is the anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub item: String,
    pub title: String,
    pub price: String,
    pub link: String,
    pub image: String,
    pub location: Option<String>,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            item: "article".into(),
            title: "h2, h3".into(),
            price: "[class*=price]".into(),
            link: "a".into(),
            image: "img".into(),
            location: None,
        }
    }
}

impl SiteSelectors {
    /// Built-in selectors for `site`.
    pub fn builtin(site: Site) -> Self {
        match site {
            Site::Leboncoin => Self {
                item: r#"[data-qa-id="aditem_container"]"#.into(),
                title: r#"[data-qa-id="aditem_title"]"#.into(),
                price: r#"[data-test-id="price"]"#.into(),
                link: String::new(),
                image: "img".into(),
                location: Some(r#"[data-test-id="ad-location"]"#.into()),
            },
            Site::Vinted => Self {
                item: "div.feed-grid__item".into(),
                title: r#"[data-testid$="--description-title"]"#.into(),
                price: r#"[data-testid$="--price-text"]"#.into(),
                link: "a.new-item-box__overlay".into(),
                image: "img".into(),
                location: None,
            },
            Site::Ebay => Self {
                item: "li.s-item".into(),
                title: ".s-item__title".into(),
                price: ".s-item__price".into(),
                link: "a.s-item__link".into(),
                image: ".s-item__image img".into(),
                location: Some(".s-item__location".into()),
            },
            Site::FacebookMarketplace => Self {
                item: r#"a[href*="/marketplace/item/"]"#.into(),
                title: r#"span[style*="-webkit-line-clamp"]"#.into(),
                price: r#"span[dir="auto"]"#.into(),
                link: String::new(),
                image: "img".into(),
                location: None,
            },
            Site::Amazon => Self {
                item: r#"div[data-component-type="s-search-result"]"#.into(),
                title: "h2 span".into(),
                price: "span.a-price > span.a-offscreen".into(),
                link: "h2 a, a.a-link-normal".into(),
                image: "img.s-image".into(),
                location: None,
            },
        }
    }
}

/// Extracts listings with per-site CSS selectors.
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    selectors: HashMap<Site, SiteSelectors>,
    max_items: usize,
}

impl Default for SelectorExtractor {
    fn default() -> Self {
        Self {
            selectors: Site::all()
                .iter()
                .map(|site| (*site, SiteSelectors::builtin(*site)))
                .collect(),
            max_items: 50,
        }
    }
}

impl SelectorExtractor {
    /// Replace the built-in selectors of the given sites.
    #[must_use]
    pub fn with_overrides(mut self, overrides: HashMap<Site, SiteSelectors>) -> Self {
        self.selectors.extend(overrides);
        self
    }

    /// Cap the number of listings taken from one page.
    #[must_use]
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn selectors(&self, site: Site) -> Option<&SiteSelectors> {
        self.selectors.get(&site)
    }
}

impl Extractor for SelectorExtractor {
    fn extract(
        &self,
        site: Site,
        page_url: &str,
        html: &str,
    ) -> Result<Vec<ResultItem>, SearchError> {
        let selectors = self
            .selectors
            .get(&site)
            .ok_or_else(|| SearchError::Extraction(format!("no selectors configured for {site}")))?;
        parse_listings(site, page_url, html, selectors, self.max_items)
    }
}

fn compile(raw: &str, what: &str) -> Result<Selector, SearchError> {
    Selector::parse(raw).map_err(|e| SearchError::Parse(format!("invalid {what} selector: {e:?}")))
}

/// Parse a result grid into listings.
///
/// Listings without a title or a link are skipped.
fn parse_listings(
    site: Site,
    page_url: &str,
    html: &str,
    selectors: &SiteSelectors,
    max_items: usize,
) -> Result<Vec<ResultItem>, SearchError> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();

    let item_sel = compile(&selectors.item, "item")?;
    let title_sel = compile(&selectors.title, "title")?;
    let price_sel = compile(&selectors.price, "price")?;
    let link_sel = if selectors.link.is_empty() {
        None
    } else {
        Some(compile(&selectors.link, "link")?)
    };
    let image_sel = compile(&selectors.image, "image")?;
    let location_sel = selectors
        .location
        .as_deref()
        .map(|raw| compile(raw, "location"))
        .transpose()?;

    let mut results = Vec::new();

    for element in document.select(&item_sel) {
        let Some(title) = first_text(element, &title_sel) else {
            continue;
        };

        let href = match &link_sel {
            Some(sel) => element
                .select(sel)
                .next()
                .and_then(|a| a.value().attr("href")),
            None => element.value().attr("href"),
        };
        let Some(url) = href.and_then(|h| resolve_href(base.as_ref(), h)) else {
            continue;
        };

        let price = first_text(element, &price_sel)
            .and_then(|p| parse_price(&p))
            .unwrap_or(0.0);
        let image = element.select(&image_sel).next().and_then(|img| {
            img.value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .map(str::to_owned)
        });
        let location = location_sel
            .as_ref()
            .and_then(|sel| first_text(element, sel));

        results.push(ResultItem {
            id: listing_id(site, &url, results.len()),
            title,
            price,
            site: site.key().to_owned(),
            image,
            url,
            location,
            ..ResultItem::default()
        });

        if results.len() >= max_items {
            break;
        }
    }

    tracing::debug!(%site, count = results.len(), "listings parsed");
    Ok(results)
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

fn resolve_href(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match base {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

/// Stable id derived from the last path segment of the listing URL.
fn listing_id(site: Site, url: &str, position: usize) -> String {
    let segment = Url::parse(url).ok().and_then(|u| {
        u.path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_owned))
    });
    match segment {
        Some(segment) => format!("{}-{segment}", site.key()),
        None => format!("{}-{position}", site.key()),
    }
}

/// Parse a displayed price such as `1 234,56 €`, `$12.50` or `1.234 €`.
///
/// The last `,` or `.` is a decimal separator when at most two digits
/// follow it; every other separator is a thousands separator.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match cleaned.rfind(|c: char| c == ',' || c == '.') {
        Some(idx) if cleaned.len() - idx - 1 <= 2 => {
            let int_digits: String = cleaned[..idx].chars().filter(char::is_ascii_digit).collect();
            let frac = &cleaned[idx + 1..];
            if frac.is_empty() {
                int_digits
            } else {
                format!("{int_digits}.{frac}")
            }
        }
        _ => cleaned.chars().filter(char::is_ascii_digit).collect(),
    };

    normalized.parse().ok()
}
