//! Canonical listing URLs.
//!
//! Two listings are the same item when their canonical URLs are equal.
//! Marketplaces decorate listing links with session and tracking
//! parameters that differ between a local and a national results page, so
//! those are stripped before comparison.

use url::Url;

/// Query parameters that never identify a listing.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "ref",
    // eBay
    "hash",
    "amdata",
    "var",
    // Amazon
    "qid",
    "sr",
    "crid",
    "sprefix",
    "dib",
    "dib_tag",
    "th",
    "psc",
    // Vinted
    "referrer",
    "homepage_session_id",
    "search_id",
    // Facebook
    "tracking",
    "referral_code",
    "referral_surface",
];

/// Parameter prefixes that never identify a listing.
const TRACKING_PREFIXES: &[&str] = &["utm_", "_trk", "pf_rd_", "ref_"];

fn is_tracking(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str())
        || TRACKING_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

/// Canonical form of a listing URL.
///
/// 1. Lowercase scheme and host (the path keeps its case).
/// 2. Drop the default port and the fragment.
/// 3. Strip tracking parameters, sort the rest by key then value.
/// 4. Drop a trailing slash unless the path is `/`.
///
/// Input that does not parse as an absolute URL is only trimmed.
///
/// ```
/// use bazaar_engine::orchestrator::url_normalize::canonical_url;
///
/// let a = canonical_url("https://www.EBAY.fr/itm/1111/?_trksid=p123&hash=x#photos");
/// assert_eq!(a, "https://www.ebay.fr/itm/1111");
/// ```
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_owned();
    };

    url.set_fragment(None);
    if matches!((url.scheme(), url.port()), ("http", Some(80)) | ("https", Some(443))) {
        let _ = url.set_port(None);
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();
    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&params);
    }

    let path = url.path().to_owned();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    url.to_string()
}
