//! Listing deduplication by canonical URL.
//!
//! Two rules are applied at different stages of aggregation:
//!
//! - within one keyword variant, a local listing shadows the national
//!   listing with the same canonical URL ([`merge_local_national`]);
//! - across variants and across sites, the first occurrence of a canonical
//!   URL wins ([`first_wins`]).
//!
//! A listing without a URL has no identity and never collides.

use std::collections::HashSet;

use crate::types::ResultItem;

use super::url_normalize::canonical_url;

/// Set of canonical URLs already seen.
#[derive(Debug, Default)]
pub struct SeenUrls {
    urls: HashSet<String>,
}

impl SeenUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `item`'s URL. Returns `false` if it was already seen.
    pub fn insert(&mut self, item: &ResultItem) -> bool {
        match identity(item) {
            Some(key) => self.urls.insert(key),
            None => true,
        }
    }

    pub fn contains(&self, item: &ResultItem) -> bool {
        identity(item).is_some_and(|key| self.urls.contains(&key))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

fn identity(item: &ResultItem) -> Option<String> {
    let key = canonical_url(&item.url);
    (!key.is_empty()).then_some(key)
}

/// Merge the local and national lists of one variant.
///
/// Locals are kept in order, all of them, each flagged
/// [`ResultItem::FLAG_LOCAL`]. A national listing is dropped when a local
/// listing has the same canonical URL.
pub fn merge_local_national(
    locals: Vec<ResultItem>,
    nationals: Vec<ResultItem>,
) -> Vec<ResultItem> {
    let mut seen = SeenUrls::new();
    let mut merged = Vec::with_capacity(locals.len() + nationals.len());

    for mut item in locals {
        seen.insert(&item);
        item.add_flag(ResultItem::FLAG_LOCAL);
        merged.push(item);
    }
    merged.extend(nationals.into_iter().filter(|item| !seen.contains(item)));
    merged
}

/// Concatenate `lists` in order, keeping the first listing per canonical URL.
pub fn first_wins<I>(lists: I) -> Vec<ResultItem>
where
    I: IntoIterator<Item = Vec<ResultItem>>,
{
    let mut seen = SeenUrls::new();
    lists
        .into_iter()
        .flatten()
        .filter(|item| seen.insert(item))
        .collect()
}
