//! Merge finished jobs into one ranked, deduplicated response.
//!
//! # Pipeline
//!
//! 1. Group outcomes by site, then variant, then geographic mode.
//! 2. Per variant: locals flagged and kept, nationals shadowed by a local
//!    with the same canonical URL dropped.
//! 3. Per site: variants concatenated in order, first canonical URL wins.
//! 4. Reference prices taken from the reference site's merged list.
//! 5. Sites concatenated in plan order, first canonical URL wins, then a
//!    stable sort by descending score.

use std::collections::BTreeMap;

use crate::config::REFERENCE_PRICE_COUNT;
use crate::error::SearchError;
use crate::types::{AggregatedResponse, GeoMode, ResultItem, Site};

use super::dedup::{first_wins, merge_local_national};
use super::job::JobOutcome;

#[derive(Default)]
struct VariantLists {
    local: Option<Vec<ResultItem>>,
    national: Option<Vec<ResultItem>>,
}

/// Aggregate `outcomes` (in plan order) into the final response.
///
/// # Errors
///
/// Returns [`SearchError::Aggregation`] if two outcomes claim the same
/// site, variant and geographic mode.
pub fn aggregate(outcomes: Vec<JobOutcome>) -> Result<AggregatedResponse, SearchError> {
    let mut site_order: Vec<Site> = Vec::new();
    let mut grouped: BTreeMap<(usize, usize), VariantLists> = BTreeMap::new();

    for outcome in outcomes {
        let site = outcome.spec.site;
        let position = match site_order.iter().position(|s| *s == site) {
            Some(position) => position,
            None => {
                site_order.push(site);
                site_order.len() - 1
            }
        };
        let variant = outcome.spec.variant;
        let mode = outcome.spec.mode();
        let id = outcome.spec.id;

        let lists = grouped.entry((position, variant)).or_default();
        let slot = match mode {
            GeoMode::Local => &mut lists.local,
            GeoMode::National => &mut lists.national,
        };
        if slot.is_some() {
            return Err(SearchError::Aggregation(format!(
                "{id} duplicates the {mode} job of {} variant {variant}",
                site.name()
            )));
        }
        *slot = Some(outcome.into_items());
    }

    let mut per_site: Vec<Vec<Vec<ResultItem>>> = vec![Vec::new(); site_order.len()];
    for ((position, _variant), lists) in grouped {
        per_site[position].push(merge_local_national(
            lists.local.unwrap_or_default(),
            lists.national.unwrap_or_default(),
        ));
    }

    let mut site_lists: Vec<Vec<ResultItem>> = Vec::with_capacity(site_order.len());
    let mut completed_sites = Vec::new();
    let mut reference_price_items = Vec::new();
    for (site, variants) in site_order.iter().zip(per_site) {
        let merged = first_wins(variants);
        if !merged.is_empty() {
            completed_sites.push(site.key().to_owned());
        }
        if site.is_reference() {
            reference_price_items = reference_prices(&merged);
        }
        site_lists.push(merged);
    }

    let mut results = first_wins(site_lists);
    results.sort_by(|a, b| b.score.total_cmp(&a.score));

    tracing::debug!(
        results = results.len(),
        completed = completed_sites.len(),
        reference = reference_price_items.len(),
        "aggregation finished"
    );
    Ok(AggregatedResponse {
        results,
        reference_price_items,
        completed_sites,
    })
}

/// Cheapest strictly-priced listings, ascending.
pub fn reference_prices(items: &[ResultItem]) -> Vec<ResultItem> {
    let mut priced: Vec<ResultItem> = items
        .iter()
        .filter(|item| item.price > 0.0)
        .cloned()
        .collect();
    priced.sort_by(|a, b| a.price.total_cmp(&b.price));
    priced.truncate(REFERENCE_PRICE_COUNT);
    priced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::job::JobState;
    use crate::orchestrator::planner::JobSpec;
    use crate::types::{GeoScope, JobId};

    fn item(title: &str, url: &str, score: f64, price: f64) -> ResultItem {
        ResultItem {
            title: title.into(),
            url: url.into(),
            score,
            price,
            ..ResultItem::default()
        }
    }

    fn outcome(site: Site, variant: usize, mode: GeoMode, items: Vec<ResultItem>) -> JobOutcome {
        let scope = match mode {
            GeoMode::Local => GeoScope::Local {
                lat: 48.85,
                lng: 2.35,
                radius_km: 30,
                label: "Paris".into(),
            },
            GeoMode::National => GeoScope::National {
                shippable_only: false,
            },
        };
        JobOutcome {
            spec: JobSpec {
                id: JobId(variant as u64),
                site,
                variant,
                keyword: "k".into(),
                scope,
                target_url: String::new(),
                active: true,
            },
            state: JobState::Resolved(items),
        }
    }

    fn titles(items: &[ResultItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    #[test]
    fn geo_scenario_keeps_locals_and_drops_shadowed_nationals() {
        let url = |n: &str| format!("https://www.leboncoin.fr/ad/{n}");
        let locals = ["A", "B", "C"].map(|n| item(n, &url(n), 1.0, 10.0)).to_vec();
        let nationals = ["A", "B", "D", "E"].map(|n| item(n, &url(n), 1.0, 10.0)).to_vec();

        let response = aggregate(vec![
            outcome(Site::Leboncoin, 0, GeoMode::Local, locals),
            outcome(Site::Leboncoin, 0, GeoMode::National, nationals),
        ])
        .expect("aggregate");

        assert_eq!(titles(&response.results), vec!["A", "B", "C", "D", "E"]);
        let local: Vec<&str> = response
            .results
            .iter()
            .filter(|i| i.has_flag(ResultItem::FLAG_LOCAL))
            .map(|i| i.title.as_str())
            .collect();
        assert_eq!(local, vec!["A", "B", "C"]);
        assert_eq!(response.completed_sites, vec!["leboncoin"]);
    }

    #[test]
    fn first_variant_wins_within_site() {
        let response = aggregate(vec![
            outcome(Site::Vinted, 0, GeoMode::National, vec![item("v0", "https://www.vinted.fr/items/1", 1.0, 0.0)]),
            outcome(Site::Vinted, 1, GeoMode::National, vec![
                item("v1 dup", "https://www.vinted.fr/items/1?referrer=x", 5.0, 0.0),
                item("v1", "https://www.vinted.fr/items/2", 2.0, 0.0),
            ]),
        ])
        .expect("aggregate");
        assert_eq!(titles(&response.results), vec!["v1", "v0"]);
    }

    #[test]
    fn results_sorted_by_score_stably() {
        let response = aggregate(vec![
            outcome(Site::Ebay, 0, GeoMode::National, vec![
                item("low", "https://www.ebay.fr/itm/1", 0.1, 0.0),
                item("tie-1", "https://www.ebay.fr/itm/2", 0.5, 0.0),
            ]),
            outcome(Site::Vinted, 0, GeoMode::National, vec![
                item("tie-2", "https://www.vinted.fr/items/3", 0.5, 0.0),
                item("high", "https://www.vinted.fr/items/4", 0.9, 0.0),
            ]),
        ])
        .expect("aggregate");
        assert_eq!(titles(&response.results), vec!["high", "tie-1", "tie-2", "low"]);
        assert_eq!(response.completed_sites, vec!["ebay", "vinted"]);
    }

    #[test]
    fn reference_prices_cheapest_five_positive() {
        let prices = [0.0, 120.0, 15.0, -3.0, 99.0, 42.0, 7.5, 300.0];
        let items: Vec<ResultItem> = prices
            .iter()
            .enumerate()
            .map(|(n, p)| item(&n.to_string(), &format!("https://www.amazon.fr/dp/{n}"), 0.0, *p))
            .collect();

        let response =
            aggregate(vec![outcome(Site::Amazon, 0, GeoMode::National, items)]).expect("aggregate");

        let got: Vec<f64> = response.reference_price_items.iter().map(|i| i.price).collect();
        assert_eq!(got, vec![7.5, 15.0, 42.0, 99.0, 120.0]);
        assert_eq!(response.results.len(), prices.len());
    }

    #[test]
    fn failed_and_empty_sites_not_completed() {
        let mut failed = outcome(Site::Ebay, 0, GeoMode::National, vec![]);
        failed.state = JobState::Failed(SearchError::Timeout("ebay".into()));
        let response = aggregate(vec![
            failed,
            outcome(Site::Vinted, 0, GeoMode::National, vec![]),
            outcome(Site::Amazon, 0, GeoMode::National, vec![item("x", "https://www.amazon.fr/dp/1", 0.0, 10.0)]),
        ])
        .expect("aggregate");
        assert_eq!(response.completed_sites, vec!["amazon"]);
    }

    #[test]
    fn duplicate_outcome_is_aggregation_error() {
        let err = aggregate(vec![
            outcome(Site::Ebay, 0, GeoMode::National, vec![]),
            outcome(Site::Ebay, 0, GeoMode::National, vec![]),
        ])
        .unwrap_err();
        assert!(matches!(err, SearchError::Aggregation(_)));
    }

    #[test]
    fn cross_site_duplicate_keeps_first_site() {
        let shared = "https://www.facebook.com/marketplace/item/5";
        let response = aggregate(vec![
            outcome(Site::Ebay, 0, GeoMode::National, vec![item("ebay", shared, 0.1, 0.0)]),
            outcome(Site::FacebookMarketplace, 0, GeoMode::National, vec![item("fb", shared, 0.9, 0.0)]),
        ])
        .expect("aggregate");
        assert_eq!(titles(&response.results), vec!["ebay"]);
    }
}
