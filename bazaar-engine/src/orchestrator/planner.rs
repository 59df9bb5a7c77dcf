//! Expands one search request into the site jobs to run.

use tracing::debug;

use crate::config::{EngineConfig, MAX_VARIANTS};
use crate::error::SearchError;
use crate::types::{GeoMode, GeoScope, JobId, SearchCriteria, SearchRequest, Site};

/// One unit of work: one site, one keyword variant, one geographic scope.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub id: JobId,
    pub site: Site,
    /// Index of the keyword variant this job searches.
    pub variant: usize,
    pub keyword: String,
    pub scope: GeoScope,
    /// Search page the worker is pointed at. Empty for inactive jobs.
    pub target_url: String,
    /// Inactive jobs (sites the user did not ask for) are resolved empty
    /// without dispatching a worker.
    pub active: bool,
}

impl JobSpec {
    pub fn mode(&self) -> GeoMode {
        self.scope.mode()
    }
}

/// Planned jobs of one request, in execution and merge order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub variants: Vec<String>,
    pub jobs: Vec<JobSpec>,
}

impl SearchPlan {
    pub fn active_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.jobs.iter().filter(|job| job.active)
    }

    /// Sites in plan order, each once.
    pub fn sites(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = Vec::new();
        for job in &self.jobs {
            if !sites.contains(&job.site) {
                sites.push(job.site);
            }
        }
        sites
    }
}

/// Split the request into at most [`MAX_VARIANTS`] keyword variants.
///
/// The keyword string is `criteria.keywords` when non-blank, else the raw
/// query. A comma separates variants; if splitting the keywords leaves
/// nothing, the raw query is split the same way.
///
/// # Errors
///
/// Returns [`SearchError::Planning`] if neither keywords nor query yield a
/// variant.
pub fn keyword_variants(request: &SearchRequest) -> Result<Vec<String>, SearchError> {
    let query = request.query.trim();
    let keywords = request
        .criteria
        .as_ref()
        .and_then(|c| c.keywords.as_deref())
        .map(str::trim)
        .filter(|k| !k.is_empty());

    if let Some(keywords) = keywords {
        let variants = split_variants(keywords);
        if !variants.is_empty() {
            return Ok(variants);
        }
    }
    if query.is_empty() && keywords.is_none() {
        return Err(SearchError::Planning("query and keywords are both empty".into()));
    }
    let variants = split_variants(query);
    if variants.is_empty() {
        return Err(SearchError::Planning(format!(
            "no keyword left after splitting `{}`",
            keywords.unwrap_or(query)
        )));
    }
    Ok(variants)
}

fn split_variants(source: &str) -> Vec<String> {
    source
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .take(MAX_VARIANTS)
        .map(str::to_owned)
        .collect()
}

/// Builds a [`SearchPlan`] from a request.
#[derive(Debug, Clone)]
pub struct VariantPlanner {
    local_radius_km: u32,
}

impl VariantPlanner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            local_radius_km: config.local_radius_km,
        }
    }

    /// Plan every job of `request`, drawing job ids from `next_id`.
    ///
    /// Jobs are ordered by [`Site::all`], then variant, then local before
    /// national. Sites outside `criteria.sites` get a single inactive job;
    /// the reference site is always active.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Planning`] if no keyword can be derived.
    pub fn plan(
        &self,
        request: &SearchRequest,
        mut next_id: impl FnMut() -> JobId,
    ) -> Result<SearchPlan, SearchError> {
        let variants = keyword_variants(request)?;
        let default_criteria = SearchCriteria::default();
        let criteria = request.criteria.as_ref().unwrap_or(&default_criteria);
        let national = GeoScope::National {
            shippable_only: criteria.shippable.unwrap_or(false),
        };

        let mut jobs = Vec::new();
        for &site in Site::all() {
            if !is_requested(site, criteria) {
                jobs.push(JobSpec {
                    id: next_id(),
                    site,
                    variant: 0,
                    keyword: variants[0].clone(),
                    scope: national.clone(),
                    target_url: String::new(),
                    active: false,
                });
                continue;
            }

            for (variant, keyword) in variants.iter().enumerate() {
                let mut scopes = Vec::with_capacity(2);
                if let Some(location) = criteria.user_location.as_ref().filter(|_| site.supports_geo()) {
                    scopes.push(GeoScope::Local {
                        lat: location.lat,
                        lng: location.lng,
                        radius_km: self.local_radius_km,
                        label: location.label(),
                    });
                }
                scopes.push(national.clone());

                for scope in scopes {
                    let target_url = site.search_url(keyword, &scope, criteria);
                    jobs.push(JobSpec {
                        id: next_id(),
                        site,
                        variant,
                        keyword: keyword.clone(),
                        scope,
                        target_url,
                        active: true,
                    });
                }
            }
        }

        debug!(
            variants = variants.len(),
            jobs = jobs.len(),
            active = jobs.iter().filter(|j| j.active).count(),
            "search planned"
        );
        tracing::trace!(?variants, "keyword variants");
        Ok(SearchPlan { variants, jobs })
    }
}

fn is_requested(site: Site, criteria: &SearchCriteria) -> bool {
    site.is_reference()
        || criteria
            .sites
            .as_ref()
            .map_or(true, |sites| sites.contains(&site))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserLocation;

    fn counter() -> impl FnMut() -> JobId {
        let mut n = 0;
        move || {
            n += 1;
            JobId(n)
        }
    }

    fn plan(request: &SearchRequest) -> SearchPlan {
        VariantPlanner::new(&EngineConfig::default())
            .plan(request, counter())
            .expect("plan")
    }

    fn lyon() -> UserLocation {
        UserLocation {
            lat: 45.76,
            lng: 4.84,
            city: Some("Lyon".into()),
            postal_code: Some("69001".into()),
        }
    }

    #[test]
    fn keywords_override_query() {
        let request = SearchRequest::new("perceuse").with_criteria(SearchCriteria {
            keywords: Some("  visseuse  ".into()),
            ..Default::default()
        });
        assert_eq!(keyword_variants(&request).expect("variants"), vec!["visseuse"]);
    }

    #[test]
    fn blank_keywords_fall_back_to_query() {
        let request = SearchRequest::new("perceuse").with_criteria(SearchCriteria {
            keywords: Some("   ".into()),
            ..Default::default()
        });
        assert_eq!(keyword_variants(&request).expect("variants"), vec!["perceuse"]);
    }

    #[test]
    fn comma_split_capped_at_two() {
        let request = SearchRequest::new("iPhone 13, iPhone 14, iPhone 15");
        assert_eq!(
            keyword_variants(&request).expect("variants"),
            vec!["iPhone 13", "iPhone 14"]
        );
    }

    #[test]
    fn empty_split_falls_back_to_query() {
        let request = SearchRequest::new("vélo").with_criteria(SearchCriteria {
            keywords: Some(" , ,".into()),
            ..Default::default()
        });
        assert_eq!(keyword_variants(&request).expect("variants"), vec!["vélo"]);
    }

    #[test]
    fn empty_split_falls_back_to_split_query() {
        let request = SearchRequest::new("a, b").with_criteria(SearchCriteria {
            keywords: Some(" , ,".into()),
            ..Default::default()
        });
        assert_eq!(keyword_variants(&request).expect("variants"), vec!["a", "b"]);
    }

    #[test]
    fn empty_split_with_blank_query_is_planning_error() {
        let request = SearchRequest::new(" ").with_criteria(SearchCriteria {
            keywords: Some(",".into()),
            ..Default::default()
        });
        let err = keyword_variants(&request).unwrap_err();
        assert!(matches!(err, SearchError::Planning(_)));
    }

    #[test]
    fn blank_request_is_planning_error() {
        let err = keyword_variants(&SearchRequest::new("   ")).unwrap_err();
        assert!(matches!(err, SearchError::Planning(_)));
        let err = keyword_variants(&SearchRequest::new(",")).unwrap_err();
        assert!(matches!(err, SearchError::Planning(_)));
    }

    #[test]
    fn without_location_one_national_job_per_site_and_variant() {
        let plan = plan(&SearchRequest::new("a, b"));
        assert_eq!(plan.jobs.len(), Site::all().len() * 2);
        assert!(plan.jobs.iter().all(|j| j.active && j.mode() == GeoMode::National));
        assert_eq!(plan.sites(), Site::all().to_vec());
    }

    #[test]
    fn geo_sites_get_local_then_national() {
        let request = SearchRequest::new("perceuse").with_criteria(SearchCriteria {
            user_location: Some(lyon()),
            shippable: Some(true),
            ..Default::default()
        });
        let plan = plan(&request);

        let leboncoin: Vec<&JobSpec> = plan.jobs.iter().filter(|j| j.site == Site::Leboncoin).collect();
        assert_eq!(leboncoin.len(), 2);
        assert_eq!(
            leboncoin[0].scope,
            GeoScope::Local {
                lat: 45.76,
                lng: 4.84,
                radius_km: 30,
                label: "Lyon".into()
            }
        );
        assert!(!leboncoin[0].target_url.contains("shippable"));
        assert_eq!(leboncoin[1].scope, GeoScope::National { shippable_only: true });
        assert!(leboncoin[1].target_url.contains("shippable=1"));

        let vinted: Vec<&JobSpec> = plan.jobs.iter().filter(|j| j.site == Site::Vinted).collect();
        assert_eq!(vinted.len(), 1);
        assert_eq!(vinted[0].mode(), GeoMode::National);
    }

    #[test]
    fn unrequested_sites_are_inactive_but_reference_stays_active() {
        let request = SearchRequest::new("perceuse").with_criteria(SearchCriteria {
            sites: Some(vec![Site::Vinted]),
            ..Default::default()
        });
        let plan = plan(&request);

        let active: Vec<Site> = plan.active_jobs().map(|j| j.site).collect();
        assert_eq!(active, vec![Site::Vinted, Site::Amazon]);
        let inactive: Vec<&JobSpec> = plan.jobs.iter().filter(|j| !j.active).collect();
        assert_eq!(inactive.len(), 3);
        assert!(inactive.iter().all(|j| j.target_url.is_empty()));
    }

    #[test]
    fn job_ids_follow_plan_order() {
        let plan = plan(&SearchRequest::new("perceuse"));
        let ids: Vec<u64> = plan.jobs.iter().map(|j| j.id.0).collect();
        assert_eq!(ids, (1..=Site::all().len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn radius_follows_config() {
        let config = EngineConfig {
            local_radius_km: 10,
            ..Default::default()
        };
        let request = SearchRequest::new("perceuse").with_criteria(SearchCriteria {
            user_location: Some(lyon()),
            ..Default::default()
        });
        let plan = VariantPlanner::new(&config).plan(&request, counter()).expect("plan");
        let local = plan
            .jobs
            .iter()
            .find(|j| j.site == Site::Leboncoin && j.mode() == GeoMode::Local)
            .expect("local job");
        assert!(local.target_url.contains("10000"));
    }
}
