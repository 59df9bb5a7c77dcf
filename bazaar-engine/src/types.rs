//! Core types: marketplaces, search requests, listings and responses.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use url::Url;

/// Marketplaces that bazaar can search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    /// Leboncoin: classifieds with radius search.
    Leboncoin,
    /// Vinted: second-hand, shipping only.
    Vinted,
    /// eBay: auctions and fixed price.
    Ebay,
    /// Facebook Marketplace: local classifieds with radius search.
    FacebookMarketplace,
    /// Amazon: catalog reference for new prices.
    Amazon,
}

impl Site {
    /// The catalog site that is always searched to anchor new prices.
    pub const REFERENCE: Site = Site::Amazon;

    /// Returns the human-readable name of this site.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Leboncoin => "Leboncoin",
            Self::Vinted => "Vinted",
            Self::Ebay => "eBay",
            Self::FacebookMarketplace => "Facebook Marketplace",
            Self::Amazon => "Amazon",
        }
    }

    /// Returns the wire key used in requests and `completedSites`.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Leboncoin => "leboncoin",
            Self::Vinted => "vinted",
            Self::Ebay => "ebay",
            Self::FacebookMarketplace => "facebook_marketplace",
            Self::Amazon => "amazon",
        }
    }

    /// Parse a site from its wire key (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::all().iter().copied().find(|site| site.key() == raw)
    }

    /// Message type the extraction collaborator uses when it pushes results
    /// unprompted, e.g. `LEBONCOIN_RESULTS`.
    pub fn push_message_type(&self) -> String {
        format!("{}_RESULTS", self.key().to_ascii_uppercase())
    }

    /// Whether the site's search page accepts a location + radius filter.
    pub fn supports_geo(&self) -> bool {
        matches!(self, Self::Leboncoin | Self::FacebookMarketplace)
    }

    /// Whether this is the reference (new-price) site.
    pub fn is_reference(&self) -> bool {
        *self == Self::REFERENCE
    }

    /// Returns all supported sites in plan order.
    pub fn all() -> &'static [Site] {
        &[
            Self::Leboncoin,
            Self::Vinted,
            Self::Ebay,
            Self::FacebookMarketplace,
            Self::Amazon,
        ]
    }

    /// Identify the site serving `raw_url` from its host name.
    pub fn from_url(raw_url: &str) -> Option<Self> {
        let url = Url::parse(raw_url).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        if host.contains("leboncoin.") {
            Some(Self::Leboncoin)
        } else if host.contains("vinted.") {
            Some(Self::Vinted)
        } else if host.contains("ebay.") {
            Some(Self::Ebay)
        } else if host.contains("facebook.") {
            Some(Self::FacebookMarketplace)
        } else if host.contains("amazon.") {
            Some(Self::Amazon)
        } else {
            None
        }
    }

    /// Build the search page URL a worker is pointed at.
    pub fn search_url(&self, keyword: &str, scope: &GeoScope, criteria: &SearchCriteria) -> String {
        let mut params: Vec<(&str, String)> = Vec::new();
        let base = match self {
            Self::Leboncoin => {
                params.push(("text", keyword.to_owned()));
                if criteria.price_min.is_some() || criteria.price_max.is_some() {
                    let min = criteria.price_min.map_or_else(|| "min".to_owned(), |p| p.to_string());
                    let max = criteria.price_max.map_or_else(|| "max".to_owned(), |p| p.to_string());
                    params.push(("price", format!("{min}-{max}")));
                }
                match criteria.owner_type {
                    Some(OwnerType::Private) => params.push(("owner_type", "private".into())),
                    Some(OwnerType::Pro) => params.push(("owner_type", "pro".into())),
                    Some(OwnerType::All) | None => {}
                }
                match scope {
                    GeoScope::Local {
                        lat,
                        lng,
                        radius_km,
                        label,
                    } => {
                        let radius_m = u64::from(*radius_km) * 1000;
                        params.push(("locations", format!("{label}__{lat}_{lng}_{radius_m}")));
                    }
                    GeoScope::National { shippable_only: true } => {
                        params.push(("shippable", "1".into()));
                    }
                    GeoScope::National { shippable_only: false } => {}
                }
                "https://www.leboncoin.fr/recherche"
            }
            Self::Vinted => {
                params.push(("search_text", keyword.to_owned()));
                if let Some(min) = criteria.price_min {
                    params.push(("price_from", min.to_string()));
                }
                if let Some(max) = criteria.price_max {
                    params.push(("price_to", max.to_string()));
                }
                "https://www.vinted.fr/catalog"
            }
            Self::Ebay => {
                params.push(("_nkw", keyword.to_owned()));
                if let Some(min) = criteria.price_min {
                    params.push(("_udlo", min.to_string()));
                }
                if let Some(max) = criteria.price_max {
                    params.push(("_udhi", max.to_string()));
                }
                "https://www.ebay.fr/sch/i.html"
            }
            Self::FacebookMarketplace => {
                params.push(("query", keyword.to_owned()));
                if let Some(min) = criteria.price_min {
                    params.push(("minPrice", min.to_string()));
                }
                if let Some(max) = criteria.price_max {
                    params.push(("maxPrice", max.to_string()));
                }
                match scope {
                    GeoScope::Local {
                        lat, lng, radius_km, ..
                    } => {
                        params.push(("latitude", lat.to_string()));
                        params.push(("longitude", lng.to_string()));
                        params.push(("radius", radius_km.to_string()));
                    }
                    GeoScope::National { shippable_only: true } => {
                        params.push(("deliveryMethod", "shipping".into()));
                    }
                    GeoScope::National { shippable_only: false } => {}
                }
                "https://www.facebook.com/marketplace/search"
            }
            Self::Amazon => {
                params.push(("k", keyword.to_owned()));
                "https://www.amazon.fr/s"
            }
        };

        match Url::parse_with_params(base, &params) {
            Ok(url) => url.to_string(),
            Err(_) => base.to_owned(),
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of one planned site search job, unique within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Whether a job searches around the user or across the whole country.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoMode {
    Local,
    National,
}

impl fmt::Display for GeoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::National => f.write_str("national"),
        }
    }
}

/// Concrete geographic filter applied to one job.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoScope {
    /// Radius search around the user. The shipping-only filter never applies.
    Local {
        lat: f64,
        lng: f64,
        radius_km: u32,
        /// Named-place label shown by the marketplace (city, postcode...).
        label: String,
    },
    /// Unscoped search.
    National { shippable_only: bool },
}

impl GeoScope {
    pub fn mode(&self) -> GeoMode {
        match self {
            Self::Local { .. } => GeoMode::Local,
            Self::National { .. } => GeoMode::National,
        }
    }
}

/// Seller type filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Private,
    Pro,
    All,
}

/// The user's position, used for local searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

impl UserLocation {
    /// Label used for the marketplace's named-place filter.
    pub fn label(&self) -> String {
        self.city
            .as_deref()
            .or(self.postal_code.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("{},{}", self.lat, self.lng), str::to_owned)
    }
}

/// Optional structured criteria attached to a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCriteria {
    /// Keyword string; a comma splits it into variants.
    pub keywords: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    /// Only return listings that can be shipped (national searches only).
    pub shippable: Option<bool>,
    pub owner_type: Option<OwnerType>,
    /// Sites to search. `None` means every site.
    pub sites: Option<Vec<Site>>,
    pub user_location: Option<UserLocation>,
}

/// One user search. Only borrowed once dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub criteria: Option<SearchCriteria>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            criteria: None,
        }
    }

    #[must_use]
    pub fn with_criteria(mut self, criteria: SearchCriteria) -> Self {
        self.criteria = Some(criteria);
        self
    }
}

/// How a listing is handed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    InPerson,
    Shipping,
    Both,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A normalised listing produced by the extraction collaborator.
///
/// Every field has a default, and an explicit `null` reads as that default,
/// so a partially filled item from a collaborator is passed through rather
/// than rejecting the whole page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultItem {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub price: f64,
    #[serde(deserialize_with = "null_as_euro")]
    pub currency: String,
    #[serde(deserialize_with = "null_as_default")]
    pub site: String,
    pub image: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    pub location: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub delivery_mode: DeliveryMode,
    /// Relevance score (higher is better), assigned upstream.
    #[serde(deserialize_with = "null_as_default")]
    pub score: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub flags: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_euro<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let currency = Option::<String>::deserialize(deserializer)?;
    Ok(currency.unwrap_or_else(|| ResultItem::DEFAULT_CURRENCY.to_owned()))
}

impl ResultItem {
    /// Flag set on listings that came from a local (radius) search.
    pub const FLAG_LOCAL: &'static str = "local";

    pub const DEFAULT_CURRENCY: &'static str = "EUR";

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Add a flag once.
    pub fn add_flag(&mut self, flag: &str) {
        if !self.has_flag(flag) {
            self.flags.push(flag.to_owned());
        }
    }
}

impl Default for ResultItem {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            price: 0.0,
            currency: Self::DEFAULT_CURRENCY.to_owned(),
            site: String::new(),
            image: None,
            url: String::new(),
            location: None,
            delivery_mode: DeliveryMode::Unknown,
            score: 0.0,
            flags: Vec::new(),
        }
    }
}

/// Merged outcome of a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResponse {
    /// Deduplicated listings ranked by descending score.
    pub results: Vec<ResultItem>,
    /// Cheapest priced listings from the reference site.
    pub reference_price_items: Vec<ResultItem>,
    /// Keys of sites that produced at least one listing.
    pub completed_sites: Vec<String>,
}
