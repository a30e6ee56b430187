use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Lowercase ISO 3166-1 alpha-2 code, e.g. "us".
pub type CountryCode = String;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Country {
    #[serde(default)]
    pub iso_2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso_3: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
}

impl Country {
    pub fn new<C: Into<String>>(iso_2: C) -> Self {
        Country {
            iso_2: Some(iso_2.into()),
            iso_3: None,
            num_code: None,
            name: None,
            display_name: None,
            region_id: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub currency_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_taxes: Option<bool>,
    #[serde(default)]
    pub countries: Vec<Country>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Region {
    /// Lowercase country codes of this region, skipping countries without one.
    pub fn country_codes(&self) -> impl Iterator<Item = CountryCode> + '_ {
        self.countries
            .iter()
            .filter_map(|c| c.iso_2.as_deref())
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_ascii_lowercase)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Backend,
    Fallback,
}

impl Source {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Source::Backend => "backend",
            Source::Fallback => "fallback",
        }
    }
}

/// Immutable view of the known regions, keyed by country code.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionSnapshot {
    regions: Vec<Arc<Region>>,
    by_country: IndexMap<CountryCode, Arc<Region>>,
    source: Source,
}

impl RegionSnapshot {
    /// Indexes `regions` by country. Countries outside `allowed` are left
    /// out of the index; `None` allows every country. When two regions claim
    /// the same country the later one wins.
    pub fn build(regions: Vec<Region>, allowed: Option<&HashSet<CountryCode>>, source: Source) -> Self {
        let regions: Vec<Arc<Region>> = regions.into_iter().map(Arc::new).collect();
        let mut by_country = IndexMap::new();

        for region in &regions {
            for code in region.country_codes() {
                if allowed.is_none_or(|allowed| allowed.contains(&code)) {
                    by_country.insert(code, region.clone());
                }
            }
        }

        RegionSnapshot {
            regions,
            by_country,
            source,
        }
    }

    pub fn get(&self, country: &str) -> Option<&Arc<Region>> {
        self.by_country.get(country)
    }

    pub fn contains(&self, country: &str) -> bool {
        self.by_country.contains_key(country)
    }

    /// The first indexed country, in source order.
    pub fn first_country(&self) -> Option<&str> {
        self.by_country.keys().next().map(String::as_str)
    }

    pub fn country_codes(&self) -> impl Iterator<Item = &str> {
        self.by_country.keys().map(String::as_str)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Arc<Region>> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn regions(&self) -> &[Arc<Region>] {
        &self.regions
    }

    pub fn source(&self) -> Source {
        self.source
    }

    /// True when no country is indexed.
    pub fn is_empty(&self) -> bool {
        self.by_country.is_empty()
    }
}
