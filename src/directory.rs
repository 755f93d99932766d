use crate::cache::QueryCache;
use crate::models::Station;
use crate::radio_browser::StationDirectory;
use crate::regions::{curated_for, find_region};
use anyhow::Result;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const REGION_CAP: usize = 12;
pub const MIN_QUERY_CHARS: usize = 2;

const CURATED_LOOKUP_LIMIT: u32 = 3;
const PER_COUNTRY_LIMIT: u32 = 6;
const SEARCH_LIMIT: u32 = 20;
const POPULAR_LIMIT: u32 = 50;

const REGION_STALE: Duration = Duration::from_secs(10 * 60);
const SEARCH_STALE: Duration = Duration::from_secs(5 * 60);
const POPULAR_STALE: Duration = Duration::from_secs(10 * 60);

pub type StationList = Arc<Vec<Station>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Query too short; nothing was requested.
    Suppressed,
    Results(StationList),
}

/// Cached access to the directory: region listings, search and the
/// top-voted chart.
pub struct StationService {
    directory: Arc<dyn StationDirectory>,
    cache: QueryCache<StationList>,
}

impl StationService {
    pub fn new(directory: Arc<dyn StationDirectory>) -> Self {
        Self {
            directory,
            cache: QueryCache::new(),
        }
    }

    pub async fn region(&self, region_id: &str) -> Result<StationList> {
        let directory = self.directory.clone();
        let id = region_id.to_string();
        self.cache
            .get_or_fetch(&format!("stations/region/{region_id}"), REGION_STALE, move || async move {
                aggregate_region(directory.as_ref(), &id).await.map(Arc::new)
            })
            .await
    }

    pub async fn search(&self, query: &str) -> Result<SearchOutcome> {
        if !search_enabled(query) {
            return Ok(SearchOutcome::Suppressed);
        }
        let directory = self.directory.clone();
        let q = query.to_string();
        let results = self
            .cache
            .get_or_fetch(&format!("stations/search/{query}"), SEARCH_STALE, move || async move {
                directory.stations_by_name(&q, SEARCH_LIMIT).await.map(Arc::new)
            })
            .await?;
        Ok(SearchOutcome::Results(results))
    }

    pub async fn popular(&self) -> Result<StationList> {
        let directory = self.directory.clone();
        self.cache
            .get_or_fetch("stations/popular", POPULAR_STALE, move || async move {
                directory.top_voted(POPULAR_LIMIT).await.map(Arc::new)
            })
            .await
    }
}

pub fn search_enabled(query: &str) -> bool {
    query.trim().chars().count() >= MIN_QUERY_CHARS
}

/// Curated name lookups first, then per-country listings, de-duplicated by
/// station id and capped at [`REGION_CAP`]. Unknown regions yield nothing.
pub async fn aggregate_region(directory: &dyn StationDirectory, region_id: &str) -> Result<Vec<Station>> {
    let Some(region) = find_region(region_id) else {
        debug!(region = region_id, "unknown region");
        return Ok(vec![]);
    };
    let curated = curated_for(region.id);

    let curated_lookups = join_all(
        curated
            .iter()
            .map(|c| directory.stations_by_name(c.search_name, CURATED_LOOKUP_LIMIT)),
    );
    let country_listings = join_all(
        region
            .countries
            .iter()
            .map(|code| directory.stations_by_country(code, PER_COUNTRY_LIMIT)),
    );
    let (curated_results, country_results) = futures_util::join!(curated_lookups, country_listings);

    let mut first_err = None;
    let mut succeeded = 0usize;
    let total = curated_results.len() + country_results.len();

    let mut curated_matches = Vec::new();
    for (entry, res) in curated.iter().zip(curated_results) {
        match res {
            Ok(stations) => {
                succeeded += 1;
                curated_matches.extend(stations.into_iter().next());
            }
            Err(e) => {
                warn!(region = region.id, name = entry.search_name, error = ?e, "curated lookup failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }

    let mut country_stations = Vec::new();
    for (code, res) in region.countries.iter().zip(country_results) {
        match res {
            Ok(stations) => {
                succeeded += 1;
                country_stations.extend(stations);
            }
            Err(e) => {
                warn!(region = region.id, country = code, error = ?e, "country listing failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }

    if succeeded == 0 && total > 0 {
        if let Some(e) = first_err {
            return Err(e);
        }
    }

    Ok(merge_unique(curated_matches, country_stations, REGION_CAP))
}

fn merge_unique(curated: Vec<Station>, generic: Vec<Station>, cap: usize) -> Vec<Station> {
    let mut seen = HashSet::new();
    curated
        .into_iter()
        .chain(generic)
        .filter(|s| seen.insert(s.id().to_string()))
        .take(cap)
        .collect()
}
