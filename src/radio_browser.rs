use crate::models::{RadioBrowserServer, Station};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const BOOTSTRAP_BASE: &str = "https://all.api.radio-browser.info";
pub const DEFAULT_BASE: &str = "https://de1.api.radio-browser.info";
const MAX_BODY_BYTES: usize = 1_000_000;

/// Read side of the station directory. The aggregator and search only see
/// this, so they can run against an in-memory directory in tests.
#[async_trait]
pub trait StationDirectory: Send + Sync {
    async fn stations_by_country(&self, country_code: &str, limit: u32) -> Result<Vec<Station>>;
    async fn stations_by_name(&self, name: &str, limit: u32) -> Result<Vec<Station>>;
    async fn top_voted(&self, limit: u32) -> Result<Vec<Station>>;
}

#[derive(Debug, Clone)]
pub struct RadioBrowserClient {
    http: reqwest::Client,
    base: String,
}

impl RadioBrowserClient {
    pub fn new(base: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("freqhub/0.1 (internet radio client)"),
        );
        let http = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Builds a client for the configured base. `auto` picks a random mirror
    /// from the bootstrap server list, falling back to the default mirror.
    pub async fn connect(configured: &str) -> Result<Self> {
        if configured.trim() != "auto" {
            return Self::new(configured);
        }
        let bootstrap = Self::new(BOOTSTRAP_BASE)?;
        match bootstrap.discover_servers().await {
            Ok(servers) => {
                let server = servers
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .context("Radio Browser server list was empty")?;
                info!(server = %server, "selected radio browser mirror");
                Self::new(&format!("https://{server}"))
            }
            Err(e) => {
                warn!(error = ?e, "mirror discovery failed, using default");
                Self::new(DEFAULT_BASE)
            }
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn discover_servers(&self) -> Result<Vec<String>> {
        let url = format!("{}/json/servers", self.base);
        let resp = self.http.get(url).send().await.context("Server discovery failed")?;
        let bytes = read_limited(resp, MAX_BODY_BYTES).await?;
        let servers: Vec<RadioBrowserServer> =
            serde_json::from_slice(&bytes).context("Invalid /json/servers response")?;
        let mut names: Vec<String> = servers.into_iter().map(|s| s.name).collect();
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(anyhow!("Radio Browser server list was empty"));
        }
        Ok(names)
    }

    async fn fetch_stations(&self, url: Url) -> Result<Vec<Station>> {
        debug!(url = %url, "GET");
        let resp = self.http.get(url).send().await.context("Failed to fetch stations")?;
        if !resp.status().is_success() {
            return Err(anyhow!("Failed to fetch stations (HTTP {})", resp.status()));
        }
        let bytes = read_limited(resp, MAX_BODY_BYTES).await?;
        let stations: Vec<Station> =
            serde_json::from_slice(&bytes).context("Invalid stations response")?;
        debug!(count = stations.len(), "stations received");
        Ok(stations.into_iter().map(Station::normalized).collect())
    }
}

#[async_trait]
impl StationDirectory for RadioBrowserClient {
    async fn stations_by_country(&self, country_code: &str, limit: u32) -> Result<Vec<Station>> {
        let url = listing_url(
            &self.base,
            &format!("bycountrycodeexact/{}", urlencoding::encode(country_code)),
            limit,
        )?;
        self.fetch_stations(url).await
    }

    async fn stations_by_name(&self, name: &str, limit: u32) -> Result<Vec<Station>> {
        let url = listing_url(
            &self.base,
            &format!("byname/{}", urlencoding::encode(name)),
            limit,
        )?;
        self.fetch_stations(url).await
    }

    async fn top_voted(&self, limit: u32) -> Result<Vec<Station>> {
        let mut url = Url::parse(&format!("{}/json/stations/topvote/{limit}", self.base))
            .context("Invalid Radio Browser base URL")?;
        url.query_pairs_mut().append_pair("hidebroken", "true");
        self.fetch_stations(url).await
    }
}

/// Vote-ordered listing with broken streams excluded. `path` is already
/// percent-encoded.
fn listing_url(base: &str, path: &str, limit: u32) -> Result<Url> {
    let mut url = Url::parse(&format!("{base}/json/stations/{path}"))
        .context("Invalid Radio Browser base URL")?;
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string())
        .append_pair("order", "votes")
        .append_pair("reverse", "true")
        .append_pair("hidebroken", "true");
    Ok(url)
}

async fn read_limited(resp: reqwest::Response, limit: usize) -> Result<Vec<u8>> {
    if let Some(len) = resp.content_length() {
        if len as usize > limit {
            return Err(anyhow!("HTTP response too large ({len} bytes)"));
        }
    }

    let mut data: Vec<u8> = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("HTTP body read error")?;
        if data.len().saturating_add(chunk.len()) > limit {
            return Err(anyhow!("HTTP response exceeded size limit"));
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_servers() {
        let body = r#"[{"name":"de1.api.radio-browser.info"},{"name":"fr1.api.radio-browser.info"}]"#;
        let servers: Vec<RadioBrowserServer> = serde_json::from_str(body).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name, "de1.api.radio-browser.info");
    }

    #[test]
    fn builds_vote_ordered_listing_url() {
        let url = listing_url(DEFAULT_BASE, "bycountrycodeexact/IN", 6).unwrap();
        assert_eq!(
            url.as_str(),
            "https://de1.api.radio-browser.info/json/stations/bycountrycodeexact/IN?limit=6&order=votes&reverse=true&hidebroken=true"
        );
    }

    #[test]
    fn encodes_station_names_once() {
        let path = format!("byname/{}", urlencoding::encode("Radio Mirchi"));
        let url = listing_url(DEFAULT_BASE, &path, 3).unwrap();
        assert!(url.path().ends_with("/byname/Radio%20Mirchi"));
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = RadioBrowserClient::new("https://example.org/").unwrap();
        assert_eq!(client.base(), "https://example.org");
    }
}
