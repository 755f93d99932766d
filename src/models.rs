use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub stationuuid: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_resolved: String,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub countrycode: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub votes: u32,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub bitrate: u32,
    #[serde(default)]
    pub homepage: String,
}

impl Station {
    /// Prefers the redirect-followed URL and mirrors it into `url`, so every
    /// consumer of a fetched station sees the playable address.
    pub fn normalized(mut self) -> Self {
        if self.url_resolved.trim().is_empty() {
            self.url_resolved = self.url.clone();
        }
        self.url = self.url_resolved.clone();
        self
    }

    pub fn id(&self) -> &str {
        &self.stationuuid
    }

    pub fn stream_url(&self) -> Option<&str> {
        [self.url_resolved.as_str(), self.url.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|u| !u.is_empty())
    }

    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    pub countries: &'static [&'static str],
    pub accent: &'static str,
    pub gradient: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuratedEntry {
    pub search_name: &'static str,
    pub display_name: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub count: u64,
    /// Unix epoch milliseconds of the latest play.
    #[serde(default)]
    pub last: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RadioBrowserServer {
    pub name: String,
}

#[cfg(test)]
pub(crate) fn test_station(id: &str, name: &str) -> Station {
    Station {
        stationuuid: id.to_string(),
        name: name.to_string(),
        url: format!("http://stream.example/{id}"),
        url_resolved: String::new(),
        favicon: String::new(),
        country: String::new(),
        countrycode: String::new(),
        language: String::new(),
        tags: String::new(),
        votes: 0,
        codec: String::new(),
        bitrate: 0,
        homepage: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_prefers_resolved_url() {
        let mut st = test_station("a", "A");
        st.url_resolved = "https://resolved.example/a".to_string();
        let st = st.normalized();
        assert_eq!(st.url, "https://resolved.example/a");
        assert_eq!(st.stream_url(), Some("https://resolved.example/a"));
    }

    #[test]
    fn normalization_falls_back_to_raw_url() {
        let st = test_station("a", "A").normalized();
        assert_eq!(st.url_resolved, "http://stream.example/a");
        assert_eq!(st.url, "http://stream.example/a");
    }

    #[test]
    fn splits_tags() {
        let mut st = test_station("a", "A");
        st.tags = "pop, rock,,  news ".to_string();
        assert_eq!(st.tag_list(), vec!["pop", "rock", "news"]);
    }

    #[test]
    fn parses_sparse_station_json() {
        let body = r#"{"stationuuid":"u1","name":"Test FM","votes":42,"extra":"ignored"}"#;
        let st: Station = serde_json::from_str(body).unwrap();
        assert_eq!(st.votes, 42);
        assert!(st.stream_url().is_none());
    }
}
