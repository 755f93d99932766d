use crate::models::{ListenEntry, Station};
use crate::storage::Storage;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const ANON_USER: &str = "anon";

pub fn listens_key(user_id: Option<&str>) -> String {
    format!("fh_listens:{}", user_id.unwrap_or(ANON_USER))
}

/// Per-user play counts, keyed by station id.
#[derive(Clone)]
pub struct ListenHistory {
    storage: Arc<dyn Storage>,
}

impl ListenHistory {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// A user with no history of their own sees the anonymous history.
    pub fn entries(&self, user_id: Option<&str>) -> Result<HashMap<String, ListenEntry>> {
        let raw = match self.storage.get(&listens_key(user_id))? {
            Some(raw) => Some(raw),
            None => self.storage.get(&listens_key(None))?,
        };
        let Some(raw) = raw else {
            return Ok(HashMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(user = user_id.unwrap_or(ANON_USER), error = %e, "discarding unreadable listen history");
                Ok(HashMap::new())
            }
        }
    }

    pub fn record(&self, user_id: Option<&str>, station: &Station) -> Result<ListenEntry> {
        let mut entries = self.entries(user_id)?;
        let entry = entries
            .entry(station.stationuuid.clone())
            .or_insert_with(|| ListenEntry {
                id: station.stationuuid.clone(),
                name: station.name.clone(),
                count: 0,
                last: 0,
            });
        entry.count += 1;
        entry.last = Utc::now().timestamp_millis();
        let updated = entry.clone();

        let json = serde_json::to_string(&entries).context("Serialize listen history")?;
        self.storage.set(&listens_key(user_id), &json)?;
        Ok(updated)
    }

    /// Most played first.
    pub fn top(&self, user_id: Option<&str>, n: usize) -> Result<Vec<ListenEntry>> {
        let mut entries: Vec<ListenEntry> = self.entries(user_id)?.into_values().collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| b.last.cmp(&a.last)));
        entries.truncate(n);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_station;
    use crate::storage::MemoryStorage;

    #[test]
    fn counts_accumulate_per_station() {
        let history = ListenHistory::new(Arc::new(MemoryStorage::new()));
        let a = test_station("a", "A");
        history.record(Some("u1"), &a).unwrap();
        let entry = history.record(Some("u1"), &a).unwrap();
        assert_eq!(entry.count, 2);
        assert!(entry.last > 0);
        assert_eq!(history.entries(Some("u1")).unwrap()["a"].count, 2);
    }

    #[test]
    fn anonymous_plays_use_anon_key() {
        let storage = Arc::new(MemoryStorage::new());
        let history = ListenHistory::new(storage.clone());
        history.record(None, &test_station("a", "A")).unwrap();
        assert!(storage.get("fh_listens:anon").unwrap().is_some());
    }

    #[test]
    fn top_orders_by_count() {
        let history = ListenHistory::new(Arc::new(MemoryStorage::new()));
        let a = test_station("a", "A");
        let b = test_station("b", "B");
        history.record(Some("u"), &a).unwrap();
        for _ in 0..3 {
            history.record(Some("u"), &b).unwrap();
        }
        let top = history.top(Some("u"), 8).unwrap();
        assert_eq!(top.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(history.top(Some("u"), 1).unwrap().len(), 1);
    }

    #[test]
    fn corrupt_history_starts_over() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("fh_listens:u", "[1,2").unwrap();
        let history = ListenHistory::new(storage.clone());
        assert!(history.top(Some("u"), 8).unwrap().is_empty());

        let a = test_station("a", "A");
        assert_eq!(history.record(Some("u"), &a).unwrap().count, 1);
        assert_eq!(history.record(Some("u"), &a).unwrap().count, 2);
        assert_ne!(storage.get("fh_listens:u").unwrap().as_deref(), Some("[1,2"));
        assert_eq!(history.top(Some("u"), 8).unwrap()[0].count, 2);
    }
}
