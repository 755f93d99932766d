use crate::models::Station;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::{error, warn};

const FAVORITES_KEY_PREFIX: &str = "fm-favorites-";
const FAVORITES_KEY_GUEST: &str = "fm-favorites-guest";

pub fn favorites_key(user_id: Option<&str>) -> String {
    match user_id {
        Some(uid) => format!("{FAVORITES_KEY_PREFIX}{uid}"),
        None => FAVORITES_KEY_GUEST.to_string(),
    }
}

/// Per-identity favorites list, written through to storage on every change.
pub struct FavoritesStore {
    storage: Arc<dyn Storage>,
    user_id: Option<String>,
    favorites: Vec<Station>,
}

impl FavoritesStore {
    pub fn load(storage: Arc<dyn Storage>, user_id: Option<String>) -> Self {
        let favorites = read_list(storage.as_ref(), &favorites_key(user_id.as_deref()));
        Self {
            storage,
            user_id,
            favorites,
        }
    }

    pub fn list(&self) -> &[Station] {
        &self.favorites
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_favorite(&self, station_id: &str) -> bool {
        self.favorites.iter().any(|s| s.id() == station_id)
    }

    pub fn add(&mut self, station: Station) {
        if self.is_favorite(station.id()) {
            return;
        }
        self.favorites.push(station);
        self.persist();
    }

    pub fn remove(&mut self, station_id: &str) {
        self.favorites.retain(|s| s.id() != station_id);
        self.persist();
    }

    /// Returns whether the station is a favorite afterwards.
    pub fn toggle(&mut self, station: Station) -> bool {
        if self.is_favorite(station.id()) {
            self.remove(station.id());
            false
        } else {
            self.add(station);
            true
        }
    }

    /// Reloads from the new identity's key. Guest favorites are not carried
    /// over on sign-in.
    pub fn switch_user(&mut self, user_id: Option<String>) {
        if self.user_id == user_id {
            return;
        }
        self.favorites = read_list(self.storage.as_ref(), &favorites_key(user_id.as_deref()));
        self.user_id = user_id;
    }

    fn persist(&self) {
        let key = favorites_key(self.user_id.as_deref());
        let res = serde_json::to_string(&self.favorites)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.storage.set(&key, &json));
        if let Err(e) = res {
            warn!(key = %key, error = ?e, "failed to persist favorites");
        }
    }
}

fn read_list(storage: &dyn Storage, key: &str) -> Vec<Station> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return vec![],
        Err(e) => {
            warn!(key, error = ?e, "failed to read favorites");
            return vec![];
        }
    };
    match serde_json::from_str(&raw) {
        Ok(list) => list,
        Err(e) => {
            error!(key, error = %e, "failed to parse favorites");
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_station;
    use crate::storage::MemoryStorage;

    fn store() -> (Arc<MemoryStorage>, FavoritesStore) {
        let storage = Arc::new(MemoryStorage::new());
        let favs = FavoritesStore::load(storage.clone(), None);
        (storage, favs)
    }

    #[test]
    fn toggle_twice_restores_previous_state() {
        let (_, mut favs) = store();
        favs.add(test_station("a", "A"));
        let before = favs.list().to_vec();

        assert!(favs.toggle(test_station("b", "B")));
        assert!(favs.is_favorite("b"));
        assert!(!favs.toggle(test_station("b", "B")));
        assert_eq!(favs.list(), before.as_slice());
    }

    #[test]
    fn add_is_unique_by_id() {
        let (_, mut favs) = store();
        favs.add(test_station("a", "A"));
        favs.add(test_station("a", "A renamed"));
        assert_eq!(favs.list().len(), 1);
        assert_eq!(favs.list()[0].name, "A");
    }

    #[test]
    fn every_mutation_is_persisted_under_guest_key() {
        let (storage, mut favs) = store();
        favs.toggle(test_station("a", "A"));
        let raw = storage.get("fm-favorites-guest").unwrap().unwrap();
        let saved: Vec<Station> = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved[0].stationuuid, "a");

        favs.remove("a");
        assert_eq!(storage.get("fm-favorites-guest").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn switching_identity_reloads_without_merging() {
        let (storage, mut favs) = store();
        favs.toggle(test_station("guest-pick", "Guest"));

        favs.switch_user(Some("u1".into()));
        assert!(favs.list().is_empty());
        favs.toggle(test_station("user-pick", "User"));
        assert!(storage.get("fm-favorites-u1").unwrap().is_some());

        favs.switch_user(None);
        assert!(favs.is_favorite("guest-pick"));
        assert!(!favs.is_favorite("user-pick"));
    }

    #[test]
    fn corrupt_json_reads_as_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("fm-favorites-u2", "{not json").unwrap();
        let favs = FavoritesStore::load(storage, Some("u2".into()));
        assert!(favs.list().is_empty());
    }
}
