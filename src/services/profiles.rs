use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use uuid::Uuid;

use crate::database::{DataStore, models::Profile};
use crate::error::AppResult;

/// Read-through cache over the profiles relation.
#[derive(Clone)]
pub struct ProfileDirectory {
    store: Arc<dyn DataStore>,
    cache: Cache<Uuid, Profile>,
}

impl ProfileDirectory {
    pub fn new(store: Arc<dyn DataStore>, ttl_seconds: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();

        Self { store, cache }
    }

    /// Profiles for every id in `user_ids`. Ids without a profile row map to
    /// [`Profile::unknown`] and are not cached.
    pub async fn lookup(&self, user_ids: &[Uuid]) -> AppResult<HashMap<Uuid, Profile>> {
        let mut found = HashMap::with_capacity(user_ids.len());
        let mut missing = HashSet::new();

        for id in user_ids {
            if found.contains_key(id) || missing.contains(id) {
                continue;
            }
            match self.cache.get(id).await {
                Some(profile) => {
                    found.insert(*id, profile);
                }
                None => {
                    missing.insert(*id);
                }
            }
        }

        if !missing.is_empty() {
            let ids: Vec<Uuid> = missing.iter().copied().collect();
            for profile in self.store.get_profiles(&ids).await? {
                self.cache.insert(profile.user_id, profile.clone()).await;
                found.insert(profile.user_id, profile);
            }
        }

        for id in missing {
            found.entry(id).or_insert_with(|| Profile::unknown(id));
        }

        Ok(found)
    }
}
