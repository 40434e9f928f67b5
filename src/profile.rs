// src/profile.rs
// TTL cache over user profiles to keep message enrichment off the database

use std::time::Duration;

use moka::future::Cache;
use tracing::warn;

use crate::model::Profile;
use crate::store::Store;

const PROFILE_TTL: Duration = Duration::from_secs(3600);

/// One-hour cache of `{displayName, photoUrl}` per user. Lookup failures
/// cache an empty profile rather than erroring the surrounding handler; a
/// profile refresh on re-login invalidates the entry.
pub struct ProfileCache {
    cache: Cache<String, Profile>,
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().time_to_live(PROFILE_TTL).build(),
        }
    }

    pub async fn get(&self, store: &dyn Store, user_id: &str) -> Profile {
        self.cache
            .get_with(user_id.to_string(), async {
                match store.user_profile(user_id).await {
                    Ok(profile) => profile,
                    Err(e) => {
                        warn!(user = user_id, "profile lookup failed: {e}");
                        Profile::default()
                    }
                }
            })
            .await
    }

    pub async fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(user_id).await;
    }
}
