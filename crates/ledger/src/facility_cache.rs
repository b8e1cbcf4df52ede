use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use medrec_contracts::FacilityRef;
use tokio::sync::RwLock;

/// Resolved facility names, bounded by entry count and age. Only successful
/// lookups are stored.
#[derive(Clone)]
pub struct FacilityNameCache {
    cache: Arc<RwLock<HashMap<FacilityRef, CachedName>>>,
    max_entries: usize,
    ttl: Duration,
}

#[derive(Clone)]
struct CachedName {
    name: String,
    expires_at: Instant,
}

impl FacilityNameCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
            ttl,
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_entries > 0 && self.ttl > Duration::ZERO
    }

    pub async fn get(&self, facility: FacilityRef) -> Option<String> {
        if !self.enabled() {
            return None;
        }

        let now = Instant::now();
        let cache = self.cache.read().await;
        cache
            .get(&facility)
            .and_then(|entry| (entry.expires_at > now).then(|| entry.name.clone()))
    }

    pub async fn put(&self, facility: FacilityRef, name: String) {
        if !self.enabled() {
            return;
        }

        let now = Instant::now();
        let mut cache = self.cache.write().await;

        cache.retain(|_, entry| entry.expires_at > now);
        cache.insert(
            facility,
            CachedName {
                name,
                expires_at: now + self.ttl,
            },
        );

        // Evict soonest-to-expire first.
        while cache.len() > self.max_entries {
            let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(facility, _)| *facility)
            else {
                break;
            };
            cache.remove(&oldest);
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}
