use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::metrics::SEARCH_CACHE_SIZE;
use crate::models::SearchHit;

// Cached search results with timestamp
#[derive(Clone)]
pub struct CacheEntry {
    pub hits: Vec<SearchHit>,
    pub created_at: Instant,
}

// Create a cache key (hash of query + site filter)
pub fn make_cache_key(query: &str, site: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.trim().to_lowercase());
    hasher.update([0u8]);
    hasher.update(site.unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

pub struct SearchCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl SearchCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<SearchHit>> {
        let now = self.clock.now();
        let fresh = self
            .entries
            .get(key)
            .filter(|entry| now.duration_since(entry.created_at) < self.ttl)
            .map(|entry| entry.hits.clone());

        if fresh.is_none() {
            // expired entries go on lookup
            self.entries
                .remove_if(key, |_, entry| now.duration_since(entry.created_at) >= self.ttl);
            SEARCH_CACHE_SIZE.set(self.entries.len() as f64);
        }
        fresh
    }

    pub fn insert(&self, key: String, hits: Vec<SearchHit>) {
        self.entries.insert(
            key,
            CacheEntry {
                hits,
                created_at: self.clock.now(),
            },
        );
        SEARCH_CACHE_SIZE.set(self.entries.len() as f64);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
